use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

/// An unbounded queue of byte buffers decoupling the producer of a part body
/// from its consumer.
///
/// Bytes are read back exactly once, in the order they were written, and a
/// read may cut through any number of the buffers it holds.
#[derive(Debug, Default)]
pub(crate) struct Accumulator {
    bufs: VecDeque<Bytes>,
    len: usize,
}

impl Accumulator {
    pub(crate) fn new() -> Self {
        Accumulator::default()
    }

    pub(crate) fn write(&mut self, buf: Bytes) {
        if buf.is_empty() {
            return;
        }

        self.len += buf.len();
        self.bufs.push_back(buf);
    }

    /// Moves up to `max` bytes into `dst`, returning how many were moved.
    pub(crate) fn read(&mut self, dst: &mut BytesMut, max: usize) -> usize {
        let mut remaining = max;

        while remaining > 0 {
            let front = match self.bufs.front_mut() {
                Some(front) => front,
                None => break,
            };

            let n = remaining.min(front.len());
            dst.extend_from_slice(&front[..n]);
            front.advance(n);

            if front.is_empty() {
                self.bufs.pop_front();
            }

            remaining -= n;
        }

        let read = max - remaining;
        self.len -= read;
        read
    }

    /// Reads up to `max` bytes as a single chunk, without copying when the
    /// front buffer alone can satisfy the read.
    pub(crate) fn read_chunk(&mut self, max: usize) -> Option<Bytes> {
        let single = self.bufs.len() == 1;
        let front = self.bufs.front_mut()?;

        if single || front.len() >= max {
            let n = max.min(front.len());
            let chunk = front.split_to(n);
            if front.is_empty() {
                self.bufs.pop_front();
            }
            self.len -= n;
            return Some(chunk);
        }

        let mut dst = BytesMut::with_capacity(max.min(self.len));
        self.read(&mut dst, max);
        Some(dst.freeze())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Releases every held buffer.
    pub(crate) fn close(&mut self) {
        self.bufs.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_across_buffers() {
        let mut acc = Accumulator::new();
        acc.write(Bytes::from_static(b"hel"));
        acc.write(Bytes::from_static(b""));
        acc.write(Bytes::from_static(b"lo wor"));
        acc.write(Bytes::from_static(b"ld"));
        assert_eq!(acc.len(), 11);

        let mut dst = BytesMut::new();
        assert_eq!(acc.read(&mut dst, 5), 5);
        assert_eq!(&dst[..], b"hello");
        assert_eq!(acc.len(), 6);

        dst.clear();
        assert_eq!(acc.read(&mut dst, 100), 6);
        assert_eq!(&dst[..], b" world");
        assert!(acc.is_empty());
        assert_eq!(acc.read(&mut dst, 1), 0);
    }

    #[test]
    fn test_read_chunk() {
        let mut acc = Accumulator::new();
        acc.write(Bytes::from_static(b"abcdef"));
        acc.write(Bytes::from_static(b"gh"));

        assert_eq!(acc.read_chunk(4), Some(Bytes::from_static(b"abcd")));
        assert_eq!(acc.read_chunk(4), Some(Bytes::from_static(b"efgh")));
        assert_eq!(acc.read_chunk(4), None);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_close_releases() {
        let mut acc = Accumulator::new();
        acc.write(Bytes::from_static(b"abc"));
        acc.close();
        assert!(acc.is_empty());
        assert_eq!(acc.read_chunk(10), None);
    }
}
