use bytes::BytesMut;
use std::collections::VecDeque;

/// A fixed-capacity window over the most recently seen bytes.
///
/// Its capacity is the delimiter length, so after every push it holds
/// exactly the bytes a delimiter match would have to cover.
#[derive(Debug)]
pub(crate) struct Ring {
    bytes: VecDeque<u8>,
    cap: usize,
}

impl Ring {
    pub(crate) fn new(cap: usize) -> Ring {
        Ring {
            bytes: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Appends a byte, returning the oldest one if the window was full.
    pub(crate) fn push(&mut self, byte: u8) -> Option<u8> {
        let evicted = if self.bytes.len() == self.cap {
            self.bytes.pop_front()
        } else {
            None
        };

        self.bytes.push_back(byte);
        evicted
    }

    pub(crate) fn matches(&self, delimiter: &[u8]) -> bool {
        self.bytes.len() == delimiter.len() && self.bytes.iter().eq(delimiter.iter())
    }

    pub(crate) fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Moves the held bytes, oldest first, to the end of `dst`.
    pub(crate) fn drain_into(&mut self, dst: &mut BytesMut) {
        let (front, back) = self.bytes.as_slices();
        dst.extend_from_slice(front);
        dst.extend_from_slice(back);
        self.bytes.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }
}
