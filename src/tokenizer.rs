use crate::ring::Ring;
use bytes::{BufMut, Bytes, BytesMut};

/// Receives the chunks a [`Tokenizer`] cuts out of its input.
///
/// `end` is `true` when the chunk was terminated by the delimiter. Any
/// `FnMut(Bytes, bool)` closure is a receiver.
pub trait Receiver {
    fn receive(&mut self, chunk: Bytes, end: bool);
}

impl<F: FnMut(Bytes, bool)> Receiver for F {
    fn receive(&mut self, chunk: Bytes, end: bool) {
        self(chunk, end)
    }
}

/// Scans a byte stream for a fixed delimiter.
///
/// Bytes are held back in a window as long as the delimiter until it is
/// certain they are not part of a match, so a delimiter split across any
/// number of pushed chunks is still found. Delimiter bytes themselves are
/// never handed to the receiver.
///
/// # Examples
///
/// ```
/// use partflow::Tokenizer;
///
/// let mut tokenizer = Tokenizer::new("\r\n\r\n", 64).unwrap();
/// let mut segments = vec![Vec::new()];
/// let mut receiver = |chunk: bytes::Bytes, end: bool| {
///     segments.last_mut().unwrap().extend_from_slice(&chunk);
///     if end {
///         segments.push(Vec::new());
///     }
/// };
///
/// tokenizer.push(b"Content-Type: text/plain\r\n", &mut receiver);
/// tokenizer.push(b"\r\nhello", &mut receiver);
/// tokenizer.close(&mut receiver);
///
/// assert_eq!(segments, vec![b"Content-Type: text/plain".to_vec(), b"hello".to_vec()]);
/// ```
#[derive(Debug)]
pub struct Tokenizer {
    delimiter: Box<[u8]>,
    ring: Ring,
    acc: BytesMut,
    capacity: usize,
}

impl Tokenizer {
    /// Creates a tokenizer for `delimiter`; `capacity` is only the initial
    /// allocation of the internal accumulator, which grows as needed.
    pub fn new<D: AsRef<[u8]>>(delimiter: D, capacity: usize) -> crate::Result<Tokenizer> {
        let delimiter = delimiter.as_ref();
        if delimiter.is_empty() {
            return Err(crate::Error::EmptyDelimiter);
        }

        Ok(Tokenizer {
            delimiter: delimiter.into(),
            ring: Ring::new(delimiter.len()),
            acc: BytesMut::with_capacity(capacity),
            capacity,
        })
    }

    /// Consumes a whole chunk.
    pub fn push<R: Receiver + ?Sized>(&mut self, chunk: &[u8], receiver: &mut R) {
        self.scan(chunk, receiver, false);
    }

    /// Consumes the chunk up to and including the first delimiter.
    ///
    /// Returns the number of bytes consumed if a delimiter was found, the
    /// rest of the chunk is left to the caller untouched.
    pub fn push_until_delimiter<R: Receiver + ?Sized>(&mut self, chunk: &[u8], receiver: &mut R) -> Option<usize> {
        self.scan(chunk, receiver, true)
    }

    /// Flushes whatever is still held back as a final, non-terminal chunk.
    pub fn close<R: Receiver + ?Sized>(&mut self, receiver: &mut R) {
        self.ring.drain_into(&mut self.acc);

        if !self.acc.is_empty() {
            let chunk = self.take();
            receiver.receive(chunk, false);
        }
    }

    fn scan<R: Receiver + ?Sized>(&mut self, chunk: &[u8], receiver: &mut R, stop_at_delimiter: bool) -> Option<usize> {
        for (idx, byte) in chunk.iter().enumerate() {
            if let Some(evicted) = self.ring.push(*byte) {
                self.acc.put_u8(evicted);
            }

            if self.ring.matches(&self.delimiter) {
                self.ring.clear();
                let chunk = self.take();
                receiver.receive(chunk, true);

                if stop_at_delimiter {
                    return Some(idx + 1);
                }
            }
        }

        if !self.acc.is_empty() {
            let chunk = self.take();
            receiver.receive(chunk, false);
        }

        None
    }

    fn take(&mut self) -> Bytes {
        let chunk = self.acc.split().freeze();
        self.acc.reserve(self.capacity);
        chunk
    }
}
