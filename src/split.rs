use crate::constants;
use crate::tokenizer::Tokenizer;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{Stream, TryStreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type Upstream = Pin<Box<dyn Stream<Item = crate::Result<Bytes>> + Send>>;

enum Chunk {
    Data(Bytes),
    End,
}

struct SplitState {
    upstream: Option<Upstream>,
    tokenizer: Tokenizer,
    queue: VecDeque<Chunk>,
    segment_open: bool,
    skipping: bool,
    failed: bool,
    next_segment_waker: Option<Waker>,
    next_idx: usize,
}

impl SplitState {
    /// Reads one more upstream item into the queue.
    fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        let upstream = match self.upstream.as_mut() {
            Some(upstream) => upstream,
            None => return Poll::Ready(Ok(())),
        };

        match upstream.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let queue = &mut self.queue;
                self.tokenizer.push(&chunk, &mut |data: Bytes, end: bool| {
                    if !data.is_empty() {
                        queue.push_back(Chunk::Data(data));
                    }
                    if end {
                        queue.push_back(Chunk::End);
                    }
                });
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(Err(err))) => {
                self.upstream = None;
                self.failed = true;
                Poll::Ready(Err(err))
            }
            Poll::Ready(None) => {
                self.upstream = None;

                let queue = &mut self.queue;
                self.tokenizer.close(&mut |data: Bytes, _: bool| queue.push_back(Chunk::Data(data)));
                queue.push_back(Chunk::End);

                trace!("split upstream exhausted");
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn exhausted(&self) -> bool {
        self.upstream.is_none() && self.queue.is_empty()
    }

    fn release_segment(&mut self) {
        self.segment_open = false;
        if let Some(waker) = self.next_segment_waker.take() {
            waker.wake();
        }
    }
}

/// Splits a byte stream into a stream of [`Segment`]s at every occurrence of
/// a delimiter.
///
/// Segments are handed out one at a time: the next one is yielded only after
/// the previous segment has ended or been dropped. Dropping a segment early
/// skips the rest of its bytes. The upstream is read only while a segment or
/// a skip needs bytes, so pacing follows the consumer.
///
/// As with [`str::split`], the bytes after the last delimiter always form a
/// final segment, which is empty when the input ends with the delimiter.
///
/// # Examples
///
/// ```
/// use partflow::Split;
/// use bytes::Bytes;
/// use futures_util::stream::{self, StreamExt};
/// use std::convert::Infallible;
///
/// # async fn run() {
/// let lines = stream::iter(vec![Ok::<_, Infallible>(Bytes::from("one\r\ntw")), Ok(Bytes::from("o\r\nthree"))]);
/// let mut split = Split::new(lines, "\r\n").unwrap();
///
/// let mut lines = Vec::new();
/// while let Some(segment) = split.next().await {
///     lines.push(segment.unwrap().bytes().await.unwrap());
/// }
///
/// assert_eq!(lines, vec!["one", "two", "three"]);
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct Split {
    state: Arc<spin::Mutex<SplitState>>,
}

impl Split {
    /// Creates a splitter over `stream`. An empty delimiter is rejected.
    pub fn new<S, O, E, D>(stream: S, delimiter: D) -> crate::Result<Split>
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
        D: AsRef<[u8]>,
    {
        let tokenizer = Tokenizer::new(delimiter, constants::DEFAULT_BODY_CAPACITY)?;

        let stream = stream
            .map_ok(|b| b.into())
            .map_err(|err| crate::Error::StreamReadFailed(err.into()));

        let state = SplitState {
            upstream: Some(Box::pin(stream)),
            tokenizer,
            queue: VecDeque::new(),
            segment_open: false,
            skipping: false,
            failed: false,
            next_segment_waker: None,
            next_idx: 0,
        };

        Ok(Split {
            state: Arc::new(spin::Mutex::new(state)),
        })
    }
}

impl Stream for Split {
    type Item = crate::Result<Segment>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut state = self.state.lock();

        loop {
            if state.segment_open {
                state.next_segment_waker = Some(cx.waker().clone());
                return Poll::Pending;
            }

            if state.failed {
                return Poll::Ready(None);
            }

            if state.skipping {
                match state.queue.pop_front() {
                    Some(Chunk::Data(_)) => continue,
                    Some(Chunk::End) => {
                        state.skipping = false;
                        continue;
                    }
                    None => match state.poll_fill(cx) {
                        Poll::Ready(Ok(())) => continue,
                        Poll::Ready(Err(err)) => return Poll::Ready(Some(Err(err))),
                        Poll::Pending => return Poll::Pending,
                    },
                }
            }

            if state.exhausted() {
                return Poll::Ready(None);
            }

            let idx = state.next_idx;
            state.next_idx += 1;
            state.segment_open = true;

            trace!("segment {} offered", idx);
            return Poll::Ready(Some(Ok(Segment {
                state: Arc::clone(&self.state),
                idx,
                done: false,
            })));
        }
    }
}

impl std::fmt::Debug for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Split").finish_non_exhaustive()
    }
}

/// The bytes between two delimiters, as a [`Stream`] of [`Bytes`].
///
/// Delimiter bytes never appear in a segment.
pub struct Segment {
    state: Arc<spin::Mutex<SplitState>>,
    idx: usize,
    done: bool,
}

impl Segment {
    /// The position of this segment in the split stream.
    pub fn index(&self) -> usize {
        self.idx
    }

    /// Stream a chunk of the segment. [`None`] marks its end.
    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        self.try_next().await
    }

    /// Collects the whole segment.
    pub async fn bytes(mut self) -> crate::Result<Bytes> {
        let mut buf = BytesMut::new();

        while let Some(bytes) = self.chunk().await? {
            buf.extend_from_slice(&bytes);
        }

        Ok(buf.freeze())
    }
}

impl Stream for Segment {
    type Item = crate::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        let mut state = this.state.lock();

        loop {
            match state.queue.pop_front() {
                Some(Chunk::Data(data)) => return Poll::Ready(Some(Ok(data))),
                Some(Chunk::End) => {
                    trace!("segment {} ended", this.idx);
                    this.done = true;
                    state.release_segment();
                    return Poll::Ready(None);
                }
                None if state.upstream.is_none() => {
                    this.done = true;
                    state.release_segment();
                    return Poll::Ready(None);
                }
                None => match state.poll_fill(cx) {
                    Poll::Ready(Ok(())) => continue,
                    Poll::Ready(Err(err)) => {
                        this.done = true;
                        state.release_segment();
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Pending => return Poll::Pending,
                },
            }
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment").field("index", &self.idx).finish()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        trace!("segment {} dropped early, skipping its rest", self.idx);
        let mut state = self.state.lock();
        state.skipping = true;
        state.release_segment();
    }
}
