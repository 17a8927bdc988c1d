use crate::buffer::Accumulator;
use crate::completion::Completion;
use crate::constants;
use crate::constraints::Constraints;
use crate::content_disposition::ContentDisposition;
use crate::flow::{Demand, NoopSubscription, Subscriber, Subscription};
use crate::helpers;
use crate::size_limit::SizeLimit;
use crate::tokenizer::{Receiver, Tokenizer};
use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use futures_util::stream::{Stream, TryStreamExt};
use http::header::{self, HeaderMap};
#[cfg(feature = "json")]
use serde::de::DeserializeOwned;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    CollectingHeader,
    StreamingBody,
    Completed,
    Failed,
    Cancelled,
}

enum Signal {
    Attach(Box<dyn Subscriber<Bytes>>),
    Deliver,
}

struct PartState {
    stage: Stage,
    tokenizer: Tokenizer,
    header: BytesMut,
    buffer: Accumulator,
    demand: Demand,
    subscribed: bool,
    flushed: bool,
    error: Option<crate::Error>,
    signals: Option<mpsc::UnboundedReceiver<Signal>>,
}

struct Shared {
    idx: usize,
    state: spin::Mutex<PartState>,
    signals: mpsc::UnboundedSender<Signal>,
    completion: Arc<Completion>,
    /// Live [`Link`]s. Zero means nobody can feed or drain the part anymore.
    links: AtomicUsize,
}

impl Shared {
    fn schedule(&self) {
        // The actor is gone once the part finished; nothing left to deliver then.
        let _ = self.signals.send(Signal::Deliver);
    }

    fn cancel(&self) {
        let mut state = self.state.lock();

        if matches!(state.stage, Stage::CollectingHeader | Stage::StreamingBody) {
            state.stage = Stage::Cancelled;
            state.buffer.close();
            drop(state);

            trace!("part {} cancelled", self.idx);
            self.schedule();
        }
    }
}

/// A counted handle on a part's shared state, held by the writer, the part
/// and its subscription.
///
/// Dropping the last one wakes the actor so it can settle the part.
struct Link(Arc<Shared>);

impl Link {
    fn new(shared: Arc<Shared>) -> Link {
        shared.links.fetch_add(1, Ordering::AcqRel);
        Link(shared)
    }

    fn released(shared: &Shared) -> bool {
        shared.links.load(Ordering::Acquire) == 0
    }
}

impl Clone for Link {
    fn clone(&self) -> Link {
        Link::new(Arc::clone(&self.0))
    }
}

impl Deref for Link {
    type Target = Shared;

    fn deref(&self) -> &Shared {
        &self.0
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if self.0.links.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.schedule();
        }
    }
}

/// Collects header bytes ahead of the blank line.
struct HeaderReceiver<'a>(&'a mut BytesMut);

impl Receiver for HeaderReceiver<'_> {
    fn receive(&mut self, chunk: Bytes, _end: bool) {
        self.0.extend_from_slice(&chunk);
    }
}

/// The producer side of a part, owned by the assembler.
pub(crate) struct Writer {
    shared: Link,
    runtime: Handle,
    size_limit: SizeLimit,
    limit: u64,
    written: u64,
    part_name: Option<String>,
}

impl Writer {
    pub(crate) fn new(
        idx: usize,
        completion: Arc<Completion>,
        constraints: &Constraints,
        runtime: Handle,
    ) -> crate::Result<Writer> {
        let tokenizer = Tokenizer::new(constants::CRLF_CRLF, constraints.body_capacity)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let state = PartState {
            stage: Stage::CollectingHeader,
            tokenizer,
            header: BytesMut::with_capacity(constraints.header_capacity),
            buffer: Accumulator::new(),
            demand: Demand::default(),
            subscribed: false,
            flushed: false,
            error: None,
            signals: Some(rx),
        };

        completion.item_started();

        Ok(Writer {
            shared: Link::new(Arc::new(Shared {
                idx,
                state: spin::Mutex::new(state),
                signals: tx,
                completion,
                links: AtomicUsize::new(0),
            })),
            runtime,
            size_limit: constraints.size_limit.clone(),
            limit: constraints.size_limit.per_part,
            written: 0,
            part_name: None,
        })
    }

    /// Feeds raw part bytes.
    ///
    /// Returns the consumer handle exactly once, as soon as the header block
    /// is complete. Bytes following the blank line in the same chunk are
    /// body bytes.
    pub(crate) fn push(&mut self, chunk: Bytes) -> crate::Result<Option<Part>> {
        let shared = Arc::clone(&self.shared.0);
        let mut state = shared.state.lock();

        match state.stage {
            Stage::CollectingHeader => {
                let consumed = {
                    let PartState { tokenizer, header, .. } = &mut *state;
                    tokenizer.push_until_delimiter(&chunk, &mut HeaderReceiver(header))
                };

                let consumed = match consumed {
                    Some(consumed) => consumed,
                    None => return Ok(None),
                };

                let raw_headers = helpers::strip_boundary_line(&state.header.split().freeze());
                let headers = helpers::parse_part_headers(&raw_headers)?;
                let disposition = ContentDisposition::parse(&headers);

                self.limit = self.size_limit.extract_size_limit_for(disposition.part_name.as_deref());
                self.part_name = disposition.part_name.clone();

                state.stage = Stage::StreamingBody;
                let signals = state.signals.take();
                self.write_body(&mut state, chunk.slice(consumed..))?;
                drop(state);

                if let Some(signals) = signals {
                    let actor = Actor {
                        shared: Arc::clone(&shared),
                        signals,
                        downstream: None,
                    };
                    self.runtime.spawn(actor.run());
                }

                debug!("part {} ready: {:?}", shared.idx, self.part_name);

                Ok(Some(Part::new(Link::new(shared), headers, raw_headers, disposition)))
            }
            Stage::StreamingBody | Stage::Cancelled | Stage::Failed => {
                self.write_body(&mut state, chunk)?;
                Ok(None)
            }
            Stage::Completed => Err(crate::Error::StreamClosed),
        }
    }

    fn write_body(&mut self, state: &mut PartState, chunk: Bytes) -> crate::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        self.written += chunk.len() as u64;
        if self.written > self.limit {
            return Err(crate::Error::PartSizeExceeded {
                limit: self.limit,
                part_name: self.part_name.clone(),
            });
        }

        if state.stage != Stage::StreamingBody {
            return Ok(());
        }

        state.buffer.write(chunk);
        if state.subscribed {
            self.shared.schedule();
        }

        Ok(())
    }

    /// Marks the end of the part's input.
    pub(crate) fn flush(&mut self) -> crate::Result<()> {
        let mut state = self.shared.state.lock();

        if state.stage == Stage::CollectingHeader {
            let PartState { tokenizer, header, .. } = &mut *state;
            tokenizer.close(&mut HeaderReceiver(header));
            return Err(crate::Error::IncompleteHeaders);
        }

        state.flushed = true;
        drop(state);

        trace!("part {} flushed after {} body bytes", self.shared.idx, self.written);
        self.shared.schedule();
        Ok(())
    }

    /// Routes an upstream failure to the part's consumer.
    pub(crate) fn fail(&mut self, err: crate::Error) {
        let mut state = self.shared.state.lock();

        if state.stage == Stage::StreamingBody && state.error.is_none() {
            state.error = Some(err);
            drop(state);
            self.shared.schedule();
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        let flushed = self.shared.state.lock().flushed;

        if !flushed {
            self.fail(crate::Error::IncompletePartData {
                part_name: self.part_name.clone(),
            });
        }
    }
}

enum Flow {
    Continue,
    Finished,
}

enum Step {
    Next(Bytes),
    Complete,
    Fail(crate::Error),
    Detach { flushed: bool, released: bool },
    Idle,
}

/// Runs every delivery pass of one part, so at most one is ever in flight.
///
/// The actor keeps the shared state alive until the part settles, even when
/// every handle on it is gone.
struct Actor {
    shared: Arc<Shared>,
    signals: mpsc::UnboundedReceiver<Signal>,
    downstream: Option<Box<dyn Subscriber<Bytes>>>,
}

impl Actor {
    async fn run(mut self) {
        let shared = Arc::clone(&self.shared);

        while let Some(signal) = self.signals.recv().await {
            if let Signal::Attach(subscriber) = signal {
                self.downstream = Some(subscriber);
            }

            if let Flow::Finished = self.deliver(&shared) {
                break;
            }
        }
    }

    fn deliver(&mut self, shared: &Shared) -> Flow {
        loop {
            let step = {
                let mut state = shared.state.lock();
                self.next_step(&mut state, Link::released(shared))
            };

            // Subscriber callbacks run outside the lock so they may call back
            // into the subscription.
            match step {
                Step::Next(chunk) => {
                    if let Some(downstream) = self.downstream.as_mut() {
                        downstream.on_next(chunk);
                    }
                }
                Step::Complete => {
                    if let Some(mut downstream) = self.downstream.take() {
                        downstream.on_complete();
                    }

                    debug!("part {} completed", shared.idx);
                    shared.completion.item_completed();
                    return Flow::Finished;
                }
                Step::Fail(err) => {
                    if let Some(mut downstream) = self.downstream.take() {
                        downstream.on_error(err);
                    }
                    return Flow::Finished;
                }
                Step::Detach { flushed, released } => {
                    self.downstream = None;

                    if flushed {
                        shared.completion.item_completed();
                        return Flow::Finished;
                    }

                    // An unflushed part whose writer is gone was aborted.
                    if released {
                        return Flow::Finished;
                    }
                    return Flow::Continue;
                }
                Step::Idle => return Flow::Continue,
            }
        }
    }

    fn next_step(&self, state: &mut PartState, released: bool) -> Step {
        if state.stage == Stage::Cancelled {
            return Step::Detach {
                flushed: state.flushed,
                released,
            };
        }

        // An accepted subscriber may still be queued behind this signal.
        if self.downstream.is_none() {
            return Step::Idle;
        }

        if let Some(err) = state.error.take() {
            state.stage = Stage::Failed;
            state.buffer.close();
            return Step::Fail(err);
        }

        if !state.demand.is_zero() {
            if let Some(chunk) = state.buffer.read_chunk(constants::DELIVERY_SLICE) {
                state.demand.take_one();
                return Step::Next(chunk);
            }
        }

        if state.flushed && state.buffer.is_empty() {
            state.stage = Stage::Completed;
            state.buffer.close();
            return Step::Complete;
        }

        if released {
            trace!("part {} stalled with no handle left", self.shared.idx);
            state.stage = Stage::Cancelled;
            state.buffer.close();
            return Step::Detach {
                flushed: state.flushed,
                released,
            };
        }

        Step::Idle
    }
}

struct PartSubscription {
    shared: Link,
}

impl Subscription for PartSubscription {
    fn request(&self, n: u64) -> crate::Result<()> {
        self.shared.state.lock().demand.add(n)?;
        self.shared.schedule();
        Ok(())
    }

    fn cancel(&self) {
        self.shared.cancel();
    }
}

/// A single section of a multipart body.
///
/// A part is handed out once its header block has been read completely. Its
/// body can be consumed by exactly one subscriber, either a
/// [`Subscriber`] passed to [`subscribe`](Part::subscribe) or the
/// [`PartBody`] stream returned by [`body`](Part::body).
///
/// # Warning about leaks
///
/// A part whose body nobody consumes holds back the overall completion of
/// its multipart stream. Dropping a part that was never subscribed discards
/// its body and releases it.
pub struct Part {
    shared: Link,
    headers: HeaderMap,
    raw_headers: Bytes,
    meta: PartMeta,
}

struct PartMeta {
    name: Option<String>,
    file_name: Option<String>,
    content_type: Option<mime::Mime>,
}

impl Part {
    fn new(shared: Link, headers: HeaderMap, raw_headers: Bytes, disposition: ContentDisposition) -> Self {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<mime::Mime>().ok());

        Part {
            shared,
            headers,
            raw_headers,
            meta: PartMeta {
                name: disposition.part_name,
                file_name: disposition.file_name,
                content_type,
            },
        }
    }

    /// The part name found in the
    /// [`Content-Disposition`](https://developer.mozilla.org/en-US/docs/Web/HTTP/Headers/Content-Disposition)
    /// header.
    pub fn name(&self) -> Option<&str> {
        self.meta.name.as_deref()
    }

    /// The file name found in the `Content-Disposition` header.
    pub fn file_name(&self) -> Option<&str> {
        self.meta.file_name.as_deref()
    }

    /// Get the content type of the part.
    pub fn content_type(&self) -> Option<&mime::Mime> {
        self.meta.content_type.as_ref()
    }

    /// Get a map of headers as [`HeaderMap`].
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The header block exactly as received, without the boundary line and
    /// the terminating blank line.
    pub fn raw_headers(&self) -> &Bytes {
        &self.raw_headers
    }

    /// Get the index of this part in order they appeared in the stream.
    pub fn index(&self) -> usize {
        self.shared.idx
    }

    /// Attaches the consumer of this part's body.
    ///
    /// Only one subscriber is accepted. Any later subscriber immediately
    /// receives a no-op subscription followed by
    /// [`Error::AlreadySubscribed`](crate::Error::AlreadySubscribed); the
    /// first one is unaffected.
    pub fn subscribe<S: Subscriber<Bytes>>(&self, mut subscriber: S) {
        let accepted = {
            let mut state = self.shared.state.lock();
            !std::mem::replace(&mut state.subscribed, true)
        };

        if !accepted {
            subscriber.on_subscribe(Arc::new(NoopSubscription));
            subscriber.on_error(crate::Error::AlreadySubscribed);
            return;
        }

        subscriber.on_subscribe(Arc::new(PartSubscription {
            shared: self.shared.clone(),
        }));

        if let Err(mpsc::error::SendError(Signal::Attach(mut subscriber))) =
            self.shared.signals.send(Signal::Attach(Box::new(subscriber)))
        {
            subscriber.on_error(crate::Error::NoRuntime);
        }
    }

    /// Subscribes to the body as a [`Stream`] of chunks, requesting one chunk
    /// per poll.
    pub fn body(&self) -> PartBody {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(Forward { events: tx });

        PartBody {
            events: rx,
            subscription: None,
            requested: false,
            done: false,
        }
    }

    /// Get the full data of the part as [`Bytes`].
    pub async fn bytes(self) -> crate::Result<Bytes> {
        let mut body = self.body();
        let mut buf = BytesMut::new();

        while let Some(bytes) = body.chunk().await? {
            buf.extend_from_slice(&bytes);
        }

        Ok(buf.freeze())
    }

    /// Get the full part data as text.
    ///
    /// The charset comes from the part's `Content-Type`, `utf-8` otherwise.
    pub async fn text(self) -> crate::Result<String> {
        self.text_with_charset("utf-8").await
    }

    /// Get the full part data as text given a specific charset.
    ///
    /// The `Content-Type` charset still wins when present. Invalid sequences
    /// are replaced with the replacement character.
    pub async fn text_with_charset(self, default_encoding: &str) -> crate::Result<String> {
        let encoding_name = self
            .content_type()
            .and_then(|mime| mime.get_param(mime::CHARSET))
            .map(|charset| charset.as_str())
            .unwrap_or(default_encoding);

        let encoding = Encoding::for_label(encoding_name.as_bytes()).unwrap_or(UTF_8);

        let bytes = self.bytes().await?;
        let (text, _, _) = encoding.decode(&bytes);

        Ok(text.into_owned())
    }

    /// Try to deserialize the part data as JSON.
    #[cfg(feature = "json")]
    #[cfg_attr(nightly, doc(cfg(feature = "json")))]
    pub async fn json<T: DeserializeOwned>(self) -> crate::Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(crate::Error::DecodeJson)
    }
}

impl std::fmt::Debug for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Part")
            .field("index", &self.shared.idx)
            .field("name", &self.meta.name)
            .field("file_name", &self.meta.file_name)
            .field("headers", &self.headers)
            .finish()
    }
}

impl Drop for Part {
    fn drop(&mut self) {
        let subscribed = self.shared.state.lock().subscribed;

        if !subscribed {
            self.shared.cancel();
        }
    }
}

enum Event {
    Subscribed(Arc<dyn Subscription>),
    Next(Bytes),
    Error(crate::Error),
    Complete,
}

/// Bridges subscriber callbacks into a [`PartBody`].
struct Forward {
    events: mpsc::UnboundedSender<Event>,
}

impl Subscriber<Bytes> for Forward {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        let _ = self.events.send(Event::Subscribed(subscription));
    }

    fn on_next(&mut self, item: Bytes) {
        let _ = self.events.send(Event::Next(item));
    }

    fn on_error(&mut self, err: crate::Error) {
        let _ = self.events.send(Event::Error(err));
    }

    fn on_complete(&mut self) {
        let _ = self.events.send(Event::Complete);
    }
}

/// The body of a [`Part`] as a [`Stream`] of [`Bytes`].
///
/// Every poll that finds nothing buffered requests exactly one more chunk of
/// at most 4096 bytes, so an idle consumer never has more than one chunk in
/// flight. Dropping the body before its end cancels the subscription.
pub struct PartBody {
    events: mpsc::UnboundedReceiver<Event>,
    subscription: Option<Arc<dyn Subscription>>,
    requested: bool,
    done: bool,
}

impl std::fmt::Debug for PartBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartBody").field("done", &self.done).finish()
    }
}

impl PartBody {
    /// Stream a chunk of the part data.
    ///
    /// When the part data has been exhausted, this will return [`None`].
    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        self.try_next().await
    }
}

impl Stream for PartBody {
    type Item = crate::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            if !this.requested {
                if let Some(subscription) = &this.subscription {
                    if let Err(err) = subscription.request(1) {
                        this.done = true;
                        return Poll::Ready(Some(Err(err)));
                    }
                    this.requested = true;
                }
            }

            match this.events.poll_recv(cx) {
                Poll::Ready(Some(Event::Subscribed(subscription))) => {
                    this.subscription = Some(subscription);
                }
                Poll::Ready(Some(Event::Next(chunk))) => {
                    this.requested = false;
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Poll::Ready(Some(Event::Error(err))) => {
                    this.done = true;
                    this.subscription = None;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(Some(Event::Complete)) => {
                    this.done = true;
                    this.subscription = None;
                    return Poll::Ready(None);
                }
                Poll::Ready(None) => {
                    this.done = true;
                    this.subscription = None;
                    return Poll::Ready(Some(Err(crate::Error::IncompleteStream)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for PartBody {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
            return;
        }

        while let Ok(event) = self.events.try_recv() {
            if let Event::Subscribed(subscription) = event {
                subscription.cancel();
            }
        }
    }
}
