use crate::completion::Completion;
use crate::constants;
use crate::constraints::Constraints;
use crate::part::{Part, Writer};
use crate::state::ParserState;
use crate::tokenizer::Tokenizer;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::runtime::Handle;

type ReadyCallback = Box<dyn FnMut(Part) + Send>;

/// Turns the body byte stream of a multipart message into [`Part`]s.
///
/// The assembler is push-based: the transport feeds it chunks of any size
/// through [`on_data`](Assembler::on_data) and signals the end of input with
/// [`on_complete`](Assembler::on_complete). Every part is handed to the
/// `ready` callback as soon as its header block has been read, while its body
/// is still arriving. The `completion` callback fires once the input ended
/// and every part created from it has completed.
///
/// Part bodies are delivered on tokio tasks, so an assembler can only be
/// built inside a runtime, or with one supplied through
/// [`Constraints::runtime`].
///
/// # Examples
///
/// ```
/// use partflow::Assembler;
/// use std::sync::{Arc, Mutex};
///
/// # async fn run() {
/// let parts = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&parts);
///
/// let mut assembler = Assembler::new("X-BOUNDARY", move |part| sink.lock().unwrap().push(part), || {}).unwrap();
/// assembler.on_data("--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nabcd").unwrap();
/// assembler.on_data("\r\n--X-BOUNDARY--\r\n").unwrap();
/// assembler.on_complete().unwrap();
///
/// let part = parts.lock().unwrap().pop().unwrap();
/// assert_eq!(part.name(), Some("a"));
/// assert_eq!(part.text().await.unwrap(), "abcd");
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct Assembler {
    tokenizer: Tokenizer,
    state: ParserState,
    pending: BytesMut,
    emitted: Vec<(Bytes, bool)>,
    current: Option<Writer>,
    ready: ReadyCallback,
    completion: Arc<Completion>,
    constraints: Constraints,
    runtime: Handle,
    next_idx: usize,
    received: u64,
    closed: bool,
}

impl Assembler {
    /// Creates an assembler for `boundary` with default constraints.
    pub fn new<B, R, C>(boundary: B, ready: R, completion: C) -> crate::Result<Assembler>
    where
        B: AsRef<str>,
        R: FnMut(Part) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        Assembler::with_constraints(boundary, ready, completion, Constraints::default())
    }

    /// Creates an assembler for `boundary` with the given [`Constraints`].
    pub fn with_constraints<B, R, C>(
        boundary: B,
        ready: R,
        completion: C,
        constraints: Constraints,
    ) -> crate::Result<Assembler>
    where
        B: AsRef<str>,
        R: FnMut(Part) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let runtime = constraints.runtime_handle()?;
        let delimiter = format!("{}{}{}", constants::CRLF, constants::BOUNDARY_EXT, boundary.as_ref());
        let mut tokenizer = Tokenizer::new(delimiter, constraints.body_capacity)?;

        // A boundary on the very first line has no CRLF in front of it.
        tokenizer.push(constants::CRLF.as_bytes(), &mut |_: Bytes, _: bool| {});

        Ok(Assembler {
            tokenizer,
            state: ParserState::default(),
            pending: BytesMut::new(),
            emitted: Vec::new(),
            current: None,
            ready: Box::new(ready),
            completion: Arc::new(Completion::new(Box::new(completion))),
            constraints,
            runtime,
            next_idx: 0,
            received: 0,
            closed: false,
        })
    }

    /// Feeds the next chunk of the body.
    ///
    /// A failure closes the assembler and aborts the open part with
    /// [`Error::IncompletePartData`](crate::Error::IncompletePartData).
    pub fn on_data<D: Into<Bytes>>(&mut self, chunk: D) -> crate::Result<()> {
        self.ensure_open()?;

        let chunk = chunk.into();
        self.received += chunk.len() as u64;

        let limit = self.constraints.size_limit.whole_stream;
        if self.received > limit {
            self.abort();
            return Err(crate::Error::StreamSizeExceeded { limit });
        }

        let mut emitted = std::mem::take(&mut self.emitted);
        self.tokenizer.push(&chunk, &mut |chunk: Bytes, end: bool| emitted.push((chunk, end)));

        let result = emitted
            .drain(..)
            .try_for_each(|(chunk, end)| self.route(chunk, end));
        self.emitted = emitted;

        if result.is_err() {
            self.abort();
        }
        result
    }

    /// Signals the end of the body.
    ///
    /// A part still open at this point, because the closing boundary never
    /// arrived, is flushed as it is.
    pub fn on_complete(&mut self) -> crate::Result<()> {
        self.ensure_open()?;
        self.closed = true;

        let mut emitted = Vec::new();
        self.tokenizer.close(&mut |chunk: Bytes, end: bool| emitted.push((chunk, end)));

        for (chunk, end) in emitted {
            self.route(chunk, end)?;
        }

        if !self.pending.is_empty() {
            let rest = self.pending.split().freeze();
            self.dispatch(rest, false)?;
        }

        if let Some(mut writer) = self.current.take() {
            warn!("multipart body ended inside part {}", self.next_idx - 1);
            writer.flush()?;
        }

        debug!("multipart body complete after {} bytes, {} parts", self.received, self.next_idx);
        self.completion.upstream_completed();
        Ok(())
    }

    /// Signals an upstream failure. The open part, if any, receives `err`;
    /// no further parts are created.
    pub fn on_error(&mut self, err: crate::Error) -> crate::Result<()> {
        self.ensure_open()?;
        self.closed = true;

        match self.current.take() {
            Some(mut writer) => writer.fail(err),
            None => {
                debug!("upstream failed outside a part: {}", err);
            }
        }

        Ok(())
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.closed {
            Err(crate::Error::StreamClosed)
        } else {
            Ok(())
        }
    }

    fn abort(&mut self) {
        self.closed = true;
        // An unflushed writer fails its part on drop.
        self.current = None;
    }

    /// Holds back the first bytes after a delimiter until the `--` closing
    /// marker can be told apart from a part.
    fn route(&mut self, chunk: Bytes, end: bool) -> crate::Result<()> {
        let deciding = self.state.ended() && !self.state.is_epilogue();

        if deciding && !end && self.pending.len() + chunk.len() < constants::BOUNDARY_EXT.len() {
            self.pending.extend_from_slice(&chunk);
            return Ok(());
        }

        let chunk = if self.pending.is_empty() {
            chunk
        } else {
            self.pending.extend_from_slice(&chunk);
            self.pending.split().freeze()
        };

        self.dispatch(chunk, end)
    }

    fn dispatch(&mut self, chunk: Bytes, end: bool) -> crate::Result<()> {
        self.state = self.state.patch(&chunk, end);

        if self.state.should_ignore() {
            if !chunk.is_empty() {
                trace!("dropping {} bytes outside of parts", chunk.len());
            }
            return Ok(());
        }

        if self.state.started() {
            let idx = self.next_idx;
            self.next_idx += 1;

            trace!("opening part {}", idx);
            self.current = Some(Writer::new(
                idx,
                Arc::clone(&self.completion),
                &self.constraints,
                self.runtime.clone(),
            )?);
        }

        if let Some(writer) = self.current.as_mut() {
            if let Some(part) = writer.push(chunk)? {
                (self.ready)(part);
            }

            if self.state.ended() {
                if let Some(mut writer) = self.current.take() {
                    writer.flush()?;
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler")
            .field("state", &self.state)
            .field("received", &self.received)
            .field("parts", &self.next_idx)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SizeLimit;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const BODY: &str = "preamble to drop\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"first\"\r\n\r\nalpha\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"second\"; filename=\"b.txt\"\r\nContent-Type: text/plain\r\n\r\nbeta\r\nwith lines\r\n--X-BOUNDARY--\r\nepilogue to drop\r\n--X-BOUNDARY\r\n\r\nnot a part";

    struct Harness {
        assembler: Assembler,
        parts: Arc<Mutex<Vec<Part>>>,
        completed: Arc<AtomicBool>,
    }

    fn harness(constraints: Constraints) -> Harness {
        let parts = Arc::new(Mutex::new(Vec::new()));
        let completed = Arc::new(AtomicBool::new(false));
        let sink = Arc::clone(&parts);
        let flag = Arc::clone(&completed);

        let assembler = Assembler::with_constraints(
            "X-BOUNDARY",
            move |part| sink.lock().unwrap().push(part),
            move || flag.store(true, Ordering::SeqCst),
            constraints,
        )
        .unwrap();

        Harness {
            assembler,
            parts,
            completed,
        }
    }

    fn take_parts(harness: &Harness) -> Vec<Part> {
        std::mem::take(&mut *harness.parts.lock().unwrap())
    }

    async fn wait_for(flag: &AtomicBool) -> bool {
        for _ in 0..50 {
            if flag.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    async fn collect(parts: Vec<Part>) -> Vec<(Option<String>, String)> {
        let mut out = Vec::new();
        for part in parts {
            let name = part.name().map(str::to_owned);
            out.push((name, part.text().await.unwrap()));
        }
        out
    }

    #[test]
    fn test_requires_runtime() {
        let result = Assembler::new("X-BOUNDARY", |_| {}, || {});
        assert_eq!(result.unwrap_err(), crate::Error::NoRuntime);
    }

    #[tokio::test]
    async fn test_whole_body_at_once() {
        let mut harness = harness(Constraints::new());
        harness.assembler.on_data(BODY).unwrap();
        harness.assembler.on_complete().unwrap();

        let parts = take_parts(&harness);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].file_name(), Some("b.txt"));
        assert_eq!(parts[1].index(), 1);

        assert_eq!(
            collect(parts).await,
            vec![
                (Some("first".to_owned()), "alpha".to_owned()),
                (Some("second".to_owned()), "beta\r\nwith lines".to_owned()),
            ]
        );
        assert!(wait_for(&harness.completed).await);
    }

    #[tokio::test]
    async fn test_one_byte_per_chunk() {
        let mut harness = harness(Constraints::new());
        for byte in BODY.as_bytes() {
            harness.assembler.on_data(vec![*byte]).unwrap();
        }
        harness.assembler.on_complete().unwrap();

        let parts = take_parts(&harness);
        assert_eq!(
            collect(parts).await,
            vec![
                (Some("first".to_owned()), "alpha".to_owned()),
                (Some("second".to_owned()), "beta\r\nwith lines".to_owned()),
            ]
        );
        assert!(wait_for(&harness.completed).await);
    }

    #[tokio::test]
    async fn test_completion_waits_for_parts() {
        let mut harness = harness(Constraints::new());
        harness.assembler.on_data(BODY).unwrap();
        harness.assembler.on_complete().unwrap();

        let mut parts = take_parts(&harness);
        let second = parts.pop().unwrap();
        let first = parts.pop().unwrap();

        assert_eq!(first.bytes().await.unwrap(), "alpha");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!harness.completed.load(Ordering::SeqCst));

        assert_eq!(second.bytes().await.unwrap(), "beta\r\nwith lines");
        assert!(wait_for(&harness.completed).await);
    }

    #[tokio::test]
    async fn test_boundary_on_first_line() {
        let mut harness = harness(Constraints::new());
        harness.assembler.on_data("--X-BOUNDARY\r\n\r\nx\r\n--X-BOUNDARY--").unwrap();
        harness.assembler.on_complete().unwrap();

        let parts = take_parts(&harness);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].headers().is_empty());
        assert_eq!(collect(parts).await, vec![(None, "x".to_owned())]);
    }

    #[tokio::test]
    async fn test_empty_multipart() {
        let mut harness = harness(Constraints::new());
        harness.assembler.on_data("--X-BOUNDARY--\r\n").unwrap();
        harness.assembler.on_complete().unwrap();

        assert!(take_parts(&harness).is_empty());
        assert!(harness.completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_truncated_body_flushes_open_part() {
        let mut harness = harness(Constraints::new());
        harness.assembler.on_data("--X-BOUNDARY\r\n\r\ncut sho").unwrap();
        harness.assembler.on_complete().unwrap();

        let parts = take_parts(&harness);
        assert_eq!(collect(parts).await, vec![(None, "cut sho".to_owned())]);
    }

    #[tokio::test]
    async fn test_calls_after_close() {
        let mut harness = harness(Constraints::new());
        harness.assembler.on_data("--X-BOUNDARY--").unwrap();
        harness.assembler.on_complete().unwrap();

        assert_eq!(harness.assembler.on_data("more"), Err(crate::Error::StreamClosed));
        assert_eq!(harness.assembler.on_complete(), Err(crate::Error::StreamClosed));
        assert_eq!(
            harness.assembler.on_error(crate::Error::IncompleteStream),
            Err(crate::Error::StreamClosed)
        );
    }

    #[tokio::test]
    async fn test_upstream_error_reaches_open_part() {
        let mut harness = harness(Constraints::new());
        harness.assembler.on_data("--X-BOUNDARY\r\n\r\nhalf of the body").unwrap();
        harness
            .assembler
            .on_error(crate::Error::StreamReadFailed("reset".into()))
            .unwrap();

        let part = take_parts(&harness).pop().unwrap();
        assert_eq!(
            part.bytes().await.unwrap_err(),
            crate::Error::StreamReadFailed("reset".into())
        );
        assert!(!harness.completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_whole_stream_limit_aborts_part() {
        let constraints = Constraints::new().size_limit(SizeLimit::new().whole_stream(40));
        let mut harness = harness(constraints);

        harness.assembler.on_data("--X-BOUNDARY\r\n\r\nbody bytes here!!").unwrap();
        assert_eq!(
            harness.assembler.on_data("0123456789"),
            Err(crate::Error::StreamSizeExceeded { limit: 40 })
        );

        let part = take_parts(&harness).pop().unwrap();
        assert_eq!(
            part.bytes().await.unwrap_err(),
            crate::Error::IncompletePartData { part_name: None }
        );
        assert_eq!(harness.assembler.on_data("x"), Err(crate::Error::StreamClosed));
    }

    #[tokio::test]
    async fn test_missing_header_terminator() {
        let mut harness = harness(Constraints::new());
        harness.assembler.on_data("--X-BOUNDARY\r\nContent-Type: text/plain").unwrap();
        assert_eq!(harness.assembler.on_complete(), Err(crate::Error::IncompleteHeaders));
        assert!(take_parts(&harness).is_empty());
    }
}
