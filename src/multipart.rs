use crate::assembler::Assembler;
use crate::constraints::Constraints;
use crate::part::Part;
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
#[cfg(feature = "tokio-io")]
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
#[cfg(feature = "tokio-io")]
use tokio_util::io::ReaderStream;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Represents a multipart body being parsed in the background.
///
/// The source stream is read on a spawned task that feeds an
/// [`Assembler`]. Every [`Part`] is yielded as soon as its headers are known,
/// through the [`Stream`] implementation or
/// [`next_part`](Multipart::next_part). Unlike a strictly sequential reader,
/// parts may be held and consumed concurrently, in any order.
///
/// The source is read to its end even if this handle is dropped; parts
/// nobody holds are discarded as they arrive.
///
/// # Examples
///
/// ```
/// use partflow::Multipart;
/// use bytes::Bytes;
/// use std::convert::Infallible;
/// use futures_util::stream::once;
///
/// # async fn run() {
/// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
/// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
/// let mut multipart = Multipart::new(stream, "X-BOUNDARY");
///
/// while let Some(part) = multipart.next_part().await.unwrap() {
///     println!("Part: {:?}", part.text().await)
/// }
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct Multipart {
    parts: mpsc::UnboundedReceiver<crate::Result<Part>>,
    completion: oneshot::Receiver<()>,
}

impl Multipart {
    /// Construct a new `Multipart` instance with the given [`Bytes`] stream
    /// and the boundary.
    ///
    /// Must be called within a tokio runtime; otherwise the first yielded
    /// item is [`Error::NoRuntime`](crate::Error::NoRuntime).
    pub fn new<S, O, E, B>(stream: S, boundary: B) -> Multipart
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
        B: Into<String>,
    {
        Multipart::with_constraints(stream, boundary, Constraints::default())
    }

    /// Construct a new `Multipart` instance with the given [`Bytes`] stream,
    /// the boundary and [`Constraints`].
    pub fn with_constraints<S, O, E, B>(stream: S, boundary: B, constraints: Constraints) -> Multipart
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
        B: Into<String>,
    {
        let (parts_tx, parts_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = oneshot::channel();

        let multipart = Multipart {
            parts: parts_rx,
            completion: completion_rx,
        };

        let runtime = match constraints.runtime_handle() {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = parts_tx.send(Err(err));
                return multipart;
            }
        };

        let ready_tx = parts_tx.clone();
        let assembler = Assembler::with_constraints(
            boundary.into(),
            move |part| {
                // A closed receiver drops the part, which discards its body.
                let _ = ready_tx.send(Ok(part));
            },
            move || {
                let _ = completion_tx.send(());
            },
            constraints,
        );

        match assembler {
            Ok(assembler) => {
                let stream = stream.map_ok(|b| b.into()).map_err(|err| err.into());

                runtime.spawn(pump(stream, assembler, parts_tx));
            }
            Err(err) => {
                let _ = parts_tx.send(Err(err));
            }
        }

        multipart
    }

    /// Construct a new `Multipart` instance with the given [`AsyncRead`]
    /// reader and the boundary.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    ///
    /// # Examples
    ///
    /// ```
    /// use partflow::Multipart;
    ///
    /// # async fn run() {
    /// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
    /// let reader = data.as_bytes();
    /// let mut multipart = Multipart::with_reader(reader, "X-BOUNDARY");
    ///
    /// while let Some(part) = multipart.next_part().await.unwrap() {
    ///     let mut body = part.body();
    ///     while let Some(chunk) = body.chunk().await.unwrap() {
    ///         println!("Chunk: {:?}", chunk);
    ///     }
    /// }
    /// # }
    /// # tokio::runtime::Runtime::new().unwrap().block_on(run());
    /// ```
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub fn with_reader<R, B>(reader: R, boundary: B) -> Multipart
    where
        R: AsyncRead + Unpin + Send + 'static,
        B: Into<String>,
    {
        let stream = ReaderStream::new(reader);
        Multipart::new(stream, boundary)
    }

    /// Construct a new `Multipart` instance with the given [`AsyncRead`]
    /// reader, the boundary and [`Constraints`].
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub fn with_reader_with_constraints<R, B>(reader: R, boundary: B, constraints: Constraints) -> Multipart
    where
        R: AsyncRead + Unpin + Send + 'static,
        B: Into<String>,
    {
        let stream = ReaderStream::new(reader);
        Multipart::with_constraints(stream, boundary, constraints)
    }

    /// Yields the next [`Part`] if available.
    ///
    /// For more info, go to [`Part`](crate::Part#warning-about-leaks).
    pub async fn next_part(&mut self) -> crate::Result<Option<Part>> {
        self.try_next().await
    }

    /// Yields the next [`Part`] with its positioning index as a tuple
    /// `(usize, Part)`.
    pub async fn next_part_with_idx(&mut self) -> crate::Result<Option<(usize, Part)>> {
        self.try_next().await.map(|p| p.map(|part| (part.index(), part)))
    }

    /// Waits until the source stream ended and every part created from it
    /// has completed or been discarded.
    ///
    /// Parts not yet taken from this handle are discarded. Fails with
    /// [`Error::IncompleteStream`](crate::Error::IncompleteStream) when
    /// parsing stopped on an error instead.
    pub async fn completed(self) -> crate::Result<()> {
        let Multipart { parts, completion } = self;
        drop(parts);

        completion.await.map_err(|_| crate::Error::IncompleteStream)
    }
}

impl Stream for Multipart {
    type Item = crate::Result<Part>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().parts.poll_recv(cx)
    }
}

impl std::fmt::Debug for Multipart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multipart").finish_non_exhaustive()
    }
}

async fn pump<S>(stream: S, mut assembler: Assembler, parts: mpsc::UnboundedSender<crate::Result<Part>>)
where
    S: Stream<Item = Result<Bytes, BoxError>> + Send,
{
    futures_util::pin_mut!(stream);

    while let Some(item) = stream.next().await {
        let result = match item {
            Ok(chunk) => assembler.on_data(chunk),
            Err(cause) => {
                // The open part and the part stream both see the same cause.
                let cause: Arc<dyn std::error::Error + Send + Sync> = Arc::from(cause);
                let _ = assembler.on_error(crate::Error::StreamReadFailed(Box::new(Arc::clone(&cause))));
                Err(crate::Error::StreamReadFailed(Box::new(cause)))
            }
        };

        if let Err(err) = result {
            debug!("multipart parsing stopped: {}", err);
            let _ = parts.send(Err(err));
            return;
        }
    }

    if let Err(err) = assembler.on_complete() {
        let _ = parts.send(Err(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::convert::Infallible;

    fn chunks(data: &'static str) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        stream::iter(data.chars().map(|ch| ch.to_string()).map(|part| Ok(Bytes::from(part))))
    }

    #[test]
    fn test_without_runtime() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let mut multipart = Multipart::new(chunks("--X--"), "X");

        let first = rt.block_on(multipart.next_part());
        assert_eq!(first.unwrap_err(), crate::Error::NoRuntime);
    }

    #[tokio::test]
    async fn test_next_part_with_idx() {
        let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\n2\r\n--X-BOUNDARY--\r\n";
        let mut multipart = Multipart::new(chunks(data), "X-BOUNDARY");

        let mut seen = Vec::new();
        while let Some((idx, part)) = multipart.next_part_with_idx().await.unwrap() {
            let name = part.name().unwrap().to_owned();
            seen.push((idx, name, part.text().await.unwrap()));
        }

        assert_eq!(
            seen,
            vec![
                (0, "a".to_owned(), "1".to_owned()),
                (1, "b".to_owned(), "2".to_owned())
            ]
        );
        multipart.completed().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_error_is_reported() {
        let data = stream::iter(vec![
            Ok(Bytes::from("--X\r\n\r\nsome body bytes")),
            Err("connection reset"),
        ]);
        let mut multipart = Multipart::new(data, "X");

        let part = multipart.next_part().await.unwrap().unwrap();
        assert_eq!(
            multipart.next_part().await.unwrap_err(),
            crate::Error::StreamReadFailed("connection reset".into())
        );
        assert_eq!(
            part.bytes().await.unwrap_err(),
            crate::Error::StreamReadFailed("connection reset".into())
        );
        assert_eq!(multipart.completed().await, Err(crate::Error::IncompleteStream));
    }

    #[derive(Debug)]
    struct Reset(std::io::Error);

    impl std::fmt::Display for Reset {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("peer went away")
        }
    }

    impl std::error::Error for Reset {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[tokio::test]
    async fn test_part_error_keeps_source_chain() {
        use std::error::Error as _;

        let data = stream::iter(vec![
            Ok(Bytes::from("--X\r\n\r\nsome body bytes")),
            Err(Reset(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer"))),
        ]);
        let mut multipart = Multipart::new(data, "X");

        let part = multipart.next_part().await.unwrap().unwrap();
        let err = part.bytes().await.unwrap_err();

        let cause = err.source().unwrap();
        assert_eq!(cause.to_string(), "peer went away");
        assert_eq!(cause.source().map(|e| e.to_string()), Some("reset by peer".to_owned()));
    }

    #[tokio::test]
    async fn test_completed_discards_untaken_parts() {
        let data = "--X\r\n\r\nfirst\r\n--X\r\n\r\nsecond\r\n--X--";
        let multipart = Multipart::new(chunks(data), "X");

        multipart.completed().await.unwrap();
    }
}
