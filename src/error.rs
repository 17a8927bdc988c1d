use std::fmt::{self, Debug, Display, Formatter};

use derive_more::Display;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A set of errors that can occur while splitting or parsing a multipart
/// stream and while consuming its parts.
#[derive(Display)]
#[non_exhaustive]
pub enum Error {
    /// The `Content-Type` header is not a `multipart/*` type.
    #[display(fmt = "Content-Type is not multipart")]
    NoMultipart,

    /// Failed to convert the `Content-Type` to [`mime::Mime`] type.
    #[display(fmt = "failed to convert Content-Type to `mime::Mime` type: {}", _0)]
    DecodeContentType(mime::FromStrError),

    /// No boundary found in `Content-Type` header.
    #[display(fmt = "multipart boundary not found in Content-Type")]
    NoBoundary,

    /// The request headers carry no `Content-Type`.
    #[display(fmt = "Content-Type header not found")]
    NoContentType,

    /// A tokenizer or splitter was configured with an empty delimiter.
    #[display(fmt = "delimiter must not be empty")]
    EmptyDelimiter,

    /// A part's header block ended without the terminating blank line.
    #[display(fmt = "failed to read part complete headers")]
    IncompleteHeaders,

    /// Failed to read the part headers.
    #[display(fmt = "failed to read headers: {}", _0)]
    ReadHeaderFailed(httparse::Error),

    /// Failed to decode a part's raw header name to
    /// [`HeaderName`](http::header::HeaderName) type.
    #[display(fmt = "failed to decode part's raw header name: {:?} {}", name, cause)]
    DecodeHeaderName { name: String, cause: BoxError },

    /// Failed to decode a part's raw header value to
    /// [`HeaderValue`](http::header::HeaderValue) type.
    #[display(fmt = "failed to decode part's raw header value: {}", cause)]
    DecodeHeaderValue { value: Vec<u8>, cause: BoxError },

    /// A second consumer tried to subscribe to a part body.
    #[display(fmt = "downstream already connected")]
    AlreadySubscribed,

    /// A consumer requested zero units.
    #[display(fmt = "requested amount should be greater than zero")]
    InvalidDemand,

    /// Data or a terminal signal arrived after the input was already closed.
    #[display(fmt = "stream already closed")]
    StreamClosed,

    /// Stream read failed.
    #[display(fmt = "stream read failed: {}", _0)]
    StreamReadFailed(BoxError),

    /// Multipart stream is incomplete.
    #[display(fmt = "incomplete multipart stream")]
    IncompleteStream,

    /// The part was cut short because parsing of the stream failed.
    #[display(
        fmt = "part '{}' received with incomplete data",
        "part_name.as_deref().unwrap_or(\"<unknown>\")"
    )]
    IncompletePartData { part_name: Option<String> },

    /// The incoming part size exceeded the maximum limit.
    #[display(
        fmt = "part '{}' exceeded the maximum size limit: {} bytes",
        "part_name.as_deref().unwrap_or(\"<unknown>\")",
        limit
    )]
    PartSizeExceeded { limit: u64, part_name: Option<String> },

    /// The incoming stream size exceeded the maximum limit.
    #[display(fmt = "stream size exceeded the maximum limit: {} bytes", limit)]
    StreamSizeExceeded { limit: u64 },

    /// Part actors could not be started because no tokio runtime is available.
    #[display(fmt = "no tokio runtime available to run part actors")]
    NoRuntime,

    /// Failed to decode the part data as `JSON` in
    /// [`part.json()`](crate::Part::json) method.
    #[cfg(feature = "json")]
    #[cfg_attr(nightly, doc(cfg(feature = "json")))]
    #[display(fmt = "failed to decode part data as JSON: {}", _0)]
    DecodeJson(serde_json::Error),
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::DecodeContentType(err) => Some(err),
            Error::ReadHeaderFailed(err) => Some(err),
            Error::DecodeHeaderName { cause, .. } | Error::DecodeHeaderValue { cause, .. } => {
                Some(cause.as_ref())
            }
            Error::StreamReadFailed(err) => Some(err.as_ref()),
            #[cfg(feature = "json")]
            Error::DecodeJson(err) => Some(err),
            _ => None,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string().eq(&other.to_string())
    }
}

impl Eq for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::PartSizeExceeded {
            limit: 10,
            part_name: Some("avatar".to_owned()),
        };
        assert_eq!(err.to_string(), "part 'avatar' exceeded the maximum size limit: 10 bytes");

        let err = Error::IncompletePartData { part_name: None };
        assert_eq!(err.to_string(), "part '<unknown>' received with incomplete data");
    }

    #[test]
    fn test_source() {
        use std::error::Error as _;

        let err = Error::StreamReadFailed("connection reset".into());
        assert_eq!(err.source().map(|e| e.to_string()), Some("connection reset".to_owned()));
        assert!(Error::AlreadySubscribed.source().is_none());
    }
}
