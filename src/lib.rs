//! An async parser for streaming `multipart/*` bodies with per-part
//! backpressure, built on tokio.
//!
//! The body arrives as an unbounded, arbitrarily fragmented byte stream.
//! Parts are handed out as soon as their headers are known, and each part's
//! body is delivered to its own consumer at that consumer's pace, without
//! buffering the whole request.
//!
//! Three entry points cover different needs:
//!
//! * [`Multipart`] drives a [`Stream`](futures_util::stream::Stream) of
//!   bytes and yields [`Part`]s.
//! * [`Assembler`] is the push-based core for transports that hand out
//!   chunks through callbacks.
//! * [`Split`] cuts any byte stream into a stream of [`Segment`]s at a
//!   delimiter.
//!
//! Part bodies can be consumed through [`Part::body`], the convenience
//! methods like [`Part::text`], or any [`flow::Subscriber`] that requests
//! exactly as many chunks as it can handle.
//!
//! # Examples
//!
//! ```
//! use bytes::Bytes;
//! use futures_util::stream::Stream;
//! use partflow::Multipart;
//! use std::convert::Infallible;
//! use futures_util::stream::once;
//!
//! # async fn run() {
//! // Generate a byte stream and the boundary from somewhere e.g. server request body.
//! let (stream, boundary) = get_byte_stream_from_somewhere().await;
//!
//! // Create a `Multipart` instance from that byte stream and the boundary.
//! let mut multipart = Multipart::new(stream, boundary);
//!
//! // Iterate over the parts, use `next_part()` to get the next part.
//! while let Some(part) = multipart.next_part().await.unwrap() {
//!     // Get part name.
//!     let name = part.name().map(str::to_owned);
//!     // Get the part's filename if provided in "Content-Disposition" header.
//!     let file_name = part.file_name().map(str::to_owned);
//!
//!     println!("Name: {:?}, File Name: {:?}", name, file_name);
//!
//!     // Process the part data chunks e.g. store them in a file.
//!     let mut body = part.body();
//!     while let Some(chunk) = body.chunk().await.unwrap() {
//!         // Do something with part chunk.
//!         println!("Chunk: {:?}", chunk);
//!     }
//! }
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run());
//!
//! // Generate a byte stream and the boundary from somewhere e.g. server request body.
//! async fn get_byte_stream_from_somewhere() -> (impl Stream<Item = Result<Bytes, Infallible>>, &'static str) {
//!     let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
//!     let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
//!
//!     (stream, "X-BOUNDARY")
//! }
//! ```
//!
//! # Optional features
//!
//! * `json`: adds [`Part::json`].
//! * `tokio-io`: adds [`Multipart::with_reader`] for any tokio `AsyncRead`.
//! * `log`: emits parser events through the `log` crate.

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms, trivial_casts, unused_qualifications)]
#![cfg_attr(nightly, feature(doc_cfg))]

#[macro_use]
mod macros;

pub use bytes;
pub use assembler::Assembler;
pub use constraints::Constraints;
pub use error::Error;
pub use multipart::Multipart;
pub use part::{Part, PartBody};
pub use size_limit::SizeLimit;
pub use split::{Segment, Split};
pub use tokenizer::{Receiver, Tokenizer};

mod assembler;
mod buffer;
mod completion;
mod constants;
mod constraints;
mod content_disposition;
mod error;
pub mod flow;
mod helpers;
mod multipart;
mod part;
mod ring;
mod size_limit;
mod split;
mod state;
mod tokenizer;

/// A Result type often returned from methods that can have `partflow` errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parses the `Content-Type` header to extract the boundary value.
///
/// Any `multipart/*` subtype is accepted.
///
/// # Examples
///
/// ```
/// # fn run(){
/// let content_type = "multipart/form-data; boundary=ABCDEFG";
///
/// assert_eq!(partflow::parse_boundary(content_type), Ok("ABCDEFG".to_owned()));
/// # }
/// # run();
/// ```
pub fn parse_boundary<T: AsRef<str>>(content_type: T) -> Result<String> {
    let m = content_type
        .as_ref()
        .parse::<mime::Mime>()
        .map_err(Error::DecodeContentType)?;

    if m.type_() != mime::MULTIPART {
        return Err(Error::NoMultipart);
    }

    m.get_param(mime::BOUNDARY)
        .map(|name| name.as_str().to_owned())
        .ok_or(Error::NoBoundary)
}

/// Finds the `Content-Type` among request headers, compared
/// case-insensitively, and extracts its boundary.
///
/// # Examples
///
/// ```
/// let headers = [("Host", "example.com"), ("content-type", "multipart/mixed; boundary=b1")];
///
/// assert_eq!(partflow::boundary_from_headers(headers), Ok("b1".to_owned()));
/// ```
pub fn boundary_from_headers<I, K, V>(headers: I) -> Result<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let content_type = headers
        .into_iter()
        .find(|(name, _)| name.as_ref().eq_ignore_ascii_case(http::header::CONTENT_TYPE.as_str()))
        .map(|(_, value)| value)
        .ok_or(Error::NoContentType)?;

    parse_boundary(content_type)
}
