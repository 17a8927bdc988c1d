use crate::constants;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use httparse::Header;
use std::convert::TryFrom;

pub(crate) fn convert_raw_headers_to_header_map(raw_headers: &[Header]) -> crate::Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(raw_headers.len());

    for raw_header in raw_headers {
        let name = HeaderName::try_from(raw_header.name).map_err(|err| crate::Error::DecodeHeaderName {
            name: raw_header.name.to_owned(),
            cause: err.into(),
        })?;

        let value = HeaderValue::try_from(raw_header.value).map_err(|err| crate::Error::DecodeHeaderValue {
            value: raw_header.value.to_owned(),
            cause: err.into(),
        })?;

        headers.append(name, value);
    }

    Ok(headers)
}

/// Strips the rest of the boundary line from a part's raw header block.
///
/// Whatever follows the boundary token up to the first line break is
/// transport padding.
pub(crate) fn strip_boundary_line(raw: &Bytes) -> Bytes {
    match memchr::memchr(b'\n', raw) {
        Some(idx) => raw.slice(idx + 1..),
        None => Bytes::new(),
    }
}

/// Parses the header lines of a part, as collected before the blank line.
pub(crate) fn parse_part_headers(lines: &[u8]) -> crate::Result<HeaderMap> {
    if lines.is_empty() {
        return Ok(HeaderMap::new());
    }

    let mut block = BytesMut::with_capacity(lines.len() + constants::CRLF_CRLF.len());
    block.extend_from_slice(lines);
    block.extend_from_slice(constants::CRLF_CRLF.as_bytes());

    let mut headers = [httparse::EMPTY_HEADER; constants::MAX_HEADERS];

    match httparse::parse_headers(&block, &mut headers) {
        Ok(httparse::Status::Complete((_, raw_headers))) => convert_raw_headers_to_header_map(raw_headers),
        Ok(httparse::Status::Partial) => Err(crate::Error::IncompleteHeaders),
        Err(err) => Err(crate::Error::ReadHeaderFailed(err)),
    }
}
