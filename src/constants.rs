use lazy_static::lazy_static;
use regex::bytes::Regex;

pub(crate) const DEFAULT_WHOLE_STREAM_SIZE_LIMIT: u64 = u64::MAX;
pub(crate) const DEFAULT_PER_PART_SIZE_LIMIT: u64 = u64::MAX;

/// Initial allocation for a part's header accumulator.
pub(crate) const DEFAULT_HEADER_CAPACITY: usize = 256;
/// Initial allocation for tokenizer accumulators.
pub(crate) const DEFAULT_BODY_CAPACITY: usize = 1024;

/// Largest chunk handed to a part subscriber per unit of demand.
pub(crate) const DELIVERY_SLICE: usize = 4096;

pub(crate) const MAX_HEADERS: usize = 32;
pub(crate) const BOUNDARY_EXT: &str = "--";
pub(crate) const CRLF: &str = "\r\n";
pub(crate) const CRLF_CRLF: &str = "\r\n\r\n";

lazy_static! {
    pub(crate) static ref CONTENT_DISPOSITION_PART_NAME_RE: Regex =
        Regex::new(r#"(?-u)(?:^|[;\s])name="([^"]+)""#).unwrap();
    pub(crate) static ref CONTENT_DISPOSITION_FILE_NAME_RE: Regex =
        Regex::new(r#"(?-u)(?:^|[;\s])filename="([^"]+)""#).unwrap();
}
