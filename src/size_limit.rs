use crate::constants;
use std::collections::HashMap;

/// Byte budgets applied while a multipart body is assembled.
///
/// The whole-stream budget counts every byte pushed into the
/// [`Assembler`](crate::Assembler), preamble and delimiters included. Part
/// budgets count body bytes only, and a named budget replaces the default one
/// for parts whose `Content-Disposition` carries that name. Passed in through
/// [`Constraints::size_limit`](crate::Constraints::size_limit).
#[derive(Debug, Clone)]
pub struct SizeLimit {
    pub(crate) whole_stream: u64,
    pub(crate) per_part: u64,
    pub(crate) part_map: HashMap<String, u64>,
}

impl SizeLimit {
    /// No budget at all: every limit starts at [`u64::MAX`].
    pub fn new() -> SizeLimit {
        SizeLimit::default()
    }

    /// Caps the total input; going over fails with
    /// [`Error::StreamSizeExceeded`](crate::Error::StreamSizeExceeded).
    pub fn whole_stream(mut self, limit: u64) -> SizeLimit {
        self.whole_stream = limit;
        self
    }

    /// Caps every part body without a named budget; going over fails with
    /// [`Error::PartSizeExceeded`](crate::Error::PartSizeExceeded).
    pub fn per_part(mut self, limit: u64) -> SizeLimit {
        self.per_part = limit;
        self
    }

    /// Gives parts named `part_name` their own budget in place of
    /// [`per_part`](SizeLimit::per_part).
    pub fn for_part<N: Into<String>>(mut self, part_name: N, limit: u64) -> SizeLimit {
        self.part_map.insert(part_name.into(), limit);
        self
    }

    pub(crate) fn extract_size_limit_for(&self, part_name: Option<&str>) -> u64 {
        match part_name.and_then(|name| self.part_map.get(name)) {
            Some(limit) => *limit,
            None => self.per_part,
        }
    }
}

impl Default for SizeLimit {
    fn default() -> Self {
        SizeLimit {
            whole_stream: constants::DEFAULT_WHOLE_STREAM_SIZE_LIMIT,
            per_part: constants::DEFAULT_PER_PART_SIZE_LIMIT,
            part_map: HashMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_size_limit_for() {
        let limit = SizeLimit::new().per_part(30).for_part("avatar", 10);
        assert_eq!(limit.extract_size_limit_for(Some("avatar")), 10);
        assert_eq!(limit.extract_size_limit_for(Some("bio")), 30);
        assert_eq!(limit.extract_size_limit_for(None), 30);
        assert_eq!(SizeLimit::default().extract_size_limit_for(None), u64::MAX);
    }
}
