use crate::constants;
use crate::size_limit::SizeLimit;
use tokio::runtime::Handle;

/// Represents the configuration of a multipart parse.
///
/// # Examples
///
/// ```
/// use partflow::{Constraints, SizeLimit};
///
/// let constraints = Constraints::new()
///     .size_limit(SizeLimit::new().whole_stream(15 * 1024 * 1024).per_part(1024 * 1024))
///     .header_capacity(512);
/// ```
#[derive(Debug, Clone)]
pub struct Constraints {
    pub(crate) size_limit: SizeLimit,
    pub(crate) header_capacity: usize,
    pub(crate) body_capacity: usize,
    pub(crate) runtime: Option<Handle>,
}

impl Constraints {
    /// Creates a set of rules with default behaviour.
    pub fn new() -> Constraints {
        Constraints::default()
    }

    /// Sets the size limits of the stream and its parts.
    pub fn size_limit(mut self, size_limit: SizeLimit) -> Constraints {
        self.size_limit = size_limit;
        self
    }

    /// Sets the initial allocation of each part's header accumulator.
    pub fn header_capacity(mut self, capacity: usize) -> Constraints {
        self.header_capacity = capacity;
        self
    }

    /// Sets the initial allocation of the tokenizer accumulators.
    pub fn body_capacity(mut self, capacity: usize) -> Constraints {
        self.body_capacity = capacity;
        self
    }

    /// Runs part actors on the given runtime instead of the current one.
    pub fn runtime(mut self, handle: Handle) -> Constraints {
        self.runtime = Some(handle);
        self
    }

    pub(crate) fn runtime_handle(&self) -> crate::Result<Handle> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|_| crate::Error::NoRuntime),
        }
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            size_limit: SizeLimit::default(),
            header_capacity: constants::DEFAULT_HEADER_CAPACITY,
            body_capacity: constants::DEFAULT_BODY_CAPACITY,
            runtime: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_runtime() {
        assert_eq!(Constraints::new().runtime_handle().unwrap_err(), crate::Error::NoRuntime);
    }

    #[tokio::test]
    async fn test_current_runtime() {
        assert!(Constraints::new().runtime_handle().is_ok());
    }
}
