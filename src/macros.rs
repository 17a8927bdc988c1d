// Logging shims: forward to `log` when the feature is enabled, vanish otherwise.

macro_rules! trace {
    ($($arg:tt)+) => {
        #[cfg(feature = "log")]
        {
            ::log::trace!($($arg)+);
        }
    };
}

macro_rules! debug {
    ($($arg:tt)+) => {
        #[cfg(feature = "log")]
        {
            ::log::debug!($($arg)+);
        }
    };
}

macro_rules! warn {
    ($($arg:tt)+) => {
        #[cfg(feature = "log")]
        {
            ::log::warn!($($arg)+);
        }
    };
}
