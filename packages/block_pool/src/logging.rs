//! The logging hook of the pool.
//!
//! With the `tracing` feature enabled, events are emitted through [`tracing`][::tracing] under
//! the `block_pool` target and reach whatever subscriber the application has installed (if any).
//! Without the feature, every event compiles away, though the arguments are still type-checked.

/// Emits a trace-level event describing a routine state change.
macro_rules! trace_event {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        ::tracing::trace!(target: "block_pool", $($arg)+);

        #[cfg(not(feature = "tracing"))]
        {
            _ = ::std::format_args!($($arg)+);
        }
    };
}

/// Emits a warning-level event describing a rejected operation.
macro_rules! warn_event {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        ::tracing::warn!(target: "block_pool", $($arg)+);

        #[cfg(not(feature = "tracing"))]
        {
            _ = ::std::format_args!($($arg)+);
        }
    };
}

pub(crate) use trace_event;
pub(crate) use warn_event;
