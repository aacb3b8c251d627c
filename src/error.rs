//! Crate-wide error type.

use thiserror::Error;

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, XddError>;

/// Error categories distinguishing per-op/per-target failures that a
/// run can keep going through from the ones that must abort it.
#[derive(Error, Debug)]
pub enum XddError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("short I/O: target={target} worker={worker} op={op} requested={requested} returned={returned}")]
    ShortIo {
        target: String,
        worker: usize,
        op: u64,
        requested: usize,
        returned: usize,
    },

    #[error("I/O error on target={target} worker={worker} op={op} offset={offset}: {source}")]
    Io {
        target: String,
        worker: usize,
        op: u64,
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("E2E protocol error: {0}")]
    E2eProtocol(String),

    #[error("restart manifest error: {0}")]
    Restart(String),

    #[error("run canceled")]
    Canceled,

    #[error("I/O error: {0}")]
    StdIo(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl XddError {
    /// True if the run should keep going (just a logged, counted error).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            XddError::ShortIo { .. } | XddError::Io { .. }
        )
    }

    /// True if the error must abort the whole run rather than one target.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            XddError::Configuration(_) | XddError::Resource(_) | XddError::Restart(_)
        )
    }

    /// Cancellation is not an error for reporting purposes.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, XddError::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_io_is_recoverable_not_fatal() {
        let e = XddError::ShortIo {
            target: "t0".into(),
            worker: 0,
            op: 1,
            requested: 512,
            returned: 0,
        };
        assert!(e.is_recoverable());
        assert!(!e.is_fatal());
    }

    #[test]
    fn configuration_is_fatal() {
        let e = XddError::Configuration("bad queue depth".into());
        assert!(e.is_fatal());
        assert!(!e.is_recoverable());
    }

    #[test]
    fn cancellation_is_distinguished() {
        assert!(XddError::Canceled.is_cancellation());
        assert!(!XddError::Canceled.is_fatal());
    }
}
