//! Error types
//!
//! Transport failures never come back from `write`/`end`/`destroy` directly.
//! They surface as `error` events carrying a [`StreamError`].

/// Failure reported by a [`Transport`](crate::Transport) operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport closed")]
    Closed,

    #[error("operation not supported by transport: {0}")]
    Unsupported(&'static str),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Convenience constructor for `Other`.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Payload of an `error` event.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StreamError {
    /// A flush cycle failed. The in-flight bytes and anything buffered while
    /// the write was pending have been dropped.
    #[error("transport write failed, {dropped} bytes dropped: {source}")]
    Write {
        dropped: usize,
        #[source]
        source: TransportError,
    },

    /// Finalize failed. The stream stays in the ending state until destroyed.
    #[error("transport finalize failed, stream must be destroyed: {source}")]
    Finalize {
        #[source]
        source: TransportError,
    },

    /// Destroy failed. The stream is still live and `destroy` may be retried.
    #[error("transport destroy failed: {source}")]
    Destroy {
        #[source]
        source: TransportError,
    },

    /// A pull-style read failed.
    #[error("transport read failed: {source}")]
    Read {
        #[source]
        source: TransportError,
    },
}

impl StreamError {
    /// Returns `true` when the stream can no longer finish on its own and
    /// the listener is responsible for calling `destroy`.
    pub fn requires_destroy(&self) -> bool {
        matches!(self, Self::Finalize { .. })
    }

    /// Returns `true` when repeating the failed operation is meaningful.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Destroy { .. })
    }

    /// The underlying transport failure.
    pub fn transport_error(&self) -> &TransportError {
        match self {
            Self::Write { source, .. }
            | Self::Finalize { source }
            | Self::Destroy { source }
            | Self::Read { source } => source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_hints() {
        let finalize = StreamError::Finalize {
            source: TransportError::Closed,
        };
        assert!(finalize.requires_destroy());
        assert!(!finalize.is_retryable());

        let destroy = StreamError::Destroy {
            source: TransportError::other("busy"),
        };
        assert!(destroy.is_retryable());
        assert!(!destroy.requires_destroy());

        let write = StreamError::Write {
            dropped: 4,
            source: TransportError::Closed,
        };
        assert!(!write.requires_destroy());
        assert!(!write.is_retryable());
    }

    #[test]
    fn test_display_includes_source() {
        let err = StreamError::Write {
            dropped: 3,
            source: TransportError::other("disk full"),
        };
        assert_eq!(
            err.to_string(),
            "transport write failed, 3 bytes dropped: disk full"
        );
        assert!(matches!(err.transport_error(), TransportError::Other(_)));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: TransportError = io.into();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
