//! Error types for the link supervisor.
//!
//! Only construction and configuration surface errors to callers. Once the
//! supervisor is running, transport and codec failures are logged and
//! absorbed by the state machine's reset-and-retry path.

use thiserror::Error;

/// The canonical error type for skylink.
#[derive(Debug, Error)]
pub enum LinkError {
    // ── Transport ────────────────────────────────────────────────
    /// A socket operation failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Codec ────────────────────────────────────────────────────
    /// A MAVLink message could not be serialized.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Configuration ────────────────────────────────────────────
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl From<String> for LinkError {
    fn from(s: String) -> Self {
        LinkError::Other(s)
    }
}

impl From<&str> for LinkError {
    fn from(s: &str) -> Self {
        LinkError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for LinkError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        LinkError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = LinkError::Config("tick_interval_ms must be non-zero".into());
        assert!(e.to_string().contains("invalid configuration"));
        assert!(e.to_string().contains("tick_interval_ms"));

        let e = LinkError::Encoding("buffer full".into());
        assert!(e.to_string().contains("buffer full"));
    }

    #[test]
    fn from_string() {
        let e: LinkError = "something broke".into();
        assert!(matches!(e, LinkError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let e: LinkError = io_err.into();
        assert!(matches!(e, LinkError::Io(_)));
    }

    #[tokio::test]
    async fn from_closed_channel() {
        let (tx, rx) = tokio::sync::mpsc::channel::<u8>(1);
        drop(rx);
        let e: LinkError = tx.send(1).await.unwrap_err().into();
        assert!(matches!(e, LinkError::ChannelClosed));
    }
}
