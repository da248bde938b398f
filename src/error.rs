//! Error types for Toolbus
//!
//! The error taxonomy is layered: [`TransportError`] is raised by a transport
//! implementation, [`ToolError`] by a session or the registry, and
//! [`ToolbusError`] covers fatal configuration and startup conditions plus
//! provider failures. Transport errors never reach the dispatch loop; the
//! session converts them to `ToolError` first.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`crate::mcp::transport::Transport`] implementation.
///
/// `Disconnected` and `Protocol` close the owning session; `Timeout` and
/// `Unreachable` leave it open (the registry may retry once).
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The peer went away: child process exited, stream reached EOF, or the
    /// transport was closed while a call was in flight.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The peer could not be reached at all (connect failure, DNS, refused).
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// No response arrived within the bounded wait.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The peer responded with something that is not a valid message
    /// (malformed JSON, unexpected HTTP status, framing violation).
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors surfaced to the dispatch loop for a single tool invocation.
///
/// Always recoverable at the conversation level: the loop folds these into
/// the transcript as tool-result errors and lets the model react.
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    /// The owning server cannot serve the call (transport failure).
    #[error("tool unavailable: {reason}")]
    Unavailable {
        /// What went wrong at the transport
        reason: String,
        /// True only when the failure was a timeout; the registry may retry
        /// those once. Disconnects and reachability failures are not retried.
        retryable: bool,
    },

    /// No connected server declares this tool.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The server rejected the argument payload.
    #[error("invalid arguments for '{tool}': {message}")]
    InvalidArguments {
        /// The tool whose arguments were rejected
        tool: String,
        /// The server's rejection message
        message: String,
    },

    /// The server executed the tool and reported a failure result.
    #[error("server reported error: {0}")]
    ServerReported(String),

    /// The session is `Closed`; no I/O was attempted.
    #[error("session closed")]
    SessionClosed,
}

impl ToolError {
    /// Short machine-readable kind tag, used when folding an error into a
    /// tool-result transcript entry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::ServerReported(_) => "server_reported",
            Self::SessionClosed => "session_closed",
        }
    }
}

/// Top-level error type for Toolbus operations
///
/// Covers fatal startup conditions (configuration, catalog aggregation),
/// handshake failures reported to the registry, and provider errors.
#[derive(Error, Debug)]
pub enum ToolbusError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A server descriptor is missing parameters its transport kind requires
    #[error("Malformed descriptor for server '{server}': {message}")]
    MalformedDescriptor {
        /// The offending server's name
        server: String,
        /// What is missing or inconsistent
        message: String,
    },

    /// Two distinct servers declared the same tool name
    #[error("Duplicate tool name '{tool}' declared by servers '{first}' and '{second}'")]
    DuplicateToolName {
        /// The colliding tool name
        tool: String,
        /// The server that registered the name first
        first: String,
        /// The server whose registration collided
        second: String,
    },

    /// The connect-time handshake with a server failed
    #[error("Handshake with server '{server}' failed: {message}")]
    Handshake {
        /// The server being connected
        server: String,
        /// Underlying cause
        message: String,
    },

    /// The server negotiated a protocol version this client does not speak
    #[error("Server '{server}' negotiated unsupported protocol version '{got}'")]
    ProtocolVersion {
        /// The server being connected
        server: String,
        /// The version string the server returned
        got: String,
    },

    /// Model provider errors (API calls, malformed responses)
    #[error("Provider error: {0}")]
    Provider(String),

    /// The dispatch loop exceeded its turn limit within a single user turn
    #[error("Dispatch loop exceeded maximum turns: limit={limit}")]
    MaxTurnsExceeded {
        /// The configured turn limit
        limit: usize,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Toolbus operations
///
/// Uses `anyhow::Error` so call sites can attach context while the typed
/// enums above stay matchable via `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Disconnected("child exited".to_string());
        assert_eq!(err.to_string(), "disconnected: child exited");

        let err = TransportError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_tool_error_kinds() {
        assert_eq!(ToolError::SessionClosed.kind(), "session_closed");
        assert_eq!(ToolError::UnknownTool("x".into()).kind(), "unknown_tool");
        assert_eq!(
            ToolError::Unavailable {
                reason: "x".into(),
                retryable: false
            }
            .kind(),
            "unavailable"
        );
        assert_eq!(
            ToolError::InvalidArguments {
                tool: "t".into(),
                message: "m".into()
            }
            .kind(),
            "invalid_arguments"
        );
        assert_eq!(ToolError::ServerReported("x".into()).kind(), "server_reported");
    }

    #[test]
    fn test_duplicate_tool_name_display() {
        let err = ToolbusError::DuplicateToolName {
            tool: "make_playlist".to_string(),
            first: "music".to_string(),
            second: "backup-music".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("make_playlist"));
        assert!(s.contains("music"));
        assert!(s.contains("backup-music"));
    }

    #[test]
    fn test_malformed_descriptor_display() {
        let err = ToolbusError::MalformedDescriptor {
            server: "colors".to_string(),
            message: "http transport requires a url".to_string(),
        };
        assert!(err.to_string().contains("colors"));
        assert!(err.to_string().contains("requires a url"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ToolbusError = io_error.into();
        assert!(matches!(err, ToolbusError::Io(_)));
    }

    #[test]
    fn test_errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TransportError>();
        assert_send_sync::<ToolError>();
        assert_send_sync::<ToolbusError>();
    }
}
