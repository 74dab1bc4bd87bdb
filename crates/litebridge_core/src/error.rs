//! Error types for the bridge layer.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Which subsystem of the native engine reported an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    /// The engine itself.
    Engine,
    /// An OS-level `errno`.
    Posix,
    /// The embedded SQL storage layer.
    Sqlite,
    /// The binary value format.
    Fleece,
    /// Networking.
    Network,
    /// WebSocket protocol status codes.
    WebSocket,
    /// A domain this layer does not know.
    Other(u32),
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDomain::Engine => f.write_str("engine"),
            ErrorDomain::Posix => f.write_str("posix"),
            ErrorDomain::Sqlite => f.write_str("sqlite"),
            ErrorDomain::Fleece => f.write_str("fleece"),
            ErrorDomain::Network => f.write_str("network"),
            ErrorDomain::WebSocket => f.write_str("websocket"),
            ErrorDomain::Other(n) => write!(f, "domain {n}"),
        }
    }
}

/// An error as reported by the native engine: `{domain, code, message}`.
///
/// A zero `code` means "no error"; native calls that fail without filling in
/// the error leave it in that state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    /// Reporting subsystem.
    pub domain: ErrorDomain,
    /// Domain-specific code.
    pub code: i32,
    /// Human-readable message from the engine.
    pub message: String,
}

impl NativeError {
    /// Creates a native error.
    pub fn new(domain: ErrorDomain, code: i32, message: impl Into<String>) -> Self {
        Self {
            domain,
            code,
            message: message.into(),
        }
    }

    /// True if the engine actually reported something.
    pub fn is_set(&self) -> bool {
        self.code != 0
    }
}

impl Default for NativeError {
    fn default() -> Self {
        Self {
            domain: ErrorDomain::Engine,
            code: 0,
            message: String::new(),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{} error {}", self.domain, self.code)
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for NativeError {}

/// Errors surfaced by the bridge layer.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed buffer or unsupported tag.
    #[error("decode error: {0}")]
    Decode(#[from] litebridge_codec::CodecError),

    /// A value was read after the buffer or resource owning it was released.
    #[error("use after release: {what}")]
    UseAfterRelease {
        /// What was released.
        what: &'static str,
    },

    /// A native open/get/new call returned no handle.
    #[error("{context}: {source}")]
    Open {
        /// Caller-supplied description of the attempted operation.
        context: String,
        /// The engine's error.
        source: NativeError,
    },

    /// Any other failed native call.
    #[error("{context}: {source}")]
    Operation {
        /// Caller-supplied description of the attempted operation.
        context: String,
        /// The engine's error.
        source: NativeError,
    },

    /// A lookup miss.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Attempt to mutate a value decoded as immutable.
    #[error("value is immutable")]
    Immutable,

    /// A cancellable operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A bounded operation ran past its deadline.
    #[error("operation timed out")]
    TimedOut,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// Creates an open error.
    pub fn open(context: impl Into<String>, source: NativeError) -> Self {
        Self::Open {
            context: context.into(),
            source,
        }
    }

    /// Creates an operation error.
    pub fn operation(context: impl Into<String>, source: NativeError) -> Self {
        Self::Operation {
            context: context.into(),
            source,
        }
    }

    /// Creates a use-after-release error.
    pub fn use_after_release(what: &'static str) -> Self {
        Self::UseAfterRelease { what }
    }

    /// Creates a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// The native error behind this failure, if any.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Self::Open { source, .. } | Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<BridgeError> for io::Error {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Io(e) => e,
            BridgeError::TimedOut => io::Error::new(io::ErrorKind::TimedOut, err),
            BridgeError::Cancelled => io::Error::new(io::ErrorKind::Interrupted, err),
            BridgeError::UseAfterRelease { .. } => io::Error::new(io::ErrorKind::NotConnected, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
