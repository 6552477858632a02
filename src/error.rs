//! Error types for the engine connection layer.
//!
//! Errors fall into a small taxonomy that decides how the service runtime
//! reacts to them:
//!
//! - start errors ([`EngineError::InvalidArguments`],
//!   [`EngineError::InitializationFailed`]) are returned to the caller of
//!   `start()` and the loop never runs
//! - registration errors fail the call immediately
//! - [`EngineError::FatalTransport`] forces a hard connection reset
//! - [`EngineError::Message`] is contained to the one inbound message
//!
//! Connection-level failures are not errors at all: they surface as a
//! `false` from `connect_if_needed()` and a status event.

/// Failure while reading a field out of a [`crate::blob::Blob`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    /// The buffer ended before the requested field.
    Exhausted {
        /// Field type that was requested.
        expected: &'static str,
    },
    /// A string field did not contain valid UTF-8.
    InvalidUtf8,
    /// Fields remain after the handler consumed the whole payload.
    TrailingBytes {
        /// Unread byte count.
        remaining: usize,
    },
    /// A recursive structure nested deeper than the decoder allows.
    TooDeep {
        /// Maximum accepted depth.
        limit: usize,
    },
}

impl std::fmt::Display for BlobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted { expected } => write!(f, "buffer exhausted while reading {expected}"),
            Self::InvalidUtf8 => write!(f, "string field is not valid UTF-8"),
            Self::TrailingBytes { remaining } => {
                write!(f, "{remaining} unread bytes after payload")
            }
            Self::TooDeep { limit } => write!(f, "nesting deeper than {limit} levels"),
        }
    }
}

impl std::error::Error for BlobError {}

/// Unrecoverable transport failure.
///
/// Distinct from an ordinary I/O failure (which only means "not
/// connected"): the transport's internal state can no longer be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFault {
    /// The inbound byte stream is corrupted (bad frame header).
    Corrupted(String),
}

impl std::fmt::Display for TransportFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Corrupted(msg) => write!(f, "transport corrupted: {msg}"),
        }
    }
}

impl std::error::Error for TransportFault {}

/// Errors raised by the connection manager and plugin services.
#[derive(Debug)]
pub enum EngineError {
    /// Process arguments could not be parsed into connection settings.
    InvalidArguments(String),
    /// The transport could not be constructed from the settings.
    InitializationFailed(String),
    /// An operation needed `initialize()` first.
    NotInitialized,
    /// An operation needed a live connection.
    NotConnected,
    /// The transport refused to register a plugin name.
    RegistrationRefused(String),
    /// The transport reported unrecoverable corruption.
    FatalTransport(TransportFault),
    /// One inbound message could not be processed.
    Message {
        /// Opcode of the failing message (empty when unreadable).
        opcode: String,
        /// Underlying failure.
        source: anyhow::Error,
    },
}

impl EngineError {
    /// Whether this error requires a hard connection reset.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalTransport(_))
    }

    /// Wrap a per-message failure.
    pub fn message(opcode: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Message {
            opcode: opcode.into(),
            source: source.into(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArguments(msg) => write!(f, "Invalid engine arguments: {msg}"),
            Self::InitializationFailed(msg) => write!(f, "Engine initialization failed: {msg}"),
            Self::NotInitialized => write!(f, "Engine not initialized"),
            Self::NotConnected => write!(f, "Engine not connected"),
            Self::RegistrationRefused(name) => write!(f, "Engine refused plugin registration: {name}"),
            Self::FatalTransport(fault) => write!(f, "Fatal transport fault: {fault}"),
            Self::Message { opcode, source } => {
                write!(f, "Failed to process message '{opcode}': {source:#}")
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FatalTransport(fault) => Some(fault),
            Self::Message { source, .. } => Some(&**source),
            _ => None,
        }
    }
}

impl From<TransportFault> for EngineError {
    fn from(fault: TransportFault) -> Self {
        Self::FatalTransport(fault)
    }
}

/// Result alias for the connection layer.
pub type Result<T> = std::result::Result<T, EngineError>;
