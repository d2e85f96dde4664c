//! Error types for the mockrelay core engine.

/// Result type alias for mockrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy, matching the opaque error names the engine design
/// distinguishes between (see `ERROR HANDLING DESIGN`).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No registered parser matched the initial bytes; callers should
    /// treat this as informational and fall back to `generic`, not abort.
    #[error("no protocol parser matched the initial bytes")]
    ProtocolMatch,

    /// A packet could not be decoded and the flow cannot continue.
    #[error("malformed {protocol} packet: {reason}")]
    MalformedPacket {
        /// Protocol that detected the malformed packet.
        protocol: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A MySQL `COM_STMT_EXECUTE`/`COM_STMT_CLOSE` referenced a statement
    /// ID that is not open. Aborts the current command cycle only.
    #[error("unknown prepared statement id {0}")]
    UnknownStatement(u32),

    /// The replay matcher found no candidate mock for the live request.
    #[error("no recorded mock matched the request")]
    MockMiss,

    /// A blocking operation exceeded its deadline.
    #[error("timeout waiting on {op}")]
    Timeout {
        /// Name of the operation that timed out.
        op: &'static str,
    },

    /// Cooperative shutdown requested via cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The downstream mock/testcase channel was closed by its receiver.
    #[error("persistence channel closed")]
    PersistenceClosed,

    /// Wraps an I/O failure on the underlying socket or filesystem.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Wraps a JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for conditions not worth a dedicated variant.
    #[error("{0}")]
    Generic(String),
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::Generic(message)
    }
}

impl Error {
    /// Build a [`Error::MalformedPacket`].
    pub fn malformed(protocol: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedPacket {
            protocol,
            reason: reason.into(),
        }
    }

    /// Build a [`Error::Timeout`].
    pub fn timeout(op: &'static str) -> Self {
        Self::Timeout { op }
    }

    /// Build a [`Error::Generic`].
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic(message.into())
    }
}
