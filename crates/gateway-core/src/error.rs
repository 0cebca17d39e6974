use thiserror::Error;

/// The gateway's error taxonomy (spec §7). Every subsystem crate defines its
/// own narrower error enum for its own internal failure modes and converts
/// into this one only at the boundaries that cross into admission/dispatch
/// decision-making, where the taxonomy actually matters to the caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or missing required fields on an inbound envelope.
    #[error("invalid envelope: {reason}")]
    InvalidEnvelope { reason: String },

    /// Admission refused the envelope for a policy reason.
    #[error("policy denied: {reason}")]
    PolicyDenied { reason: String },

    /// Retryable failure — subject to backoff.
    #[error("transient error: {reason}")]
    TransientError { reason: String },

    /// Terminal for the current attempt; surfaced to the operator.
    #[error("permanent error: {reason}")]
    PermanentError { reason: String },

    /// Cooperative cancellation — not an error to report except in
    /// diagnostics.
    #[error("cancelled: {reason}")]
    CancelledError { reason: String },

    /// Raised by the stuck-lane sweeper; escalates to force-cancel.
    #[error("stuck lane {session_key}: active for {age_ms}ms")]
    StuckLane { session_key: String, age_ms: i64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Machine-readable code, suitable for diagnostic event payloads.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidEnvelope { .. } => "INVALID_ENVELOPE",
            GatewayError::PolicyDenied { .. } => "POLICY_DENIED",
            GatewayError::TransientError { .. } => "TRANSIENT_ERROR",
            GatewayError::PermanentError { .. } => "PERMANENT_ERROR",
            GatewayError::CancelledError { .. } => "CANCELLED",
            GatewayError::StuckLane { .. } => "STUCK_LANE",
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::Store(_) => "STORE_ERROR",
            GatewayError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether a caller should retry this error with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::TransientError { .. })
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
