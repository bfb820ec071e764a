use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClawError {
    // ── Envelope errors ──────────────────────────────────────────────────────
    #[error("bad signature")]
    BadSignature,

    #[error("hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: String, got: String },

    #[error("malformed DID: {0}")]
    MalformedDid(String),

    #[error("invalid event type: {0}")]
    InvalidEventType(String),

    #[error("nonce must be >= 1, got {0}")]
    InvalidNonce(u64),

    #[error("payload must be a JSON object")]
    PayloadNotObject,

    #[error("envelope already carries sig/hash")]
    AlreadySigned,

    #[error("envelope is unsigned")]
    Unsigned,

    // ── Store / causal errors ────────────────────────────────────────────────
    #[error("nonce gap for {issuer}: expected {expected}, got {got}")]
    NonceGap {
        issuer: String,
        expected: u64,
        got: u64,
    },

    #[error("prev mismatch for {issuer}: head is {head}, event claims {claimed}")]
    PrevMismatch {
        issuer: String,
        head: String,
        claimed: String,
    },

    #[error("resource conflict on {kind}/{id}")]
    ResourceConflict { kind: String, id: String },

    #[error("unknown issuer: {0}")]
    UnknownIssuer(String),

    #[error("duplicate event: {0}")]
    DuplicateEvent(String),

    #[error("storage error: {0}")]
    StoreIo(String),

    // ── Reducer errors ───────────────────────────────────────────────────────
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    // ── Encoding errors ──────────────────────────────────────────────────────
    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // ── Sync / ticket errors ─────────────────────────────────────────────────
    #[error("invalid sync ticket: {0}")]
    TicketInvalid(String),

    #[error("sync ticket expired")]
    TicketExpired,

    #[error("snapshot has {got} valid signatures; need {need}")]
    SnapshotInsufficientSignatures { need: usize, got: usize },

    // ── Lifecycle errors ─────────────────────────────────────────────────────
    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,
}

impl ClawError {
    /// Short stable code used in log lines and the CLI error prefix.
    pub fn code(&self) -> &'static str {
        match self {
            ClawError::BadSignature => "BadSignature",
            ClawError::HashMismatch { .. } => "HashMismatch",
            ClawError::MalformedDid(_) => "MalformedDid",
            ClawError::InvalidEventType(_) => "InvalidEventType",
            ClawError::InvalidNonce(_) => "InvalidNonce",
            ClawError::PayloadNotObject => "PayloadNotObject",
            ClawError::AlreadySigned => "AlreadySigned",
            ClawError::Unsigned => "Unsigned",
            ClawError::NonceGap { .. } => "NonceGap",
            ClawError::PrevMismatch { .. } => "PrevMismatch",
            ClawError::ResourceConflict { .. } => "ResourceConflict",
            ClawError::UnknownIssuer(_) => "UnknownIssuer",
            ClawError::DuplicateEvent(_) => "DuplicateEvent",
            ClawError::StoreIo(_) => "StoreIO",
            ClawError::InvalidTransition(_) => "InvalidTransition",
            ClawError::Canonicalization(_) => "Canonicalization",
            ClawError::Serialization(_) => "Serialization",
            ClawError::TicketInvalid(_) => "TicketInvalid",
            ClawError::TicketExpired => "TicketExpired",
            ClawError::SnapshotInsufficientSignatures { .. } => "SnapshotInsufficientSignatures",
            ClawError::Cancelled => "Cancelled",
            ClawError::Timeout => "Timeout",
        }
    }

    /// Causal failures that should trigger a range sync from the sender.
    pub fn wants_range_sync(&self) -> bool {
        matches!(
            self,
            ClawError::NonceGap { .. } | ClawError::ResourceConflict { .. }
        )
    }
}
