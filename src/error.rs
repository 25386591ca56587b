//! Error types for every layer of the engine.
//!
//! Sources report `SourceError`, which collectors wrap with the family they
//! were collecting. The orchestrator only ever surfaces `ScanError` to its
//! callers.

use thiserror::Error;

use crate::model::{ResourceFamily, ScanId, ScanStatus};
use crate::pricing::PriceKind;

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("pagination error: {0}")]
    Pagination(String),
}

impl SourceError {
    /// Throttling, timeouts and transient unavailability are worth retrying.
    /// Everything else is surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::Throttled(_) | SourceError::Timeout(_) | SourceError::Unavailable(_)
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum CollectorError {
    #[error("{family}: {source}")]
    Source {
        family: ResourceFamily,
        #[source]
        source: SourceError,
    },

    #[error("{family}: exceeded scan budget")]
    Timeout { family: ResourceFamily },
}

impl CollectorError {
    pub fn from_source(family: ResourceFamily, source: SourceError) -> Self {
        CollectorError::Source { family, source }
    }

    pub fn family(&self) -> ResourceFamily {
        match self {
            CollectorError::Source { family, .. } | CollectorError::Timeout { family } => *family,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PricingError {
    #[error("no {kind} price for tier '{tier}'")]
    MissingTier { kind: PriceKind, tier: String },

    #[error("invalid price book: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not determine data directory")]
    NoDataDir,

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("refusing to save scan {0} in non-terminal state")]
    NotTerminal(ScanId),

    #[error("write rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a scan is already running for this target (scan {scan_id})")]
    AlreadyRunning { scan_id: ScanId },

    #[error("scan {0} not found")]
    NotFound(ScanId),

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: ScanStatus, to: ScanStatus },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Pricing(#[from] PricingError),
}
