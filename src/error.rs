//! Error taxonomy for scrape runs

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error type shared by the fetcher, parser, store and batch runner
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Timeout, connection reset or other transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Anti-bot challenge or anomalous status code
    #[error("blocked (status {status:?}): {reason}")]
    Block { status: Option<u16>, reason: String },

    /// Expected page structure absent
    #[error("parse error: {0}")]
    Parse(String),

    /// Write or read rejected by the persistence service
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Missing or invalid configuration, fatal at startup
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ScrapeError {
    pub fn block(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Block {
            status,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network(_) => FailureKind::Network,
            Self::Block { .. } => FailureKind::Block,
            Self::Parse(_) => FailureKind::Parse,
            Self::Persistence(_) => FailureKind::Persistence,
            Self::Configuration(_) => FailureKind::Configuration,
        }
    }

    /// Network failures and block signals are worth another attempt;
    /// static markup and rejected writes are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Block { .. })
    }

    /// Status code carried by a block signal, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Block { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Network(format!("timed out: {}", err))
        } else {
            Self::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Kind of failure, used for per-run counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    Network,
    Block,
    Parse,
    Persistence,
    Configuration,
}

impl FailureKind {
    pub const ALL: [FailureKind; 5] = [
        Self::Network,
        Self::Block,
        Self::Parse,
        Self::Persistence,
        Self::Configuration,
    ];
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Block => "block",
            Self::Parse => "parse",
            Self::Persistence => "persistence",
            Self::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

/// Failure counters by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub network: usize,
    pub block: usize,
    pub parse: usize,
    pub persistence: usize,
    pub configuration: usize,
}

impl FailureCounts {
    pub fn record(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::Network => self.network += 1,
            FailureKind::Block => self.block += 1,
            FailureKind::Parse => self.parse += 1,
            FailureKind::Persistence => self.persistence += 1,
            FailureKind::Configuration => self.configuration += 1,
        }
    }

    pub fn merge(&mut self, other: &FailureCounts) {
        self.network += other.network;
        self.block += other.block;
        self.parse += other.parse;
        self.persistence += other.persistence;
        self.configuration += other.configuration;
    }

    pub fn count(&self, kind: FailureKind) -> usize {
        match kind {
            FailureKind::Network => self.network,
            FailureKind::Block => self.block,
            FailureKind::Parse => self.parse,
            FailureKind::Persistence => self.persistence,
            FailureKind::Configuration => self.configuration,
        }
    }

    pub fn total(&self) -> usize {
        self.network + self.block + self.parse + self.persistence + self.configuration
    }
}
