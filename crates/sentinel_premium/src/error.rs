use sentinel_scheduler::StorageError;
use thiserror::Error;

/// How a failed license check affects the license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Keep the license and retry later
    Transient,
    /// Deactivate the license
    Permanent,
    /// Log and leave everything as it is
    Ignored,
}

#[derive(Error, Debug)]
pub enum LicenseError {
    #[error("No network connection")]
    Offline,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Received error response (code: {0})")]
    ServerError(u16),
    #[error("Request failed (code: {0})")]
    RequestFailed(u16),
    #[error("Received unexpected response (code: {0})")]
    UnexpectedStatus(u16),
    #[error("Invalid license: {0}")]
    InvalidLicense(String),
    #[error("Prefs error: {0}")]
    Prefs(#[from] PrefsError),
    #[error("Schedule error: {0}")]
    Schedule(#[from] StorageError),
}

impl LicenseError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Offline | Self::Transport(_) | Self::ServerError(_) => FailureKind::Transient,
            Self::RequestFailed(_) | Self::InvalidLicense(_) => FailureKind::Permanent,
            Self::UnexpectedStatus(_) | Self::Prefs(_) | Self::Schedule(_) => FailureKind::Ignored,
        }
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            400..=499 => Self::RequestFailed(status),
            500..=599 => Self::ServerError(status),
            _ => Self::UnexpectedStatus(status),
        }
    }
}

#[derive(Error, Debug)]
pub enum PrefsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
