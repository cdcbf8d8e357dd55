//! Error types for the record store, flag engine and their controllers.
//!
//! Callers branch on [`ErrorKind`] rather than matching message text.

use thiserror::Error;

/// Error category for structured logging and response mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Non-positive identifier, rejected before storage is touched
    InvalidIdentifier,
    /// No current record, or no snapshot for the requested version
    NotFound,
    /// Any other database failure (never retried)
    StorageFailure,
    /// Flag refresh failed; the previous cache is still served
    RefreshFailure,
    /// Configuration file unreadable or invalid
    Config,
    /// Evaluation counters could not be built or exported
    Metrics,
}

impl ErrorKind {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier => "INVALID_IDENTIFIER",
            Self::NotFound => "NOT_FOUND",
            Self::StorageFailure => "STORAGE_FAILURE",
            Self::RefreshFailure => "REFRESH_FAILURE",
            Self::Config => "CONFIG_ERROR",
            Self::Metrics => "METRICS_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TimetravelError {
    #[error("invalid identifier: {id}")]
    InvalidIdentifier { id: i64 },

    #[error("record does not exist: policyholder {policyholder_id}{}", version_suffix(.version))]
    RecordNotFound {
        policyholder_id: i64,
        version: Option<i64>,
    },

    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error(
        "version conflict for policyholder {policyholder_id}: expected current version {expected}"
    )]
    VersionConflict { policyholder_id: i64, expected: i64 },

    #[error("flag refresh failed: {message}")]
    Refresh {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("metrics error: {message}")]
    Metrics {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

fn version_suffix(version: &Option<i64>) -> String {
    version.map(|v| format!(" version {v}")).unwrap_or_default()
}

impl TimetravelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            Self::RecordNotFound { .. } => ErrorKind::NotFound,
            Self::Storage { .. } | Self::VersionConflict { .. } => ErrorKind::StorageFailure,
            Self::Refresh { .. } => ErrorKind::RefreshFailure,
            Self::Config { .. } => ErrorKind::Config,
            Self::Metrics { .. } => ErrorKind::Metrics,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn not_found(policyholder_id: i64) -> Self {
        Self::RecordNotFound {
            policyholder_id,
            version: None,
        }
    }

    pub fn version_not_found(policyholder_id: i64, version: i64) -> Self {
        Self::RecordNotFound {
            policyholder_id,
            version: Some(version),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with source
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap the cause of a failed refresh
    pub fn refresh_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Refresh {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn metrics_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Metrics {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<rusqlite::Error> for TimetravelError {
    fn from(e: rusqlite::Error) -> Self {
        Self::storage_with_source(e.to_string(), e)
    }
}

impl From<r2d2::Error> for TimetravelError {
    fn from(e: r2d2::Error) -> Self {
        Self::storage_with_source(format!("connection pool: {e}"), e)
    }
}

impl From<serde_json::Error> for TimetravelError {
    fn from(e: serde_json::Error) -> Self {
        Self::storage_with_source(format!("data payload encoding: {e}"), e)
    }
}

impl From<prometheus::Error> for TimetravelError {
    fn from(e: prometheus::Error) -> Self {
        Self::metrics_with_source(format!("evaluation counters: {e}"), e)
    }
}

/// Result type for timetravel operations
pub type Result<T> = std::result::Result<T, TimetravelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            TimetravelError::InvalidIdentifier { id: 0 }.kind(),
            ErrorKind::InvalidIdentifier
        );
        assert!(TimetravelError::not_found(7).is_not_found());
        assert!(TimetravelError::version_not_found(7, 3).is_not_found());
        assert_eq!(
            TimetravelError::VersionConflict {
                policyholder_id: 1,
                expected: 2
            }
            .kind(),
            ErrorKind::StorageFailure
        );
        assert_eq!(
            TimetravelError::from(rusqlite::Error::QueryReturnedNoRows).kind(),
            ErrorKind::StorageFailure
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            TimetravelError::not_found(5).to_string(),
            "record does not exist: policyholder 5"
        );
        assert_eq!(
            TimetravelError::version_not_found(5, 2).to_string(),
            "record does not exist: policyholder 5 version 2"
        );
        assert_eq!(ErrorKind::RefreshFailure.as_str(), "REFRESH_FAILURE");
        assert_eq!(
            TimetravelError::from(prometheus::Error::Msg("duplicate".to_string())).kind(),
            ErrorKind::Metrics
        );
    }
}
