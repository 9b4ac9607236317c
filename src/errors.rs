use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("CONNECTION_FAILED: {0}")]
    Connection(String),
    #[error("QUERY_FAILED: {0}")]
    Query(String),
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("NO_DATA: {0}")]
    NoData(String),
    #[error("DUPLICATE: {0}")]
    Duplicate(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("PERMISSION_DENIED: {0}")]
    PermissionDenied(String),
    #[error("UNSUPPORTED: {0}")]
    Unsupported(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors raised by the remote database rather than by local checks.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Query(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Query(value.to_string())
    }
}

#[cfg(feature = "mysql")]
impl From<sqlx::Error> for AppError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                Self::Connection(value.to_string())
            }
            other => Self::Query(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
