use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("ACCESS_DENIED: {0}")]
    Access(String),
    #[error("MALFORMED: {0}")]
    Malformed(String),
    #[error("WRITE_FAILED: {0}")]
    WriteFailed(String),
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Access(_) | Self::WriteFailed(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Access(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn display_carries_error_code() {
        let error = AppError::WriteFailed("disk full".to_string());
        assert_eq!(error.to_string(), "WRITE_FAILED: disk full");
        assert!(error.is_retryable());
        assert!(!AppError::Malformed("bad".to_string()).is_retryable());
    }
}
