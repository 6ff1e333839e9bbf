use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("failed to decode provider response: {0}")]
    Decode(String),
    #[error("provider returned {actual} embeddings for {expected} texts")]
    CountMismatch { expected: usize, actual: usize },
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    /// Network failures, rate limiting, server-side errors and malformed
    /// provider responses.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Decode(_) | Self::CountMismatch { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::DimensionMismatch { .. } => false,
        }
    }

    /// Errors caused by configuration that retrying cannot fix.
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::DimensionMismatch { .. })
    }
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_statuses() {
        let status = |status| EmbeddingError::HttpStatus {
            status,
            body: String::new(),
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(EmbeddingError::Transport("reset".into()).is_transient());
    }

    #[test]
    fn malformed_responses_are_transient() {
        assert!(EmbeddingError::Decode("truncated body".into()).is_transient());
        assert!(EmbeddingError::CountMismatch { expected: 2, actual: 1 }.is_transient());
        assert!(!EmbeddingError::Decode("x".into()).is_config());
    }

    #[test]
    fn dimension_mismatch_is_config() {
        let err = EmbeddingError::DimensionMismatch {
            expected: 1024,
            actual: 512,
        };
        assert!(err.is_config());
        assert!(!err.is_transient());
    }
}
