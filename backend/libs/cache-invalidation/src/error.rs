//! Error types for cache invalidation operations

use thiserror::Error;

/// Cache invalidation errors
#[derive(Error, Debug)]
pub enum InvalidationError {
    /// Redis connection or operation error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The cache did not answer within the operation timeout
    #[error("Cache operation timed out: {0}")]
    Timeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InvalidationError::Timeout("DEL 42 after 3s".to_string());
        assert_eq!(err.to_string(), "Cache operation timed out: DEL 42 after 3s");
    }

    #[test]
    fn test_error_from_redis() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let redis_err = redis::RedisError::from(io_err);
        let err: InvalidationError = redis_err.into();
        assert!(matches!(err, InvalidationError::Redis(_)));
        assert!(err.to_string().starts_with("Redis error:"));
    }
}
