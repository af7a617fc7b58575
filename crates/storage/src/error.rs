//! Error taxonomy for the repository. The important split is
//! connectivity-class failures (which trip the failover latch) versus
//! data errors (which always propagate to the caller).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The durable backend is unreachable (DNS, refused connection,
    /// pool timeout). Triggers failover, never surfaced to end users.
    #[error("storage backend unreachable: {0}")]
    Connectivity(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Uniqueness or state conflict, e.g. a replayed external order id
    /// or a second accepted assignment for the same order.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid data: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl StorageError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StorageError::Connectivity(_))
    }
}

/// Classify sqlx failures. Transport-level errors become
/// `Connectivity`; row/constraint problems keep their data-error
/// identity so they are never mistaken for an unreachable backend.
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => StorageError::Connectivity(err.to_string()),
            sqlx::Error::RowNotFound => StorageError::NotFound("row"),
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() {
                    StorageError::Conflict(db.to_string())
                } else {
                    StorageError::Database(sqlx::Error::Database(db))
                }
            }
            other => StorageError::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_classify_as_connectivity() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StorageError::from(sqlx::Error::Io(io));
        assert!(err.is_connectivity());

        let err = StorageError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_connectivity());
    }

    #[test]
    fn row_not_found_is_not_connectivity() {
        let err = StorageError::from(sqlx::Error::RowNotFound);
        assert!(!err.is_connectivity());
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
