use sea_orm::{DbErr, RuntimeErr, SqlErr};
use thiserror::Error;

/// Errors returned by the nested-set engine and query layer.
#[derive(Debug, Error)]
pub enum NestedSetError {
    #[error("nested-set supports PostgreSQL and SQLite connections only")]
    UnsupportedBackend,

    #[error("database error: {0}")]
    Database(#[source] DbErr),

    #[error("structure {0} not found")]
    StructureNotFound(String),

    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("element {0} does not exist")]
    ElementNotFound(String),

    #[error("element {0} is already placed in this structure")]
    DuplicateElement(String),

    #[error("level {level} exceeds the structure limit of {max_levels} levels")]
    DepthExceeded { level: i32, max_levels: i32 },

    #[error("a node cannot be moved into itself or one of its descendants")]
    CyclicMove,

    #[error("node has children and cannot be removed on its own")]
    NotLeaf,

    #[error("actor is not allowed to edit structure {0}")]
    Unauthorized(String),

    #[error("root nodes cannot take siblings or promote their children")]
    RootPlacement,

    #[error("anchor node belongs to a different structure")]
    StructureMismatch,

    #[error("max_levels must be positive or unset, got {0}")]
    InvalidMaxLevels(i32),

    #[error("nested-set capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("concurrent modification detected, retry the operation: {0}")]
    ConcurrencyConflict(String),

    #[error("nested-set invariant violation: {0}")]
    Invariant(String),
}

impl NestedSetError {
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::Invariant(detail.into())
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::ConcurrencyConflict(detail.into())
    }

    /// Only lock and serialization failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }

    /// Classify a database error raised while mutating a tree.
    pub(crate) fn from_write(err: DbErr, element: impl FnOnce() -> String) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(_)) = err.sql_err() {
            return Self::DuplicateElement(element());
        }
        Self::from_db(err)
    }

    /// Lift lock timeouts, deadlocks and busy databases into [`ConcurrencyConflict`].
    ///
    /// [`ConcurrencyConflict`]: NestedSetError::ConcurrencyConflict
    pub(crate) fn from_db(err: DbErr) -> Self {
        if is_contention(&err) {
            Self::ConcurrencyConflict(err.to_string())
        } else {
            Self::Database(err)
        }
    }
}

impl From<DbErr> for NestedSetError {
    fn from(err: DbErr) -> Self {
        Self::from_db(err)
    }
}

// 40001 serialization_failure, 40P01 deadlock_detected, 55P03 lock_not_available,
// 57014 query_canceled (statement_timeout).
const POSTGRES_CONTENTION: &[&str] = &["40001", "40P01", "55P03", "57014"];
// SQLITE_BUSY, SQLITE_LOCKED and their extended codes.
const SQLITE_CONTENTION: &[&str] = &["5", "6", "261", "262", "517"];

fn is_contention(err: &DbErr) -> bool {
    let runtime = match err {
        DbErr::ConnectionAcquire(_) => return true,
        DbErr::Conn(runtime) | DbErr::Exec(runtime) | DbErr::Query(runtime) => runtime,
        _ => return false,
    };

    match runtime {
        RuntimeErr::SqlxError(sqlx::Error::PoolTimedOut) => true,
        RuntimeErr::SqlxError(sqlx::Error::Database(db_err)) => match db_err.code() {
            Some(code) => {
                let code: &str = &code;
                POSTGRES_CONTENTION.contains(&code) || SQLITE_CONTENTION.contains(&code)
            }
            None => db_err.message().contains("database is locked"),
        },
        _ => false,
    }
}
