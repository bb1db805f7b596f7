use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, Statement,
    TransactionTrait, Value,
};
use tracing::{debug, warn};

use crate::config::NestedSetConfig;
use crate::error::NestedSetError;

/// Transaction holding exclusive locks over one or more trees.
///
/// On PostgreSQL every key maps to a transaction-scoped advisory lock, released
/// by commit or rollback. SQLite serializes writers on its own, so only the
/// transaction is opened there.
pub struct LockedTransaction {
    txn: DatabaseTransaction,
    keys: Vec<String>,
}

impl LockedTransaction {
    pub async fn acquire(
        config: &NestedSetConfig,
        db: &DatabaseConnection,
        mut keys: Vec<String>,
    ) -> Result<Self, NestedSetError> {
        // A stable order keeps two cross-tree moves from deadlocking.
        keys.sort();
        keys.dedup();

        let txn = db.begin().await?;

        let locking = txn.get_database_backend() == DbBackend::Postgres
            && config.advisory_lock_strategy().key().is_some();
        if locking {
            if let Err(err) = lock_all(&txn, config, &keys).await {
                warn!(?keys, error = %err, "failed to acquire tree locks");
                let _ = txn.rollback().await;
                return Err(err);
            }
            debug!(?keys, "tree locks acquired");
        } else {
            keys.clear();
        }

        Ok(Self { txn, keys })
    }

    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> Result<(), NestedSetError> {
        self.txn.commit().await?;
        debug!(keys = ?self.keys, "tree transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), NestedSetError> {
        self.txn.rollback().await?;
        debug!(keys = ?self.keys, "tree transaction rolled back");
        Ok(())
    }
}

async fn lock_all(
    txn: &DatabaseTransaction,
    config: &NestedSetConfig,
    keys: &[String],
) -> Result<(), NestedSetError> {
    if let Some(timeout) = config.lock_timeout() {
        // SET does not take bind parameters.
        txn.execute(Statement::from_string(
            DbBackend::Postgres,
            format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis()),
        ))
        .await?;
    }

    for key in keys {
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT pg_advisory_xact_lock(hashtext($1), 0)",
            vec![Value::from(key.as_str())],
        ))
        .await?;
    }
    Ok(())
}
