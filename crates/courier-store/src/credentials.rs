use courier_core::LedgerResult;
use sqlx::Row;

use crate::{SqliteLedgerStore, storage};

/// Persisted passcode state. Hash and salt are base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub hash: String,
    pub salt: String,
    pub iterations: u32,
    pub needs_change: bool,
    pub failed_attempts: i64,
    pub lockout_until: Option<String>,
}

impl SqliteLedgerStore {
    pub async fn load_credential(&self) -> LedgerResult<Option<CredentialRecord>> {
        let row = sqlx::query(
            r#"
            SELECT pass_hash, pass_salt, pass_iterations, needs_change, failed_attempts, lockout_until
            FROM credentials WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|row| {
            Ok::<_, sqlx::Error>(CredentialRecord {
                hash: row.try_get("pass_hash")?,
                salt: row.try_get("pass_salt")?,
                iterations: row.try_get("pass_iterations")?,
                needs_change: row.try_get("needs_change")?,
                failed_attempts: row.try_get("failed_attempts")?,
                lockout_until: row.try_get("lockout_until")?,
            })
        })
        .transpose()
        .map_err(storage)
    }

    pub async fn save_credential(&self, record: &CredentialRecord) -> LedgerResult<()> {
        let mut tx = self.begin_write().await?;
        sqlx::query(
            r#"
            INSERT INTO credentials (
                id, pass_hash, pass_salt, pass_iterations, needs_change, failed_attempts, lockout_until
            )
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (id) DO UPDATE SET
                pass_hash = excluded.pass_hash,
                pass_salt = excluded.pass_salt,
                pass_iterations = excluded.pass_iterations,
                needs_change = excluded.needs_change,
                failed_attempts = excluded.failed_attempts,
                lockout_until = excluded.lockout_until
            "#,
        )
        .bind(&record.hash)
        .bind(&record.salt)
        .bind(record.iterations)
        .bind(record.needs_change)
        .bind(record.failed_attempts)
        .bind(&record.lockout_until)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        tx.commit().await.map_err(storage)?;
        Ok(())
    }
}
