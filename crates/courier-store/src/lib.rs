//! SQLite-backed ledger store.
//!
//! Every mutation runs in its own transaction and, once committed, bumps the
//! revision of each table it touched so live queries re-run.

pub mod credentials;
pub mod drivers;
pub mod feed;
pub mod orders;
pub mod parties;
pub mod payments;
pub mod schema;

use async_trait::async_trait;
use courier_core::{
    Driver, LedgerError, LedgerResult, LedgerStore, LiveStream, NewPayment, OrderWithNames,
};
use sqlx::{Sqlite, SqlitePool, Transaction};

pub use credentials::CredentialRecord;
pub use feed::{ChangeFeed, Revisions, Table};
pub use schema::{connect_database, migrate};

#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl SqliteLedgerStore {
    /// Connects, creates the schema if missing, and returns a ready store.
    pub async fn open(database_url: &str) -> LedgerResult<Self> {
        let pool = connect_database(database_url).await?;
        migrate(&pool).await?;
        Ok(Self::from_pool(pool))
    }

    pub async fn in_memory() -> LedgerResult<Self> {
        Self::open("sqlite::memory:").await
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            feed: ChangeFeed::default(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Opens a transaction that holds the write lock from its first statement,
    /// so concurrent writers wait on the busy timeout instead of failing on upgrade.
    pub async fn begin_write(&self) -> LedgerResult<Transaction<'static, Sqlite>> {
        self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(storage)
    }
}

pub(crate) fn storage(err: sqlx::Error) -> LedgerError {
    LedgerError::storage(err)
}

/// Maps a unique-name violation to a conflict, anything else to storage.
pub(crate) fn write_error(entity: &str, name: &str, err: sqlx::Error) -> LedgerError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            LedgerError::conflict(format!("{entity} named '{name}' already exists"))
        }
        _ => LedgerError::storage(err),
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn get_driver(&self, driver_id: i64) -> LedgerResult<Option<Driver>> {
        SqliteLedgerStore::get_driver(self, driver_id).await
    }

    fn unsettled_orders(&self, driver_id: i64) -> LiveStream<Vec<OrderWithNames>> {
        self.watch_unsettled_orders(driver_id)
    }

    fn total_paid_since(&self, driver_id: i64, since: Option<String>) -> LiveStream<i64> {
        self.watch_total_paid_since(driver_id, since)
    }

    fn total_paid_since_last_settlement(&self, driver_id: i64) -> LiveStream<i64> {
        self.watch_total_paid_since_last_settlement(driver_id)
    }

    fn commission_rate(&self, driver_id: i64) -> LiveStream<Option<f64>> {
        self.watch_commission(driver_id)
    }

    fn last_settlement(&self, driver_id: i64) -> LiveStream<Option<String>> {
        self.watch_last_settlement(driver_id)
    }

    async fn settle_driver(&self, driver_id: i64, settled_at: &str) -> LedgerResult<u64> {
        SqliteLedgerStore::settle_driver(self, driver_id, settled_at).await
    }

    async fn insert_payment(&self, payment: NewPayment) -> LedgerResult<i64> {
        SqliteLedgerStore::insert_payment(self, &payment).await
    }
}
