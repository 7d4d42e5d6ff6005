use std::str::FromStr;
use std::time::Duration;

use courier_core::{LedgerError, LedgerResult};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

const SCHEMA: [&str; 13] = [
    r#"
    CREATE TABLE IF NOT EXISTS drivers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        national_id TEXT NOT NULL DEFAULT '',
        plate TEXT NOT NULL DEFAULT '',
        phone TEXT NOT NULL DEFAULT '',
        address TEXT NOT NULL DEFAULT '',
        commission REAL NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS customers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        national_id TEXT NOT NULL DEFAULT '',
        phone TEXT NOT NULL DEFAULT '',
        address TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS neighborhoods (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        customer_id INTEGER NOT NULL REFERENCES customers(id),
        driver_id INTEGER NOT NULL REFERENCES drivers(id),
        neighborhood_id INTEGER NOT NULL REFERENCES neighborhoods(id),
        amount INTEGER NOT NULL CHECK (amount >= 0),
        description TEXT NOT NULL DEFAULT '',
        date_time TEXT NOT NULL,
        settled INTEGER NOT NULL DEFAULT 0,
        settled_at TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        CHECK ((settled = 0 AND settled_at IS NULL) OR (settled = 1 AND settled_at IS NOT NULL))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_orders_driver ON orders (driver_id)",
    "CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders (customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_orders_neighborhood ON orders (neighborhood_id)",
    "CREATE INDEX IF NOT EXISTS idx_orders_date_time ON orders (date_time)",
    "CREATE INDEX IF NOT EXISTS idx_orders_settled ON orders (driver_id, settled)",
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        driver_id INTEGER NOT NULL REFERENCES drivers(id),
        amount INTEGER NOT NULL CHECK (amount > 0),
        payment_method TEXT NOT NULL,
        date_time TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS commission_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        driver_id INTEGER NOT NULL REFERENCES drivers(id) ON DELETE CASCADE,
        old_commission REAL NOT NULL,
        new_commission REAL NOT NULL,
        date_time TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settlements (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        driver_id INTEGER NOT NULL REFERENCES drivers(id) ON DELETE CASCADE,
        settled_at TEXT NOT NULL,
        orders_settled INTEGER NOT NULL,
        last_payment_id INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS credentials (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        pass_hash TEXT NOT NULL,
        pass_salt TEXT NOT NULL,
        pass_iterations INTEGER NOT NULL,
        needs_change INTEGER NOT NULL DEFAULT 0,
        failed_attempts INTEGER NOT NULL DEFAULT 0,
        lockout_until TEXT
    )
    "#,
];

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

pub async fn connect_database(database_url: &str) -> LedgerResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(LedgerError::storage)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    // An in-memory database lives and dies with its single connection.
    let pool = if is_in_memory(database_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
    } else {
        SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options.journal_mode(SqliteJournalMode::Wal))
            .await
    }
    .map_err(LedgerError::storage)?;

    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> LedgerResult<()> {
    let mut tx = pool
        .begin_with("BEGIN IMMEDIATE")
        .await
        .map_err(LedgerError::storage)?;
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(LedgerError::storage)?;
    }
    tx.commit().await.map_err(LedgerError::storage)?;
    Ok(())
}
