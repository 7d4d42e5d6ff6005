use std::str::FromStr;

use courier_core::validation::validate_payment_amount;
use courier_core::{
    LedgerError, LedgerResult, LiveStream, NewPayment, PaymentMethod, PaymentWithDriverName,
};
use sqlx::{Row, SqlitePool};

use crate::feed::{Table, live_query};
use crate::{SqliteLedgerStore, storage};

/// Payments dated strictly after `since`; the empty string sorts before every timestamp.
async fn fetch_paid_since(
    pool: &SqlitePool,
    driver_id: i64,
    since: Option<&str>,
) -> LedgerResult<i64> {
    sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(amount), 0) FROM payments
        WHERE driver_id = ?1 AND date_time > COALESCE(?2, '')
        "#,
    )
    .bind(driver_id)
    .bind(since)
    .fetch_one(pool)
    .await
    .map_err(storage)
}

/// Payments recorded after the driver's latest settlement, by payment id.
async fn fetch_paid_since_last_settlement(pool: &SqlitePool, driver_id: i64) -> LedgerResult<i64> {
    sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(p.amount), 0) FROM payments p
        WHERE p.driver_id = ?1
          AND p.id > COALESCE(
              (SELECT s.last_payment_id FROM settlements s
               WHERE s.driver_id = ?1 ORDER BY s.id DESC LIMIT 1),
              0
          )
        "#,
    )
    .bind(driver_id)
    .fetch_one(pool)
    .await
    .map_err(storage)
}

impl SqliteLedgerStore {
    /// Payments are append-only; there is no update or delete.
    pub async fn insert_payment(&self, payment: &NewPayment) -> LedgerResult<i64> {
        validate_payment_amount(payment.amount)?;

        let mut tx = self.begin_write().await?;
        let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM drivers WHERE id = ?1")
            .bind(payment.driver_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        if known == 0 {
            return Err(LedgerError::not_found("driver", payment.driver_id));
        }

        let result = sqlx::query(
            "INSERT INTO payments (driver_id, amount, payment_method, date_time) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(payment.driver_id)
        .bind(payment.amount)
        .bind(payment.method.as_str())
        .bind(&payment.date_time)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        self.feed.publish(&[Table::Payments]);
        Ok(result.last_insert_rowid())
    }

    pub async fn list_payments_with_driver(&self) -> LedgerResult<Vec<PaymentWithDriverName>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.driver_id, p.amount, p.payment_method, p.date_time, d.name AS driver_name
            FROM payments p
            JOIN drivers d ON d.id = p.driver_id
            ORDER BY p.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                let method: String = row.try_get("payment_method").map_err(storage)?;
                Ok(PaymentWithDriverName {
                    id: row.try_get("id").map_err(storage)?,
                    driver_id: row.try_get("driver_id").map_err(storage)?,
                    amount: row.try_get("amount").map_err(storage)?,
                    method: PaymentMethod::from_str(&method)?,
                    date_time: row.try_get("date_time").map_err(storage)?,
                    driver_name: row.try_get("driver_name").map_err(storage)?,
                })
            })
            .collect::<Result<_, LedgerError>>()
    }

    pub async fn total_paid_since_last_settlement(&self, driver_id: i64) -> LedgerResult<i64> {
        fetch_paid_since_last_settlement(&self.pool, driver_id).await
    }

    pub fn watch_total_paid_since(&self, driver_id: i64, since: Option<String>) -> LiveStream<i64> {
        let pool = self.pool.clone();
        live_query(&self.feed, &[Table::Payments], move || {
            let pool = pool.clone();
            let since = since.clone();
            async move { fetch_paid_since(&pool, driver_id, since.as_deref()).await }
        })
    }

    /// Re-runs on payment writes and on settlements, which move the window start.
    pub fn watch_total_paid_since_last_settlement(&self, driver_id: i64) -> LiveStream<i64> {
        let pool = self.pool.clone();
        live_query(&self.feed, &[Table::Payments, Table::Orders], move || {
            let pool = pool.clone();
            async move { fetch_paid_since_last_settlement(&pool, driver_id).await }
        })
    }
}
