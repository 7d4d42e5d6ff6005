use courier_core::validation::{validate_order_draft, validate_order_edit};
use courier_core::{
    DEFAULT_ORDER_STATUS, LedgerError, LedgerResult, LiveStream, Order, OrderDraft, OrderEdit,
    OrderWithNames, UNKNOWN_NAME,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::feed::{Table, live_query};
use crate::{SqliteLedgerStore, storage};

const ORDER_COLUMNS: &str = r#"
    o.id, o.customer_id, o.driver_id, o.neighborhood_id, o.amount, o.description,
    o.date_time, o.settled, o.settled_at, o.status
"#;

const NAMED_ORDER_SELECT: &str = r#"
    SELECT o.id, o.customer_id, o.driver_id, o.neighborhood_id, o.amount, o.description,
           o.date_time, o.settled, o.settled_at, o.status,
           COALESCE(c.name, ?1) AS customer_name,
           COALESCE(d.name, ?1) AS driver_name,
           COALESCE(n.name, ?1) AS neighborhood_name
    FROM orders o
    LEFT JOIN customers c ON c.id = o.customer_id
    LEFT JOIN drivers d ON d.id = o.driver_id
    LEFT JOIN neighborhoods n ON n.id = o.neighborhood_id
"#;

const NAMED_ORDER_TABLES: &[Table] = &[
    Table::Orders,
    Table::Customers,
    Table::Drivers,
    Table::Neighborhoods,
];

fn order_from_row(row: &SqliteRow) -> Result<Order, sqlx::Error> {
    Ok(Order {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        driver_id: row.try_get("driver_id")?,
        neighborhood_id: row.try_get("neighborhood_id")?,
        amount: row.try_get("amount")?,
        description: row.try_get("description")?,
        date_time: row.try_get("date_time")?,
        settled: row.try_get("settled")?,
        settled_at: row.try_get("settled_at")?,
        status: row.try_get("status")?,
    })
}

fn named_order_from_row(row: &SqliteRow) -> Result<OrderWithNames, sqlx::Error> {
    let order = order_from_row(row)?;
    Ok(OrderWithNames {
        id: order.id,
        customer_id: order.customer_id,
        driver_id: order.driver_id,
        neighborhood_id: order.neighborhood_id,
        amount: order.amount,
        description: order.description,
        date_time: order.date_time,
        settled: order.settled,
        settled_at: order.settled_at,
        status: order.status,
        customer_name: row.try_get("customer_name")?,
        driver_name: row.try_get("driver_name")?,
        neighborhood_name: row.try_get("neighborhood_name")?,
    })
}

async fn fetch_unsettled(pool: &SqlitePool, driver_id: i64) -> LedgerResult<Vec<OrderWithNames>> {
    let sql = format!("{NAMED_ORDER_SELECT} WHERE o.driver_id = ?2 AND o.settled = 0 ORDER BY o.id DESC");
    let rows = sqlx::query(&sql)
        .bind(UNKNOWN_NAME)
        .bind(driver_id)
        .fetch_all(pool)
        .await
        .map_err(storage)?;
    rows.iter()
        .map(named_order_from_row)
        .collect::<Result<_, _>>()
        .map_err(storage)
}

async fn fetch_last_settlement(pool: &SqlitePool, driver_id: i64) -> LedgerResult<Option<String>> {
    sqlx::query_scalar("SELECT MAX(settled_at) FROM orders WHERE driver_id = ?1 AND settled = 1")
        .bind(driver_id)
        .fetch_one(pool)
        .await
        .map_err(storage)
}

/// Returns the id of the row called `name`, inserting a bare row if there is none.
async fn ensure_named(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    name: &str,
) -> LedgerResult<i64> {
    let select_sql = format!("SELECT id FROM {table} WHERE name = ?1");
    let existing: Option<i64> = sqlx::query_scalar(&select_sql)
        .bind(name)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage)?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let insert_sql = format!("INSERT INTO {table} (name) VALUES (?1)");
    let result = sqlx::query(&insert_sql)
        .bind(name)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;
    Ok(result.last_insert_rowid())
}

async fn require_row(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    entity: &'static str,
    id: i64,
) -> LedgerResult<()> {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE id = ?1");
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_one(&mut **tx)
        .await
        .map_err(storage)?;
    if count == 0 {
        return Err(LedgerError::not_found(entity, id));
    }
    Ok(())
}

/// Stamps the open orders and records the settlement with the newest payment
/// id it covers. Later payments start the next cycle whatever their timestamp.
async fn settle_open_orders(
    tx: &mut Transaction<'_, Sqlite>,
    driver_id: i64,
    settled_at: &str,
) -> LedgerResult<u64> {
    require_row(tx, "drivers", "driver", driver_id).await?;

    let rows = sqlx::query(
        "UPDATE orders SET settled = 1, settled_at = ?2 WHERE driver_id = ?1 AND settled = 0",
    )
    .bind(driver_id)
    .bind(settled_at)
    .execute(&mut **tx)
    .await
    .map_err(storage)?
    .rows_affected();
    if rows == 0 {
        return Ok(0);
    }

    sqlx::query(
        r#"
        INSERT INTO settlements (driver_id, settled_at, orders_settled, last_payment_id)
        SELECT ?1, ?2, ?3, COALESCE(MAX(id), 0) FROM payments WHERE driver_id = ?1
        "#,
    )
    .bind(driver_id)
    .bind(settled_at)
    .bind(rows as i64)
    .execute(&mut **tx)
    .await
    .map_err(storage)?;
    Ok(rows)
}

impl SqliteLedgerStore {
    /// Resolves or creates the customer, driver and neighborhood by name, then
    /// inserts the order. Nothing is written unless every step succeeds.
    pub async fn place_order(&self, draft: &OrderDraft, placed_at: &str) -> LedgerResult<i64> {
        let draft = validate_order_draft(draft)?;
        let mut tx = self.begin_write().await?;

        let customer_id = ensure_named(&mut tx, "customers", &draft.customer_name).await?;
        let driver_id = ensure_named(&mut tx, "drivers", &draft.driver_name).await?;
        let neighborhood_id =
            ensure_named(&mut tx, "neighborhoods", &draft.neighborhood_name).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                customer_id, driver_id, neighborhood_id, amount, description, date_time, settled, settled_at, status
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, ?7)
            "#,
        )
        .bind(customer_id)
        .bind(driver_id)
        .bind(neighborhood_id)
        .bind(draft.amount)
        .bind(&draft.description)
        .bind(placed_at)
        .bind(DEFAULT_ORDER_STATUS)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        self.feed.publish(NAMED_ORDER_TABLES);
        Ok(result.last_insert_rowid())
    }

    /// Edits amount, description and parties. Settlement fields are left alone.
    pub async fn update_order(&self, order_id: i64, edit: &OrderEdit) -> LedgerResult<Order> {
        let edit = validate_order_edit(edit)?;
        let mut tx = self.begin_write().await?;

        require_row(&mut tx, "orders", "order", order_id).await?;
        require_row(&mut tx, "customers", "customer", edit.customer_id).await?;
        require_row(&mut tx, "drivers", "driver", edit.driver_id).await?;
        require_row(&mut tx, "neighborhoods", "neighborhood", edit.neighborhood_id).await?;

        sqlx::query(
            r#"
            UPDATE orders
            SET customer_id = ?2, driver_id = ?3, neighborhood_id = ?4, amount = ?5, description = ?6
            WHERE id = ?1
            "#,
        )
        .bind(order_id)
        .bind(edit.customer_id)
        .bind(edit.driver_id)
        .bind(edit.neighborhood_id)
        .bind(edit.amount)
        .bind(&edit.description)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders o WHERE o.id = ?1");
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        let order = order_from_row(&row).map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        self.feed.publish(&[Table::Orders]);
        Ok(order)
    }

    pub async fn get_order(&self, order_id: i64) -> LedgerResult<Option<OrderWithNames>> {
        let sql = format!("{NAMED_ORDER_SELECT} WHERE o.id = ?2");
        let row = sqlx::query(&sql)
            .bind(UNKNOWN_NAME)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref()
            .map(named_order_from_row)
            .transpose()
            .map_err(storage)
    }

    pub async fn list_orders(&self) -> LedgerResult<Vec<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders o ORDER BY o.id DESC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter()
            .map(order_from_row)
            .collect::<Result<_, _>>()
            .map_err(storage)
    }

    pub async fn list_orders_with_names(&self) -> LedgerResult<Vec<OrderWithNames>> {
        let sql = format!("{NAMED_ORDER_SELECT} ORDER BY o.id DESC");
        let rows = sqlx::query(&sql)
            .bind(UNKNOWN_NAME)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter()
            .map(named_order_from_row)
            .collect::<Result<_, _>>()
            .map_err(storage)
    }

    pub async fn delete_order(&self, order_id: i64) -> LedgerResult<()> {
        let mut tx = self.begin_write().await?;
        let result = sqlx::query("DELETE FROM orders WHERE id = ?1")
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("order", order_id));
        }
        tx.commit().await.map_err(storage)?;

        self.feed.publish(&[Table::Orders]);
        Ok(())
    }

    /// Settles the driver's open orders.
    ///
    /// The update is scoped to `settled = 0` at write time, so an order inserted
    /// after this call starts stays open and already-settled rows keep their stamp.
    pub async fn settle_driver(&self, driver_id: i64, settled_at: &str) -> LedgerResult<u64> {
        let mut tx = self.begin_write().await?;
        let rows = settle_open_orders(&mut tx, driver_id, settled_at).await?;
        tx.commit().await.map_err(storage)?;

        if rows > 0 {
            self.feed.publish(&[Table::Orders]);
        }
        info!(driver_id, rows, settled_at, "driver settled");
        Ok(rows)
    }

    pub async fn unsettled_orders_for(&self, driver_id: i64) -> LedgerResult<Vec<OrderWithNames>> {
        fetch_unsettled(&self.pool, driver_id).await
    }

    pub async fn last_settlement_for(&self, driver_id: i64) -> LedgerResult<Option<String>> {
        fetch_last_settlement(&self.pool, driver_id).await
    }

    pub fn watch_unsettled_orders(&self, driver_id: i64) -> LiveStream<Vec<OrderWithNames>> {
        let pool = self.pool.clone();
        live_query(&self.feed, NAMED_ORDER_TABLES, move || {
            let pool = pool.clone();
            async move { fetch_unsettled(&pool, driver_id).await }
        })
    }

    pub fn watch_last_settlement(&self, driver_id: i64) -> LiveStream<Option<String>> {
        let pool = self.pool.clone();
        live_query(&self.feed, &[Table::Orders], move || {
            let pool = pool.clone();
            async move { fetch_last_settlement(&pool, driver_id).await }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn draft(amount: i64) -> OrderDraft {
        OrderDraft {
            customer_name: "Reza".to_string(),
            driver_name: "Ali".to_string(),
            neighborhood_name: "Tajrish".to_string(),
            amount,
            description: String::new(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn order_placed_while_settle_is_open_stays_unsettled() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
        let store = SqliteLedgerStore::open(&url).await.unwrap();
        let first = store
            .place_order(&draft(100), "2026-02-06 09:00:00")
            .await
            .unwrap();
        let ali = store.driver_id_by_name("Ali").await.unwrap().unwrap();

        let mut settling = store.begin_write().await.unwrap();
        let rows = settle_open_orders(&mut settling, ali, "2026-02-06 10:00:00")
            .await
            .unwrap();
        assert_eq!(rows, 1);

        let late = {
            let store = store.clone();
            tokio::spawn(async move { store.place_order(&draft(30), "2026-02-06 10:00:00").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!late.is_finished());

        settling.commit().await.unwrap();
        let late = late.await.unwrap().unwrap();

        assert!(store.get_order(first).await.unwrap().unwrap().settled);
        let late_order = store.get_order(late).await.unwrap().unwrap();
        assert!(!late_order.settled);
        assert_eq!(late_order.settled_at, None);
    }
}
