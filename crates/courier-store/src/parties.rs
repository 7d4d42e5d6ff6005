use courier_core::validation::{require_name, validate_customer};
use courier_core::{Customer, CustomerProfile, LedgerError, LedgerResult, Neighborhood, UNKNOWN_NAME};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::feed::Table;
use crate::{SqliteLedgerStore, storage, write_error};

fn customer_from_row(row: &SqliteRow) -> Result<Customer, sqlx::Error> {
    Ok(Customer {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        national_id: row.try_get("national_id")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
    })
}

impl SqliteLedgerStore {
    pub async fn insert_customer(&self, profile: &CustomerProfile) -> LedgerResult<i64> {
        let profile = validate_customer(profile)?;
        let mut tx = self.begin_write().await?;

        let result = sqlx::query(
            "INSERT INTO customers (name, national_id, phone, address) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&profile.name)
        .bind(&profile.national_id)
        .bind(&profile.phone)
        .bind(&profile.address)
        .execute(&mut *tx)
        .await
        .map_err(|err| write_error("customer", &profile.name, err))?;
        tx.commit().await.map_err(storage)?;

        self.feed.publish(&[Table::Customers]);
        Ok(result.last_insert_rowid())
    }

    pub async fn update_customer(
        &self,
        customer_id: i64,
        profile: &CustomerProfile,
    ) -> LedgerResult<Customer> {
        let profile = validate_customer(profile)?;
        let mut tx = self.begin_write().await?;

        let result = sqlx::query(
            r#"
            UPDATE customers SET name = ?2, national_id = ?3, phone = ?4, address = ?5
            WHERE id = ?1
            "#,
        )
        .bind(customer_id)
        .bind(&profile.name)
        .bind(&profile.national_id)
        .bind(&profile.phone)
        .bind(&profile.address)
        .execute(&mut *tx)
        .await
        .map_err(|err| write_error("customer", &profile.name, err))?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("customer", customer_id));
        }
        tx.commit().await.map_err(storage)?;

        self.feed.publish(&[Table::Customers]);
        Ok(Customer {
            id: customer_id,
            name: profile.name,
            national_id: profile.national_id,
            phone: profile.phone,
            address: profile.address,
        })
    }

    pub async fn get_customer(&self, customer_id: i64) -> LedgerResult<Option<Customer>> {
        let row = sqlx::query(
            "SELECT id, name, national_id, phone, address FROM customers WHERE id = ?1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref()
            .map(customer_from_row)
            .transpose()
            .map_err(storage)
    }

    pub async fn list_customers(&self) -> LedgerResult<Vec<Customer>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, national_id, phone, address FROM customers
            WHERE name != ?1
            ORDER BY name ASC
            "#,
        )
        .bind(UNKNOWN_NAME)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter()
            .map(customer_from_row)
            .collect::<Result<_, _>>()
            .map_err(storage)
    }

    pub async fn delete_customer(&self, customer_id: i64) -> LedgerResult<()> {
        self.delete_unreferenced("customers", "customer_id", "customer", customer_id)
            .await?;
        self.feed.publish(&[Table::Customers]);
        Ok(())
    }

    pub async fn insert_neighborhood(&self, name: &str) -> LedgerResult<i64> {
        let name = require_name("neighborhood name", name)?;

        let mut tx = self.begin_write().await?;
        let result = sqlx::query("INSERT INTO neighborhoods (name) VALUES (?1)")
            .bind(&name)
            .execute(&mut *tx)
            .await
            .map_err(|err| write_error("neighborhood", &name, err))?;
        tx.commit().await.map_err(storage)?;

        self.feed.publish(&[Table::Neighborhoods]);
        Ok(result.last_insert_rowid())
    }

    pub async fn list_neighborhoods(&self) -> LedgerResult<Vec<Neighborhood>> {
        let rows = sqlx::query("SELECT id, name FROM neighborhoods ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter()
            .map(|row| {
                Ok(Neighborhood {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(storage)
    }

    pub async fn delete_neighborhood(&self, neighborhood_id: i64) -> LedgerResult<()> {
        self.delete_unreferenced(
            "neighborhoods",
            "neighborhood_id",
            "neighborhood",
            neighborhood_id,
        )
        .await?;
        self.feed.publish(&[Table::Neighborhoods]);
        Ok(())
    }

    async fn delete_unreferenced(
        &self,
        table: &str,
        order_column: &str,
        entity: &'static str,
        id: i64,
    ) -> LedgerResult<()> {
        let mut tx = self.begin_write().await?;

        let count_sql = format!("SELECT COUNT(*) FROM orders WHERE {order_column} = ?1");
        let references: i64 = sqlx::query_scalar(&count_sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;
        if references > 0 {
            return Err(LedgerError::Referenced { entity, id });
        }

        let delete_sql = format!("DELETE FROM {table} WHERE id = ?1");
        let result = sqlx::query(&delete_sql)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found(entity, id));
        }

        tx.commit().await.map_err(storage)?;
        Ok(())
    }
}
