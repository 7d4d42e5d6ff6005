use courier_core::validation::validate_driver;
use courier_core::{CommissionHistory, Driver, DriverProfile, LedgerError, LedgerResult, LiveStream};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::info;

use crate::feed::{Table, live_query};
use crate::{SqliteLedgerStore, storage, write_error};

const DRIVER_COLUMNS: &str = "id, name, national_id, plate, phone, address, commission";

fn driver_from_row(row: &SqliteRow) -> Result<Driver, sqlx::Error> {
    Ok(Driver {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        national_id: row.try_get("national_id")?,
        plate: row.try_get("plate")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        commission: row.try_get("commission")?,
    })
}

async fn fetch_driver(
    tx: &mut Transaction<'_, Sqlite>,
    driver_id: i64,
) -> LedgerResult<Option<Driver>> {
    let sql = format!("SELECT {DRIVER_COLUMNS} FROM drivers WHERE id = ?1");
    let row = sqlx::query(&sql)
        .bind(driver_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage)?;
    row.as_ref()
        .map(driver_from_row)
        .transpose()
        .map_err(storage)
}

impl SqliteLedgerStore {
    pub async fn insert_driver(&self, profile: &DriverProfile) -> LedgerResult<i64> {
        let profile = validate_driver(profile)?;
        let mut tx = self.begin_write().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO drivers (name, national_id, plate, phone, address, commission)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&profile.name)
        .bind(&profile.national_id)
        .bind(&profile.plate)
        .bind(&profile.phone)
        .bind(&profile.address)
        .bind(profile.commission)
        .execute(&mut *tx)
        .await
        .map_err(|err| write_error("driver", &profile.name, err))?;
        tx.commit().await.map_err(storage)?;

        self.feed.publish(&[Table::Drivers]);
        Ok(result.last_insert_rowid())
    }

    /// Applies an edit, logging a commission history row when the rate changes.
    ///
    /// Renaming onto another driver's name rejects the whole update.
    pub async fn update_driver(
        &self,
        driver_id: i64,
        profile: &DriverProfile,
        changed_at: &str,
    ) -> LedgerResult<Driver> {
        let profile = validate_driver(profile)?;
        let mut tx = self.begin_write().await?;

        let existing = fetch_driver(&mut tx, driver_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("driver", driver_id))?;

        let holder: Option<i64> = sqlx::query_scalar("SELECT id FROM drivers WHERE name = ?1")
            .bind(&profile.name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;
        if holder.is_some_and(|id| id != driver_id) {
            return Err(LedgerError::conflict(format!(
                "driver named '{}' already exists",
                profile.name
            )));
        }

        let rate_changed = existing.commission != profile.commission;
        if rate_changed {
            sqlx::query(
                r#"
                INSERT INTO commission_history (driver_id, old_commission, new_commission, date_time)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(driver_id)
            .bind(existing.commission)
            .bind(profile.commission)
            .bind(changed_at)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        sqlx::query(
            r#"
            UPDATE drivers
            SET name = ?2, national_id = ?3, plate = ?4, phone = ?5, address = ?6, commission = ?7
            WHERE id = ?1
            "#,
        )
        .bind(driver_id)
        .bind(&profile.name)
        .bind(&profile.national_id)
        .bind(&profile.plate)
        .bind(&profile.phone)
        .bind(&profile.address)
        .bind(profile.commission)
        .execute(&mut *tx)
        .await
        .map_err(|err| write_error("driver", &profile.name, err))?;

        tx.commit().await.map_err(storage)?;
        self.feed.publish(&[Table::Drivers]);

        if rate_changed {
            info!(
                driver_id,
                old = existing.commission,
                new = profile.commission,
                "driver commission changed"
            );
        }

        Ok(Driver {
            id: driver_id,
            name: profile.name,
            national_id: profile.national_id,
            plate: profile.plate,
            phone: profile.phone,
            address: profile.address,
            commission: profile.commission,
        })
    }

    pub async fn get_driver(&self, driver_id: i64) -> LedgerResult<Option<Driver>> {
        let sql = format!("SELECT {DRIVER_COLUMNS} FROM drivers WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref()
            .map(driver_from_row)
            .transpose()
            .map_err(storage)
    }

    pub async fn driver_id_by_name(&self, name: &str) -> LedgerResult<Option<i64>> {
        sqlx::query_scalar("SELECT id FROM drivers WHERE name = ?1")
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)
    }

    pub async fn list_drivers(&self) -> LedgerResult<Vec<Driver>> {
        let sql = format!("SELECT {DRIVER_COLUMNS} FROM drivers ORDER BY name ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter()
            .map(driver_from_row)
            .collect::<Result<_, _>>()
            .map_err(storage)
    }

    /// Refused while any order or payment still points at the driver.
    pub async fn delete_driver(&self, driver_id: i64) -> LedgerResult<()> {
        let mut tx = self.begin_write().await?;

        let references: i64 = sqlx::query_scalar(
            r#"
            SELECT (SELECT COUNT(*) FROM orders WHERE driver_id = ?1)
                 + (SELECT COUNT(*) FROM payments WHERE driver_id = ?1)
            "#,
        )
        .bind(driver_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;
        if references > 0 {
            return Err(LedgerError::Referenced {
                entity: "driver",
                id: driver_id,
            });
        }

        let result = sqlx::query("DELETE FROM drivers WHERE id = ?1")
            .bind(driver_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("driver", driver_id));
        }

        tx.commit().await.map_err(storage)?;
        self.feed.publish(&[Table::Drivers]);
        Ok(())
    }

    pub async fn commission_history(&self, driver_id: i64) -> LedgerResult<Vec<CommissionHistory>> {
        let rows = sqlx::query(
            r#"
            SELECT id, driver_id, old_commission, new_commission, date_time
            FROM commission_history
            WHERE driver_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(driver_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                Ok(CommissionHistory {
                    id: row.try_get("id")?,
                    driver_id: row.try_get("driver_id")?,
                    old_commission: row.try_get("old_commission")?,
                    new_commission: row.try_get("new_commission")?,
                    date_time: row.try_get("date_time")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(storage)
    }

    pub fn watch_commission(&self, driver_id: i64) -> LiveStream<Option<f64>> {
        let pool = self.pool.clone();
        live_query(&self.feed, &[Table::Drivers], move || {
            let pool = pool.clone();
            async move {
                sqlx::query_scalar("SELECT commission FROM drivers WHERE id = ?1")
                    .bind(driver_id)
                    .fetch_optional(&pool)
                    .await
                    .map_err(storage)
            }
        })
    }
}
