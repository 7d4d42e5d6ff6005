use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::LedgerResult;
use crate::models::{Driver, NewPayment, OrderWithNames};

/// A query that re-emits whenever the rows it reads change.
///
/// The first item is the current value. A stream ends only when the store
/// that produced it is dropped.
pub type LiveStream<T> = BoxStream<'static, LedgerResult<T>>;

/// The part of the store the settlement reconciler depends on.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_driver(&self, driver_id: i64) -> LedgerResult<Option<Driver>>;

    fn unsettled_orders(&self, driver_id: i64) -> LiveStream<Vec<OrderWithNames>>;

    /// Sum of payments strictly after `since`, or of all payments when `since` is `None`.
    fn total_paid_since(&self, driver_id: i64, since: Option<String>) -> LiveStream<i64>;

    /// Like [`LedgerStore::total_paid_since`], with `since` tracking the driver's
    /// latest settlement as it moves.
    fn total_paid_since_last_settlement(&self, driver_id: i64) -> LiveStream<i64>;

    /// `None` once the driver has been deleted.
    fn commission_rate(&self, driver_id: i64) -> LiveStream<Option<f64>>;

    fn last_settlement(&self, driver_id: i64) -> LiveStream<Option<String>>;

    /// Marks every row still unsettled at write time as settled, in one transaction.
    async fn settle_driver(&self, driver_id: i64, settled_at: &str) -> LedgerResult<u64>;

    async fn insert_payment(&self, payment: NewPayment) -> LedgerResult<i64>;
}
