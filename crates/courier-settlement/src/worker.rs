use std::sync::Arc;
use std::time::Duration;

use courier_core::{LedgerResult, LedgerStore, OrderWithNames};
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::figures::reconcile;
use crate::session::{DriverView, SessionPhase, SessionState};

enum Emission {
    Orders(LedgerResult<Vec<OrderWithNames>>),
    Paid(LedgerResult<i64>),
    Rate(LedgerResult<Option<f64>>),
}

/// Most recent good value from each source.
#[derive(Default)]
struct Latest {
    orders: Option<Vec<OrderWithNames>>,
    paid: Option<i64>,
    rate: Option<Option<f64>>,
}

impl Latest {
    fn absorb(&mut self, emission: Emission, driver_id: i64) {
        match emission {
            Emission::Orders(Ok(orders)) => self.orders = Some(orders),
            Emission::Paid(Ok(paid)) => self.paid = Some(paid),
            Emission::Rate(Ok(rate)) => self.rate = Some(rate),
            Emission::Orders(Err(err)) | Emission::Paid(Err(err)) | Emission::Rate(Err(err)) => {
                warn!(driver_id, error = %err, "settlement source failed, keeping previous value");
            }
        }
    }
}

/// Recomputes one driver's view while its generation is current.
pub(crate) struct ReconcileWorker<S: ?Sized> {
    pub(crate) store: Arc<S>,
    pub(crate) state: Arc<watch::Sender<SessionState>>,
    pub(crate) driver_id: i64,
    pub(crate) generation: u64,
    pub(crate) coalesce_window: Duration,
}

impl<S> ReconcileWorker<S>
where
    S: LedgerStore + ?Sized + 'static,
{
    pub(crate) async fn run(self) {
        let driver_id = self.driver_id;
        let sources: Vec<BoxStream<'static, Emission>> = vec![
            self.store
                .unsettled_orders(driver_id)
                .map(Emission::Orders)
                .boxed(),
            self.store
                .total_paid_since_last_settlement(driver_id)
                .map(Emission::Paid)
                .boxed(),
            self.store
                .commission_rate(driver_id)
                .map(Emission::Rate)
                .boxed(),
        ];
        let mut merged = stream::select_all(sources);
        let mut latest = Latest::default();

        while let Some(emission) = merged.next().await {
            latest.absorb(emission, driver_id);

            // The burst ends one window after its first emission, however busy the sources are.
            let deadline = Instant::now() + self.coalesce_window;
            let mut closed = false;
            loop {
                match tokio::time::timeout_at(deadline, merged.next()).await {
                    Ok(Some(emission)) => latest.absorb(emission, driver_id),
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            if !self.publish(&latest) {
                debug!(driver_id, generation = self.generation, "settlement worker superseded");
                return;
            }
            if closed {
                break;
            }
        }
        debug!(driver_id, "settlement sources closed");
    }

    /// Returns false once a newer load owns the session.
    fn publish(&self, latest: &Latest) -> bool {
        let (Some(orders), Some(paid), Some(rate)) = (&latest.orders, latest.paid, latest.rate)
        else {
            return self.state.borrow().generation == self.generation;
        };
        if rate.is_none() {
            debug!(driver_id = self.driver_id, "driver has no commission rate, using zero");
        }
        let rate = rate.unwrap_or(0.0);

        let figures = match reconcile(orders, paid, rate) {
            Ok(figures) => figures,
            Err(err) => {
                warn!(driver_id = self.driver_id, error = %err, "settlement recompute failed, keeping previous view");
                return self.state.borrow().generation == self.generation;
            }
        };

        let view = DriverView {
            driver_id: self.driver_id,
            rate,
            orders: orders.clone(),
            figures,
        };

        let mut current = true;
        let mut offer = false;
        self.state.send_if_modified(|state| {
            if state.generation != self.generation {
                current = false;
                return false;
            }
            if state.phase == SessionPhase::Loading {
                state.phase = SessionPhase::Live;
            }
            offer = !state.settle_offered && !view.orders.is_empty() && figures.is_cleared();
            state.view = Some(view);
            true
        });
        if offer {
            self.offer_settlement();
        }
        current
    }

    /// Raises the settle prompt once per load, only from `Live`.
    fn offer_settlement(&self) {
        self.state.send_if_modified(|state| {
            if state.generation != self.generation
                || state.settle_offered
                || state.phase != SessionPhase::Live
            {
                return false;
            }
            state.settle_offered = true;
            state.phase = SessionPhase::SettleOffered;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use courier_store::SqliteLedgerStore;

    use super::*;

    fn open_order(amount: i64) -> OrderWithNames {
        OrderWithNames {
            id: 1,
            customer_id: 1,
            driver_id: 7,
            neighborhood_id: 1,
            amount,
            description: String::new(),
            date_time: "2026-02-06 09:00:00".to_string(),
            settled: false,
            settled_at: None,
            status: "pending".to_string(),
            customer_name: "Reza".to_string(),
            driver_name: "Ali".to_string(),
            neighborhood_name: "Tajrish".to_string(),
        }
    }

    async fn loading_worker() -> ReconcileWorker<SqliteLedgerStore> {
        let store = Arc::new(SqliteLedgerStore::in_memory().await.unwrap());
        let (sender, _) = watch::channel(SessionState {
            generation: 1,
            phase: SessionPhase::Loading,
            driver_id: Some(7),
            ..SessionState::default()
        });
        ReconcileWorker {
            store,
            state: Arc::new(sender),
            driver_id: 7,
            generation: 1,
            coalesce_window: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn offer_is_not_raised_while_loading() {
        let worker = loading_worker().await;
        worker.offer_settlement();

        let state = worker.state.borrow().clone();
        assert_eq!(state.phase, SessionPhase::Loading);
        assert!(!state.settle_offered);
    }

    #[tokio::test]
    async fn cleared_first_view_goes_live_then_offers() {
        let worker = loading_worker().await;
        let mut rx = worker.state.subscribe();
        let latest = Latest {
            orders: Some(vec![open_order(100)]),
            paid: Some(90),
            rate: Some(Some(10.0)),
        };

        assert!(worker.publish(&latest));
        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.phase, SessionPhase::SettleOffered);
        assert!(state.settle_offered);
        assert_eq!(state.view.unwrap().figures.balance, 0);

        // Declined, a second cleared recompute does not raise it again.
        worker.state.send_modify(|state| state.phase = SessionPhase::Live);
        assert!(worker.publish(&latest));
        assert_eq!(worker.state.borrow().phase, SessionPhase::Live);
    }
}
