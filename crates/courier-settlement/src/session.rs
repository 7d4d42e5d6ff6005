//! Settlement session: one loaded driver at a time, a background worker that
//! keeps the view current, and the settle/payment actions against it.
//!
//! Every load bumps the session generation. A worker only writes while its
//! generation is current, so a late recompute for a previously loaded driver
//! can never overwrite the view of the driver loaded after it.

use std::sync::Arc;
use std::time::Duration;

use courier_core::validation::validate_payment_amount;
use courier_core::{
    Clock, LedgerError, LedgerResult, LedgerStore, NewPayment, OrderWithNames, PaymentMethod,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::figures::SettlementFigures;
use crate::worker::ReconcileWorker;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Loading,
    Live,
    SettleOffered,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverView {
    pub driver_id: i64,
    pub rate: f64,
    pub orders: Vec<OrderWithNames>,
    #[serde(flatten)]
    pub figures: SettlementFigures,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub generation: u64,
    pub phase: SessionPhase,
    pub driver_id: Option<i64>,
    /// Set once the settle prompt has been raised for the current load.
    pub settle_offered: bool,
    pub view: Option<DriverView>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            generation: 0,
            phase: SessionPhase::Idle,
            driver_id: None,
            settle_offered: false,
            view: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    /// Source emissions arriving within this window produce one recompute.
    pub coalesce_window: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            coalesce_window: Duration::from_millis(25),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentCap {
    #[default]
    Unbounded,
    /// Reject amounts above the balance currently shown.
    CurrentBalance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: i64,
    pub method: PaymentMethod,
    #[serde(default)]
    pub cap: PaymentCap,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub payment_id: i64,
    pub driver_id: i64,
    pub amount: i64,
    /// The payment brought the shown balance to exactly zero.
    pub clears_balance: bool,
}

pub struct SettlementSession<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    state: Arc<watch::Sender<SessionState>>,
    worker: Option<JoinHandle<()>>,
}

impl<S> SettlementSession<S>
where
    S: LedgerStore + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: ReconcilerConfig) -> Self {
        let (sender, _) = watch::channel(SessionState::default());
        Self {
            store,
            clock,
            config,
            state: Arc::new(sender),
            worker: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Replaces the loaded driver. The previous worker is cancelled before the
    /// new one starts.
    pub async fn load_driver(&mut self, driver_id: i64) -> LedgerResult<()> {
        if self.store.get_driver(driver_id).await?.is_none() {
            return Err(LedgerError::not_found("driver", driver_id));
        }

        self.cancel_worker();
        let mut generation = 0;
        self.state.send_modify(|state| {
            state.generation += 1;
            generation = state.generation;
            state.phase = SessionPhase::Loading;
            state.driver_id = Some(driver_id);
            state.settle_offered = false;
            state.view = None;
        });

        let worker = ReconcileWorker {
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
            driver_id,
            generation,
            coalesce_window: self.config.coalesce_window,
        };
        self.worker = Some(tokio::spawn(worker.run()));
        info!(driver_id, generation, "settlement session loading driver");
        Ok(())
    }

    pub fn unload(&mut self) {
        self.cancel_worker();
        self.state.send_modify(|state| {
            state.generation += 1;
            state.phase = SessionPhase::Idle;
            state.driver_id = None;
            state.settle_offered = false;
            state.view = None;
        });
    }

    /// Dismisses a pending settle prompt. It is not raised again for this load.
    pub fn decline_settlement(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.phase == SessionPhase::SettleOffered {
                state.phase = SessionPhase::Live;
                true
            } else {
                false
            }
        })
    }

    /// Settles every order of the loaded driver still open at write time.
    ///
    /// The session returns to `Live` whether or not the write succeeds.
    pub async fn commit_settlement(&self) -> LedgerResult<u64> {
        let (driver_id, generation) = self.loaded_driver()?;
        let settled_at = self.clock.now_db();
        let result = self.store.settle_driver(driver_id, &settled_at).await;

        self.state.send_if_modified(|state| {
            if state.generation == generation && state.phase == SessionPhase::SettleOffered {
                state.phase = SessionPhase::Live;
                true
            } else {
                false
            }
        });

        match &result {
            Ok(rows) => info!(driver_id, rows, %settled_at, "settlement committed"),
            Err(err) => warn!(driver_id, error = %err, "settlement failed"),
        }
        result
    }

    pub async fn record_payment(&self, request: PaymentRequest) -> LedgerResult<PaymentReceipt> {
        validate_payment_amount(request.amount)?;
        let (driver_id, balance) = {
            let state = self.state.borrow();
            match (&state.view, state.phase) {
                (Some(view), SessionPhase::Live | SessionPhase::SettleOffered) => {
                    (view.driver_id, view.figures.balance)
                }
                _ => return Err(LedgerError::validation("no driver is loaded")),
            }
        };
        if request.cap == PaymentCap::CurrentBalance && request.amount > balance {
            return Err(LedgerError::validation(format!(
                "payment of {} exceeds the outstanding balance of {balance}",
                request.amount
            )));
        }

        let payment_id = self
            .store
            .insert_payment(NewPayment {
                driver_id,
                amount: request.amount,
                method: request.method,
                date_time: self.clock.now_db(),
            })
            .await?;
        info!(driver_id, payment_id, amount = request.amount, method = %request.method, "payment recorded");

        Ok(PaymentReceipt {
            payment_id,
            driver_id,
            amount: request.amount,
            clears_balance: request.amount == balance,
        })
    }

    fn loaded_driver(&self) -> LedgerResult<(i64, u64)> {
        let state = self.state.borrow();
        match (state.driver_id, state.phase) {
            (Some(driver_id), SessionPhase::Live | SessionPhase::SettleOffered) => {
                Ok((driver_id, state.generation))
            }
            _ => Err(LedgerError::validation("no driver is loaded")),
        }
    }

    fn cancel_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl<S: ?Sized> Drop for SettlementSession<S> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
