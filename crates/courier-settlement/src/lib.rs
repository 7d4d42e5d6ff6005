//! Live per-driver settlement view and the settle transition.

pub mod figures;
pub mod session;
mod worker;

pub use figures::{SettlementFigures, reconcile};
pub use session::{
    DriverView, PaymentCap, PaymentReceipt, PaymentRequest, ReconcilerConfig, SessionPhase,
    SessionState, SettlementSession,
};
