pub mod error;
pub mod models;
pub mod money;
pub mod storage;
pub mod time;
pub mod validation;

pub use error::{BoxError, LedgerError, LedgerResult};
pub use models::{
    CommissionHistory, Customer, CustomerProfile, DEFAULT_ORDER_STATUS, Driver, DriverProfile,
    Neighborhood, NewPayment, Order, OrderDraft, OrderEdit, OrderWithNames, Payment,
    PaymentMethod, PaymentWithDriverName, UNKNOWN_NAME,
};
pub use money::{MoneyError, MoneyResult};
pub use storage::{LedgerStore, LiveStream};
pub use time::{Clock, FixedClock, SystemClock};
