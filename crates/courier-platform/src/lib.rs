pub mod auth;
pub mod config;
pub mod contracts;

pub use auth::{AuthError, AuthSession, PasscodePolicy, UnlockOutcome};
pub use config::ServiceConfig;
pub use contracts::{
    ChangePasscodeRequest, CreateNeighborhoodRequest, CreatePaymentRequest, CreatedResponse,
    ListResponse, LoadDriverRequest, SessionPaymentRequest, SessionPaymentResponse,
    SettleResponse, UnlockRequest, UnlockResponse,
};
