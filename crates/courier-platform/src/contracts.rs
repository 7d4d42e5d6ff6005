use courier_core::PaymentMethod;
use courier_settlement::PaymentReceipt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNeighborhoodRequest {
    pub name: String,
}

/// A payment entered outside the settlement screen. `date_time` defaults to now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub driver_id: i64,
    pub amount: i64,
    pub method: PaymentMethod,
    pub date_time: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoadDriverRequest {
    pub driver_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionPaymentRequest {
    pub amount: i64,
    pub method: PaymentMethod,
    /// Reject amounts above the balance currently shown.
    #[serde(default)]
    pub cap_to_balance: bool,
    /// Settle right away when the payment clears the balance exactly.
    #[serde(default)]
    pub settle_when_cleared: bool,
}

/// The payment is committed whenever this is returned. A requested settlement
/// that failed afterwards is reported in `settlement_error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPaymentResponse {
    pub receipt: PaymentReceipt,
    pub settled_orders: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettleResponse {
    pub settled_orders: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockRequest {
    pub passcode: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnlockResponse {
    pub authenticated: bool,
    pub needs_change: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePasscodeRequest {
    pub current_passcode: String,
    pub new_passcode: String,
}
