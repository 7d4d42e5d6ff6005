use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Placeholder name returned when an order references a party that no longer exists.
pub const UNKNOWN_NAME: &str = "__UNKNOWN__";

pub const DEFAULT_ORDER_STATUS: &str = "pending";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Driver {
    pub id: i64,
    pub name: String,
    pub national_id: String,
    pub plate: String,
    pub phone: String,
    pub address: String,
    pub commission: f64,
}

/// Fields accepted when creating or editing a driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DriverProfile {
    pub name: String,
    #[serde(default)]
    pub national_id: String,
    #[serde(default)]
    pub plate: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub commission: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub national_id: String,
    pub phone: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerProfile {
    pub name: String,
    #[serde(default)]
    pub national_id: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Neighborhood {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub driver_id: i64,
    pub neighborhood_id: i64,
    pub amount: i64,
    pub description: String,
    pub date_time: String,
    pub settled: bool,
    pub settled_at: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderWithNames {
    pub id: i64,
    pub customer_id: i64,
    pub driver_id: i64,
    pub neighborhood_id: i64,
    pub amount: i64,
    pub description: String,
    pub date_time: String,
    pub settled: bool,
    pub settled_at: Option<String>,
    pub status: String,
    pub customer_name: String,
    pub driver_name: String,
    pub neighborhood_name: String,
}

impl OrderWithNames {
    pub fn to_order(&self) -> Order {
        Order {
            id: self.id,
            customer_id: self.customer_id,
            driver_id: self.driver_id,
            neighborhood_id: self.neighborhood_id,
            amount: self.amount,
            description: self.description.clone(),
            date_time: self.date_time.clone(),
            settled: self.settled,
            settled_at: self.settled_at.clone(),
            status: self.status.clone(),
        }
    }
}

/// An order as entered by name. Missing parties are created on insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderDraft {
    pub customer_name: String,
    pub driver_name: String,
    pub neighborhood_name: String,
    pub amount: i64,
    #[serde(default)]
    pub description: String,
}

/// Editable fields of an existing order, by reference id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderEdit {
    pub customer_id: i64,
    pub driver_id: i64,
    pub neighborhood_id: i64,
    pub amount: i64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cash" => Ok(Self::Cash),
            "card" => Ok(Self::Card),
            other => Err(LedgerError::validation(format!(
                "payment method must be cash or card, got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payment {
    pub id: i64,
    pub driver_id: i64,
    pub amount: i64,
    pub method: PaymentMethod,
    pub date_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPayment {
    pub driver_id: i64,
    pub amount: i64,
    pub method: PaymentMethod,
    pub date_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentWithDriverName {
    pub id: i64,
    pub driver_id: i64,
    pub amount: i64,
    pub method: PaymentMethod,
    pub date_time: String,
    pub driver_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommissionHistory {
    pub id: i64,
    pub driver_id: i64,
    pub old_commission: f64,
    pub new_commission: f64,
    pub date_time: String,
}
