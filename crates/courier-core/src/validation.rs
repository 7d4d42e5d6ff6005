//! Input checks applied before anything reaches the store.
//!
//! Optional contact fields accept the empty string.

use crate::error::{LedgerError, LedgerResult};
use crate::models::{CustomerProfile, DriverProfile, OrderDraft, OrderEdit};

pub fn is_valid_national_id(id: &str) -> bool {
    if id.is_empty() {
        return true;
    }
    if id.len() != 10 || !id.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let digits: Vec<u32> = id.bytes().map(|b| u32::from(b - b'0')).collect();
    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    let sum: u32 = digits[..9]
        .iter()
        .enumerate()
        .map(|(i, d)| d * (10 - i as u32))
        .sum();
    let remainder = sum % 11;
    let check = digits[9];
    if remainder < 2 {
        check == remainder
    } else {
        check == 11 - remainder
    }
}

pub fn is_valid_phone(phone: &str) -> bool {
    phone.is_empty()
        || (phone.len() == 11
            && phone.starts_with("09")
            && phone.bytes().all(|b| b.is_ascii_digit()))
}

pub fn is_valid_plate(plate: &str) -> bool {
    plate.is_empty() || (7..=9).contains(&plate.chars().count())
}

pub fn is_valid_commission(percent: f64) -> bool {
    percent.is_finite() && (0.0..=100.0).contains(&percent)
}

pub fn require_name(field: &str, value: &str) -> LedgerResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

pub fn validate_order_amount(amount: i64) -> LedgerResult<()> {
    if amount < 0 {
        return Err(LedgerError::validation("order amount must not be negative"));
    }
    Ok(())
}

pub fn validate_payment_amount(amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::validation("payment amount must be positive"));
    }
    Ok(())
}

/// Returns a trimmed copy of the profile if every field passes.
pub fn validate_driver(profile: &DriverProfile) -> LedgerResult<DriverProfile> {
    let name = require_name("driver name", &profile.name)?;
    let national_id = profile.national_id.trim().to_string();
    let plate = profile.plate.trim().to_string();
    let phone = profile.phone.trim().to_string();

    if !is_valid_national_id(&national_id) {
        return Err(LedgerError::validation("national id is invalid"));
    }
    if !is_valid_plate(&plate) {
        return Err(LedgerError::validation("plate must be 7 to 9 characters"));
    }
    if !is_valid_phone(&phone) {
        return Err(LedgerError::validation(
            "phone must be 11 digits starting with 09",
        ));
    }
    if !is_valid_commission(profile.commission) {
        return Err(LedgerError::validation(
            "commission must be between 0 and 100",
        ));
    }

    Ok(DriverProfile {
        name,
        national_id,
        plate,
        phone,
        address: profile.address.trim().to_string(),
        commission: profile.commission,
    })
}

pub fn validate_customer(profile: &CustomerProfile) -> LedgerResult<CustomerProfile> {
    let name = require_name("customer name", &profile.name)?;
    let national_id = profile.national_id.trim().to_string();
    let phone = profile.phone.trim().to_string();

    if !is_valid_national_id(&national_id) {
        return Err(LedgerError::validation("national id is invalid"));
    }
    if !is_valid_phone(&phone) {
        return Err(LedgerError::validation(
            "phone must be 11 digits starting with 09",
        ));
    }

    Ok(CustomerProfile {
        name,
        national_id,
        phone,
        address: profile.address.trim().to_string(),
    })
}

pub fn validate_order_draft(draft: &OrderDraft) -> LedgerResult<OrderDraft> {
    validate_order_amount(draft.amount)?;
    Ok(OrderDraft {
        customer_name: require_name("customer name", &draft.customer_name)?,
        driver_name: require_name("driver name", &draft.driver_name)?,
        neighborhood_name: require_name("neighborhood name", &draft.neighborhood_name)?,
        amount: draft.amount,
        description: draft.description.trim().to_string(),
    })
}

pub fn validate_order_edit(edit: &OrderEdit) -> LedgerResult<OrderEdit> {
    validate_order_amount(edit.amount)?;
    Ok(OrderEdit {
        description: edit.description.trim().to_string(),
        ..edit.clone()
    })
}
