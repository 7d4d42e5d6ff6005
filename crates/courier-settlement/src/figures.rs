use courier_core::OrderWithNames;
use courier_core::money::{self, MoneyResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementFigures {
    pub total: i64,
    pub commission: i64,
    pub net: i64,
    pub paid: i64,
    pub balance: i64,
}

impl SettlementFigures {
    /// Nothing left to collect from the driver.
    pub fn is_cleared(&self) -> bool {
        self.balance <= 0
    }
}

/// Recomputes the whole view from the current source values.
///
/// Payments only count while there is something open to pay against, so a
/// payment figure left over from the previous window never shows as credit.
pub fn reconcile(
    unsettled: &[OrderWithNames],
    total_paid: i64,
    rate: f64,
) -> MoneyResult<SettlementFigures> {
    let total = money::sum_amounts(unsettled.iter().map(|order| order.amount))?;
    let commission = money::commission_amount(total, rate)?;
    let net = money::net_income(total, rate)?;
    let paid = if total > 0 { total_paid } else { 0 };
    let balance = money::balance(net, paid)?;

    Ok(SettlementFigures {
        total,
        commission,
        net,
        paid,
        balance,
    })
}

#[cfg(test)]
mod tests {
    use courier_core::MoneyError;

    use super::*;

    fn open_order(id: i64, amount: i64) -> OrderWithNames {
        OrderWithNames {
            id,
            customer_id: 1,
            driver_id: 1,
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

    #[test]
    fn sums_open_orders() {
        let orders = [open_order(1, 100), open_order(2, 400)];
        let figures = reconcile(&orders, 200, 10.0).unwrap();
        assert_eq!(
            figures,
            SettlementFigures {
                total: 500,
                commission: 50,
                net: 450,
                paid: 200,
                balance: 250,
            }
        );
        assert!(!figures.is_cleared());
    }

    #[test]
    fn overpayment_goes_negative() {
        let figures = reconcile(&[open_order(1, 100)], 100, 20.0).unwrap();
        assert_eq!(figures.net, 80);
        assert_eq!(figures.balance, -20);
        assert!(figures.is_cleared());
    }

    #[test]
    fn payments_without_open_orders_are_ignored() {
        let figures = reconcile(&[], 300, 10.0).unwrap();
        assert_eq!(figures, SettlementFigures::default());
    }

    #[test]
    fn overflow_is_reported() {
        let orders = [open_order(1, i64::MAX), open_order(2, 1)];
        assert_eq!(
            reconcile(&orders, 0, 10.0),
            Err(MoneyError::Overflow("total"))
        );
    }
}
