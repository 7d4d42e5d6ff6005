use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Months, NaiveDateTime};
use courier_core::money::{self, MoneyResult};
use courier_core::time::parse_db_or_epoch;
use courier_core::{Driver, LedgerError, Order};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Today,
    Week,
    Month,
}

impl ReportPeriod {
    fn contains(self, at: NaiveDateTime, now: NaiveDateTime) -> bool {
        if at > now {
            return false;
        }
        match self {
            Self::Today => at.date() == now.date(),
            Self::Week => at >= now - Duration::days(7),
            Self::Month => now
                .checked_sub_months(Months::new(1))
                .is_some_and(|start| at >= start),
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
        })
    }
}

impl FromStr for ReportPeriod {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            _ => Err(LedgerError::validation(
                "period must be today, week, or month",
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportSummary {
    pub total_orders: usize,
    pub total_sales: i64,
    pub total_commission: i64,
    pub net_income: i64,
    pub settled: i64,
    pub unsettled: i64,
}

/// Orders whose timestamp falls in `period` ending at `now`.
///
/// Timestamps after `now` are excluded. Unparseable timestamps read as epoch
/// start and so fall outside every window.
pub fn filter_orders<'a>(
    orders: &'a [Order],
    period: ReportPeriod,
    now: NaiveDateTime,
) -> Vec<&'a Order> {
    orders
        .iter()
        .filter(|order| period.contains(parse_db_or_epoch(&order.date_time), now))
        .collect()
}

/// Totals over `orders`, charging each order at its driver's current rate.
pub fn calculate_summary<'a, I>(orders: I, drivers: &[Driver]) -> MoneyResult<ReportSummary>
where
    I: IntoIterator<Item = &'a Order>,
{
    let rates: HashMap<i64, f64> = drivers
        .iter()
        .map(|driver| (driver.id, driver.commission))
        .collect();

    let mut summary = ReportSummary::default();
    for order in orders {
        let rate = rates.get(&order.driver_id).copied().unwrap_or(0.0);
        let commission = money::commission_amount(order.amount, rate)?;

        summary.total_orders += 1;
        summary.total_sales = money::sum_amounts([summary.total_sales, order.amount])?;
        summary.total_commission = money::sum_amounts([summary.total_commission, commission])?;
        if order.settled {
            summary.settled = money::sum_amounts([summary.settled, order.amount])?;
        } else {
            summary.unsettled = money::sum_amounts([summary.unsettled, order.amount])?;
        }
    }
    summary.net_income = money::balance(summary.total_sales, summary.total_commission)?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use courier_core::time::format_db;

    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 6)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn order(id: i64, driver_id: i64, amount: i64, date_time: &str, settled: bool) -> Order {
        Order {
            id,
            customer_id: 1,
            driver_id,
            neighborhood_id: 1,
            amount,
            description: String::new(),
            date_time: date_time.to_string(),
            settled,
            settled_at: settled.then(|| date_time.to_string()),
            status: "pending".to_string(),
        }
    }

    fn driver(id: i64, name: &str, commission: f64) -> Driver {
        Driver {
            id,
            name: name.to_string(),
            national_id: String::new(),
            plate: String::new(),
            phone: String::new(),
            address: String::new(),
            commission,
        }
    }

    fn ids(orders: &[&Order]) -> Vec<i64> {
        orders.iter().map(|order| order.id).collect()
    }

    #[test]
    fn summary_aggregates_totals() {
        let drivers = vec![driver(1, "Ali", 10.0), driver(2, "Sara", 20.0)];
        let orders = vec![
            order(1, 1, 100, "2026-02-06 10:00:00", true),
            order(2, 2, 200, "2026-02-06 11:00:00", false),
            order(3, 2, 50, "2026-02-05 09:00:00", true),
        ];

        let summary = calculate_summary(&orders, &drivers).unwrap();
        assert_eq!(
            summary,
            ReportSummary {
                total_orders: 3,
                total_sales: 350,
                total_commission: 60,
                net_income: 290,
                settled: 150,
                unsettled: 200,
            }
        );
    }

    #[test]
    fn summary_charges_unknown_drivers_nothing() {
        let orders = vec![order(1, 42, 100, "2026-02-06 10:00:00", false)];
        let summary = calculate_summary(&orders, &[]).unwrap();
        assert_eq!(summary.total_commission, 0);
        assert_eq!(summary.net_income, 100);
    }

    #[test]
    fn filter_by_period() {
        let now = now();
        let orders = vec![
            order(1, 1, 100, &format_db(now), true),
            order(2, 1, 100, &format_db(now - Duration::days(3)), true),
            order(3, 1, 100, &format_db(now - Duration::days(10)), true),
            order(4, 1, 100, &format_db(now - Duration::days(40)), true),
        ];

        assert_eq!(ids(&filter_orders(&orders, ReportPeriod::Today, now)), vec![1]);
        assert_eq!(ids(&filter_orders(&orders, ReportPeriod::Week, now)), vec![1, 2]);
        assert_eq!(
            ids(&filter_orders(&orders, ReportPeriod::Month, now)),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn filter_excludes_future_and_malformed() {
        let now = now();
        let orders = vec![
            order(1, 1, 100, &format_db(now + Duration::minutes(5)), false),
            order(2, 1, 100, "06/02/2026 10:00", false),
            order(3, 1, 100, &format_db(now - Duration::hours(2)), false),
        ];

        for period in [ReportPeriod::Today, ReportPeriod::Week, ReportPeriod::Month] {
            assert_eq!(ids(&filter_orders(&orders, period, now)), vec![3]);
        }
    }

    #[test]
    fn week_boundary_is_inclusive() {
        let now = now();
        let orders = vec![
            order(1, 1, 100, &format_db(now - Duration::days(7)), false),
            order(2, 1, 100, &format_db(now - Duration::days(7) - Duration::seconds(1)), false),
        ];
        assert_eq!(ids(&filter_orders(&orders, ReportPeriod::Week, now)), vec![1]);
    }

    #[test]
    fn period_parses() {
        assert_eq!("Week".parse::<ReportPeriod>().unwrap(), ReportPeriod::Week);
        assert_eq!(ReportPeriod::Month.to_string(), "month");
        assert!("year".parse::<ReportPeriod>().is_err());
    }
}
