use std::borrow::Cow;
use std::io;

use chrono::NaiveDateTime;
use courier_core::OrderWithNames;
use courier_core::time::EXPORT_STAMP_FORMAT;
use csv::{QuoteStyle, WriterBuilder};

const HEADER: [&str; 8] = [
    "ID",
    "Customer",
    "Driver",
    "Neighborhood",
    "Amount",
    "Description",
    "DateTime",
    "Settled",
];

const FORMULA_TRIGGERS: [char; 6] = ['=', '+', '-', '@', '|', '%'];

/// Prefixes an apostrophe when a spreadsheet would read the value as a formula.
pub fn guard_formula(value: &str) -> Cow<'_, str> {
    if value.starts_with(FORMULA_TRIGGERS) {
        Cow::Owned(format!("'{value}"))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn export_file_name(at: NaiveDateTime) -> String {
    format!("orders_{}.csv", at.format(EXPORT_STAMP_FORMAT))
}

/// Writes every field quoted, with embedded quotes doubled.
pub fn write_orders_csv<W: io::Write>(writer: W, orders: &[OrderWithNames]) -> csv::Result<()> {
    let mut csv = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(writer);

    csv.write_record(HEADER)?;
    for order in orders {
        let id = order.id.to_string();
        let amount = order.amount.to_string();
        let settled = order.settled.to_string();
        let customer = guard_formula(&order.customer_name);
        let driver = guard_formula(&order.driver_name);
        let neighborhood = guard_formula(&order.neighborhood_name);
        let description = guard_formula(&order.description);
        let date_time = guard_formula(&order.date_time);
        csv.write_record([
            id.as_str(),
            &*customer,
            &*driver,
            &*neighborhood,
            amount.as_str(),
            &*description,
            &*date_time,
            settled.as_str(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}
