pub mod export;
pub mod summary;

pub use export::{export_file_name, write_orders_csv};
pub use summary::{ReportPeriod, ReportSummary, calculate_summary, filter_orders};
