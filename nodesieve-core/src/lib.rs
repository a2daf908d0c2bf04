pub mod check;
pub mod gather;
pub mod persist;
pub mod rank;
pub mod report;
pub mod sources;

pub use check::{CheckError, CheckOptions, CheckProgressCallback, Checker, ProbeSettings};
pub use report::{CheckOutcome, CheckReport, ReportFormat, generate_check_report};
