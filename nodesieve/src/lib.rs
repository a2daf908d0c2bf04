// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

pub use handlers::{CheckArgs, expand_path, outcome_exit_code, run_check};

pub use nodesieve_core::{CheckOptions, CheckOutcome, CheckReport, ReportFormat};
