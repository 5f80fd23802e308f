pub mod app;
pub mod constants;
pub mod env;
pub mod output;
pub mod runtime;

pub use app::{exit_code, run, status};
pub use env::CliArgs;
pub use output::OutputFormat;
