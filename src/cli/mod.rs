//! Command-line entry point: argument parsing and the daemon runner.

pub mod args;
pub mod run;

pub use args::Cli;
pub use run::{load_settings, run};
