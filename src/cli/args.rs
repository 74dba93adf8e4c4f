//! CLI argument parsing using clap.

use clap::{
    Parser,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Watch library folders and publish batched change notifications
#[derive(Parser, Debug)]
#[command(
    name = "shelfwatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch library folders and publish batched change notifications to MQTT",
    long_about = "Recursively watches the directories of each configured library and, \
                  after each collection window, publishes one notification naming the \
                  libraries that changed together with the raw events.",
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to the configuration file (JSON, or TOML with a .toml extension)
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Log payloads instead of publishing to the broker
    #[arg(long)]
    pub dry_run: bool,

    /// Collection window in seconds (overrides config)
    #[arg(long, value_name = "SECS")]
    pub window_secs: Option<u64>,
}
