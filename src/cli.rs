//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use nfc_multitool::config::{ReaderKind, SimulatedTagKind};
use nfc_multitool::logging::LogFormat;

#[derive(Parser)]
#[command(
    name = "nfc-multitool",
    version,
    about = "Interactive NFC tag console",
    long_about = "Interactive NFC tag console.\n\n\
                  Reads commands (SCAN, DUMP, KEYS, NDEF, WRITE, CLONE READ/WRITE) from stdin\n\
                  and reports on stdout. Type HELP at the prompt for the command list."
)]
pub struct Cli {
    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(long = "log-format", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// JSON configuration file.
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Reader backend (overrides the config file).
    #[arg(long = "reader", value_enum)]
    pub reader: Option<ReaderKind>,

    /// Tag placed in the simulated field (implies --reader simulated).
    #[arg(long = "simulate", value_enum)]
    pub simulate: Option<SimulatedTagKind>,

    /// Language code of WRITE TEXT records.
    #[arg(long = "text-language", value_name = "CODE")]
    pub text_language: Option<String>,

    /// Run these console lines in order and exit instead of reading stdin.
    #[arg(short = 'e', long = "exec", value_name = "LINE")]
    pub exec: Vec<String>,
}
