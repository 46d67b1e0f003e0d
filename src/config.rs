//! Runtime configuration, loaded from an optional JSON file and then
//! overridden by command-line flags.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Which reader backend drives the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReaderKind {
    /// In-memory tag simulator.
    Simulated,
    /// PN53x reader behind PC/SC (feature `pcsc`).
    Pcsc,
    /// Any libnfc device (feature `libnfc`).
    Libnfc,
}

impl Default for ReaderKind {
    fn default() -> Self {
        if cfg!(feature = "pcsc") {
            ReaderKind::Pcsc
        } else if cfg!(feature = "libnfc") {
            ReaderKind::Libnfc
        } else {
            ReaderKind::Simulated
        }
    }
}

/// Tag placed in the simulated field at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SimulatedTagKind {
    #[default]
    Classic1k,
    Classic4k,
    Ultralight,
    /// No tag in the field.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SCAN and CLONE WRITE poll timeout.
    pub scan_timeout_ms: u64,
    /// Re-select timeout between failed authentication trials.
    pub reselect_timeout_ms: u64,
    /// Per-protocol poll timeout of SCANALL.
    pub scanall_timeout_ms: u64,
    /// Language code of `WRITE TEXT` records.
    pub text_language: String,
    /// Largest snapshot CLONE READ accepts, in bytes.
    pub clone_capacity: usize,
    pub reader: ReaderKind,
    pub simulate: SimulatedTagKind,
    /// Substring of the PC/SC reader name to use.
    pub pcsc_reader: Option<String>,
    /// libnfc connection string, e.g. `pn532_uart:/dev/ttyUSB0`.
    pub libnfc_device: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 10_000,
            reselect_timeout_ms: 500,
            scanall_timeout_ms: 3_000,
            text_language: "en".to_owned(),
            clone_capacity: 4096,
            reader: ReaderKind::default(),
            simulate: SimulatedTagKind::default(),
            pcsc_reader: None,
            libnfc_device: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn reselect_timeout(&self) -> Duration {
        Duration::from_millis(self.reselect_timeout_ms)
    }

    pub fn scanall_timeout(&self) -> Duration {
        Duration::from_millis(self.scanall_timeout_ms)
    }
}
