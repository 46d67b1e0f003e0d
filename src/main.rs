//! NFC multi-tool console.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use clap::Parser;
use nfc_multitool::commands::Console;
use nfc_multitool::config::{Config, ReaderKind};
use nfc_multitool::logging::{init_logging, LogConfig};
use nfc_multitool::nfc::{self, TagReader};
use tracing::info;

mod cli;

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();
    let log_config = log_config_from_cli(&cli);
    if let Err(error) = init_logging(&log_config) {
        eprintln!("error: failed to initialize logging: {error}");
        std::process::exit(1);
    }
    if let Err(error) = run(&cli) {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn log_config_from_cli(cli: &Cli) -> LogConfig {
    LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        use_env_filter: !cli.verbosity.is_present(),
        format: cli.log_format,
        with_ansi: io::stderr().is_terminal(),
        ..LogConfig::default()
    }
}

/// Config file first, then command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(reader) = cli.reader {
        config.reader = reader;
    }
    if let Some(simulate) = cli.simulate {
        config.reader = ReaderKind::Simulated;
        config.simulate = simulate;
    }
    if let Some(language) = &cli.text_language {
        config.text_language.clone_from(language);
    }
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let reader = nfc::open_reader(&config).context("failed to open the NFC reader")?;
    info!(reader = ?config.reader, "reader opened");
    let mut console = Console::new(reader, config);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if !cli.exec.is_empty() {
        for line in &cli.exec {
            console.execute(line, &mut out)?;
        }
        return Ok(());
    }

    writeln!(out, "NFC Multi-Tool ready.")?;
    writeln!(out, "Type HELP for commands.")?;
    repl(&mut console, io::stdin().lock(), &mut out)
}

fn repl<R: TagReader>(
    console: &mut Console<R>,
    input: impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    write!(out, "> ")?;
    out.flush()?;
    for line in input.lines() {
        let line = line.context("failed to read stdin")?;
        console.execute(&line, out)?;
        write!(out, "> ")?;
        out.flush()?;
    }
    writeln!(out)?;
    Ok(())
}
