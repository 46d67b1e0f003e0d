//! Console commands: parsing and dispatch against a reader and the session.

use std::io::{self, Write};

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{CommandError, MemoryUnit, NfcError};
use crate::nfc::card_trait::{Modulation, TagReader};
use crate::nfc::classic;
use crate::nfc::clone;
use crate::nfc::keys::KeyRecovery;
use crate::nfc::ndef;
use crate::nfc::tag::{TagFamily, TagInfo};
use crate::nfc::ultralight;
use crate::report;
use crate::session::Session;

type CommandResult = std::result::Result<(), CommandError>;

fn unsupported(operation: &'static str, tag: &TagInfo) -> NfcError {
    NfcError::Unsupported {
        operation,
        tag: tag.tag_type,
    }
}

const WRITE_USAGE: &str = "Usage: WRITE URL <url>  or  WRITE TEXT <text>";

/// What `WRITE` puts on the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePayload {
    Url(String),
    Text(String),
}

/// One parsed console line. Keywords are case-insensitive; `WRITE`
/// arguments keep their case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Scan,
    ScanAll,
    Dump,
    Keys,
    Ndef,
    Write(WritePayload),
    /// `WRITE` without a usable record type or content.
    WriteUsage,
    /// `WRITE` with a record type other than URL or TEXT.
    WriteUnknownType(String),
    CloneRead,
    CloneWrite,
    Help,
    Unknown(String),
}

impl Command {
    /// `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let upper = line.to_ascii_uppercase();
        let words: Vec<&str> = upper.split_whitespace().collect();
        let command = match words.as_slice() {
            ["HELP"] | ["?"] => Command::Help,
            ["SCAN"] => Command::Scan,
            ["SCANALL"] => Command::ScanAll,
            ["DUMP"] => Command::Dump,
            ["KEYS"] => Command::Keys,
            ["NDEF"] => Command::Ndef,
            ["CLONE", "READ"] => Command::CloneRead,
            ["CLONE", "WRITE"] => Command::CloneWrite,
            ["WRITE", ..] => Self::parse_write(&line["WRITE".len()..]),
            _ => Command::Unknown(line.to_owned()),
        };
        Some(command)
    }

    fn parse_write(args: &str) -> Self {
        let Some((kind, content)) = args.trim().split_once(char::is_whitespace) else {
            return Command::WriteUsage;
        };
        let content = content.trim();
        if content.is_empty() {
            return Command::WriteUsage;
        }
        match kind.to_ascii_uppercase().as_str() {
            "URL" => Command::Write(WritePayload::Url(content.to_owned())),
            "TEXT" => Command::Write(WritePayload::Text(content.to_owned())),
            _ => Command::WriteUnknownType(kind.to_owned()),
        }
    }
}

/// Line-oriented console over one reader.
///
/// Commands run one at a time to completion. Tag errors are printed and
/// never end the session.
pub struct Console<R> {
    reader: R,
    session: Session,
    config: Config,
    recovery: KeyRecovery<'static>,
}

impl<R: TagReader> Console<R> {
    pub fn new(reader: R, config: Config) -> Self {
        Self {
            reader,
            session: Session::new(),
            config,
            recovery: KeyRecovery::default(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Runs one console line, writing its report to `out`.
    ///
    /// Only a failure to write `out` is returned.
    pub fn execute(&mut self, line: &str, out: &mut impl Write) -> io::Result<()> {
        let Some(command) = Command::parse(line) else {
            return Ok(());
        };
        debug!(?command, "executing");
        match self.run(command, out) {
            Ok(()) => Ok(()),
            Err(CommandError::Nfc(err)) => {
                info!(%err, "command failed");
                writeln!(out, "{err}")
            }
            Err(CommandError::Output(err)) => Err(err),
        }
    }

    fn run(&mut self, command: Command, out: &mut impl Write) -> CommandResult {
        match command {
            Command::Scan => self.scan(out),
            Command::ScanAll => self.scan_all(out),
            Command::Dump => self.dump(out),
            Command::Keys => self.keys(out),
            Command::Ndef => self.ndef(out),
            Command::Write(payload) => self.write(out, payload),
            Command::WriteUsage => {
                self.session.require_tag()?;
                writeln!(out, "{WRITE_USAGE}")?;
                Ok(())
            }
            Command::WriteUnknownType(_) => {
                self.session.require_tag()?;
                writeln!(out, "Unknown record type. Use URL or TEXT.")?;
                Ok(())
            }
            Command::CloneRead => self.clone_read(out),
            Command::CloneWrite => self.clone_write(out),
            Command::Help => self.help(out),
            Command::Unknown(text) => {
                writeln!(out, "Unknown command: {text}")?;
                writeln!(out, "Type HELP for available commands.")?;
                Ok(())
            }
        }
    }

    /// Scanned tag, re-selected in the field after `prompt` is shown.
    fn present_tag(
        &mut self,
        out: &mut impl Write,
        prompt: &str,
    ) -> std::result::Result<TagInfo, CommandError> {
        let tag = self.session.require_tag()?.clone();
        writeln!(out, "{prompt}")?;
        if !self.reader.reselect() {
            return Err(NfcError::NotPresent.into());
        }
        Ok(tag)
    }

    fn scan(&mut self, out: &mut impl Write) -> CommandResult {
        writeln!(out, "Place tag on reader...")?;
        let Some(target) = self.reader.poll_target(self.config.scan_timeout()) else {
            writeln!(out, "No tag found.")?;
            return Ok(());
        };
        let tag = TagInfo::new(target.atqa, target.sak, &target.uid);
        info!(tag = tag.name, uid = %report::uid(tag.uid()), "tag scanned");
        report::write_tag(out, &tag)?;
        self.session.set_tag(tag);
        Ok(())
    }

    fn scan_all(&mut self, out: &mut impl Write) -> CommandResult {
        let timeout = self.config.scanall_timeout();
        writeln!(out, "Scanning all protocols...")?;
        writeln!(out)?;

        writeln!(out, "[ISO 14443A]")?;
        match self.reader.poll_target(timeout) {
            Some(target) => {
                let tag = TagInfo::new(target.atqa, target.sak, &target.uid);
                writeln!(out, "  Found: {}", tag.name)?;
                writeln!(out, "  UID: {}", report::uid(tag.uid()))?;
                writeln!(out, "  ATQA: 0x{:04X}  SAK: 0x{:02X}", tag.atqa, tag.sak)?;
                self.session.set_tag(tag);
            }
            None => writeln!(out, "  No ISO 14443A tag found.")?,
        }

        for (modulation, heading, label) in [
            (Modulation::Iso14443B, "[ISO 14443B]", "ISO 14443B"),
            (Modulation::Felica, "[FeliCa (212 kbps)]", "FeliCa"),
        ] {
            writeln!(out)?;
            writeln!(out, "{heading}")?;
            match self.reader.poll_modulation(modulation, timeout) {
                Some(id) => writeln!(out, "  Found {label}! ID: {}", report::uid(&id))?,
                None => writeln!(out, "  No {label} tag found.")?,
            }
        }
        Ok(())
    }

    fn dump(&mut self, out: &mut impl Write) -> CommandResult {
        let tag = self.present_tag(out, "Hold tag on reader for dump...")?;
        match tag.tag_type.family() {
            TagFamily::Classic => {
                let lines = classic::dump(&mut self.reader, &tag, &self.recovery)?;
                report::write_classic_dump(out, &lines)?;
            }
            TagFamily::Ultralight => {
                let pages = ultralight::dump(&mut self.reader);
                report::write_ultralight_dump(out, &pages)?;
            }
            TagFamily::Other => return Err(unsupported("Dump", &tag).into()),
        }
        Ok(())
    }

    fn keys(&mut self, out: &mut impl Write) -> CommandResult {
        let classic = self.session.current_tag().map(|tag| tag.tag_type.is_classic());
        if classic == Some(false) {
            writeln!(out, "Key audit only applies to MIFARE Classic.")?;
            return Ok(());
        }
        let tag = self.present_tag(out, "Hold tag on reader for key audit...")?;
        let rows = classic::audit(&mut self.reader, &tag, &self.recovery)?;
        report::write_audit(out, self.recovery.keys(), &rows)?;
        Ok(())
    }

    fn ndef(&mut self, out: &mut impl Write) -> CommandResult {
        let tag = self.present_tag(out, "Hold tag on reader...")?;
        let area = match tag.tag_type.family() {
            TagFamily::Ultralight => {
                writeln!(out, "--- NDEF Records ---")?;
                ultralight::read_ndef_area(&mut self.reader)
            }
            TagFamily::Classic => {
                writeln!(out, "--- NDEF Records ---")?;
                let area = classic::read_ndef_area(&mut self.reader, &tag, &self.recovery)?;
                if area.sectors.is_empty() {
                    writeln!(out, "No NDEF application in MAD.")?;
                    return Ok(());
                }
                for failure in &area.failures {
                    writeln!(out, "{}", report::read_failure(failure))?;
                }
                area.bytes
            }
            TagFamily::Other => return Err(unsupported("NDEF", &tag).into()),
        };

        let scan = ndef::parse_tlv_stream(&area);
        if !scan.found {
            writeln!(out, "No NDEF message found.")?;
            return Ok(());
        }
        for (index, record) in scan.records.iter().enumerate() {
            report::write_record(out, index + 1, record)?;
        }
        for issue in &scan.issues {
            report::write_parse_issue(out, issue)?;
        }
        Ok(())
    }

    fn write(&mut self, out: &mut impl Write, payload: WritePayload) -> CommandResult {
        self.session.require_tag()?;
        // Encoded before the reader is touched so oversize input fails fast.
        let message = match &payload {
            WritePayload::Url(url) => {
                let (prefix_code, tail) = ndef::split_uri_prefix(url);
                ndef::build_uri_record(prefix_code, tail)?
            }
            WritePayload::Text(text) => ndef::build_text_record(&self.config.text_language, text)?,
        };
        let (label, content) = match &payload {
            WritePayload::Url(url) => ("URL", url),
            WritePayload::Text(text) => ("Text", text),
        };

        let tag = self.present_tag(out, "Hold tag on reader for write...")?;
        match tag.tag_type.family() {
            TagFamily::Ultralight => {
                ultralight::write_ndef(&mut self.reader, &message)?;
                writeln!(out, "Written {label}: {content}")?;
            }
            TagFamily::Classic => {
                classic::write_ndef(&mut self.reader, &tag, &self.recovery, &message)?;
                writeln!(out, "Written {label} to Classic sector 1: {content}")?;
            }
            TagFamily::Other => return Err(unsupported("Write", &tag).into()),
        }
        Ok(())
    }

    fn clone_read(&mut self, out: &mut impl Write) -> CommandResult {
        let tag = self.present_tag(out, "Hold SOURCE tag on reader...")?;
        let clone::Capture { buffer, failures } = clone::capture(
            &mut self.reader,
            &tag,
            &self.recovery,
            self.config.clone_capacity,
        )?;
        let source_uid = report::uid(buffer.source_uid());
        let count = buffer.unit_count();
        let unit = buffer.unit();
        // Stored before reporting so an output error cannot lose it.
        self.session.store_clone(buffer);

        for failure in &failures {
            writeln!(out, "{} (zero-filled)", report::read_failure(failure))?;
        }

        let unit = match unit {
            MemoryUnit::Block => "blocks",
            MemoryUnit::Page => "pages",
        };
        writeln!(out, "Read {count} {unit} into clone buffer.")?;
        writeln!(out, "Source UID: {source_uid}")?;
        writeln!(out, "Now place TARGET tag and run: CLONE WRITE")?;
        Ok(())
    }

    fn clone_write(&mut self, out: &mut impl Write) -> CommandResult {
        if self.session.clone_buffer().is_none() {
            return Err(NfcError::CloneBufferEmpty.into());
        }
        writeln!(out, "Place blank TARGET tag on reader...")?;
        let Some(target) = self.reader.poll_target(self.config.scan_timeout()) else {
            writeln!(out, "No tag found.")?;
            return Ok(());
        };
        let target = TagInfo::new(target.atqa, target.sak, &target.uid);

        // The buffer leaves the session only once an apply has run to the end.
        let buffer = self.session.take_clone()?;
        let applied = clone::apply(&mut self.reader, &buffer, &target, &self.recovery);
        let unit = buffer.unit();
        let outcome = match applied {
            Ok(outcome) => outcome,
            Err(err) => {
                self.session.restore_clone(buffer);
                writeln!(out, "Target UID: {}", report::uid(target.uid()))?;
                return Err(err.into());
            }
        };
        writeln!(out, "Target UID: {}", report::uid(target.uid()))?;
        for failure in &outcome.failures {
            writeln!(out, "{}", report::apply_failure(failure))?;
        }
        match unit {
            MemoryUnit::Block => {
                writeln!(out, "Cloned {} data blocks to target.", outcome.written)?
            }
            MemoryUnit::Page => writeln!(out, "Cloned {} pages to target.", outcome.written)?,
        }
        Ok(())
    }

    fn help(&self, out: &mut impl Write) -> CommandResult {
        writeln!(out, "--- NFC Multi-Tool ---")?;
        writeln!(out, "Commands:")?;
        writeln!(out, "  SCAN       - Scan for an ISO 14443A tag")?;
        writeln!(out, "  SCANALL    - Scan ISO 14443A + 14443B + FeliCa")?;
        writeln!(out, "  DUMP       - Dump tag memory (after SCAN)")?;
        writeln!(out, "  KEYS       - Audit MIFARE Classic keys (after SCAN)")?;
        writeln!(out, "  NDEF       - Parse NDEF records (after SCAN)")?;
        writeln!(out, "  WRITE URL <url>    - Write URL to tag")?;
        writeln!(out, "  WRITE TEXT <text>  - Write text to tag")?;
        writeln!(out, "  CLONE READ   - Read tag data into clone buffer")?;
        writeln!(out, "  CLONE WRITE  - Write clone buffer to blank tag")?;
        writeln!(out, "  HELP       - Show this help")?;
        writeln!(out)?;
        match self.session.current_tag() {
            Some(tag) => writeln!(out, "Current tag: {} ({})", tag.name, report::uid(tag.uid()))?,
            None => writeln!(out, "No tag scanned yet.")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(Command::parse("scan"), Some(Command::Scan));
        assert_eq!(Command::parse("  Clone   Read "), Some(Command::CloneRead));
        assert_eq!(Command::parse("?"), Some(Command::Help));
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn write_keeps_content_case() {
        assert_eq!(
            Command::parse("write url https://Example.com/A"),
            Some(Command::Write(WritePayload::Url("https://Example.com/A".into())))
        );
        assert_eq!(
            Command::parse("WRITE TEXT Hello  World"),
            Some(Command::Write(WritePayload::Text("Hello  World".into())))
        );
    }

    #[test]
    fn malformed_write_is_a_usage_error() {
        assert_eq!(Command::parse("WRITE"), Some(Command::WriteUsage));
        assert_eq!(Command::parse("WRITE URL"), Some(Command::WriteUsage));
        assert_eq!(
            Command::parse("WRITE WIFI home"),
            Some(Command::WriteUnknownType("WIFI".into()))
        );
    }

    #[test]
    fn unknown_command_keeps_original_text() {
        assert_eq!(
            Command::parse("emulate"),
            Some(Command::Unknown("emulate".into()))
        );
        assert_eq!(
            Command::parse("WRITEX"),
            Some(Command::Unknown("WRITEX".into()))
        );
    }
}
