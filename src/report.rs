//! Console text formats.
//!
//! Hex is two-digit uppercase, UIDs and keys are colon-separated, and dump
//! rows are fixed-width `address | hex | ASCII` columns.

use std::io::{self, Write};

use crate::error::{MemoryUnit, NfcError};
use crate::nfc::classic::{BlockLine, BlockOutcome};
use crate::nfc::keys::{KnownKey, SectorAudit};
use crate::nfc::ndef::{self, NdefRecord, ParseIssue, RecordContent, TextBody};
use crate::nfc::tag::TagInfo;

/// Width of the hex column of a block row: sixteen `XX ` cells.
const BLOCK_HEX_WIDTH: usize = 16 * 3;

pub fn hex(bytes: &[u8], separator: &str) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(separator)
}

pub fn uid(bytes: &[u8]) -> String {
    hex(bytes, ":")
}

fn hex_cells(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X} ")).collect()
}

fn ascii(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| ndef::printable(b)).collect()
}

pub fn write_tag(out: &mut impl Write, tag: &TagInfo) -> io::Result<()> {
    writeln!(out, "Tag: {}", tag.name)?;
    writeln!(out, "  UID ({}): {}", tag.uid_len(), uid(tag.uid()))?;
    writeln!(out, "  ATQA: 0x{:04X}  SAK: 0x{:02X}", tag.atqa, tag.sak)
}

pub fn block_row(line: &BlockLine) -> String {
    let block = line.block;
    match line.outcome {
        BlockOutcome::Data(data) => {
            format!("{block:>3} | {:<BLOCK_HEX_WIDTH$}| {}", hex_cells(&data), ascii(&data))
        }
        BlockOutcome::AuthFailed => format!("{block:>3} | {:<BLOCK_HEX_WIDTH$}|", "AUTH FAILED"),
        BlockOutcome::ReadError => format!("{block:>3} | {:<BLOCK_HEX_WIDTH$}|", "READ ERROR"),
    }
}

pub fn write_classic_dump(out: &mut impl Write, lines: &[BlockLine]) -> io::Result<()> {
    writeln!(out, "--- MIFARE Classic Memory Dump ---")?;
    writeln!(out, "Blk | {:<BLOCK_HEX_WIDTH$}| ASCII", "Data")?;
    writeln!(out, "----+-{}+------------------", "-".repeat(BLOCK_HEX_WIDTH))?;
    for line in lines {
        writeln!(out, "{}", block_row(line))?;
    }
    Ok(())
}

pub fn page_row(page: u16, data: &[u8; 4]) -> String {
    format!("{page:>3}  | {}| {}", hex_cells(data), ascii(data))
}

pub fn write_ultralight_dump(out: &mut impl Write, pages: &[(u16, [u8; 4])]) -> io::Result<()> {
    writeln!(out, "--- Ultralight / NTAG Memory Dump ---")?;
    writeln!(out, "Page | Data        | ASCII")?;
    writeln!(out, "-----+-------------+------")?;
    for (page, data) in pages {
        writeln!(out, "{}", page_row(*page, data))?;
    }
    Ok(())
}

/// A found key is 21 columns wide. A miss in the A column is padded to 22.
fn key_cell(keys: &[KnownKey], index: Option<usize>, label: &str, miss: &str) -> String {
    match index.and_then(|i| keys.get(i)) {
        Some(known) => format!("{} ({label})", hex(&known.key, ":")),
        None => miss.to_owned(),
    }
}

pub fn audit_row(keys: &[KnownKey], audit: &SectorAudit) -> String {
    format!(
        "{:>2}   | {} | {}",
        audit.sector,
        key_cell(keys, audit.key_a, "A", "-- none matched --    "),
        key_cell(keys, audit.key_b, "B", "-- none matched --")
    )
}

pub fn write_audit(
    out: &mut impl Write,
    keys: &[KnownKey],
    rows: &[SectorAudit],
) -> io::Result<()> {
    writeln!(out, "--- MIFARE Classic Key Audit ---")?;
    writeln!(out, "Sect | Key A found              | Key B found")?;
    writeln!(out, "-----+--------------------------+--------------------------")?;
    for row in rows {
        writeln!(out, "{}", audit_row(keys, row))?;
    }
    writeln!(out)?;
    writeln!(out, "Keys tested: {} known keys x 2 (A+B) per sector", keys.len())
}

pub fn write_record(out: &mut impl Write, number: usize, record: &NdefRecord) -> io::Result<()> {
    writeln!(out, "Record #{number}")?;
    writeln!(out, "  TNF: {}", ndef::tnf_name(record.tnf))?;
    if !record.type_bytes.is_empty() {
        writeln!(out, "  Type: {}", String::from_utf8_lossy(&record.type_bytes))?;
    }
    match record.content() {
        RecordContent::Uri { prefix, tail, .. } => writeln!(out, "  URI: {prefix}{tail}"),
        RecordContent::Text { language, body } => {
            writeln!(out, "  Lang: {language}")?;
            match body {
                TextBody::Utf8(text) => writeln!(out, "  Text: {text}"),
                TextBody::Utf16 { byte_len } => {
                    writeln!(out, "  Text: <UTF-16, {byte_len} bytes>")
                }
            }
        }
        RecordContent::Opaque { dump } => writeln!(out, "  Data: {dump}"),
    }
}

pub fn write_parse_issue(out: &mut impl Write, issue: &ParseIssue) -> io::Result<()> {
    match issue {
        ParseIssue::Truncated {
            offset,
            declared,
            available,
        } => writeln!(
            out,
            "Warning: length {declared} at offset {offset} exceeds the {available} bytes read, clamped."
        ),
        ParseIssue::Unparseable { offset } => {
            writeln!(out, "Warning: unparseable NDEF record at offset {offset}.")
        }
    }
}

/// One line per skipped sector or failed write of a clone apply.
/// A sector or block left out of a read.
pub fn read_failure(err: &NfcError) -> String {
    match err {
        NfcError::AuthFailed { sector } => format!("Auth failed on sector {sector}"),
        NfcError::ReadFailed { block } => format!("Read failed at block {block}"),
        other => other.to_string(),
    }
}

pub fn apply_failure(err: &NfcError) -> String {
    match err {
        NfcError::WriteFailed {
            unit: MemoryUnit::Page,
            index,
        } => format!("Write failed at page {index} (may be config/lock page)"),
        NfcError::AuthFailed { sector } => format!("Auth failed on target sector {sector}"),
        other => other.to_string(),
    }
}
