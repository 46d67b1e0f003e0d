//! TLV framing and NDEF record codec.
//!
//! Tag memory holds a sequence of TLV units. `0x00` is padding with no length
//! field, `0xFE` terminates the scan, and `0x03` wraps an NDEF message: a
//! concatenation of records, each laid out as
//!
//! ```text
//! header | type_len | payload_len (1 or 4 bytes) | [id_len] | type | [id] | payload
//! ```

use tracing::{debug, warn};

use crate::error::{NfcError, Result};

pub const TLV_NULL: u8 = 0x00;
pub const TLV_NDEF_MESSAGE: u8 = 0x03;
pub const TLV_TERMINATOR: u8 = 0xFE;

/// Working-buffer bound for a built message, TLV framing included.
pub const MAX_MESSAGE_LEN: usize = 255;

/// TLV tag, TLV length, record header, type length, payload length, type byte
/// and terminator around a single short well-known record.
const SINGLE_RECORD_OVERHEAD: usize = 7;

/// Largest payload a built record may carry.
pub const MAX_PAYLOAD_LEN: usize = MAX_MESSAGE_LEN - SINGLE_RECORD_OVERHEAD;

/// Longest language code the Text status byte can describe.
pub const MAX_LANGUAGE_LEN: usize = 0x3F;

/// Opaque payloads are reported up to this many bytes.
pub const DUMP_LIMIT: usize = 64;

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

pub const TNF_WELL_KNOWN: u8 = 0x01;

const TEXT_UTF16: u8 = 0x80;
const TEXT_LANGUAGE_MASK: u8 = 0x3F;

/// URI identifier codes 0x00..=0x23.
pub const URI_PREFIXES: [&str; 36] = [
    "",
    "http://www.",
    "https://www.",
    "http://",
    "https://",
    "tel:",
    "mailto:",
    "ftp://anonymous:anonymous@",
    "ftp://ftp.",
    "ftps://",
    "sftp://",
    "smb://",
    "nfs://",
    "ftp://",
    "dav://",
    "news:",
    "telnet://",
    "imap:",
    "rtsp://",
    "urn:",
    "pop:",
    "sip:",
    "sips:",
    "tftp:",
    "btspp://",
    "btl2cap://",
    "btgoep://",
    "tcpobex://",
    "irdaobex://",
    "file://",
    "urn:epc:id:",
    "urn:epc:tag:",
    "urn:epc:pat:",
    "urn:epc:raw:",
    "urn:epc:",
    "urn:nfc:",
];

const TNF_NAMES: [&str; 8] = [
    "Empty",
    "Well-known",
    "Media",
    "Absolute URI",
    "External",
    "Unknown",
    "Unchanged",
    "Reserved",
];

pub fn tnf_name(tnf: u8) -> &'static str {
    TNF_NAMES[usize::from(tnf & TNF_MASK)]
}

/// One parsed TLV unit, addressed into the scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvBlock {
    pub tag: u8,
    /// Length as declared on the tag.
    pub length: u16,
    pub value_offset: usize,
    /// Length actually available, after clamping to the buffer end.
    pub value_length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: u8,
    pub type_bytes: Vec<u8>,
    pub id_bytes: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub message_begin: bool,
    pub message_end: bool,
    pub chunked: bool,
    pub short_record: bool,
}

/// Decoded text body of a Text record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextBody {
    Utf8(String),
    /// UTF-16 text is not decoded; only its size is reported.
    Utf16 { byte_len: usize },
}

/// Semantic view of a record payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordContent {
    Uri {
        prefix_code: u8,
        prefix: &'static str,
        tail: String,
    },
    Text {
        language: String,
        body: TextBody,
    },
    /// Printable-ASCII rendering of any other payload, cut at [`DUMP_LIMIT`].
    Opaque { dump: String },
}

impl RecordContent {
    /// Full URI for URI records.
    pub fn uri(&self) -> Option<String> {
        match self {
            RecordContent::Uri { prefix, tail, .. } => Some(format!("{prefix}{tail}")),
            RecordContent::Text { .. } | RecordContent::Opaque { .. } => None,
        }
    }
}

impl NdefRecord {
    pub fn is_well_known(&self, record_type: &[u8]) -> bool {
        self.tnf == TNF_WELL_KNOWN && self.type_bytes == record_type
    }

    pub fn content(&self) -> RecordContent {
        if self.is_well_known(b"U") && !self.payload.is_empty() {
            let prefix_code = self.payload[0];
            return RecordContent::Uri {
                prefix_code,
                prefix: URI_PREFIXES
                    .get(usize::from(prefix_code))
                    .copied()
                    .unwrap_or(""),
                tail: String::from_utf8_lossy(&self.payload[1..]).into_owned(),
            };
        }
        if self.is_well_known(b"T") && !self.payload.is_empty() {
            let status = self.payload[0];
            let language_end = 1 + usize::from(status & TEXT_LANGUAGE_MASK);
            if language_end <= self.payload.len() {
                let body = &self.payload[language_end..];
                return RecordContent::Text {
                    language: String::from_utf8_lossy(&self.payload[1..language_end])
                        .into_owned(),
                    body: if status & TEXT_UTF16 != 0 {
                        TextBody::Utf16 {
                            byte_len: body.len(),
                        }
                    } else {
                        TextBody::Utf8(String::from_utf8_lossy(body).into_owned())
                    },
                };
            }
        }
        RecordContent::Opaque {
            dump: printable_dump(&self.payload),
        }
    }
}

/// Non-fatal problems met while scanning. The scan continues past a
/// truncation and stops decoding the current message at an unparseable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseIssue {
    /// A declared length ran past the available bytes and was clamped.
    Truncated {
        offset: usize,
        declared: usize,
        available: usize,
    },
    /// A record's fields are inconsistent with the bytes that hold it.
    Unparseable { offset: usize },
}

/// Result of scanning a buffer for TLV units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvScan {
    pub tlvs: Vec<TlvBlock>,
    pub records: Vec<NdefRecord>,
    /// An NDEF message TLV was present.
    pub found: bool,
    pub issues: Vec<ParseIssue>,
}

/// Reads a TLV length field: one byte, or `0xFF` followed by a 16-bit
/// big-endian length. Returns the length and the field size.
fn read_tlv_length(bytes: &[u8]) -> Option<(u16, usize)> {
    match *bytes.first()? {
        0xFF => {
            let hi = *bytes.get(1)?;
            let lo = *bytes.get(2)?;
            Some((u16::from_be_bytes([hi, lo]), 3))
        }
        len => Some((u16::from(len), 1)),
    }
}

/// Scans `buf` for TLV units and decodes every NDEF message found.
///
/// Never fails: truncation is clamped and recorded, a bad record ends the
/// current message only.
pub fn parse_tlv_stream(buf: &[u8]) -> TlvScan {
    let mut scan = TlvScan::default();
    let mut pos = 0;

    while pos < buf.len() {
        let tag_offset = pos;
        let tag = buf[pos];
        pos += 1;
        match tag {
            TLV_NULL => continue,
            TLV_TERMINATOR => break,
            _ => {}
        }

        let Some((declared, field_len)) = read_tlv_length(&buf[pos..]) else {
            scan.issues.push(ParseIssue::Truncated {
                offset: tag_offset,
                declared: 0,
                available: buf.len() - pos,
            });
            break;
        };
        pos += field_len;

        let available = buf.len() - pos;
        let value_length = usize::from(declared).min(available);
        if value_length < usize::from(declared) {
            debug!(tag, declared, available, "TLV clamped to buffer end");
            scan.issues.push(ParseIssue::Truncated {
                offset: tag_offset,
                declared: usize::from(declared),
                available,
            });
        }
        scan.tlvs.push(TlvBlock {
            tag,
            length: declared,
            value_offset: pos,
            value_length,
        });

        let value_end = pos + value_length;
        pos = if tag == TLV_NDEF_MESSAGE {
            scan.found = true;
            parse_message(buf, pos, value_end, &mut scan).max(value_end)
        } else {
            value_end
        };
    }
    scan
}

/// Decodes the records of one message and returns where decoding stopped.
/// A reframed record may end past `end`.
fn parse_message(buf: &[u8], start: usize, end: usize, scan: &mut TlvScan) -> usize {
    let mut offset = start;
    while offset < end {
        if let Some((record, consumed)) = parse_record(&buf[offset..end]) {
            scan.records.push(record);
            offset += consumed;
            continue;
        }
        match reframe_record(&buf[offset..], end - offset) {
            Some((record, consumed)) => {
                warn!(offset, "NDEF record overruns its TLV; reframed to terminator");
                scan.issues.push(ParseIssue::Truncated {
                    offset,
                    declared: end - offset,
                    available: buf.len() - offset,
                });
                scan.records.push(record);
                return offset + consumed;
            }
            None => {
                warn!(offset, "unparseable NDEF record");
                scan.issues.push(ParseIssue::Unparseable { offset });
            }
        }
        break;
    }
    offset
}

/// Record header fields, before type/id/payload.
struct RecordLayout {
    header: u8,
    type_len: usize,
    id_len: Option<usize>,
    payload_len: usize,
    /// Bytes taken by header, type length, payload length and id length.
    header_len: usize,
}

impl RecordLayout {
    fn parse(region: &[u8]) -> Option<Self> {
        if region.len() < 3 {
            return None;
        }
        let header = region[0];
        let type_len = usize::from(region[1]);
        let mut offset = 2;

        let payload_len = if header & FLAG_SR != 0 {
            let len = usize::from(region[offset]);
            offset += 1;
            len
        } else {
            let bytes: [u8; 4] = region.get(offset..offset + 4)?.try_into().ok()?;
            offset += 4;
            u32::from_be_bytes(bytes) as usize
        };

        let id_len = if header & FLAG_IL != 0 {
            let len = usize::from(*region.get(offset)?);
            offset += 1;
            Some(len)
        } else {
            None
        };

        Some(Self {
            header,
            type_len,
            id_len,
            payload_len,
            header_len: offset,
        })
    }

    fn fields_end(&self) -> usize {
        self.header_len + self.type_len + self.id_len.unwrap_or(0)
    }

    fn into_record(self, region: &[u8], payload_end: usize) -> NdefRecord {
        let type_start = self.header_len;
        let id_start = type_start + self.type_len;
        let payload_start = self.fields_end();
        NdefRecord {
            tnf: self.header & TNF_MASK,
            type_bytes: region[type_start..id_start].to_vec(),
            id_bytes: self
                .id_len
                .map(|_| region[id_start..payload_start].to_vec()),
            payload: region[payload_start..payload_end].to_vec(),
            message_begin: self.header & FLAG_MB != 0,
            message_end: self.header & FLAG_ME != 0,
            chunked: self.header & FLAG_CF != 0,
            short_record: self.header & FLAG_SR != 0,
        }
    }
}

/// Parses one record at the start of `region`.
///
/// Returns the record and the exact number of bytes it occupies, or `None`
/// when its declared fields do not fit in `region`.
pub fn parse_record(region: &[u8]) -> Option<(NdefRecord, usize)> {
    let layout = RecordLayout::parse(region)?;
    let total = layout.fields_end().checked_add(layout.payload_len)?;
    if total > region.len() {
        return None;
    }
    Some((layout.into_record(region, total), total))
}

/// Recovers a record whose enclosing TLV is too short to hold even the
/// record's header, type and id fields (`region_len` bytes were declared).
///
/// Once the TLV length is known to be wrong the record's own payload length
/// is not trusted either: the payload runs from the end of the type/id
/// fields to the next terminator byte, or to the end of `rest`. A record
/// whose fields fit but whose payload overruns stays unparseable. Returns
/// the record and the bytes of `rest` it took.
fn reframe_record(rest: &[u8], region_len: usize) -> Option<(NdefRecord, usize)> {
    let layout = RecordLayout::parse(rest)?;
    let fields_end = layout.fields_end();
    if fields_end <= region_len || fields_end > rest.len() {
        return None;
    }
    let payload_end = rest[fields_end..]
        .iter()
        .position(|&b| b == TLV_TERMINATOR)
        .map_or(rest.len(), |i| fields_end + i);
    Some((layout.into_record(rest, payload_end), payload_end))
}

/// Replaces non-printable bytes with `.` and cuts the result at
/// [`DUMP_LIMIT`] bytes, marking the cut with `...`.
pub fn printable_dump(payload: &[u8]) -> String {
    let mut dump: String = payload
        .iter()
        .take(DUMP_LIMIT)
        .map(|&b| printable(b))
        .collect();
    if payload.len() > DUMP_LIMIT {
        dump.push_str("...");
    }
    dump
}

pub fn printable(byte: u8) -> char {
    if (0x20..=0x7E).contains(&byte) {
        char::from(byte)
    } else {
        '.'
    }
}

/// Picks the longest URI prefix from the table that starts `uri` and
/// returns its code with the remaining tail. Code 0 means no prefix.
pub fn split_uri_prefix(uri: &str) -> (u8, &str) {
    URI_PREFIXES
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, prefix)| uri.starts_with(*prefix))
        .max_by_key(|(_, prefix)| prefix.len())
        .map_or((0, uri), |(code, prefix)| (code as u8, &uri[prefix.len()..]))
}

fn build_single_record(record_type: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(NfcError::OversizeInput {
            len: payload.len() + SINGLE_RECORD_OVERHEAD,
            max: MAX_MESSAGE_LEN,
        });
    }
    let mut message = Vec::with_capacity(payload.len() + SINGLE_RECORD_OVERHEAD);
    message.push(TLV_NDEF_MESSAGE);
    message.push((4 + payload.len()) as u8);
    message.push(FLAG_MB | FLAG_ME | FLAG_SR | TNF_WELL_KNOWN);
    message.push(0x01);
    message.push(payload.len() as u8);
    message.push(record_type);
    message.extend_from_slice(payload);
    message.push(TLV_TERMINATOR);
    Ok(message)
}

/// Encodes a TLV-wrapped message holding one URI record.
pub fn build_uri_record(prefix_code: u8, uri_tail: &str) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(1 + uri_tail.len());
    payload.push(prefix_code);
    payload.extend_from_slice(uri_tail.as_bytes());
    build_single_record(b'U', &payload)
}

/// Encodes a TLV-wrapped message holding one UTF-8 Text record.
pub fn build_text_record(language: &str, text: &str) -> Result<Vec<u8>> {
    let language_len = language.len();
    if language_len == 0 || language_len > MAX_LANGUAGE_LEN {
        return Err(NfcError::InvalidLanguage { len: language_len });
    }
    let mut payload = Vec::with_capacity(1 + language_len + text.len());
    payload.push(language_len as u8);
    payload.extend_from_slice(language.as_bytes());
    payload.extend_from_slice(text.as_bytes());
    build_single_record(b'T', &payload)
}
