//! MIFARE Ultralight / NTAG page operations.
//!
//! Page layout follows NTAG216: pages 0..=2 hold the UID and lock bytes,
//! page 3 the capability container, user memory starts at page 4.

use tracing::{debug, info, warn};

use crate::error::{MemoryUnit, NfcError, Result};
use crate::nfc::card_trait::TagReader;

pub const PAGE_SIZE: usize = 4;

/// First user-memory page, where the NDEF TLV stream starts.
pub const FIRST_USER_PAGE: u16 = 4;

/// Pages covered by a dump (and by clone capture).
pub const DUMP_PAGE_COUNT: u16 = 231;

/// One past the last page of the NDEF area.
pub const NDEF_END_PAGE: u16 = 232;

pub const NDEF_AREA_CAPACITY: usize = (NDEF_END_PAGE - FIRST_USER_PAGE) as usize * PAGE_SIZE;

/// Reads pages from `first` up to `end`, stopping at the first page the
/// reader cannot return.
pub fn read_pages<R: TagReader + ?Sized>(
    reader: &mut R,
    first: u16,
    end: u16,
) -> Vec<(u16, [u8; PAGE_SIZE])> {
    let mut pages = Vec::new();
    for page in first..end {
        match reader.read_page(page) {
            Some(data) => pages.push((page, data)),
            None => {
                debug!(page, "read stopped");
                break;
            }
        }
    }
    pages
}

/// Pages 0.. of the tag, up to the first unreadable page.
pub fn dump<R: TagReader + ?Sized>(reader: &mut R) -> Vec<(u16, [u8; PAGE_SIZE])> {
    read_pages(reader, 0, DUMP_PAGE_COUNT)
}

/// Contiguous bytes of the NDEF area as far as it can be read.
pub fn read_ndef_area<R: TagReader + ?Sized>(reader: &mut R) -> Vec<u8> {
    read_pages(reader, FIRST_USER_PAGE, NDEF_END_PAGE)
        .into_iter()
        .flat_map(|(_, data)| data)
        .collect()
}

/// Writes a TLV-framed message page by page from page 4.
///
/// The last page is zero-padded. Writing stops at the first failed page and
/// reports it; pages before it keep the new content.
pub fn write_ndef<R: TagReader + ?Sized>(reader: &mut R, message: &[u8]) -> Result<u16> {
    if message.len() > NDEF_AREA_CAPACITY {
        return Err(NfcError::OversizeInput {
            len: message.len(),
            max: NDEF_AREA_CAPACITY,
        });
    }
    let mut written = 0;
    for (page, chunk) in (FIRST_USER_PAGE..).zip(message.chunks(PAGE_SIZE)) {
        let mut data = [0u8; PAGE_SIZE];
        data[..chunk.len()].copy_from_slice(chunk);
        if !reader.write_page(page, &data) {
            warn!(page, "page write failed");
            return Err(NfcError::WriteFailed {
                unit: MemoryUnit::Page,
                index: page,
            });
        }
        written += 1;
    }
    info!(pages = written, "NDEF message written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfc::ndef;
    use crate::nfc::simulated::{SimTag, SimulatedReader};

    const UID: [u8; 7] = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

    #[test]
    fn dump_stops_at_end_of_short_tag() {
        let mut reader = SimulatedReader::with_tag(SimTag::ultralight(&UID, 45));
        let pages = dump(&mut reader);
        assert_eq!(pages.len(), 45);
        assert_eq!(pages[3].1, [0xE1, 0x10, 0x6D, 0x00]);
    }

    #[test]
    fn dump_is_capped_for_large_tags() {
        let mut reader = SimulatedReader::with_tag(SimTag::ultralight(&UID, 240));
        assert_eq!(dump(&mut reader).len(), usize::from(DUMP_PAGE_COUNT));
    }

    #[test]
    fn text_round_trips_through_pages() {
        let mut reader = SimulatedReader::with_tag(SimTag::ultralight(&UID, 231));
        let message = ndef::build_text_record("en", "hello tag").unwrap();
        let pages = write_ndef(&mut reader, &message).unwrap();
        assert_eq!(usize::from(pages), message.len().div_ceil(PAGE_SIZE));

        let area = read_ndef_area(&mut reader);
        let scan = ndef::parse_tlv_stream(&area);
        assert!(scan.found);
        assert_eq!(
            scan.records[0].content(),
            ndef::RecordContent::Text {
                language: "en".into(),
                body: ndef::TextBody::Utf8("hello tag".into()),
            }
        );
    }

    #[test]
    fn locked_page_aborts_remaining_writes() {
        let mut sim = SimTag::ultralight(&UID, 231);
        sim.lock_pages_from(6);
        let mut reader = SimulatedReader::with_tag(sim);
        let message = [0xAB; 20];
        let err = write_ndef(&mut reader, &message).unwrap_err();
        assert!(matches!(
            err,
            NfcError::WriteFailed {
                unit: MemoryUnit::Page,
                index: 6
            }
        ));
        assert_eq!(reader.writes(), &[4, 5]);
    }

    #[test]
    fn oversize_message_is_rejected() {
        let mut reader = SimulatedReader::with_tag(SimTag::ultralight(&UID, 231));
        let message = vec![0u8; NDEF_AREA_CAPACITY + 1];
        assert!(matches!(
            write_ndef(&mut reader, &message),
            Err(NfcError::OversizeInput { .. })
        ));
        assert!(reader.writes().is_empty());
    }
}
