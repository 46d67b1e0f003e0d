//! MIFARE Classic operations: memory dump, key audit, NDEF area access.

use tracing::{debug, info, warn};

use crate::error::{MemoryUnit, NfcError, Result};
use crate::nfc::card_trait::TagReader;
use crate::nfc::keys::{KeyRecovery, SectorAudit};
use crate::nfc::mad;
use crate::nfc::sector::{self, SectorDescriptor, BLOCK_SIZE};
use crate::nfc::tag::TagInfo;

/// Sector that receives `WRITE` messages.
pub const NDEF_WRITE_SECTOR: u8 = 1;

/// Data capacity of [`NDEF_WRITE_SECTOR`] (three 16-byte blocks).
pub const NDEF_WRITE_CAPACITY: usize = 3 * BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Data([u8; BLOCK_SIZE]),
    /// The whole sector was skipped after its authentication failed.
    AuthFailed,
    ReadError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLine {
    pub block: u16,
    pub outcome: BlockOutcome,
}

/// Dumps every block of the tag, sector by sector.
///
/// Each sector is authenticated once at its first block (Key A, then Key B).
/// A sector that resists both is reported block by block as
/// [`BlockOutcome::AuthFailed`] without touching the reader again. A tag
/// that leaves the field ends the dump with [`NfcError::NotPresent`].
pub fn dump<R: TagReader + ?Sized>(
    reader: &mut R,
    tag: &TagInfo,
    recovery: &KeyRecovery<'_>,
) -> Result<Vec<BlockLine>> {
    let mut lines = Vec::with_capacity(usize::from(sector::total_blocks(tag.tag_type)));
    for descriptor in sector::sectors(tag.tag_type) {
        let blocks = descriptor.first_block..descriptor.first_block + descriptor.block_count;
        if recovery
            .authenticate_sector(reader, tag.uid(), descriptor.first_block)?
            .is_none()
        {
            lines.extend(blocks.map(|block| BlockLine {
                block,
                outcome: BlockOutcome::AuthFailed,
            }));
            continue;
        }
        for block in blocks {
            let outcome = match reader.read_block(block) {
                Some(data) => BlockOutcome::Data(data),
                None => {
                    debug!(block, "read failed");
                    BlockOutcome::ReadError
                }
            };
            lines.push(BlockLine { block, outcome });
        }
    }
    Ok(lines)
}

/// Runs the independent Key A / Key B audit over every sector.
pub fn audit<R: TagReader + ?Sized>(
    reader: &mut R,
    tag: &TagInfo,
    recovery: &KeyRecovery<'_>,
) -> Result<Vec<SectorAudit>> {
    sector::sectors(tag.tag_type)
        .map(|descriptor| recovery.audit_sector(reader, tag.uid(), descriptor.first_block))
        .collect()
}

/// Bytes of the NDEF application together with the sectors MAD assigned it.
#[derive(Debug, Default)]
pub struct NdefArea {
    pub sectors: Vec<u8>,
    pub bytes: Vec<u8>,
    /// Sectors that stayed locked and blocks that failed to read, in order.
    pub failures: Vec<NfcError>,
}

/// Locates the NDEF sectors through MAD and concatenates their data blocks.
///
/// Sectors that cannot be authenticated and blocks that cannot be read are
/// left out of the area and listed in [`NdefArea::failures`].
pub fn read_ndef_area<R: TagReader + ?Sized>(
    reader: &mut R,
    tag: &TagInfo,
    recovery: &KeyRecovery<'_>,
) -> Result<NdefArea> {
    let sectors = mad::resolve_ndef_sectors(reader, tag, recovery)?;
    let mut bytes = Vec::new();
    let mut failures = Vec::new();
    for &sector_index in &sectors {
        let descriptor = SectorDescriptor::for_sector(sector_index);
        if recovery
            .authenticate_sector(reader, tag.uid(), descriptor.first_block)?
            .is_none()
        {
            failures.push(NfcError::AuthFailed {
                sector: sector_index,
            });
            continue;
        }
        for block in descriptor.data_blocks() {
            match reader.read_block(block) {
                Some(data) => bytes.extend_from_slice(&data),
                None => {
                    debug!(block, "NDEF block unreadable");
                    failures.push(NfcError::ReadFailed { block });
                }
            }
        }
    }
    Ok(NdefArea {
        sectors,
        bytes,
        failures,
    })
}

/// Writes a TLV-framed message into the data blocks of sector 1,
/// zero-padding the last block.
pub fn write_ndef<R: TagReader + ?Sized>(
    reader: &mut R,
    tag: &TagInfo,
    recovery: &KeyRecovery<'_>,
    message: &[u8],
) -> Result<()> {
    if message.len() > NDEF_WRITE_CAPACITY {
        return Err(NfcError::OversizeInput {
            len: message.len(),
            max: NDEF_WRITE_CAPACITY,
        });
    }
    let descriptor = SectorDescriptor::for_sector(NDEF_WRITE_SECTOR);
    let key = recovery
        .authenticate_sector(reader, tag.uid(), descriptor.first_block)?
        .ok_or(NfcError::AuthFailed {
            sector: NDEF_WRITE_SECTOR,
        })?;
    debug!(key_type = %key.key_type, key_index = key.key_index, "sector 1 opened for write");

    let mut padded = [0u8; NDEF_WRITE_CAPACITY];
    padded[..message.len()].copy_from_slice(message);
    for (block, chunk) in descriptor.data_blocks().zip(padded.chunks_exact(BLOCK_SIZE)) {
        let mut data = [0u8; BLOCK_SIZE];
        data.copy_from_slice(chunk);
        if !reader.write_block(block, &data) {
            warn!(block, "NDEF block write failed");
            return Err(NfcError::WriteFailed {
                unit: MemoryUnit::Block,
                index: block,
            });
        }
    }
    info!(bytes = message.len(), "NDEF message written to sector 1");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfc::keys::KNOWN_KEYS;
    use crate::nfc::ndef;
    use crate::nfc::simulated::{SimTag, SimulatedReader};

    const UID: [u8; 4] = [0x04, 0xA2, 0x19, 0x7C];

    fn classic_1k() -> TagInfo {
        TagInfo::new(0x0004, 0x08, &UID)
    }

    #[test]
    fn locked_sector_is_reported_per_block_with_one_pass_of_trials() {
        let mut sim = SimTag::classic_1k(&UID);
        sim.set_sector_keys(2, [0x11; 6], [0x22; 6]);
        let mut reader = SimulatedReader::with_tag(sim);

        let lines = dump(&mut reader, &classic_1k(), &KeyRecovery::default()).unwrap();
        assert_eq!(lines.len(), 64);
        let failed: Vec<u16> = lines
            .iter()
            .filter(|l| l.outcome == BlockOutcome::AuthFailed)
            .map(|l| l.block)
            .collect();
        assert_eq!(failed, vec![8, 9, 10, 11]);
        // 15 open sectors at one trial each, plus 20 trials on sector 2.
        assert_eq!(reader.auth_calls(), 15 + 20);
    }

    #[test]
    fn dump_of_4k_walks_large_sectors() {
        let uid = [1, 2, 3, 4];
        let mut sim = SimTag::classic_4k(&uid);
        sim.set_sector_keys(39, [0x11; 6], [0x22; 6]);
        let mut reader = SimulatedReader::with_tag(sim);
        let tag = TagInfo::new(0x0002, 0x18, &uid);

        let lines = dump(&mut reader, &tag, &KeyRecovery::default()).unwrap();
        assert_eq!(lines.len(), 256);
        let failed = lines
            .iter()
            .filter(|l| l.outcome == BlockOutcome::AuthFailed)
            .count();
        assert_eq!(failed, 16);
        assert_eq!(lines[240].block, 240);
    }

    #[test]
    fn audit_shows_weak_key_b_behind_strong_key_a() {
        let mut sim = SimTag::classic_1k(&UID);
        sim.set_sector_keys(5, [0x5A; 6], KNOWN_KEYS[8].key);
        let mut reader = SimulatedReader::with_tag(sim);

        let rows = audit(&mut reader, &classic_1k(), &KeyRecovery::default()).unwrap();
        assert_eq!(rows.len(), 16);
        assert_eq!(rows[5].key_a, None);
        assert_eq!(rows[5].key_b, Some(8));
        assert_eq!(rows[0].key_a, Some(0));
    }

    #[test]
    fn written_message_is_found_through_mad() {
        let mut sim = SimTag::classic_1k(&UID);
        let mut mad1 = [0u8; 16];
        mad1[2..4].copy_from_slice(&mad::NDEF_AID.to_be_bytes());
        sim.set_block(1, mad1);
        let mut reader = SimulatedReader::with_tag(sim);
        let tag = classic_1k();
        let recovery = KeyRecovery::default();

        let message = ndef::build_uri_record(4, "example.com").unwrap();
        write_ndef(&mut reader, &tag, &recovery, &message).unwrap();
        assert_eq!(reader.writes(), &[4, 5, 6]);

        let area = read_ndef_area(&mut reader, &tag, &recovery).unwrap();
        assert_eq!(area.sectors, vec![1]);
        assert_eq!(area.bytes.len(), 48);
        assert!(area.failures.is_empty());
        let scan = ndef::parse_tlv_stream(&area.bytes);
        assert_eq!(
            scan.records[0].content().uri().as_deref(),
            Some("https://example.com")
        );
    }

    #[test]
    fn message_larger_than_sector_one_is_rejected_before_auth() {
        let mut reader = SimulatedReader::with_tag(SimTag::classic_1k(&UID));
        let message = vec![0u8; NDEF_WRITE_CAPACITY + 1];
        let err = write_ndef(&mut reader, &classic_1k(), &KeyRecovery::default(), &message)
            .unwrap_err();
        assert!(matches!(err, NfcError::OversizeInput { len: 49, max: 48 }));
        assert_eq!(reader.auth_calls(), 0);
    }

    #[test]
    fn protected_block_reports_write_failure() {
        let mut sim = SimTag::classic_1k(&UID);
        sim.protect_block(5);
        let mut reader = SimulatedReader::with_tag(sim);
        let err = write_ndef(&mut reader, &classic_1k(), &KeyRecovery::default(), &[0x03, 0x00, 0xFE])
            .unwrap_err();
        assert!(matches!(
            err,
            NfcError::WriteFailed {
                unit: MemoryUnit::Block,
                index: 5
            }
        ));
    }

    #[test]
    fn unreadable_ndef_block_is_reported_and_left_out() {
        let mut sim = SimTag::classic_1k(&UID);
        let mut mad1 = [0u8; 16];
        mad1[2..4].copy_from_slice(&mad::NDEF_AID.to_be_bytes());
        mad1[4..6].copy_from_slice(&mad::NDEF_AID.to_be_bytes());
        sim.set_block(1, mad1);
        sim.set_sector_keys(2, [0x11; 6], [0x22; 6]);
        sim.fail_reads(5);
        let mut reader = SimulatedReader::with_tag(sim);

        let area = read_ndef_area(&mut reader, &classic_1k(), &KeyRecovery::default()).unwrap();
        assert_eq!(area.sectors, vec![1, 2]);
        assert_eq!(area.bytes.len(), 32);
        assert!(matches!(
            area.failures[..],
            [
                NfcError::ReadFailed { block: 5 },
                NfcError::AuthFailed { sector: 2 }
            ]
        ));
    }

    #[test]
    fn dump_stops_when_the_tag_leaves() {
        let mut reader = SimulatedReader::with_tag(SimTag::classic_1k(&UID));
        reader.remove_after_auths(3);
        let err = dump(&mut reader, &classic_1k(), &KeyRecovery::default()).unwrap_err();
        assert!(matches!(err, NfcError::NotPresent));
        assert_eq!(reader.auth_calls(), 4);
    }
}
