//! MIFARE Application Directory lookup.
//!
//! MAD v1 lives in sector 0: block 1 bytes 2..16 name sectors 1..=7 and
//! block 2 bytes 0..16 name sectors 8..=15, one big-endian application
//! identifier per sector. Classic 4K adds MAD v2 in sector 16 (blocks
//! 64..=66) for sectors 17..=39.

use tracing::{debug, warn};

use crate::error::{NfcError, Result};
use crate::nfc::card_trait::TagReader;
use crate::nfc::keys::{self, KeyRecovery, KeyType};
use crate::nfc::sector::BLOCK_SIZE;
use crate::nfc::tag::{TagInfo, TagType};

/// AID of an NFC Forum NDEF application.
pub const NDEF_AID: u16 = 0x03E1;

const MAD2_SECTOR_FIRST_BLOCK: u16 = 64;

type Block = [u8; BLOCK_SIZE];

/// Application identifiers of `blocks` paired with their sectors.
///
/// The first entry of the first block is the CRC/info slot and names no
/// sector.
fn entries(blocks: &[Block], first_sector: u8) -> impl Iterator<Item = (u8, u16)> + '_ {
    blocks
        .iter()
        .flat_map(|block| block.chunks_exact(2))
        .skip(1)
        .zip(first_sector..)
        .map(|(pair, sector)| (sector, u16::from_be_bytes([pair[0], pair[1]])))
}

fn matching_sectors(blocks: &[Block], first_sector: u8, aid: u16) -> Vec<u8> {
    entries(blocks, first_sector)
        .filter(|&(_, entry)| entry == aid)
        .map(|(sector, _)| sector)
        .collect()
}

/// Sectors 1..=15 that MAD v1 assigns to the NDEF application.
pub fn parse_mad1(block1: &Block, block2: &Block) -> Vec<u8> {
    matching_sectors(&[*block1, *block2], 1, NDEF_AID)
}

/// Sectors 17..=39 that MAD v2 assigns to the NDEF application.
pub fn parse_mad2(block64: &Block, block65: &Block, block66: &Block) -> Vec<u8> {
    matching_sectors(&[*block64, *block65, *block66], 17, NDEF_AID)
}

/// Reads the directory of a Classic tag and returns its NDEF sectors in
/// ascending order.
///
/// An empty result means the tag has no NDEF application. A sector 0 that
/// cannot be authenticated or read is [`NfcError::MadUnreadable`].
pub fn resolve_ndef_sectors<R: TagReader + ?Sized>(
    reader: &mut R,
    tag: &TagInfo,
    recovery: &KeyRecovery<'_>,
) -> Result<Vec<u8>> {
    if recovery
        .try_authenticate(reader, tag.uid(), 0, KeyType::A)?
        .is_none()
    {
        keys::reselect(reader)?;
        return Err(NfcError::MadUnreadable);
    }
    let (Some(block1), Some(block2)) = (reader.read_block(1), reader.read_block(2)) else {
        return Err(NfcError::MadUnreadable);
    };
    let mut sectors = parse_mad1(&block1, &block2);
    debug!(?sectors, "MAD v1 read");

    if tag.tag_type == TagType::Classic4K {
        match read_mad2(reader, tag, recovery)? {
            Some(more) => sectors.extend(more),
            None => warn!("MAD v2 unreadable, using MAD v1 only"),
        }
    }
    Ok(sectors)
}

fn read_mad2<R: TagReader + ?Sized>(
    reader: &mut R,
    tag: &TagInfo,
    recovery: &KeyRecovery<'_>,
) -> Result<Option<Vec<u8>>> {
    if recovery
        .try_authenticate(reader, tag.uid(), MAD2_SECTOR_FIRST_BLOCK, KeyType::A)?
        .is_none()
    {
        keys::reselect(reader)?;
        return Ok(None);
    }
    let first = MAD2_SECTOR_FIRST_BLOCK;
    let blocks = (
        reader.read_block(first),
        reader.read_block(first + 1),
        reader.read_block(first + 2),
    );
    let (Some(b64), Some(b65), Some(b66)) = blocks else {
        return Ok(None);
    };
    Ok(Some(parse_mad2(&b64, &b65, &b66)))
}
