//! MIFARE Classic sector/block geometry.
//!
//! Blocks 0..128 are grouped in 4-block sectors (sectors 0..32); blocks
//! 128..256 of a 4K tag are grouped in 16-block sectors (sectors 32..40).
//! The last block of every sector is its trailer (keys + access bits), and
//! block 0 is the read-only manufacturer block.

use crate::nfc::tag::TagType;

/// First block of the 16-block sectors.
pub const LARGE_SECTOR_START: u16 = 128;
const SMALL_SECTOR_BLOCKS: u16 = 4;
const LARGE_SECTOR_BLOCKS: u16 = 16;
const SMALL_SECTOR_COUNT: u8 = 32;

pub const BLOCK_SIZE: usize = 16;

/// Number of blocks in the sector that holds `block`.
pub fn group_size(block: u16) -> u16 {
    if block < LARGE_SECTOR_START {
        SMALL_SECTOR_BLOCKS
    } else {
        LARGE_SECTOR_BLOCKS
    }
}

/// First block of the sector that holds `block`.
///
/// Callers detect the start of a sector with `block == sector_first_block(block)`.
pub fn sector_first_block(block: u16) -> u16 {
    block - (block % group_size(block))
}

/// Trailer block of the sector that holds `block`. A failed sector
/// authentication resumes iteration after this block.
pub fn sector_last_block(block: u16) -> u16 {
    sector_first_block(block) + group_size(block) - 1
}

pub fn is_sector_trailer(block: u16) -> bool {
    (block + 1) % group_size(block) == 0
}

pub fn sector_of_block(block: u16) -> u8 {
    if block < LARGE_SECTOR_START {
        (block / SMALL_SECTOR_BLOCKS) as u8
    } else {
        SMALL_SECTOR_COUNT + ((block - LARGE_SECTOR_START) / LARGE_SECTOR_BLOCKS) as u8
    }
}

pub fn first_block_of_sector(sector: u8) -> u16 {
    if sector < SMALL_SECTOR_COUNT {
        u16::from(sector) * SMALL_SECTOR_BLOCKS
    } else {
        LARGE_SECTOR_START + u16::from(sector - SMALL_SECTOR_COUNT) * LARGE_SECTOR_BLOCKS
    }
}

/// Addressable blocks: 256 for Classic 4K, 64 for everything else.
pub fn total_blocks(tag_type: TagType) -> u16 {
    match tag_type {
        TagType::Classic4K => 256,
        TagType::ClassicMini
        | TagType::Classic1K
        | TagType::Ultralight
        | TagType::Plus2K
        | TagType::Plus4K
        | TagType::DesFire
        | TagType::Iso14443_4
        | TagType::Unknown => 64,
    }
}

pub fn sector_count(tag_type: TagType) -> u8 {
    sector_of_block(total_blocks(tag_type) - 1) + 1
}

/// Derived view of one sector. Never stored, always computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorDescriptor {
    pub sector_index: u8,
    pub first_block: u16,
    pub block_count: u16,
}

impl SectorDescriptor {
    pub fn for_block(block: u16) -> Self {
        Self {
            sector_index: sector_of_block(block),
            first_block: sector_first_block(block),
            block_count: group_size(block),
        }
    }

    pub fn for_sector(sector: u8) -> Self {
        Self::for_block(first_block_of_sector(sector))
    }

    pub fn trailer_block(&self) -> u16 {
        self.first_block + self.block_count - 1
    }

    /// Every block except the trailer.
    pub fn data_blocks(&self) -> std::ops::Range<u16> {
        self.first_block..self.trailer_block()
    }
}

/// Sectors of a tag in ascending order.
pub fn sectors(tag_type: TagType) -> impl Iterator<Item = SectorDescriptor> {
    (0..sector_count(tag_type)).map(SectorDescriptor::for_sector)
}
