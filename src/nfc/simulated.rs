//! In-memory tag simulator implementing the reader capability.
//!
//! Models enough of MIFARE Classic and Ultralight behavior to exercise the
//! tool without hardware: per-sector Crypto1 keys (by comparison, not by
//! cipher), the halt-after-failed-auth state, the read-only manufacturer
//! block and Ultralight page locks.

use std::collections::HashSet;
use std::time::Duration;

use tracing::trace;

use crate::nfc::card_trait::{Modulation, PolledTarget, TagReader};
use crate::nfc::keys::{Key, KeyType};
use crate::nfc::sector::{first_block_of_sector, sector_of_block, total_blocks, BLOCK_SIZE};
use crate::nfc::tag::TagType;

/// Access bits of a factory-fresh trailer (transport configuration).
const TRANSPORT_ACCESS_BITS: [u8; 4] = [0xFF, 0x07, 0x80, 0x69];

/// NTAG216 capability container.
const NTAG216_CC: [u8; 4] = [0xE1, 0x10, 0x6D, 0x00];

/// Pages 0..4 (UID, lock bytes, capability container) are never writable.
const ULTRALIGHT_RESERVED_PAGES: u16 = 4;

#[derive(Debug, Clone)]
enum Memory {
    Classic {
        blocks: Vec<[u8; BLOCK_SIZE]>,
        protected: HashSet<u16>,
        unreadable: HashSet<u16>,
    },
    Ultralight {
        pages: Vec<[u8; 4]>,
        locked_from: u16,
    },
}

/// A simulated tag in the field.
#[derive(Debug, Clone)]
pub struct SimTag {
    uid: Vec<u8>,
    atqa: u16,
    sak: u8,
    memory: Memory,
}

impl SimTag {
    pub fn classic_1k(uid: &[u8]) -> Self {
        Self::classic(uid, 0x0004, 0x08, TagType::Classic1K)
    }

    pub fn classic_4k(uid: &[u8]) -> Self {
        Self::classic(uid, 0x0002, 0x18, TagType::Classic4K)
    }

    fn classic(uid: &[u8], atqa: u16, sak: u8, tag_type: TagType) -> Self {
        let count = total_blocks(tag_type);
        let mut blocks = vec![[0u8; BLOCK_SIZE]; usize::from(count)];
        for block in 0..count {
            if crate::nfc::sector::is_sector_trailer(block) {
                blocks[usize::from(block)] = trailer(&[0xFF; 6], &[0xFF; 6]);
            }
        }
        let mut manufacturer = [0u8; BLOCK_SIZE];
        let n = uid.len().min(4);
        manufacturer[..n].copy_from_slice(&uid[..n]);
        manufacturer[4] = uid.iter().take(4).fold(0, |acc, b| acc ^ b);
        manufacturer[5] = sak;
        manufacturer[6..8].copy_from_slice(&atqa.to_le_bytes());
        blocks[0] = manufacturer;

        Self {
            uid: uid.to_vec(),
            atqa,
            sak,
            memory: Memory::Classic {
                blocks,
                protected: HashSet::new(),
                unreadable: HashSet::new(),
            },
        }
    }

    /// An Ultralight/NTAG tag with `page_count` pages, formatted with an
    /// NTAG216 capability container and an empty NDEF TLV.
    pub fn ultralight(uid: &[u8], page_count: u16) -> Self {
        let mut pages = vec![[0u8; 4]; usize::from(page_count)];
        for (i, byte) in uid.iter().take(8).enumerate() {
            pages[i / 4][i % 4] = *byte;
        }
        if page_count > 4 {
            pages[3] = NTAG216_CC;
            pages[4] = [0x03, 0x00, 0xFE, 0x00];
        }
        Self {
            uid: uid.to_vec(),
            atqa: 0x0044,
            sak: 0x00,
            memory: Memory::Ultralight {
                pages,
                locked_from: page_count,
            },
        }
    }

    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    /// Rewrites a sector trailer with new keys, keeping transport access bits.
    pub fn set_sector_keys(&mut self, sector: u8, key_a: Key, key_b: Key) {
        let first = first_block_of_sector(sector);
        let trailer_block = crate::nfc::sector::sector_last_block(first);
        if let Memory::Classic { blocks, .. } = &mut self.memory {
            blocks[usize::from(trailer_block)] = trailer(&key_a, &key_b);
        }
    }

    pub fn set_block(&mut self, block: u16, data: [u8; BLOCK_SIZE]) {
        if let Memory::Classic { blocks, .. } = &mut self.memory {
            blocks[usize::from(block)] = data;
        }
    }

    pub fn block(&self, block: u16) -> Option<[u8; BLOCK_SIZE]> {
        match &self.memory {
            Memory::Classic { blocks, .. } => blocks.get(usize::from(block)).copied(),
            Memory::Ultralight { .. } => None,
        }
    }

    /// Makes writes to `block` fail even when its sector is authenticated.
    pub fn protect_block(&mut self, block: u16) {
        if let Memory::Classic { protected, .. } = &mut self.memory {
            protected.insert(block);
        }
    }

    /// Makes reads of `block` fail even when its sector is authenticated.
    pub fn fail_reads(&mut self, block: u16) {
        if let Memory::Classic { unreadable, .. } = &mut self.memory {
            unreadable.insert(block);
        }
    }

    fn readable(&self, block: u16) -> bool {
        match &self.memory {
            Memory::Classic { unreadable, .. } => !unreadable.contains(&block),
            Memory::Ultralight { .. } => true,
        }
    }

    pub fn set_page(&mut self, page: u16, data: [u8; 4]) {
        if let Memory::Ultralight { pages, .. } = &mut self.memory {
            pages[usize::from(page)] = data;
        }
    }

    pub fn page(&self, page: u16) -> Option<[u8; 4]> {
        match &self.memory {
            Memory::Ultralight { pages, .. } => pages.get(usize::from(page)).copied(),
            Memory::Classic { .. } => None,
        }
    }

    /// Writes to `page` and everything after it fail from now on.
    pub fn lock_pages_from(&mut self, page: u16) {
        if let Memory::Ultralight { locked_from, .. } = &mut self.memory {
            *locked_from = page;
        }
    }

    /// Copies `bytes` into consecutive pages starting at `first_page`.
    pub fn load_pages(&mut self, first_page: u16, bytes: &[u8]) {
        for (i, chunk) in bytes.chunks(4).enumerate() {
            let mut page = [0u8; 4];
            page[..chunk.len()].copy_from_slice(chunk);
            self.set_page(first_page + i as u16, page);
        }
    }

    fn trailer_key(&self, block: u16, key_type: KeyType) -> Option<Key> {
        let Memory::Classic { blocks, .. } = &self.memory else {
            return None;
        };
        let trailer = blocks.get(usize::from(crate::nfc::sector::sector_last_block(block)))?;
        let mut key = [0u8; 6];
        match key_type {
            KeyType::A => key.copy_from_slice(&trailer[..6]),
            KeyType::B => key.copy_from_slice(&trailer[10..]),
        }
        Some(key)
    }
}

fn trailer(key_a: &Key, key_b: &Key) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[..6].copy_from_slice(key_a);
    block[6..10].copy_from_slice(&TRANSPORT_ACCESS_BITS);
    block[10..].copy_from_slice(key_b);
    block
}

/// Reader backend over a [`SimTag`]. Counts the calls the key-recovery
/// policy cares about.
#[derive(Debug, Default)]
pub struct SimulatedReader {
    tag: Option<SimTag>,
    authenticated_sector: Option<u8>,
    halted: bool,
    auth_calls: usize,
    reselect_calls: usize,
    writes: Vec<u16>,
    other_targets: Vec<(Modulation, Vec<u8>)>,
    /// Total auth calls after which the tag leaves the field.
    departs_after: Option<usize>,
}

impl SimulatedReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(tag: SimTag) -> Self {
        let mut reader = Self::new();
        reader.insert(tag);
        reader
    }

    /// Places a tag in the field, replacing any previous one.
    pub fn insert(&mut self, tag: SimTag) {
        self.tag = Some(tag);
        self.authenticated_sector = None;
        self.halted = false;
    }

    pub fn remove(&mut self) -> Option<SimTag> {
        self.authenticated_sector = None;
        self.tag.take()
    }

    pub fn tag(&self) -> Option<&SimTag> {
        self.tag.as_ref()
    }

    pub fn tag_mut(&mut self) -> Option<&mut SimTag> {
        self.tag.as_mut()
    }

    /// Makes a non-14443A target answer [`TagReader::poll_modulation`].
    pub fn add_target(&mut self, modulation: Modulation, id: &[u8]) {
        self.other_targets.push((modulation, id.to_vec()));
    }

    /// Takes the tag out of the field once `auths` more authentication
    /// attempts have been made.
    pub fn remove_after_auths(&mut self, auths: usize) {
        self.departs_after = Some(self.auth_calls + auths);
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls
    }

    pub fn reselect_calls(&self) -> usize {
        self.reselect_calls
    }

    /// Blocks or pages written successfully, in order.
    pub fn writes(&self) -> &[u16] {
        &self.writes
    }

    pub fn reset_counters(&mut self) {
        self.auth_calls = 0;
        self.reselect_calls = 0;
        self.writes.clear();
    }

    fn classic_access(&self, block: u16) -> bool {
        !self.halted && self.authenticated_sector == Some(sector_of_block(block))
    }
}

impl TagReader for SimulatedReader {
    fn poll_target(&mut self, _timeout: Duration) -> Option<PolledTarget> {
        let tag = self.tag.as_ref()?;
        self.authenticated_sector = None;
        self.halted = false;
        Some(PolledTarget {
            uid: tag.uid.clone(),
            atqa: tag.atqa,
            sak: tag.sak,
        })
    }

    fn poll_modulation(&mut self, modulation: Modulation, _timeout: Duration) -> Option<Vec<u8>> {
        self.other_targets
            .iter()
            .find(|(m, _)| *m == modulation)
            .map(|(_, id)| id.clone())
    }

    fn authenticate_block(&mut self, uid: &[u8], block: u16, key_type: KeyType, key: &Key) -> bool {
        if self.departs_after.is_some_and(|limit| self.auth_calls >= limit) {
            self.departs_after = None;
            self.tag = None;
        }
        self.auth_calls += 1;
        let Some(tag) = self.tag.as_ref() else {
            return false;
        };
        if self.halted || tag.uid != uid {
            return false;
        }
        let ok = tag.trailer_key(block, key_type).as_ref() == Some(key);
        trace!(block, %key_type, ok, "simulated auth");
        if ok {
            self.authenticated_sector = Some(sector_of_block(block));
        } else {
            self.authenticated_sector = None;
            self.halted = true;
        }
        ok
    }

    fn read_block(&mut self, block: u16) -> Option<[u8; 16]> {
        if !self.classic_access(block) {
            return None;
        }
        let tag = self.tag.as_ref()?;
        if !tag.readable(block) {
            return None;
        }
        let mut data = tag.block(block)?;
        if crate::nfc::sector::is_sector_trailer(block) {
            // Key A never reads back.
            data[..6].fill(0);
        }
        Some(data)
    }

    fn read_page(&mut self, page: u16) -> Option<[u8; 4]> {
        self.tag.as_ref()?.page(page)
    }

    fn write_block(&mut self, block: u16, data: &[u8; 16]) -> bool {
        if block == 0 || !self.classic_access(block) {
            return false;
        }
        let Some(SimTag {
            memory: Memory::Classic {
                blocks, protected, ..
            },
            ..
        }) = self.tag.as_mut()
        else {
            return false;
        };
        if protected.contains(&block) {
            return false;
        }
        match blocks.get_mut(usize::from(block)) {
            Some(slot) => {
                *slot = *data;
                self.writes.push(block);
                true
            }
            None => false,
        }
    }

    fn write_page(&mut self, page: u16, data: &[u8; 4]) -> bool {
        let Some(SimTag {
            memory: Memory::Ultralight { pages, locked_from },
            ..
        }) = self.tag.as_mut()
        else {
            return false;
        };
        if page < ULTRALIGHT_RESERVED_PAGES || page >= *locked_from {
            return false;
        }
        match pages.get_mut(usize::from(page)) {
            Some(slot) => {
                *slot = *data;
                self.writes.push(page);
                true
            }
            None => false,
        }
    }

    fn reselect(&mut self) -> bool {
        self.reselect_calls += 1;
        if self.tag.is_none() {
            return false;
        }
        self.authenticated_sector = None;
        self.halted = false;
        true
    }
}
