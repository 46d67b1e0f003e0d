//! Known-key dictionary and the authentication-selection policy built on it.

use std::fmt;

use tracing::{debug, warn};

use crate::error::{NfcError, Result};
use crate::nfc::card_trait::TagReader;
use crate::nfc::sector::sector_of_block;

/// A 6-byte MIFARE Classic sector key.
pub type Key = [u8; 6];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    A,
    B,
}

impl KeyType {
    /// MIFARE AUTH command byte.
    pub fn command_code(self) -> u8 {
        match self {
            KeyType::A => 0x60,
            KeyType::B => 0x61,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::A => f.write_str("A"),
            KeyType::B => f.write_str("B"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownKey {
    pub key: Key,
    pub label: &'static str,
}

/// Well-known keys in trial order. The order is observable: audits report
/// the first key of this list that authenticates.
pub const KNOWN_KEYS: [KnownKey; 10] = [
    KnownKey { key: [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF], label: "Factory default" },
    KnownKey { key: [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5], label: "MAD key A" },
    KnownKey { key: [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5], label: "MAD key B" },
    KnownKey { key: [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7], label: "NFC Forum / NDEF" },
    KnownKey { key: [0x00, 0x00, 0x00, 0x00, 0x00, 0x00], label: "Zeros" },
    KnownKey { key: [0xA0, 0xB0, 0xC0, 0xD0, 0xE0, 0xF0], label: "Transport" },
    KnownKey { key: [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF], label: "Transport" },
    KnownKey { key: [0x4D, 0x3A, 0x99, 0xC3, 0x51, 0xDD], label: "Infineon" },
    KnownKey { key: [0x1A, 0x98, 0x2C, 0x7E, 0x45, 0x9A], label: "Gallagher" },
    KnownKey { key: [0x71, 0x4C, 0x5C, 0x88, 0x6E, 0x97], label: "Samsung/Philips" },
];

pub const FACTORY_DEFAULT_KEY: Key = KNOWN_KEYS[0].key;

/// The key that opened a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorKey {
    pub key_type: KeyType,
    pub key_index: usize,
}

/// Independent Key A / Key B findings for one sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorAudit {
    pub sector: u8,
    pub key_a: Option<usize>,
    pub key_b: Option<usize>,
}

/// Brute-force authentication over an ordered key dictionary.
#[derive(Debug, Clone, Copy)]
pub struct KeyRecovery<'k> {
    keys: &'k [KnownKey],
}

impl Default for KeyRecovery<'static> {
    fn default() -> Self {
        Self { keys: &KNOWN_KEYS }
    }
}

impl<'k> KeyRecovery<'k> {
    pub fn with_keys(keys: &'k [KnownKey]) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &'k [KnownKey] {
        self.keys
    }

    /// Tries every key in order and returns the index of the first that
    /// authenticates `first_block`.
    ///
    /// A failed trial leaves the tag halted, so the reader is re-selected
    /// before the next trial. No re-select follows the last trial. A tag that
    /// does not answer the re-select ends the search with
    /// [`NfcError::NotPresent`].
    pub fn try_authenticate<R: TagReader + ?Sized>(
        &self,
        reader: &mut R,
        uid: &[u8],
        first_block: u16,
        key_type: KeyType,
    ) -> Result<Option<usize>> {
        for (index, known) in self.keys.iter().enumerate() {
            if reader.authenticate_block(uid, first_block, key_type, &known.key) {
                debug!(block = first_block, key_index = index, %key_type, "authenticated");
                return Ok(Some(index));
            }
            if index + 1 < self.keys.len() {
                reselect(reader)?;
            }
        }
        Ok(None)
    }

    /// Read policy used by dump, NDEF and clone capture: Key A first, then
    /// Key B, first success wins.
    ///
    /// On total failure the tag is re-selected so the caller can move on to
    /// the next sector.
    pub fn authenticate_sector<R: TagReader + ?Sized>(
        &self,
        reader: &mut R,
        uid: &[u8],
        first_block: u16,
    ) -> Result<Option<SectorKey>> {
        for key_type in [KeyType::A, KeyType::B] {
            if let Some(key_index) = self.try_authenticate(reader, uid, first_block, key_type)? {
                return Ok(Some(SectorKey {
                    key_type,
                    key_index,
                }));
            }
            reselect(reader)?;
        }
        warn!(
            sector = sector_of_block(first_block),
            "no dictionary key authenticated sector"
        );
        Ok(None)
    }

    /// Audit policy: Key A and Key B each get a full, independent pass so the
    /// report shows which of the two is weak.
    pub fn audit_sector<R: TagReader + ?Sized>(
        &self,
        reader: &mut R,
        uid: &[u8],
        first_block: u16,
    ) -> Result<SectorAudit> {
        let key_a = self.try_authenticate(reader, uid, first_block, KeyType::A)?;
        if key_a.is_none() {
            reselect(reader)?;
        }
        let key_b = self.try_authenticate(reader, uid, first_block, KeyType::B)?;
        if key_b.is_none() {
            reselect(reader)?;
        }
        Ok(SectorAudit {
            sector: sector_of_block(first_block),
            key_a,
            key_b,
        })
    }
}

/// Re-selects the tag after a failed trial.
pub fn reselect<R: TagReader + ?Sized>(reader: &mut R) -> Result<()> {
    if reader.reselect() {
        Ok(())
    } else {
        debug!("tag did not answer re-select");
        Err(NfcError::NotPresent)
    }
}
