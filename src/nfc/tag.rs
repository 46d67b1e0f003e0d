//! Tag identification from ISO 14443-3 anti-collision fields.

use std::fmt;

/// Longest UID carried in a [`TagInfo`] (double-size UID).
pub const MAX_UID_LEN: usize = 7;

/// Behavioral tag type. Every operation dispatches on this with an
/// exhaustive `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagType {
    ClassicMini,
    Classic1K,
    Classic4K,
    Ultralight,
    Plus2K,
    Plus4K,
    DesFire,
    Iso14443_4,
    Unknown,
}

/// Coarse grouping used to pick the memory model of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFamily {
    /// Sector/block memory guarded by Crypto1 keys.
    Classic,
    /// Flat 4-byte page memory.
    Ultralight,
    /// Anything the tool cannot address directly.
    Other,
}

impl TagType {
    pub fn family(self) -> TagFamily {
        match self {
            TagType::ClassicMini | TagType::Classic1K | TagType::Classic4K => TagFamily::Classic,
            TagType::Ultralight => TagFamily::Ultralight,
            TagType::Plus2K
            | TagType::Plus4K
            | TagType::DesFire
            | TagType::Iso14443_4
            | TagType::Unknown => TagFamily::Other,
        }
    }

    pub fn is_classic(self) -> bool {
        self.family() == TagFamily::Classic
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TagType::ClassicMini => "MIFARE Classic Mini",
            TagType::Classic1K => "MIFARE Classic 1K",
            TagType::Classic4K => "MIFARE Classic 4K",
            TagType::Ultralight => "MIFARE Ultralight",
            TagType::Plus2K => "MIFARE Plus 2K",
            TagType::Plus4K => "MIFARE Plus 4K",
            TagType::DesFire => "MIFARE DESFire",
            TagType::Iso14443_4 => "ISO 14443-4",
            TagType::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// Maps `(atqa, sak, uid_len)` to a tag type and display name.
///
/// SAK is the primary discriminator. ATQA only separates DESFire from generic
/// ISO 14443-4 (both answer SAK 0x20), and the UID length only changes the
/// Ultralight label. Unmapped SAK values classify as [`TagType::Unknown`].
pub fn classify(atqa: u16, sak: u8, uid_len: u8) -> (TagType, &'static str) {
    match sak {
        0x09 => (TagType::ClassicMini, "MIFARE Classic Mini"),
        0x08 => (TagType::Classic1K, "MIFARE Classic 1K"),
        0x18 => (TagType::Classic4K, "MIFARE Classic 4K"),
        0x00 if uid_len == 7 => (TagType::Ultralight, "MIFARE Ultralight / NTAG"),
        0x00 => (TagType::Ultralight, "MIFARE Ultralight"),
        0x10 => (TagType::Plus2K, "MIFARE Plus 2K"),
        0x11 => (TagType::Plus4K, "MIFARE Plus 4K"),
        0x20 if atqa & 0x0F == 0x03 => (TagType::DesFire, "MIFARE DESFire"),
        0x20 => (TagType::Iso14443_4, "ISO 14443-4"),
        _ => (TagType::Unknown, "Unknown"),
    }
}

/// A classified tag. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub tag_type: TagType,
    pub name: &'static str,
    pub atqa: u16,
    pub sak: u8,
    uid: Vec<u8>,
}

impl TagInfo {
    /// Classifies a polled target. UIDs longer than [`MAX_UID_LEN`] are cut
    /// to the first seven bytes, the way the anti-collision cascade reports them.
    pub fn new(atqa: u16, sak: u8, uid: &[u8]) -> Self {
        let uid = uid[..uid.len().min(MAX_UID_LEN)].to_vec();
        let (tag_type, name) = classify(atqa, sak, uid.len() as u8);
        Self {
            tag_type,
            name,
            atqa,
            sak,
            uid,
        }
    }

    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    pub fn uid_len(&self) -> u8 {
        self.uid.len() as u8
    }
}
