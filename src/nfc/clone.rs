//! Clone buffer: whole-tag snapshot capture and replay onto a target.

use tracing::{debug, info, warn};

use crate::error::{MemoryUnit, NfcError, Result};
use crate::nfc::card_trait::TagReader;
use crate::nfc::keys::{self, KeyRecovery, KeyType, FACTORY_DEFAULT_KEY};
use crate::nfc::sector::{self, BLOCK_SIZE};
use crate::nfc::tag::{TagFamily, TagInfo, TagType};
use crate::nfc::ultralight::{self, FIRST_USER_PAGE, PAGE_SIZE};

/// Snapshot of one source tag. Classic snapshots always cover the full
/// geometry; Ultralight snapshots end at the first unreadable page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneBuffer {
    tag_type: TagType,
    source_uid: Vec<u8>,
    bytes: Vec<u8>,
}

impl CloneBuffer {
    pub fn tag_type(&self) -> TagType {
        self.tag_type
    }

    pub fn source_uid(&self) -> &[u8] {
        &self.source_uid
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn unit(&self) -> MemoryUnit {
        match self.tag_type.family() {
            TagFamily::Ultralight => MemoryUnit::Page,
            TagFamily::Classic | TagFamily::Other => MemoryUnit::Block,
        }
    }

    fn unit_size(&self) -> usize {
        match self.unit() {
            MemoryUnit::Block => BLOCK_SIZE,
            MemoryUnit::Page => PAGE_SIZE,
        }
    }

    /// Number of blocks or pages held.
    pub fn unit_count(&self) -> usize {
        self.bytes.len() / self.unit_size()
    }

    fn unit_bytes(&self, index: u16) -> Option<&[u8]> {
        let size = self.unit_size();
        let start = usize::from(index) * size;
        self.bytes.get(start..start + size)
    }
}

/// A fresh snapshot and the problems met while taking it.
#[derive(Debug)]
pub struct Capture {
    pub buffer: CloneBuffer,
    /// Locked sectors and unreadable blocks, all zero-filled in the buffer.
    pub failures: Vec<NfcError>,
}

/// Reads `tag` into a new buffer of at most `capacity` bytes.
///
/// Classic sectors that no dictionary key opens, and blocks that fail to
/// read, are zero-filled so the snapshot keeps the tag's geometry. A tag
/// that leaves the field fails the whole capture with
/// [`NfcError::NotPresent`].
pub fn capture<R: TagReader + ?Sized>(
    reader: &mut R,
    tag: &TagInfo,
    recovery: &KeyRecovery<'_>,
    capacity: usize,
) -> Result<Capture> {
    let mut failures = Vec::new();
    let bytes = match tag.tag_type.family() {
        TagFamily::Classic => capture_classic(reader, tag, recovery, capacity, &mut failures)?,
        TagFamily::Ultralight => capture_ultralight(reader, capacity)?,
        TagFamily::Other => {
            return Err(NfcError::Unsupported {
                operation: "Clone",
                tag: tag.tag_type,
            })
        }
    };
    if bytes.is_empty() {
        return Err(NfcError::ReadFailed { block: 0 });
    }
    info!(bytes = bytes.len(), failures = failures.len(), "clone buffer captured");
    Ok(Capture {
        buffer: CloneBuffer {
            tag_type: tag.tag_type,
            source_uid: tag.uid().to_vec(),
            bytes,
        },
        failures,
    })
}

fn capture_classic<R: TagReader + ?Sized>(
    reader: &mut R,
    tag: &TagInfo,
    recovery: &KeyRecovery<'_>,
    capacity: usize,
    failures: &mut Vec<NfcError>,
) -> Result<Vec<u8>> {
    let len = usize::from(sector::total_blocks(tag.tag_type)) * BLOCK_SIZE;
    if len > capacity {
        return Err(NfcError::OversizeInput { len, max: capacity });
    }
    let mut bytes = Vec::with_capacity(len);
    for descriptor in sector::sectors(tag.tag_type) {
        let sector_len = usize::from(descriptor.block_count) * BLOCK_SIZE;
        if recovery
            .authenticate_sector(reader, tag.uid(), descriptor.first_block)?
            .is_none()
        {
            failures.push(NfcError::AuthFailed {
                sector: descriptor.sector_index,
            });
            bytes.resize(bytes.len() + sector_len, 0);
            continue;
        }
        for block in descriptor.first_block..descriptor.first_block + descriptor.block_count {
            match reader.read_block(block) {
                Some(data) => bytes.extend_from_slice(&data),
                None => {
                    debug!(block, "read failed, zero-filled");
                    failures.push(NfcError::ReadFailed { block });
                    bytes.extend_from_slice(&[0u8; BLOCK_SIZE]);
                }
            }
        }
    }
    Ok(bytes)
}

fn capture_ultralight<R: TagReader + ?Sized>(reader: &mut R, capacity: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for (page, data) in ultralight::dump(reader) {
        if bytes.len() + PAGE_SIZE > capacity {
            return Err(NfcError::OversizeInput {
                len: (usize::from(page) + 1) * PAGE_SIZE,
                max: capacity,
            });
        }
        bytes.extend_from_slice(&data);
    }
    Ok(bytes)
}

/// Outcome of replaying a buffer onto a target.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Blocks or pages written.
    pub written: usize,
    /// Sectors skipped or the page that ended the apply, in order.
    pub failures: Vec<NfcError>,
}

/// Classic blocks a snapshot of `total_blocks` may write: everything except
/// the manufacturer block and the sector trailers.
pub fn classic_write_candidates(total_blocks: u16) -> impl Iterator<Item = u16> {
    (1..total_blocks).filter(|&block| !sector::is_sector_trailer(block))
}

/// Writes `buffer` onto the selected `target`.
///
/// A target of another family than the source is refused before any write.
pub fn apply<R: TagReader + ?Sized>(
    reader: &mut R,
    buffer: &CloneBuffer,
    target: &TagInfo,
    recovery: &KeyRecovery<'_>,
) -> Result<ApplyReport> {
    if buffer.tag_type.family() != target.tag_type.family() {
        return Err(NfcError::TagTypeMismatch {
            buffer: buffer.tag_type,
            target: target.tag_type,
        });
    }
    match buffer.tag_type.family() {
        TagFamily::Classic => apply_classic(reader, buffer, target, recovery),
        TagFamily::Ultralight => Ok(apply_ultralight(reader, buffer)),
        TagFamily::Other => Err(NfcError::Unsupported {
            operation: "Clone",
            tag: buffer.tag_type,
        }),
    }
}

fn open_target_sector<R: TagReader + ?Sized>(
    reader: &mut R,
    target: &TagInfo,
    recovery: &KeyRecovery<'_>,
    block: u16,
) -> Result<bool> {
    if reader.authenticate_block(target.uid(), block, KeyType::A, &FACTORY_DEFAULT_KEY) {
        return Ok(true);
    }
    keys::reselect(reader)?;
    Ok(recovery
        .authenticate_sector(reader, target.uid(), block)?
        .is_some())
}

fn apply_classic<R: TagReader + ?Sized>(
    reader: &mut R,
    buffer: &CloneBuffer,
    target: &TagInfo,
    recovery: &KeyRecovery<'_>,
) -> Result<ApplyReport> {
    let total = u16::try_from(buffer.unit_count())
        .unwrap_or(u16::MAX)
        .min(sector::total_blocks(target.tag_type));
    let mut report = ApplyReport::default();
    let mut skip_until = None;

    for block in classic_write_candidates(total) {
        if skip_until.is_some_and(|last| block <= last) {
            continue;
        }
        // Block 1 opens sector 0 since block 0 is never written.
        if block == sector::sector_first_block(block) || block == 1 {
            if !open_target_sector(reader, target, recovery, block)? {
                let sector = sector::sector_of_block(block);
                debug!(sector, "target sector skipped");
                report.failures.push(NfcError::AuthFailed { sector });
                skip_until = Some(sector::sector_last_block(block));
                continue;
            }
        }
        let mut data = [0u8; BLOCK_SIZE];
        if let Some(source) = buffer.unit_bytes(block) {
            data.copy_from_slice(source);
        }
        if reader.write_block(block, &data) {
            report.written += 1;
        } else {
            warn!(block, "target write failed, rest of sector skipped");
            report.failures.push(NfcError::WriteFailed {
                unit: MemoryUnit::Block,
                index: block,
            });
            skip_until = Some(sector::sector_last_block(block));
        }
    }
    info!(written = report.written, "clone applied");
    Ok(report)
}

fn apply_ultralight<R: TagReader + ?Sized>(reader: &mut R, buffer: &CloneBuffer) -> ApplyReport {
    let total = u16::try_from(buffer.unit_count()).unwrap_or(u16::MAX);
    let mut report = ApplyReport::default();
    for page in FIRST_USER_PAGE..total {
        let mut data = [0u8; PAGE_SIZE];
        if let Some(source) = buffer.unit_bytes(page) {
            data.copy_from_slice(source);
        }
        if !reader.write_page(page, &data) {
            warn!(page, "page write failed, apply aborted");
            report.failures.push(NfcError::WriteFailed {
                unit: MemoryUnit::Page,
                index: page,
            });
            break;
        }
        report.written += 1;
    }
    info!(written = report.written, "clone applied");
    report
}
