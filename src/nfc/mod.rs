pub mod card_trait;
pub mod classic;
pub mod clone;
pub mod initiator;
pub mod keys;
pub mod mad;
pub mod ndef;
pub mod sector;
pub mod simulated;
pub mod tag;
pub mod ultralight;

#[cfg(feature = "pcsc")]
pub mod reader;

#[cfg(feature = "libnfc")]
pub mod reader_libnfc;

use anyhow::Result;
use tracing::info;

use crate::config::{Config, ReaderKind, SimulatedTagKind};

pub use card_trait::{Modulation, PolledTarget, TagReader, Transceiver};
pub use initiator::InitiatorReader;
pub use simulated::{SimTag, SimulatedReader};
pub use tag::{TagInfo, TagType};

#[cfg(feature = "pcsc")]
pub use reader::PcscTransceiver;

#[cfg(feature = "libnfc")]
pub use reader_libnfc::LibnfcTransceiver;

const DEMO_UID_4: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];
const DEMO_UID_7: [u8; 7] = [0x04, 0x5A, 0x21, 0x9C, 0x3B, 0x61, 0x80];
const DEMO_URL: &str = "https://example.com/nfc";

/// NTAG216 page count.
const DEMO_ULTRALIGHT_PAGES: u16 = 231;

/// Tag for a simulator dry run: an NDEF-formatted Classic or NTAG holding
/// a URL record.
pub fn demo_tag(kind: SimulatedTagKind) -> Result<Option<SimTag>> {
    let (prefix_code, tail) = ndef::split_uri_prefix(DEMO_URL);
    let message = ndef::build_uri_record(prefix_code, tail)?;
    let tag = match kind {
        SimulatedTagKind::Classic1k | SimulatedTagKind::Classic4k => {
            let mut tag = if kind == SimulatedTagKind::Classic4k {
                SimTag::classic_4k(&DEMO_UID_4)
            } else {
                SimTag::classic_1k(&DEMO_UID_4)
            };
            let mut mad1 = [0u8; sector::BLOCK_SIZE];
            mad1[2..4].copy_from_slice(&mad::NDEF_AID.to_be_bytes());
            tag.set_block(1, mad1);
            for (block, chunk) in (4..7).zip(message.chunks(sector::BLOCK_SIZE)) {
                let mut data = [0u8; sector::BLOCK_SIZE];
                data[..chunk.len()].copy_from_slice(chunk);
                tag.set_block(block, data);
            }
            tag.set_sector_keys(1, [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7], [0xFF; 6]);
            tag
        }
        SimulatedTagKind::Ultralight => {
            let mut tag = SimTag::ultralight(&DEMO_UID_7, DEMO_ULTRALIGHT_PAGES);
            tag.load_pages(ultralight::FIRST_USER_PAGE, &message);
            tag
        }
        SimulatedTagKind::Empty => return Ok(None),
    };
    Ok(Some(tag))
}

/// Builds the reader backend named by `config`.
pub fn open_reader(config: &Config) -> Result<Box<dyn TagReader>> {
    match config.reader {
        ReaderKind::Simulated => {
            let mut reader = SimulatedReader::new();
            if let Some(tag) = demo_tag(config.simulate)? {
                reader.insert(tag);
            }
            info!(tag = ?config.simulate, "simulated reader ready");
            Ok(Box::new(reader))
        }
        ReaderKind::Pcsc => open_pcsc(config),
        ReaderKind::Libnfc => open_libnfc(config),
    }
}

#[cfg(feature = "pcsc")]
fn open_pcsc(config: &Config) -> Result<Box<dyn TagReader>> {
    let transceiver = PcscTransceiver::open(config.pcsc_reader.as_deref())?;
    Ok(Box::new(InitiatorReader::new(
        transceiver,
        config.reselect_timeout(),
    )))
}

#[cfg(not(feature = "pcsc"))]
fn open_pcsc(_config: &Config) -> Result<Box<dyn TagReader>> {
    anyhow::bail!("this build has no PC/SC support (rebuild with --features pcsc)")
}

#[cfg(feature = "libnfc")]
fn open_libnfc(config: &Config) -> Result<Box<dyn TagReader>> {
    let transceiver = LibnfcTransceiver::open(config.libnfc_device.as_deref())?;
    Ok(Box::new(InitiatorReader::new(
        transceiver,
        config.reselect_timeout(),
    )))
}

#[cfg(not(feature = "libnfc"))]
fn open_libnfc(_config: &Config) -> Result<Box<dyn TagReader>> {
    anyhow::bail!("this build has no libnfc support (rebuild with --features libnfc)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_classic_carries_a_readable_ndef_url() {
        let sim = demo_tag(SimulatedTagKind::Classic1k).unwrap().unwrap();
        let mut reader = SimulatedReader::with_tag(sim);
        let tag = TagInfo::new(0x0004, 0x08, &DEMO_UID_4);
        let area =
            classic::read_ndef_area(&mut reader, &tag, &keys::KeyRecovery::default()).unwrap();
        let scan = ndef::parse_tlv_stream(&area.bytes);
        assert_eq!(scan.records[0].content().uri().as_deref(), Some(DEMO_URL));
    }

    #[test]
    fn empty_field_has_no_tag() {
        assert!(demo_tag(SimulatedTagKind::Empty).unwrap().is_none());
    }

    #[test]
    fn simulated_backend_opens_without_hardware() {
        let config = Config {
            reader: ReaderKind::Simulated,
            simulate: SimulatedTagKind::Ultralight,
            ..Config::default()
        };
        let mut reader = open_reader(&config).unwrap();
        let target = reader.poll_target(config.scan_timeout()).unwrap();
        assert_eq!(target.uid, DEMO_UID_7);
    }
}
