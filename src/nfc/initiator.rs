//! MIFARE command layer over a PN53x-class initiator.
//!
//! Turns the reader capability into raw MIFARE frames and hands them to a
//! [`Transceiver`]. Transport errors are logged and folded into the
//! capability's `None` / `false` results.

use std::time::Duration;

use tracing::debug;

use crate::nfc::card_trait::{Modulation, PolledTarget, TagReader, Transceiver};
use crate::nfc::keys::{Key, KeyType};

const CMD_READ: u8 = 0x30;
const CMD_WRITE_BLOCK: u8 = 0xA0;
const CMD_WRITE_PAGE: u8 = 0xA2;

/// Drives MIFARE Classic and Ultralight commands through `T`.
pub struct InitiatorReader<T> {
    transceiver: T,
    reselect_timeout: Duration,
}

impl<T: Transceiver> InitiatorReader<T> {
    pub fn new(transceiver: T, reselect_timeout: Duration) -> Self {
        Self {
            transceiver,
            reselect_timeout,
        }
    }

    pub fn into_inner(self) -> T {
        self.transceiver
    }

    fn exchange(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        match self.transceiver.transceive(frame) {
            Ok(answer) => Some(answer),
            Err(err) => {
                debug!(command = frame.first().copied().unwrap_or_default(), "exchange failed: {err:#}");
                None
            }
        }
    }

    fn select(&mut self, modulation: Modulation, timeout: Duration) -> Option<PolledTarget> {
        match self.transceiver.select_passive_target(modulation, timeout) {
            Ok(target) => target,
            Err(err) => {
                debug!(?modulation, "select failed: {err:#}");
                None
            }
        }
    }
}

/// `[auth cmd, block, key(6), uid(4)]`. Double-size UIDs authenticate with
/// their last four bytes.
fn auth_frame(uid: &[u8], block: u8, key_type: KeyType, key: &Key) -> Vec<u8> {
    let mut frame = Vec::with_capacity(12);
    frame.push(key_type.command_code());
    frame.push(block);
    frame.extend_from_slice(key);
    frame.extend_from_slice(&uid[uid.len().saturating_sub(4)..]);
    frame
}

impl<T: Transceiver> TagReader for InitiatorReader<T> {
    fn poll_target(&mut self, timeout: Duration) -> Option<PolledTarget> {
        self.select(Modulation::Iso14443A, timeout)
    }

    fn poll_modulation(&mut self, modulation: Modulation, timeout: Duration) -> Option<Vec<u8>> {
        self.select(modulation, timeout).map(|target| target.uid)
    }

    fn authenticate_block(&mut self, uid: &[u8], block: u16, key_type: KeyType, key: &Key) -> bool {
        let Ok(block) = u8::try_from(block) else {
            return false;
        };
        self.exchange(&auth_frame(uid, block, key_type, key)).is_some()
    }

    fn read_block(&mut self, block: u16) -> Option<[u8; 16]> {
        let block = u8::try_from(block).ok()?;
        let answer = self.exchange(&[CMD_READ, block])?;
        answer.get(..16)?.try_into().ok()
    }

    /// READ returns four pages; only the first is kept.
    fn read_page(&mut self, page: u16) -> Option<[u8; 4]> {
        let page = u8::try_from(page).ok()?;
        let answer = self.exchange(&[CMD_READ, page])?;
        answer.get(..4)?.try_into().ok()
    }

    fn write_block(&mut self, block: u16, data: &[u8; 16]) -> bool {
        let Ok(block) = u8::try_from(block) else {
            return false;
        };
        let mut frame = vec![CMD_WRITE_BLOCK, block];
        frame.extend_from_slice(data);
        self.exchange(&frame).is_some()
    }

    fn write_page(&mut self, page: u16, data: &[u8; 4]) -> bool {
        let Ok(page) = u8::try_from(page) else {
            return false;
        };
        let mut frame = vec![CMD_WRITE_PAGE, page];
        frame.extend_from_slice(data);
        self.exchange(&frame).is_some()
    }

    fn reselect(&mut self) -> bool {
        let timeout = self.reselect_timeout;
        self.select(Modulation::Iso14443A, timeout).is_some()
    }
}
