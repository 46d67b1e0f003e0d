use std::time::Duration;

use anyhow::Result;

use crate::nfc::keys::{Key, KeyType};

/// Anti-collision answer of a polled ISO 14443A target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledTarget {
    pub uid: Vec<u8>,
    pub atqa: u16,
    pub sak: u8,
}

/// Passive modulations a reader may poll for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Iso14443A,
    Iso14443B,
    /// FeliCa at 212 kbps.
    Felica,
}

/// Synchronous reader capability consumed by every tag operation.
///
/// Each call blocks until it completes or its timeout elapses. A timeout is
/// reported the same way as an absent tag (`None` / `false`). Backends are
/// expected to log transport errors and fold them into those results.
pub trait TagReader {
    /// Polls for an ISO 14443A target.
    fn poll_target(&mut self, timeout: Duration) -> Option<PolledTarget>;

    /// Polls for a target of another modulation and returns its ID bytes.
    /// Readers without that modulation never find anything.
    fn poll_modulation(&mut self, modulation: Modulation, timeout: Duration) -> Option<Vec<u8>> {
        let _ = (modulation, timeout);
        None
    }

    /// Crypto1 authentication of `block` against the selected target.
    fn authenticate_block(&mut self, uid: &[u8], block: u16, key_type: KeyType, key: &Key) -> bool;

    /// Reads one 16-byte Classic block.
    fn read_block(&mut self, block: u16) -> Option<[u8; 16]>;

    /// Reads one 4-byte Ultralight page.
    fn read_page(&mut self, page: u16) -> Option<[u8; 4]>;

    fn write_block(&mut self, block: u16, data: &[u8; 16]) -> bool;

    fn write_page(&mut self, page: u16, data: &[u8; 4]) -> bool;

    /// Re-establishes field presence. The tag's authentication state is
    /// undefined after a failed attempt until this succeeds.
    fn reselect(&mut self) -> bool;
}

impl<T: TagReader + ?Sized> TagReader for Box<T> {
    fn poll_target(&mut self, timeout: Duration) -> Option<PolledTarget> {
        (**self).poll_target(timeout)
    }

    fn poll_modulation(&mut self, modulation: Modulation, timeout: Duration) -> Option<Vec<u8>> {
        (**self).poll_modulation(modulation, timeout)
    }

    fn authenticate_block(&mut self, uid: &[u8], block: u16, key_type: KeyType, key: &Key) -> bool {
        (**self).authenticate_block(uid, block, key_type, key)
    }

    fn read_block(&mut self, block: u16) -> Option<[u8; 16]> {
        (**self).read_block(block)
    }

    fn read_page(&mut self, page: u16) -> Option<[u8; 4]> {
        (**self).read_page(page)
    }

    fn write_block(&mut self, block: u16, data: &[u8; 16]) -> bool {
        (**self).write_block(block, data)
    }

    fn write_page(&mut self, page: u16, data: &[u8; 4]) -> bool {
        (**self).write_page(page, data)
    }

    fn reselect(&mut self) -> bool {
        (**self).reselect()
    }
}

/// Raw frame exchange with a PN53x-class initiator.
///
/// This lets the same MIFARE command layer run over PC/SC and libnfc.
pub trait Transceiver {
    /// Selects a passive target. `Ok(None)` means nothing answered before
    /// the timeout.
    fn select_passive_target(
        &mut self,
        modulation: Modulation,
        timeout: Duration,
    ) -> Result<Option<PolledTarget>>;

    /// Sends a frame to the selected target and returns its answer.
    fn transceive(&mut self, frame: &[u8]) -> Result<Vec<u8>>;
}
