//! State carried between console commands.

use crate::error::{NfcError, Result};
use crate::nfc::clone::CloneBuffer;
use crate::nfc::tag::TagInfo;

/// The last scanned tag and the clone snapshot.
///
/// Owned by the console and handed to one command at a time. A command that
/// fails leaves both as they were.
#[derive(Debug, Default)]
pub struct Session {
    current_tag: Option<TagInfo>,
    clone: Option<CloneBuffer>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_tag(&self) -> Option<&TagInfo> {
        self.current_tag.as_ref()
    }

    /// The scanned tag, or [`NfcError::NoTagScanned`].
    pub fn require_tag(&self) -> Result<&TagInfo> {
        self.current_tag.as_ref().ok_or(NfcError::NoTagScanned)
    }

    pub fn set_tag(&mut self, tag: TagInfo) {
        self.current_tag = Some(tag);
    }

    pub fn clone_buffer(&self) -> Option<&CloneBuffer> {
        self.clone.as_ref()
    }

    /// Replaces any previous snapshot.
    pub fn store_clone(&mut self, buffer: CloneBuffer) {
        self.clone = Some(buffer);
    }

    /// Hands the snapshot to an apply, leaving the session without one.
    pub fn take_clone(&mut self) -> Result<CloneBuffer> {
        self.clone.take().ok_or(NfcError::CloneBufferEmpty)
    }

    /// Puts back a snapshot whose apply never reached a target.
    pub fn restore_clone(&mut self, buffer: CloneBuffer) {
        self.clone.get_or_insert(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_session_reports_preconditions() {
        let mut session = Session::new();
        assert!(matches!(session.require_tag(), Err(NfcError::NoTagScanned)));
        assert!(matches!(session.take_clone(), Err(NfcError::CloneBufferEmpty)));
    }

    #[test]
    fn scanned_tag_replaces_previous() {
        let mut session = Session::new();
        session.set_tag(TagInfo::new(0x0004, 0x08, &[1, 2, 3, 4]));
        session.set_tag(TagInfo::new(0x0044, 0x00, &[1, 2, 3, 4, 5, 6, 7]));
        assert_eq!(session.require_tag().unwrap().uid_len(), 7);
    }
}
