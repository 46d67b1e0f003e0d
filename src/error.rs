//! Error types for tag operations.

use thiserror::Error;

use crate::nfc::tag::TagType;

/// Page or block, for messages that can refer to either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUnit {
    Block,
    Page,
}

impl std::fmt::Display for MemoryUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryUnit::Block => f.write_str("block"),
            MemoryUnit::Page => f.write_str("page"),
        }
    }
}

/// Errors surfaced to the command that triggered them.
///
/// None of these are fatal to the process. Operations that fail leave the
/// session (current tag and clone buffer) as it was.
#[derive(Debug, Error)]
pub enum NfcError {
    // === Presence / preconditions ===
    /// Poll or re-select timed out: the tag is absent or was moved.
    #[error("Tag not present.")]
    NotPresent,

    #[error("No tag scanned. Run SCAN first.")]
    NoTagScanned,

    #[error("Clone buffer empty. Run CLONE READ first.")]
    CloneBufferEmpty,

    // === Tag access ===
    /// No dictionary key authenticated the sector.
    #[error("authentication failed on sector {sector}")]
    AuthFailed { sector: u8 },

    /// Sector 0 could not be authenticated or its MAD blocks could not be read.
    #[error("Cannot read MAD (auth failed on sector 0).")]
    MadUnreadable,

    #[error("read failed at block {block}")]
    ReadFailed { block: u16 },

    #[error("Write failed at {unit} {index}")]
    WriteFailed { unit: MemoryUnit, index: u16 },

    // === Input validation ===
    /// Content does not fit its bounded buffer. Never truncated silently.
    #[error("input of {len} bytes exceeds the {max}-byte limit")]
    OversizeInput { len: usize, max: usize },

    #[error("language code must be 1 to 63 bytes, got {len}")]
    InvalidLanguage { len: usize },

    #[error("{operation} not supported for this tag type ({tag}).")]
    Unsupported {
        operation: &'static str,
        tag: TagType,
    },

    #[error("target tag is {target} but the clone buffer holds {buffer}")]
    TagTypeMismatch { buffer: TagType, target: TagType },
}

pub type Result<T> = std::result::Result<T, NfcError>;

/// Failure of one console command: either a reported tag outcome or an
/// error writing the report itself.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Nfc(#[from] NfcError),
    #[error("failed to write console output")]
    Output(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_messages_match_console_text() {
        assert_eq!(
            NfcError::NoTagScanned.to_string(),
            "No tag scanned. Run SCAN first."
        );
        assert_eq!(
            NfcError::CloneBufferEmpty.to_string(),
            "Clone buffer empty. Run CLONE READ first."
        );
    }

    #[test]
    fn write_failure_names_the_unit() {
        let err = NfcError::WriteFailed {
            unit: MemoryUnit::Page,
            index: 9,
        };
        assert_eq!(err.to_string(), "Write failed at page 9");
    }
}
