//! NFC multi-tool: scan, dump, key-audit, NDEF read/write and clone
//! MIFARE Classic and Ultralight/NTAG tags through a PN53x-class reader.

pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod nfc;
pub mod report;
pub mod session;
