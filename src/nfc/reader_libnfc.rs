//! libnfc backend.
#![allow(unsafe_code)]

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::nfc::card_trait::{Modulation, PolledTarget, Transceiver};

#[repr(C)]
struct NfcDevice {
    _private: [u8; 0],
}

#[repr(C)]
struct NfcContext {
    _private: [u8; 0],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct NfcModulation {
    nmt: c_int,
    nbr: c_int,
}

const NMT_ISO14443A: c_int = 1;
const NMT_ISO14443B: c_int = 3;
const NMT_FELICA: c_int = 7;
const NBR_106: c_int = 1;
const NBR_212: c_int = 2;

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct Iso14443aInfo {
    atqa: [u8; 2],
    sak: u8,
    uid_len: usize,
    uid: [u8; 10],
    ats_len: usize,
    ats: [u8; 254],
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct FelicaInfo {
    len: usize,
    res_code: u8,
    id: [u8; 8],
    pad: [u8; 8],
    sys_code: [u8; 2],
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct Iso14443bInfo {
    pupi: [u8; 4],
    application_data: [u8; 4],
    protocol_info: [u8; 3],
    card_identifier: u8,
}

/// `nfc_target_info`. The padding member keeps the union at least as large
/// as libnfc's own.
#[repr(C)]
#[allow(dead_code)]
union NfcTargetInfo {
    iso14443a: Iso14443aInfo,
    felica: FelicaInfo,
    iso14443b: Iso14443bInfo,
    _size: [usize; 64],
}

#[repr(C)]
#[allow(dead_code)]
struct NfcTarget {
    nti: NfcTargetInfo,
    nm: NfcModulation,
}

#[link(name = "nfc")]
extern "C" {
    fn nfc_init(context: *mut *mut NfcContext);
    fn nfc_exit(context: *mut NfcContext);
    fn nfc_open(context: *mut NfcContext, connstring: *const c_char) -> *mut NfcDevice;
    fn nfc_close(device: *mut NfcDevice);
    fn nfc_initiator_init(device: *mut NfcDevice) -> c_int;
    fn nfc_initiator_poll_target(
        device: *mut NfcDevice,
        modulations: *const NfcModulation,
        modulation_count: usize,
        poll_count: u8,
        period: u8,
        target: *mut NfcTarget,
    ) -> c_int;
    fn nfc_initiator_transceive_bytes(
        device: *mut NfcDevice,
        tx: *const u8,
        tx_len: usize,
        rx: *mut u8,
        rx_len: usize,
        timeout: c_int,
    ) -> c_int;
    fn nfc_device_get_name(device: *mut NfcDevice) -> *const c_char;
    fn nfc_strerror(device: *const NfcDevice) -> *const c_char;
}

/// Device strings tried in order when none is configured.
const FALLBACK_CONNSTRINGS: [&str; 2] = ["acr122_usb:", "acr122_pcsc:"];

/// One poll period of `nfc_initiator_poll_target` (units of 150 ms).
const POLL_PERIOD_UNITS: u8 = 2;
const POLL_PERIOD: Duration = Duration::from_millis(150 * POLL_PERIOD_UNITS as u64);

const TRANSCEIVE_TIMEOUT_MS: c_int = 500;

pub struct LibnfcTransceiver {
    context: *mut NfcContext,
    device: *mut NfcDevice,
}

impl LibnfcTransceiver {
    /// Opens `connstring`, or libnfc's default device followed by the
    /// ACR122 drivers when none is given.
    pub fn open(connstring: Option<&str>) -> Result<Self> {
        let mut context: *mut NfcContext = ptr::null_mut();
        unsafe { nfc_init(&mut context) };
        if context.is_null() {
            bail!("failed to initialise libnfc");
        }
        // Owned from here so the context is released on every error path.
        let mut reader = Self {
            context,
            device: ptr::null_mut(),
        };

        reader.device = match connstring {
            Some(connstring) => reader.open_device(Some(connstring))?,
            None => {
                let mut device = reader.open_device(None)?;
                for fallback in FALLBACK_CONNSTRINGS {
                    if !device.is_null() {
                        break;
                    }
                    device = reader.open_device(Some(fallback))?;
                }
                device
            }
        };
        if reader.device.is_null() {
            bail!("failed to open an NFC device, check the libnfc configuration");
        }

        info!(device = %reader.device_name(), "libnfc device opened");
        if unsafe { nfc_initiator_init(reader.device) } < 0 {
            bail!("failed to initialise the NFC initiator: {}", reader.last_error());
        }
        Ok(reader)
    }

    fn open_device(&self, connstring: Option<&str>) -> Result<*mut NfcDevice> {
        let connstring = connstring
            .map(CString::new)
            .transpose()
            .context("connection string contains a NUL byte")?;
        let pointer = connstring.as_ref().map_or(ptr::null(), |c| c.as_ptr());
        Ok(unsafe { nfc_open(self.context, pointer) })
    }

    fn device_name(&self) -> String {
        let name = unsafe { nfc_device_get_name(self.device) };
        if name.is_null() {
            return "unknown".to_owned();
        }
        unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
    }

    fn last_error(&self) -> String {
        let message = unsafe { nfc_strerror(self.device) };
        if message.is_null() {
            return "unknown error".to_owned();
        }
        unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
    }
}

fn modulation_of(modulation: Modulation) -> NfcModulation {
    match modulation {
        Modulation::Iso14443A => NfcModulation {
            nmt: NMT_ISO14443A,
            nbr: NBR_106,
        },
        Modulation::Iso14443B => NfcModulation {
            nmt: NMT_ISO14443B,
            nbr: NBR_106,
        },
        Modulation::Felica => NfcModulation {
            nmt: NMT_FELICA,
            nbr: NBR_212,
        },
    }
}

fn poll_count(timeout: Duration) -> u8 {
    let periods = timeout.as_millis().div_ceil(POLL_PERIOD.as_millis()).max(1);
    u8::try_from(periods).unwrap_or(u8::MAX)
}

impl Transceiver for LibnfcTransceiver {
    fn select_passive_target(
        &mut self,
        modulation: Modulation,
        timeout: Duration,
    ) -> Result<Option<PolledTarget>> {
        let modulations = [modulation_of(modulation)];
        let mut target = NfcTarget {
            nti: NfcTargetInfo { _size: [0; 64] },
            nm: modulations[0],
        };
        let found = unsafe {
            nfc_initiator_poll_target(
                self.device,
                modulations.as_ptr(),
                modulations.len(),
                poll_count(timeout),
                POLL_PERIOD_UNITS,
                &mut target,
            )
        };
        if found <= 0 {
            debug!(?modulation, code = found, "no target");
            return Ok(None);
        }

        // The union member read matches the modulation that was polled.
        let polled = match modulation {
            Modulation::Iso14443A => {
                let info = unsafe { target.nti.iso14443a };
                let uid_len = info.uid_len.min(info.uid.len());
                PolledTarget {
                    uid: info.uid[..uid_len].to_vec(),
                    atqa: u16::from_be_bytes(info.atqa),
                    sak: info.sak,
                }
            }
            Modulation::Iso14443B => PolledTarget {
                uid: unsafe { target.nti.iso14443b }.pupi.to_vec(),
                atqa: 0,
                sak: 0,
            },
            Modulation::Felica => PolledTarget {
                uid: unsafe { target.nti.felica }.id.to_vec(),
                atqa: 0,
                sak: 0,
            },
        };
        Ok(Some(polled))
    }

    fn transceive(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut rx = vec![0u8; 264];
        let received = unsafe {
            nfc_initiator_transceive_bytes(
                self.device,
                frame.as_ptr(),
                frame.len(),
                rx.as_mut_ptr(),
                rx.len(),
                TRANSCEIVE_TIMEOUT_MS,
            )
        };
        if received < 0 {
            bail!("libnfc transceive error: {} (code {received})", self.last_error());
        }
        rx.truncate(usize::try_from(received).unwrap_or_default());
        Ok(rx)
    }
}

impl Drop for LibnfcTransceiver {
    fn drop(&mut self) {
        if !self.device.is_null() {
            unsafe { nfc_close(self.device) };
        }
        if !self.context.is_null() {
            unsafe { nfc_exit(self.context) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_count_covers_timeout() {
        assert_eq!(poll_count(Duration::ZERO), 1);
        assert_eq!(poll_count(Duration::from_millis(500)), 2);
        assert_eq!(poll_count(Duration::from_secs(10)), 34);
        assert_eq!(poll_count(Duration::from_secs(3600)), u8::MAX);
    }
}
