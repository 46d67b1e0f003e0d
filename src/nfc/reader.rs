//! PC/SC backend for PN53x-based readers (ACR122U and friends).
//!
//! PN53x commands travel inside the ACR122U direct-transmit pseudo-APDU
//! `FF 00 00 00 Lc <cmd>`; answers end with the `90 00` status word.

use std::ffi::CString;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use pcsc::{Card, Context as PcscContext, Protocols, ReaderState, Scope, ShareMode, State};
use tracing::{debug, info};

use crate::nfc::card_trait::{Modulation, PolledTarget, Transceiver};

const IN_DATA_EXCHANGE: [u8; 3] = [0xD4, 0x40, 0x01];
const IN_LIST_PASSIVE_TARGET: [u8; 2] = [0xD4, 0x4A];
const IN_DATA_EXCHANGE_ANSWER: [u8; 2] = [0xD5, 0x41];
const IN_LIST_PASSIVE_TARGET_ANSWER: [u8; 2] = [0xD5, 0x4B];
const SW_OK: [u8; 2] = [0x90, 0x00];

/// FeliCa polling request: system code FFFF, no request code, one slot.
const FELICA_POLLING: [u8; 5] = [0x00, 0xFF, 0xFF, 0x00, 0x00];

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct PcscTransceiver {
    ctx: PcscContext,
    reader: CString,
    card: Option<Card>,
}

impl PcscTransceiver {
    /// Connects to the first reader whose name contains `name_hint`, or the
    /// first reader at all.
    pub fn open(name_hint: Option<&str>) -> Result<Self> {
        let ctx = PcscContext::establish(Scope::User)
            .context("failed to connect to the PC/SC service")?;

        let mut buffer = [0u8; 2048];
        let reader = ctx
            .list_readers(&mut buffer)
            .context("failed to list PC/SC readers")?
            .find(|name| {
                name_hint.map_or(true, |hint| name.to_string_lossy().contains(hint))
            })
            .map(|name| name.to_owned())
            .context("no NFC reader connected")?;

        info!(reader = %reader.to_string_lossy(), "PC/SC reader selected");
        Ok(Self {
            ctx,
            reader,
            card: None,
        })
    }

    /// Waits until the reader reports a card, up to `timeout`.
    fn wait_for_card(&self, timeout: Duration) -> Result<bool> {
        let mut states = [ReaderState::new(self.reader.clone(), State::UNAWARE)];
        self.ctx
            .get_status_change(Some(Duration::ZERO), &mut states)
            .context("failed to query reader state")?;
        if states[0].event_state().contains(State::PRESENT) {
            return Ok(true);
        }
        states[0].sync_current_state();
        match self.ctx.get_status_change(Some(timeout), &mut states) {
            Ok(()) => Ok(states[0].event_state().contains(State::PRESENT)),
            Err(pcsc::Error::Timeout) => Ok(false),
            Err(err) => Err(err).context("failed to wait for a card"),
        }
    }

    fn connect(&mut self) -> Result<&Card> {
        // A stale handle from a previous tag is dropped before reconnecting.
        self.card = None;
        let card = self
            .ctx
            .connect(&self.reader, ShareMode::Shared, Protocols::ANY)
            .context("failed to connect to the tag")?;
        Ok(self.card.insert(card))
    }

    fn direct(card: &Card, command: &[u8]) -> Result<Vec<u8>> {
        let lc = u8::try_from(command.len()).context("PN53x command too long")?;
        let mut apdu = Vec::with_capacity(5 + command.len());
        apdu.extend_from_slice(&[0xFF, 0x00, 0x00, 0x00, lc]);
        apdu.extend_from_slice(command);

        let mut response = [0u8; 300];
        let answer = card
            .transmit(&apdu, &mut response)
            .context("transmit failed")?;
        match answer.split_last_chunk::<2>() {
            Some((body, sw)) if *sw == SW_OK => Ok(body.to_vec()),
            _ => bail!("reader rejected command: {answer:02X?}"),
        }
    }

    fn list_passive_target(card: &Card, modulation: Modulation) -> Result<Option<Vec<u8>>> {
        let mut command = IN_LIST_PASSIVE_TARGET.to_vec();
        command.push(0x01);
        match modulation {
            Modulation::Iso14443A => command.push(0x00),
            Modulation::Iso14443B => command.extend_from_slice(&[0x03, 0x00]),
            Modulation::Felica => {
                command.push(0x01);
                command.extend_from_slice(&FELICA_POLLING);
            }
        }
        let answer = Self::direct(card, &command)?;
        let Some(rest) = answer.strip_prefix(&IN_LIST_PASSIVE_TARGET_ANSWER) else {
            bail!("unexpected InListPassiveTarget answer: {answer:02X?}");
        };
        match rest {
            [0, ..] | [] => Ok(None),
            // Skip NbTg and Tg.
            [_, _, target @ ..] => Ok(Some(target.to_vec())),
            [_] => bail!("truncated InListPassiveTarget answer"),
        }
    }
}

/// Splits ISO 14443A target data: `SENS_RES(2) SEL_RES NFCIDLen NFCID1...`.
fn parse_iso14443a(target: &[u8]) -> Option<PolledTarget> {
    let [atqa_hi, atqa_lo, sak, uid_len, rest @ ..] = target else {
        return None;
    };
    let uid = rest.get(..usize::from(*uid_len))?.to_vec();
    Some(PolledTarget {
        uid,
        atqa: u16::from_be_bytes([*atqa_hi, *atqa_lo]),
        sak: *sak,
    })
}

/// ID bytes of a non-A target: the PUPI of an ATQB, the IDm of a FeliCa
/// polling response.
fn target_id(modulation: Modulation, target: &[u8]) -> Option<Vec<u8>> {
    let range = match modulation {
        Modulation::Iso14443B => 1..5,
        Modulation::Felica => 2..10,
        Modulation::Iso14443A => return None,
    };
    target.get(range).map(<[u8]>::to_vec)
}

impl Transceiver for PcscTransceiver {
    fn select_passive_target(
        &mut self,
        modulation: Modulation,
        timeout: Duration,
    ) -> Result<Option<PolledTarget>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.wait_for_card(remaining)? {
                let card = self.connect()?;
                if let Some(target) = Self::list_passive_target(card, modulation)? {
                    debug!(?modulation, "target listed");
                    return Ok(match modulation {
                        Modulation::Iso14443A => parse_iso14443a(&target),
                        Modulation::Iso14443B | Modulation::Felica => {
                            target_id(modulation, &target).map(|uid| PolledTarget {
                                uid,
                                atqa: 0,
                                sak: 0,
                            })
                        }
                    });
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL.min(remaining));
        }
    }

    fn transceive(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let card = self.card.as_ref().context("no tag selected")?;
        let mut command = IN_DATA_EXCHANGE.to_vec();
        command.extend_from_slice(frame);
        let answer = Self::direct(card, &command)?;
        match answer.strip_prefix(&IN_DATA_EXCHANGE_ANSWER) {
            Some([status, data @ ..]) if status & 0x3F == 0 => Ok(data.to_vec()),
            Some([status, ..]) => bail!("tag error status 0x{status:02X}"),
            _ => bail!("unexpected InDataExchange answer: {answer:02X?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seven_byte_uid_target() {
        let data = [0x00, 0x44, 0x00, 0x07, 0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let target = parse_iso14443a(&data).unwrap();
        assert_eq!(target.atqa, 0x0044);
        assert_eq!(target.sak, 0x00);
        assert_eq!(target.uid.len(), 7);
    }

    #[test]
    fn truncated_uid_is_rejected() {
        assert!(parse_iso14443a(&[0x00, 0x04, 0x08, 0x04, 0xDE, 0xAD]).is_none());
    }

    #[test]
    fn felica_id_is_idm() {
        let data = [0x12, 0x01, 1, 2, 3, 4, 5, 6, 7, 8, 0xAA, 0xBB];
        assert_eq!(
            target_id(Modulation::Felica, &data),
            Some(vec![1, 2, 3, 4, 5, 6, 7, 8])
        );
    }
}
