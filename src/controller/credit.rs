//! Credit-based mode data controller
//!
//! Sending costs one credit per frame; the peer replenishes credits through the signalling
//! channel and [`on_credit`] applies them. A controller holding zero credits announces zero
//! ready frames until credits return, so the credit counter can never go negative.
//!
//! [`on_credit`]: CreditController::on_credit

use super::{CreditConfig, PduOutcome};
use crate::channel::id::Cid;
use crate::pdu::basic_frame::BasicFrame;
use crate::pdu::credit_frame;
use std::collections::VecDeque;

struct Reassembly {
    declared: usize,
    buf: Vec<u8>,
}

/// Credit-based flow control mode controller
pub struct CreditController {
    cid: Cid,
    config: CreditConfig,
    /// Transmission credits granted by the peer
    credits: u16,
    /// Complete frames waiting for credit
    pending: VecDeque<Vec<u8>>,
    /// Frames announced to the scheduler and not yet pulled
    announced: usize,
    reassembly: Option<Reassembly>,
}

impl CreditController {
    pub(crate) fn new(cid: Cid, config: CreditConfig) -> Self {
        CreditController {
            cid,
            config,
            credits: config.initial_peer_credits,
            pending: VecDeque::new(),
            announced: 0,
            reassembly: None,
        }
    }

    /// Announce any pending frames the credit count now allows
    fn refresh(&mut self) -> usize {
        let target = core::cmp::min(self.pending.len(), usize::from(self.credits));

        let newly = target.saturating_sub(self.announced);

        self.announced += newly;

        newly
    }

    pub(crate) fn on_sdu(&mut self, sdu: Vec<u8>) -> usize {
        if sdu.len() > usize::from(self.config.tx_mtu) {
            log::warn!(
                "channel {}: dropping {} byte SDU larger than the peer's MTU ({})",
                self.cid,
                sdu.len(),
                self.config.tx_mtu
            );

            return 0;
        }

        self.pending
            .extend(credit_frame::segment(self.cid, sdu, self.config.mps));

        self.refresh()
    }

    /// Apply credits granted by the peer
    pub(crate) fn on_credit(&mut self, credits: u16) -> usize {
        self.credits = match self.credits.checked_add(credits) {
            Some(total) => total,
            None => {
                log::warn!("channel {}: credit counter saturated", self.cid);
                u16::MAX
            }
        };

        self.refresh()
    }

    pub(crate) fn get_next_packet(&mut self) -> Option<Vec<u8>> {
        if self.announced == 0 {
            return None;
        }

        self.announced -= 1;

        debug_assert!(self.credits > 0, "announced frame without credit");

        self.credits -= 1;

        self.pending.pop_front()
    }

    pub(crate) fn on_pdu(&mut self, frame: &[u8]) -> PduOutcome {
        let mut outcome = PduOutcome::default();

        let frame = match BasicFrame::try_from_raw(frame) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("channel {}: dropping malformed frame, {}", self.cid, e);
                return outcome;
            }
        };

        match self.reassembly.as_mut() {
            None => {
                // a First frame opens reassembly
                let (declared, data) = match credit_frame::parse_first_payload(frame.get_payload())
                {
                    Ok(first) => first,
                    Err(e) => {
                        log::warn!("channel {}: dropping malformed First frame, {}", self.cid, e);
                        return outcome;
                    }
                };

                outcome.delivered_frames = 1;

                let declared = usize::from(declared);

                if declared > usize::from(self.config.rx_mtu) {
                    log::warn!(
                        "channel {}: dropping SDU declared larger than the MTU",
                        self.cid
                    );

                    return outcome;
                }

                if data.len() > declared {
                    // declared length mismatch drops the partial SDU, the channel stays up
                    log::warn!(
                        "channel {}: First frame carries more data than the declared SDU length",
                        self.cid
                    );

                    return outcome;
                }

                if data.len() == declared {
                    outcome.sdus.push(data.to_vec());
                } else {
                    self.reassembly = Some(Reassembly {
                        declared,
                        buf: data.to_vec(),
                    });
                }
            }
            Some(reassembly) => {
                outcome.delivered_frames = 1;

                reassembly.buf.extend_from_slice(frame.get_payload());

                if reassembly.buf.len() > reassembly.declared {
                    log::warn!(
                        "channel {}: reassembled data exceeds the declared SDU length, \
                        dropping the partial SDU",
                        self.cid
                    );

                    self.reassembly = None;

                    return outcome;
                }

                if reassembly.buf.len() == reassembly.declared {
                    outcome.sdus.push(self.reassembly.take().unwrap().buf);
                }
            }
        }

        outcome
    }

    pub(crate) fn pending_is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn cid() -> Cid {
        Cid::new_dynamic(0x0041).unwrap()
    }

    fn config(mps: u16, credits: u16) -> CreditConfig {
        CreditConfig {
            tx_mtu: 0xFFFF,
            rx_mtu: 0xFFFF,
            mps,
            initial_peer_credits: credits,
        }
    }

    #[test]
    fn zero_credit_means_zero_readiness() {
        let mut controller = CreditController::new(cid(), config(23, 0));

        assert_eq!(controller.on_sdu(b"stalled".to_vec()), 0);
        assert!(controller.get_next_packet().is_none());

        // one credit releases exactly one frame
        assert_eq!(controller.on_credit(1), 1);

        assert!(controller.get_next_packet().is_some());
        assert!(controller.get_next_packet().is_none());
    }

    #[test]
    fn credit_counter_gates_multi_frame_sdus() {
        let mut controller = CreditController::new(cid(), config(23, 2));

        // 60 bytes: first frame carries 21, then 23, then 16
        let ready = controller.on_sdu(vec![7; 60]);

        assert_eq!(ready, 2);

        controller.get_next_packet().unwrap();
        controller.get_next_packet().unwrap();
        assert!(controller.get_next_packet().is_none());

        assert_eq!(controller.on_credit(5), 1);

        assert!(controller.get_next_packet().is_some());
    }

    #[quickcheck]
    fn segmentation_reassembly_round_trip(sdu: Vec<u8>, mps: u16) -> bool {
        let mps = 23 + mps % 64;

        let mut tx = CreditController::new(cid(), config(mps, u16::MAX));
        let mut rx = CreditController::new(cid(), config(mps, 0));

        let ready = tx.on_sdu(sdu.clone());

        let mut sdus = Vec::new();

        for _ in 0..ready {
            let frame = tx.get_next_packet().unwrap();

            sdus.extend(rx.on_pdu(&frame).sdus);
        }

        sdus == vec![sdu]
    }

    #[test]
    fn short_delivery_is_accepted_incrementally() {
        let mut rx = CreditController::new(cid(), config(23, 0));

        // declares 30 bytes but carries only 21, reassembly stays open
        let frames: Vec<_> = credit_frame::segment(cid(), vec![1; 30], 23).collect();

        let outcome = rx.on_pdu(&frames[0]);

        assert!(outcome.sdus.is_empty());
        assert_eq!(outcome.delivered_frames, 1);

        let outcome = rx.on_pdu(&frames[1]);

        assert_eq!(outcome.sdus, vec![vec![1; 30]]);
    }

    #[test]
    fn over_declared_data_drops_partial_sdu_without_violation() {
        let mut rx = CreditController::new(cid(), config(23, 0));

        // First frame declares 5 bytes, a continuation then overruns it
        let first = BasicFrame::new(
            {
                let mut payload = 5u16.to_le_bytes().to_vec();
                payload.extend_from_slice(&[9; 3]);
                payload
            },
            cid(),
        )
        .into_raw();

        assert!(rx.on_pdu(&first).sdus.is_empty());

        let continuation = BasicFrame::new(vec![9; 10], cid()).into_raw();

        let outcome = rx.on_pdu(&continuation);

        assert!(outcome.sdus.is_empty());
        assert!(outcome.violation.is_none());

        // the next First frame is accepted normally
        let frames: Vec<_> = credit_frame::segment(cid(), b"ok".to_vec(), 23).collect();

        assert_eq!(rx.on_pdu(&frames[0]).sdus, vec![b"ok".to_vec()]);
    }
}
