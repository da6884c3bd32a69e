//! Basic mode data controller

use super::PduOutcome;
use crate::channel::id::Cid;
use crate::pdu::basic_frame::BasicFrame;
use std::collections::VecDeque;

/// Basic mode: one SDU per basic frame, no segmentation, no sequencing
pub struct BasicController {
    cid: Cid,
    /// The peer's receive MTU, capping outbound SDUs
    tx_mtu: u16,
    /// Our receive MTU, policing inbound frames
    rx_mtu: u16,
    pending: VecDeque<Vec<u8>>,
}

impl BasicController {
    pub(crate) fn new(cid: Cid, tx_mtu: u16, rx_mtu: u16) -> Self {
        BasicController {
            cid,
            tx_mtu,
            rx_mtu,
            pending: VecDeque::new(),
        }
    }

    pub(crate) fn on_sdu(&mut self, sdu: Vec<u8>) -> usize {
        if sdu.len() > self.tx_mtu.into() {
            log::warn!(
                "channel {}: dropping {} byte SDU larger than the peer's MTU ({})",
                self.cid,
                sdu.len(),
                self.tx_mtu
            );

            return 0;
        }

        self.pending.push_back(BasicFrame::new(sdu, self.cid).into_raw());

        1
    }

    pub(crate) fn on_pdu(&mut self, frame: &[u8]) -> PduOutcome {
        let mut outcome = PduOutcome::default();

        match BasicFrame::try_from_raw(frame) {
            Ok(frame) if frame.get_payload().len() <= self.rx_mtu.into() => {
                outcome.sdus.push(frame.into_payload())
            }
            Ok(frame) => log::warn!(
                "channel {}: dropping {} byte frame larger than the MTU ({})",
                self.cid,
                frame.get_payload().len(),
                self.rx_mtu
            ),
            Err(e) => log::warn!("channel {}: dropping malformed frame, {}", self.cid, e),
        }

        outcome
    }

    pub(crate) fn get_next_packet(&mut self) -> Option<Vec<u8>> {
        self.pending.pop_front()
    }

    pub(crate) fn pending_is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid() -> Cid {
        Cid::new_dynamic(0x0040).unwrap()
    }

    #[test]
    fn sdu_becomes_one_frame() {
        let mut controller = BasicController::new(cid(), 672, 672);

        assert_eq!(controller.on_sdu(b"hello".to_vec()), 1);

        let frame = controller.get_next_packet().unwrap();

        let decoded = BasicFrame::try_from_raw(&frame).unwrap();

        assert_eq!(decoded.get_cid(), cid());
        assert_eq!(decoded.get_payload(), b"hello");

        assert!(controller.get_next_packet().is_none());
    }

    #[test]
    fn oversized_sdu_is_dropped() {
        let mut controller = BasicController::new(cid(), 4, 4);

        assert_eq!(controller.on_sdu(b"hello".to_vec()), 0);
        assert!(controller.pending_is_empty());
    }

    #[test]
    fn each_direction_is_policed_by_its_own_mtu() {
        // the peer accepts 4 bytes, we accept 672
        let mut controller = BasicController::new(cid(), 4, 672);

        assert_eq!(controller.on_sdu(b"hello".to_vec()), 0);

        let raw = BasicFrame::new(vec![3; 100], cid()).into_raw();

        assert_eq!(controller.on_pdu(&raw).sdus, vec![vec![3; 100]]);
    }

    #[test]
    fn inbound_frame_delivers_payload() {
        let mut controller = BasicController::new(cid(), 672, 672);

        let raw = BasicFrame::new(b"data".to_vec(), cid()).into_raw();

        let outcome = controller.on_pdu(&raw);

        assert_eq!(outcome.sdus, vec![b"data".to_vec()]);
        assert!(outcome.violation.is_none());
    }
}
