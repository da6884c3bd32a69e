//! Enhanced retransmission mode data controller
//!
//! Outbound SDUs are segmented into I-frames carrying transmit and (piggy-backed) receive
//! sequence numbers. Transmission is gated by the negotiated window: an I-frame stays buffered
//! after sending until the peer acknowledges it, and a peer REJ moves the unacknowledged frames
//! back for retransmission. Inbound SDUs are reassembled against the Start frame's declared
//! length; exceeding it is a protocol violation that tears the channel down.

use super::{PduOutcome, ProtocolViolation, RetransmissionConfig};
use crate::channel::id::Cid;
use crate::pdu::enhanced_frame::{
    build_i_frame, build_s_frame, parse_frame, ControlField, InformationControl, SegmentationTag,
    SupervisoryControl, SupervisoryFunction, SEQ_MODULO,
};
use crate::pdu::FrameParseError;
use std::collections::VecDeque;

fn seq_inc(seq: u8) -> u8 {
    (seq + 1) % SEQ_MODULO
}

/// One segment of an SDU, not yet bound to a transmit sequence number
struct Segment {
    sar: SegmentationTag,
    sdu_len: Option<u16>,
    data: Vec<u8>,
}

struct Reassembly {
    declared: usize,
    buf: Vec<u8>,
}

/// Enhanced retransmission mode controller
pub struct RetransmitController {
    cid: Cid,
    config: RetransmissionConfig,
    /// Sequence number the next transmitted I-frame gets
    next_tx_seq: u8,
    /// Sequence number expected on the next inbound I-frame, sent as our ReqSeq
    expected_rx_seq: u8,
    /// Segments queued but not yet released to the scheduler
    pending: VecDeque<Segment>,
    /// I-frames sent and awaiting acknowledgement, in sequence order
    unacked: VecDeque<(u8, Segment)>,
    /// I-frames announced to the scheduler and not yet pulled
    announced: usize,
    /// An RR acknowledgement frame is queued
    rr_queued: bool,
    reassembly: Option<Reassembly>,
}

impl RetransmitController {
    pub(crate) fn new(cid: Cid, config: RetransmissionConfig) -> Self {
        RetransmitController {
            cid,
            config,
            next_tx_seq: 0,
            expected_rx_seq: 0,
            pending: VecDeque::new(),
            unacked: VecDeque::new(),
            announced: 0,
            rr_queued: false,
            reassembly: None,
        }
    }

    pub(crate) fn set_fcs(&mut self, enabled: bool) {
        self.config.fcs = enabled;
    }

    /// Announce any pending segments the transmit window now allows
    fn refresh(&mut self) -> usize {
        let in_flight = self.unacked.len() + self.announced;

        let allowed = usize::from(self.config.tx_window).saturating_sub(in_flight);

        let newly = core::cmp::min(self.pending.len() - self.announced, allowed);

        self.announced += newly;

        newly
    }

    pub(crate) fn on_sdu(&mut self, sdu: Vec<u8>) -> usize {
        let mps = usize::from(self.config.mps);

        if sdu.len() > usize::from(self.config.tx_mtu) {
            log::warn!(
                "channel {}: dropping {} byte SDU larger than the peer's MTU ({})",
                self.cid,
                sdu.len(),
                self.config.tx_mtu
            );

            return 0;
        }

        if sdu.len() <= mps {
            self.pending.push_back(Segment {
                sar: SegmentationTag::Unsegmented,
                sdu_len: None,
                data: sdu,
            });
        } else {
            let declared = sdu.len() as u16;

            // the Start frame gives up two payload bytes to the declared length
            let mut chunks = std::iter::once(&sdu[..mps - 2])
                .chain(sdu[mps - 2..].chunks(mps))
                .peekable();

            let mut first = true;

            while let Some(chunk) = chunks.next() {
                let (sar, sdu_len) = if first {
                    first = false;

                    (SegmentationTag::Start, Some(declared))
                } else if chunks.peek().is_none() {
                    (SegmentationTag::End, None)
                } else {
                    (SegmentationTag::Continuation, None)
                };

                self.pending.push_back(Segment {
                    sar,
                    sdu_len,
                    data: chunk.to_vec(),
                });
            }
        }

        self.refresh()
    }

    pub(crate) fn get_next_packet(&mut self) -> Option<Vec<u8>> {
        if self.rr_queued {
            self.rr_queued = false;

            let control = SupervisoryControl {
                function: SupervisoryFunction::ReceiverReady,
                req_seq: self.expected_rx_seq,
                final_flag: false,
            };

            return Some(build_s_frame(self.cid, control, self.config.fcs));
        }

        if self.announced == 0 {
            return None;
        }

        self.announced -= 1;

        let segment = self.pending.pop_front().expect("announced without pending");

        let tx_seq = self.next_tx_seq;

        self.next_tx_seq = seq_inc(self.next_tx_seq);

        let control = InformationControl {
            tx_seq,
            req_seq: self.expected_rx_seq,
            sar: segment.sar,
            final_flag: false,
        };

        let frame = build_i_frame(
            self.cid,
            control,
            segment.sdu_len,
            &segment.data,
            self.config.fcs,
        );

        self.unacked.push_back((tx_seq, segment));

        Some(frame)
    }

    /// Drop acknowledged frames from the retransmission buffer
    ///
    /// `req_seq` is the next sequence number the peer expects; everything before it is acked.
    /// A value outside the span of unacknowledged frames is ignored.
    fn process_ack(&mut self, req_seq: u8) {
        let base = match self.unacked.front() {
            Some(&(seq, _)) => seq,
            None => return,
        };

        let offset = usize::from((req_seq + SEQ_MODULO - base) % SEQ_MODULO);

        if offset > self.unacked.len() {
            log::warn!(
                "channel {}: ignoring acknowledgement outside the transmit window",
                self.cid
            );

            return;
        }

        for _ in 0..offset {
            self.unacked.pop_front();
        }
    }

    /// Requeue every unacknowledged frame starting over from `req_seq`
    fn process_reject(&mut self, req_seq: u8) {
        self.process_ack(req_seq);

        if self.unacked.is_empty() {
            return;
        }

        self.next_tx_seq = self.unacked.front().unwrap().0;

        while let Some((_, segment)) = self.unacked.pop_back() {
            self.pending.push_front(segment);
        }
    }

    fn violation(&mut self, outcome: &mut PduOutcome, violation: ProtocolViolation) {
        log::warn!("channel {}: {}", self.cid, violation);

        self.reassembly = None;

        outcome.violation = Some(violation);
    }

    pub(crate) fn on_pdu(&mut self, frame: &[u8]) -> PduOutcome {
        let mut outcome = PduOutcome::default();

        let parsed = match parse_frame(frame, self.config.fcs) {
            Ok(parsed) => parsed,
            Err(FrameParseError::FcsMismatch) => {
                // treated as a lost frame
                log::warn!("channel {}: dropping frame with bad FCS", self.cid);
                return outcome;
            }
            Err(e) => {
                log::warn!("channel {}: dropping malformed frame, {}", self.cid, e);
                return outcome;
            }
        };

        match parsed.control {
            ControlField::Supervisory(s) => {
                self.process_ack(s.req_seq);

                if s.function == SupervisoryFunction::Reject {
                    self.process_reject(s.req_seq);
                }

                outcome.newly_ready = self.refresh();
            }
            ControlField::Information(i) => {
                self.process_ack(i.req_seq);

                outcome.newly_ready = self.refresh();

                if i.tx_seq != self.expected_rx_seq {
                    log::warn!(
                        "channel {}: dropping out of sequence I-frame (got {}, expected {})",
                        self.cid,
                        i.tx_seq,
                        self.expected_rx_seq
                    );

                    return outcome;
                }

                self.expected_rx_seq = seq_inc(self.expected_rx_seq);

                match i.sar {
                    SegmentationTag::Unsegmented => {
                        if self.reassembly.is_some() {
                            self.violation(&mut outcome, ProtocolViolation::UnexpectedSegment);
                            return outcome;
                        }

                        outcome.sdus.push(parsed.data.to_vec());
                    }
                    SegmentationTag::Start => {
                        if self.reassembly.is_some() {
                            self.violation(&mut outcome, ProtocolViolation::UnexpectedSegment);
                            return outcome;
                        }

                        let declared = usize::from(parsed.sdu_len.unwrap_or(0));

                        if declared > usize::from(self.config.rx_mtu) {
                            self.violation(&mut outcome, ProtocolViolation::SduExceedsMtu);
                            return outcome;
                        }

                        if parsed.data.len() > declared {
                            self.violation(&mut outcome, ProtocolViolation::ReassemblyOverflow);
                            return outcome;
                        }

                        self.reassembly = Some(Reassembly {
                            declared,
                            buf: parsed.data.to_vec(),
                        });
                    }
                    SegmentationTag::Continuation | SegmentationTag::End => {
                        let Some(reassembly) = self.reassembly.as_mut() else {
                            self.violation(&mut outcome, ProtocolViolation::UnexpectedSegment);
                            return outcome;
                        };

                        reassembly.buf.extend_from_slice(parsed.data);

                        if reassembly.buf.len() > reassembly.declared {
                            self.violation(&mut outcome, ProtocolViolation::ReassemblyOverflow);
                            return outcome;
                        }

                        if i.sar == SegmentationTag::End {
                            let reassembly = self.reassembly.take().unwrap();

                            if reassembly.buf.len() != reassembly.declared {
                                self.violation(&mut outcome, ProtocolViolation::UnexpectedSegment);
                                return outcome;
                            }

                            outcome.sdus.push(reassembly.buf);
                        }
                    }
                }

                // acknowledge: piggy-backed if an I-frame is about to go out, otherwise an RR
                if self.announced == 0 && !self.rr_queued {
                    self.rr_queued = true;

                    outcome.newly_ready += 1;
                }
            }
        }

        outcome
    }

    pub(crate) fn pending_is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
