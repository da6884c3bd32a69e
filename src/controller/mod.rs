//! Per-channel data controllers
//!
//! A data controller implements one wire mode for one channel: it turns outbound SDUs into wire
//! frames and inbound wire frames back into SDUs. The three modes are a closed set selected at
//! configuration time, so dispatch is an enum rather than open-ended traits.
//!
//! Controllers are passive. They never talk to the scheduler or the channel queues directly;
//! instead every operation reports how many outbound frames became ready and which SDUs finished
//! reassembly, and the data pipeline routes those effects. A controller only releases frames it
//! is allowed to transmit (credit in hand, transmit window open), so the scheduler can trust
//! every announced frame to be deliverable.

mod basic;
mod credit;
mod retransmit;

pub use basic::BasicController;
pub use credit::CreditController;
pub use retransmit::RetransmitController;

use crate::channel::id::Cid;

/// Default MTU used before anything else is negotiated
pub const DEFAULT_MTU: u16 = 672;

/// Negotiated parameters of a retransmission mode channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmissionConfig {
    /// The peer's receive MTU, capping outbound SDUs
    pub tx_mtu: u16,
    /// Our receive MTU, policing inbound declared SDU lengths
    pub rx_mtu: u16,
    /// Maximum payload bytes per PDU
    pub mps: u16,
    /// Transmit window: maximum unacknowledged I-frames in flight
    pub tx_window: u8,
    /// Maximum transmissions of a single I-frame (negotiated, informational)
    pub max_transmit: u8,
    /// Retransmission timeout in milliseconds (negotiated, informational)
    pub retransmission_timeout: u16,
    /// Monitor timeout in milliseconds (negotiated, informational)
    pub monitor_timeout: u16,
    /// Whether frames carry a trailing frame check sequence
    pub fcs: bool,
}

impl Default for RetransmissionConfig {
    fn default() -> Self {
        RetransmissionConfig {
            tx_mtu: DEFAULT_MTU,
            rx_mtu: DEFAULT_MTU,
            mps: 1010,
            tx_window: 10,
            max_transmit: 3,
            retransmission_timeout: 2000,
            monitor_timeout: 12000,
            fcs: true,
        }
    }
}

/// Negotiated parameters of a credit-based channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditConfig {
    /// The peer's receive MTU, capping outbound SDUs
    pub tx_mtu: u16,
    /// Our receive MTU, policing inbound declared SDU lengths
    pub rx_mtu: u16,
    /// Maximum payload bytes per PDU
    pub mps: u16,
    /// Credits granted by the peer for our transmissions
    pub initial_peer_credits: u16,
}

/// The wire mode of one channel, with its negotiated parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Basic { tx_mtu: u16, rx_mtu: u16 },
    EnhancedRetransmission(RetransmissionConfig),
    CreditBased(CreditConfig),
}

impl ChannelMode {
    /// Check whether two modes are the same wire mode, ignoring parameters
    pub fn same_kind(&self, other: &ChannelMode) -> bool {
        matches!(
            (self, other),
            (ChannelMode::Basic { .. }, ChannelMode::Basic { .. })
                | (
                    ChannelMode::EnhancedRetransmission(_),
                    ChannelMode::EnhancedRetransmission(_)
                )
                | (ChannelMode::CreditBased(_), ChannelMode::CreditBased(_))
        )
    }
}

/// A peer behaviour that requires tearing the channel down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Reassembly accumulated more bytes than the declared SDU length
    ReassemblyOverflow,
    /// A segmented frame arrived outside any reassembly, or an SDU ended short
    UnexpectedSegment,
    /// The declared SDU length exceeds the negotiated MTU
    SduExceedsMtu,
}

impl core::fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ProtocolViolation::ReassemblyOverflow => {
                f.write_str("reassembled data exceeds the declared SDU length")
            }
            ProtocolViolation::UnexpectedSegment => {
                f.write_str("segment received outside of reassembly")
            }
            ProtocolViolation::SduExceedsMtu => {
                f.write_str("declared SDU length exceeds the MTU")
            }
        }
    }
}

/// The effects of feeding one inbound PDU to a controller
#[derive(Default)]
pub struct PduOutcome {
    /// Outbound frames that became ready for the scheduler
    pub newly_ready: usize,
    /// SDUs that finished reassembly, for delivery to the channel user
    pub sdus: Vec<Vec<u8>>,
    /// Frames accepted on a credit-based channel, for credit replenishment
    pub delivered_frames: u16,
    /// A violation requiring channel teardown
    pub violation: Option<ProtocolViolation>,
}

/// One channel's data controller
pub enum DataController {
    Basic(BasicController),
    Retransmit(RetransmitController),
    Credit(CreditController),
}

impl DataController {
    /// Create a controller for `mode`
    pub fn new(cid: Cid, mode: ChannelMode) -> Self {
        match mode {
            ChannelMode::Basic { tx_mtu, rx_mtu } => {
                DataController::Basic(BasicController::new(cid, tx_mtu, rx_mtu))
            }
            ChannelMode::EnhancedRetransmission(config) => {
                DataController::Retransmit(RetransmitController::new(cid, config))
            }
            ChannelMode::CreditBased(config) => {
                DataController::Credit(CreditController::new(cid, config))
            }
        }
    }

    /// Accept one complete outbound SDU
    ///
    /// Returns the number of outbound frames that became ready.
    pub fn on_sdu(&mut self, sdu: Vec<u8>) -> usize {
        match self {
            DataController::Basic(c) => c.on_sdu(sdu),
            DataController::Retransmit(c) => c.on_sdu(sdu),
            DataController::Credit(c) => c.on_sdu(sdu),
        }
    }

    /// Accept one inbound wire frame (basic header included)
    pub fn on_pdu(&mut self, frame: &[u8]) -> PduOutcome {
        match self {
            DataController::Basic(c) => c.on_pdu(frame),
            DataController::Retransmit(c) => c.on_pdu(frame),
            DataController::Credit(c) => c.on_pdu(frame),
        }
    }

    /// Pop one ready outbound frame
    ///
    /// Called only by the scheduler, exactly as many times as frames were announced ready.
    pub fn get_next_packet(&mut self) -> Option<Vec<u8>> {
        match self {
            DataController::Basic(c) => c.get_next_packet(),
            DataController::Retransmit(c) => c.get_next_packet(),
            DataController::Credit(c) => c.get_next_packet(),
        }
    }

    /// Add transmission credits (credit-based mode)
    ///
    /// Returns the number of outbound frames that became ready. A no-op in the other modes.
    pub fn on_credit(&mut self, credits: u16) -> usize {
        match self {
            DataController::Credit(c) => c.on_credit(credits),
            _ => {
                log::warn!("credits applied to a non credit-based channel");
                0
            }
        }
    }

    /// Toggle the frame check sequence (retransmission mode)
    pub fn set_fcs(&mut self, enabled: bool) {
        if let DataController::Retransmit(c) = self {
            c.set_fcs(enabled)
        }
    }

    /// Check whether the controller holds no queued outbound SDU data
    ///
    /// The sender only accepts the next SDU from the channel once this is true.
    pub fn pending_is_empty(&self) -> bool {
        match self {
            DataController::Basic(c) => c.pending_is_empty(),
            DataController::Retransmit(c) => c.pending_is_empty(),
            DataController::Credit(c) => c.pending_is_empty(),
        }
    }
}
