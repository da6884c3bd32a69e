//! Data pipeline
//!
//! The pipeline connects every attached data channel to the single outbound link queue. Outbound,
//! a channel's SDUs are pulled from its queue one at a time, handed to the channel's
//! [`DataController`] for framing, and the frames the controller clears for transmission are
//! announced to the [`Scheduler`], which serves the link queue first-come-first-served. Inbound,
//! the link hands the pipeline raw frames; they are routed by channel identifier to the owning
//! controller and any SDUs that finish reassembly are enqueued towards the channel user.
//!
//! SDU pacing: a channel's next SDU is only pulled once its controller holds no remnant of the
//! previous one, so a large segmented SDU cannot be interleaved with its successor.

pub mod scheduler;

use crate::channel::id::Cid;
use crate::controller::{ChannelMode, DataController, ProtocolViolation};
use crate::pdu::basic_frame::BasicFrame;
use crate::queue::QueueEnd;
use crate::reactor::Handle;
use scheduler::Scheduler;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Callbacks the pipeline raises towards the signalling layer
///
/// Both are invoked as posted reactor tasks, never from within a pipeline operation.
pub struct PipelineEvents {
    /// A peer violated its channel's mode contract and the channel was detached
    pub on_violation: Rc<dyn Fn(Cid, ProtocolViolation)>,
    /// Frames were accepted on a credit-based channel and the peer may be replenished
    pub on_frames_delivered: Rc<dyn Fn(Cid, u16)>,
}

struct Attached {
    controller: DataController,
    remote_cid: Cid,
    stack_end: QueueEnd<Vec<u8>>,
    sender_armed: bool,
}

struct PipelineInner {
    handle: Handle,
    link_out: QueueEnd<Vec<u8>>,
    scheduler: Scheduler,
    attached: HashMap<u16, Attached>,
    producer_armed: bool,
    events: PipelineEvents,
}

/// The data pipeline of one link
pub struct DataPipeline {
    inner: Rc<RefCell<PipelineInner>>,
}

impl Clone for DataPipeline {
    fn clone(&self) -> Self {
        DataPipeline {
            inner: self.inner.clone(),
        }
    }
}

impl DataPipeline {
    pub fn new(handle: &Handle, link_out: QueueEnd<Vec<u8>>, events: PipelineEvents) -> Self {
        let inner = PipelineInner {
            handle: handle.clone(),
            link_out,
            scheduler: Scheduler::new(),
            attached: HashMap::new(),
            producer_armed: false,
            events,
        };

        DataPipeline {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    /// Attach a configured channel to the pipeline
    ///
    /// `stack_end` is the engine-facing end of the channel's queue: outbound SDUs are dequeued
    /// from it and inbound SDUs are enqueued into it. Inbound frames are routed by `cid`;
    /// outbound frames carry `remote_cid`, the peer's identifier for the channel.
    ///
    /// # Panics
    /// Panics if `cid` is already attached.
    pub fn attach(&self, cid: Cid, remote_cid: Cid, mode: ChannelMode, stack_end: QueueEnd<Vec<u8>>) {
        let mut inner = self.inner.borrow_mut();

        assert!(
            !inner.attached.contains_key(&cid.to_val()),
            "channel {} attached twice",
            cid
        );

        log::info!("channel {} attached to the data pipeline", cid);

        inner.attached.insert(
            cid.to_val(),
            Attached {
                controller: DataController::new(remote_cid, mode),
                remote_cid,
                stack_end,
                sender_armed: false,
            },
        );

        drop(inner);

        arm_sender(&self.inner, cid);
    }

    /// Detach a channel, discarding its scheduled frames
    pub fn detach(&self, cid: Cid) {
        let mut inner = self.inner.borrow_mut();

        match inner.attached.remove(&cid.to_val()) {
            Some(attached) => {
                if attached.sender_armed {
                    attached.stack_end.unregister_dequeue();
                }

                log::info!("channel {} detached from the data pipeline", cid);
            }
            None => log::warn!("detach of unattached channel {}", cid),
        }

        inner.scheduler.remove_channel(cid);
    }

    pub fn is_attached(&self, cid: Cid) -> bool {
        self.inner.borrow().attached.contains_key(&cid.to_val())
    }

    /// Replace a channel's controller after reconfiguration
    ///
    /// Reconfiguration happens while no data flows; queued outbound frames of the old controller
    /// are discarded with a warning if any remain.
    pub fn update_configuration(&self, cid: Cid, mode: ChannelMode) {
        let mut inner = self.inner.borrow_mut();

        let attached = match inner.attached.get_mut(&cid.to_val()) {
            Some(attached) => attached,
            None => {
                log::warn!("reconfiguration of unattached channel {}", cid);
                return;
            }
        };

        if !attached.controller.pending_is_empty() {
            log::warn!("channel {}: reconfiguration discards queued outbound data", cid);
        }

        attached.controller = DataController::new(attached.remote_cid, mode);

        inner.scheduler.remove_channel(cid);
    }

    /// Toggle the frame check sequence of a retransmission mode channel
    pub fn set_fcs(&self, cid: Cid, enabled: bool) {
        if let Some(attached) = self.inner.borrow_mut().attached.get_mut(&cid.to_val()) {
            attached.controller.set_fcs(enabled);
        }
    }

    /// Apply transmission credits granted by the peer
    pub fn on_credit(&self, cid: Cid, credits: u16) {
        let newly = {
            let mut inner = self.inner.borrow_mut();

            let attached = match inner.attached.get_mut(&cid.to_val()) {
                Some(attached) => attached,
                None => {
                    log::warn!("credits for unattached channel {}", cid);
                    return;
                }
            };

            let newly = attached.controller.on_credit(credits);

            inner.scheduler.announce(cid, newly);

            newly
        };

        if newly > 0 {
            arm_producer(&self.inner);
        }
    }

    /// Route one inbound raw frame to its channel
    ///
    /// Frames for channels not attached to the pipeline are dropped with a warning.
    pub fn on_frame(&self, raw: Vec<u8>) {
        let cid = match BasicFrame::peek_cid(&raw) {
            Ok(cid) => cid,
            Err(e) => {
                log::warn!("dropping unroutable frame, {}", e);
                return;
            }
        };

        let mut inner = self.inner.borrow_mut();

        let attached = match inner.attached.get_mut(&cid.to_val()) {
            Some(attached) => attached,
            None => {
                log::warn!("dropping frame for unknown channel {}", cid);
                return;
            }
        };

        let outcome = attached.controller.on_pdu(&raw);

        for sdu in outcome.sdus {
            if attached.stack_end.try_enqueue(sdu).is_err() {
                log::warn!("channel {}: receive queue full, dropping SDU", cid);
            }
        }

        inner.scheduler.announce(cid, outcome.newly_ready);

        let handle = inner.handle.clone();

        if outcome.delivered_frames > 0 {
            let callback = inner.events.on_frames_delivered.clone();
            let delivered = outcome.delivered_frames;

            handle.post(move || callback(cid, delivered));
        }

        drop(inner);

        if outcome.newly_ready > 0 {
            arm_producer(&self.inner);
        }

        if let Some(violation) = outcome.violation {
            log::warn!("channel {}: {}, detaching", cid, violation);

            self.detach(cid);

            let callback = self.inner.borrow().events.on_violation.clone();

            handle.post(move || callback(cid, violation));
        }
    }
}

/// Register the SDU consumer on a channel's queue
///
/// The consumer unregisters itself while its controller still holds pieces of the last SDU and is
/// re-armed from [`produce_frame`] once the controller drains.
fn arm_sender(pipeline: &Rc<RefCell<PipelineInner>>, cid: Cid) {
    let stack_end = {
        let mut inner = pipeline.borrow_mut();

        match inner.attached.get_mut(&cid.to_val()) {
            Some(attached) if !attached.sender_armed => {
                attached.sender_armed = true;
                attached.stack_end.clone()
            }
            _ => return,
        }
    };

    let weak = Rc::downgrade(pipeline);

    stack_end.register_dequeue(move |sdu| on_outbound_sdu(&weak, cid, sdu));
}

fn on_outbound_sdu(pipeline: &Weak<RefCell<PipelineInner>>, cid: Cid, sdu: Vec<u8>) {
    let pipeline = match pipeline.upgrade() {
        Some(pipeline) => pipeline,
        None => return,
    };

    let newly = {
        let mut inner = pipeline.borrow_mut();

        let attached = match inner.attached.get_mut(&cid.to_val()) {
            Some(attached) => attached,
            None => return,
        };

        let newly = attached.controller.on_sdu(sdu);

        if !attached.controller.pending_is_empty() {
            // stop pulling SDUs until this one is fully on the wire
            attached.sender_armed = false;
            attached.stack_end.unregister_dequeue();
        }

        inner.scheduler.announce(cid, newly);

        newly
    };

    if newly > 0 {
        arm_producer(&pipeline);
    }
}

/// Register the scheduler as the link queue producer while frames are scheduled
fn arm_producer(pipeline: &Rc<RefCell<PipelineInner>>) {
    let link_out = {
        let mut inner = pipeline.borrow_mut();

        if inner.producer_armed || inner.scheduler.is_empty() {
            return;
        }

        inner.producer_armed = true;

        inner.link_out.clone()
    };

    let weak = Rc::downgrade(pipeline);

    link_out.register_enqueue(move || {
        let pipeline = weak.upgrade()?;

        produce_frame(&pipeline)
    });
}

fn produce_frame(pipeline: &Rc<RefCell<PipelineInner>>) -> Option<Vec<u8>> {
    let mut rearm = None;

    let frame = loop {
        let mut inner = pipeline.borrow_mut();

        let cid = match inner.scheduler.next() {
            Some(cid) => cid,
            None => {
                // returning None unregisters; the next announcement re-arms
                inner.producer_armed = false;
                return None;
            }
        };

        let attached = match inner.attached.get_mut(&cid.to_val()) {
            Some(attached) => attached,
            None => continue,
        };

        match attached.controller.get_next_packet() {
            Some(frame) => {
                if attached.controller.pending_is_empty() && !attached.sender_armed {
                    rearm = Some(cid);
                }

                break frame;
            }
            None => {
                log::warn!("channel {}: announced frame was not produced", cid);
                continue;
            }
        }
    };

    if let Some(cid) = rearm {
        arm_sender(pipeline, cid);
    }

    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{CreditConfig, RetransmissionConfig};
    use crate::pdu::enhanced_frame::{build_i_frame, InformationControl, SegmentationTag};
    use crate::queue::bidi_queue;
    use crate::reactor::Reactor;

    fn events() -> PipelineEvents {
        PipelineEvents {
            on_violation: Rc::new(|_, _| {}),
            on_frames_delivered: Rc::new(|_, _| {}),
        }
    }

    fn setup(reactor: &Reactor) -> (DataPipeline, QueueEnd<Vec<u8>>) {
        setup_with_events(reactor, events())
    }

    fn setup_with_events(reactor: &Reactor, events: PipelineEvents) -> (DataPipeline, QueueEnd<Vec<u8>>) {
        let (pipeline_end, transport_end) = bidi_queue(&reactor.handle(), 16);

        let pipeline = DataPipeline::new(&reactor.handle(), pipeline_end, events);

        (pipeline, transport_end)
    }

    #[test]
    fn outbound_sdu_reaches_the_link_queue() {
        let reactor = Reactor::new();
        let (pipeline, transport) = setup(&reactor);

        let cid = Cid::new_dynamic(0x0040).unwrap();
        let peer_cid = Cid::new_dynamic(0x0055).unwrap();

        let (user, stack) = bidi_queue(&reactor.handle(), 4);

        pipeline.attach(
            cid,
            peer_cid,
            ChannelMode::Basic {
                tx_mtu: 672,
                rx_mtu: 672,
            },
            stack,
        );

        user.try_enqueue(b"hello".to_vec()).unwrap();

        reactor.run_until_idle();

        let raw = transport.try_dequeue().unwrap();

        let frame = BasicFrame::try_from_raw(&raw).unwrap();

        // outbound frames are addressed with the peer's identifier
        assert_eq!(frame.get_cid(), peer_cid);
        assert_eq!(frame.get_payload(), b"hello");
    }

    #[test]
    fn inbound_frame_reaches_the_channel_user() {
        let reactor = Reactor::new();
        let (pipeline, _transport) = setup(&reactor);

        let cid = Cid::new_dynamic(0x0040).unwrap();

        let (user, stack) = bidi_queue(&reactor.handle(), 4);

        pipeline.attach(
            cid,
            cid,
            ChannelMode::Basic {
                tx_mtu: 672,
                rx_mtu: 672,
            },
            stack,
        );

        pipeline.on_frame(BasicFrame::new(b"data".to_vec(), cid).into_raw());

        reactor.run_until_idle();

        assert_eq!(user.try_dequeue(), Some(b"data".to_vec()));
    }

    #[test]
    fn frame_for_unknown_channel_is_dropped() {
        let reactor = Reactor::new();
        let (pipeline, _transport) = setup(&reactor);

        let cid = Cid::new_dynamic(0x0999).unwrap();

        pipeline.on_frame(BasicFrame::new(b"stray".to_vec(), cid).into_raw());

        reactor.run_until_idle();
    }

    #[test]
    fn credit_starved_channel_holds_sdus_until_credits_arrive() {
        let reactor = Reactor::new();
        let (pipeline, transport) = setup(&reactor);

        let cid = Cid::new_dynamic(0x0040).unwrap();

        let config = CreditConfig {
            tx_mtu: 672,
            rx_mtu: 672,
            mps: 23,
            initial_peer_credits: 0,
        };

        let (user, stack) = bidi_queue(&reactor.handle(), 4);

        pipeline.attach(cid, cid, ChannelMode::CreditBased(config), stack);

        user.try_enqueue(b"one".to_vec()).unwrap();
        user.try_enqueue(b"two".to_vec()).unwrap();

        reactor.run_until_idle();

        assert!(transport.try_dequeue().is_none());

        pipeline.on_credit(cid, 1);

        reactor.run_until_idle();

        // exactly the first SDU came out, the second still awaits credit
        assert!(transport.try_dequeue().is_some());
        assert!(transport.try_dequeue().is_none());

        pipeline.on_credit(cid, 1);

        reactor.run_until_idle();

        assert!(transport.try_dequeue().is_some());
    }

    #[test]
    fn violation_detaches_and_reports() {
        let reactor = Reactor::new();

        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = seen.clone();

        let events = PipelineEvents {
            on_violation: Rc::new(move |cid, violation| {
                seen_clone.borrow_mut().push((cid, violation))
            }),
            on_frames_delivered: Rc::new(|_, _| {}),
        };

        let (pipeline, _transport) = setup_with_events(&reactor, events);

        let cid = Cid::new_dynamic(0x0040).unwrap();

        let config = RetransmissionConfig {
            rx_mtu: 100,
            fcs: false,
            ..RetransmissionConfig::default()
        };

        let (_user, stack) = bidi_queue(&reactor.handle(), 4);

        pipeline.attach(cid, cid, ChannelMode::EnhancedRetransmission(config), stack);

        // a Start frame declaring an SDU larger than the MTU
        let control = InformationControl {
            tx_seq: 0,
            req_seq: 0,
            sar: SegmentationTag::Start,
            final_flag: false,
        };

        pipeline.on_frame(build_i_frame(cid, control, Some(5000), b"x", false));

        reactor.run_until_idle();

        assert_eq!(seen.borrow().len(), 1);
        assert!(!pipeline.is_attached(cid));
    }

    #[test]
    fn delivered_credit_frames_are_reported() {
        let reactor = Reactor::new();

        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = seen.clone();

        let events = PipelineEvents {
            on_violation: Rc::new(|_, _| {}),
            on_frames_delivered: Rc::new(move |cid, count| {
                seen_clone.borrow_mut().push((cid, count))
            }),
        };

        let (pipeline, _transport) = setup_with_events(&reactor, events);

        let cid = Cid::new_dynamic(0x0040).unwrap();

        let config = CreditConfig {
            tx_mtu: 672,
            rx_mtu: 672,
            mps: 23,
            initial_peer_credits: 0,
        };

        let (_user, stack) = bidi_queue(&reactor.handle(), 4);

        pipeline.attach(cid, cid, ChannelMode::CreditBased(config), stack);

        let frame = crate::pdu::credit_frame::segment(cid, b"ping".to_vec(), 23)
            .next()
            .unwrap();

        pipeline.on_frame(frame);

        reactor.run_until_idle();

        assert_eq!(*seen.borrow(), vec![(cid, 1)]);
    }
}
