//! Channel multiplexing protocol engine for a point-to-point link
//!
//! This library multiplexes many logical channels over one bidirectional frame transport. A
//! [`Link`] owns everything on one transport connection: fixed channels (the signalling channel
//! among them), dynamically allocated connection-oriented channels, the data pipeline framing
//! and scheduling their traffic, and a signalling manager negotiating channel lifecycles with
//! the peer.
//!
//! The engine is single threaded and fully deterministic. All work runs as tasks on a
//! [`Reactor`], time only moves when the embedder advances it, and every edge (channel user,
//! transport below) is a capacity-bounded queue with callback-driven readiness. There is no
//! internal threading and no reliance on a wall clock, which makes whole-link interactions
//! testable down to the individual frame.
//!
//! # Example
//!
//! ```no_run
//! use linkmux::{Link, LinkConfig, LinkKind, Psm, Reactor, SecurityLevel};
//!
//! let reactor = Reactor::new();
//!
//! let (link, transport) = Link::new(&reactor.handle(), LinkKind::Classic, LinkConfig::default());
//!
//! link.register_service(Psm::new(0x0003).unwrap(), SecurityLevel::None, |channel| {
//!     channel.register_receive(|sdu| println!("received {} bytes", sdu.len()));
//! })
//! .unwrap();
//!
//! // raw frames from the wire go into `transport.deliver`, outbound
//! // frames come out of `transport.take_outbound`
//! reactor.run_until_idle();
//! ```

pub mod channel;
pub mod controller;
pub mod link;
pub mod pdu;
pub mod pipeline;
pub mod queue;
pub mod reactor;
pub mod signals;

pub use channel::id::{Cid, InvalidPsm, Psm, SignalId};
pub use channel::CloseReason;
pub use controller::{ChannelMode, CreditConfig, ProtocolViolation, RetransmissionConfig};
pub use link::{
    ChannelHandle, DuplicateService, Link, LinkConfig, LinkKind, PreferredMode, SecurityLevel,
    TransportEndpoint,
};
pub use queue::{bidi_queue, QueueEnd};
pub use reactor::{Handle, Reactor};
pub use signals::ConnectError;
