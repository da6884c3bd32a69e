//! Channel objects
//!
//! A channel object represents one open logical stream endpoint on a link. It owns the queue pair
//! carrying the channel's payload (the *user end* is handed to the channel user, the *stack end*
//! to the data pipeline) and at most one registered close callback.
//!
//! Channel objects are created by the allocators in [`alloc`] and are reference counted, since
//! their lifetime is not strictly nested inside any single collaborator (the allocator, the data
//! pipeline, and the signalling manager all hold references while the channel is open).
//!
//! The close callback fires exactly once: either when the channel closes, or synchronously (as a
//! posted task) if it is registered after the channel has already closed. Closing a channel twice,
//! or registering a second close callback, is a programming error and panics.

pub mod alloc;
pub mod id;

use crate::queue::{bidi_queue, QueueEnd};
use crate::reactor::Handle;
use id::{Cid, Psm};
use std::cell::RefCell;

/// Reason a channel closed, delivered to the close callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The local user closed the channel
    LocalRequested,
    /// The peer requested disconnection
    PeerRequested,
    /// Channel configuration was rejected or failed
    ConfigurationFailed,
    /// A signalling request for this channel timed out
    ResponseTimeout,
    /// The peer violated the channel's wire protocol
    ProtocolViolation,
    /// The whole link shut down
    LinkClosed,
}

impl core::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            CloseReason::LocalRequested => f.write_str("closed by local user"),
            CloseReason::PeerRequested => f.write_str("disconnected by peer"),
            CloseReason::ConfigurationFailed => f.write_str("configuration failed"),
            CloseReason::ResponseTimeout => f.write_str("signalling response timed out"),
            CloseReason::ProtocolViolation => f.write_str("protocol violation by peer"),
            CloseReason::LinkClosed => f.write_str("link closed"),
        }
    }
}

/// Single-shot close callback slot
///
/// Armed at most once, fired at most once.
enum CloseSlot {
    Unarmed,
    Armed(Box<dyn FnOnce(CloseReason)>),
    Fired,
}

struct ChannelCore {
    handle: Handle,
    user_end: Option<QueueEnd<Vec<u8>>>,
    stack_end: Option<QueueEnd<Vec<u8>>>,
    on_close: CloseSlot,
    closed: Option<CloseReason>,
}

impl ChannelCore {
    fn new(handle: Handle, queue_capacity: usize) -> Self {
        let (user_end, stack_end) = bidi_queue(&handle, queue_capacity);

        ChannelCore {
            handle,
            user_end: Some(user_end),
            stack_end: Some(stack_end),
            on_close: CloseSlot::Unarmed,
            closed: None,
        }
    }

    fn take_user_end(&mut self) -> QueueEnd<Vec<u8>> {
        self.user_end.take().expect("channel user end taken twice")
    }

    fn take_stack_end(&mut self) -> QueueEnd<Vec<u8>> {
        self.stack_end.take().expect("channel stack end taken twice")
    }

    fn set_on_close(&mut self, callback: Box<dyn FnOnce(CloseReason)>) {
        match self.on_close {
            CloseSlot::Armed(_) => panic!("close callback registered twice"),
            CloseSlot::Fired => panic!("close callback registered twice"),
            CloseSlot::Unarmed => match self.closed {
                // late registration, fire right away
                Some(reason) => {
                    self.on_close = CloseSlot::Fired;

                    self.handle.post(move || callback(reason));
                }
                None => self.on_close = CloseSlot::Armed(callback),
            },
        }
    }

    fn close(&mut self, reason: CloseReason) {
        assert!(self.closed.is_none(), "channel closed twice");

        self.closed = Some(reason);

        if let CloseSlot::Armed(callback) = std::mem::replace(&mut self.on_close, CloseSlot::Fired)
        {
            self.handle.post(move || callback(reason));
        } else {
            // nothing armed yet, a later set_on_close fires immediately
            self.on_close = CloseSlot::Unarmed;
        }
    }
}

/// A fixed (reserved range) channel
///
/// Fixed channels exist without negotiation; the signalling channel itself is one.
pub struct FixedChannel {
    cid: Cid,
    core: RefCell<ChannelCore>,
}

impl FixedChannel {
    pub(crate) fn new(handle: Handle, cid: Cid, queue_capacity: usize) -> Self {
        debug_assert!(cid.is_fixed());

        FixedChannel {
            cid,
            core: RefCell::new(ChannelCore::new(handle, queue_capacity)),
        }
    }

    /// Get the channel identifier
    pub fn get_cid(&self) -> Cid {
        self.cid
    }

    /// Take the user end of the channel's queue pair
    ///
    /// # Panics
    /// Panics if the user end was already taken.
    pub fn take_user_end(&self) -> QueueEnd<Vec<u8>> {
        self.core.borrow_mut().take_user_end()
    }

    pub(crate) fn take_stack_end(&self) -> QueueEnd<Vec<u8>> {
        self.core.borrow_mut().take_stack_end()
    }

    /// Register the single close callback
    ///
    /// # Panics
    /// Panics if a close callback was already registered.
    pub fn set_on_close<F>(&self, callback: F)
    where
        F: FnOnce(CloseReason) + 'static,
    {
        self.core.borrow_mut().set_on_close(Box::new(callback))
    }

    pub(crate) fn close(&self, reason: CloseReason) {
        self.core.borrow_mut().close(reason)
    }

    /// Check whether the channel has closed
    pub fn is_closed(&self) -> bool {
        self.core.borrow().closed.is_some()
    }
}

/// A dynamically allocated channel
///
/// Dynamic channels are created through signalling negotiation and additionally know the peer's
/// identifier for the same channel and the service it was opened for.
pub struct DynamicChannel {
    cid: Cid,
    remote_cid: Cid,
    psm: Psm,
    core: RefCell<ChannelCore>,
}

impl DynamicChannel {
    pub(crate) fn new(
        handle: Handle,
        cid: Cid,
        remote_cid: Cid,
        psm: Psm,
        queue_capacity: usize,
    ) -> Self {
        debug_assert!(cid.is_dynamic());

        DynamicChannel {
            cid,
            remote_cid,
            psm,
            core: RefCell::new(ChannelCore::new(handle, queue_capacity)),
        }
    }

    /// Get the local channel identifier
    pub fn get_cid(&self) -> Cid {
        self.cid
    }

    /// Get the peer's identifier for this channel
    pub fn get_remote_cid(&self) -> Cid {
        self.remote_cid
    }

    /// Get the service this channel was opened for
    pub fn get_psm(&self) -> Psm {
        self.psm
    }

    /// Take the user end of the channel's queue pair
    ///
    /// # Panics
    /// Panics if the user end was already taken.
    pub fn take_user_end(&self) -> QueueEnd<Vec<u8>> {
        self.core.borrow_mut().take_user_end()
    }

    pub(crate) fn take_stack_end(&self) -> QueueEnd<Vec<u8>> {
        self.core.borrow_mut().take_stack_end()
    }

    /// Register the single close callback
    ///
    /// # Panics
    /// Panics if a close callback was already registered.
    pub fn set_on_close<F>(&self, callback: F)
    where
        F: FnOnce(CloseReason) + 'static,
    {
        self.core.borrow_mut().set_on_close(Box::new(callback))
    }

    pub(crate) fn close(&self, reason: CloseReason) {
        self.core.borrow_mut().close(reason)
    }

    /// Check whether the channel has closed
    pub fn is_closed(&self) -> bool {
        self.core.borrow().closed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn close_callback_fires_once_on_close() {
        let reactor = Reactor::new();

        let channel = FixedChannel::new(reactor.handle(), Cid::SIGNALLING, 4);

        let reason = Rc::new(Cell::new(None));

        let reason_clone = reason.clone();
        channel.set_on_close(move |r| reason_clone.set(Some(r)));

        channel.close(CloseReason::LinkClosed);

        reactor.run_until_idle();

        assert_eq!(reason.get(), Some(CloseReason::LinkClosed));
    }

    #[test]
    fn late_close_callback_fires_immediately() {
        let reactor = Reactor::new();

        let channel = FixedChannel::new(reactor.handle(), Cid::SIGNALLING, 4);

        channel.close(CloseReason::PeerRequested);

        let reason = Rc::new(Cell::new(None));

        let reason_clone = reason.clone();
        channel.set_on_close(move |r| reason_clone.set(Some(r)));

        reactor.run_until_idle();

        assert_eq!(reason.get(), Some(CloseReason::PeerRequested));
    }

    #[test]
    #[should_panic]
    fn double_close_is_fatal() {
        let reactor = Reactor::new();

        let channel = FixedChannel::new(reactor.handle(), Cid::SIGNALLING, 4);

        channel.close(CloseReason::LinkClosed);
        channel.close(CloseReason::LinkClosed);
    }

    #[test]
    #[should_panic]
    fn double_callback_registration_is_fatal() {
        let reactor = Reactor::new();

        let channel = FixedChannel::new(reactor.handle(), Cid::SIGNALLING, 4);

        channel.set_on_close(|_| {});
        channel.set_on_close(|_| {});
    }
}
