//! Channel allocators
//!
//! Per-link registries that hand out, reserve, and free channel identifiers and own the channel
//! objects bound to them. Lookups are linear scans; the number of simultaneously open channels on
//! one link is small.
//!
//! Identifier exhaustion and duplicate remote identifiers are peer-visible allocation failures
//! (`None`), reported to the signalling manager which answers the peer with the matching negative
//! result code. Allocating an identifier that is already in use locally, on the other hand, is a
//! programming error and panics.

use super::id::{Cid, Psm};
use super::{DynamicChannel, FixedChannel};
use crate::reactor::Handle;
use std::rc::Rc;

/// Allocator for the fixed channel range
pub struct FixedChannelAllocator {
    handle: Handle,
    queue_capacity: usize,
    channels: Vec<Rc<FixedChannel>>,
}

impl FixedChannelAllocator {
    pub(crate) fn new(handle: Handle, queue_capacity: usize) -> Self {
        FixedChannelAllocator {
            handle,
            queue_capacity,
            channels: Vec::new(),
        }
    }

    /// Allocate the fixed channel `cid`
    ///
    /// # Panics
    /// Panics if `cid` is not in the fixed range or is already allocated.
    pub fn allocate(&mut self, cid: Cid) -> Rc<FixedChannel> {
        assert!(cid.is_fixed(), "{} is not a fixed channel identifier", cid);

        assert!(
            self.find(cid).is_none(),
            "fixed channel {} allocated twice",
            cid
        );

        let channel = Rc::new(FixedChannel::new(
            self.handle.clone(),
            cid,
            self.queue_capacity,
        ));

        self.channels.push(channel.clone());

        channel
    }

    /// Find the channel bound to `cid`
    pub fn find(&self, cid: Cid) -> Option<Rc<FixedChannel>> {
        self.channels.iter().find(|c| c.get_cid() == cid).cloned()
    }

    /// Free `cid`, returning its channel object
    ///
    /// Freeing an unknown identifier is a no-op.
    pub fn free(&mut self, cid: Cid) -> Option<Rc<FixedChannel>> {
        match self.channels.iter().position(|c| c.get_cid() == cid) {
            Some(index) => Some(self.channels.swap_remove(index)),
            None => {
                log::warn!("freeing unknown fixed channel {}", cid);
                None
            }
        }
    }

    pub(crate) fn drain_all(&mut self) -> Vec<Rc<FixedChannel>> {
        std::mem::take(&mut self.channels)
    }
}

/// Allocator for the dynamic channel range
///
/// Outbound connection setup uses the two-phase [`reserve`] / [`allocate_reserved`] pair, since
/// the local identifier must be sent in the connection request before the peer's identifier is
/// known. Inbound setup uses [`allocate`] directly.
///
/// [`reserve`]: DynamicChannelAllocator::reserve
/// [`allocate_reserved`]: DynamicChannelAllocator::allocate_reserved
/// [`allocate`]: DynamicChannelAllocator::allocate
pub struct DynamicChannelAllocator {
    handle: Handle,
    last_dynamic: u16,
    queue_capacity: usize,
    channels: Vec<Rc<DynamicChannel>>,
    reserved: Vec<Cid>,
}

impl DynamicChannelAllocator {
    pub(crate) fn new(handle: Handle, last_dynamic: u16, queue_capacity: usize) -> Self {
        DynamicChannelAllocator {
            handle,
            last_dynamic,
            queue_capacity,
            channels: Vec::new(),
            reserved: Vec::new(),
        }
    }

    fn is_used(&self, cid: Cid) -> bool {
        self.reserved.contains(&cid) || self.channels.iter().any(|c| c.get_cid() == cid)
    }

    fn first_free(&self) -> Option<Cid> {
        (Cid::FIRST_DYNAMIC..=self.last_dynamic)
            .map(|raw| Cid::new_dynamic(raw).unwrap())
            .find(|&cid| !self.is_used(cid))
    }

    /// Allocate a channel for an inbound connection
    ///
    /// `None` when the peer's identifier is already bound on this link or the identifier space is
    /// exhausted.
    pub fn allocate(&mut self, psm: Psm, remote_cid: Cid) -> Option<Rc<DynamicChannel>> {
        if self.find_by_remote_cid(remote_cid).is_some() {
            log::warn!("remote channel {} already bound on this link", remote_cid);
            return None;
        }

        let cid = self.first_free()?;

        let channel = Rc::new(DynamicChannel::new(
            self.handle.clone(),
            cid,
            remote_cid,
            psm,
            self.queue_capacity,
        ));

        self.channels.push(channel.clone());

        Some(channel)
    }

    /// Reserve a local identifier for an outbound connection
    ///
    /// The identifier is bound to a channel with [`allocate_reserved`] once the peer accepts, or
    /// released with [`free`] if the connection fails.
    ///
    /// [`allocate_reserved`]: DynamicChannelAllocator::allocate_reserved
    /// [`free`]: DynamicChannelAllocator::free
    pub fn reserve(&mut self) -> Option<Cid> {
        let cid = self.first_free()?;

        self.reserved.push(cid);

        Some(cid)
    }

    /// Bind a reserved identifier to a channel
    ///
    /// `None` when the peer's identifier is already bound on this link; the reservation is
    /// released in that case.
    ///
    /// # Panics
    /// Panics if `reserved_cid` was not reserved.
    pub fn allocate_reserved(
        &mut self,
        reserved_cid: Cid,
        psm: Psm,
        remote_cid: Cid,
    ) -> Option<Rc<DynamicChannel>> {
        let index = self
            .reserved
            .iter()
            .position(|&c| c == reserved_cid)
            .unwrap_or_else(|| panic!("channel {} was not reserved", reserved_cid));

        self.reserved.swap_remove(index);

        if self.find_by_remote_cid(remote_cid).is_some() {
            log::warn!("remote channel {} already bound on this link", remote_cid);
            return None;
        }

        let channel = Rc::new(DynamicChannel::new(
            self.handle.clone(),
            reserved_cid,
            remote_cid,
            psm,
            self.queue_capacity,
        ));

        self.channels.push(channel.clone());

        Some(channel)
    }

    /// Free `cid`, releasing both the local and the remote identifier
    ///
    /// Works on reservations as well as bound channels. Freeing an unknown identifier is a no-op.
    pub fn free(&mut self, cid: Cid) -> Option<Rc<DynamicChannel>> {
        if let Some(index) = self.channels.iter().position(|c| c.get_cid() == cid) {
            return Some(self.channels.swap_remove(index));
        }

        if let Some(index) = self.reserved.iter().position(|&c| c == cid) {
            self.reserved.swap_remove(index);
            return None;
        }

        log::warn!("freeing unknown dynamic channel {}", cid);

        None
    }

    /// Check whether any open channel uses `psm`
    pub fn is_psm_in_use(&self, psm: Psm) -> bool {
        self.channels.iter().any(|c| c.get_psm() == psm)
    }

    /// Find the channel bound to the local identifier `cid`
    pub fn find_by_cid(&self, cid: Cid) -> Option<Rc<DynamicChannel>> {
        self.channels.iter().find(|c| c.get_cid() == cid).cloned()
    }

    /// Find the channel whose peer identifier is `remote_cid`
    pub fn find_by_remote_cid(&self, remote_cid: Cid) -> Option<Rc<DynamicChannel>> {
        self.channels
            .iter()
            .find(|c| c.get_remote_cid() == remote_cid)
            .cloned()
    }

    pub(crate) fn drain_all(&mut self) -> Vec<Rc<DynamicChannel>> {
        self.reserved.clear();

        std::mem::take(&mut self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;

    fn psm() -> Psm {
        Psm::new(0x0003).unwrap()
    }

    fn remote(raw: u16) -> Cid {
        Cid::new_dynamic(raw).unwrap()
    }

    #[test]
    fn allocation_never_reuses_a_bound_cid() {
        let reactor = Reactor::new();
        let mut allocator = DynamicChannelAllocator::new(reactor.handle(), 0x0045, 4);

        let mut seen = Vec::new();

        for raw in 0..5u16 {
            let channel = allocator.allocate(psm(), remote(0x0100 + raw)).unwrap();

            assert!(!seen.contains(&channel.get_cid()));

            seen.push(channel.get_cid());
        }

        // 0x0040..=0x0045 has six identifiers, five are bound
        let sixth = allocator.allocate(psm(), remote(0x0200)).unwrap();

        assert!(!seen.contains(&sixth.get_cid()));

        // space exhausted
        assert!(allocator.allocate(psm(), remote(0x0201)).is_none());
    }

    #[test]
    fn freed_cid_is_eligible_for_reuse() {
        let reactor = Reactor::new();
        let mut allocator = DynamicChannelAllocator::new(reactor.handle(), 0x0040, 4);

        let channel = allocator.allocate(psm(), remote(0x0100)).unwrap();
        let cid = channel.get_cid();

        assert!(allocator.allocate(psm(), remote(0x0101)).is_none());

        allocator.free(cid);

        let again = allocator.allocate(psm(), remote(0x0101)).unwrap();

        assert_eq!(again.get_cid(), cid);
    }

    #[test]
    fn duplicate_remote_cid_is_rejected() {
        let reactor = Reactor::new();
        let mut allocator = DynamicChannelAllocator::new(reactor.handle(), 0x007F, 4);

        allocator.allocate(psm(), remote(0x0100)).unwrap();

        assert!(allocator.allocate(psm(), remote(0x0100)).is_none());
    }

    #[test]
    fn reservation_holds_the_cid() {
        let reactor = Reactor::new();
        let mut allocator = DynamicChannelAllocator::new(reactor.handle(), 0x0041, 4);

        let reserved = allocator.reserve().unwrap();

        let other = allocator.allocate(psm(), remote(0x0100)).unwrap();

        assert_ne!(reserved, other.get_cid());

        let bound = allocator
            .allocate_reserved(reserved, psm(), remote(0x0101))
            .unwrap();

        assert_eq!(bound.get_cid(), reserved);
    }

    #[test]
    fn free_unknown_cid_is_a_noop() {
        let reactor = Reactor::new();
        let mut allocator = DynamicChannelAllocator::new(reactor.handle(), 0x007F, 4);

        assert!(allocator.free(remote(0x0050)).is_none());
    }

    #[test]
    #[should_panic]
    fn allocating_unreserved_cid_is_fatal() {
        let reactor = Reactor::new();
        let mut allocator = DynamicChannelAllocator::new(reactor.handle(), 0x007F, 4);

        allocator.allocate_reserved(remote(0x0040), psm(), remote(0x0100));
    }

    #[test]
    #[should_panic]
    fn double_fixed_allocation_is_fatal() {
        let reactor = Reactor::new();
        let mut allocator = FixedChannelAllocator::new(reactor.handle(), 4);

        allocator.allocate(Cid::SIGNALLING);
        allocator.allocate(Cid::SIGNALLING);
    }

    #[test]
    fn psm_in_use_tracks_open_channels() {
        let reactor = Reactor::new();
        let mut allocator = DynamicChannelAllocator::new(reactor.handle(), 0x007F, 4);

        assert!(!allocator.is_psm_in_use(psm()));

        let channel = allocator.allocate(psm(), remote(0x0100)).unwrap();

        assert!(allocator.is_psm_in_use(psm()));

        allocator.free(channel.get_cid());

        assert!(!allocator.is_psm_in_use(psm()));
    }
}
