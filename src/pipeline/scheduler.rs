//! Outbound frame scheduler
//!
//! Channels announce ready frames as `(channel, count)` entries and the scheduler serves them
//! strictly first-come-first-served. There is no per-channel fairness rotation: a channel that
//! announced twenty frames before another announced one gets all twenty slots first. Every entry
//! is backed by a frame its controller has already cleared for transmission, so [`next`] never
//! selects a channel that cannot produce.
//!
//! [`next`]: Scheduler::next

use crate::channel::id::Cid;
use std::collections::VecDeque;

struct Entry {
    cid: Cid,
    remaining: usize,
}

/// First-come-first-served scheduler over announced frame counts
pub struct Scheduler {
    fifo: VecDeque<Entry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { fifo: VecDeque::new() }
    }

    /// Append an announcement of `count` ready frames on `cid`
    pub fn announce(&mut self, cid: Cid, count: usize) {
        if count == 0 {
            return;
        }

        self.fifo.push_back(Entry { cid, remaining: count });
    }

    /// Select the channel to pull the next frame from
    pub fn next(&mut self) -> Option<Cid> {
        let entry = self.fifo.front_mut()?;

        let cid = entry.cid;

        entry.remaining -= 1;

        if entry.remaining == 0 {
            self.fifo.pop_front();
        }

        Some(cid)
    }

    /// Drop every announcement made for `cid`
    pub fn remove_channel(&mut self, cid: Cid) {
        self.fifo.retain(|entry| entry.cid != cid);
    }

    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(raw: u16) -> Cid {
        Cid::new_dynamic(raw).unwrap()
    }

    #[test]
    fn serves_announcements_in_arrival_order() {
        let mut scheduler = Scheduler::new();

        scheduler.announce(cid(0x0040), 2);
        scheduler.announce(cid(0x0041), 1);
        scheduler.announce(cid(0x0040), 1);

        // no rotation between channels, the first announcement drains completely first
        assert_eq!(scheduler.next(), Some(cid(0x0040)));
        assert_eq!(scheduler.next(), Some(cid(0x0040)));
        assert_eq!(scheduler.next(), Some(cid(0x0041)));
        assert_eq!(scheduler.next(), Some(cid(0x0040)));
        assert_eq!(scheduler.next(), None);
    }

    #[test]
    fn zero_count_announcement_is_ignored() {
        let mut scheduler = Scheduler::new();

        scheduler.announce(cid(0x0040), 0);

        assert!(scheduler.is_empty());
    }

    #[test]
    fn remove_channel_drops_all_its_entries() {
        let mut scheduler = Scheduler::new();

        scheduler.announce(cid(0x0040), 1);
        scheduler.announce(cid(0x0041), 2);
        scheduler.announce(cid(0x0040), 3);

        scheduler.remove_channel(cid(0x0040));

        assert_eq!(scheduler.next(), Some(cid(0x0041)));
        assert_eq!(scheduler.next(), Some(cid(0x0041)));
        assert_eq!(scheduler.next(), None);
    }
}
