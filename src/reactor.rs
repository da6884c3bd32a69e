//! Link execution context
//!
//! Every component of a link runs on one serial execution context, so no locking is needed and no
//! two operations on the same link ever run concurrently. The [`Reactor`] is that context: a FIFO
//! of posted closures plus a deadline-ordered set of alarms over a manually advanced clock.
//!
//! Components never call across one another re-entrantly. Anything that crosses a component
//! boundary (a user callback, a queue readiness notification) is posted with [`Handle::post`] and
//! runs as its own task.
//!
//! The embedder drives the reactor by calling [`Reactor::run_until_idle`] after feeding input and
//! [`Reactor::advance`] to move time forward. Both are deterministic, which is also what makes the
//! protocol state machines testable without a timer thread.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

type Task = Box<dyn FnOnce()>;

struct TimerEntry {
    deadline: Duration,
    seq: u64,
    cancelled: Rc<Cell<bool>>,
    task: Task,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed so the BinaryHeap pops the earliest deadline first
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ReactorInner {
    ready: VecDeque<Task>,
    timers: BinaryHeap<TimerEntry>,
    now: Duration,
    next_seq: u64,
}

/// The serial execution context of one link
pub struct Reactor {
    inner: Rc<RefCell<ReactorInner>>,
}

impl Reactor {
    /// Create a new `Reactor`
    pub fn new() -> Self {
        let inner = ReactorInner {
            ready: VecDeque::new(),
            timers: BinaryHeap::new(),
            now: Duration::ZERO,
            next_seq: 0,
        };

        Reactor {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    /// Get a [`Handle`] for posting work to this reactor
    pub fn handle(&self) -> Handle {
        Handle {
            inner: self.inner.clone(),
        }
    }

    /// Run every posted task until the task queue is empty
    ///
    /// Tasks may post further tasks; those run too. Armed alarms do not fire here, only after
    /// their deadline is crossed by [`advance`].
    ///
    /// [`advance`]: Reactor::advance
    pub fn run_until_idle(&self) {
        loop {
            let task = self.inner.borrow_mut().ready.pop_front();

            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    /// Advance the clock by `duration`, firing every alarm whose deadline is reached
    ///
    /// Alarms fire in deadline order (arming order for equal deadlines) and any work they post is
    /// run to completion before this method returns.
    pub fn advance(&self, duration: Duration) {
        let deadline = {
            let mut inner = self.inner.borrow_mut();

            inner.now += duration;

            inner.now
        };

        loop {
            let due = {
                let mut inner = self.inner.borrow_mut();

                match inner.timers.peek() {
                    Some(entry) if entry.deadline <= deadline => {
                        let entry = inner.timers.pop().unwrap();

                        if entry.cancelled.get() {
                            continue;
                        }

                        Some(entry.task)
                    }
                    _ => None,
                }
            };

            match due {
                Some(task) => {
                    task();

                    self.run_until_idle();
                }
                None => break,
            }
        }

        self.run_until_idle();
    }

    /// Get the current value of the reactor clock
    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Reactor::new()
    }
}

/// A cloneable handle for posting tasks and arming alarms on a [`Reactor`]
#[derive(Clone)]
pub struct Handle {
    inner: Rc<RefCell<ReactorInner>>,
}

impl Handle {
    /// Post a closure to run on the reactor
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.inner.borrow_mut().ready.push_back(Box::new(f));
    }

    /// Arm an alarm that fires `delay` after the current clock value
    ///
    /// The returned [`Alarm`] can be used to cancel it. A cancelled alarm never runs its closure,
    /// even if the cancellation happens after the deadline but before the reactor processes it.
    pub fn arm_alarm<F>(&self, delay: Duration, f: F) -> Alarm
    where
        F: FnOnce() + 'static,
    {
        let mut inner = self.inner.borrow_mut();

        let cancelled = Rc::new(Cell::new(false));

        let seq = inner.next_seq;

        inner.next_seq += 1;

        let entry = TimerEntry {
            deadline: inner.now + delay,
            seq,
            cancelled: cancelled.clone(),
            task: Box::new(f),
        };

        inner.timers.push(entry);

        Alarm { cancelled }
    }
}

/// Handle to an armed alarm
///
/// Dropping an `Alarm` does not cancel it; only [`cancel`] does.
///
/// [`cancel`]: Alarm::cancel
pub struct Alarm {
    cancelled: Rc<Cell<bool>>,
}

impl Alarm {
    /// Cancel the alarm
    ///
    /// After this returns the alarm's closure is guaranteed to never run.
    pub fn cancel(&self) {
        self.cancelled.set(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posted_tasks_run_in_order() {
        let reactor = Reactor::new();
        let handle = reactor.handle();

        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            handle.post(move || order.borrow_mut().push(i));
        }

        reactor.run_until_idle();

        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn tasks_may_post_tasks() {
        let reactor = Reactor::new();
        let handle = reactor.handle();

        let hit = Rc::new(Cell::new(false));

        let hit_clone = hit.clone();
        let inner_handle = handle.clone();

        handle.post(move || {
            inner_handle.post(move || hit_clone.set(true));
        });

        reactor.run_until_idle();

        assert!(hit.get());
    }

    #[test]
    fn alarm_fires_only_after_deadline() {
        let reactor = Reactor::new();

        let fired = Rc::new(Cell::new(false));

        let fired_clone = fired.clone();

        reactor
            .handle()
            .arm_alarm(Duration::from_millis(100), move || fired_clone.set(true));

        reactor.advance(Duration::from_millis(99));

        assert!(!fired.get());

        reactor.advance(Duration::from_millis(1));

        assert!(fired.get());
    }

    #[test]
    fn cancelled_alarm_never_fires() {
        let reactor = Reactor::new();

        let fired = Rc::new(Cell::new(false));

        let fired_clone = fired.clone();

        let alarm = reactor
            .handle()
            .arm_alarm(Duration::from_millis(10), move || fired_clone.set(true));

        alarm.cancel();

        reactor.advance(Duration::from_secs(1));

        assert!(!fired.get());
    }

    #[test]
    fn alarms_fire_in_deadline_order() {
        let reactor = Reactor::new();
        let handle = reactor.handle();

        let order = Rc::new(RefCell::new(Vec::new()));

        let o = order.clone();
        handle.arm_alarm(Duration::from_millis(20), move || o.borrow_mut().push("b"));

        let o = order.clone();
        handle.arm_alarm(Duration::from_millis(10), move || o.borrow_mut().push("a"));

        reactor.advance(Duration::from_millis(30));

        assert_eq!(*order.borrow(), vec!["a", "b"]);
    }
}
