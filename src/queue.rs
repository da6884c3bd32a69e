//! Bounded Bidirectional Queue
//!
//! The inter-stage transport used by everything above it. A [`bidi_queue`] is a pair of
//! capacity-bounded FIFO buffers, one per direction, exposed as two [`QueueEnd`]s. An end enqueues
//! into one direction and dequeues from the other.
//!
//! Readiness is callback driven. A producer registered with [`register_enqueue`] is invoked once
//! per free buffer slot and must yield exactly one item per invocation; returning `None`
//! unregisters it. A consumer registered with [`register_dequeue`] is invoked once per available
//! item. Backpressure is implicit: when the buffer is full the producer is simply not invoked
//! again until space frees, which is never an error.
//!
//! At most one producer and one consumer may be registered per end at a time. Registering a second
//! callback without unregistering the first is a contract violation and panics. A callback may
//! unregister (or replace) its own registration from within its invocation.
//!
//! Callbacks never run from within the registration calls; they run as posted reactor tasks, so a
//! component registering from inside one of its own callbacks never re-enters itself.
//!
//! [`register_enqueue`]: QueueEnd::register_enqueue
//! [`register_dequeue`]: QueueEnd::register_dequeue

use crate::reactor::Handle;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

type ProducerFn<T> = Box<dyn FnMut() -> Option<T>>;
type ConsumerFn<T> = Box<dyn FnMut(T)>;

/// Registration slot for a single callback
///
/// `Running` marks a callback taken out for invocation; what the slot holds when the invocation
/// returns decides whether the callback is restored or discarded.
enum Slot<F> {
    Vacant,
    Occupied(F),
    Running,
}

impl<F> Slot<F> {
    fn register(&mut self, f: F, what: &'static str) {
        match self {
            Slot::Occupied(_) => panic!("{} registered twice without unregistering", what),
            _ => *self = Slot::Occupied(f),
        }
    }

    fn unregister(&mut self) {
        *self = Slot::Vacant;
    }

    fn is_occupied(&self) -> bool {
        matches!(self, Slot::Occupied(_))
    }

    fn take_for_run(&mut self) -> Option<F> {
        match std::mem::replace(self, Slot::Running) {
            Slot::Occupied(f) => Some(f),
            other => {
                *self = other;
                None
            }
        }
    }

    /// Put `f` back after an invocation, unless the callback unregistered or replaced itself
    fn finish_run_keep(&mut self, f: F) {
        if matches!(self, Slot::Running) {
            *self = Slot::Occupied(f);
        }
    }

    /// Drop the invoked callback, unless it replaced itself during the invocation
    fn finish_run_drop(&mut self) {
        if matches!(self, Slot::Running) {
            *self = Slot::Vacant;
        }
    }
}

struct Pipe<T> {
    buf: VecDeque<T>,
    capacity: usize,
    producer: Slot<ProducerFn<T>>,
    consumer: Slot<ConsumerFn<T>>,
    pump_queued: bool,
}

impl<T> Pipe<T> {
    fn new(capacity: usize) -> Self {
        Pipe {
            buf: VecDeque::new(),
            capacity,
            producer: Slot::Vacant,
            consumer: Slot::Vacant,
            pump_queued: false,
        }
    }

    fn has_work(&self) -> bool {
        (self.buf.len() < self.capacity && self.producer.is_occupied())
            || (!self.buf.is_empty() && self.consumer.is_occupied())
    }
}

fn schedule_pump<T: 'static>(pipe: &Rc<RefCell<Pipe<T>>>, handle: &Handle) {
    let mut p = pipe.borrow_mut();

    if p.pump_queued || !p.has_work() {
        return;
    }

    p.pump_queued = true;

    drop(p);

    let pipe = pipe.clone();
    let handle_clone = handle.clone();

    handle.post(move || pump(&pipe, &handle_clone));
}

fn pump<T: 'static>(pipe: &Rc<RefCell<Pipe<T>>>, handle: &Handle) {
    pipe.borrow_mut().pump_queued = false;

    loop {
        let mut progressed = false;

        // deliver one item to the consumer
        let delivery = {
            let mut p = pipe.borrow_mut();

            if p.buf.is_empty() {
                None
            } else {
                p.consumer.take_for_run().map(|f| {
                    let item = p.buf.pop_front().unwrap();
                    (f, item)
                })
            }
        };

        if let Some((mut f, item)) = delivery {
            f(item);

            pipe.borrow_mut().consumer.finish_run_keep(f);

            progressed = true;
        }

        // pull one item from the producer
        let producer = {
            let mut p = pipe.borrow_mut();

            if p.buf.len() < p.capacity {
                p.producer.take_for_run()
            } else {
                None
            }
        };

        if let Some(mut f) = producer {
            let produced = f();

            let mut p = pipe.borrow_mut();

            match produced {
                Some(item) => {
                    p.buf.push_back(item);
                    p.producer.finish_run_keep(f);
                }
                None => p.producer.finish_run_drop(),
            }

            progressed = true;
        }

        if !progressed {
            break;
        }
    }

    // a callback may have registered on the other direction or re-armed this one
    schedule_pump(pipe, handle);
}

/// Create a bounded bidirectional queue
///
/// Both directions share the same per-direction `capacity`. The two returned ends face each other:
/// what one enqueues the other dequeues.
pub fn bidi_queue<T: 'static>(handle: &Handle, capacity: usize) -> (QueueEnd<T>, QueueEnd<T>) {
    let a_to_b = Rc::new(RefCell::new(Pipe::new(capacity)));
    let b_to_a = Rc::new(RefCell::new(Pipe::new(capacity)));

    let end_a = QueueEnd {
        tx: a_to_b.clone(),
        rx: b_to_a.clone(),
        handle: handle.clone(),
    };

    let end_b = QueueEnd {
        tx: b_to_a,
        rx: a_to_b,
        handle: handle.clone(),
    };

    (end_a, end_b)
}

/// One end of a [`bidi_queue`]
pub struct QueueEnd<T> {
    tx: Rc<RefCell<Pipe<T>>>,
    rx: Rc<RefCell<Pipe<T>>>,
    handle: Handle,
}

impl<T> Clone for QueueEnd<T> {
    fn clone(&self) -> Self {
        QueueEnd {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<T: 'static> QueueEnd<T> {
    /// Register the producer for this end's outgoing direction
    ///
    /// `producer` is invoked once per free buffer slot and must yield one item per invocation.
    /// Returning `None` unregisters it.
    ///
    /// # Panics
    /// Panics if a producer is already registered.
    pub fn register_enqueue<F>(&self, producer: F)
    where
        F: FnMut() -> Option<T> + 'static,
    {
        self.tx
            .borrow_mut()
            .producer
            .register(Box::new(producer), "queue producer");

        schedule_pump(&self.tx, &self.handle);
    }

    /// Unregister the producer
    pub fn unregister_enqueue(&self) {
        self.tx.borrow_mut().producer.unregister();
    }

    /// Register the consumer for this end's incoming direction
    ///
    /// `consumer` is invoked once per available item, in order.
    ///
    /// # Panics
    /// Panics if a consumer is already registered.
    pub fn register_dequeue<F>(&self, consumer: F)
    where
        F: FnMut(T) + 'static,
    {
        self.rx
            .borrow_mut()
            .consumer
            .register(Box::new(consumer), "queue consumer");

        schedule_pump(&self.rx, &self.handle);
    }

    /// Unregister the consumer
    pub fn unregister_dequeue(&self) {
        self.rx.borrow_mut().consumer.unregister();
    }

    /// Enqueue one item without registering a producer
    ///
    /// This exists for edges where the producing side is outside the engine (the transport
    /// injecting inbound frames). The item is handed back if the buffer is full.
    pub fn try_enqueue(&self, item: T) -> Result<(), T> {
        {
            let mut p = self.tx.borrow_mut();

            if p.buf.len() >= p.capacity {
                return Err(item);
            }

            p.buf.push_back(item);
        }

        schedule_pump(&self.tx, &self.handle);

        Ok(())
    }

    /// Dequeue one item, `None` when the buffer is empty
    pub fn try_dequeue(&self) -> Option<T> {
        let item = self.rx.borrow_mut().buf.pop_front();

        if item.is_some() {
            // freed a slot, the far producer may run again
            schedule_pump(&self.rx, &self.handle);
        }

        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use std::cell::Cell;

    #[test]
    fn items_flow_between_ends_in_order() {
        let reactor = Reactor::new();
        let (a, b) = bidi_queue::<u32>(&reactor.handle(), 4);

        a.try_enqueue(1).unwrap();
        a.try_enqueue(2).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = seen.clone();
        b.register_dequeue(move |item| seen_clone.borrow_mut().push(item));

        reactor.run_until_idle();

        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn producer_invoked_once_per_free_slot() {
        let reactor = Reactor::new();
        let (a, b) = bidi_queue::<u32>(&reactor.handle(), 2);

        let produced = Rc::new(Cell::new(0u32));

        let count = produced.clone();
        a.register_enqueue(move || {
            count.set(count.get() + 1);
            Some(count.get())
        });

        reactor.run_until_idle();

        // buffer full, producer must have stopped at capacity
        assert_eq!(produced.get(), 2);

        assert_eq!(b.try_dequeue(), Some(1));

        reactor.run_until_idle();

        assert_eq!(produced.get(), 3);
    }

    #[test]
    fn producer_returning_none_unregisters() {
        let reactor = Reactor::new();
        let (a, b) = bidi_queue::<u32>(&reactor.handle(), 8);

        let mut remaining = 2;

        a.register_enqueue(move || {
            if remaining == 0 {
                None
            } else {
                remaining -= 1;
                Some(remaining)
            }
        });

        reactor.run_until_idle();

        assert_eq!(b.try_dequeue(), Some(1));
        assert_eq!(b.try_dequeue(), Some(0));
        assert_eq!(b.try_dequeue(), None);

        reactor.run_until_idle();

        assert_eq!(b.try_dequeue(), None);
    }

    #[test]
    fn try_enqueue_full_returns_item() {
        let reactor = Reactor::new();
        let (a, _b) = bidi_queue::<u32>(&reactor.handle(), 1);

        assert_eq!(a.try_enqueue(10), Ok(()));
        assert_eq!(a.try_enqueue(11), Err(11));
    }

    #[test]
    fn consumer_may_unregister_itself() {
        let reactor = Reactor::new();
        let (a, b) = bidi_queue::<u32>(&reactor.handle(), 4);

        a.try_enqueue(1).unwrap();
        a.try_enqueue(2).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = seen.clone();
        let b_clone = b.clone();
        b.register_dequeue(move |item| {
            seen_clone.borrow_mut().push(item);
            b_clone.unregister_dequeue();
        });

        reactor.run_until_idle();

        // one item delivered, the second stays queued
        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(b.try_dequeue(), Some(2));
    }

    #[test]
    #[should_panic]
    fn double_consumer_registration_panics() {
        let reactor = Reactor::new();
        let (_a, b) = bidi_queue::<u32>(&reactor.handle(), 4);

        b.register_dequeue(|_| {});
        b.register_dequeue(|_| {});
    }

    #[test]
    fn directions_are_independent() {
        let reactor = Reactor::new();
        let (a, b) = bidi_queue::<&'static str>(&reactor.handle(), 4);

        a.try_enqueue("from a").unwrap();
        b.try_enqueue("from b").unwrap();

        assert_eq!(a.try_dequeue(), Some("from b"));
        assert_eq!(b.try_dequeue(), Some("from a"));
    }
}
