//! Outgoing request queue
//!
//! Both signalling variants issue requests through this queue: at most one request is outstanding
//! at a time, the rest wait in submission order. Issuing a request assigns the next transaction
//! identifier and arms the response timeout alarm; a matching response (or a timeout) completes
//! the request and issues the next one. A `Pending` response result re-arms the alarm without
//! advancing the queue.
//!
//! The queue does not transmit: every method that advances it hands back the encoded control
//! frame for the caller to put on the signalling channel.

use super::packets::{self, SignalCode};
use crate::channel::id::SignalId;
use crate::reactor::{Alarm, Handle};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

struct Queued<C> {
    code: SignalCode,
    payload: Vec<u8>,
    context: C,
}

struct Outstanding<C> {
    id: SignalId,
    code: SignalCode,
    context: C,
    alarm: Alarm,
}

/// FIFO of outgoing signalling requests with one in flight
pub struct OutgoingCommands<C> {
    handle: Handle,
    timeout: Duration,
    /// Invoked as an alarm task when the outstanding request times out
    on_timeout: Rc<dyn Fn()>,
    queued: VecDeque<Queued<C>>,
    outstanding: Option<Outstanding<C>>,
    last_id: SignalId,
}

impl<C> OutgoingCommands<C> {
    pub fn new(handle: &Handle, timeout: Duration, on_timeout: Rc<dyn Fn()>) -> Self {
        OutgoingCommands {
            handle: handle.clone(),
            timeout,
            on_timeout,
            queued: VecDeque::new(),
            outstanding: None,
            last_id: SignalId::new(255).unwrap(),
        }
    }

    /// Queue a request, returning the control frame to transmit if it goes out right away
    pub fn submit(&mut self, code: SignalCode, payload: Vec<u8>, context: C) -> Option<Vec<u8>> {
        debug_assert!(code.response().is_some(), "submitted a non-request code");

        self.queued.push_back(Queued {
            code,
            payload,
            context,
        });

        if self.outstanding.is_none() {
            self.issue_next()
        } else {
            None
        }
    }

    fn issue_next(&mut self) -> Option<Vec<u8>> {
        let next = self.queued.pop_front()?;

        self.last_id = self.last_id.next();

        let id = self.last_id;

        let frame = packets::encode(next.code, id.get(), &next.payload);

        self.outstanding = Some(Outstanding {
            id,
            code: next.code,
            context: next.context,
            alarm: self.arm(),
        });

        Some(frame)
    }

    fn arm(&self) -> Alarm {
        let on_timeout = self.on_timeout.clone();

        self.handle.arm_alarm(self.timeout, move || on_timeout())
    }

    /// Check whether `response` with transaction id `id` answers the outstanding request
    pub fn matches(&self, response: SignalCode, id: u8) -> bool {
        match &self.outstanding {
            Some(outstanding) => {
                outstanding.id.get() == id && outstanding.code.response() == Some(response)
            }
            None => false,
        }
    }

    /// Check whether a Command Reject with transaction id `id` refers to the outstanding request
    pub fn matches_reject(&self, id: u8) -> bool {
        matches!(&self.outstanding, Some(outstanding) if outstanding.id.get() == id)
    }

    /// The kind of the outstanding request, if any
    pub fn outstanding_code(&self) -> Option<SignalCode> {
        self.outstanding.as_ref().map(|outstanding| outstanding.code)
    }

    /// Restart the response timeout after a `Pending` result
    ///
    /// The request stays outstanding and the queue does not advance.
    pub fn re_arm(&mut self) {
        if let Some(outstanding) = self.outstanding.as_mut() {
            outstanding.alarm.cancel();
            outstanding.alarm = self.handle.arm_alarm(self.timeout, {
                let on_timeout = self.on_timeout.clone();
                move || on_timeout()
            });
        }
    }

    /// Complete the outstanding request
    ///
    /// Cancels its timeout and issues the next queued request. Returns the completed request's
    /// context and the next control frame to transmit, if any.
    ///
    /// # Panics
    /// Panics when no request is outstanding; callers gate on [`matches`](Self::matches).
    pub fn complete(&mut self) -> (C, Option<Vec<u8>>) {
        let outstanding = self.outstanding.take().expect("no outstanding request");

        outstanding.alarm.cancel();

        let frame = self.issue_next();

        (outstanding.context, frame)
    }

    /// Take the outstanding request after its timeout fired
    ///
    /// `None` when nothing is outstanding, which can only mean a stale timeout task.
    pub fn take_timed_out(&mut self) -> Option<(SignalCode, C, Option<Vec<u8>>)> {
        let outstanding = self.outstanding.take()?;

        let frame = self.issue_next();

        Some((outstanding.code, outstanding.context, frame))
    }
}
