// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FIFO queues between connection internals and user-facing readers/writers.
//!
//! A [`WriterSink`] is filled by a [`Writer`](crate::io::Writer) and emptied
//! by the connection's writer thread. A [`ReaderSink`] is filled by the
//! connection's read loop and emptied by a [`Reader`](crate::io::Reader), or
//! dispatched synchronously to a [`MessageHandler`].
//!
//! Draining a sink is one-way: every later push or get fails with
//! [`SinkError::Drained`] and anything still queued is discarded.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use modkit_protocol::envelope::{self, Envelope, Message};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::error::SinkError;

#[derive(Default)]
struct QueueState {
    items: VecDeque<Envelope>,
    drained: bool,
}

#[derive(Default)]
struct Queue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    emptied: Condvar,
}

impl Queue {
    fn push(&self, envelope: Envelope) -> Result<MutexGuard<'_, QueueState>, SinkError> {
        let mut state = self.state.lock();
        if state.drained {
            return Err(SinkError::Drained);
        }
        state.items.push_back(envelope);
        self.not_empty.notify_all();
        Ok(state)
    }

    /// Wait until the queue has a front element. `None` waits forever.
    fn wait_front(&self, timeout: Option<Duration>) -> Result<MutexGuard<'_, QueueState>, SinkError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();
        loop {
            if state.drained {
                return Err(SinkError::Drained);
            }
            if !state.items.is_empty() {
                return Ok(state);
            }
            match deadline {
                None => self.not_empty.wait(&mut state),
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                        if state.drained {
                            return Err(SinkError::Drained);
                        }
                        if state.items.is_empty() {
                            return Err(SinkError::Timeout);
                        }
                        return Ok(state);
                    }
                }
            }
        }
    }

    fn pop_locked(&self, state: &mut QueueState) -> Option<Envelope> {
        let item = state.items.pop_front();
        if state.items.is_empty() {
            self.emptied.notify_all();
        }
        item
    }

    fn drain(&self) {
        let mut state = self.state.lock();
        if !state.drained {
            trace!(discarded = state.items.len(), "Draining sink");
        }
        state.drained = true;
        state.items.clear();
        self.not_empty.notify_all();
        self.emptied.notify_all();
    }

    fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    fn is_drained(&self) -> bool {
        self.state.lock().drained
    }
}

/// Outbound queue.
#[derive(Default)]
pub struct WriterSink {
    queue: Queue,
}

impl WriterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an envelope.
    ///
    /// With `blocking` set, waits until the consumer has emptied the queue or
    /// the sink is drained.
    pub fn push(&self, envelope: Envelope, blocking: bool) -> Result<(), SinkError> {
        let mut state = self.queue.push(envelope)?;
        if blocking {
            while !state.items.is_empty() && !state.drained {
                self.queue.emptied.wait(&mut state);
            }
        }
        Ok(())
    }

    /// Peek the front envelope without removing it.
    pub fn get(&self, timeout: Option<Duration>) -> Result<Envelope, SinkError> {
        let state = self.queue.wait_front(timeout)?;
        state.items.front().cloned().ok_or(SinkError::Empty)
    }

    /// Remove the front envelope.
    pub fn pop(&self) -> Option<Envelope> {
        let mut state = self.queue.state.lock();
        self.queue.pop_locked(&mut state)
    }

    pub fn drain(&self) {
        self.queue.drain();
    }

    pub fn is_drained(&self) -> bool {
        self.queue.is_drained()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Callback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Push-dispatch registry keyed by `(format, type name)`.
#[derive(Default)]
pub struct MessageHandler {
    handlers: DashMap<(String, String), Callback>,
}

impl MessageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for every envelope carrying a `T`.
    ///
    /// The identity is taken from `T::default()`. Envelopes that match the
    /// identity but fail conversion are dropped.
    pub fn add_handler<T, F>(&self, callback: F)
    where
        T: Message + Default,
        F: Fn(T) + Send + Sync + 'static,
    {
        let probe = T::default();
        let key = (probe.format().to_string(), probe.type_name());
        let callback: Callback = Arc::new(move |envelope: &Envelope| {
            let mut message = T::default();
            match envelope::parse(envelope, &mut message) {
                Ok(()) => callback(message),
                Err(e) => debug!(error = %e, "Dropping message that failed conversion"),
            }
        });
        self.handlers.insert(key, callback);
    }

    /// Register a callback receiving raw envelopes of an explicit identity.
    pub fn add_envelope_handler<F>(&self, format: &str, type_name: &str, callback: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.handlers
            .insert((format.to_string(), type_name.to_string()), Arc::new(callback));
    }

    pub fn remove_handler(&self, format: &str, type_name: &str) -> bool {
        self.handlers
            .remove(&(format.to_string(), type_name.to_string()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke the handler registered for the envelope's identity. Returns
    /// whether one was found.
    pub fn dispatch(&self, envelope: &Envelope) -> bool {
        let key = envelope::format_and_name(envelope);
        // Release the shard lock before running user code
        let callback = self.handlers.get(&key).map(|entry| Arc::clone(entry.value()));
        match callback {
            Some(callback) => {
                callback(envelope);
                true
            }
            None => {
                trace!(format = %key.0, type_name = %key.1, "No handler for message, dropping");
                false
            }
        }
    }
}

/// Inbound queue with optional push dispatch.
#[derive(Default)]
pub struct ReaderSink {
    queue: Queue,
    handler: OnceLock<Arc<MessageHandler>>,
}

impl ReaderSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an inbound envelope.
    pub fn put(&self, envelope: Envelope) -> Result<(), SinkError> {
        if let Some(handler) = self.handler.get() {
            if self.queue.is_drained() {
                return Err(SinkError::Drained);
            }
            handler.dispatch(&envelope);
            return Ok(());
        }
        self.queue.push(envelope).map(drop)
    }

    /// Switch the sink to push dispatch for the rest of its life and return
    /// the handler registry. Pull reads fail from now on.
    pub fn add_message_handler(&self) -> Arc<MessageHandler> {
        Arc::clone(self.handler.get_or_init(|| Arc::new(MessageHandler::new())))
    }

    pub fn has_message_handler(&self) -> bool {
        self.handler.get().is_some()
    }

    /// Pop the front envelope, waiting up to `timeout` (`None` waits forever).
    pub fn get(&self, timeout: Option<Duration>) -> Result<Envelope, SinkError> {
        if self.has_message_handler() {
            return Err(SinkError::HandlerActive);
        }
        let mut state = self.queue.wait_front(timeout)?;
        self.queue.pop_locked(&mut state).ok_or(SinkError::Empty)
    }

    /// Pop the front envelope without waiting.
    pub fn try_get(&self) -> Result<Envelope, SinkError> {
        if self.has_message_handler() {
            return Err(SinkError::HandlerActive);
        }
        let mut state = self.queue.state.lock();
        if state.drained {
            return Err(SinkError::Drained);
        }
        self.queue.pop_locked(&mut state).ok_or(SinkError::Empty)
    }

    pub fn drain(&self) {
        self.queue.drain();
    }

    pub fn is_drained(&self) -> bool {
        self.queue.is_drained()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
