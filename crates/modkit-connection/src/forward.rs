// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background threads moving envelopes out of a writer sink.
//!
//! Publishers fan what the user writes out to every attached subscriber;
//! mock connections pump one side's writer sink into the other side's reader
//! sink. Deliveries never block, so a stalled target cannot hold back the
//! others. An envelope stays at the front of its source until at least one
//! target is attached, which keeps blocking writers waiting for delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use modkit_protocol::envelope::Envelope;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{ConnectionError, SinkError};
use crate::sink::{ReaderSink, WriterSink};

pub struct Forwarder {
    cancelled: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Forwarder {
    /// Spawn a thread handing every envelope of `source` to `deliver`, then
    /// popping it. An envelope `deliver` declines is offered again after
    /// `poll`. Exits when stopped or when `source` is drained.
    pub fn start<F>(
        name: &str,
        source: Arc<WriterSink>,
        mut deliver: F,
        poll: Duration,
    ) -> Result<Self, ConnectionError>
    where
        F: FnMut(&Envelope) -> bool + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    let envelope = match source.get(Some(poll)) {
                        Ok(envelope) => envelope,
                        Err(SinkError::Timeout) => continue,
                        Err(_) => break,
                    };
                    if deliver(&envelope) {
                        source.pop();
                    } else {
                        thread::sleep(poll);
                    }
                }
                debug!("Forwarder stopped");
            })?;

        Ok(Self {
            cancelled,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Copy `source` into every sink returned by `targets`, which is consulted
    /// on every delivery attempt. Holds the envelope while `targets` is empty.
    pub fn fan_out<F>(
        name: &str,
        source: Arc<WriterSink>,
        targets: F,
        poll: Duration,
    ) -> Result<Self, ConnectionError>
    where
        F: Fn() -> Vec<Arc<WriterSink>> + Send + 'static,
    {
        Self::start(
            name,
            source,
            move |envelope| {
                let targets = targets();
                if targets.is_empty() {
                    return false;
                }
                trace!(targets = targets.len(), "Fanning out message");
                for target in targets {
                    if let Err(e) = target.push(envelope.clone(), false) {
                        trace!(error = %e, "Skipping target");
                    }
                }
                true
            },
            poll,
        )
    }

    /// Move `source` into `target`.
    pub fn pump(
        name: &str,
        source: Arc<WriterSink>,
        target: Arc<ReaderSink>,
        poll: Duration,
    ) -> Result<Self, ConnectionError> {
        Self::start(
            name,
            source,
            move |envelope| {
                if let Err(e) = target.put(envelope.clone()) {
                    trace!(error = %e, "Dropping pumped message");
                }
                true
            },
            poll,
        )
    }

    /// Stop forwarding and join the thread.
    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(worker) = self.worker.lock().take()
            && worker.thread().id() != thread::current().id()
            && worker.join().is_err()
        {
            warn!("Forwarder thread panicked");
        }
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.stop();
    }
}
