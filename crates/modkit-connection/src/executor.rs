// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Completion-queue executor driving asynchronous connection operations.
//!
//! Every asynchronous operation (connect, read, write, finish) registers one
//! pending entry under an integer [`Tag`] before it is issued. The I/O itself
//! runs on a tokio runtime owned by the executor; when it resolves, the tag
//! and a success flag are posted to the completion queue. A fixed pool of
//! worker threads pops completions and dispatches each one to the owner of
//! the tag through [`CompletionHandler`].
//!
//! ```text
//!  begin(kind, owner) ──► tag ──► spawn(io) ──► complete(tag, ok)
//!                                                     │
//!                          ┌──────────────────────────┘
//!                          ▼
//!        queue ──► modkit-cq-N ──► owner.on_completion(op, ok)
//! ```
//!
//! Owners are held weakly. A completion whose owner is gone is discarded.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dashmap::DashMap;
use modkit_protocol::envelope::Envelope;
use parking_lot::{Condvar, Mutex};
use tokio::runtime::{EnterGuard, Handle, Runtime};
use tracing::{debug, info, trace, warn};

use crate::error::ConnectionError;

/// Identifies one pending operation.
pub type Tag = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Connect,
    Read,
    Write,
    Finish,
}

/// A completed operation as seen by its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Connect,
    /// Carries the received envelope when the read succeeded
    Read(Option<Envelope>),
    Write,
    Finish,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Connect => OperationKind::Connect,
            Operation::Read(_) => OperationKind::Read,
            Operation::Write => OperationKind::Write,
            Operation::Finish => OperationKind::Finish,
        }
    }
}

/// Receives completions for the operations it registered.
pub trait CompletionHandler: Send + Sync {
    fn on_completion(&self, operation: Operation, ok: bool);
}

struct PendingOperation {
    kind: OperationKind,
    owner: Weak<dyn CompletionHandler>,
    payload: Option<Envelope>,
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<(Tag, bool)>,
    shutdown: bool,
}

/// Completion events in arrival order.
#[derive(Default)]
struct CompletionQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl CompletionQueue {
    /// Returns false once the queue is shut down.
    fn post(&self, tag: Tag, ok: bool) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        state.events.push_back((tag, ok));
        self.ready.notify_one();
        true
    }

    /// Next completion. `None` once shut down and empty.
    fn next(&self) -> Option<(Tag, bool)> {
        let mut state = self.state.lock();
        loop {
            if let Some(event) = state.events.pop_front() {
                return Some(event);
            }
            if state.shutdown {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.ready.notify_all();
    }
}

struct Shared {
    queue: CompletionQueue,
    pending: DashMap<Tag, PendingOperation>,
}

impl Shared {
    fn dispatch(&self, tag: Tag, ok: bool) {
        let Some((_, pending)) = self.pending.remove(&tag) else {
            warn!(tag, "Completion for unknown tag");
            return;
        };
        let Some(owner) = pending.owner.upgrade() else {
            trace!(tag, kind = ?pending.kind, "Owner gone, discarding completion");
            return;
        };
        let operation = match pending.kind {
            OperationKind::Connect => Operation::Connect,
            OperationKind::Read => Operation::Read(pending.payload),
            OperationKind::Write => Operation::Write,
            OperationKind::Finish => Operation::Finish,
        };
        trace!(tag, kind = ?pending.kind, ok, "Dispatching completion");
        owner.on_completion(operation, ok);
    }
}

/// Worker pool plus I/O runtime shared by every network connection of a
/// manager.
pub struct CompletionQueueExecutor {
    shared: Arc<Shared>,
    next_tag: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    stopped: AtomicBool,
}

impl CompletionQueueExecutor {
    /// Start `threads` completion workers (at least one) and the I/O runtime.
    pub fn new(threads: usize) -> Result<Arc<Self>, ConnectionError> {
        let threads = threads.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("modkit-io")
            .enable_all()
            .build()?;

        let shared = Arc::new(Shared {
            queue: CompletionQueue::default(),
            pending: DashMap::new(),
        });

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("modkit-cq-{index}"))
                .spawn(move || {
                    while let Some((tag, ok)) = worker_shared.queue.next() {
                        worker_shared.dispatch(tag, ok);
                    }
                });
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    shared.queue.shutdown();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    runtime.shutdown_background();
                    return Err(e.into());
                }
            }
        }

        info!(threads, "Completion queue executor started");

        Ok(Arc::new(Self {
            shared,
            next_tag: AtomicU64::new(1),
            workers: Mutex::new(workers),
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Register a pending operation owned by `owner`.
    pub fn begin(&self, kind: OperationKind, owner: Weak<dyn CompletionHandler>) -> Tag {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        self.shared.pending.insert(
            tag,
            PendingOperation {
                kind,
                owner,
                payload: None,
            },
        );
        tag
    }

    /// Post the completion of `tag`. After [`stop`](Self::stop) the
    /// completion is dispatched on the calling thread.
    pub fn complete(&self, tag: Tag, ok: bool) {
        if !self.shared.queue.post(tag, ok) {
            self.shared.dispatch(tag, ok);
        }
    }

    /// Complete a read successfully with the envelope it produced.
    pub fn complete_with(&self, tag: Tag, payload: Envelope) {
        if let Some(mut pending) = self.shared.pending.get_mut(&tag) {
            pending.payload = Some(payload);
        }
        self.complete(tag, true);
    }

    /// Run I/O on the executor's runtime. Returns false once stopped, in which
    /// case the future is dropped without running.
    pub fn spawn<F>(&self, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        self.handle.spawn(future);
        true
    }

    /// Enter the runtime context, e.g. to register sockets.
    pub fn enter(&self) -> EnterGuard<'_> {
        self.handle.enter()
    }

    /// Completion workers not yet joined by [`stop`](Self::stop).
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn pending_operations(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Shut the queue down, join the workers and stop the runtime.
    ///
    /// Completions already queued are still dispatched. Operations whose I/O
    /// never resolved are failed on the calling thread so that their owners
    /// can finish.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shared.queue.shutdown();
        let current = thread::current().id();
        for worker in self.workers.lock().drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("Completion worker panicked");
            }
        }

        if let Some(runtime) = self.runtime.lock().take() {
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(Duration::from_millis(500));
            }
        }

        let orphaned: Vec<Tag> = self.shared.pending.iter().map(|entry| *entry.key()).collect();
        if !orphaned.is_empty() {
            debug!(count = orphaned.len(), "Failing operations left pending at shutdown");
        }
        for tag in orphaned {
            self.shared.dispatch(tag, false);
        }

        info!("Completion queue executor stopped");
    }
}

impl Drop for CompletionQueueExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Counts operations in flight for one connection.
#[derive(Debug, Default)]
pub struct OperationCounter {
    count: Mutex<usize>,
    idle: Condvar,
}

const IDLE_RECHECK: Duration = Duration::from_millis(10);

impl OperationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        *self.count.lock() += 1;
    }

    pub fn end(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Block until no operation is in flight and `done` holds.
    ///
    /// `done` runs without the counter lock held, so it may take other locks.
    pub fn wait_idle(&self, done: impl Fn() -> bool) {
        loop {
            {
                let mut count = self.count.lock();
                if *count > 0 {
                    self.idle.wait_for(&mut count, IDLE_RECHECK);
                    continue;
                }
            }
            if done() {
                return;
            }
            let mut count = self.count.lock();
            self.idle.wait_for(&mut count, IDLE_RECHECK);
        }
    }
}
