// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared core of every gRPC call endpoint.
//!
//! One [`BaseClientGrpc`] drives one streaming call, either opened by us
//! (outbound clients and subscribers) or accepted by a server (remote
//! clients). Its lifecycle follows [`RpcState`]:
//!
//! - `start` registers a connect operation and moves `Created -> Init`.
//! - The connect completion moves `Init -> Executing`, arms the read loop and
//!   spawns the writer thread unless the call is write-less.
//! - Each read completion delivers to the reader sink and re-arms the next
//!   read. Each write is awaited before the next one is issued.
//! - Any failed read or write moves the call to `Inactive`.
//! - `stop` moves `Executing | Inactive -> Disposing`, cancels the call,
//!   issues a finish operation and blocks until every operation completed and
//!   the state is `Finished`.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use modkit_protocol::client::{self, SessionConfig};
use modkit_protocol::envelope::Envelope;
use modkit_protocol::server::AcceptedCall;
use parking_lot::{Condvar, Mutex};
use prost_types::Any;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::{Status, Streaming};
use tracing::{debug, error, info, trace, warn};

use crate::config::Settings;
use crate::configuration::{
    BASE_CLIENT_GRPC_CONFIG_NOWRITER, Configuration, NetworkConnectionConfiguration,
};
use crate::error::{ConnectionError, SinkError};
use crate::executor::{CompletionHandler, CompletionQueueExecutor, Operation, OperationCounter, OperationKind};
use crate::sink::{ReaderSink, WriterSink};
use crate::state::{RpcState, RpcStateMachine};

/// Where the call comes from.
enum Origin {
    /// Opened by us. `session` is `None` when the configuration holds no
    /// valid address.
    Outbound {
        session: Option<SessionConfig>,
        subscribe: bool,
    },
    /// Accepted by a server; the call is installed at construction.
    Remote,
}

/// Sending half of a call.
#[derive(Clone)]
enum Outbound {
    Session(mpsc::Sender<Any>),
    Reply(mpsc::Sender<Result<Any, Status>>),
}

impl Outbound {
    async fn send(&self, envelope: Any) -> bool {
        match self {
            Outbound::Session(tx) => tx.send(envelope).await.is_ok(),
            Outbound::Reply(tx) => tx.send(Ok(envelope)).await.is_ok(),
        }
    }

    async fn closed(&self) {
        match self {
            Outbound::Session(tx) => tx.closed().await,
            Outbound::Reply(tx) => tx.closed().await,
        }
    }
}

type SharedStream = Arc<tokio::sync::Mutex<Streaming<Any>>>;

struct ActiveCall {
    inbound: Option<SharedStream>,
    outbound: Option<Outbound>,
    cancel: CancellationToken,
}

impl ActiveCall {
    fn new(inbound: Option<Streaming<Any>>, outbound: Option<Outbound>) -> Self {
        Self {
            inbound: inbound.map(|stream| Arc::new(tokio::sync::Mutex::new(stream))),
            outbound,
            cancel: CancellationToken::new(),
        }
    }
}

pub(crate) struct BaseClientGrpc {
    me: Weak<BaseClientGrpc>,
    configuration: Configuration,
    origin: Origin,
    peer: String,
    executor: Arc<CompletionQueueExecutor>,
    settings: Settings,
    state: RpcStateMachine,
    operations: OperationCounter,
    reader_sink: Arc<ReaderSink>,
    writer_sink: Option<Arc<WriterSink>>,
    call: Mutex<Option<ActiveCall>>,
    write_result: Mutex<Option<bool>>,
    write_done: Condvar,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl BaseClientGrpc {
    /// Core for a call we open towards `serverIp:serverPort`.
    pub(crate) fn outbound(
        configuration: &Configuration,
        executor: Arc<CompletionQueueExecutor>,
        settings: Settings,
        subscribe: bool,
    ) -> Arc<Self> {
        let target = NetworkConnectionConfiguration::socket_addr_of(configuration);
        let session = target.map(|addr| SessionConfig {
            target: addr.to_string(),
            connect_timeout_ms: settings.connect_timeout_ms,
            channel_capacity: settings.channel_capacity,
        });
        let peer = session
            .as_ref()
            .map(|s| s.target.clone())
            .unwrap_or_else(|| "unresolved".to_string());
        Self::build(
            configuration,
            Origin::Outbound { session, subscribe },
            peer,
            None,
            executor,
            settings,
        )
    }

    /// Core for a call accepted by a server.
    pub(crate) fn remote(
        configuration: &Configuration,
        call: AcceptedCall,
        executor: Arc<CompletionQueueExecutor>,
        settings: Settings,
    ) -> Arc<Self> {
        let peer = call
            .remote_addr
            .map(|addr: SocketAddr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let active = ActiveCall::new(call.inbound, Some(Outbound::Reply(call.outbound)));
        Self::build(configuration, Origin::Remote, peer, Some(active), executor, settings)
    }

    fn build(
        configuration: &Configuration,
        origin: Origin,
        peer: String,
        call: Option<ActiveCall>,
        executor: Arc<CompletionQueueExecutor>,
        settings: Settings,
    ) -> Arc<Self> {
        let writer_sink = if configuration.has_attribute(BASE_CLIENT_GRPC_CONFIG_NOWRITER) {
            None
        } else {
            Some(Arc::new(WriterSink::new()))
        };
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            configuration: configuration.clone(),
            origin,
            peer,
            executor,
            settings,
            state: RpcStateMachine::new(),
            operations: OperationCounter::new(),
            reader_sink: Arc::new(ReaderSink::new()),
            writer_sink,
            call: Mutex::new(call),
            write_result: Mutex::new(None),
            write_done: Condvar::new(),
            writer: Mutex::new(None),
        })
    }

    fn owner(&self) -> Weak<dyn CompletionHandler> {
        self.me.clone()
    }

    pub(crate) fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub(crate) fn state(&self) -> RpcState {
        self.state.state()
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(self.state(), RpcState::Init | RpcState::Executing)
    }

    pub(crate) fn reader_sink(&self) -> Arc<ReaderSink> {
        self.reader_sink.clone()
    }

    pub(crate) fn writer_sink(&self) -> Option<Arc<WriterSink>> {
        self.writer_sink.clone()
    }

    pub(crate) fn start(&self) -> Result<(), ConnectionError> {
        if !self.executor.is_running() {
            return Err(ConnectionError::ExecutorStopped);
        }
        if let Origin::Outbound { session: None, .. } = &self.origin {
            return Err(ConnectionError::Configuration(format!(
                "'{}' has no valid server address",
                self.configuration.name()
            )));
        }

        {
            let mut state = self.state.lock();
            if state.get() != RpcState::Created {
                return Err(ConnectionError::InvalidState {
                    operation: "start",
                    state: state.get(),
                });
            }
            state.set(RpcState::Init);
        }

        let tag = self.executor.begin(OperationKind::Connect, self.owner());
        self.operations.begin();

        match &self.origin {
            Origin::Remote => self.executor.complete(tag, true),
            Origin::Outbound { session, subscribe } => {
                let Some(session) = session.clone() else {
                    self.executor.complete(tag, false);
                    return Ok(());
                };
                let subscribe = *subscribe;
                let me = self.me.clone();
                let executor = self.executor.clone();
                let spawned = self.executor.spawn(async move {
                    let opened = if subscribe {
                        client::open_subscription(&session)
                            .await
                            .map(|s| ActiveCall::new(Some(s.inbound), None))
                    } else {
                        client::open_session(&session)
                            .await
                            .map(|s| ActiveCall::new(Some(s.inbound), Some(Outbound::Session(s.outbound))))
                    };
                    let ok = match (opened, me.upgrade()) {
                        (Ok(call), Some(core)) => {
                            *core.call.lock() = Some(call);
                            true
                        }
                        (Ok(_), None) => false,
                        (Err(e), _) => {
                            warn!(target = %session.target, error = %e, "Connect failed");
                            false
                        }
                    };
                    executor.complete(tag, ok);
                });
                if !spawned {
                    self.executor.complete(tag, false);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn stop(&self) -> Result<(), ConnectionError> {
        // A connect in flight always resolves, at the latest on connect timeout
        self.state.wait_until(|state| state != RpcState::Init);

        {
            let mut state = self.state.lock();
            let current = state.get();
            if !matches!(current, RpcState::Executing | RpcState::Inactive) {
                return Err(ConnectionError::InvalidState {
                    operation: "stop",
                    state: current,
                });
            }
            state.set(RpcState::Disposing);
        }

        if let Some(sink) = &self.writer_sink {
            sink.drain();
        }
        let call = self.call.lock().take();
        if let Some(call) = &call {
            call.cancel.cancel();
        }

        let tag = self.executor.begin(OperationKind::Finish, self.owner());
        self.operations.begin();
        let executor = self.executor.clone();
        let spawned = self.executor.spawn(async move {
            drop(call);
            executor.complete(tag, true);
        });
        if !spawned {
            self.executor.complete(tag, true);
        }

        self.await_finished();

        if let Some(writer) = self.writer.lock().take()
            && writer.thread().id() != thread::current().id()
            && writer.join().is_err()
        {
            error!(peer = %self.peer, "Writer thread panicked");
        }
        self.reader_sink.drain();

        info!(peer = %self.peer, "Call stopped");
        Ok(())
    }

    fn await_finished(&self) {
        self.operations
            .wait_idle(|| self.state.state() == RpcState::Finished);
    }

    fn on_started(&self, ok: bool) {
        if !ok || !self.state.set_state(RpcState::Executing) {
            if self.state.fail() {
                debug!(peer = %self.peer, "Call failed to start");
            }
            return;
        }
        info!(peer = %self.peer, name = %self.configuration.name(), "Call started");

        self.arm_read();

        if let (Some(sink), Some(core)) = (self.writer_sink.clone(), self.me.upgrade()) {
            let spawned = thread::Builder::new()
                .name("modkit-writer".to_string())
                .spawn(move || core.run_writer(&sink));
            match spawned {
                Ok(writer) => *self.writer.lock() = Some(writer),
                Err(e) => {
                    error!(peer = %self.peer, error = %e, "Failed to spawn writer thread");
                    self.state.fail();
                }
            }
        }
    }

    /// Issue the next read. Write-only calls instead watch for the peer
    /// closing the call.
    fn arm_read(&self) {
        let (inbound, outbound, cancel) = {
            let call = self.call.lock();
            match call.as_ref() {
                Some(call) => (call.inbound.clone(), call.outbound.clone(), call.cancel.clone()),
                None => return,
            }
        };

        let tag = self.executor.begin(OperationKind::Read, self.owner());
        self.operations.begin();
        let executor = self.executor.clone();
        let spawned = self.executor.spawn(async move {
            let Some(inbound) = inbound else {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = async {
                        match &outbound {
                            Some(outbound) => outbound.closed().await,
                            None => std::future::pending().await,
                        }
                    } => {}
                }
                executor.complete(tag, false);
                return;
            };

            let mut stream = inbound.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => executor.complete(tag, false),
                message = stream.message() => match message {
                    Ok(Some(envelope)) => executor.complete_with(tag, envelope),
                    Ok(None) => executor.complete(tag, false),
                    Err(status) => {
                        debug!(code = ?status.code(), message = %status.message(), "Read failed");
                        executor.complete(tag, false);
                    }
                },
            }
        });
        if !spawned {
            self.executor.complete(tag, false);
        }
    }

    fn on_read(&self, envelope: Option<Envelope>, ok: bool) {
        match envelope {
            Some(envelope) if ok => {
                trace!(peer = %self.peer, "Message received");
                if let Err(e) = self.reader_sink.put(envelope) {
                    trace!(peer = %self.peer, error = %e, "Dropping inbound message");
                }
                if self.state.state() == RpcState::Executing {
                    self.arm_read();
                }
            }
            _ => {
                if self.state.fail() {
                    debug!(peer = %self.peer, "Call inactive after read ended");
                }
            }
        }
    }

    fn run_writer(&self, sink: &WriterSink) {
        let poll = self.settings.writer_poll_interval();
        while self.state.state() == RpcState::Executing {
            let envelope = match sink.get(Some(poll)) {
                Ok(envelope) => envelope,
                Err(SinkError::Timeout) => continue,
                Err(_) => break,
            };
            if !self.write_and_wait(envelope) {
                break;
            }
            trace!(peer = %self.peer, "Message written");
            sink.pop();
        }
        debug!(peer = %self.peer, "Writer stopped");
    }

    /// Issue one write and block until its completion has been dispatched.
    fn write_and_wait(&self, envelope: Envelope) -> bool {
        let (outbound, cancel) = {
            let call = self.call.lock();
            match call.as_ref() {
                Some(call) => (call.outbound.clone(), call.cancel.clone()),
                None => return false,
            }
        };
        let Some(outbound) = outbound else {
            return false;
        };

        *self.write_result.lock() = None;
        let tag = self.executor.begin(OperationKind::Write, self.owner());
        self.operations.begin();
        let executor = self.executor.clone();
        let spawned = self.executor.spawn(async move {
            let ok = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                sent = outbound.send(envelope) => sent,
            };
            executor.complete(tag, ok);
        });
        if !spawned {
            self.executor.complete(tag, false);
        }

        let mut result = self.write_result.lock();
        loop {
            if let Some(ok) = result.take() {
                return ok;
            }
            self.write_done.wait(&mut result);
        }
    }

    fn on_written(&self, ok: bool) {
        if !ok && self.state.fail() {
            debug!(peer = %self.peer, "Call inactive after write failed");
        }
        *self.write_result.lock() = Some(ok);
        self.write_done.notify_all();
    }
}

impl CompletionHandler for BaseClientGrpc {
    fn on_completion(&self, operation: Operation, ok: bool) {
        match operation {
            Operation::Connect => self.on_started(ok),
            Operation::Read(envelope) => self.on_read(envelope, ok),
            Operation::Write => self.on_written(ok),
            Operation::Finish => {
                self.state.set_state(RpcState::Finished);
            }
        }
        self.operations.end();
    }
}
