// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC server connection.
//!
//! The server binds its listener synchronously in `start`, so a bad address
//! or a port in use fails the call. Serving runs on the executor's runtime
//! under a finish operation that completes when the transport shuts down.
//! Every accepted call becomes a remote [`ClientGrpc`] that is started at
//! once; clients whose call ended are reaped on the next accept.

use std::net::{SocketAddr, TcpListener as StdListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use modkit_protocol::server::{self, AcceptedCall, CallAcceptor, ConnectionEndpoint};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info, warn};

use super::client::ClientGrpc;
use crate::config::Settings;
use crate::configuration::{Configuration, NetworkConnectionConfiguration};
use crate::connection::{Client, Connection, Server};
use crate::error::ConnectionError;
use crate::executor::{CompletionHandler, CompletionQueueExecutor, Operation, OperationCounter, OperationKind};
use crate::sink::WriterSink;
use crate::state::{RpcState, RpcStateMachine};

pub(crate) struct ServerCore {
    me: Weak<ServerCore>,
    configuration: Configuration,
    executor: Arc<CompletionQueueExecutor>,
    settings: Settings,
    state: RpcStateMachine,
    operations: OperationCounter,
    clients: Mutex<Vec<Arc<ClientGrpc>>>,
    shutdown: Mutex<Option<CancellationToken>>,
    local_addr: Mutex<Option<SocketAddr>>,
    serving: AtomicBool,
}

impl ServerCore {
    fn new(
        configuration: &Configuration,
        executor: Arc<CompletionQueueExecutor>,
        settings: Settings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            configuration: configuration.clone(),
            executor,
            settings,
            state: RpcStateMachine::new(),
            operations: OperationCounter::new(),
            clients: Mutex::new(Vec::new()),
            shutdown: Mutex::new(None),
            local_addr: Mutex::new(None),
            serving: AtomicBool::new(false),
        })
    }

    pub(crate) fn state(&self) -> RpcState {
        self.state.state()
    }

    fn bind(&self) -> Result<(TcpListener, SocketAddr), ConnectionError> {
        let addr = NetworkConnectionConfiguration::socket_addr_of(&self.configuration).ok_or_else(|| {
            ConnectionError::Configuration(format!(
                "'{}' has no valid server address",
                self.configuration.name()
            ))
        })?;
        let listener = StdListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let _runtime = self.executor.enter();
        Ok((TcpListener::from_std(listener)?, local_addr))
    }

    fn start(&self) -> Result<(), ConnectionError> {
        if !self.executor.is_running() {
            return Err(ConnectionError::ExecutorStopped);
        }

        let mut state = self.state.lock();
        if state.get() != RpcState::Created {
            return Err(ConnectionError::InvalidState {
                operation: "start",
                state: state.get(),
            });
        }
        state.set(RpcState::Init);

        let (listener, local_addr) = match self.bind() {
            Ok(bound) => bound,
            Err(e) => {
                state.fail();
                warn!(name = %self.configuration.name(), error = %e, "Server failed to bind");
                return Err(e);
            }
        };
        *self.local_addr.lock() = Some(local_addr);

        let token = CancellationToken::new();
        *self.shutdown.lock() = Some(token.clone());

        let owner: Weak<dyn CompletionHandler> = self.me.clone();
        let tag = self.executor.begin(OperationKind::Finish, owner);
        self.operations.begin();
        self.serving.store(true, Ordering::Release);
        state.set(RpcState::Executing);
        drop(state);

        let endpoint = ConnectionEndpoint::new(
            Arc::new(Acceptor { core: self.me.clone() }),
            self.settings.channel_capacity,
        );
        let grace = self.settings.shutdown_grace();
        let executor = self.executor.clone();
        let spawned = self.executor.spawn(async move {
            let ok = match server::serve(listener, endpoint, token, grace).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Server transport failed");
                    false
                }
            };
            executor.complete(tag, ok);
        });
        if !spawned {
            self.executor.complete(tag, false);
        }

        info!(name = %self.configuration.name(), addr = %local_addr, "Server started");
        Ok(())
    }

    fn stop(&self) -> Result<(), ConnectionError> {
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
            if !self.serving.load(Ordering::Acquire) {
                state.set(RpcState::Finished);
            }
        }

        let clients: Vec<Arc<ClientGrpc>> = self.clients.lock().drain(..).collect();
        for client in &clients {
            if let Err(e) = client.stop() {
                debug!(error = %e, "Client already stopped");
            }
        }
        drop(clients);

        if let Some(token) = self.shutdown.lock().take() {
            token.cancel();
        }
        self.operations
            .wait_idle(|| self.state.state() == RpcState::Finished);

        info!(name = %self.configuration.name(), "Server stopped");
        Ok(())
    }

    fn accept(&self, call: AcceptedCall) -> Result<(), Status> {
        let mut clients = self.clients.lock();
        if self.state.state() != RpcState::Executing {
            return Err(Status::unavailable("server is not running"));
        }

        let remote = call.remote_addr;
        let client = Arc::new(ClientGrpc::remote(
            &self.configuration,
            call,
            self.executor.clone(),
            self.settings.clone(),
        ));
        client
            .start()
            .map_err(|e| Status::internal(e.to_string()))?;

        let (live, stale): (Vec<_>, Vec<_>) = clients
            .drain(..)
            .partition(|client| client.is_running());
        *clients = live;
        clients.push(client);
        debug!(remote = ?remote, clients = clients.len(), "Client attached");
        drop(clients);

        if !stale.is_empty() {
            // stopping blocks, keep it off the runtime
            let spawned = thread::Builder::new()
                .name("modkit-reaper".to_string())
                .spawn(move || {
                    for client in stale {
                        if client.state() == RpcState::Inactive
                            && let Err(e) = client.stop()
                        {
                            debug!(error = %e, "Failed to reap client");
                        }
                    }
                });
            if let Err(e) = spawned {
                warn!(error = %e, "Failed to spawn reaper thread");
            }
        }
        Ok(())
    }

    /// Writer sinks of every client currently executing.
    pub(crate) fn client_writer_sinks(&self) -> Vec<Arc<WriterSink>> {
        self.clients
            .lock()
            .iter()
            .filter(|client| client.state() == RpcState::Executing)
            .filter_map(|client| client.writer_sink())
            .collect()
    }

    /// Clients whose call is established.
    pub(crate) fn live_clients(&self) -> Vec<Arc<ClientGrpc>> {
        self.clients
            .lock()
            .iter()
            .filter(|client| client.state() == RpcState::Executing)
            .cloned()
            .collect()
    }
}

impl CompletionHandler for ServerCore {
    fn on_completion(&self, _operation: Operation, ok: bool) {
        {
            let mut state = self.state.lock();
            self.serving.store(false, Ordering::Release);
            if state.get() == RpcState::Disposing {
                state.set(RpcState::Finished);
            } else if state.fail() {
                warn!(name = %self.configuration.name(), ok, "Server transport ended unexpectedly");
            }
        }
        self.operations.end();
    }
}

struct Acceptor {
    core: Weak<ServerCore>,
}

impl CallAcceptor for Acceptor {
    fn accept(&self, call: AcceptedCall) -> Result<(), Status> {
        match self.core.upgrade() {
            Some(core) => core.accept(call),
            None => Err(Status::unavailable("server is gone")),
        }
    }
}

/// Server accepting bidirectional sessions and subscriptions.
pub struct ServerGrpc {
    core: Arc<ServerCore>,
}

impl ServerGrpc {
    pub fn new(
        configuration: &Configuration,
        executor: Arc<CompletionQueueExecutor>,
        settings: Settings,
    ) -> Self {
        Self {
            core: ServerCore::new(configuration, executor, settings),
        }
    }

    pub fn state(&self) -> RpcState {
        self.core.state()
    }

    pub(crate) fn core(&self) -> &Arc<ServerCore> {
        &self.core
    }
}

impl Connection for ServerGrpc {
    fn start(&self) -> Result<(), ConnectionError> {
        self.core.start()
    }

    fn stop(&self) -> Result<(), ConnectionError> {
        self.core.stop()
    }

    fn is_running(&self) -> bool {
        self.core.state() == RpcState::Executing
    }

    fn configuration(&self) -> &Configuration {
        &self.core.configuration
    }
}

impl Server for ServerGrpc {
    fn clients(&self) -> Vec<Arc<dyn Client>> {
        self.core
            .live_clients()
            .into_iter()
            .map(|client| client as Arc<dyn Client>)
            .collect()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.core.local_addr.lock()
    }
}

impl Drop for ServerGrpc {
    fn drop(&mut self) {
        if matches!(self.state(), RpcState::Executing | RpcState::Inactive)
            && let Err(e) = self.stop()
        {
            warn!(error = %e, "Failed to stop server on drop");
        }
    }
}
