// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock server side: bound endpoints and the peers attached to them.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::MockHub;
use crate::config::Settings;
use crate::configuration::{CONNECTIONCONFIGURATION_ID, Configuration};
use crate::connection::{Client, Connection, Publisher, Server};
use crate::error::ConnectionError;
use crate::forward::Forwarder;
use crate::sink::{ReaderSink, WriterSink};
use crate::state::{RpcState, RpcStateMachine};

fn connection_id(configuration: &Configuration) -> i64 {
    configuration.get_attribute_or(CONNECTIONCONFIGURATION_ID, -1)
}

pub(crate) struct EndpointCore {
    configuration: Configuration,
    id: i64,
    hub: Arc<MockHub>,
    state: RpcStateMachine,
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl EndpointCore {
    fn new(configuration: &Configuration, hub: Arc<MockHub>) -> Arc<Self> {
        Arc::new(Self {
            configuration: configuration.clone(),
            id: connection_id(configuration),
            hub,
            state: RpcStateMachine::new(),
            peers: Mutex::new(Vec::new()),
        })
    }

    fn start(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        if state.get() != RpcState::Created {
            return Err(ConnectionError::InvalidState {
                operation: "start",
                state: state.get(),
            });
        }
        state.set(RpcState::Init);
        if let Err(e) = self.hub.bind(self.id, self) {
            state.fail();
            return Err(e);
        }
        state.set(RpcState::Executing);
        info!(name = %self.configuration.name(), id = self.id, "Mock endpoint started");
        Ok(())
    }

    fn stop(self: &Arc<Self>) -> Result<(), ConnectionError> {
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

        self.hub.unbind(self.id, self);
        let peers: Vec<Arc<MockPeer>> = self.peers.lock().drain(..).collect();
        for peer in &peers {
            peer.close(true);
        }

        self.state.set_state(RpcState::Finished);
        info!(name = %self.configuration.name(), id = self.id, "Mock endpoint stopped");
        Ok(())
    }

    /// Attach a client whose lifecycle is tracked by `client_state`.
    pub(crate) fn attach(
        self: &Arc<Self>,
        client_state: Weak<RpcStateMachine>,
    ) -> Result<Arc<MockPeer>, ConnectionError> {
        let mut peers = self.peers.lock();
        if self.state.state() != RpcState::Executing {
            return Err(ConnectionError::EndpointNotFound(self.id));
        }
        let peer = Arc::new(MockPeer::new(
            &self.configuration,
            Arc::downgrade(self),
            client_state,
        ));
        peers.push(peer.clone());
        debug!(id = self.id, peers = peers.len(), "Mock peer attached");
        Ok(peer)
    }

    fn remove_peer(&self, peer: &MockPeer) {
        self.peers
            .lock()
            .retain(|attached| !std::ptr::eq(Arc::as_ptr(attached), peer));
    }

    pub(crate) fn peer_writer_sinks(&self) -> Vec<Arc<WriterSink>> {
        self.peers
            .lock()
            .iter()
            .filter(|peer| peer.is_running())
            .map(|peer| peer.writer_sink.clone())
            .collect()
    }

    fn live_peers(&self) -> Vec<Arc<MockPeer>> {
        self.peers
            .lock()
            .iter()
            .filter(|peer| peer.is_running())
            .cloned()
            .collect()
    }
}

/// Server-side view of one attached mock client.
pub struct MockPeer {
    configuration: Configuration,
    endpoint: Weak<EndpointCore>,
    client_state: Weak<RpcStateMachine>,
    state: RpcStateMachine,
    reader_sink: Arc<ReaderSink>,
    writer_sink: Arc<WriterSink>,
}

impl MockPeer {
    fn new(
        configuration: &Configuration,
        endpoint: Weak<EndpointCore>,
        client_state: Weak<RpcStateMachine>,
    ) -> Self {
        let state = RpcStateMachine::new();
        state.set_state(RpcState::Init);
        state.set_state(RpcState::Executing);
        Self {
            configuration: configuration.clone(),
            endpoint,
            client_state,
            state,
            reader_sink: Arc::new(ReaderSink::new()),
            writer_sink: Arc::new(WriterSink::new()),
        }
    }

    /// Sink receiving what the client writes.
    pub(crate) fn inbound(&self) -> Arc<ReaderSink> {
        self.reader_sink.clone()
    }

    /// Sink whose content is delivered to the client.
    pub(crate) fn outbound(&self) -> Arc<WriterSink> {
        self.writer_sink.clone()
    }

    /// Shut this side down. With `notify_client` the client is moved to
    /// `Inactive`, as a network peer would see its call end.
    fn close(&self, notify_client: bool) -> bool {
        {
            let mut state = self.state.lock();
            if !matches!(state.get(), RpcState::Executing | RpcState::Inactive) {
                return false;
            }
            state.set(RpcState::Disposing);
        }
        self.writer_sink.drain();
        self.reader_sink.drain();
        if notify_client && let Some(client) = self.client_state.upgrade() {
            client.fail();
        }
        self.state.set_state(RpcState::Finished);
        true
    }

    /// Detach on behalf of the client.
    pub(crate) fn release(&self) {
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.remove_peer(self);
        }
        self.close(false);
    }
}

impl Connection for MockPeer {
    fn start(&self) -> Result<(), ConnectionError> {
        Err(ConnectionError::InvalidState {
            operation: "start",
            state: self.state.state(),
        })
    }

    fn stop(&self) -> Result<(), ConnectionError> {
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.remove_peer(self);
        }
        if self.close(true) {
            Ok(())
        } else {
            Err(ConnectionError::InvalidState {
                operation: "stop",
                state: self.state.state(),
            })
        }
    }

    fn is_running(&self) -> bool {
        self.state.state() == RpcState::Executing
    }

    fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    fn reader_sink(&self) -> Option<Arc<ReaderSink>> {
        Some(self.reader_sink.clone())
    }

    fn writer_sink(&self) -> Option<Arc<WriterSink>> {
        Some(self.writer_sink.clone())
    }
}

impl Client for MockPeer {}

/// In-process server bound on its `connectionId`.
pub struct MockServer {
    core: Arc<EndpointCore>,
}

impl MockServer {
    pub fn new(configuration: &Configuration, hub: Arc<MockHub>) -> Self {
        Self {
            core: EndpointCore::new(configuration, hub),
        }
    }

    pub fn state(&self) -> RpcState {
        self.core.state.state()
    }
}

impl Connection for MockServer {
    fn start(&self) -> Result<(), ConnectionError> {
        self.core.start()
    }

    fn stop(&self) -> Result<(), ConnectionError> {
        self.core.stop()
    }

    fn is_running(&self) -> bool {
        self.state() == RpcState::Executing
    }

    fn configuration(&self) -> &Configuration {
        &self.core.configuration
    }
}

impl Server for MockServer {
    fn clients(&self) -> Vec<Arc<dyn Client>> {
        self.core
            .live_peers()
            .into_iter()
            .map(|peer| peer as Arc<dyn Client>)
            .collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if matches!(self.state(), RpcState::Executing | RpcState::Inactive)
            && let Err(e) = self.stop()
        {
            warn!(error = %e, "Failed to stop mock server on drop");
        }
    }
}

/// In-process publisher fanning its writer sink out to attached subscribers.
pub struct MockPublisher {
    server: MockServer,
    writer_sink: Arc<WriterSink>,
    forwarder: Mutex<Option<Forwarder>>,
    poll: Duration,
}

impl MockPublisher {
    pub fn new(configuration: &Configuration, hub: Arc<MockHub>, settings: Settings) -> Self {
        Self {
            server: MockServer::new(configuration, hub),
            writer_sink: Arc::new(WriterSink::new()),
            forwarder: Mutex::new(None),
            poll: settings.writer_poll_interval(),
        }
    }

    pub fn state(&self) -> RpcState {
        self.server.state()
    }
}

impl Connection for MockPublisher {
    fn start(&self) -> Result<(), ConnectionError> {
        self.server.start()?;
        let core = Arc::downgrade(&self.server.core);
        let forwarder = Forwarder::fan_out(
            "modkit-mock-fanout",
            self.writer_sink.clone(),
            move || {
                core.upgrade()
                    .map(|core| core.peer_writer_sinks())
                    .unwrap_or_default()
            },
            self.poll,
        );
        match forwarder {
            Ok(forwarder) => {
                *self.forwarder.lock() = Some(forwarder);
                Ok(())
            }
            Err(e) => {
                if let Err(stop) = self.server.stop() {
                    warn!(error = %stop, "Failed to stop mock publisher endpoint");
                }
                Err(e)
            }
        }
    }

    fn stop(&self) -> Result<(), ConnectionError> {
        self.server.stop()?;
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.stop();
        }
        self.writer_sink.drain();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.server.is_running()
    }

    fn configuration(&self) -> &Configuration {
        self.server.configuration()
    }

    fn writer_sink(&self) -> Option<Arc<WriterSink>> {
        Some(self.writer_sink.clone())
    }
}

impl Publisher for MockPublisher {
    fn subscriber_count(&self) -> usize {
        self.server.clients().len()
    }
}
