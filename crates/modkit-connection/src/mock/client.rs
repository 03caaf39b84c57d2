// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock client side.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::MockHub;
use super::server::MockPeer;
use crate::config::Settings;
use crate::configuration::{BASE_CLIENT_GRPC_CONFIG_NOWRITER, CONNECTIONCONFIGURATION_ID, Configuration};
use crate::connection::{Client, Connection, Subscriber};
use crate::error::ConnectionError;
use crate::forward::Forwarder;
use crate::sink::{ReaderSink, WriterSink};
use crate::state::{RpcState, RpcStateMachine};

/// Forwarders tying a client's sinks to its peer.
struct Link {
    peer: Arc<MockPeer>,
    uplink: Option<Forwarder>,
    downlink: Forwarder,
}

impl Link {
    fn close(self) {
        if let Some(uplink) = &self.uplink {
            uplink.stop();
        }
        self.downlink.stop();
        self.peer.release();
    }
}

/// In-process client attached to the endpoint bound on its `connectionId`.
pub struct MockClient {
    configuration: Configuration,
    id: i64,
    hub: Arc<MockHub>,
    poll: Duration,
    state: Arc<RpcStateMachine>,
    reader_sink: Arc<ReaderSink>,
    writer_sink: Option<Arc<WriterSink>>,
    link: Mutex<Option<Link>>,
}

impl MockClient {
    pub fn new(configuration: &Configuration, hub: Arc<MockHub>, settings: Settings) -> Self {
        let writer_sink = (!configuration.has_attribute(BASE_CLIENT_GRPC_CONFIG_NOWRITER))
            .then(|| Arc::new(WriterSink::new()));
        Self {
            configuration: configuration.clone(),
            id: configuration.get_attribute_or(CONNECTIONCONFIGURATION_ID, -1),
            hub,
            poll: settings.writer_poll_interval(),
            state: Arc::new(RpcStateMachine::new()),
            reader_sink: Arc::new(ReaderSink::new()),
            writer_sink,
            link: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RpcState {
        self.state.state()
    }

    fn connect(&self) -> Result<Link, ConnectionError> {
        let endpoint = self
            .hub
            .lookup(self.id)
            .ok_or(ConnectionError::EndpointNotFound(self.id))?;
        let peer = endpoint.attach(Arc::downgrade(&self.state))?;

        let downlink = match Forwarder::pump(
            "modkit-mock-down",
            peer.outbound(),
            self.reader_sink.clone(),
            self.poll,
        ) {
            Ok(downlink) => downlink,
            Err(e) => {
                peer.release();
                return Err(e);
            }
        };
        let uplink = match &self.writer_sink {
            Some(sink) => {
                match Forwarder::pump("modkit-mock-up", sink.clone(), peer.inbound(), self.poll) {
                    Ok(uplink) => Some(uplink),
                    Err(e) => {
                        downlink.stop();
                        peer.release();
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        Ok(Link {
            peer,
            uplink,
            downlink,
        })
    }
}

impl Connection for MockClient {
    fn start(&self) -> Result<(), ConnectionError> {
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

        match self.connect() {
            Ok(link) => {
                *self.link.lock() = Some(link);
                // the endpoint may have gone away meanwhile, leaving us Inactive
                self.state.set_state(RpcState::Executing);
                info!(name = %self.configuration.name(), id = self.id, "Mock client started");
                Ok(())
            }
            Err(e) => {
                self.state.fail();
                warn!(name = %self.configuration.name(), error = %e, "Mock client failed to start");
                Err(e)
            }
        }
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
        }

        if let Some(sink) = &self.writer_sink {
            sink.drain();
        }
        if let Some(link) = self.link.lock().take() {
            link.close();
        }
        self.reader_sink.drain();
        self.state.set_state(RpcState::Finished);
        info!(name = %self.configuration.name(), id = self.id, "Mock client stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        matches!(self.state(), RpcState::Init | RpcState::Executing)
    }

    fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    fn reader_sink(&self) -> Option<Arc<ReaderSink>> {
        Some(self.reader_sink.clone())
    }

    fn writer_sink(&self) -> Option<Arc<WriterSink>> {
        self.writer_sink.clone()
    }
}

impl Client for MockClient {}

impl Drop for MockClient {
    fn drop(&mut self) {
        if matches!(self.state(), RpcState::Executing | RpcState::Inactive)
            && let Err(e) = self.stop()
        {
            warn!(error = %e, "Failed to stop mock client on drop");
        }
    }
}

/// Receive-only [`MockClient`].
pub struct MockSubscriber {
    client: MockClient,
}

impl MockSubscriber {
    pub fn new(configuration: &Configuration, hub: Arc<MockHub>, settings: Settings) -> Self {
        let mut configuration = configuration.clone();
        configuration.add_attribute(BASE_CLIENT_GRPC_CONFIG_NOWRITER, "true", true);
        Self {
            client: MockClient::new(&configuration, hub, settings),
        }
    }

    pub fn state(&self) -> RpcState {
        self.client.state()
    }
}

impl Connection for MockSubscriber {
    fn start(&self) -> Result<(), ConnectionError> {
        self.client.start()
    }

    fn stop(&self) -> Result<(), ConnectionError> {
        self.client.stop()
    }

    fn is_running(&self) -> bool {
        self.client.is_running()
    }

    fn configuration(&self) -> &Configuration {
        self.client.configuration()
    }

    fn reader_sink(&self) -> Option<Arc<ReaderSink>> {
        self.client.reader_sink()
    }
}

impl Subscriber for MockSubscriber {}
