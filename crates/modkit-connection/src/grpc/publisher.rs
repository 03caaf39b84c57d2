// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC publisher: a server whose single writer sink is fanned out to every
//! attached subscriber.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::server::ServerGrpc;
use crate::config::Settings;
use crate::configuration::Configuration;
use crate::connection::{Connection, Publisher, Server};
use crate::error::ConnectionError;
use crate::executor::CompletionQueueExecutor;
use crate::forward::Forwarder;
use crate::sink::WriterSink;
use crate::state::RpcState;

pub struct PublisherGrpc {
    server: ServerGrpc,
    writer_sink: Arc<WriterSink>,
    forwarder: Mutex<Option<Forwarder>>,
    poll: Duration,
}

impl PublisherGrpc {
    pub fn new(
        configuration: &Configuration,
        executor: Arc<CompletionQueueExecutor>,
        settings: Settings,
    ) -> Self {
        let poll = settings.writer_poll_interval();
        Self {
            server: ServerGrpc::new(configuration, executor, settings),
            writer_sink: Arc::new(WriterSink::new()),
            forwarder: Mutex::new(None),
            poll,
        }
    }

    pub fn state(&self) -> RpcState {
        self.server.state()
    }
}

impl Connection for PublisherGrpc {
    fn start(&self) -> Result<(), ConnectionError> {
        self.server.start()?;

        let core = Arc::downgrade(self.server.core());
        let forwarder = Forwarder::fan_out(
            "modkit-fanout",
            self.writer_sink.clone(),
            move || {
                core.upgrade()
                    .map(|core| core.client_writer_sinks())
                    .unwrap_or_default()
            },
            self.poll,
        );
        match forwarder {
            Ok(forwarder) => {
                *self.forwarder.lock() = Some(forwarder);
                info!(name = %self.configuration().name(), "Publisher started");
                Ok(())
            }
            Err(e) => {
                if let Err(stop) = self.server.stop() {
                    warn!(error = %stop, "Failed to stop publisher server");
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

impl Publisher for PublisherGrpc {
    fn subscriber_count(&self) -> usize {
        self.server.clients().len()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }
}
