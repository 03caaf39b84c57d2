// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use super::client::ClientGrpc;
use crate::config::Settings;
use crate::configuration::{BASE_CLIENT_GRPC_CONFIG_NOWRITER, Configuration};
use crate::connection::{Connection, Subscriber};
use crate::error::ConnectionError;
use crate::executor::CompletionQueueExecutor;
use crate::sink::ReaderSink;
use crate::state::RpcState;

/// Receive-only client of a [`PublisherGrpc`](super::PublisherGrpc).
pub struct SubscriberGrpc {
    client: ClientGrpc,
}

impl SubscriberGrpc {
    pub fn new(
        configuration: &Configuration,
        executor: Arc<CompletionQueueExecutor>,
        settings: Settings,
    ) -> Self {
        let mut configuration = configuration.clone();
        configuration.add_attribute(BASE_CLIENT_GRPC_CONFIG_NOWRITER, "true", true);
        Self {
            client: ClientGrpc::subscription(&configuration, executor, settings),
        }
    }

    pub fn state(&self) -> RpcState {
        self.client.state()
    }
}

impl Connection for SubscriberGrpc {
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

impl Subscriber for SubscriberGrpc {}
