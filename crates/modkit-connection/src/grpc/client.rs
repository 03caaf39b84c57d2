// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC client connection.

use std::sync::Arc;

use modkit_protocol::server::AcceptedCall;
use tracing::warn;

use super::base_client::BaseClientGrpc;
use crate::config::Settings;
use crate::configuration::Configuration;
use crate::connection::{Client, Connection};
use crate::error::ConnectionError;
use crate::executor::CompletionQueueExecutor;
use crate::sink::{ReaderSink, WriterSink};
use crate::state::RpcState;

/// Bidirectional streaming client.
///
/// Also represents a remote peer attached to a [`ServerGrpc`](super::ServerGrpc).
pub struct ClientGrpc {
    core: Arc<BaseClientGrpc>,
}

impl ClientGrpc {
    /// Client of the server at the configuration's `serverIp:serverPort`.
    pub fn new(
        configuration: &Configuration,
        executor: Arc<CompletionQueueExecutor>,
        settings: Settings,
    ) -> Self {
        Self {
            core: BaseClientGrpc::outbound(configuration, executor, settings, false),
        }
    }

    pub(crate) fn subscription(
        configuration: &Configuration,
        executor: Arc<CompletionQueueExecutor>,
        settings: Settings,
    ) -> Self {
        Self {
            core: BaseClientGrpc::outbound(configuration, executor, settings, true),
        }
    }

    pub(crate) fn remote(
        configuration: &Configuration,
        call: AcceptedCall,
        executor: Arc<CompletionQueueExecutor>,
        settings: Settings,
    ) -> Self {
        Self {
            core: BaseClientGrpc::remote(configuration, call, executor, settings),
        }
    }

    pub fn state(&self) -> RpcState {
        self.core.state()
    }
}

impl Connection for ClientGrpc {
    fn start(&self) -> Result<(), ConnectionError> {
        self.core.start()
    }

    fn stop(&self) -> Result<(), ConnectionError> {
        self.core.stop()
    }

    fn is_running(&self) -> bool {
        self.core.is_running()
    }

    fn configuration(&self) -> &Configuration {
        self.core.configuration()
    }

    fn reader_sink(&self) -> Option<Arc<ReaderSink>> {
        Some(self.core.reader_sink())
    }

    fn writer_sink(&self) -> Option<Arc<WriterSink>> {
        self.core.writer_sink()
    }
}

impl Client for ClientGrpc {}

impl Drop for ClientGrpc {
    fn drop(&mut self) {
        if matches!(
            self.state(),
            RpcState::Init | RpcState::Executing | RpcState::Inactive
        ) && let Err(e) = self.stop()
        {
            warn!(error = %e, "Failed to stop client on drop");
        }
    }
}
