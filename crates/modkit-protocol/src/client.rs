// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC client helpers for opening connection sessions.

use std::time::Duration;

use prost_types::Any;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Streaming;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, instrument};

use crate::proto::connection_service_client::ConnectionServiceClient;

/// Errors that can occur while opening a session
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("rpc error: {0}")]
    Status(#[from] tonic::Status),

    #[error("invalid target address: {0}")]
    InvalidAddress(String),

    #[error("connection timed out after {0}ms")]
    Timeout(u64),
}

/// Configuration for an outbound session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Target as `host:port`
    pub target: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Capacity of the outbound envelope channel
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target: "127.0.0.1:50051".to_string(),
            connect_timeout_ms: 5_000,
            channel_capacity: 64,
        }
    }
}

/// An open bidirectional `Connect` call.
pub struct ClientSession {
    /// Envelopes sent by the server
    pub inbound: Streaming<Any>,
    /// Envelopes queued for the server; dropping it half-closes the call
    pub outbound: mpsc::Sender<Any>,
}

/// An open `Publications` call.
pub struct Subscription {
    pub inbound: Streaming<Any>,
}

async fn connect_channel(config: &SessionConfig) -> Result<Channel, ClientError> {
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    let endpoint = Endpoint::from_shared(format!("http://{}", config.target))
        .map_err(|_| ClientError::InvalidAddress(config.target.clone()))?
        .connect_timeout(timeout);

    match tokio::time::timeout(timeout, endpoint.connect()).await {
        Ok(channel) => Ok(channel?),
        Err(_) => Err(ClientError::Timeout(config.connect_timeout_ms)),
    }
}

/// Open a bidirectional session with a connection server.
#[instrument(skip(config), fields(target = %config.target))]
pub async fn open_session(config: &SessionConfig) -> Result<ClientSession, ClientError> {
    let channel = connect_channel(config).await?;
    let mut client = ConnectionServiceClient::new(channel);

    let (outbound, rx) = mpsc::channel(config.channel_capacity.max(1));
    let response = client.connect_stream(ReceiverStream::new(rx)).await?;

    info!("Session opened");
    Ok(ClientSession {
        inbound: response.into_inner(),
        outbound,
    })
}

/// Open a receive-only subscription with a publishing server.
#[instrument(skip(config), fields(target = %config.target))]
pub async fn open_subscription(config: &SessionConfig) -> Result<Subscription, ClientError> {
    let channel = connect_channel(config).await?;
    let mut client = ConnectionServiceClient::new(channel);

    let response = client.publications(Any::default()).await?;

    debug!("Subscription opened");
    Ok(Subscription {
        inbound: response.into_inner(),
    })
}
