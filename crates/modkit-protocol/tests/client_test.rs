// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session tests for modkit-protocol against a live loopback server.

use std::sync::Arc;
use std::time::Duration;

use modkit_protocol::client::{SessionConfig, open_session, open_subscription};
use modkit_protocol::envelope::{JsonMessage, JsonPayload, create, format_and_name, parse};
use modkit_protocol::server::{AcceptedCall, CallAcceptor, ConnectionEndpoint, serve};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::Status;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Greeting {
    text: String,
}

impl JsonPayload for Greeting {
    const TYPE_NAME: &'static str = "modkit.test.Greeting";
}

/// Echoes session traffic and greets subscribers once.
struct Echo;

impl CallAcceptor for Echo {
    fn accept(&self, call: AcceptedCall) -> Result<(), Status> {
        let outbound = call.outbound;
        match call.inbound {
            Some(mut inbound) => {
                tokio::spawn(async move {
                    while let Ok(Some(envelope)) = inbound.message().await {
                        if outbound.send(Ok(envelope)).await.is_err() {
                            break;
                        }
                    }
                });
            }
            None => {
                let greeting = create(&JsonMessage::new(Greeting {
                    text: "welcome".to_string(),
                }))
                .map_err(|e| Status::internal(e.to_string()))?;
                tokio::spawn(async move {
                    let _ = outbound.send(Ok(greeting)).await;
                });
            }
        }
        Ok(())
    }
}

async fn start_echo() -> (SessionConfig, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(
        listener,
        ConnectionEndpoint::new(Arc::new(Echo), 16),
        shutdown.clone(),
        Duration::from_millis(200),
    ));

    let config = SessionConfig {
        target: addr.to_string(),
        connect_timeout_ms: 2_000,
        ..Default::default()
    };
    (config, shutdown)
}

#[tokio::test]
async fn test_session_echo() {
    let (config, shutdown) = start_echo().await;
    let mut session = open_session(&config).await.unwrap();

    let sent = JsonMessage::new(Greeting {
        text: "hello".to_string(),
    });
    session.outbound.send(create(&sent).unwrap()).await.unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(5), session.inbound.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let mut received = JsonMessage::<Greeting>::default();
    parse(&envelope, &mut received).unwrap();
    assert_eq!(received, sent);

    shutdown.cancel();
}

#[tokio::test]
async fn test_session_ends_when_outbound_dropped() {
    let (config, shutdown) = start_echo().await;
    let session = open_session(&config).await.unwrap();
    let mut inbound = session.inbound;
    drop(session.outbound);

    let end = tokio::time::timeout(Duration::from_secs(5), inbound.message())
        .await
        .unwrap()
        .unwrap();
    assert!(end.is_none());

    shutdown.cancel();
}

#[tokio::test]
async fn test_subscription_receives_greeting() {
    let (config, shutdown) = start_echo().await;
    let mut subscription = open_subscription(&config).await.unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(5), subscription.inbound.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        format_and_name(&envelope),
        ("JSON".to_string(), "modkit.test.Greeting".to_string())
    );

    shutdown.cancel();
}
