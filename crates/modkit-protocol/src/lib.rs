// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Modkit Protocol - gRPC + Any envelope communication layer
//!
//! This crate provides the wire protocol used by modkit connections:
//! - a bidirectional `Connect` RPC carrying sessions between clients and servers
//! - a server-streaming `Publications` RPC feeding write-less subscribers
//! - envelope conversion between user messages and `google.protobuf.Any`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    modkit-protocol                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Envelope: Message trait, GenericMessage carrier            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RPC Layer: Connect (bidi) + Publications (server stream)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: HTTP/2 (tonic)                                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use modkit_protocol::client::{SessionConfig, open_session};
//! use modkit_protocol::envelope::{JsonMessage, create};
//!
//! let mut session = open_session(&SessionConfig {
//!     target: "127.0.0.1:50051".to_string(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! session.outbound.send(create(&JsonMessage::new(reading))?).await?;
//! let reply = session.inbound.message().await?;
//! ```

pub mod client;
pub mod envelope;
pub mod server;

// Generated service stubs for the connection service
pub mod proto {
    include!(concat!(
        env!("OUT_DIR"),
        "/modkit.connection.ConnectionService.rs"
    ));
}

// Re-export main types
pub use client::{ClientError, ClientSession, SessionConfig, Subscription};
pub use envelope::{
    ConversionError, Envelope, GenericMessage, JsonMessage, JsonPayload, Message, ProtobufMessage,
    RawMessage,
};
pub use server::{AcceptedCall, CallAcceptor, ConnectionEndpoint, ServerError};
