// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Modkit Connection - transport-neutral connections for modkit modules
//!
//! Modules exchange messages through connections in four roles (server,
//! client, publisher, subscriber). Which transport backs a connection is
//! decided at runtime: a [`ConnectionFactory`] holds rules pairing a minimum
//! [`Configuration`] with a constructor, and the first rule the requested
//! configuration satisfies builds the connection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    Writer<T>     ┌────────────┐   writer thread   ┌───────────┐
//! │ user module  │ ───────────────► │ WriterSink │ ────────────────► │           │
//! │              │                  └────────────┘                   │ transport │
//! │              │    Reader<T>     ┌────────────┐    read loop      │ grpc/mock │
//! │              │ ◄─────────────── │ ReaderSink │ ◄──────────────── │           │
//! └──────────────┘                  └────────────┘                   └───────────┘
//! ```
//!
//! Network I/O completes on a shared [`CompletionQueueExecutor`]; each
//! connection tracks its lifecycle in an [`RpcStateMachine`].
//!
//! # Usage
//!
//! ```ignore
//! use modkit_connection::{ConnectionManager, Reader, Writer, grpc};
//! use modkit_connection::ProtobufMessage;
//!
//! let manager = ConnectionManager::from_env()?;
//! let config = grpc::configuration("quotes", "127.0.0.1", 7000);
//!
//! let publisher = manager.create_publisher(&config).ok_or(Missing)?;
//! publisher.start()?;
//! let subscriber = manager.create_subscriber(&config).ok_or(Missing)?;
//! subscriber.start()?;
//!
//! Writer::<ProtobufMessage<Quote>>::from_connection(&*publisher)?.write(&quote)?;
//! let received = Reader::<ProtobufMessage<Quote>>::from_connection(&*subscriber)?.read()?;
//! ```

pub mod config;
pub mod configuration;
pub mod connection;
pub mod error;
pub mod executor;
pub mod factory;
pub mod forward;
pub mod grpc;
pub mod io;
pub mod manager;
pub mod mock;
pub mod sink;
pub mod state;

pub use config::{Settings, SettingsError};
pub use configuration::{Configuration, ConnectionConfiguration, NetworkConnectionConfiguration};
pub use connection::{Client, Connection, Publisher, Server, Subscriber};
pub use error::{ConnectionError, SinkError};
pub use executor::{CompletionHandler, CompletionQueueExecutor, Operation, OperationKind, Tag};
pub use factory::{ConnectionFactory, ConnectionFactoryRule};
pub use io::{Reader, Writer};
pub use manager::ConnectionManager;
pub use sink::{MessageHandler, ReaderSink, WriterSink};
pub use state::{RpcState, RpcStateMachine};

pub use modkit_protocol::envelope::{
    Envelope, JsonMessage, JsonPayload, Message, ProtobufMessage, RawMessage,
};
