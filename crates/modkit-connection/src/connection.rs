// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection roles.
//!
//! Every transport implements [`Connection`] plus exactly one role trait.
//! Roles differ in which sinks they expose:
//!
//! | role         | reader sink | writer sink |
//! |--------------|-------------|-------------|
//! | [`Client`]     | yes         | unless write-less |
//! | [`Server`]     | per client  | per client  |
//! | [`Publisher`]  | no          | yes (fanned out) |
//! | [`Subscriber`] | yes         | no          |

use std::net::SocketAddr;
use std::sync::Arc;

use crate::configuration::Configuration;
use crate::error::ConnectionError;
use crate::sink::{ReaderSink, WriterSink};

pub trait Connection: Send + Sync {
    /// Start the connection. Only valid once, from the initial state.
    fn start(&self) -> Result<(), ConnectionError>;

    /// Stop the connection and release its transport. Blocks until every
    /// pending operation has completed.
    fn stop(&self) -> Result<(), ConnectionError>;

    fn is_running(&self) -> bool;

    fn configuration(&self) -> &Configuration;

    fn reader_sink(&self) -> Option<Arc<ReaderSink>> {
        None
    }

    fn writer_sink(&self) -> Option<Arc<WriterSink>> {
        None
    }
}

pub trait Server: Connection {
    /// Clients currently attached.
    fn clients(&self) -> Vec<Arc<dyn Client>>;

    /// Bound address once started.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

pub trait Client: Connection {}

pub trait Publisher: Connection {
    /// Subscribers currently attached.
    fn subscriber_count(&self) -> usize;

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

pub trait Subscriber: Connection {}
