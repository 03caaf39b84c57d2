// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for connections and sinks.

use modkit_protocol::ConversionError;
use thiserror::Error;

use crate::config::SettingsError;
use crate::state::RpcState;

/// Errors raised by connection lifecycle operations
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: RpcState,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("completion queue executor is stopped")]
    ExecutorStopped,

    #[error("no endpoint bound for connection id {0}")]
    EndpointNotFound(i64),
}

/// Errors raised by sinks and the reader/writer handles
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink is drained")]
    Drained,

    #[error("timed out waiting for a message")]
    Timeout,

    #[error("sink is empty")]
    Empty,

    #[error("sink dispatches to a message handler")]
    HandlerActive,

    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),
}
