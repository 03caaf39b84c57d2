// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for the connection integration tests.

#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use modkit_connection::{ConnectionManager, Settings};
use tracing_subscriber::EnvFilter;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// `google.protobuf.StringValue`, which prost maps to `String` and therefore
/// does not ship as a message type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StringValue {
    #[prost(string, tag = "1")]
    pub value: String,
}

impl prost::Name for StringValue {
    const NAME: &'static str = "StringValue";
    const PACKAGE: &'static str = "google.protobuf";
}

impl StringValue {
    pub fn of(value: &str) -> Self {
        Self {
            value: value.to_string(),
        }
    }
}

/// Log to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Manager with fast polling, suitable for tests.
pub fn manager() -> ConnectionManager {
    init_tracing();
    ConnectionManager::new(Settings {
        thread_pool_size: 2,
        writer_poll_ms: 10,
        connect_timeout_ms: 2_000,
        ..Settings::default()
    })
    .expect("manager should start")
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
