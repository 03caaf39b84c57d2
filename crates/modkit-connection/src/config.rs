// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime settings loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::configuration::{CONNECTIONCONFIGURATION_THREADPOOLSIZE, Configuration};

/// Tuning shared by every connection created through one manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Completion-queue worker threads
    pub thread_pool_size: usize,
    /// How long writer and fan-out threads wait for a message before
    /// re-checking their connection state
    pub writer_poll_ms: u64,
    /// Outbound connect timeout
    pub connect_timeout_ms: u64,
    /// Time a stopping server grants open calls before abandoning them
    pub shutdown_grace_ms: u64,
    /// Envelopes buffered per call in each direction
    pub channel_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thread_pool_size: 2,
            writer_poll_ms: 50,
            connect_timeout_ms: 5_000,
            shutdown_grace_ms: 250,
            channel_capacity: 64,
        }
    }
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// Optional (with defaults):
    /// - `MODKIT_THREAD_POOL_SIZE`: Completion-queue workers (default: 2)
    /// - `MODKIT_WRITER_POLL_MS`: Writer poll interval in ms (default: 50)
    /// - `MODKIT_CONNECT_TIMEOUT_MS`: Connect timeout in ms (default: 5000)
    /// - `MODKIT_SHUTDOWN_GRACE_MS`: Server shutdown grace in ms (default: 250)
    /// - `MODKIT_CHANNEL_CAPACITY`: Per-call channel capacity (default: 64)
    pub fn from_env() -> Result<Self, SettingsError> {
        let default = Self::default();

        let thread_pool_size = positive(env_or(
            "MODKIT_THREAD_POOL_SIZE",
            default.thread_pool_size,
            "must be a positive integer",
        )?)
        .ok_or(SettingsError::Invalid(
            "MODKIT_THREAD_POOL_SIZE",
            "must be a positive integer",
        ))?;

        let writer_poll_ms = positive(env_or(
            "MODKIT_WRITER_POLL_MS",
            default.writer_poll_ms,
            "must be a positive number of milliseconds",
        )?)
        .ok_or(SettingsError::Invalid(
            "MODKIT_WRITER_POLL_MS",
            "must be a positive number of milliseconds",
        ))?;

        let connect_timeout_ms = env_or(
            "MODKIT_CONNECT_TIMEOUT_MS",
            default.connect_timeout_ms,
            "must be a number of milliseconds",
        )?;

        let shutdown_grace_ms = env_or(
            "MODKIT_SHUTDOWN_GRACE_MS",
            default.shutdown_grace_ms,
            "must be a number of milliseconds",
        )?;

        let channel_capacity = positive(env_or(
            "MODKIT_CHANNEL_CAPACITY",
            default.channel_capacity,
            "must be a positive integer",
        )?)
        .ok_or(SettingsError::Invalid(
            "MODKIT_CHANNEL_CAPACITY",
            "must be a positive integer",
        ))?;

        Ok(Self {
            thread_pool_size,
            writer_poll_ms,
            connect_timeout_ms,
            shutdown_grace_ms,
            channel_capacity,
        })
    }

    /// Apply the `threadPoolSize` attribute of a connection configuration.
    pub fn with_configuration(&self, configuration: &Configuration) -> Self {
        let thread_pool_size = configuration
            .get_attribute::<usize>(CONNECTIONCONFIGURATION_THREADPOOLSIZE)
            .filter(|size| *size > 0)
            .unwrap_or(self.thread_pool_size);
        Self {
            thread_pool_size,
            ..self.clone()
        }
    }

    pub fn writer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.writer_poll_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn env_or<T: FromStr>(var: &'static str, default: T, reason: &'static str) -> Result<T, SettingsError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| SettingsError::Invalid(var, reason)),
        Err(_) => Ok(default),
    }
}

fn positive<T: PartialOrd + Default>(value: T) -> Option<T> {
    (value > T::default()).then_some(value)
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
