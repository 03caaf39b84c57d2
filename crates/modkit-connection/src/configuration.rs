// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Named key/value attribute store used to request and match connections.
//!
//! Values are stored as strings. Typed access goes through [`ToString`] on
//! the way in and [`FromStr`] on the way out; a value that does not parse as
//! the requested type reads as absent.
//!
//! A configuration can act as a *minimum configuration* for a factory rule:
//! every attribute of the minimum must be present in the candidate, and an
//! empty value in the minimum accepts any candidate value.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Connection identifier (i64, default -1). Mock transports bind on it.
pub const CONNECTIONCONFIGURATION_ID: &str = "connectionId";
/// Worker threads for the completion-queue executor (usize, default 2).
pub const CONNECTIONCONFIGURATION_THREADPOOLSIZE: &str = "threadPoolSize";
/// Whether writers wait for the outbound queue to empty (bool, default true).
pub const CONNECTIONCONFIGURATION_BLOCKING: &str = "operationBlocking";
/// Transport family selected by the factory rules (`grpc` or `mock`).
pub const CONNECTIONCONFIGURATION_TECHNOLOGY: &str = "connectionTechnology";
/// Server address (default 127.0.0.1).
pub const NETWORKCONNECTIONCONFIGURATION_SERVERIP: &str = "serverIp";
/// Server port (i32, default -1 meaning unset).
pub const NETWORKCONNECTIONCONFIGURATION_SERVERPORT: &str = "serverPort";
/// Present on a client configuration to suppress its writer.
pub const BASE_CLIENT_GRPC_CONFIG_NOWRITER: &str = "baseClientGrpcNoWriter";

/// Named set of string attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    name: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Add an attribute. Fails when it exists and `overwrite` is false.
    pub fn add_attribute(&mut self, name: &str, value: impl ToString, overwrite: bool) -> bool {
        if !overwrite && self.attributes.contains_key(name) {
            return false;
        }
        self.attributes.insert(name.to_string(), value.to_string());
        true
    }

    /// Replace the value of an existing attribute.
    pub fn update_attribute(&mut self, name: &str, value: impl ToString) -> bool {
        match self.attributes.get_mut(name) {
            Some(current) => {
                *current = value.to_string();
                true
            }
            None => false,
        }
    }

    pub fn remove_attribute(&mut self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    /// Typed read. Absent and unparsable values both yield `None`.
    pub fn get_attribute<T: FromStr>(&self, name: &str) -> Option<T> {
        self.attributes.get(name)?.parse().ok()
    }

    pub fn get_attribute_or<T: FromStr>(&self, name: &str, default: T) -> T {
        self.get_attribute(name).unwrap_or(default)
    }

    /// Raw string value.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// True only for a present attribute with an empty value.
    pub fn is_attribute_empty(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(String::is_empty)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Overwrite `other` with a deep copy of this configuration.
    pub fn copy_to(&self, other: &mut Configuration) {
        other.name.clone_from(&self.name);
        other.attributes.clone_from(&self.attributes);
    }

    /// Whether this configuration satisfies `minimum`.
    pub fn matches(&self, minimum: &Configuration) -> bool {
        minimum
            .attributes
            .iter()
            .all(|(name, expected)| match self.attributes.get(name) {
                Some(actual) => expected.is_empty() || actual == expected,
                None => false,
            })
    }
}

/// [`Configuration`] carrying the attributes every connection understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionConfiguration(Configuration);

impl ConnectionConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        let mut configuration = Configuration::new(name);
        configuration.add_attribute(CONNECTIONCONFIGURATION_ID, -1, false);
        configuration.add_attribute(CONNECTIONCONFIGURATION_THREADPOOLSIZE, 2, false);
        configuration.add_attribute(CONNECTIONCONFIGURATION_BLOCKING, true, false);
        Self(configuration)
    }

    pub fn connection_id(&self) -> i64 {
        self.0.get_attribute_or(CONNECTIONCONFIGURATION_ID, -1)
    }

    pub fn set_connection_id(&mut self, id: i64) {
        self.0.add_attribute(CONNECTIONCONFIGURATION_ID, id, true);
    }

    pub fn thread_pool_size(&self) -> usize {
        self.0.get_attribute_or(CONNECTIONCONFIGURATION_THREADPOOLSIZE, 2)
    }

    pub fn set_thread_pool_size(&mut self, size: usize) {
        self.0.add_attribute(CONNECTIONCONFIGURATION_THREADPOOLSIZE, size, true);
    }

    pub fn is_blocking(&self) -> bool {
        self.0.get_attribute_or(CONNECTIONCONFIGURATION_BLOCKING, true)
    }

    pub fn set_blocking(&mut self, blocking: bool) {
        self.0.add_attribute(CONNECTIONCONFIGURATION_BLOCKING, blocking, true);
    }

    pub fn into_inner(self) -> Configuration {
        self.0
    }
}

impl Deref for ConnectionConfiguration {
    type Target = Configuration;

    fn deref(&self) -> &Configuration {
        &self.0
    }
}

impl DerefMut for ConnectionConfiguration {
    fn deref_mut(&mut self) -> &mut Configuration {
        &mut self.0
    }
}

impl From<ConnectionConfiguration> for Configuration {
    fn from(value: ConnectionConfiguration) -> Self {
        value.0
    }
}

/// [`ConnectionConfiguration`] for TCP transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkConnectionConfiguration(ConnectionConfiguration);

impl NetworkConnectionConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        let mut configuration = ConnectionConfiguration::new(name);
        configuration.add_attribute(NETWORKCONNECTIONCONFIGURATION_SERVERIP, "127.0.0.1", false);
        configuration.add_attribute(NETWORKCONNECTIONCONFIGURATION_SERVERPORT, -1, false);
        Self(configuration)
    }

    pub fn server_ip(&self) -> String {
        self.get_attribute_or(
            NETWORKCONNECTIONCONFIGURATION_SERVERIP,
            "127.0.0.1".to_string(),
        )
    }

    pub fn set_server_ip(&mut self, ip: impl ToString) {
        self.add_attribute(NETWORKCONNECTIONCONFIGURATION_SERVERIP, ip, true);
    }

    pub fn server_port(&self) -> i32 {
        self.get_attribute_or(NETWORKCONNECTIONCONFIGURATION_SERVERPORT, -1)
    }

    pub fn set_server_port(&mut self, port: i32) {
        self.add_attribute(NETWORKCONNECTIONCONFIGURATION_SERVERPORT, port, true);
    }

    /// Resolved address, if both attributes are valid.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        Self::socket_addr_of(self)
    }

    /// Resolve `serverIp`/`serverPort` of any configuration.
    pub fn socket_addr_of(configuration: &Configuration) -> Option<SocketAddr> {
        let ip: IpAddr = configuration.get_attribute(NETWORKCONNECTIONCONFIGURATION_SERVERIP)?;
        let port: u16 = configuration.get_attribute(NETWORKCONNECTIONCONFIGURATION_SERVERPORT)?;
        Some(SocketAddr::new(ip, port))
    }

    pub fn into_inner(self) -> Configuration {
        self.0.into_inner()
    }
}

impl Deref for NetworkConnectionConfiguration {
    type Target = ConnectionConfiguration;

    fn deref(&self) -> &ConnectionConfiguration {
        &self.0
    }
}

impl DerefMut for NetworkConnectionConfiguration {
    fn deref_mut(&mut self) -> &mut ConnectionConfiguration {
        &mut self.0
    }
}

impl From<NetworkConnectionConfiguration> for Configuration {
    fn from(value: NetworkConnectionConfiguration) -> Self {
        value.into_inner()
    }
}
