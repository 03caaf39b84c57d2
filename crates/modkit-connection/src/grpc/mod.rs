// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC transport.
//!
//! All gRPC connections of a manager share one [`CompletionQueueExecutor`].
//! Clients and subscribers open calls towards `serverIp:serverPort`; servers
//! and publishers listen there (port `0` picks a free port, see
//! [`Server::local_addr`](crate::connection::Server::local_addr)).

mod base_client;
mod client;
mod publisher;
mod server;
mod subscriber;

use std::sync::Arc;

pub use client::ClientGrpc;
pub use publisher::PublisherGrpc;
pub use server::ServerGrpc;
pub use subscriber::SubscriberGrpc;

use crate::config::Settings;
use crate::configuration::{
    CONNECTIONCONFIGURATION_TECHNOLOGY, Configuration, ConnectionConfiguration,
    NETWORKCONNECTIONCONFIGURATION_SERVERIP, NETWORKCONNECTIONCONFIGURATION_SERVERPORT,
    NetworkConnectionConfiguration,
};
use crate::error::ConnectionError;
use crate::executor::CompletionQueueExecutor;
use crate::factory::ConnectionFactory;

/// Value of `connectionTechnology` selecting this transport.
pub const TECHNOLOGY: &str = "grpc";

/// Network configuration for a gRPC endpoint at `ip:port`.
pub fn configuration(name: &str, ip: &str, port: u16) -> Configuration {
    let mut configuration = NetworkConnectionConfiguration::new(name);
    configuration.set_server_ip(ip);
    configuration.set_server_port(i32::from(port));
    let mut configuration = configuration.into_inner();
    configuration.add_attribute(CONNECTIONCONFIGURATION_TECHNOLOGY, TECHNOLOGY, true);
    configuration
}

/// Minimum every gRPC rule requires: the technology plus an address.
pub fn minimum_configuration() -> Configuration {
    let mut minimum = Configuration::new("grpc");
    minimum.add_attribute(CONNECTIONCONFIGURATION_TECHNOLOGY, TECHNOLOGY, false);
    minimum.add_attribute(NETWORKCONNECTIONCONFIGURATION_SERVERIP, "", false);
    minimum.add_attribute(NETWORKCONNECTIONCONFIGURATION_SERVERPORT, "", false);
    minimum
}

/// Start the shared executor and register the gRPC rules on `factory`.
///
/// The executor runs as many completion workers as the `threadPoolSize`
/// attribute of `configuration` asks for, falling back to `settings`.
pub fn initialize(
    factory: &mut ConnectionFactory,
    configuration: &ConnectionConfiguration,
    settings: &Settings,
) -> Result<Arc<CompletionQueueExecutor>, ConnectionError> {
    let settings = settings.with_configuration(configuration);
    let executor = CompletionQueueExecutor::new(settings.thread_pool_size)?;
    register_rules(factory, &executor, &settings);
    Ok(executor)
}

/// Register one rule per role, all built on `executor`.
pub fn register_rules(
    factory: &mut ConnectionFactory,
    executor: &Arc<CompletionQueueExecutor>,
    settings: &Settings,
) {
    let (e, s) = (executor.clone(), settings.clone());
    factory.add_server_rule(minimum_configuration(), move |c| {
        ServerGrpc::new(c, e.clone(), s.clone())
    });
    let (e, s) = (executor.clone(), settings.clone());
    factory.add_client_rule(minimum_configuration(), move |c| {
        ClientGrpc::new(c, e.clone(), s.clone())
    });
    let (e, s) = (executor.clone(), settings.clone());
    factory.add_publisher_rule(minimum_configuration(), move |c| {
        PublisherGrpc::new(c, e.clone(), s.clone())
    });
    let (e, s) = (executor.clone(), settings.clone());
    factory.add_subscriber_rule(minimum_configuration(), move |c| {
        SubscriberGrpc::new(c, e.clone(), s.clone())
    });
}
