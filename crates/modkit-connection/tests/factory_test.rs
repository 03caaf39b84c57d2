// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rule selection through the factory and the manager.

mod common;

use std::sync::Arc;

use common::manager;
use modkit_connection::configuration::CONNECTIONCONFIGURATION_TECHNOLOGY;
use modkit_connection::mock::{self, MockClient};
use modkit_connection::{
    Configuration, Connection, ConnectionFactory, ConnectionManager, Settings, grpc,
};

#[test]
fn test_unmatched_configuration_yields_none() {
    let manager = manager();
    let mut config = Configuration::new("unregistered");
    config.add_attribute(CONNECTIONCONFIGURATION_TECHNOLOGY, "smoke-signals", false);

    assert!(manager.create_client(&config).is_none());
    assert!(manager.create_server(&config).is_none());
    assert!(manager.create_publisher(&config).is_none());
    assert!(manager.create_subscriber(&config).is_none());
    assert_eq!(manager.connection_count(), 0);
}

#[test]
fn test_missing_address_does_not_match_grpc() {
    let manager = manager();
    let mut config = Configuration::new("half");
    config.add_attribute(CONNECTIONCONFIGURATION_TECHNOLOGY, grpc::TECHNOLOGY, false);
    assert!(manager.create_client(&config).is_none());

    let full = grpc::configuration("full", "127.0.0.1", 9);
    assert!(manager.create_client(&full).is_some());
}

#[test]
fn test_technology_selects_transport() {
    let manager = manager();
    let client = manager.create_client(&mock::configuration("m", 1)).unwrap();
    assert_eq!(
        client
            .configuration()
            .attribute(CONNECTIONCONFIGURATION_TECHNOLOGY),
        Some(mock::TECHNOLOGY)
    );
    let client = manager
        .create_client(&grpc::configuration("g", "127.0.0.1", 9))
        .unwrap();
    assert_eq!(
        client
            .configuration()
            .attribute(CONNECTIONCONFIGURATION_TECHNOLOGY),
        Some(grpc::TECHNOLOGY)
    );
}

#[test]
fn test_custom_rules_on_caller_factory() {
    let hub = mock::MockHub::new();
    let settings = Settings::default();

    let mut minimum = Configuration::new("tenant");
    minimum.add_attribute("tenant", "acme", false);
    let mut factory = ConnectionFactory::new();
    let (h, s) = (hub.clone(), settings.clone());
    factory.add_client_rule(minimum, move |c| MockClient::new(c, h.clone(), s.clone()));

    let manager = ConnectionManager::with_factory(factory, settings);
    let mut config = mock::configuration("acme", 5);
    assert!(manager.create_client(&config).is_none());

    config.add_attribute("tenant", "acme", false);
    let client = manager.create_client(&config).unwrap();
    assert_eq!(client.configuration().name(), "acme");
    assert_eq!(manager.connection_count(), 1);
    assert!(Arc::strong_count(&client) >= 2);
}
