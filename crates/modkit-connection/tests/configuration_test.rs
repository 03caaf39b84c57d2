// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for configuration attributes and rule matching.

use modkit_connection::configuration::{
    CONNECTIONCONFIGURATION_BLOCKING, CONNECTIONCONFIGURATION_ID,
    NETWORKCONNECTIONCONFIGURATION_SERVERPORT,
};
use modkit_connection::{Configuration, ConnectionConfiguration, NetworkConnectionConfiguration};

#[test]
fn test_add_respects_overwrite_flag() {
    let mut config = Configuration::new("c");
    assert!(config.add_attribute("n", "v", false));
    assert_eq!(config.attribute("n"), Some("v"));

    assert!(!config.add_attribute("n", "v2", false));
    assert_eq!(config.attribute("n"), Some("v"));

    assert!(config.add_attribute("n", "v2", true));
    assert_eq!(config.attribute("n"), Some("v2"));
}

#[test]
fn test_update_requires_existing_attribute() {
    let mut config = Configuration::new("c");
    assert!(!config.update_attribute("missing", 1));
    assert!(!config.has_attribute("missing"));

    config.add_attribute("present", 1, false);
    assert!(config.update_attribute("present", 2));
    assert_eq!(config.get_attribute::<i32>("present"), Some(2));
}

#[test]
fn test_typed_access_falls_back_on_parse_failure() {
    let mut config = Configuration::new("c");
    config.add_attribute("port", "not-a-number", false);
    assert_eq!(config.get_attribute::<u16>("port"), None);
    assert_eq!(config.get_attribute_or("port", 80u16), 80);
}

#[test]
fn test_wildcard_and_exact_matching() {
    let mut wildcard = Configuration::new("rule");
    wildcard.add_attribute("kind", "", false);
    let mut exact = Configuration::new("rule");
    exact.add_attribute("kind", "fast", false);

    let mut candidate = Configuration::new("candidate");
    assert!(!candidate.matches(&wildcard));
    assert!(!candidate.matches(&exact));

    candidate.add_attribute("kind", "slow", false);
    assert!(candidate.matches(&wildcard));
    assert!(!candidate.matches(&exact));

    candidate.update_attribute("kind", "fast");
    assert!(candidate.matches(&wildcard));
    assert!(candidate.matches(&exact));
}

#[test]
fn test_connection_defaults() {
    let config = ConnectionConfiguration::new("c");
    assert_eq!(config.connection_id(), -1);
    assert_eq!(config.thread_pool_size(), 2);
    assert!(config.is_blocking());
    assert!(config.has_attribute(CONNECTIONCONFIGURATION_ID));
    assert!(config.has_attribute(CONNECTIONCONFIGURATION_BLOCKING));
}

#[test]
fn test_network_configuration_address() {
    let mut config = NetworkConnectionConfiguration::new("n");
    assert_eq!(config.server_ip(), "127.0.0.1");
    assert_eq!(config.server_port(), -1);
    assert!(config.socket_addr().is_none());

    config.set_server_ip("10.1.2.3");
    config.set_server_port(9000);
    assert_eq!(config.socket_addr(), Some("10.1.2.3:9000".parse().unwrap()));

    config.add_attribute(NETWORKCONNECTIONCONFIGURATION_SERVERPORT, 70000, true);
    assert!(config.socket_addr().is_none());
}

#[test]
fn test_json_round_trip() {
    let mut config = Configuration::new("persisted");
    config.add_attribute("a", 1, false);
    config.add_attribute("b", "two", false);

    let json = serde_json::to_string(&config).unwrap();
    let restored: Configuration = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, config);
}
