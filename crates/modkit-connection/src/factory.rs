// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rule-based selection of connection implementations.
//!
//! A rule pairs a minimum configuration with a constructor. Creating a
//! connection scans the rules of the requested role in registration order and
//! builds the first one whose minimum the requested configuration satisfies.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::configuration::Configuration;
use crate::connection::{Client, Publisher, Server, Subscriber};

type Constructor<C> = Box<dyn Fn(&Configuration) -> Arc<C> + Send + Sync>;

/// Minimum configuration plus constructor.
pub struct ConnectionFactoryRule<C: ?Sized> {
    minimum: Configuration,
    constructor: Constructor<C>,
}

impl<C: ?Sized> ConnectionFactoryRule<C> {
    pub fn new<F>(minimum: Configuration, constructor: F) -> Self
    where
        F: Fn(&Configuration) -> Arc<C> + Send + Sync + 'static,
    {
        Self {
            minimum,
            constructor: Box::new(constructor),
        }
    }

    pub fn minimum(&self) -> &Configuration {
        &self.minimum
    }

    pub fn matches(&self, configuration: &Configuration) -> bool {
        configuration.matches(&self.minimum)
    }

    pub fn create(&self, configuration: &Configuration) -> Arc<C> {
        (self.constructor)(configuration)
    }
}

fn select<C: ?Sized>(
    role: &'static str,
    rules: &[ConnectionFactoryRule<C>],
    configuration: &Configuration,
) -> Option<Arc<C>> {
    match rules.iter().position(|rule| rule.matches(configuration)) {
        Some(index) => {
            debug!(role, rule = index, name = %configuration.name(), "Matched connection rule");
            Some(rules[index].create(configuration))
        }
        None => {
            debug!(role, name = %configuration.name(), "No connection rule matched");
            None
        }
    }
}

/// Four ordered rule tables, one per role.
#[derive(Default)]
pub struct ConnectionFactory {
    servers: Vec<ConnectionFactoryRule<dyn Server>>,
    clients: Vec<ConnectionFactoryRule<dyn Client>>,
    publishers: Vec<ConnectionFactoryRule<dyn Publisher>>,
    subscribers: Vec<ConnectionFactoryRule<dyn Subscriber>>,
}

impl ConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server_rule<T, F>(&mut self, minimum: Configuration, constructor: F)
    where
        T: Server + 'static,
        F: Fn(&Configuration) -> T + Send + Sync + 'static,
    {
        self.servers.push(ConnectionFactoryRule::new(minimum, move |c| {
            Arc::new(constructor(c)) as Arc<dyn Server>
        }));
    }

    pub fn add_client_rule<T, F>(&mut self, minimum: Configuration, constructor: F)
    where
        T: Client + 'static,
        F: Fn(&Configuration) -> T + Send + Sync + 'static,
    {
        self.clients.push(ConnectionFactoryRule::new(minimum, move |c| {
            Arc::new(constructor(c)) as Arc<dyn Client>
        }));
    }

    pub fn add_publisher_rule<T, F>(&mut self, minimum: Configuration, constructor: F)
    where
        T: Publisher + 'static,
        F: Fn(&Configuration) -> T + Send + Sync + 'static,
    {
        self.publishers.push(ConnectionFactoryRule::new(minimum, move |c| {
            Arc::new(constructor(c)) as Arc<dyn Publisher>
        }));
    }

    pub fn add_subscriber_rule<T, F>(&mut self, minimum: Configuration, constructor: F)
    where
        T: Subscriber + 'static,
        F: Fn(&Configuration) -> T + Send + Sync + 'static,
    {
        self.subscribers.push(ConnectionFactoryRule::new(minimum, move |c| {
            Arc::new(constructor(c)) as Arc<dyn Subscriber>
        }));
    }

    pub fn create_server(&self, configuration: &Configuration) -> Option<Arc<dyn Server>> {
        select("server", &self.servers, configuration)
    }

    pub fn create_client(&self, configuration: &Configuration) -> Option<Arc<dyn Client>> {
        select("client", &self.clients, configuration)
    }

    pub fn create_publisher(&self, configuration: &Configuration) -> Option<Arc<dyn Publisher>> {
        select("publisher", &self.publishers, configuration)
    }

    pub fn create_subscriber(&self, configuration: &Configuration) -> Option<Arc<dyn Subscriber>> {
        select("subscriber", &self.subscribers, configuration)
    }

    pub fn server_rules(&self) -> &[ConnectionFactoryRule<dyn Server>] {
        &self.servers
    }

    pub fn client_rules(&self) -> &[ConnectionFactoryRule<dyn Client>] {
        &self.clients
    }

    pub fn publisher_rules(&self) -> &[ConnectionFactoryRule<dyn Publisher>] {
        &self.publishers
    }

    pub fn subscriber_rules(&self) -> &[ConnectionFactoryRule<dyn Subscriber>] {
        &self.subscribers
    }
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("servers", &self.servers.len())
            .field("clients", &self.clients.len())
            .field("publishers", &self.publishers.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::error::ConnectionError;

    /// Client that records which rule built it.
    struct Probe {
        configuration: Configuration,
    }

    impl Probe {
        fn built_by(configuration: &Configuration, rule: &str) -> Self {
            let mut configuration = configuration.clone();
            configuration.add_attribute("builtBy", rule, true);
            Self { configuration }
        }
    }

    impl Connection for Probe {
        fn start(&self) -> Result<(), ConnectionError> {
            Ok(())
        }

        fn stop(&self) -> Result<(), ConnectionError> {
            Ok(())
        }

        fn is_running(&self) -> bool {
            false
        }

        fn configuration(&self) -> &Configuration {
            &self.configuration
        }
    }

    impl Client for Probe {}

    fn probe_rule(factory: &mut ConnectionFactory, minimum: Configuration, rule: &'static str) {
        factory.add_client_rule(minimum, move |c| Probe::built_by(c, rule));
    }

    fn built_by(client: &Arc<dyn Client>) -> &str {
        client.configuration().attribute("builtBy").unwrap_or_default()
    }

    #[test]
    fn test_no_rules_yields_none() {
        let factory = ConnectionFactory::new();
        assert!(factory.create_client(&Configuration::new("c")).is_none());
        assert!(factory.create_server(&Configuration::new("s")).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let mut factory = ConnectionFactory::new();

        let mut specific = Configuration::new("specific");
        specific.add_attribute("kind", "fast", false);
        probe_rule(&mut factory, specific, "specific");

        let mut wildcard = Configuration::new("wildcard");
        wildcard.add_attribute("kind", "", false);
        probe_rule(&mut factory, wildcard, "wildcard");

        let mut request = Configuration::new("request");
        request.add_attribute("kind", "fast", false);
        let client = factory.create_client(&request).unwrap();
        assert_eq!(client.configuration().name(), "request");
        assert_eq!(built_by(&client), "specific");

        request.update_attribute("kind", "slow");
        let client = factory.create_client(&request).unwrap();
        assert_eq!(built_by(&client), "wildcard");

        request.remove_attribute("kind");
        assert!(factory.create_client(&request).is_none());
    }

    #[test]
    fn test_roles_are_independent() {
        let mut factory = ConnectionFactory::new();
        probe_rule(&mut factory, Configuration::new("any"), "any");

        let request = Configuration::new("request");
        assert!(factory.create_client(&request).is_some());
        assert!(factory.create_server(&request).is_none());
        assert!(factory.create_publisher(&request).is_none());
        assert!(factory.create_subscriber(&request).is_none());
    }

    #[test]
    fn test_rule_accessors() {
        let mut factory = ConnectionFactory::new();
        let mut minimum = Configuration::new("rule");
        minimum.add_attribute("kind", "", false);
        probe_rule(&mut factory, minimum.clone(), "rule");

        assert_eq!(factory.client_rules().len(), 1);
        assert_eq!(factory.client_rules()[0].minimum(), &minimum);
        assert!(factory.server_rules().is_empty());
        assert!(format!("{factory:?}").contains("clients: 1"));
    }
}
