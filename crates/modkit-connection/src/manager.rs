// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection manager.
//!
//! The manager is the usual entry point: it registers the built-in transports
//! on its factory, keeps track of every connection it created and stops the
//! ones still running when dropped.
//!
//! ```ignore
//! let manager = ConnectionManager::from_env()?;
//! if let Some(publisher) =
//!     manager.create_publisher(&grpc::configuration("quotes", "127.0.0.1", 7000))
//! {
//!     publisher.start()?;
//! }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::configuration::{Configuration, ConnectionConfiguration};
use crate::connection::{Client, Publisher, Server, Subscriber};
use crate::error::ConnectionError;
use crate::executor::CompletionQueueExecutor;
use crate::factory::ConnectionFactory;
use crate::grpc;
use crate::mock::{self, MockHub};

/// A connection created by the manager.
enum Tracked {
    Server(Arc<dyn Server>),
    Client(Arc<dyn Client>),
    Publisher(Arc<dyn Publisher>),
    Subscriber(Arc<dyn Subscriber>),
}

macro_rules! with_connection {
    ($tracked:expr, $connection:ident => $body:expr) => {
        match $tracked {
            Tracked::Server($connection) => $body,
            Tracked::Client($connection) => $body,
            Tracked::Publisher($connection) => $body,
            Tracked::Subscriber($connection) => $body,
        }
    };
}

impl Tracked {
    fn is_running(&self) -> bool {
        with_connection!(self, c => c.is_running())
    }

    /// Not running and held by nobody but the manager.
    fn is_orphaned(&self) -> bool {
        with_connection!(self, c => Arc::strong_count(c) == 1 && !c.is_running())
    }

    fn stop(&self) -> Result<(), ConnectionError> {
        with_connection!(self, c => c.stop())
    }

    fn name(&self) -> &str {
        with_connection!(self, c => c.configuration().name())
    }
}

pub struct ConnectionManager {
    factory: ConnectionFactory,
    tracked: Mutex<Vec<Tracked>>,
    executor: Option<Arc<CompletionQueueExecutor>>,
    hub: Arc<MockHub>,
    settings: Settings,
}

impl ConnectionManager {
    /// Manager with the mock and gRPC transports registered.
    pub fn new(settings: Settings) -> Result<Self, ConnectionError> {
        let mut configuration = ConnectionConfiguration::new("modkit");
        configuration.set_thread_pool_size(settings.thread_pool_size);
        Self::with_configuration(&configuration, settings)
    }

    /// Like [`new`](Self::new), with the attributes of `configuration`
    /// (such as `threadPoolSize`) taking precedence over `settings`.
    pub fn with_configuration(
        configuration: &ConnectionConfiguration,
        settings: Settings,
    ) -> Result<Self, ConnectionError> {
        let settings = settings.with_configuration(configuration);
        let mut factory = ConnectionFactory::new();
        let hub = MockHub::new();
        mock::register_rules(&mut factory, &hub, &settings);
        let executor = grpc::initialize(&mut factory, configuration, &settings)?;
        info!(
            threads = settings.thread_pool_size,
            "Connection manager initialized"
        );
        Ok(Self {
            factory,
            tracked: Mutex::new(Vec::new()),
            executor: Some(executor),
            hub,
            settings,
        })
    }

    /// Manager configured from `MODKIT_*` environment variables.
    pub fn from_env() -> Result<Self, ConnectionError> {
        Self::new(Settings::from_env()?)
    }

    /// Manager over a caller-built factory. No transport is registered and
    /// no executor is started.
    pub fn with_factory(factory: ConnectionFactory, settings: Settings) -> Self {
        Self {
            factory,
            tracked: Mutex::new(Vec::new()),
            executor: None,
            hub: MockHub::new(),
            settings,
        }
    }

    pub fn create_server(&self, configuration: &Configuration) -> Option<Arc<dyn Server>> {
        self.purge();
        let server = self.factory.create_server(configuration)?;
        self.track(Tracked::Server(server.clone()));
        Some(server)
    }

    pub fn create_client(&self, configuration: &Configuration) -> Option<Arc<dyn Client>> {
        self.purge();
        let client = self.factory.create_client(configuration)?;
        self.track(Tracked::Client(client.clone()));
        Some(client)
    }

    pub fn create_publisher(&self, configuration: &Configuration) -> Option<Arc<dyn Publisher>> {
        self.purge();
        let publisher = self.factory.create_publisher(configuration)?;
        self.track(Tracked::Publisher(publisher.clone()));
        Some(publisher)
    }

    pub fn create_subscriber(&self, configuration: &Configuration) -> Option<Arc<dyn Subscriber>> {
        self.purge();
        let subscriber = self.factory.create_subscriber(configuration)?;
        self.track(Tracked::Subscriber(subscriber.clone()));
        Some(subscriber)
    }

    fn track(&self, connection: Tracked) {
        info!(name = %connection.name(), "Connection created");
        self.tracked.lock().push(connection);
    }

    /// Forget connections nobody else holds and that are not running.
    fn purge(&self) {
        let orphaned: Vec<Tracked> = {
            let mut tracked = self.tracked.lock();
            let (orphaned, kept) = tracked.drain(..).partition(Tracked::is_orphaned);
            *tracked = kept;
            orphaned
        };
        if !orphaned.is_empty() {
            debug!(count = orphaned.len(), "Purged idle connections");
        }
        // dropped outside the lock, a drop may stop the connection
        drop(orphaned);
    }

    /// Connections currently tracked.
    pub fn connection_count(&self) -> usize {
        self.tracked.lock().len()
    }

    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    /// Register additional rules. Rules added here are consulted after the
    /// built-in ones.
    pub fn factory_mut(&mut self) -> &mut ConnectionFactory {
        &mut self.factory
    }

    pub fn executor(&self) -> Option<&Arc<CompletionQueueExecutor>> {
        self.executor.as_ref()
    }

    pub fn hub(&self) -> &Arc<MockHub> {
        &self.hub
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let tracked: Vec<Tracked> = self.tracked.lock().drain(..).collect();
        for connection in tracked.iter().filter(|c| c.is_running()) {
            if let Err(e) = connection.stop() {
                warn!(name = %connection.name(), error = %e, "Failed to stop connection");
            }
        }
        drop(tracked);

        if let Some(executor) = self.executor.take() {
            executor.stop();
        }
        info!("Connection manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::CONNECTIONCONFIGURATION_TECHNOLOGY;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(Settings {
            thread_pool_size: 1,
            writer_poll_ms: 10,
            ..Settings::default()
        })
        .unwrap()
    }

    #[test]
    fn test_unknown_technology_yields_none() {
        let manager = manager();
        let mut config = Configuration::new("nowhere");
        config.add_attribute(CONNECTIONCONFIGURATION_TECHNOLOGY, "carrier-pigeon", false);
        assert!(manager.create_client(&config).is_none());
        assert!(manager.create_server(&config).is_none());
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn test_purges_dropped_idle_connections() {
        let manager = manager();
        let config = mock::configuration("idle", 11);

        let first = manager.create_client(&config).unwrap();
        assert_eq!(manager.connection_count(), 1);
        drop(first);

        let second = manager.create_client(&config).unwrap();
        assert_eq!(manager.connection_count(), 1);

        let _third = manager.create_client(&config).unwrap();
        assert_eq!(manager.connection_count(), 2);
        drop(second);
    }

    #[test]
    fn test_running_connections_are_kept() {
        let manager = manager();
        let server = manager
            .create_server(&mock::configuration("svc", 12))
            .unwrap();
        server.start().unwrap();
        drop(server);

        let _client = manager.create_client(&mock::configuration("c", 12)).unwrap();
        assert_eq!(manager.connection_count(), 2);
    }

    #[test]
    fn test_drop_stops_running_connections() {
        let manager = manager();
        let server = manager
            .create_server(&mock::configuration("svc", 13))
            .unwrap();
        server.start().unwrap();
        let hub = manager.hub().clone();
        assert_eq!(hub.bound_ids(), vec![13]);

        drop(manager);
        assert!(!server.is_running());
        assert!(hub.bound_ids().is_empty());
    }

    #[test]
    fn test_grpc_rules_registered() {
        let manager = manager();
        assert_eq!(manager.factory().server_rules().len(), 2);
        assert!(manager.executor().is_some_and(|e| e.is_running()));
        let server = manager.create_server(&grpc::configuration("svc", "127.0.0.1", 0));
        assert!(server.is_some());
    }

    #[test]
    fn test_thread_pool_size_sizes_executor() {
        let manager = manager();
        assert_eq!(manager.executor().map(|e| e.worker_count()), Some(1));

        let mut configuration = ConnectionConfiguration::new("sized");
        configuration.set_thread_pool_size(3);
        let manager = ConnectionManager::with_configuration(&configuration, Settings::default()).unwrap();
        assert_eq!(manager.executor().map(|e| e.worker_count()), Some(3));
        assert_eq!(manager.settings().thread_pool_size, 3);
    }

    #[test]
    fn test_with_factory_has_no_transports() {
        let manager = ConnectionManager::with_factory(ConnectionFactory::new(), Settings::default());
        assert!(manager.executor().is_none());
        assert!(manager.create_client(&mock::configuration("c", 1)).is_none());
    }
}
