// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process transport.
//!
//! Mock servers and publishers bind their `connectionId` on a [`MockHub`];
//! mock clients and subscribers with the same id attach to them. Envelopes
//! move between the two sides' sinks on forwarder threads, so mock
//! connections behave like network ones without touching a socket.

mod client;
mod server;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

pub use client::{MockClient, MockSubscriber};
pub use server::{MockPeer, MockPublisher, MockServer};

use crate::config::Settings;
use crate::configuration::{
    CONNECTIONCONFIGURATION_ID, CONNECTIONCONFIGURATION_TECHNOLOGY, Configuration,
    ConnectionConfiguration,
};
use crate::error::ConnectionError;
use crate::factory::ConnectionFactory;
use server::EndpointCore;

/// Value of `connectionTechnology` selecting this transport.
pub const TECHNOLOGY: &str = "mock";

/// Registry of bound mock endpoints.
#[derive(Default)]
pub struct MockHub {
    endpoints: Mutex<HashMap<i64, Weak<EndpointCore>>>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn bind(&self, id: i64, endpoint: &Arc<EndpointCore>) -> Result<(), ConnectionError> {
        let mut endpoints = self.endpoints.lock();
        if endpoints.get(&id).is_some_and(|bound| bound.strong_count() > 0) {
            return Err(ConnectionError::InvalidArgument(format!(
                "connection id {id} is already bound"
            )));
        }
        endpoints.insert(id, Arc::downgrade(endpoint));
        debug!(id, "Mock endpoint bound");
        Ok(())
    }

    pub(crate) fn unbind(&self, id: i64, endpoint: &Arc<EndpointCore>) {
        let mut endpoints = self.endpoints.lock();
        if endpoints
            .get(&id)
            .is_some_and(|bound| std::ptr::eq(bound.as_ptr(), Arc::as_ptr(endpoint)))
        {
            endpoints.remove(&id);
            debug!(id, "Mock endpoint unbound");
        }
    }

    pub(crate) fn lookup(&self, id: i64) -> Option<Arc<EndpointCore>> {
        self.endpoints.lock().get(&id).and_then(Weak::upgrade)
    }

    /// Ids with a live endpoint, ascending.
    pub fn bound_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .endpoints
            .lock()
            .iter()
            .filter(|(_, endpoint)| endpoint.strong_count() > 0)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Mock configuration for endpoint `id`.
pub fn configuration(name: &str, id: i64) -> Configuration {
    let mut configuration = ConnectionConfiguration::new(name);
    configuration.set_connection_id(id);
    let mut configuration = configuration.into_inner();
    configuration.add_attribute(CONNECTIONCONFIGURATION_TECHNOLOGY, TECHNOLOGY, true);
    configuration
}

pub fn minimum_configuration() -> Configuration {
    let mut minimum = Configuration::new("mock");
    minimum.add_attribute(CONNECTIONCONFIGURATION_TECHNOLOGY, TECHNOLOGY, false);
    minimum.add_attribute(CONNECTIONCONFIGURATION_ID, "", false);
    minimum
}

pub fn register_rules(factory: &mut ConnectionFactory, hub: &Arc<MockHub>, settings: &Settings) {
    let h = hub.clone();
    factory.add_server_rule(minimum_configuration(), move |c| MockServer::new(c, h.clone()));
    let (h, s) = (hub.clone(), settings.clone());
    factory.add_client_rule(minimum_configuration(), move |c| {
        MockClient::new(c, h.clone(), s.clone())
    });
    let (h, s) = (hub.clone(), settings.clone());
    factory.add_publisher_rule(minimum_configuration(), move |c| {
        MockPublisher::new(c, h.clone(), s.clone())
    });
    let (h, s) = (hub.clone(), settings.clone());
    factory.add_subscriber_rule(minimum_configuration(), move |c| {
        MockSubscriber::new(c, h.clone(), s.clone())
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connection::{Connection, Publisher, Server};
    use crate::state::RpcState;
    use modkit_protocol::envelope::{self, JsonMessage, JsonPayload};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Tick {
        seq: u32,
    }

    impl JsonPayload for Tick {
        const TYPE_NAME: &'static str = "modkit.test.Tick";
    }

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    fn settings() -> Settings {
        Settings {
            writer_poll_ms: 10,
            ..Settings::default()
        }
    }

    fn tick(seq: u32) -> envelope::Envelope {
        envelope::create(&JsonMessage::new(Tick { seq })).unwrap()
    }

    fn seq_of(envelope: &envelope::Envelope) -> u32 {
        let mut message = JsonMessage::<Tick>::default();
        envelope::parse(envelope, &mut message).unwrap();
        message.0.seq
    }

    #[test]
    fn test_bind_twice_fails() {
        let hub = MockHub::new();
        let first = MockServer::new(&configuration("a", 7), hub.clone());
        let second = MockServer::new(&configuration("b", 7), hub.clone());
        first.start().unwrap();
        assert!(matches!(second.start(), Err(ConnectionError::InvalidArgument(_))));
        assert_eq!(second.state(), RpcState::Inactive);
        assert_eq!(hub.bound_ids(), vec![7]);

        first.stop().unwrap();
        assert!(hub.bound_ids().is_empty());
    }

    #[test]
    fn test_client_without_endpoint() {
        let hub = MockHub::new();
        let client = MockClient::new(&configuration("c", 3), hub, settings());
        assert!(matches!(client.start(), Err(ConnectionError::EndpointNotFound(3))));
        assert!(!client.is_running());
        client.stop().unwrap();
        assert_eq!(client.state(), RpcState::Finished);
    }

    #[test]
    fn test_client_server_exchange() {
        let hub = MockHub::new();
        let server = MockServer::new(&configuration("s", 1), hub.clone());
        server.start().unwrap();
        let client = MockClient::new(&configuration("c", 1), hub, settings());
        client.start().unwrap();

        let peers = server.clients();
        assert_eq!(peers.len(), 1);
        let peer = &peers[0];

        client.writer_sink().unwrap().push(tick(1), false).unwrap();
        assert_eq!(seq_of(&peer.reader_sink().unwrap().get(WAIT).unwrap()), 1);

        peer.writer_sink().unwrap().push(tick(2), false).unwrap();
        assert_eq!(seq_of(&client.reader_sink().unwrap().get(WAIT).unwrap()), 2);

        client.stop().unwrap();
        assert!(server.clients().is_empty());
        server.stop().unwrap();
    }

    #[test]
    fn test_server_stop_deactivates_clients() {
        let hub = MockHub::new();
        let server = MockServer::new(&configuration("s", 2), hub.clone());
        server.start().unwrap();
        let client = MockClient::new(&configuration("c", 2), hub, settings());
        client.start().unwrap();

        server.stop().unwrap();
        assert_eq!(client.state(), RpcState::Inactive);
        assert!(!client.is_running());
        client.stop().unwrap();
    }

    #[test]
    fn test_publisher_fans_out() {
        let hub = MockHub::new();
        let publisher = MockPublisher::new(&configuration("p", 5), hub.clone(), settings());
        publisher.start().unwrap();
        let first = MockSubscriber::new(&configuration("s1", 5), hub.clone(), settings());
        let second = MockSubscriber::new(&configuration("s2", 5), hub, settings());
        first.start().unwrap();
        second.start().unwrap();
        assert_eq!(publisher.subscriber_count(), 2);
        assert!(first.writer_sink().is_none());

        publisher.writer_sink().unwrap().push(tick(9), false).unwrap();
        assert_eq!(seq_of(&first.reader_sink().unwrap().get(WAIT).unwrap()), 9);
        assert_eq!(seq_of(&second.reader_sink().unwrap().get(WAIT).unwrap()), 9);

        first.stop().unwrap();
        assert_eq!(publisher.subscriber_count(), 1);
        publisher.writer_sink().unwrap().push(tick(10), false).unwrap();
        assert_eq!(seq_of(&second.reader_sink().unwrap().get(WAIT).unwrap()), 10);

        second.stop().unwrap();
        publisher.stop().unwrap();
    }
}
