//! MQTT machine backends.
//!
//! Both firmwares report status on `{prefix}/{name}/{In|Basic}/...`; they
//! differ in how commands are sent. The current one takes a single text
//! command on `{prefix}/{name}/Command` ([`MqttBackend`]), the legacy one
//! expects every job word on its own topic ([`MqttLegacyBackend`]).

pub mod client;
pub mod command;
mod current;
mod legacy;
pub mod topics;

pub use client::{BrokerConnector, BrokerOptions, BrokerSession, RumqttConnector};
pub use command::{encode_command, parse_command};
pub use current::MqttBackend;
pub use legacy::{MqttLegacyBackend, LEGACY_FIELDS};
pub use topics::TopicScheme;

use anyhow::Result;
use std::collections::BTreeSet;

use crate::{
    core::{error::MpsError, subscription::EventSink},
    protocol::types::Register,
};

/// Connection and subscription bookkeeping shared by both backends.
struct BrokerLink {
    connector: Box<dyn BrokerConnector>,
    scheme: TopicScheme,
    session: Option<Box<dyn BrokerSession>>,
    subscribed: BTreeSet<String>,
}

impl BrokerLink {
    fn new(connector: Box<dyn BrokerConnector>, scheme: TopicScheme) -> Self {
        Self {
            connector,
            scheme,
            session: None,
            subscribed: BTreeSet::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{} ({})", self.connector.url(), self.scheme.machine_root())
    }

    fn connect(&mut self, events: EventSink) -> Result<()> {
        self.disconnect();
        let session = self.connector.open(&self.scheme, events)?;
        log::info!("Connected to broker {}", self.connector.url());
        self.session = Some(session);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.subscribed.clear();
    }

    fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.is_connected())
    }

    fn session(&self) -> Result<&dyn BrokerSession> {
        self.session
            .as_deref()
            .ok_or_else(|| MpsError::connection(self.connector.url(), "not connected").into())
    }

    /// Subscribe to the status topics of `registers`, dropping the others.
    fn sync(&mut self, registers: &[Register]) -> Result<()> {
        let wanted: BTreeSet<String> = registers
            .iter()
            .filter(|register| topics::STATUS_FIELDS.contains(&register.field))
            .map(|register| self.scheme.register_topic(*register))
            .collect();

        let session = self.session()?;
        for topic in self.subscribed.difference(&wanted) {
            session.unsubscribe(topic)?;
        }
        for topic in wanted.difference(&self.subscribed) {
            session.subscribe(topic)?;
            log::debug!("Subscribed to {topic}");
        }
        self.subscribed = wanted;
        Ok(())
    }

    fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.session()?.publish(topic, payload.into())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Broker stand-in recording publishes and subscriptions.
    #[derive(Default)]
    pub struct FakeBroker {
        pub published: Vec<(String, String)>,
        pub subscribed: BTreeSet<String>,
        pub events: Option<EventSink>,
        pub fail_connects: usize,
    }

    pub struct FakeConnector(pub Arc<Mutex<FakeBroker>>);

    struct FakeSession(Arc<Mutex<FakeBroker>>);

    impl BrokerSession for FakeSession {
        fn is_connected(&self) -> bool {
            true
        }

        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            self.0.lock().published.push((
                topic.to_string(),
                String::from_utf8_lossy(&payload).into_owned(),
            ));
            Ok(())
        }

        fn subscribe(&self, topic: &str) -> Result<()> {
            self.0.lock().subscribed.insert(topic.to_string());
            Ok(())
        }

        fn unsubscribe(&self, topic: &str) -> Result<()> {
            self.0.lock().subscribed.remove(topic);
            Ok(())
        }

        fn close(&mut self) {}
    }

    impl BrokerConnector for FakeConnector {
        fn url(&self) -> String {
            "tcp://fake:1883".to_string()
        }

        fn open(&mut self, _scheme: &TopicScheme, events: EventSink) -> Result<Box<dyn BrokerSession>> {
            let mut broker = self.0.lock();
            if broker.fail_connects > 0 {
                broker.fail_connects -= 1;
                return Err(MpsError::connection(self.url(), "refused").into());
            }
            broker.events = Some(events);
            Ok(Box::new(FakeSession(self.0.clone())))
        }
    }
}
