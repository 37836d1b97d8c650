use anyhow::{anyhow, Context, Result};
use rumqttc::{Client, ConnectReturnCode, Event, MqttOptions, Outgoing, Packet, QoS};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use super::topics::{parse_payload, TopicScheme};
use crate::{
    core::{error::MpsError, subscription::EventSink},
    protocol::types::JobSpace,
};

/// Every refbox message is sent with exactly-once delivery.
pub const QOS: QoS = QoS::ExactlyOnce;

/// How long a publish may wait for the broker to complete the QoS flow.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Progress of outgoing publishes as reported by the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A publish left with this packet id.
    Queued(u16),
    /// The broker finished the handshake for this packet id.
    Completed(u16),
    /// The connection went away.
    Lost(String),
}

/// Block until the next publish put on the wire is completed by the broker.
///
/// Reports left over from an earlier publish are skipped. Anything but a
/// completion within `timeout` is a connection error, so the caller keeps
/// the instruction for the next session.
pub fn await_delivery(
    deliveries: &flume::Receiver<Delivery>,
    endpoint: &str,
    timeout: Duration,
) -> Result<(), MpsError> {
    let deadline = Instant::now() + timeout;
    let mut packet = None;
    loop {
        match deliveries.recv_deadline(deadline) {
            Ok(Delivery::Queued(pkid)) if packet.is_none() => packet = Some(pkid),
            Ok(Delivery::Completed(pkid)) if packet == Some(pkid) => return Ok(()),
            Ok(Delivery::Lost(message)) => return Err(MpsError::connection(endpoint, message)),
            Ok(stale) => log::debug!("{endpoint}: skipping {stale:?}"),
            Err(flume::RecvTimeoutError::Timeout) => {
                return Err(MpsError::connection(
                    endpoint,
                    format!("publish not confirmed within {} ms", timeout.as_millis()),
                ))
            }
            Err(flume::RecvTimeoutError::Disconnected) => {
                return Err(MpsError::connection(endpoint, "event loop stopped"))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl BrokerOptions {
    pub fn url(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

/// A live broker connection as seen by the MQTT backends.
pub trait BrokerSession: Send {
    fn is_connected(&self) -> bool;

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    fn subscribe(&self, topic: &str) -> Result<()>;

    fn unsubscribe(&self, topic: &str) -> Result<()>;

    fn close(&mut self);
}

pub trait BrokerConnector: Send {
    fn url(&self) -> String;

    /// Connect and start routing status messages of `scheme` to `events`.
    fn open(&mut self, scheme: &TopicScheme, events: EventSink) -> Result<Box<dyn BrokerSession>>;
}

/// Connects through `rumqttc`.
pub struct RumqttConnector {
    options: BrokerOptions,
}

impl RumqttConnector {
    pub fn new(options: BrokerOptions) -> Self {
        Self { options }
    }
}

impl BrokerConnector for RumqttConnector {
    fn url(&self) -> String {
        self.options.url()
    }

    fn open(&mut self, scheme: &TopicScheme, events: EventSink) -> Result<Box<dyn BrokerSession>> {
        Ok(Box::new(MqttSession::open(
            &self.options,
            scheme.clone(),
            events,
        )?))
    }
}

/// One broker connection plus the thread draining its event loop.
///
/// The event loop stops at the first connection error instead of
/// reconnecting on its own; the dispatcher notices through
/// [`BrokerSession::is_connected`] and opens a fresh session.
pub struct MqttSession {
    client: Client,
    url: String,
    deliveries: flume::Receiver<Delivery>,
    connected: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MqttSession {
    pub fn open(options: &BrokerOptions, scheme: TopicScheme, events: EventSink) -> Result<Self> {
        let client_id = format!("{}_{}", events.name(), uuid::Uuid::new_v4());
        let mut mqtt_options = MqttOptions::new(&client_id, &options.host, options.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(true);

        let (client, mut connection) = Client::new(mqtt_options, 10);
        let connected = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let (ack_tx, ack_rx) = flume::bounded::<Result<(), String>>(1);
        let (delivery_tx, deliveries) = flume::unbounded();

        let thread = {
            let connected = connected.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("mqtt-{}", events.name()))
                .spawn(move || {
                    for notification in connection.iter() {
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        match notification {
                            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                                let accepted = ack.code == ConnectReturnCode::Success;
                                connected.store(accepted, Ordering::SeqCst);
                                let _ = ack_tx.try_send(if accepted {
                                    Ok(())
                                } else {
                                    Err(format!("broker refused connection: {:?}", ack.code))
                                });
                                if !accepted {
                                    break;
                                }
                            }
                            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                                let _ = delivery_tx.send(Delivery::Queued(pkid));
                            }
                            Ok(Event::Incoming(Packet::PubComp(comp))) => {
                                let _ = delivery_tx.send(Delivery::Completed(comp.pkid));
                            }
                            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                                let _ = delivery_tx.send(Delivery::Completed(ack.pkid));
                            }
                            Ok(Event::Incoming(Packet::Publish(publish))) => {
                                let topic = String::from_utf8_lossy(AsRef::<[u8]>::as_ref(
                                    &publish.topic,
                                ));
                                let payload = String::from_utf8_lossy(&publish.payload);
                                handle_status(&scheme, &events, &topic, &payload);
                            }
                            Ok(_) => {}
                            Err(err) => {
                                connected.store(false, Ordering::SeqCst);
                                let _ = ack_tx.try_send(Err(err.to_string()));
                                let _ = delivery_tx.send(Delivery::Lost(err.to_string()));
                                if !stop.load(Ordering::SeqCst) {
                                    log::warn!("[{}] MQTT connection error: {err}", events.name());
                                }
                                break;
                            }
                        }
                    }
                    connected.store(false, Ordering::SeqCst);
                })?
        };

        let mut session = Self {
            client,
            url: options.url(),
            deliveries,
            connected,
            stop,
            thread: Some(thread),
        };
        match ack_rx.recv_timeout(options.connect_timeout) {
            Ok(Ok(())) => Ok(session),
            Ok(Err(message)) => {
                session.close();
                Err(MpsError::connection(options.url(), message).into())
            }
            Err(_) => {
                session.close();
                Err(MpsError::connection(options.url(), "no CONNACK from broker").into())
            }
        }
    }
}

impl BrokerSession for MqttSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("not connected, cannot publish to {topic}"));
        }
        // Reports of an abandoned publish must not confirm this one.
        let _ = self.deliveries.drain();
        self.client
            .publish(topic, QOS, false, payload)
            .map_err(|err| anyhow!("Failed to publish to {topic}: {err}"))?;
        await_delivery(&self.deliveries, &self.url, DELIVERY_TIMEOUT)
            .with_context(|| format!("Publish to {topic} was not delivered"))
    }

    fn subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .subscribe(topic, QOS)
            .map_err(|err| anyhow!("Failed to subscribe to {topic}: {err}"))
    }

    fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.client
            .unsubscribe(topic)
            .map_err(|err| anyhow!("Failed to unsubscribe from {topic}: {err}"))
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.client.disconnect();
        self.connected.store(false, Ordering::SeqCst);
        // The event loop ends on its own once the disconnect is processed.
        self.thread.take();
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Route one incoming publish to the callback table.
pub fn handle_status(scheme: &TopicScheme, events: &EventSink, topic: &str, payload: &str) {
    let Some(register) = scheme.parse_status_topic(topic) else {
        log::debug!("[{}] Ignoring message on {topic}", events.name());
        return;
    };
    if register.space == JobSpace::Basic {
        log::debug!("[{}] {register} update: {payload}", events.name());
    }
    match parse_payload(register, payload) {
        Some(value) => events.publish(register, value),
        None => log::warn!(
            "[{}] Unparsable payload '{payload}' on {topic}",
            events.name()
        ),
    }
}
