use anyhow::{anyhow, Result};
use std::{collections::HashMap, sync::Arc};

use opcua::{client::prelude::*, sync::RwLock};

use super::{OpcuaSession, SessionConnector, ValueSink, WireValue, NAMESPACE};

fn variant_to_u64(value: &Variant) -> Option<u64> {
    match value {
        Variant::Boolean(v) => Some(u64::from(*v)),
        Variant::Byte(v) => Some(u64::from(*v)),
        Variant::UInt16(v) => Some(u64::from(*v)),
        Variant::UInt32(v) => Some(u64::from(*v)),
        Variant::UInt64(v) => Some(*v),
        Variant::SByte(v) => u64::try_from(*v).ok(),
        Variant::Int16(v) => u64::try_from(*v).ok(),
        Variant::Int32(v) => u64::try_from(*v).ok(),
        Variant::Int64(v) => u64::try_from(*v).ok(),
        _ => None,
    }
}

fn to_variant(value: WireValue) -> Variant {
    match value {
        WireValue::U16(v) => Variant::UInt16(v),
        WireValue::U8(v) => Variant::Byte(v),
        WireValue::Bool(v) => Variant::Boolean(v),
    }
}

fn node(node_id: &str) -> NodeId {
    NodeId::new(NAMESPACE, node_id.to_string())
}

fn check(operation: &str, status: StatusCode) -> Result<()> {
    if status.is_good() {
        Ok(())
    } else {
        Err(anyhow!("{operation} failed: {status}"))
    }
}

/// Opens anonymous, unencrypted sessions as the station PLCs expect.
pub struct UaConnector {
    application_name: String,
    subscription_interval_ms: f64,
}

impl UaConnector {
    pub fn new(application_name: impl Into<String>, subscription_interval_ms: u64) -> Self {
        Self {
            application_name: application_name.into(),
            subscription_interval_ms: subscription_interval_ms as f64,
        }
    }
}

impl SessionConnector for UaConnector {
    fn open(&mut self, endpoint: &str, on_change: ValueSink) -> Result<Box<dyn OpcuaSession>> {
        let mut client = ClientBuilder::new()
            .application_name(self.application_name.as_str())
            .application_uri(format!("urn:{}", self.application_name))
            .trust_server_certs(true)
            .create_sample_keypair(false)
            .session_retry_limit(0)
            .client()
            .ok_or_else(|| anyhow!("Invalid OPC-UA client configuration"))?;

        let session = client
            .connect_to_endpoint(
                (
                    endpoint,
                    SecurityPolicy::None.to_str(),
                    MessageSecurityMode::None,
                    UserTokenPolicy::anonymous(),
                ),
                IdentityToken::Anonymous,
            )
            .map_err(|status| anyhow!("Connecting to {endpoint} failed: {status}"))?;

        let nodes: Arc<RwLock<HashMap<NodeId, String>>> = Arc::new(RwLock::new(HashMap::new()));
        let lookup = nodes.clone();
        let subscription_id = session
            .read()
            .create_subscription(
                self.subscription_interval_ms,
                100,
                10,
                0,
                0,
                true,
                DataChangeCallback::new(move |items: &[&MonitoredItem]| {
                    let nodes = lookup.read();
                    for item in items {
                        let node_id = &item.item_to_monitor().node_id;
                        let Some(name) = nodes.get(node_id) else {
                            continue;
                        };
                        match item.last_value().value.as_ref().and_then(variant_to_u64) {
                            Some(value) => on_change(name.as_str(), value),
                            None => log::warn!("Unsupported value type on {name}"),
                        }
                    }
                }),
            )
            .map_err(|status| anyhow!("Creating subscription failed: {status}"))?;

        let stop = Session::run_async(session.clone());
        Ok(Box::new(UaSession {
            session,
            stop: Some(stop),
            subscription_id,
            nodes,
            items: HashMap::new(),
        }))
    }
}

struct UaSession {
    session: Arc<RwLock<Session>>,
    stop: Option<tokio::sync::oneshot::Sender<SessionCommand>>,
    subscription_id: u32,
    nodes: Arc<RwLock<HashMap<NodeId, String>>>,
    /// Monitored item id per node id.
    items: HashMap<String, u32>,
}

impl OpcuaSession for UaSession {
    fn write(&mut self, writes: &[(String, WireValue)]) -> Result<()> {
        let session = self.session.read();
        for (node_id, value) in writes {
            let results = session
                .write(&[WriteValue {
                    node_id: node(node_id),
                    attribute_id: AttributeId::Value as u32,
                    index_range: UAString::null(),
                    value: DataValue::value_only(to_variant(*value)),
                }])
                .map_err(|status| anyhow!("Writing {node_id} failed: {status}"))?;
            for status in results {
                check(&format!("Writing {value} to {node_id}"), status)?;
            }
        }
        Ok(())
    }

    fn monitor(&mut self, node_ids: &[String]) -> Result<()> {
        {
            let mut nodes = self.nodes.write();
            for id in node_ids {
                nodes.insert(node(id), id.clone());
            }
        }
        let requests: Vec<MonitoredItemCreateRequest> =
            node_ids.iter().map(|id| node(id).into()).collect();
        let results = self
            .session
            .read()
            .create_monitored_items(self.subscription_id, TimestampsToReturn::Both, &requests)
            .map_err(|status| anyhow!("Creating monitored items failed: {status}"))?;
        for (id, result) in node_ids.iter().zip(results) {
            check(&format!("Monitoring {id}"), result.status_code)?;
            self.items.insert(id.clone(), result.monitored_item_id);
        }
        Ok(())
    }

    fn unmonitor(&mut self, node_ids: &[String]) -> Result<()> {
        let item_ids: Vec<u32> = node_ids
            .iter()
            .filter_map(|id| self.items.remove(id))
            .collect();
        {
            let mut nodes = self.nodes.write();
            for id in node_ids {
                nodes.remove(&node(id));
            }
        }
        if item_ids.is_empty() {
            return Ok(());
        }
        self.session
            .read()
            .delete_monitored_items(self.subscription_id, &item_ids)
            .map_err(|status| anyhow!("Deleting monitored items failed: {status}"))?;
        Ok(())
    }

    fn read(&mut self, node_id: &str) -> Result<u64> {
        let values = self
            .session
            .read()
            .read(
                &[ReadValueId::from(node(node_id))],
                TimestampsToReturn::Neither,
                0.0,
            )
            .map_err(|status| anyhow!("Reading {node_id} failed: {status}"))?;
        values
            .first()
            .and_then(|data| data.value.as_ref())
            .and_then(variant_to_u64)
            .ok_or_else(|| anyhow!("No numeric value at {node_id}"))
    }

    fn is_alive(&self) -> bool {
        self.session.read().is_connected()
    }

    fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(SessionCommand::Stop);
        }
        self.session.write().disconnect();
    }
}

impl Drop for UaSession {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.close();
        }
    }
}
