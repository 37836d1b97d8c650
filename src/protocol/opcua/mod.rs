//! OPC-UA machine backend.
//!
//! Instructions become a fixed sequence of node writes; status registers are
//! server-side monitored items whose changes are pushed into the callback
//! table by the session's delivery thread.

mod encoding;
mod nodes;
mod session;

pub use encoding::*;
pub use nodes::*;
pub use session::*;

cfg_if::cfg_if! {
    if #[cfg(feature = "opcua")] {
        mod client;
        pub use client::UaConnector;
    }
}

use anyhow::{Context, Result};
use std::{collections::BTreeSet, sync::Arc};

use crate::{
    core::subscription::EventSink,
    protocol::{
        backend::ProtocolBackend,
        types::{Instruction, Register},
    },
};

/// Node read by the idle heartbeat.
const HEARTBEAT_REGISTER: Register = Register::STATUS_READY_BASIC;

pub fn endpoint_url(host: &str, port: u16) -> String {
    format!("opc.tcp://{host}:{port}/")
}

pub struct OpcuaBackend {
    url: String,
    table: Arc<NodeTable>,
    connector: Box<dyn SessionConnector>,
    session: Option<Box<dyn OpcuaSession>>,
    monitored: BTreeSet<Register>,
}

impl OpcuaBackend {
    pub fn new(
        host: &str,
        port: u16,
        table: Arc<NodeTable>,
        connector: Box<dyn SessionConnector>,
    ) -> Self {
        Self {
            url: endpoint_url(host, port),
            table,
            connector,
            session: None,
            monitored: BTreeSet::new(),
        }
    }

    fn session(&mut self) -> Result<&mut Box<dyn OpcuaSession>> {
        let url = &self.url;
        self.session
            .as_mut()
            .ok_or_else(|| crate::core::error::MpsError::connection(url, "no session").into())
    }

    fn node_ids(&self, registers: impl IntoIterator<Item = Register>) -> Vec<String> {
        registers
            .into_iter()
            .map(|register| self.table.node_id(register).to_string())
            .collect()
    }
}

impl ProtocolBackend for OpcuaBackend {
    fn endpoint(&self) -> String {
        self.url.clone()
    }

    fn connect(&mut self, events: EventSink) -> Result<()> {
        self.disconnect();
        let table = self.table.clone();
        let on_change: ValueSink = Arc::new(move |node_id: &str, value: u64| {
            match table.resolve(node_id) {
                Some(register) => events.publish(register, value),
                None => log::debug!("[{}] Change on unknown node {node_id}", events.name()),
            }
        });
        let session = self
            .connector
            .open(&self.url, on_change)
            .with_context(|| format!("Failed to open OPC-UA session to {}", self.url))?;
        log::info!("Session to {} established", self.url);
        self.session = Some(session);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.monitored.clear();
    }

    fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|session| session.is_alive())
    }

    fn sync_subscriptions(&mut self, registers: &[Register]) -> Result<()> {
        let wanted: BTreeSet<Register> = registers.iter().copied().collect();
        let added = self.node_ids(wanted.difference(&self.monitored).copied());
        let removed = self.node_ids(self.monitored.difference(&wanted).copied());

        let session = self.session()?;
        if !removed.is_empty() {
            session.unmonitor(&removed)?;
        }
        if !added.is_empty() {
            session.monitor(&added)?;
        }
        self.monitored = wanted;
        Ok(())
    }

    fn send(&mut self, instruction: &Instruction) -> Result<()> {
        let writes: Vec<(String, WireValue)> = encode_instruction(instruction)
            .into_iter()
            .map(|(register, value)| (self.table.node_id(register).to_string(), value))
            .collect();
        self.session()?.write(&writes)
    }

    fn heartbeat(&mut self) -> Result<()> {
        let node = self.table.node_id(HEARTBEAT_REGISTER).to_string();
        self.session()?.read(&node).map(|_| ())
    }
}
