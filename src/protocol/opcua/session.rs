use anyhow::Result;
use std::sync::Arc;

use super::WireValue;

/// Receives `(node id, value)` for every data change of a monitored node.
pub type ValueSink = Arc<dyn Fn(&str, u64) + Send + Sync>;

/// One open OPC-UA session, addressed by string node ids in the PLC namespace.
pub trait OpcuaSession: Send {
    /// Write the values one after another, stopping at the first failure.
    fn write(&mut self, writes: &[(String, WireValue)]) -> Result<()>;

    /// Add data-change monitoring for the given nodes.
    fn monitor(&mut self, node_ids: &[String]) -> Result<()>;

    fn unmonitor(&mut self, node_ids: &[String]) -> Result<()>;

    fn read(&mut self, node_id: &str) -> Result<u64>;

    fn is_alive(&self) -> bool {
        true
    }

    fn close(&mut self);
}

/// Opens sessions; the real implementation talks to the PLC, tests use fakes.
pub trait SessionConnector: Send {
    fn open(&mut self, endpoint: &str, on_change: ValueSink) -> Result<Box<dyn OpcuaSession>>;
}
