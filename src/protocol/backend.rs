/// Wire protocol traits - the seam between the dispatcher and a transport
///
/// A backend owns exactly one connection to one MPS. The dispatcher thread is
/// its only caller; protocol events flow back through the [`EventSink`] it
/// receives on every connect.
use anyhow::Result;

use crate::{
    core::subscription::EventSink,
    protocol::types::{Instruction, Register},
};

pub trait ProtocolBackend: Send {
    /// Human readable endpoint, used in log lines and errors.
    fn endpoint(&self) -> String;

    /// Open a fresh connection.
    ///
    /// Called on startup and after every failure; implementations drop any
    /// previous connection state first.
    fn connect(&mut self, events: EventSink) -> Result<()>;

    fn disconnect(&mut self);

    /// Whether the transport still believes it is connected.
    ///
    /// Backends with a background I/O thread report connection loss here.
    fn is_connected(&self) -> bool {
        true
    }

    /// Make the server-side subscriptions match `registers`.
    fn sync_subscriptions(&mut self, registers: &[Register]) -> Result<()>;

    fn send(&mut self, instruction: &Instruction) -> Result<()>;

    /// Cheap round trip used to detect silent disconnects while idle.
    fn heartbeat(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether `identify()` must be sent after each successful connect.
    fn identifies_on_connect(&self) -> bool {
        true
    }
}

impl<T: ProtocolBackend + ?Sized> ProtocolBackend for Box<T> {
    fn endpoint(&self) -> String {
        (**self).endpoint()
    }

    fn connect(&mut self, events: EventSink) -> Result<()> {
        (**self).connect(events)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn sync_subscriptions(&mut self, registers: &[Register]) -> Result<()> {
        (**self).sync_subscriptions(registers)
    }

    fn send(&mut self, instruction: &Instruction) -> Result<()> {
        (**self).send(instruction)
    }

    fn heartbeat(&mut self) -> Result<()> {
        (**self).heartbeat()
    }

    fn identifies_on_connect(&self) -> bool {
        (**self).identifies_on_connect()
    }
}
