use anyhow::Result;
use std::{thread, time::Duration};

use super::{BrokerConnector, BrokerLink, TopicScheme};
use crate::{
    core::subscription::EventSink,
    protocol::{
        backend::ProtocolBackend,
        types::{Instruction, Register, RegisterField},
    },
};

/// Job words in publish order.
pub const LEGACY_FIELDS: [RegisterField; 5] = [
    RegisterField::ActionId,
    RegisterField::Data0,
    RegisterField::Data1,
    RegisterField::StatusEnable,
    RegisterField::StatusError,
];

/// Per-register backend of the first MQTT firmware.
pub struct MqttLegacyBackend {
    link: BrokerLink,
    publish_delay: Duration,
}

impl MqttLegacyBackend {
    pub fn new(
        connector: Box<dyn BrokerConnector>,
        scheme: TopicScheme,
        publish_delay: Duration,
    ) -> Self {
        Self {
            link: BrokerLink::new(connector, scheme),
            publish_delay,
        }
    }

    /// Topic and payload of every publish for `instruction`.
    ///
    /// The firmware reads `Status/Enable` as "has a timeout" and
    /// `Status/Error` as "status bits set".
    pub fn encode(scheme: &TopicScheme, instruction: &Instruction) -> Vec<(String, String)> {
        let space = instruction.space();
        LEGACY_FIELDS
            .into_iter()
            .map(|field| {
                let value = match field {
                    RegisterField::ActionId => instruction.opcode.to_string(),
                    RegisterField::Data0 => instruction.payload1.to_string(),
                    RegisterField::Data1 => instruction.payload2.to_string(),
                    RegisterField::StatusEnable => u8::from(instruction.timeout_ms != 0).to_string(),
                    _ => u8::from(instruction.status != 0).to_string(),
                };
                (scheme.register_topic(Register::new(field, space)), value)
            })
            .collect()
    }
}

impl ProtocolBackend for MqttLegacyBackend {
    fn endpoint(&self) -> String {
        self.link.endpoint()
    }

    fn connect(&mut self, events: EventSink) -> Result<()> {
        self.link.connect(events)
    }

    fn disconnect(&mut self) {
        self.link.disconnect();
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn sync_subscriptions(&mut self, registers: &[Register]) -> Result<()> {
        self.link.sync(registers)
    }

    fn send(&mut self, instruction: &Instruction) -> Result<()> {
        for (i, (topic, value)) in Self::encode(&self.link.scheme, instruction)
            .into_iter()
            .enumerate()
        {
            if i > 0 {
                thread::sleep(self.publish_delay);
            }
            self.link.publish(&topic, value)?;
        }
        Ok(())
    }

    fn heartbeat(&mut self) -> Result<()> {
        self.link.session().map(|_| ())
    }
}
