use anyhow::Result;

use super::{command::encode_command, BrokerConnector, BrokerLink, TopicScheme};
use crate::{
    core::subscription::EventSink,
    protocol::{
        backend::ProtocolBackend,
        types::{Instruction, Register},
    },
};

/// Text-command backend of the current MQTT firmware.
pub struct MqttBackend {
    link: BrokerLink,
}

impl MqttBackend {
    pub fn new(connector: Box<dyn BrokerConnector>, scheme: TopicScheme) -> Self {
        Self {
            link: BrokerLink::new(connector, scheme),
        }
    }
}

impl ProtocolBackend for MqttBackend {
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
        let text = encode_command(instruction)?;
        let topic = self.link.scheme.command_topic();
        log::debug!("Publishing '{text}' to {topic}");
        self.link.publish(&topic, text)
    }

    fn heartbeat(&mut self) -> Result<()> {
        self.link.session().map(|_| ())
    }

    /// The firmware learns its station type from its own configuration.
    fn identifies_on_connect(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{
            error::MpsError,
            subscription::{Callback, CallbackManager},
        },
        protocol::mqtt::{client::handle_status, testing::*},
    };
    use parking_lot::Mutex;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    #[test]
    fn test_send_publishes_text_command() {
        let broker = Arc::new(Mutex::new(FakeBroker::default()));
        let mut backend = MqttBackend::new(
            Box::new(FakeConnector(broker.clone())),
            TopicScheme::new("MPS", "C-CS1"),
        );
        backend
            .connect(Arc::new(CallbackManager::new("C-CS1")))
            .unwrap();
        backend
            .send(&Instruction::new(301).with_payload(2, 0))
            .unwrap();
        assert_eq!(
            broker.lock().published,
            vec![("MPS/C-CS1/Command".to_string(), "MOUNT_CAP".to_string())]
        );

        let err = backend.send(&Instruction::new(99)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MpsError>(),
            Some(MpsError::ProtocolEncoding { .. })
        ));
    }

    #[test]
    fn test_slide_count_reaches_callback() {
        let broker = Arc::new(Mutex::new(FakeBroker::default()));
        let scheme = TopicScheme::new("MPS", "C-RS1");
        let mut backend = MqttBackend::new(Box::new(FakeConnector(broker.clone())), scheme.clone());
        let events = Arc::new(CallbackManager::new("C-RS1"));
        let count = Arc::new(AtomicU32::new(0));
        let seen = count.clone();
        events.register(
            Register::SLIDECOUNT_IN,
            Some(Callback::Count(Arc::new(move |n| seen.store(n, Ordering::SeqCst)))),
        );

        backend.connect(events.clone()).unwrap();
        backend.sync_subscriptions(&events.registers()).unwrap();
        assert!(broker.lock().subscribed.contains("MPS/C-RS1/In/SlideCnt"));

        handle_status(&scheme, &events, "MPS/C-RS1/In/SlideCnt", "3");
        handle_status(&scheme, &events, "MPS/C-RS1/Basic/SlideCnt", "9");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
