use anyhow::Result;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};

use mps_comm::{
    api::station::{StationAction, StationBehavior, StorageStation},
    core::{dispatcher::RetryPolicy, subscription::EventSink},
    protocol::{
        mqtt::{encode_command, BrokerConnector, BrokerSession, MqttBackend, TopicScheme},
        opcua::{encode_instruction, WireValue},
        types::{RegisterField, StationType},
    },
    Machine,
};

type Published = Arc<Mutex<Vec<(String, String)>>>;

struct RecordingConnector(Published);

struct RecordingSession(Published);

impl BrokerSession for RecordingSession {
    fn is_connected(&self) -> bool {
        true
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.0
            .lock()
            .push((topic.to_string(), String::from_utf8(payload)?));
        Ok(())
    }

    fn subscribe(&self, _topic: &str) -> Result<()> {
        Ok(())
    }

    fn unsubscribe(&self, _topic: &str) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

impl BrokerConnector for RecordingConnector {
    fn url(&self) -> String {
        "tcp://recording:1883".to_string()
    }

    fn open(&mut self, _scheme: &TopicScheme, _events: EventSink) -> Result<Box<dyn BrokerSession>> {
        Ok(Box::new(RecordingSession(self.0.clone())))
    }
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        heartbeat_interval: Duration::from_secs(5),
        retry_delay: Duration::from_millis(5),
        poll_interval: Duration::from_millis(5),
        escalate_after: 3,
    }
}

#[test]
fn test_storage_jobs_publish_shelf_and_slot() -> Result<()> {
    let published = Published::default();
    let scheme = TopicScheme::new("MPS", "C-SS");
    let command_topic = scheme.command_topic();
    let backend = MqttBackend::new(Box::new(RecordingConnector(published.clone())), scheme);
    let machine = Machine::with_backend("C-SS", StationType::Storage, Box::new(backend), policy())?;

    machine.retrieve(3, 4)?;
    machine.store(1, 2)?;
    machine.relocate(1, 2, 5, 7)?;
    machine.shutdown()?;

    let published = published.lock().clone();
    assert!(published.iter().all(|(topic, _)| *topic == command_topic));
    let texts: Vec<&str> = published.iter().map(|(_, text)| text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["RETRIEVE 3 4", "STORE 1 2", "RELOCATE 1 2 5 7"]
    );
    Ok(())
}

#[test]
fn test_storage_jobs_carry_separate_words() -> Result<()> {
    for (action, opcode, words) in [
        (StationAction::Retrieve { shelf: 3, slot: 4 }, 530, (3, 4)),
        (StationAction::Store { shelf: 1, slot: 2 }, 540, (1, 2)),
    ] {
        let instruction = StorageStation.perform(action)?;
        assert_eq!(
            (instruction.opcode, instruction.payload1, instruction.payload2),
            (opcode, words.0, words.1)
        );

        let writes = encode_instruction(&instruction);
        let data: Vec<WireValue> = writes
            .iter()
            .filter(|(register, _)| {
                matches!(register.field, RegisterField::Data0 | RegisterField::Data1)
            })
            .map(|(_, value)| *value)
            .collect();
        assert_eq!(data, vec![WireValue::U16(words.0), WireValue::U16(words.1)]);
        assert_eq!(
            encode_command(&instruction)?,
            format!("{} {} {}", if opcode == 530 { "RETRIEVE" } else { "STORE" }, words.0, words.1)
        );
    }
    Ok(())
}
