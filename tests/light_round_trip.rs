use anyhow::Result;
use parking_lot::Mutex;
use std::{str::FromStr, sync::Arc, time::Duration};

use mps_comm::{
    core::{subscription::CallbackManager, wait::AbortToken},
    protocol::{
        backend::ProtocolBackend,
        modbus::{ModbusBackend, RegisterLink},
        mqtt::{encode_command, parse_command, MqttLegacyBackend, TopicScheme},
        opcua::{decode_light, encode_instruction},
        types::{
            Instruction, LightColor, LightCommand, LightState, Register, RegisterField, StationType,
        },
    },
};

fn green_blink() -> LightCommand {
    LightCommand {
        color: LightColor::Green,
        state: LightState::Blink,
        blink_ms: 500,
    }
}

#[test]
fn test_opcua_writes_decode_to_same_light() {
    let writes = encode_instruction(&green_blink().to_instruction());
    assert_eq!(decode_light(&writes), Some(green_blink()));
}

#[test]
fn test_mqtt_text_command_round_trip() -> Result<()> {
    let text = encode_command(&green_blink().to_instruction())?;
    assert_eq!(text, "LIGHT GREEN BLINK 500");
    let parsed = parse_command(&text, StationType::Cap)?;
    assert_eq!(LightCommand::from_instruction(&parsed), Some(green_blink()));
    Ok(())
}

#[test]
fn test_mqtt_legacy_topics_round_trip() {
    let scheme = TopicScheme::new("MPS", "C-CS1");
    let publishes = MqttLegacyBackend::encode(&scheme, &green_blink().to_instruction());

    let word = |field: RegisterField| -> u16 {
        let topic = scheme.register_topic(Register::new(field, Instruction::new(23).space()));
        publishes
            .iter()
            .find(|(candidate, _)| *candidate == topic)
            .and_then(|(_, value)| u16::from_str(value).ok())
            .unwrap_or(u16::MAX)
    };
    let decoded = LightCommand::from_words(
        word(RegisterField::ActionId),
        word(RegisterField::Data0),
        word(RegisterField::Data1),
    );
    assert_eq!(decoded, Some(green_blink()));
}

#[derive(Default)]
struct Holdings(Arc<Mutex<Vec<(u16, Vec<u16>)>>>);

impl RegisterLink for Holdings {
    fn endpoint(&self) -> String {
        "memory".to_string()
    }

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn is_open(&self) -> bool {
        true
    }

    fn read_holdings(&mut self, _start: u16, count: u16) -> Result<Vec<u16>> {
        Ok(vec![0; count as usize])
    }

    fn write_holdings(&mut self, start: u16, values: &[u16]) -> Result<()> {
        self.0.lock().push((start, values.to_vec()));
        Ok(())
    }
}

#[test]
fn test_modbus_job_registers_round_trip() -> Result<()> {
    let writes = Arc::new(Mutex::new(Vec::new()));
    let mut backend = ModbusBackend::new(Box::new(Holdings(writes.clone())), AbortToken::new())
        .with_poll_interval(Duration::from_millis(1));
    backend.connect(Arc::new(CallbackManager::new("C-CS1")))?;
    backend.send(&green_blink().to_instruction())?;

    let writes = writes.lock();
    let (start, words) = &writes[0];
    assert_eq!(*start, 0);
    assert_eq!(
        LightCommand::from_words(words[0], words[1], words[2]),
        Some(green_blink())
    );
    Ok(())
}
