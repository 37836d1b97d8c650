//! Text commands of the current MQTT firmware.
//!
//! ```text
//! RESET
//! LIGHT <RED|YELLOW|GREEN> <OFF|ON|BLINK>[ <ms>]    LIGHT RESET
//! MOVE_CONVEYOR <TO_OUTPUT|TO_INPUT> <IN|MID|OUT>
//! GET_BASE <BASE_RED|BASE_SILVER|BASE_BLACK>
//! RETRIEVE_CAP    MOUNT_CAP    MOUNT_RING RING<feeder>    DELIVER <slot>
//! RETRIEVE <shelf> <slot>    STORE <shelf> <slot>
//! RELOCATE <shelf> <slot> <target shelf> <target slot>
//! ```

use std::str::FromStr;

use crate::{
    core::error::MpsError,
    protocol::types::{
        mapping::{command, operation, LIGHT_RESET},
        BaseColor, ConveyorDirection, Instruction, LightCommand, LightState, MpsSensor,
        StationType,
    },
};

fn name_of<T>(value: u16) -> Result<String, MpsError>
where
    T: TryFrom<u16> + std::fmt::Display,
{
    T::try_from(value)
        .map(|v| v.to_string())
        .map_err(|_| MpsError::encoding(format!("payload {value} has no name")))
}

/// Render an instruction as a command string.
pub fn encode_command(instruction: &Instruction) -> Result<String, MpsError> {
    let Instruction {
        opcode,
        payload1: p1,
        payload2: p2,
        ..
    } = *instruction;

    if opcode == command::SET_TYPE {
        return Ok("RESET".to_string());
    }
    if opcode == LIGHT_RESET {
        return Ok("LIGHT RESET".to_string());
    }
    if let Some(light) = LightCommand::from_instruction(instruction) {
        return Ok(if light.blink_ms > 0 {
            format!("LIGHT {} {} {}", light.color, light.state, light.blink_ms)
        } else {
            format!("LIGHT {} {}", light.color, light.state)
        });
    }

    let station = StationType::from_opcode(opcode)
        .ok_or_else(|| MpsError::encoding(format!("unknown opcode {opcode}")))?;
    let op = opcode - station.base_offset();
    let text = match (station, op) {
        (_, command::MOVE_CONVEYOR) => format!(
            "MOVE_CONVEYOR {} {}",
            name_of::<ConveyorDirection>(p2)?,
            name_of::<MpsSensor>(p1)?
        ),
        (StationType::Base, operation::GET_BASE) => {
            format!("GET_BASE {}", name_of::<BaseColor>(p1)?)
        }
        (StationType::Cap, operation::CAP_ACTION) => match p1 {
            operation::CAP_RETRIEVE => "RETRIEVE_CAP".to_string(),
            operation::CAP_MOUNT => "MOUNT_CAP".to_string(),
            other => return Err(MpsError::encoding(format!("unknown cap action {other}"))),
        },
        (StationType::Ring, operation::MOUNT_RING) => format!("MOUNT_RING RING{p1}"),
        (StationType::Delivery, operation::DELIVER) => format!("DELIVER {p1}"),
        (StationType::Storage, operation::RETRIEVE) => format!("RETRIEVE {p1} {p2}"),
        (StationType::Storage, operation::STORE) => format!("STORE {p1} {p2}"),
        (StationType::Storage, operation::RELOCATE) => {
            format!("RELOCATE {} {} {} {}", p1 / 10, p1 % 10, p2 / 10, p2 % 10)
        }
        _ => {
            return Err(MpsError::encoding(format!(
                "opcode {opcode} has no {station} command"
            )))
        }
    };
    Ok(text)
}

fn token<T: FromStr>(tokens: &[&str], index: usize, text: &str) -> Result<T, MpsError> {
    tokens
        .get(index)
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| MpsError::invalid(format!("malformed command '{text}'")))
}

/// Parse a command string back into the instruction a `station` would send.
pub fn parse_command(text: &str, station: StationType) -> Result<Instruction, MpsError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let base = station.base_offset();
    let instruction = match tokens.as_slice() {
        ["RESET"] => Instruction::new(command::SET_TYPE).with_payload(station.type_code(), 0),
        ["LIGHT", "RESET"] => Instruction::new(LIGHT_RESET),
        ["LIGHT", ..] => LightCommand {
            color: token(&tokens, 1, text)?,
            state: token::<LightState>(&tokens, 2, text)?,
            blink_ms: if tokens.len() > 3 {
                token(&tokens, 3, text)?
            } else {
                0
            },
        }
        .to_instruction(),
        ["MOVE_CONVEYOR", ..] => {
            let direction: ConveyorDirection = token(&tokens, 1, text)?;
            let sensor: MpsSensor = token(&tokens, 2, text)?;
            Instruction::new(base + command::MOVE_CONVEYOR)
                .with_payload(sensor.into(), direction.into())
        }
        ["GET_BASE", ..] => {
            let color: BaseColor = token(&tokens, 1, text)?;
            Instruction::new(base + operation::GET_BASE).with_payload(color.into(), 0)
        }
        ["RETRIEVE_CAP"] => Instruction::new(base + operation::CAP_ACTION)
            .with_payload(operation::CAP_RETRIEVE, 0),
        ["MOUNT_CAP"] => {
            Instruction::new(base + operation::CAP_ACTION).with_payload(operation::CAP_MOUNT, 0)
        }
        ["MOUNT_RING", feeder] => {
            let feeder = feeder
                .strip_prefix("RING")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| MpsError::invalid(format!("malformed command '{text}'")))?;
            Instruction::new(base + operation::MOUNT_RING).with_payload(feeder, 0)
        }
        ["DELIVER", ..] => {
            Instruction::new(base + operation::DELIVER).with_payload(token(&tokens, 1, text)?, 0)
        }
        ["RETRIEVE" | "STORE", ..] => {
            let op = if tokens[0] == "STORE" {
                operation::STORE
            } else {
                operation::RETRIEVE
            };
            Instruction::new(base + op)
                .with_payload(token(&tokens, 1, text)?, token(&tokens, 2, text)?)
        }
        ["RELOCATE", ..] => {
            let nums: Vec<u16> = (1..=4)
                .map(|i| token(&tokens, i, text))
                .collect::<Result<_, _>>()?;
            Instruction::new(base + operation::RELOCATE)
                .with_payload(nums[0] * 10 + nums[1], nums[2] * 10 + nums[3])
        }
        _ => return Err(MpsError::invalid(format!("unknown command '{text}'"))),
    };
    Ok(instruction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{mapping::timeout, LightColor};

    #[test]
    fn test_light_commands() {
        let light = LightCommand {
            color: LightColor::Green,
            state: LightState::Blink,
            blink_ms: 500,
        };
        assert_eq!(
            encode_command(&light.to_instruction()).unwrap(),
            "LIGHT GREEN BLINK 500"
        );
        let off = LightCommand {
            color: LightColor::Red,
            state: LightState::Off,
            blink_ms: 0,
        };
        assert_eq!(encode_command(&off.to_instruction()).unwrap(), "LIGHT RED OFF");
        assert_eq!(
            encode_command(&Instruction::new(LIGHT_RESET)).unwrap(),
            "LIGHT RESET"
        );
    }

    #[test]
    fn test_station_commands() {
        let cases = [
            (StationType::Base, Instruction::new(102).with_payload(3, 1).with_timeout(timeout::BAND), "MOVE_CONVEYOR TO_OUTPUT OUT"),
            (StationType::Base, Instruction::new(101).with_payload(2, 0), "GET_BASE BASE_SILVER"),
            (StationType::Cap, Instruction::new(301).with_payload(1, 0), "RETRIEVE_CAP"),
            (StationType::Cap, Instruction::new(301).with_payload(2, 0), "MOUNT_CAP"),
            (StationType::Ring, Instruction::new(203).with_payload(1, 0), "MOUNT_RING RING1"),
            (StationType::Delivery, Instruction::new(401).with_payload(2, 0), "DELIVER 2"),
            (StationType::Storage, Instruction::new(530).with_payload(3, 4), "RETRIEVE 3 4"),
            (StationType::Storage, Instruction::new(540).with_payload(0, 7), "STORE 0 7"),
            (StationType::Storage, Instruction::new(550).with_payload(12, 45), "RELOCATE 1 2 4 5"),
        ];
        for (station, instruction, text) in cases {
            assert_eq!(encode_command(&instruction).unwrap(), text);
            assert_eq!(parse_command(text, station).unwrap(), instruction, "{text}");
        }
    }

    #[test]
    fn test_mount_ring_names_feeder_only() {
        use crate::api::station::{RingStation, StationAction, StationBehavior};
        use crate::protocol::types::RingColor;

        for (feeder, text) in [(1, "MOUNT_RING RING1"), (2, "MOUNT_RING RING2")] {
            let instruction = RingStation
                .perform(StationAction::MountRing {
                    feeder,
                    color: RingColor::Green,
                })
                .unwrap();
            assert_eq!(instruction.payload2, u16::from(RingColor::Green));
            assert_eq!(encode_command(&instruction).unwrap(), text);
        }
        assert!(RingStation
            .perform(StationAction::MountRing {
                feeder: 0,
                color: RingColor::Green,
            })
            .is_err());
    }

    #[test]
    fn test_reset_and_unknown_opcodes() {
        let reset = Instruction::new(command::SET_TYPE).with_payload(4, 0);
        assert_eq!(encode_command(&reset).unwrap(), "RESET");
        assert_eq!(parse_command("RESET", StationType::Delivery).unwrap(), reset);

        assert!(matches!(
            encode_command(&Instruction::new(7)),
            Err(MpsError::ProtocolEncoding { .. })
        ));
        assert!(matches!(
            encode_command(&Instruction::new(109)),
            Err(MpsError::ProtocolEncoding { .. })
        ));
        assert!(parse_command("FLY AWAY", StationType::Base).is_err());
    }
}
