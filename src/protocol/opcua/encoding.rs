use std::fmt;

use crate::protocol::types::{
    mapping::status, Instruction, JobSpace, LightCommand, Register, RegisterField,
};

/// Typed value written to a PLC variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireValue {
    U16(u16),
    U8(u8),
    Bool(bool),
}

impl WireValue {
    pub fn as_u64(self) -> u64 {
        match self {
            WireValue::U16(v) => u64::from(v),
            WireValue::U8(v) => u64::from(v),
            WireValue::Bool(v) => u64::from(v),
        }
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireValue::U16(v) => write!(f, "{v}u16"),
            WireValue::U8(v) => write!(f, "{v}u8"),
            WireValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Node writes for one instruction, in transmission order.
///
/// The PLC latches the job on `Status.Enable`, so ActionId and both data
/// words go first.
pub fn encode_instruction(instruction: &Instruction) -> Vec<(Register, WireValue)> {
    let space = instruction.space();
    vec![
        (
            Register::new(RegisterField::ActionId, space),
            WireValue::U16(instruction.opcode),
        ),
        (
            Register::new(RegisterField::Data0, space),
            WireValue::U16(instruction.payload1),
        ),
        (
            Register::new(RegisterField::Data1, space),
            WireValue::U16(instruction.payload2),
        ),
        (
            Register::new(RegisterField::StatusEnable, space),
            WireValue::Bool(instruction.status & status::BUSY != 0),
        ),
        (
            Register::new(RegisterField::Error, space),
            WireValue::U8(instruction.error),
        ),
    ]
}

/// Recover a light command from the writes of a `Basic` job.
pub fn decode_light(writes: &[(Register, WireValue)]) -> Option<LightCommand> {
    let word = |field| {
        writes
            .iter()
            .find(|(register, _)| *register == Register::new(field, JobSpace::Basic))
            .and_then(|(_, value)| match value {
                WireValue::U16(v) => Some(*v),
                _ => None,
            })
    };
    LightCommand::from_words(
        word(RegisterField::ActionId)?,
        word(RegisterField::Data0)?,
        word(RegisterField::Data1)?,
    )
}
