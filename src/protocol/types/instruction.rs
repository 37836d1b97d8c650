use std::fmt;

use super::{
    mapping::{status, station_base, LightColor, LightState},
    register::JobSpace,
};

/// A single command for an MPS, as placed on a machine's queue.
///
/// Instructions are plain values: once built by the station layer they are
/// never mutated, only transmitted (and possibly retransmitted) in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub opcode: u16,
    pub payload1: u16,
    pub payload2: u16,
    pub timeout_ms: i32,
    pub status: u8,
    pub error: u8,
}

impl Instruction {
    /// Instruction with empty payloads, no timeout and the busy status bit set.
    pub const fn new(opcode: u16) -> Self {
        Self {
            opcode,
            payload1: 0,
            payload2: 0,
            timeout_ms: 0,
            status: status::BUSY,
            error: 0,
        }
    }

    pub const fn with_payload(mut self, payload1: u16, payload2: u16) -> Self {
        self.payload1 = payload1;
        self.payload2 = payload2;
        self
    }

    pub const fn with_timeout(mut self, timeout_ms: i32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Register space addressed by this instruction.
    pub fn space(&self) -> JobSpace {
        JobSpace::for_opcode(self.opcode)
    }

    pub fn is_station_job(&self) -> bool {
        self.opcode >= station_base::BASE
    }

    pub fn wants_busy_handshake(&self) -> bool {
        self.status & status::BUSY != 0
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.opcode, self.payload1, self.payload2, self.timeout_ms, self.status, self.error
        )
    }
}

/// Decoded form of a light instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightCommand {
    pub color: LightColor,
    pub state: LightState,
    pub blink_ms: u16,
}

impl LightCommand {
    pub fn to_instruction(self) -> Instruction {
        Instruction::new(self.color.into()).with_payload(self.state.into(), self.blink_ms)
    }

    /// Recover the light command from its wire words, if they encode one.
    pub fn from_words(opcode: u16, state: u16, blink_ms: u16) -> Option<Self> {
        Some(Self {
            color: LightColor::try_from(opcode).ok()?,
            state: LightState::try_from(state).ok()?,
            blink_ms,
        })
    }

    pub fn from_instruction(instruction: &Instruction) -> Option<Self> {
        Self::from_words(instruction.opcode, instruction.payload1, instruction.payload2)
    }
}
