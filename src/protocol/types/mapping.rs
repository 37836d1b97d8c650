//! Numeric command, payload and status codes understood by the MPS PLCs.
//!
//! The values are shared by every wire protocol: the OPC-UA and Modbus
//! backends write them verbatim, the MQTT backends render them as topics or
//! text commands.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Opcode offset contributed by each station type.
pub mod station_base {
    pub const BASE: u16 = 100;
    pub const RING: u16 = 200;
    pub const CAP: u16 = 300;
    pub const DELIVERY: u16 = 400;
    pub const STORAGE: u16 = 500;
}

/// Station independent command codes (the "basic" job space).
pub mod command {
    pub const SET_TYPE: u16 = 10;
    pub const MOVE_CONVEYOR: u16 = 2;
}

/// Operation codes, added to a station base offset.
pub mod operation {
    pub const GET_BASE: u16 = 1;
    pub const MOUNT_RING: u16 = 3;
    pub const CAP_ACTION: u16 = 1;
    pub const CAP_RETRIEVE: u16 = 1;
    pub const CAP_MOUNT: u16 = 2;
    pub const DELIVER: u16 = 1;
    pub const RETRIEVE: u16 = 30;
    pub const STORE: u16 = 40;
    pub const RELOCATE: u16 = 50;
}

/// Status flags carried in the status byte of an instruction and reported
/// back by the Modbus station variant.
pub mod status {
    pub const BUSY: u8 = 1;
    pub const READY: u8 = 2;
    pub const ERROR: u8 = 4;
}

pub mod timeout {
    /// The conveyor has no timeout on the PLC side.
    pub const BAND: i32 = 0;
    /// Time the PLC gets to raise the busy flag after a command, in ms.
    pub const BUSY: u64 = 1000;
}

/// Opcode that switches all lights of a station off.
pub const LIGHT_RESET: u16 = 20;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Display,
    AsRefStr,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u16)]
pub enum StationType {
    #[strum(to_string = "BS", serialize = "BASE")]
    #[serde(rename = "BS", alias = "BASE")]
    Base = 1,
    #[strum(to_string = "RS", serialize = "RING")]
    #[serde(rename = "RS", alias = "RING")]
    Ring = 2,
    #[strum(to_string = "CS", serialize = "CAP")]
    #[serde(rename = "CS", alias = "CAP")]
    Cap = 3,
    #[strum(to_string = "DS", serialize = "DELIVERY")]
    #[serde(rename = "DS", alias = "DELIVERY")]
    Delivery = 4,
    #[strum(to_string = "SS", serialize = "STORAGE")]
    #[serde(rename = "SS", alias = "STORAGE")]
    Storage = 5,
}

impl StationType {
    /// Offset added to operation codes for this station.
    pub fn base_offset(self) -> u16 {
        match self {
            StationType::Base => station_base::BASE,
            StationType::Ring => station_base::RING,
            StationType::Cap => station_base::CAP,
            StationType::Delivery => station_base::DELIVERY,
            StationType::Storage => station_base::STORAGE,
        }
    }

    /// Payload of the `SET_TYPE` command identifying this station.
    pub fn type_code(self) -> u16 {
        self.into()
    }

    pub fn from_opcode(opcode: u16) -> Option<Self> {
        Self::try_from(opcode / 100).ok()
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Display,
    AsRefStr,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u16)]
#[strum(ascii_case_insensitive)]
pub enum LightColor {
    #[strum(to_string = "RED")]
    Red = 21,
    #[strum(to_string = "YELLOW")]
    Yellow = 22,
    #[strum(to_string = "GREEN")]
    Green = 23,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Display,
    AsRefStr,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u16)]
#[strum(ascii_case_insensitive)]
pub enum LightState {
    #[strum(to_string = "OFF")]
    Off = 0,
    #[strum(to_string = "ON")]
    On = 1,
    #[strum(to_string = "BLINK")]
    Blink = 2,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    EnumString,
    Display,
    AsRefStr,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u16)]
#[strum(ascii_case_insensitive)]
pub enum BaseColor {
    #[strum(to_string = "BASE_RED", serialize = "RED")]
    Red = 1,
    #[strum(to_string = "BASE_SILVER", serialize = "SILVER")]
    Silver = 2,
    #[strum(to_string = "BASE_BLACK", serialize = "BLACK")]
    Black = 3,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    EnumString,
    Display,
    AsRefStr,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u16)]
#[strum(ascii_case_insensitive)]
pub enum RingColor {
    #[strum(to_string = "RING_BLUE", serialize = "BLUE")]
    Blue = 1,
    #[strum(to_string = "RING_GREEN", serialize = "GREEN")]
    Green = 2,
    #[strum(to_string = "RING_ORANGE", serialize = "ORANGE")]
    Orange = 3,
    #[strum(to_string = "RING_YELLOW", serialize = "YELLOW")]
    Yellow = 4,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    EnumString,
    Display,
    AsRefStr,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u16)]
#[strum(ascii_case_insensitive)]
pub enum ConveyorDirection {
    #[strum(to_string = "TO_OUTPUT", serialize = "FORWARD")]
    Forward = 1,
    #[strum(to_string = "TO_INPUT", serialize = "BACKWARD")]
    Backward = 2,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    EnumString,
    Display,
    AsRefStr,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u16)]
#[strum(ascii_case_insensitive)]
pub enum MpsSensor {
    #[strum(to_string = "IN", serialize = "INPUT")]
    Input = 1,
    #[strum(to_string = "MID", serialize = "MIDDLE")]
    Middle = 2,
    #[strum(to_string = "OUT", serialize = "OUTPUT")]
    Output = 3,
}
