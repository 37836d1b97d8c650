pub mod instruction;
pub mod mapping;
pub mod register;

pub use instruction::{Instruction, LightCommand};
pub use mapping::{
    BaseColor, ConveyorDirection, LightColor, LightState, MpsSensor, RingColor, StationType,
};
pub use register::{JobSpace, Register, RegisterField, ValueKind};
