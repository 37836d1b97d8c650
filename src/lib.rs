//! rcll-mps-comm: machine communication layer of the RCLL referee box
//!
//! A [`Machine`] is the single handle the referee box uses for a Modular
//! Production System station, whatever protocol the station speaks. Machines
//! are built by the factory from a [`ConnectionMode`] and queue every command
//! for a per-machine dispatcher thread, which owns the connection and retries
//! until the command is delivered. Status changes reported by the station are
//! delivered through the registered callbacks.
//!
//! The SPS helpers in [`api::sps`] drive the signal lights and RFID readers
//! wired to the field PLCs.

pub mod api;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;

pub use api::*;
