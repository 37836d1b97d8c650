pub mod factory;
pub mod machine;
pub mod sps;
pub mod station;

pub use factory::{create_machine, create_machine_with, create_machines, ConnectionMode};
pub use machine::Machine;
pub use sps::SpsComm;
pub use station::{
    station_for, BaseStation, CapStation, DeliveryStation, RingStation, StationAction,
    StationBehavior, StorageStation,
};
