pub mod backend;
pub mod mockup;
pub mod modbus;
pub mod mqtt;
pub mod opcua;
pub mod types;

pub use backend::ProtocolBackend;
