mod frame;
mod header;
pub mod link;
mod pull_get_holdings;
mod pull_set_holdings;
pub mod station;

pub use frame::*;
pub use header::*;
pub use link::{RegisterLink, TcpLink};
pub use pull_get_holdings::*;
pub use pull_set_holdings::*;
pub use station::ModbusBackend;
