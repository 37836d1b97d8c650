/// Protocol independent machinery shared by every machine
///
/// - Command dispatch with reconnect and heartbeat
/// - Callback bookkeeping and connection state
/// - Bounded, abortable polling
/// - Error taxonomy and configuration
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod subscription;
pub mod wait;

pub use config::CommConfig;
pub use dispatcher::{Dispatcher, DispatcherControl, RetryPolicy};
pub use error::MpsError;
pub use subscription::{
    Callback, CallbackManager, CodeCallback, ConnectionState, CountCallback, EventSink,
    FlagCallback,
};
pub use wait::{AbortToken, WaitResult};
