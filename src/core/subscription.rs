//! Callback bookkeeping shared between a machine, its dispatcher and the
//! thread delivering protocol events.
//!
//! The table and the connection state live behind one lock, so a reconnect
//! never observes a half-updated subscription set.

use parking_lot::Mutex;
use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::protocol::types::{Register, ValueKind};

pub type FlagCallback = Arc<dyn Fn(bool) + Send + Sync>;
pub type CodeCallback = Arc<dyn Fn(u64) + Send + Sync>;
pub type CountCallback = Arc<dyn Fn(u32) + Send + Sync>;

#[derive(Clone)]
pub enum Callback {
    Flag(FlagCallback),
    Code(CodeCallback),
    Count(CountCallback),
}

impl Callback {
    fn invoke(&self, register: Register, raw: u64) {
        match self {
            Callback::Flag(cb) => cb(raw != 0),
            Callback::Code(cb) => cb(raw),
            Callback::Count(cb) => match u32::try_from(raw) {
                Ok(count) => cb(count),
                Err(_) => log::warn!("Dropping {register} = {raw}, count out of range"),
            },
        }
    }

    fn kind(&self) -> ValueKind {
        match self {
            Callback::Flag(_) => ValueKind::Flag,
            Callback::Code(_) => ValueKind::Code,
            Callback::Count(_) => ValueKind::Count,
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback::{:?}", self.kind())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub register: Register,
    pub last_value: Option<u64>,
    pub callback: Callback,
}

#[derive(Debug)]
struct Table {
    state: ConnectionState,
    subscriptions: BTreeMap<Register, Subscription>,
    dirty: bool,
}

/// Register → callback map plus the connection state of one machine.
#[derive(Debug)]
pub struct CallbackManager {
    name: String,
    table: Mutex<Table>,
}

/// Handle given to backends for pushing register changes.
pub type EventSink = Arc<CallbackManager>;

impl CallbackManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: Mutex::new(Table {
                state: ConnectionState::Disconnected,
                subscriptions: BTreeMap::new(),
                dirty: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install, replace or (with `None`) remove the callback of a register.
    pub fn register(&self, register: Register, callback: Option<Callback>) {
        let mut table = self.table.lock();
        match callback {
            Some(callback) => {
                let last_value = table
                    .subscriptions
                    .get(&register)
                    .and_then(|existing| existing.last_value);
                table.subscriptions.insert(
                    register,
                    Subscription {
                        register,
                        last_value,
                        callback,
                    },
                );
                log::info!("[{}] Registered callback for {register}", self.name);
            }
            None => {
                if table.subscriptions.remove(&register).is_some() {
                    log::info!("[{}] Removed callback for {register}", self.name);
                }
            }
        }
        table.dirty = true;
    }

    pub fn registers(&self) -> Vec<Register> {
        self.table.lock().subscriptions.keys().copied().collect()
    }

    pub fn is_subscribed(&self, register: Register) -> bool {
        self.table.lock().subscriptions.contains_key(&register)
    }

    pub fn last_value(&self, register: Register) -> Option<u64> {
        self.table
            .lock()
            .subscriptions
            .get(&register)
            .and_then(|s| s.last_value)
    }

    /// Registers to (re)subscribe if the set changed since the last call.
    pub fn take_changes(&self) -> Option<Vec<Register>> {
        let mut table = self.table.lock();
        if !table.dirty {
            return None;
        }
        table.dirty = false;
        Some(table.subscriptions.keys().copied().collect())
    }

    /// Deliver a register change to its callback, if one is registered.
    ///
    /// The callback runs on the calling thread, outside the lock.
    pub fn publish(&self, register: Register, raw: u64) {
        let callback = {
            let mut table = self.table.lock();
            match table.subscriptions.get_mut(&register) {
                Some(subscription) => {
                    subscription.last_value = Some(raw);
                    subscription.callback.clone()
                }
                None => {
                    log::debug!("[{}] Ignoring {register} = {raw}", self.name);
                    return;
                }
            }
        };
        log::debug!("[{}] {register} = {raw}", self.name);
        callback.invoke(register, raw);
    }

    pub fn publish_flag(&self, register: Register, value: bool) {
        self.publish(register, u64::from(value));
    }

    pub fn state(&self) -> ConnectionState {
        self.table.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Move to `next`, returning the previous state.
    ///
    /// Entering `Connecting` marks the whole subscription set for re-issue.
    pub fn transition(&self, next: ConnectionState) -> ConnectionState {
        let mut table = self.table.lock();
        let previous = table.state;
        if previous != next {
            log::info!("[{}] Connection {previous:?} -> {next:?}", self.name);
        }
        if next == ConnectionState::Connecting {
            table.dirty = true;
        }
        table.state = next;
        previous
    }
}
