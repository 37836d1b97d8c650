//! Per-machine command dispatcher.
//!
//! One thread per machine pops instructions from a `flume` channel in FIFO
//! order and hands them to the backend. A failed transmission keeps the
//! instruction at the head, forces a full reconnect and retries it. There is
//! no retry limit. While the queue is idle the backend gets a heartbeat so
//! silent disconnects are noticed before the next command.

use anyhow::{Context, Result};
use flume::RecvTimeoutError;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    core::{
        error::MpsError,
        subscription::{ConnectionState, EventSink},
    },
    protocol::{backend::ProtocolBackend, types::Instruction},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Idle time after which the backend is probed.
    pub heartbeat_interval: Duration,
    /// Pause between two failed connection attempts.
    pub retry_delay: Duration,
    /// Upper bound for one wait on the queue.
    pub poll_interval: Duration,
    /// Every n-th consecutive connection failure is logged as an error.
    pub escalate_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            escalate_after: 5,
        }
    }
}

/// Stop switch shared between a machine and its dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherControl {
    abandon: AtomicBool,
}

impl DispatcherControl {
    /// Stop after the in-flight attempt, dropping whatever is still queued.
    pub fn abandon(&self) {
        self.abandon.store(true, Ordering::SeqCst);
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandon.load(Ordering::SeqCst)
    }
}

pub struct Dispatcher {
    name: String,
    receiver: flume::Receiver<Instruction>,
    backend: Box<dyn ProtocolBackend>,
    events: EventSink,
    identify: Instruction,
    policy: RetryPolicy,
    control: Arc<DispatcherControl>,
    failures: u32,
}

impl Dispatcher {
    pub fn new(
        receiver: flume::Receiver<Instruction>,
        backend: Box<dyn ProtocolBackend>,
        events: EventSink,
        identify: Instruction,
        policy: RetryPolicy,
        control: Arc<DispatcherControl>,
    ) -> Self {
        Self {
            name: events.name().to_string(),
            receiver,
            backend,
            events,
            identify,
            policy,
            control,
            failures: 0,
        }
    }

    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let thread_name = format!("mps-{}", self.name);
        thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || self.run())
            .with_context(|| format!("Failed to spawn dispatcher thread {thread_name}"))
    }

    /// Dispatch until the queue is closed and drained, or until abandoned.
    pub fn run(mut self) {
        log::info!(
            "[{}] Dispatcher started for {}",
            self.name,
            self.backend.endpoint()
        );

        let mut pending: Option<Instruction> = None;
        let mut last_activity = Instant::now();

        loop {
            if self.control.is_abandoned() {
                let dropped = self.receiver.len() + usize::from(pending.is_some());
                if dropped > 0 {
                    log::warn!(
                        "[{}] Abandoning {dropped} queued instruction(s)",
                        self.name
                    );
                }
                break;
            }

            if pending.is_none() && self.receiver.is_disconnected() && self.receiver.is_empty() {
                break;
            }

            if !self.ensure_connected() {
                continue;
            }

            if let Some(registers) = self.events.take_changes() {
                if let Err(err) = self.backend.sync_subscriptions(&registers) {
                    self.connection_lost("updating subscriptions", &err);
                    continue;
                }
            }

            let instruction = match pending.take() {
                Some(instruction) => instruction,
                None => match self.receiver.recv_timeout(self.policy.poll_interval) {
                    Ok(instruction) => instruction,
                    Err(RecvTimeoutError::Timeout) => {
                        if last_activity.elapsed() >= self.policy.heartbeat_interval {
                            match self.backend.heartbeat() {
                                Ok(()) => last_activity = Instant::now(),
                                Err(err) => self.connection_lost("heartbeat", &err),
                            }
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };

            log::debug!("[{}] Sending instruction {instruction}", self.name);
            match self.backend.send(&instruction) {
                Ok(()) => last_activity = Instant::now(),
                Err(err) => {
                    if let Some(MpsError::ProtocolEncoding { .. }) = err.downcast_ref::<MpsError>()
                    {
                        panic!(
                            "[{}] instruction {instruction} has no wire encoding: {err:#}",
                            self.name
                        );
                    }
                    pending = Some(instruction);
                    self.connection_lost("sending", &err);
                }
            }
        }

        self.backend.disconnect();
        self.events.transition(ConnectionState::Disconnected);
        log::info!("[{}] Dispatcher exited", self.name);
    }

    fn ensure_connected(&mut self) -> bool {
        if self.events.is_connected() {
            if self.backend.is_connected() {
                return true;
            }
            log::warn!(
                "[{}] {} reported a lost connection",
                self.name,
                self.backend.endpoint()
            );
            self.backend.disconnect();
            self.events.transition(ConnectionState::Disconnected);
        }

        self.events.transition(ConnectionState::Connecting);
        match self.establish() {
            Ok(()) => {
                if self.failures > 0 {
                    log::info!(
                        "[{}] Connected after {} failed attempt(s)",
                        self.name,
                        self.failures
                    );
                }
                self.failures = 0;
                self.events.transition(ConnectionState::Connected);
                true
            }
            Err(err) => {
                self.failures += 1;
                self.backend.disconnect();
                self.events.transition(ConnectionState::Disconnected);
                if self.failures % self.policy.escalate_after.max(1) == 0 {
                    log::error!(
                        "[{}] Still unable to connect to {} ({} attempts): {err:#}",
                        self.name,
                        self.backend.endpoint(),
                        self.failures
                    );
                } else {
                    log::warn!(
                        "[{}] Connecting to {} failed: {err:#}",
                        self.name,
                        self.backend.endpoint()
                    );
                }
                self.pause(self.policy.retry_delay);
                false
            }
        }
    }

    /// Connect, re-issue every subscription, then identify.
    fn establish(&mut self) -> Result<()> {
        self.backend.connect(self.events.clone())?;
        let registers = self
            .events
            .take_changes()
            .unwrap_or_else(|| self.events.registers());
        self.backend
            .sync_subscriptions(&registers)
            .context("Failed to restore subscriptions")?;
        if self.backend.identifies_on_connect() {
            self.backend
                .send(&self.identify)
                .context("Failed to identify station")?;
        }
        Ok(())
    }

    fn connection_lost(&mut self, during: &str, err: &anyhow::Error) {
        log::warn!("[{}] Connection lost while {during}: {err:#}", self.name);
        self.backend.disconnect();
        self.events.transition(ConnectionState::Disconnected);
    }

    /// Sleep in small steps so an abandon request is honoured quickly.
    fn pause(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.control.is_abandoned() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }
    }
}
