//! Machine backend for PLCs that expose the job registers over Modbus/TCP.
//!
//! Holding registers 0..4 carry `[opcode, payload1, payload2, status]` from the
//! refbox; the PLC answers in holding register 3 with the BUSY, READY and
//! ERROR bits.

use anyhow::{Context, Result};
use std::time::Duration;

use super::RegisterLink;
use crate::{
    core::{
        subscription::EventSink,
        wait::{poll_until, AbortToken, WaitResult},
    },
    protocol::{
        backend::ProtocolBackend,
        types::{
            mapping::{status, timeout},
            Instruction, Register,
        },
    },
};

pub const JOB_REGISTER_START: u16 = 0;
pub const JOB_REGISTER_COUNT: u16 = 4;
pub const STATUS_REGISTER: u16 = 3;

pub struct ModbusBackend {
    link: Box<dyn RegisterLink>,
    abort: AbortToken,
    poll_interval: Duration,
    events: Option<EventSink>,
    /// Status word we last wrote, so the BUSY handshake can clear one bit.
    out_status: u16,
    in_status: Option<u16>,
}

impl ModbusBackend {
    pub fn new(link: Box<dyn RegisterLink>, abort: AbortToken) -> Self {
        Self {
            link,
            abort,
            poll_interval: Duration::from_millis(10),
            events: None,
            out_status: 0,
            in_status: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Read the PLC status word and forward flag changes to the callbacks.
    pub fn read_status(&mut self) -> Result<u16> {
        let words = self
            .link
            .read_holdings(JOB_REGISTER_START, JOB_REGISTER_COUNT)?;
        let current = words[STATUS_REGISTER as usize];
        let previous = self.in_status.replace(current);

        if let Some(events) = &self.events {
            for (bit, register) in [
                (status::BUSY, Register::STATUS_BUSY_IN),
                (status::READY, Register::STATUS_READY_IN),
                (status::ERROR, Register::STATUS_ERROR_IN),
            ] {
                let now = current & u16::from(bit) != 0;
                let before = previous.map(|word| word & u16::from(bit) != 0);
                if before != Some(now) {
                    events.publish_flag(register, now);
                }
            }
        }
        Ok(current)
    }

    fn clear_busy_request(&mut self) -> Result<()> {
        self.out_status &= !u16::from(status::BUSY);
        self.link.write_holding(STATUS_REGISTER, self.out_status)
    }

    /// Wait for the PLC to report READY, acknowledging its BUSY flag on the way.
    pub fn wait_for_ready(&mut self, timeout: Option<Duration>) -> Result<WaitResult> {
        let abort = self.abort.clone();
        let interval = self.poll_interval;
        poll_until(timeout, interval, &abort, || {
            let word = self.read_status()?;
            if word & u16::from(status::BUSY) != 0
                && self.out_status & u16::from(status::BUSY) != 0
            {
                self.clear_busy_request()?;
            }
            if word & u16::from(status::ERROR) != 0 {
                return Ok(Some(WaitResult::DeviceError));
            }
            Ok((word & u16::from(status::READY) != 0).then_some(WaitResult::Ready))
        })
    }

    /// Wait until the PLC raises BUSY, then clear our BUSY request.
    ///
    /// A PLC that finishes before BUSY is ever seen ends the wait through its
    /// READY or ERROR flag.
    pub fn wait_for_busy(&mut self, timeout: Option<Duration>) -> Result<WaitResult> {
        let abort = self.abort.clone();
        let interval = self.poll_interval;
        poll_until(timeout, interval, &abort, || {
            let word = self.read_status()?;
            if word & u16::from(status::BUSY) != 0 {
                self.clear_busy_request()?;
                return Ok(Some(WaitResult::Ready));
            }
            if word & u16::from(status::ERROR) != 0 {
                return Ok(Some(WaitResult::DeviceError));
            }
            Ok((word & u16::from(status::READY) != 0).then_some(WaitResult::Ready))
        })
    }

    /// Wait until the PLC no longer reports BUSY.
    pub fn wait_for_free(&mut self, timeout: Option<Duration>) -> Result<WaitResult> {
        let abort = self.abort.clone();
        let interval = self.poll_interval;
        poll_until(timeout, interval, &abort, || {
            let word = self.read_status()?;
            Ok((word & u16::from(status::BUSY) == 0).then_some(WaitResult::Ready))
        })
    }
}

impl ProtocolBackend for ModbusBackend {
    fn endpoint(&self) -> String {
        format!("modbus://{}", self.link.endpoint())
    }

    fn connect(&mut self, events: EventSink) -> Result<()> {
        self.link.connect()?;
        self.events = Some(events);
        self.in_status = None;
        self.read_status().context("Failed to read initial station status")?;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.link.close();
    }

    fn is_connected(&self) -> bool {
        self.link.is_open()
    }

    fn sync_subscriptions(&mut self, registers: &[Register]) -> Result<()> {
        // Status is polled, every change reaches the callback table.
        log::debug!(
            "{} polls {} subscribed register(s)",
            self.endpoint(),
            registers.len()
        );
        Ok(())
    }

    fn send(&mut self, instruction: &Instruction) -> Result<()> {
        self.out_status = u16::from(instruction.status);
        self.link.write_holdings(
            JOB_REGISTER_START,
            &[
                instruction.opcode,
                instruction.payload1,
                instruction.payload2,
                self.out_status,
            ],
        )?;
        if !instruction.is_station_job() {
            return Ok(());
        }

        if instruction.wants_busy_handshake() {
            let result = self.wait_for_busy(Some(Duration::from_millis(timeout::BUSY)))?;
            if !result.is_ready() {
                log::warn!(
                    "{}: no busy acknowledge for {instruction} ({result:?})",
                    self.endpoint()
                );
            }
        }
        if instruction.timeout_ms > 0 {
            let waited = Duration::from_millis(instruction.timeout_ms as u64);
            let result = self.wait_for_ready(Some(waited))?;
            if !result.is_ready() {
                log::warn!(
                    "{}: {instruction} did not finish within {} ms ({result:?})",
                    self.endpoint(),
                    instruction.timeout_ms
                );
            }
        }
        // An abort only applies to the operation it interrupted.
        if self.abort.is_aborted() {
            log::info!("{}: {instruction} aborted", self.endpoint());
            self.abort.clear();
        }
        Ok(())
    }

    fn heartbeat(&mut self) -> Result<()> {
        self.read_status().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::subscription::{Callback, CallbackManager};
    use parking_lot::Mutex;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// In-memory PLC: the status register turns BUSY on the n-th read.
    struct FakePlc {
        words: Arc<Mutex<Vec<u16>>>,
        reads: Arc<AtomicUsize>,
        busy_after: usize,
        ready_after: usize,
        error_after: usize,
        open: bool,
    }

    impl RegisterLink for FakePlc {
        fn endpoint(&self) -> String {
            "fake:502".to_string()
        }

        fn connect(&mut self) -> Result<()> {
            self.open = true;
            Ok(())
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn read_holdings(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            let mut words = self.words.lock().clone();
            let mut plc_status = 0;
            if n >= self.busy_after {
                plc_status |= u16::from(status::BUSY);
            }
            if n >= self.ready_after {
                plc_status = u16::from(status::READY);
            }
            if n >= self.error_after {
                plc_status = u16::from(status::ERROR);
            }
            words[STATUS_REGISTER as usize] = plc_status;
            Ok(words[start as usize..(start + count) as usize].to_vec())
        }

        fn write_holdings(&mut self, start: u16, values: &[u16]) -> Result<()> {
            let mut words = self.words.lock();
            for (i, value) in values.iter().enumerate() {
                words[start as usize + i] = *value;
            }
            Ok(())
        }
    }

    fn backend(busy_after: usize, ready_after: usize) -> (ModbusBackend, Arc<Mutex<Vec<u16>>>) {
        plc_backend(busy_after, ready_after, usize::MAX)
    }

    fn plc_backend(
        busy_after: usize,
        ready_after: usize,
        error_after: usize,
    ) -> (ModbusBackend, Arc<Mutex<Vec<u16>>>) {
        let words = Arc::new(Mutex::new(vec![0u16; 4]));
        let link = FakePlc {
            words: words.clone(),
            reads: Arc::new(AtomicUsize::new(0)),
            busy_after,
            ready_after,
            error_after,
            open: false,
        };
        let backend = ModbusBackend::new(Box::new(link), AbortToken::new())
            .with_poll_interval(Duration::from_millis(1));
        (backend, words)
    }

    #[test]
    fn test_send_writes_job_words_and_acknowledges_busy() {
        let (mut backend, words) = backend(3, usize::MAX);
        backend
            .connect(Arc::new(CallbackManager::new("C-CS1")))
            .unwrap();
        backend
            .send(&Instruction::new(301).with_payload(2, 0))
            .unwrap();
        // BUSY bit cleared by the handshake
        assert_eq!(*words.lock(), vec![301, 2, 0, 0]);
    }

    #[test]
    fn test_wait_for_ready_reports_ready_and_publishes() {
        let (mut backend, _) = backend(2, 4);
        let events = Arc::new(CallbackManager::new("C-BS"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        events.register(
            Register::STATUS_READY_IN,
            Some(Callback::Flag(Arc::new(move |ready| sink.lock().push(ready)))),
        );
        backend.connect(events).unwrap();
        let result = backend
            .wait_for_ready(Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(result, WaitResult::Ready);
        assert_eq!(*seen.lock(), vec![false, true]);
    }

    #[test]
    fn test_waits_honour_abort_and_timeout() {
        let (mut backend, _) = backend(usize::MAX, usize::MAX);
        backend
            .connect(Arc::new(CallbackManager::new("C-DS")))
            .unwrap();
        assert_eq!(
            backend
                .wait_for_busy(Some(Duration::from_millis(15)))
                .unwrap(),
            WaitResult::TimedOut
        );
        backend.abort.abort();
        assert_eq!(backend.wait_for_ready(None).unwrap(), WaitResult::Aborted);
    }

    #[test]
    fn test_busy_wait_ends_on_ready_or_error() {
        let (mut backend, _) = backend(usize::MAX, 1);
        backend
            .connect(Arc::new(CallbackManager::new("C-RS1")))
            .unwrap();
        let started = std::time::Instant::now();
        assert_eq!(
            backend.wait_for_busy(Some(Duration::from_secs(1))).unwrap(),
            WaitResult::Ready
        );
        assert!(started.elapsed() < Duration::from_millis(500));

        let (mut backend, _) = plc_backend(usize::MAX, usize::MAX, 1);
        backend
            .connect(Arc::new(CallbackManager::new("C-RS2")))
            .unwrap();
        assert_eq!(
            backend.wait_for_busy(Some(Duration::from_secs(1))).unwrap(),
            WaitResult::DeviceError
        );
    }

    #[test]
    fn test_send_does_not_stall_without_busy() {
        let (mut backend, words) = backend(usize::MAX, 1);
        backend
            .connect(Arc::new(CallbackManager::new("M-CS1")))
            .unwrap();
        let started = std::time::Instant::now();
        backend
            .send(&Instruction::new(301).with_payload(1, 0))
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(words.lock()[..3], [301, 1, 0]);
    }

    #[test]
    fn test_wait_for_free_tracks_busy_flag() {
        let (mut backend, _) = backend(1, usize::MAX);
        backend
            .connect(Arc::new(CallbackManager::new("C-BS")))
            .unwrap();
        assert_eq!(
            backend
                .wait_for_free(Some(Duration::from_millis(15)))
                .unwrap(),
            WaitResult::TimedOut
        );

        let (mut backend, _) = plc_backend(usize::MAX, 1, usize::MAX);
        backend
            .connect(Arc::new(CallbackManager::new("C-BS")))
            .unwrap();
        assert_eq!(
            backend.wait_for_free(Some(Duration::from_secs(1))).unwrap(),
            WaitResult::Ready
        );
    }
}
