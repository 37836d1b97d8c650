use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use mps_comm::{
    core::{dispatcher::RetryPolicy, subscription::EventSink},
    protocol::{
        backend::ProtocolBackend,
        types::{Instruction, LightColor, LightState, Register, RingColor, StationType},
    },
    Machine,
};

#[derive(Default)]
struct Wire {
    sent: Vec<Instruction>,
    connects: usize,
    subscriptions: Vec<Vec<Register>>,
}

/// Backend that refuses the first `failing_connects` connects and drops the
/// connection on the `fail_send_at`-th send.
struct FlakyBackend {
    wire: Arc<Mutex<Wire>>,
    failing_connects: usize,
    fail_send_at: Option<usize>,
    sends: usize,
    events: Option<EventSink>,
}

impl FlakyBackend {
    fn new(wire: Arc<Mutex<Wire>>) -> Self {
        Self {
            wire,
            failing_connects: 0,
            fail_send_at: None,
            sends: 0,
            events: None,
        }
    }
}

impl ProtocolBackend for FlakyBackend {
    fn endpoint(&self) -> String {
        "flaky".to_string()
    }

    fn connect(&mut self, events: EventSink) -> Result<()> {
        let mut wire = self.wire.lock();
        wire.connects += 1;
        if wire.connects <= self.failing_connects {
            return Err(anyhow!("connection refused"));
        }
        self.events = Some(events);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.events = None;
    }

    fn sync_subscriptions(&mut self, registers: &[Register]) -> Result<()> {
        self.wire.lock().subscriptions.push(registers.to_vec());
        Ok(())
    }

    fn send(&mut self, instruction: &Instruction) -> Result<()> {
        self.sends += 1;
        if Some(self.sends) == self.fail_send_at {
            return Err(anyhow!("broken pipe"));
        }
        self.wire.lock().sent.push(*instruction);
        if let Some(events) = self.events.as_ref().filter(|_| instruction.is_station_job()) {
            events.publish_flag(Register::STATUS_BUSY_IN, true);
        }
        Ok(())
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        heartbeat_interval: Duration::from_secs(5),
        retry_delay: Duration::from_millis(5),
        poll_interval: Duration::from_millis(5),
        escalate_after: 3,
    }
}

fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_instructions_leave_in_enqueue_order() -> Result<()> {
    let wire = Arc::new(Mutex::new(Wire::default()));
    let machine = Machine::with_backend(
        "C-SS",
        StationType::Storage,
        Box::new(FlakyBackend::new(wire.clone())),
        fast_policy(),
    )?;

    machine.store(1, 1)?;
    machine.retrieve(2, 3)?;
    machine.set_light(LightColor::Yellow, LightState::On, 0)?;
    machine.relocate(0, 0, 5, 7)?;
    machine.shutdown()?;

    let opcodes: Vec<u16> = wire.lock().sent.iter().map(|i| i.opcode).collect();
    assert_eq!(opcodes, vec![10, 540, 530, 22, 550]);
    Ok(())
}

#[test]
fn test_reconnect_keeps_every_instruction() -> Result<()> {
    let wire = Arc::new(Mutex::new(Wire::default()));
    let mut backend = FlakyBackend::new(wire.clone());
    backend.failing_connects = 3;
    // identify is send 1, the first ring mount is send 2
    backend.fail_send_at = Some(2);

    let machine = Machine::with_backend("C-RS1", StationType::Ring, Box::new(backend), fast_policy())?;
    for feeder in [1, 2, 1] {
        machine.mount_ring(feeder, RingColor::Green)?;
    }
    machine.shutdown()?;

    let wire = wire.lock();
    assert_eq!(wire.connects, 5);
    let sent: Vec<(u16, u16)> = wire.sent.iter().map(|i| (i.opcode, i.payload1)).collect();
    // identify again after the reconnect, then the retried command
    assert_eq!(
        sent,
        vec![(10, 2), (10, 2), (203, 1), (203, 2), (203, 1)]
    );
    Ok(())
}

#[test]
fn test_only_latest_callback_fires() -> Result<()> {
    let wire = Arc::new(Mutex::new(Wire::default()));
    let machine = Machine::with_backend(
        "C-CS1",
        StationType::Cap,
        Box::new(FlakyBackend::new(wire.clone())),
        fast_policy(),
    )?;

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let counter = first.clone();
    machine.register_busy_callback(Some(Arc::new(move |_: bool| {
        counter.fetch_add(1, Ordering::SeqCst);
    })));
    let counter = second.clone();
    machine.register_busy_callback(Some(Arc::new(move |_: bool| {
        counter.fetch_add(1, Ordering::SeqCst);
    })));

    machine.retrieve_cap()?;
    assert!(wait_until(Duration::from_secs(2), || {
        second.load(Ordering::SeqCst) > 0
    }));
    assert_eq!(first.load(Ordering::SeqCst), 0);

    // the subscription set reached the backend before or with the command
    assert!(wire
        .lock()
        .subscriptions
        .iter()
        .any(|set| set.contains(&Register::STATUS_BUSY_IN)));

    machine.register_busy_callback(None);
    machine.shutdown()?;
    Ok(())
}

#[test]
fn test_drop_abandons_unreachable_station() -> Result<()> {
    let wire = Arc::new(Mutex::new(Wire::default()));
    let mut backend = FlakyBackend::new(wire.clone());
    backend.failing_connects = usize::MAX;

    let machine = Machine::with_backend("C-DS", StationType::Delivery, Box::new(backend), fast_policy())?;
    machine.deliver_product(2)?;
    let started = Instant::now();
    let drained = machine.shutdown_within(Duration::from_millis(100))?;
    assert!(!drained);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(wire.lock().sent.is_empty());
    Ok(())
}
