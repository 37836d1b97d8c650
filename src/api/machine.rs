/// The uniform machine handle used by the referee box
///
/// Every mutating call translates into one [`Instruction`] and returns as soon
/// as it is queued. A dedicated dispatcher thread transmits the queue in order.
use anyhow::{anyhow, Result};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    api::{
        sps::{to_light, to_signal_state},
        station::{station_for, StationAction, StationBehavior},
    },
    core::{
        dispatcher::{Dispatcher, DispatcherControl, RetryPolicy},
        error::MpsError,
        subscription::{
            Callback, CallbackManager, CodeCallback, ConnectionState, CountCallback, EventSink,
            FlagCallback,
        },
        wait::AbortToken,
    },
    protocol::{
        backend::ProtocolBackend,
        types::{
            BaseColor, ConveyorDirection, Instruction, LightColor, LightCommand, LightState,
            MpsSensor, Register, RingColor, StationType,
        },
    },
};

pub struct Machine {
    name: String,
    endpoint: String,
    station: Box<dyn StationBehavior>,
    sender: Option<flume::Sender<Instruction>>,
    events: EventSink,
    control: Arc<DispatcherControl>,
    abort: AbortToken,
    worker: Option<JoinHandle<()>>,
}

impl Machine {
    /// Start a machine on `backend` with a fresh abort token.
    pub fn with_backend(
        name: impl Into<String>,
        station_type: StationType,
        backend: Box<dyn ProtocolBackend>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        Self::new(name, station_type, backend, policy, AbortToken::new())
    }

    /// Start a machine whose backend shares `abort` for its blocking waits.
    pub fn new(
        name: impl Into<String>,
        station_type: StationType,
        backend: Box<dyn ProtocolBackend>,
        policy: RetryPolicy,
        abort: AbortToken,
    ) -> Result<Self> {
        let name = name.into();
        let station = station_for(station_type);
        let endpoint = backend.endpoint();
        let events: EventSink = Arc::new(CallbackManager::new(name.clone()));
        let control = Arc::new(DispatcherControl::default());
        let (sender, receiver) = flume::unbounded();

        let worker = Dispatcher::new(
            receiver,
            backend,
            events.clone(),
            station.identify(),
            policy,
            control.clone(),
        )
        .spawn()?;

        log::info!("[{name}] Created {station_type} machine on {endpoint}");
        Ok(Self {
            name,
            endpoint,
            station,
            sender: Some(sender),
            events,
            control,
            abort,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn station_type(&self) -> StationType {
        self.station.station_type()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.events.state()
    }

    /// Instructions queued but not yet picked up by the dispatcher.
    pub fn pending(&self) -> usize {
        self.sender.as_ref().map_or(0, |sender| sender.len())
    }

    fn enqueue(&self, instruction: Instruction) -> Result<(), MpsError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| MpsError::connection(&self.endpoint, "machine is shut down"))?;
        log::debug!("[{}] Queueing {instruction}", self.name);
        sender
            .send(instruction)
            .map_err(|_| MpsError::connection(&self.endpoint, "dispatcher has exited"))
    }

    pub fn reset(&self) -> Result<(), MpsError> {
        self.enqueue(self.station.reset())
    }

    pub fn identify(&self) -> Result<(), MpsError> {
        self.enqueue(self.station.identify())
    }

    pub fn set_light(
        &self,
        color: LightColor,
        state: LightState,
        blink_ms: u16,
    ) -> Result<(), MpsError> {
        self.enqueue(
            LightCommand {
                color,
                state,
                blink_ms,
            }
            .to_instruction(),
        )
    }

    /// Light command from raw wire codes (color 21..=23, state 0..=2).
    pub fn set_light_raw(&self, color: u16, state: u16, blink_ms: u16) -> Result<(), MpsError> {
        let light = LightCommand::from_words(color, state, blink_ms).ok_or_else(|| {
            MpsError::invalid(format!("no light {color} with state {state}"))
        })?;
        self.enqueue(light.to_instruction())
    }

    pub fn set_light_by_name(
        &self,
        color: &str,
        state: &str,
        blink_ms: u16,
    ) -> Result<(), MpsError> {
        self.set_light(to_light(color)?, to_signal_state(state)?, blink_ms)
    }

    pub fn reset_light(&self) -> Result<(), MpsError> {
        self.set_light(LightColor::Red, LightState::Off, 0)
    }

    pub fn conveyor_move(
        &self,
        direction: ConveyorDirection,
        sensor: MpsSensor,
    ) -> Result<(), MpsError> {
        self.enqueue(self.station.conveyor_move(direction, sensor))
    }

    pub fn perform(&self, action: StationAction) -> Result<(), MpsError> {
        let instruction = self.station.perform(action)?;
        log::info!("[{}] {action}", self.name);
        self.enqueue(instruction)
    }

    pub fn get_base(&self, color: BaseColor) -> Result<(), MpsError> {
        self.perform(StationAction::GetBase(color))
    }

    pub fn retrieve_cap(&self) -> Result<(), MpsError> {
        self.perform(StationAction::RetrieveCap)
    }

    pub fn mount_cap(&self) -> Result<(), MpsError> {
        self.perform(StationAction::MountCap)
    }

    /// Mount a ring from `feeder`, numbered 1..=2 as the PLC expects them.
    ///
    /// The feeder is sent unchanged. The MQTT text command only names the
    /// feeder (`MOUNT_RING RING2`), the color travels in the second payload
    /// word on the other transports.
    pub fn mount_ring(&self, feeder: u16, color: RingColor) -> Result<(), MpsError> {
        self.perform(StationAction::MountRing { feeder, color })
    }

    pub fn deliver_product(&self, slot: u16) -> Result<(), MpsError> {
        self.perform(StationAction::Deliver { slot })
    }

    pub fn retrieve(&self, shelf: u16, slot: u16) -> Result<(), MpsError> {
        self.perform(StationAction::Retrieve { shelf, slot })
    }

    pub fn store(&self, shelf: u16, slot: u16) -> Result<(), MpsError> {
        self.perform(StationAction::Store { shelf, slot })
    }

    pub fn relocate(
        &self,
        shelf: u16,
        slot: u16,
        target_shelf: u16,
        target_slot: u16,
    ) -> Result<(), MpsError> {
        self.perform(StationAction::Relocate {
            shelf,
            slot,
            target_shelf,
            target_slot,
        })
    }

    pub fn register_busy_callback(&self, callback: Option<FlagCallback>) {
        self.events
            .register(Register::STATUS_BUSY_IN, callback.map(Callback::Flag));
    }

    pub fn register_ready_callback(&self, callback: Option<FlagCallback>) {
        self.events
            .register(Register::STATUS_READY_IN, callback.map(Callback::Flag));
    }

    pub fn register_barcode_callback(&self, callback: Option<CodeCallback>) {
        self.events
            .register(Register::BARCODE_IN, callback.map(Callback::Code));
    }

    /// Slide counter updates; only ring stations have a slide.
    pub fn register_slide_callback(&self, callback: Option<CountCallback>) -> Result<(), MpsError> {
        if self.station_type() != StationType::Ring {
            return Err(MpsError::invalid(format!(
                "{} is a {} station without a slide",
                self.name,
                self.station_type()
            )));
        }
        self.events
            .register(Register::SLIDECOUNT_IN, callback.map(Callback::Count));
        Ok(())
    }

    /// Interrupt a blocking wait of the backend, if it has one.
    pub fn abort_operation(&self) {
        log::info!("[{}] Aborting current operation", self.name);
        self.abort.abort();
    }

    /// Close the queue and wait until everything queued has been sent.
    pub fn shutdown(mut self) -> Result<()> {
        self.sender = None;
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| anyhow!("Dispatcher of {} panicked", self.name)),
            None => Ok(()),
        }
    }

    /// Like [`shutdown`](Self::shutdown), abandoning the queue after `limit`.
    ///
    /// Returns whether the queue was drained completely.
    pub fn shutdown_within(mut self, limit: Duration) -> Result<bool> {
        self.sender = None;
        let Some(worker) = self.worker.take() else {
            return Ok(true);
        };
        let deadline = Instant::now() + limit;
        while !worker.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let drained = worker.is_finished();
        if !drained {
            log::warn!("[{}] Queue not drained within {limit:?}", self.name);
            self.control.abandon();
            self.abort.abort();
        }
        worker
            .join()
            .map_err(|_| anyhow!("Dispatcher of {} panicked", self.name))?;
        Ok(drained)
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.control.abandon();
            self.abort.abort();
            self.sender = None;
            if worker.join().is_err() {
                log::error!("[{}] Dispatcher panicked", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder(Arc<Mutex<Vec<Instruction>>>);

    impl ProtocolBackend for Recorder {
        fn endpoint(&self) -> String {
            "recorder".to_string()
        }

        fn connect(&mut self, _events: EventSink) -> Result<()> {
            Ok(())
        }

        fn disconnect(&mut self) {}

        fn sync_subscriptions(&mut self, _registers: &[Register]) -> Result<()> {
            Ok(())
        }

        fn send(&mut self, instruction: &Instruction) -> Result<()> {
            self.0.lock().push(*instruction);
            Ok(())
        }
    }

    fn machine(station_type: StationType) -> (Machine, Arc<Mutex<Vec<Instruction>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let machine = Machine::with_backend(
            "C-TEST",
            station_type,
            Box::new(Recorder(sent.clone())),
            RetryPolicy::default(),
        )
        .unwrap();
        (machine, sent)
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let (machine, sent) = machine(StationType::Cap);
        machine.retrieve_cap().unwrap();
        machine.reset_light().unwrap();
        machine.shutdown().unwrap();

        let sent = sent.lock();
        // identify on connect, then the two commands
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].opcode, 10);
        assert_eq!(sent[1].opcode, 301);
        assert_eq!((sent[2].opcode, sent[2].payload1), (21, 0));
    }

    #[test]
    fn test_invalid_arguments_are_not_queued() {
        let (machine, sent) = machine(StationType::Base);
        assert!(machine.set_light_raw(24, 1, 0).is_err());
        assert!(machine.set_light_raw(21, 3, 0).is_err());
        assert!(machine.mount_cap().is_err());
        assert!(machine
            .register_slide_callback(Some(Arc::new(|_| {})))
            .is_err());
        machine.shutdown().unwrap();
        assert!(sent.lock().iter().all(|instruction| instruction.opcode == 10));
    }
}
