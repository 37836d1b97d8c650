//! Network-free backend that replays realistic station timing.

pub mod durations;
mod timer;

pub use timer::TimerQueue;

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use crate::{
    core::{error::MpsError, subscription::EventSink},
    protocol::{
        backend::ProtocolBackend,
        types::{
            mapping::{command, operation, LIGHT_RESET},
            Instruction, LightCommand, MpsSensor, Register, StationType,
        },
    },
};

pub struct MockupBackend {
    exec_speed: f32,
    timer: Option<TimerQueue>,
}

impl MockupBackend {
    pub fn new(exec_speed: f32) -> Self {
        Self {
            exec_speed,
            timer: None,
        }
    }

    fn timer(&mut self) -> Result<&mut TimerQueue> {
        self.timer
            .as_mut()
            .ok_or_else(|| anyhow!("mockup timer not started"))
    }

    /// Busy now, idle again after `busy_for`.
    fn operation(&mut self, busy_for: Duration) -> Result<()> {
        let now = Instant::now();
        let timer = self.timer()?;
        timer.schedule(now, Register::STATUS_BUSY_IN, 1);
        timer.schedule(now + busy_for, Register::STATUS_BUSY_IN, 0);
        Ok(())
    }

    fn conveyor(&mut self, sensor: u16) -> Result<()> {
        let speed = self.exec_speed;
        self.operation(durations::scaled(durations::BAND_INPUT_TO_MID, speed))?;
        if matches!(
            MpsSensor::try_from(sensor),
            Ok(MpsSensor::Input | MpsSensor::Output)
        ) {
            let now = Instant::now();
            let timer = self.timer()?;
            timer.schedule(
                now + durations::scaled(durations::BAND_MID_TO_OUTPUT, speed),
                Register::STATUS_READY_IN,
                1,
            );
            timer.schedule(
                now + durations::scaled(durations::READY_AT_OUTPUT, speed),
                Register::STATUS_READY_IN,
                0,
            );
        }
        Ok(())
    }
}

impl ProtocolBackend for MockupBackend {
    fn endpoint(&self) -> String {
        format!("mockup (x{})", self.exec_speed)
    }

    fn connect(&mut self, events: EventSink) -> Result<()> {
        if self.timer.is_none() {
            self.timer = Some(TimerQueue::start(events)?);
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.timer = None;
    }

    fn sync_subscriptions(&mut self, _registers: &[Register]) -> Result<()> {
        Ok(())
    }

    fn send(&mut self, instruction: &Instruction) -> Result<()> {
        let opcode = instruction.opcode;
        if opcode == command::SET_TYPE
            || opcode == LIGHT_RESET
            || LightCommand::from_instruction(instruction).is_some()
        {
            return Ok(());
        }

        let speed = self.exec_speed;
        let station = StationType::from_opcode(opcode)
            .ok_or_else(|| MpsError::encoding(format!("unknown opcode {opcode}")))?;
        match (station, opcode - station.base_offset()) {
            (_, command::MOVE_CONVEYOR) => self.conveyor(instruction.payload1),
            (StationType::Base, operation::GET_BASE) => self.operation(durations::BASE_DISPENSE),
            (StationType::Cap, operation::CAP_ACTION) => {
                self.operation(durations::scaled(durations::CAP_OPERATION, speed))
            }
            (StationType::Ring, operation::MOUNT_RING) => {
                self.operation(durations::scaled(durations::RING_MOUNT, speed))
            }
            (StationType::Delivery, operation::DELIVER) => {
                self.operation(durations::delivery(instruction.payload1, speed))
            }
            (
                StationType::Storage,
                operation::RETRIEVE | operation::STORE | operation::RELOCATE,
            ) => self.operation(durations::scaled(durations::STORAGE_OPERATION, speed)),
            (station, op) => {
                Err(MpsError::encoding(format!("{station} has no operation {op}")).into())
            }
        }
    }
}
