/// Signal light and RFID access over the Modbus PLCs of the field
///
/// Each PLC serves up to [`SPS_NUM_MACHINES`] machines. Machine indices are
/// global; `plc_index` maps them onto a PLC and a local slot.
use anyhow::{Context, Result};
use std::{thread, time::{Duration, Instant}};

use crate::{
    core::{config::SpsConfig, error::MpsError},
    protocol::{
        modbus::{RegisterLink, TcpLink},
        types::{LightColor, LightState},
    },
};

pub const SPS_NUM_MACHINES: usize = 16;

pub const MB_IN_REG_START: u16 = 0x4000;
pub const MB_OUT_REG_START: u16 = 0x4400;

pub const OUT_REG_PER_SIGNAL: u16 = 3;
pub const IN_REG_PER_RFID: u16 = 3;
pub const OUT_REG_PER_RFID: u16 = 3;

pub const OUT_REG_START_SIGNAL: u16 = MB_OUT_REG_START;
pub const OUT_REG_START_RFID: u16 =
    OUT_REG_START_SIGNAL + OUT_REG_PER_SIGNAL * SPS_NUM_MACHINES as u16;
pub const IN_REG_START_RFID: u16 = MB_IN_REG_START;

pub const RFID_HAS_PUCK: u16 = 0x0100;
pub const RFID_WRITE_DONE: u16 = 0x0200;
pub const RFID_WRITE_PUCK_ID: u16 = 0x0100;
pub const RFID_RESET_WRITE: u16 = 0x0200;

/// Id reported by `read_rfids` for a sensor without a puck.
pub const NO_PUCK: u32 = 0xFFFF_FFFF;

pub const MACHINE_NAMES: [&str; SPS_NUM_MACHINES] = [
    "M1", "M2", "M3", "M4", "M5", "M6", "M7", "M8", "M9", "M10", "D1", "D2", "D3", "TST", "R1",
    "R2",
];

pub fn index_to_name(index: usize) -> &'static str {
    MACHINE_NAMES.get(index).copied().unwrap_or("UNKNOWN")
}

pub fn to_machine(name: &str) -> Result<usize, MpsError> {
    MACHINE_NAMES
        .iter()
        .position(|candidate| *candidate == name)
        .ok_or_else(|| MpsError::invalid(format!("unknown machine name '{name}'")))
}

pub fn to_light(name: &str) -> Result<LightColor, MpsError> {
    name.parse()
        .map_err(|_| MpsError::invalid(format!("unknown light name '{name}'")))
}

pub fn to_signal_state(name: &str) -> Result<LightState, MpsError> {
    name.parse()
        .map_err(|_| MpsError::invalid(format!("unknown signal state '{name}'")))
}

/// Register offset of a light inside a machine's signal block.
fn light_offset(light: LightColor) -> u16 {
    match light {
        LightColor::Red => 0,
        LightColor::Yellow => 1,
        LightColor::Green => 2,
    }
}

fn decode_rfid(words: &[u16]) -> Option<u32> {
    (words[0] & RFID_HAS_PUCK != 0).then(|| (u32::from(words[1]) << 16) | u32::from(words[2]))
}

pub struct SpsComm {
    links: Vec<Box<dyn RegisterLink>>,
    machines_per_plc: usize,
    rfid_write_timeout: Duration,
}

impl SpsComm {
    /// Open one Modbus/TCP link per configured PLC.
    pub fn connect(config: &SpsConfig, connect_timeout: Duration) -> Result<Self> {
        let mut links: Vec<Box<dyn RegisterLink>> = Vec::with_capacity(config.hosts.len());
        for host in &config.hosts {
            let mut link = TcpLink::new(host.as_str(), config.port, config.unit_id, connect_timeout);
            link.connect()
                .with_context(|| format!("Failed to connect to SPS {host}:{}", config.port))?;
            links.push(Box::new(link));
        }
        Self::with_links(
            links,
            config.machines_per_plc,
            Duration::from_millis(config.rfid_write_timeout_ms),
        )
    }

    pub fn with_links(
        links: Vec<Box<dyn RegisterLink>>,
        machines_per_plc: usize,
        rfid_write_timeout: Duration,
    ) -> Result<Self> {
        if machines_per_plc == 0 || machines_per_plc > SPS_NUM_MACHINES {
            return Err(MpsError::invalid(format!(
                "machines per PLC must be within 1..={SPS_NUM_MACHINES}, got {machines_per_plc}"
            ))
            .into());
        }
        Ok(Self {
            links,
            machines_per_plc,
            rfid_write_timeout,
        })
    }

    pub fn num_machines(&self) -> usize {
        self.links.len() * self.machines_per_plc
    }

    /// `(plc, local index)` of a global machine index.
    pub fn plc_index(&self, machine: usize) -> Result<(usize, usize), MpsError> {
        let limit = self.num_machines();
        if machine >= limit {
            return Err(MpsError::Bounds {
                index: machine,
                limit,
            });
        }
        Ok((machine / self.machines_per_plc, machine % self.machines_per_plc))
    }

    fn link(&mut self, machine: usize) -> Result<(&mut Box<dyn RegisterLink>, u16)> {
        let (plc, local) = self.plc_index(machine)?;
        Ok((&mut self.links[plc], local as u16))
    }

    /// Close and reopen every PLC link.
    pub fn try_reconnect(&mut self) -> Result<()> {
        for link in &mut self.links {
            link.close();
            link.connect()
                .with_context(|| format!("Failed to re-connect to SPS {}", link.endpoint()))?;
        }
        Ok(())
    }

    pub fn set_light(&mut self, machine: usize, light: LightColor, state: LightState) -> Result<()> {
        let (link, local) = self.link(machine)?;
        let address = OUT_REG_START_SIGNAL + local * OUT_REG_PER_SIGNAL + light_offset(light);
        let value = u16::from(state) << 8;
        link.write_holding(address, value)
            .with_context(|| format!("Failed to set light of {}", index_to_name(machine)))
    }

    pub fn set_light_by_name(&mut self, machine: &str, light: &str, state: &str) -> Result<()> {
        let machine = to_machine(machine)?;
        let light = to_light(light)?;
        let state = to_signal_state(state)?;
        self.set_light(machine, light, state)
    }

    pub fn reset_lights(&mut self) -> Result<()> {
        let values = vec![0u16; self.machines_per_plc * OUT_REG_PER_SIGNAL as usize];
        for link in &mut self.links {
            link.write_holdings(OUT_REG_START_SIGNAL, &values)
                .context("Failed to reset signal registers")?;
        }
        Ok(())
    }

    pub fn read_rfid(&mut self, machine: usize) -> Result<Option<u32>> {
        let (link, local) = self.link(machine)?;
        let words = link
            .read_holdings(IN_REG_START_RFID + local * IN_REG_PER_RFID, IN_REG_PER_RFID)
            .context("Failed to read RFID registers")?;
        Ok(decode_rfid(&words))
    }

    /// Ids of all sensors, [`NO_PUCK`] where no puck is present.
    pub fn read_rfids(&mut self) -> Result<Vec<u32>> {
        let count = self.machines_per_plc as u16 * IN_REG_PER_RFID;
        let mut ids = Vec::with_capacity(self.num_machines());
        for link in &mut self.links {
            let words = link
                .read_holdings(IN_REG_START_RFID, count)
                .context("Failed to read RFID registers")?;
            ids.extend(
                words
                    .chunks(IN_REG_PER_RFID as usize)
                    .map(|chunk| decode_rfid(chunk).unwrap_or(NO_PUCK)),
            );
        }
        Ok(ids)
    }

    /// Write a puck id and wait for the sensor to confirm.
    ///
    /// The write trigger is reset afterwards. Without confirmation within the
    /// configured timeout the trigger is reset as well and
    /// [`MpsError::Timeout`] is returned.
    pub fn write_rfid(&mut self, machine: usize, id: u32) -> Result<()> {
        let timeout = self.rfid_write_timeout;
        let (link, local) = self.link(machine)?;
        let out_addr = OUT_REG_START_RFID + local * OUT_REG_PER_RFID;
        let in_addr = IN_REG_START_RFID + local * IN_REG_PER_RFID;

        link.write_holdings(
            out_addr,
            &[RFID_WRITE_PUCK_ID, (id >> 16) as u16, (id & 0xFFFF) as u16],
        )
        .context("Failed to write RFID registers")?;
        thread::sleep(Duration::from_millis(2));

        let started = Instant::now();
        let confirmed = loop {
            let words = link
                .read_holdings(in_addr, IN_REG_PER_RFID)
                .context("Failed to read RFID registers")?;
            if words[0] & RFID_WRITE_DONE != 0 {
                break true;
            }
            if started.elapsed() >= timeout {
                break false;
            }
            thread::sleep(Duration::from_millis(1));
        };

        link.write_holdings(out_addr, &[RFID_RESET_WRITE, 0, 0])
            .context("Failed to reset RFID write trigger")?;

        if !confirmed {
            return Err(MpsError::Timeout {
                operation: format!("RFID write on {}", index_to_name(machine)),
                waited_ms: timeout.as_millis() as u64,
            }
            .into());
        }
        log::info!("Wrote RFID {id:#010x} on {}", index_to_name(machine));
        Ok(())
    }

    pub fn reset_rfids(&mut self) -> Result<()> {
        let values = vec![0u16; self.machines_per_plc * OUT_REG_PER_RFID as usize];
        for link in &mut self.links {
            link.write_holdings(OUT_REG_START_RFID, &values)
                .context("Failed to reset RFID registers")?;
        }
        Ok(())
    }
}
