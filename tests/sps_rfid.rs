use anyhow::Result;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};

use mps_comm::{
    api::sps::{
        SpsComm, IN_REG_START_RFID, NO_PUCK, OUT_REG_START_RFID, OUT_REG_START_SIGNAL,
        RFID_HAS_PUCK, RFID_RESET_WRITE, RFID_WRITE_DONE, RFID_WRITE_PUCK_ID,
    },
    core::error::MpsError,
    protocol::{
        modbus::RegisterLink,
        types::{LightColor, LightState},
    },
};

#[derive(Default)]
struct PlcState {
    registers: HashMap<u16, u16>,
    writes: Vec<(u16, Vec<u16>)>,
    /// Acknowledge RFID writes on the n-th status read after the trigger.
    ack_after: Option<usize>,
    reads_since_trigger: usize,
}

#[derive(Clone, Default)]
struct FakePlc(Arc<Mutex<PlcState>>);

impl RegisterLink for FakePlc {
    fn endpoint(&self) -> String {
        "fake-plc:502".to_string()
    }

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn is_open(&self) -> bool {
        true
    }

    fn read_holdings(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let mut plc = self.0.lock();
        plc.reads_since_trigger += 1;
        if let Some(after) = plc.ack_after {
            if plc.reads_since_trigger >= after {
                let flags = plc.registers.entry(start).or_default();
                *flags |= RFID_WRITE_DONE;
            }
        }
        Ok((start..start + count)
            .map(|address| plc.registers.get(&address).copied().unwrap_or(0))
            .collect())
    }

    fn write_holdings(&mut self, start: u16, values: &[u16]) -> Result<()> {
        let mut plc = self.0.lock();
        for (offset, value) in values.iter().enumerate() {
            plc.registers.insert(start + offset as u16, *value);
        }
        plc.writes.push((start, values.to_vec()));
        plc.reads_since_trigger = 0;
        Ok(())
    }
}

fn sps_with(plcs: &[FakePlc], per_plc: usize) -> Result<SpsComm> {
    let links: Vec<Box<dyn RegisterLink>> = plcs
        .iter()
        .map(|plc| Box::new(plc.clone()) as Box<dyn RegisterLink>)
        .collect();
    SpsComm::with_links(links, per_plc, Duration::from_millis(200))
}

#[test]
fn test_write_rfid_waits_for_ack_and_resets() -> Result<()> {
    let plc = FakePlc::default();
    plc.0.lock().ack_after = Some(3);
    let mut sps = sps_with(&[plc.clone()], 16)?;

    sps.write_rfid(0, 0xDEAD_BEEF)?;

    let state = plc.0.lock();
    assert_eq!(
        state.writes,
        vec![
            (OUT_REG_START_RFID, vec![RFID_WRITE_PUCK_ID, 0xDEAD, 0xBEEF]),
            (OUT_REG_START_RFID, vec![RFID_RESET_WRITE, 0, 0]),
        ]
    );
    Ok(())
}

#[test]
fn test_write_rfid_without_ack_times_out() -> Result<()> {
    let plc = FakePlc::default();
    let mut sps = sps_with(&[plc.clone()], 16)?;

    let err = sps.write_rfid(2, 7).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MpsError>(),
        Some(MpsError::Timeout { .. })
    ));
    // the trigger is withdrawn even without an acknowledge
    let state = plc.0.lock();
    assert_eq!(
        state.writes.last(),
        Some(&(OUT_REG_START_RFID + 6, vec![RFID_RESET_WRITE, 0, 0]))
    );
    Ok(())
}

#[test]
fn test_read_rfids_reports_missing_pucks() -> Result<()> {
    let plc = FakePlc::default();
    {
        let mut state = plc.0.lock();
        let base = IN_REG_START_RFID + 3;
        state.registers.insert(base, RFID_HAS_PUCK);
        state.registers.insert(base + 1, 0x0012);
        state.registers.insert(base + 2, 0x3456);
    }
    let mut sps = sps_with(&[plc], 16)?;

    assert_eq!(sps.read_rfid(1)?, Some(0x0012_3456));
    assert_eq!(sps.read_rfid(0)?, None);
    let ids = sps.read_rfids()?;
    assert_eq!(ids.len(), 16);
    assert_eq!(ids[1], 0x0012_3456);
    assert!(ids.iter().enumerate().all(|(i, id)| i == 1 || *id == NO_PUCK));
    Ok(())
}

#[test]
fn test_lights_are_sharded_across_plcs() -> Result<()> {
    let plcs = [FakePlc::default(), FakePlc::default()];
    let mut sps = sps_with(&plcs, 8)?;

    assert_eq!(sps.plc_index(9)?, (1, 1));
    assert_eq!(
        sps.plc_index(16),
        Err(MpsError::Bounds {
            index: 16,
            limit: 16
        })
    );

    sps.set_light(9, LightColor::Green, LightState::Blink)?;
    sps.set_light_by_name("M1", "RED", "ON")?;
    assert!(sps.set_light(16, LightColor::Red, LightState::On).is_err());

    assert_eq!(
        plcs[1].0.lock().writes,
        vec![(OUT_REG_START_SIGNAL + 3 + 2, vec![0x0200])]
    );
    assert_eq!(
        plcs[0].0.lock().writes,
        vec![(OUT_REG_START_SIGNAL, vec![0x0100])]
    );
    Ok(())
}
