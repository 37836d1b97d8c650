use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use clap::ArgMatches;

use crate::{
    api::{
        factory::{create_machine_with, ConnectionMode},
        machine::Machine,
        sps::{index_to_name, to_light, to_machine, to_signal_state, SpsComm, NO_PUCK},
    },
    core::config::{CommConfig, MachineConfig},
    protocol::types::{BaseColor, ConveyorDirection, MpsSensor, RingColor, StationType},
};

#[derive(Debug, Serialize)]
struct EventLine<'a> {
    machine: &'a str,
    event: &'static str,
    value: u64,
}

#[derive(Debug, Serialize)]
struct RfidLine<'a> {
    machine: &'a str,
    id: Option<u32>,
}

fn parse_token<T: FromStr>(what: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| anyhow!("Unknown {what} '{raw}'"))
}

fn required<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a String> {
    matches
        .get_one::<String>(id)
        .ok_or_else(|| anyhow!("Missing argument <{id}>"))
}

fn required_u16(matches: &ArgMatches, id: &str) -> Result<u16> {
    matches
        .get_one::<u16>(id)
        .copied()
        .ok_or_else(|| anyhow!("Missing argument <{id}>"))
}

fn load_config(matches: &ArgMatches) -> Result<CommConfig> {
    match matches.get_one::<String>("config") {
        Some(path) => CommConfig::from_file(path),
        None => Ok(CommConfig::default()),
    }
}

/// Machines addressed by the command line.
///
/// `--host` describes an ad-hoc machine, `--machine` picks a configured one,
/// otherwise every configured machine is used.
fn target_machines(matches: &ArgMatches, config: &CommConfig) -> Result<Vec<MachineConfig>> {
    let name = matches.get_one::<String>("machine");
    if let Some(host) = matches.get_one::<String>("host") {
        let station_type = matches
            .get_one::<String>("station-type")
            .ok_or_else(|| anyhow!("--station-type is required with --host"))?;
        let mode = required(matches, "mode")?;
        return Ok(vec![MachineConfig {
            name: name.cloned().unwrap_or_else(|| "CLI".to_string()),
            station_type: parse_token::<StationType>("station type", station_type)?,
            host: host.clone(),
            port: matches
                .get_one::<u16>("port")
                .copied()
                .ok_or_else(|| anyhow!("--port is required with --host"))?,
            connection_mode: parse_token::<ConnectionMode>("connection mode", mode)?,
        }]);
    }
    match name {
        Some(name) => config
            .machine(name)
            .cloned()
            .map(|machine| vec![machine])
            .ok_or_else(|| anyhow!("Machine {name} is not configured")),
        None if config.machines.is_empty() => {
            Err(anyhow!("No machine selected, use --config, --machine or --host"))
        }
        None => Ok(config.machines.clone()),
    }
}

fn apply(machine: &Machine, action: &str, matches: &ArgMatches) -> Result<()> {
    match action {
        "reset" => machine.reset()?,
        "identify" => machine.identify()?,
        "light" => machine.set_light_by_name(
            required(matches, "color")?,
            required(matches, "state")?,
            matches.get_one::<u16>("blink-ms").copied().unwrap_or(0),
        )?,
        "reset-light" => machine.reset_light()?,
        "conveyor" => machine.conveyor_move(
            parse_token::<ConveyorDirection>("direction", required(matches, "direction")?)?,
            parse_token::<MpsSensor>("sensor", required(matches, "sensor")?)?,
        )?,
        "get-base" => {
            machine.get_base(parse_token::<BaseColor>("base color", required(matches, "color")?)?)?
        }
        "retrieve-cap" => machine.retrieve_cap()?,
        "mount-cap" => machine.mount_cap()?,
        "mount-ring" => machine.mount_ring(
            required_u16(matches, "feeder")?,
            parse_token::<RingColor>("ring color", required(matches, "color")?)?,
        )?,
        "deliver" => machine.deliver_product(required_u16(matches, "slot")?)?,
        "store" => machine.store(
            required_u16(matches, "shelf")?,
            required_u16(matches, "slot")?,
        )?,
        "retrieve" => machine.retrieve(
            required_u16(matches, "shelf")?,
            required_u16(matches, "slot")?,
        )?,
        "relocate" => machine.relocate(
            required_u16(matches, "shelf")?,
            required_u16(matches, "slot")?,
            required_u16(matches, "target-shelf")?,
            required_u16(matches, "target-slot")?,
        )?,
        other => return Err(anyhow!("Unsupported action {other}")),
    }
    Ok(())
}

fn print_event(json: bool, machine: &str, event: &'static str, value: u64) {
    if json {
        match serde_json::to_string(&EventLine {
            machine,
            event,
            value,
        }) {
            Ok(line) => println!("{line}"),
            Err(err) => log::warn!("Failed to encode event: {err}"),
        }
    } else {
        println!("{machine}: {event} = {value}");
    }
}

fn install_watchers(machine: &Machine, json: bool) -> Result<()> {
    let name: Arc<str> = Arc::from(machine.name());

    let label = name.clone();
    machine.register_busy_callback(Some(Arc::new(move |busy: bool| {
        print_event(json, &label, "busy", u64::from(busy))
    })));
    let label = name.clone();
    machine.register_ready_callback(Some(Arc::new(move |ready: bool| {
        print_event(json, &label, "ready", u64::from(ready))
    })));
    let label = name.clone();
    machine.register_barcode_callback(Some(Arc::new(move |code: u64| {
        print_event(json, &label, "barcode", code)
    })));
    if machine.station_type() == StationType::Ring {
        let label = name;
        machine.register_slide_callback(Some(Arc::new(move |count: u32| {
            print_event(json, &label, "slide", u64::from(count))
        })))?;
    }
    Ok(())
}

fn wait_for_interrupt() -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}

fn run_machine_action(action: &str, matches: &ArgMatches, config: &CommConfig) -> Result<()> {
    let json = matches.get_flag("json");
    let drain = Duration::from_secs(
        matches
            .get_one::<u64>("drain-timeout")
            .copied()
            .unwrap_or(10),
    );

    let mut machines = Vec::new();
    for target in target_machines(matches, config)? {
        machines.push(create_machine_with(config, &target)?);
    }

    if action == "watch" {
        for machine in &machines {
            install_watchers(machine, json)?;
        }
        log::info!("Watching {} machine(s), press Ctrl-C to stop", machines.len());
        wait_for_interrupt()?;
        drop(machines);
        return Ok(());
    }

    for machine in &machines {
        apply(machine, action, matches)
            .with_context(|| format!("{action} on {} failed", machine.name()))?;
    }
    for machine in machines {
        let name = machine.name().to_string();
        if !machine.shutdown_within(drain)? {
            log::warn!("[{name}] Gave up on queued commands after {drain:?}");
        }
    }
    Ok(())
}

fn connect_sps(matches: &ArgMatches, config: &CommConfig) -> Result<SpsComm> {
    let mut sps = config.sps.clone();
    if let Some(host) = matches.get_one::<String>("host") {
        sps.hosts = vec![host.clone()];
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        sps.port = *port;
    }
    if sps.hosts.is_empty() {
        return Err(anyhow!("No SPS host configured, use --host or [sps] hosts"));
    }
    SpsComm::connect(&sps, config.timing.connect_timeout())
}

fn run_sps_action(action: &str, matches: &ArgMatches, config: &CommConfig) -> Result<()> {
    let json = matches.get_flag("json");
    let mut sps = connect_sps(matches, config)?;
    match action {
        "sps-light" => sps.set_light_by_name(
            required(matches, "sps-machine")?,
            required(matches, "color")?,
            required(matches, "state")?,
        )?,
        "sps-reset-lights" => sps.reset_lights()?,
        "sps-read-rfid" => {
            let ids: Vec<(usize, Option<u32>)> = match matches.get_one::<String>("sps-machine") {
                Some(name) => {
                    let index = to_machine(name)?;
                    vec![(index, sps.read_rfid(index)?)]
                }
                None => sps
                    .read_rfids()?
                    .into_iter()
                    .enumerate()
                    .map(|(index, id)| (index, (id != NO_PUCK).then_some(id)))
                    .collect(),
            };
            for (index, id) in ids {
                let machine = index_to_name(index);
                if json {
                    println!("{}", serde_json::to_string(&RfidLine { machine, id })?);
                } else {
                    match id {
                        Some(id) => println!("{machine}: {id:#010x}"),
                        None => println!("{machine}: no puck"),
                    }
                }
            }
        }
        "sps-write-rfid" => {
            let index = to_machine(required(matches, "sps-machine")?)?;
            let id = matches
                .get_one::<u32>("id")
                .copied()
                .ok_or_else(|| anyhow!("Missing argument <id>"))?;
            sps.write_rfid(index, id)?;
        }
        other => return Err(anyhow!("Unsupported SPS action {other}")),
    }
    Ok(())
}

/// Validate name based SPS arguments before touching the network.
fn check_sps_names(matches: &ArgMatches) -> Result<()> {
    if let Some(name) = matches.get_one::<String>("sps-machine") {
        to_machine(name)?;
    }
    if let Some(color) = matches.get_one::<String>("color") {
        to_light(color)?;
    }
    if let Some(state) = matches.get_one::<String>("state") {
        to_signal_state(state)?;
    }
    Ok(())
}

/// Execute the subcommand selected on the command line.
pub fn run(matches: &ArgMatches) -> Result<()> {
    let (action, sub) = matches
        .subcommand()
        .ok_or_else(|| anyhow!("No action given"))?;
    let config = load_config(sub)?;
    if action.starts_with("sps-") {
        check_sps_names(sub)?;
        run_sps_action(action, sub, &config)
    } else {
        run_machine_action(action, sub, &config)
    }
}
