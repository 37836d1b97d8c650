/// Machine construction from a connection mode
///
/// The factory is the only place that knows which backend a connection mode
/// stands for; everything after construction goes through [`Machine`].
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumIter, EnumString};

use crate::{
    api::machine::Machine,
    core::{
        config::{CommConfig, MachineConfig},
        error::MpsError,
        wait::AbortToken,
    },
    protocol::{
        backend::ProtocolBackend,
        mockup::MockupBackend,
        modbus::{ModbusBackend, TcpLink},
        mqtt::{BrokerOptions, MqttBackend, MqttLegacyBackend, RumqttConnector, TopicScheme},
        types::StationType,
    },
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ConnectionMode {
    /// OPC-UA against the station PLC.
    Plc,
    /// OPC-UA against the CODESYS soft PLC.
    PlcSimulation,
    Mockup,
    Mqtt,
    MqttLegacy,
    /// Job registers over Modbus/TCP.
    Modbus,
}

/// Unit id the station PLCs answer on.
const STATION_UNIT_ID: u8 = 1;

fn check_endpoint(host: &str, port: u16) -> Result<(), MpsError> {
    let parsed = url::Url::parse(&format!("tcp://{host}:{port}"))
        .map_err(|err| MpsError::invalid(format!("bad endpoint {host}:{port}: {err}")))?;
    match parsed.host_str() {
        Some(parsed_host) if !parsed_host.is_empty() => Ok(()),
        _ => Err(MpsError::invalid(format!("bad endpoint {host}:{port}"))),
    }
}

#[cfg(feature = "opcua")]
fn opcua_backend(
    config: &CommConfig,
    host: &str,
    port: u16,
    simulation: bool,
) -> Result<Box<dyn ProtocolBackend>> {
    use crate::protocol::opcua::{NodeTable, OpcuaBackend, UaConnector};
    use std::sync::Arc;

    let table = if simulation {
        NodeTable::simulation()
    } else {
        NodeTable::live()
    };
    let connector = UaConnector::new(
        config.opcua.application_name.clone(),
        config.opcua.subscription_interval_ms,
    );
    Ok(Box::new(OpcuaBackend::new(
        host,
        port,
        Arc::new(table),
        Box::new(connector),
    )))
}

#[cfg(not(feature = "opcua"))]
fn opcua_backend(
    _config: &CommConfig,
    _host: &str,
    _port: u16,
    _simulation: bool,
) -> Result<Box<dyn ProtocolBackend>> {
    Err(anyhow::anyhow!(
        "OPC-UA support is not compiled in, enable the `opcua` feature"
    ))
}

fn build_backend(
    config: &CommConfig,
    name: &str,
    host: &str,
    port: u16,
    mode: ConnectionMode,
    abort: &AbortToken,
) -> Result<Box<dyn ProtocolBackend>> {
    let broker = || BrokerOptions {
        host: host.to_string(),
        port,
        keep_alive: Duration::from_secs(config.mqtt.keep_alive_secs),
        connect_timeout: config.timing.connect_timeout(),
    };

    Ok(match mode {
        ConnectionMode::Plc => opcua_backend(config, host, port, false)?,
        ConnectionMode::PlcSimulation => opcua_backend(config, host, port, true)?,
        ConnectionMode::Mockup => Box::new(MockupBackend::new(config.mockup.exec_speed)),
        ConnectionMode::Mqtt => Box::new(MqttBackend::new(
            Box::new(RumqttConnector::new(broker())),
            TopicScheme::new(config.mqtt.topic_prefix.as_str(), name),
        )),
        ConnectionMode::MqttLegacy => Box::new(MqttLegacyBackend::new(
            Box::new(RumqttConnector::new(broker())),
            TopicScheme::new(config.mqtt.topic_prefix.as_str(), name),
            Duration::from_millis(config.mqtt.publish_delay_ms),
        )),
        ConnectionMode::Modbus => {
            let link = TcpLink::new(host, port, STATION_UNIT_ID, config.timing.connect_timeout());
            Box::new(
                ModbusBackend::new(Box::new(link), abort.clone()).with_poll_interval(
                    Duration::from_millis(config.timing.poll_interval_ms.max(1)),
                ),
            )
        }
    })
}

/// Create a machine with default settings.
pub fn create_machine(
    name: &str,
    station_type: StationType,
    ip: &str,
    port: u16,
    mode: ConnectionMode,
) -> Result<Machine> {
    create_machine_with(
        &CommConfig::default(),
        &MachineConfig {
            name: name.to_string(),
            station_type,
            host: ip.to_string(),
            port,
            connection_mode: mode,
        },
    )
}

pub fn create_machine_with(config: &CommConfig, machine: &MachineConfig) -> Result<Machine> {
    config.validate()?;
    if machine.connection_mode != ConnectionMode::Mockup {
        check_endpoint(&machine.host, machine.port)?;
    }
    let abort = AbortToken::new();
    let backend = build_backend(
        config,
        &machine.name,
        &machine.host,
        machine.port,
        machine.connection_mode,
        &abort,
    )
    .with_context(|| format!("Failed to set up backend for {}", machine.name))?;
    Machine::new(
        machine.name.clone(),
        machine.station_type,
        backend,
        config.timing.retry_policy(),
        abort,
    )
}

/// Create every machine of a configuration, stopping at the first failure.
pub fn create_machines(config: &CommConfig) -> Result<Vec<Machine>> {
    config
        .machines
        .iter()
        .map(|machine| create_machine_with(config, machine))
        .collect()
}
