use std::collections::HashMap;

use crate::protocol::types::{JobSpace, Register, RegisterField};

/// Namespace index of the CODESYS application variables.
pub const NAMESPACE: u16 = 4;

pub const LIVE_CONTROLLER: &str = "CPX-E-CEC-C1-PN";
pub const SIMULATION_CONTROLLER: &str = "CODESYS Control Win V3 x64";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLayout {
    /// Symbolic `|var|` ids published by the station PLC.
    Live,
    /// Path style ids of the CODESYS soft PLC.
    Simulation,
}

/// Immutable register → node id table for one PLC layout.
#[derive(Debug, Clone)]
pub struct NodeTable {
    layout: NodeLayout,
    by_register: HashMap<Register, String>,
    by_node: HashMap<String, Register>,
}

fn field_segments(field: RegisterField) -> &'static [&'static str] {
    match field {
        RegisterField::ActionId => &["p", "ActionId"],
        RegisterField::BarCode => &["p", "BarCode"],
        RegisterField::Data => &["p", "Data"],
        RegisterField::Data0 => &["p", "Data[0]"],
        RegisterField::Data1 => &["p", "Data[1]"],
        RegisterField::Error => &["p", "Error"],
        RegisterField::SlideCount => &["p", "SlideCnt"],
        RegisterField::StatusBusy => &["p", "Status", "Busy"],
        RegisterField::StatusEnable => &["p", "Status", "Enable"],
        RegisterField::StatusError => &["p", "Status", "Error"],
        RegisterField::StatusReady => &["p", "Status", "Ready"],
    }
}

impl NodeLayout {
    fn root(self, space: JobSpace) -> String {
        match self {
            NodeLayout::Live => format!("|var|{LIVE_CONTROLLER}.Application.G.{}", space.as_str()),
            NodeLayout::Simulation => format!(
                "DeviceSet/{SIMULATION_CONTROLLER}/Resources/Application/GlobalVars/G/{}",
                space.as_str()
            ),
        }
    }

    fn separator(self) -> &'static str {
        match self {
            NodeLayout::Live => ".",
            NodeLayout::Simulation => "/",
        }
    }

    fn controller(self) -> &'static str {
        match self {
            NodeLayout::Live => LIVE_CONTROLLER,
            NodeLayout::Simulation => SIMULATION_CONTROLLER,
        }
    }
}

impl NodeTable {
    pub fn new(layout: NodeLayout) -> Self {
        let mut by_register = HashMap::new();
        let mut by_node = HashMap::new();
        for register in Register::all() {
            let id = format!(
                "{}{}{}",
                layout.root(register.space),
                layout.separator(),
                field_segments(register.field).join(layout.separator())
            );
            by_node.insert(id.clone(), register);
            by_register.insert(register, id);
        }
        Self {
            layout,
            by_register,
            by_node,
        }
    }

    pub fn live() -> Self {
        Self::new(NodeLayout::Live)
    }

    pub fn simulation() -> Self {
        Self::new(NodeLayout::Simulation)
    }

    pub fn layout(&self) -> NodeLayout {
        self.layout
    }

    /// String identifier (namespace [`NAMESPACE`]) of a register's node.
    pub fn node_id(&self, register: Register) -> &str {
        // every register is inserted by `new`
        self.by_register
            .get(&register)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn resolve(&self, node_id: &str) -> Option<Register> {
        self.by_node.get(node_id).copied()
    }

    /// Browse path from the `Objects` folder, as shown by OPC-UA clients.
    pub fn browse_path(&self, register: Register) -> String {
        format!(
            "Objects/DeviceSet/{}/Resources/Application/GlobalVars/G/{}/{}",
            self.layout.controller(),
            register.space.as_str(),
            field_segments(register.field).join("/")
        )
    }
}
