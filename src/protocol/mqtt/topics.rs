use once_cell::sync::Lazy;
use regex::Regex;

use crate::protocol::types::{JobSpace, Register, RegisterField};

static STATUS_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<space>In|Basic)/(?P<field>Status/Busy|Status/Ready|BarCode|SlideCnt)$")
        .expect("static regex")
});

/// Register fields a station reports on its status topics.
pub const STATUS_FIELDS: [RegisterField; 4] = [
    RegisterField::StatusBusy,
    RegisterField::StatusReady,
    RegisterField::BarCode,
    RegisterField::SlideCount,
];

/// Topic naming for one machine: `{prefix}/{name}/...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
    name: String,
}

impl TopicScheme {
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
        }
    }

    pub fn machine_root(&self) -> String {
        format!("{}/{}", self.prefix, self.name)
    }

    pub fn command_topic(&self) -> String {
        format!("{}/Command", self.machine_root())
    }

    /// Topic path of a register below the job space folder.
    pub fn field_path(field: RegisterField) -> &'static str {
        match field {
            RegisterField::ActionId => "ActionId",
            RegisterField::BarCode => "BarCode",
            RegisterField::Data => "Data",
            RegisterField::Data0 => "Data/Data[0]",
            RegisterField::Data1 => "Data/Data[1]",
            RegisterField::Error => "Error",
            RegisterField::SlideCount => "SlideCnt",
            RegisterField::StatusBusy => "Status/Busy",
            RegisterField::StatusEnable => "Status/Enable",
            RegisterField::StatusError => "Status/Error",
            RegisterField::StatusReady => "Status/Ready",
        }
    }

    pub fn register_topic(&self, register: Register) -> String {
        format!(
            "{}/{}/{}",
            self.machine_root(),
            register.space.as_str(),
            Self::field_path(register.field)
        )
    }

    /// Every status topic of both job spaces.
    pub fn status_topics(&self) -> Vec<String> {
        [JobSpace::In, JobSpace::Basic]
            .into_iter()
            .flat_map(|space| {
                STATUS_FIELDS
                    .into_iter()
                    .map(move |field| Register::new(field, space))
            })
            .map(|register| self.register_topic(register))
            .collect()
    }

    /// Exact match of a status topic of this machine.
    pub fn parse_status_topic(&self, topic: &str) -> Option<Register> {
        let rest = topic
            .strip_prefix(self.machine_root().as_str())?
            .strip_prefix('/')?;
        let captures = STATUS_SUFFIX.captures(rest)?;
        let space = match &captures["space"] {
            "In" => JobSpace::In,
            _ => JobSpace::Basic,
        };
        let field = match &captures["field"] {
            "Status/Busy" => RegisterField::StatusBusy,
            "Status/Ready" => RegisterField::StatusReady,
            "BarCode" => RegisterField::BarCode,
            _ => RegisterField::SlideCount,
        };
        Some(Register::new(field, space))
    }
}

pub fn parse_bool(payload: &str) -> bool {
    payload.trim().eq_ignore_ascii_case("true")
}

/// Raw register value of a status payload.
pub fn parse_payload(register: Register, payload: &str) -> Option<u64> {
    match register.value_kind() {
        crate::protocol::types::ValueKind::Flag => Some(u64::from(parse_bool(payload))),
        _ => payload.trim().parse().ok(),
    }
}
