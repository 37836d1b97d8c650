use std::fmt;

use strum::{EnumIter, IntoEnumIterator};

use super::mapping::station_base;

/// The two job areas every MPS PLC exposes.
///
/// Station specific jobs live in `In`, station independent ones (lights,
/// identification, reset) in `Basic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum JobSpace {
    In,
    Basic,
}

impl JobSpace {
    pub fn for_opcode(opcode: u16) -> Self {
        if opcode < station_base::BASE {
            JobSpace::Basic
        } else {
            JobSpace::In
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobSpace::In => "In",
            JobSpace::Basic => "Basic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum RegisterField {
    ActionId,
    BarCode,
    Data,
    Data0,
    Data1,
    Error,
    SlideCount,
    StatusBusy,
    StatusEnable,
    StatusError,
    StatusReady,
}

/// How a register's raw value is handed to callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Flag,
    Code,
    Count,
}

impl RegisterField {
    pub fn value_kind(self) -> ValueKind {
        match self {
            RegisterField::StatusBusy
            | RegisterField::StatusEnable
            | RegisterField::StatusError
            | RegisterField::StatusReady => ValueKind::Flag,
            RegisterField::SlideCount => ValueKind::Count,
            _ => ValueKind::Code,
        }
    }
}

/// A monitorable or writable PLC value, independent of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register {
    pub field: RegisterField,
    pub space: JobSpace,
}

impl Register {
    pub const ACTION_ID_IN: Register = Register::new(RegisterField::ActionId, JobSpace::In);
    pub const BARCODE_IN: Register = Register::new(RegisterField::BarCode, JobSpace::In);
    pub const DATA0_IN: Register = Register::new(RegisterField::Data0, JobSpace::In);
    pub const DATA1_IN: Register = Register::new(RegisterField::Data1, JobSpace::In);
    pub const ERROR_IN: Register = Register::new(RegisterField::Error, JobSpace::In);
    pub const SLIDECOUNT_IN: Register = Register::new(RegisterField::SlideCount, JobSpace::In);
    pub const STATUS_BUSY_IN: Register = Register::new(RegisterField::StatusBusy, JobSpace::In);
    pub const STATUS_ENABLE_IN: Register =
        Register::new(RegisterField::StatusEnable, JobSpace::In);
    pub const STATUS_ERROR_IN: Register = Register::new(RegisterField::StatusError, JobSpace::In);
    pub const STATUS_READY_IN: Register = Register::new(RegisterField::StatusReady, JobSpace::In);
    pub const STATUS_BUSY_BASIC: Register =
        Register::new(RegisterField::StatusBusy, JobSpace::Basic);
    pub const STATUS_READY_BASIC: Register =
        Register::new(RegisterField::StatusReady, JobSpace::Basic);

    pub const fn new(field: RegisterField, space: JobSpace) -> Self {
        Self { field, space }
    }

    /// The same field in the other job space.
    pub const fn in_space(self, space: JobSpace) -> Self {
        Self::new(self.field, space)
    }

    pub fn value_kind(&self) -> ValueKind {
        self.field.value_kind()
    }

    /// Every register of both job spaces.
    pub fn all() -> impl Iterator<Item = Register> {
        JobSpace::iter()
            .flat_map(|space| RegisterField::iter().map(move |field| Register::new(field, space)))
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = match self.field {
            RegisterField::ActionId => "ACTION_ID",
            RegisterField::BarCode => "BARCODE",
            RegisterField::Data => "DATA",
            RegisterField::Data0 => "DATA0",
            RegisterField::Data1 => "DATA1",
            RegisterField::Error => "ERROR",
            RegisterField::SlideCount => "SLIDECOUNT",
            RegisterField::StatusBusy => "STATUS_BUSY",
            RegisterField::StatusEnable => "STATUS_ENABLE",
            RegisterField::StatusError => "STATUS_ERROR",
            RegisterField::StatusReady => "STATUS_READY",
        };
        let space = match self.space {
            JobSpace::In => "IN",
            JobSpace::Basic => "BASIC",
        };
        write!(f, "{field}_{space}")
    }
}
