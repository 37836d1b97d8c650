/// Station specific translation of domain actions into instructions
///
/// Stations never talk to a backend. They only decide which [`Instruction`]
/// an action becomes, and reject actions their hardware cannot perform.
use std::fmt;

use crate::{
    core::error::MpsError,
    protocol::types::{
        mapping::{command, operation, timeout},
        BaseColor, ConveyorDirection, Instruction, MpsSensor, RingColor, StationType,
    },
};

pub const RING_FEEDERS: std::ops::RangeInclusive<u16> = 1..=2;
pub const DELIVERY_SLOTS: std::ops::RangeInclusive<u16> = 1..=3;
pub const STORAGE_SHELVES: std::ops::RangeInclusive<u16> = 0..=5;
pub const STORAGE_SLOTS: std::ops::RangeInclusive<u16> = 0..=7;

/// A station operation as requested by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationAction {
    GetBase(BaseColor),
    RetrieveCap,
    MountCap,
    MountRing { feeder: u16, color: RingColor },
    Deliver { slot: u16 },
    Retrieve { shelf: u16, slot: u16 },
    Store { shelf: u16, slot: u16 },
    Relocate {
        shelf: u16,
        slot: u16,
        target_shelf: u16,
        target_slot: u16,
    },
}

impl StationAction {
    /// Station type able to perform this action.
    pub fn station_type(&self) -> StationType {
        match self {
            StationAction::GetBase(_) => StationType::Base,
            StationAction::RetrieveCap | StationAction::MountCap => StationType::Cap,
            StationAction::MountRing { .. } => StationType::Ring,
            StationAction::Deliver { .. } => StationType::Delivery,
            StationAction::Retrieve { .. }
            | StationAction::Store { .. }
            | StationAction::Relocate { .. } => StationType::Storage,
        }
    }
}

impl fmt::Display for StationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationAction::GetBase(color) => write!(f, "get_base({color})"),
            StationAction::RetrieveCap => write!(f, "retrieve_cap"),
            StationAction::MountCap => write!(f, "mount_cap"),
            StationAction::MountRing { feeder, color } => {
                write!(f, "mount_ring({feeder}, {color})")
            }
            StationAction::Deliver { slot } => write!(f, "deliver_product({slot})"),
            StationAction::Retrieve { shelf, slot } => write!(f, "retrieve({shelf}, {slot})"),
            StationAction::Store { shelf, slot } => write!(f, "store({shelf}, {slot})"),
            StationAction::Relocate {
                shelf,
                slot,
                target_shelf,
                target_slot,
            } => write!(
                f,
                "relocate({shelf}, {slot}, {target_shelf}, {target_slot})"
            ),
        }
    }
}

/// Behaviour shared by all station types.
pub trait StationBehavior: Send + Sync {
    fn station_type(&self) -> StationType;

    /// Announce the station type to the controller.
    fn identify(&self) -> Instruction {
        Instruction::new(command::SET_TYPE).with_payload(self.station_type().type_code(), 0)
    }

    fn reset(&self) -> Instruction {
        self.identify()
    }

    fn conveyor_move(&self, direction: ConveyorDirection, sensor: MpsSensor) -> Instruction {
        Instruction::new(self.station_type().base_offset() + command::MOVE_CONVEYOR)
            .with_payload(sensor.into(), direction.into())
            .with_timeout(timeout::BAND)
    }

    /// Station specific part of [`perform`](StationBehavior::perform).
    ///
    /// Only called with actions whose station type matches.
    fn build(&self, action: StationAction) -> Result<Instruction, MpsError>;

    fn perform(&self, action: StationAction) -> Result<Instruction, MpsError> {
        if action.station_type() != self.station_type() {
            return Err(MpsError::invalid(format!(
                "{action} is not available on a {} station",
                self.station_type()
            )));
        }
        self.build(action)
    }
}

fn check_range(
    what: &str,
    value: u16,
    range: &std::ops::RangeInclusive<u16>,
) -> Result<u16, MpsError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(MpsError::invalid(format!(
            "{what} {value} outside {}..={}",
            range.start(),
            range.end()
        )))
    }
}

fn check_shelf_slot(shelf: u16, slot: u16) -> Result<(u16, u16), MpsError> {
    Ok((
        check_range("shelf", shelf, &STORAGE_SHELVES)?,
        check_range("slot", slot, &STORAGE_SLOTS)?,
    ))
}

/// Relocation packs a position into one word as `shelf * 10 + slot`.
fn storage_position(shelf: u16, slot: u16) -> Result<u16, MpsError> {
    let (shelf, slot) = check_shelf_slot(shelf, slot)?;
    Ok(shelf * 10 + slot)
}

fn unexpected(action: StationAction) -> MpsError {
    MpsError::invalid(format!("{action} reached the wrong station"))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BaseStation;

impl StationBehavior for BaseStation {
    fn station_type(&self) -> StationType {
        StationType::Base
    }

    fn build(&self, action: StationAction) -> Result<Instruction, MpsError> {
        match action {
            StationAction::GetBase(color) => Ok(Instruction::new(
                StationType::Base.base_offset() + operation::GET_BASE,
            )
            .with_payload(color.into(), 0)),
            other => Err(unexpected(other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CapStation;

impl StationBehavior for CapStation {
    fn station_type(&self) -> StationType {
        StationType::Cap
    }

    fn build(&self, action: StationAction) -> Result<Instruction, MpsError> {
        let mode = match action {
            StationAction::RetrieveCap => operation::CAP_RETRIEVE,
            StationAction::MountCap => operation::CAP_MOUNT,
            other => return Err(unexpected(other)),
        };
        Ok(
            Instruction::new(StationType::Cap.base_offset() + operation::CAP_ACTION)
                .with_payload(mode, 0),
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RingStation;

impl StationBehavior for RingStation {
    fn station_type(&self) -> StationType {
        StationType::Ring
    }

    fn build(&self, action: StationAction) -> Result<Instruction, MpsError> {
        match action {
            StationAction::MountRing { feeder, color } => {
                let feeder = check_range("feeder", feeder, &RING_FEEDERS)?;
                Ok(
                    Instruction::new(StationType::Ring.base_offset() + operation::MOUNT_RING)
                        .with_payload(feeder, color.into()),
                )
            }
            other => Err(unexpected(other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeliveryStation;

impl StationBehavior for DeliveryStation {
    fn station_type(&self) -> StationType {
        StationType::Delivery
    }

    fn build(&self, action: StationAction) -> Result<Instruction, MpsError> {
        match action {
            StationAction::Deliver { slot } => {
                let slot = check_range("slot", slot, &DELIVERY_SLOTS)?;
                Ok(
                    Instruction::new(StationType::Delivery.base_offset() | operation::DELIVER)
                        .with_payload(slot, 0),
                )
            }
            other => Err(unexpected(other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StorageStation;

impl StationBehavior for StorageStation {
    fn station_type(&self) -> StationType {
        StationType::Storage
    }

    fn build(&self, action: StationAction) -> Result<Instruction, MpsError> {
        let base = StationType::Storage.base_offset();
        match action {
            StationAction::Retrieve { shelf, slot } => {
                let (shelf, slot) = check_shelf_slot(shelf, slot)?;
                Ok(Instruction::new(base + operation::RETRIEVE).with_payload(shelf, slot))
            }
            StationAction::Store { shelf, slot } => {
                let (shelf, slot) = check_shelf_slot(shelf, slot)?;
                Ok(Instruction::new(base + operation::STORE).with_payload(shelf, slot))
            }
            StationAction::Relocate {
                shelf,
                slot,
                target_shelf,
                target_slot,
            } => Ok(Instruction::new(base + operation::RELOCATE).with_payload(
                storage_position(shelf, slot)?,
                storage_position(target_shelf, target_slot)?,
            )),
            other => Err(unexpected(other)),
        }
    }
}

/// Station behaviour for a configured station type.
pub fn station_for(station_type: StationType) -> Box<dyn StationBehavior> {
    match station_type {
        StationType::Base => Box::new(BaseStation),
        StationType::Ring => Box::new(RingStation),
        StationType::Cap => Box::new(CapStation),
        StationType::Delivery => Box::new(DeliveryStation),
        StationType::Storage => Box::new(StorageStation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_and_conveyor() {
        let station = station_for(StationType::Ring);
        assert_eq!(station.identify(), Instruction::new(10).with_payload(2, 0));
        assert_eq!(station.reset(), station.identify());

        let band = station.conveyor_move(ConveyorDirection::Backward, MpsSensor::Middle);
        assert_eq!((band.opcode, band.payload1, band.payload2), (202, 2, 2));
        assert_eq!(band.timeout_ms, 0);
    }

    #[test]
    fn test_station_opcodes() {
        let get = BaseStation.perform(StationAction::GetBase(BaseColor::Black)).unwrap();
        assert_eq!((get.opcode, get.payload1), (101, 3));

        let mount = CapStation.perform(StationAction::MountCap).unwrap();
        assert_eq!((mount.opcode, mount.payload1), (301, 2));

        let ring = RingStation
            .perform(StationAction::MountRing {
                feeder: 2,
                color: RingColor::Orange,
            })
            .unwrap();
        assert_eq!((ring.opcode, ring.payload1, ring.payload2), (203, 2, 3));

        let deliver = DeliveryStation
            .perform(StationAction::Deliver { slot: 3 })
            .unwrap();
        assert_eq!((deliver.opcode, deliver.payload1), (401, 3));

        let relocate = StorageStation
            .perform(StationAction::Relocate {
                shelf: 1,
                slot: 2,
                target_shelf: 5,
                target_slot: 7,
            })
            .unwrap();
        assert_eq!(
            (relocate.opcode, relocate.payload1, relocate.payload2),
            (550, 12, 57)
        );

        let retrieve = StorageStation
            .perform(StationAction::Retrieve { shelf: 3, slot: 4 })
            .unwrap();
        assert_eq!(
            (retrieve.opcode, retrieve.payload1, retrieve.payload2),
            (530, 3, 4)
        );
        let store = StorageStation
            .perform(StationAction::Store { shelf: 1, slot: 2 })
            .unwrap();
        assert_eq!((store.opcode, store.payload1, store.payload2), (540, 1, 2));
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(matches!(
            DeliveryStation.perform(StationAction::Deliver { slot: 4 }),
            Err(MpsError::InvalidArgument { .. })
        ));
        assert!(StorageStation
            .perform(StationAction::Store { shelf: 6, slot: 0 })
            .is_err());
        assert!(RingStation
            .perform(StationAction::MountRing {
                feeder: 0,
                color: RingColor::Blue,
            })
            .is_err());
        assert!(matches!(
            CapStation.perform(StationAction::GetBase(BaseColor::Red)),
            Err(MpsError::InvalidArgument { .. })
        ));
    }
}
