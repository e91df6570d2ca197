use std::fmt::{self, Display};

use serde::Serialize;
use serde_repr::Deserialize_repr;

/// Status codes shared by every device and parser operation.
///
/// The set is closed: every failure in the crate maps onto exactly one of
/// these values.
#[repr(i32)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Status {
    Success = 0,
    Done = 1,
    Unsupported = -1,
    InvalidArgs = -2,
    NoMemory = -3,
    NoDevice = -4,
    NoAccess = -5,
    Io = -6,
    Timeout = -7,
    Protocol = -8,
    DataFormat = -9,
    Cancelled = -10,
}

impl TryFrom<i32> for Status {
    type Error = String;
    fn try_from(value: i32) -> Result<Status, Self::Error> {
        let result = match value {
            0 => Self::Success,
            1 => Self::Done,
            -1 => Self::Unsupported,
            -2 => Self::InvalidArgs,
            -3 => Self::NoMemory,
            -4 => Self::NoDevice,
            -5 => Self::NoAccess,
            -6 => Self::Io,
            -7 => Self::Timeout,
            -8 => Self::Protocol,
            -9 => Self::DataFormat,
            -10 => Self::Cancelled,
            _ => return Err(format!("Invalid status: {value}")),
        };

        Ok(result)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::Done => "done",
            Self::Unsupported => "unsupported",
            Self::InvalidArgs => "invalid arguments",
            Self::NoMemory => "out of memory",
            Self::NoDevice => "no device found",
            Self::NoAccess => "access denied",
            Self::Io => "input/output error",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol error",
            Self::DataFormat => "data format error",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{text}")
    }
}

#[repr(u32)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize_repr, Hash, Ord, PartialOrd)]
pub enum Transport {
    None = 0,
    Serial = 1 << 0,
    Usb = 1 << 1,
    UsbHid = 1 << 2,
    Irda = 1 << 3,
    Bluetooth = 1 << 4,
    Ble = 1 << 5,
}

impl Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let output = match self {
            Transport::None => "None",
            Transport::Serial => "Serial",
            Transport::Usb => "USB",
            Transport::UsbHid => "USB Hid",
            Transport::Irda => "IR",
            Transport::Bluetooth => "Bluetooth",
            Transport::Ble => "Bluetooth LE",
        };

        write!(f, "{output}")
    }
}

impl From<u32> for Transport {
    fn from(value: u32) -> Self {
        match value {
            0x01 => Self::Serial,
            0x02 => Self::Usb,
            0x04 => Self::UsbHid,
            0x08 => Self::Irda,
            0x10 => Self::Bluetooth,
            0x20 => Self::Ble,
            _ => Self::None,
        }
    }
}

impl Transport {
    pub fn vec_from_bitflag(value: u32) -> Vec<Transport> {
        let mut transports = Vec::new();

        if value & (Transport::Usb as u32) != 0 {
            transports.push(Self::Usb);
        }
        if value & (Self::UsbHid as u32) != 0 {
            transports.push(Self::UsbHid);
        }
        if value & (Self::Ble as u32) != 0 {
            transports.push(Self::Ble);
        }
        if value & (Self::Bluetooth as u32) != 0 {
            transports.push(Self::Bluetooth);
        }
        if value & (Self::Serial as u32) != 0 {
            transports.push(Self::Serial);
        }
        if value & (Self::Irda as u32) != 0 {
            transports.push(Self::Irda);
        }

        transports
    }
}

/// Device family. All driver and parser dispatch keys off this tag.
///
/// The upper half of the discriminant is the vendor, the lower half the
/// family within that vendor.
#[repr(u32)]
#[derive(
    Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize_repr, Default, Hash, Ord, PartialOrd,
)]
pub enum Family {
    #[default]
    None = 0,

    // Suunto
    SuuntoSolution = 1 << 16,
    SuuntoEon,
    SuuntoVyper,
    SuuntoVyper2,

    // Uwatec
    UwatecAladin = 2 << 16,
    UwatecMemoMouse,
    UwatecSmart,

    // Oceanic
    OceanicAtom2 = 3 << 16,

    // Cressi
    CressiGoa = 4 << 16,
}

impl From<u32> for Family {
    fn from(value: u32) -> Self {
        match value {
            0x00010000 => Family::SuuntoSolution,
            0x00010001 => Family::SuuntoEon,
            0x00010002 => Family::SuuntoVyper,
            0x00010003 => Family::SuuntoVyper2,

            0x00020000 => Family::UwatecAladin,
            0x00020001 => Family::UwatecMemoMouse,
            0x00020002 => Family::UwatecSmart,

            0x00030000 => Family::OceanicAtom2,

            0x00040000 => Family::CressiGoa,

            _ => Family::None,
        }
    }
}

impl Family {
    /// Short machine name, used for fingerprint cache files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SuuntoSolution => "suunto-solution",
            Self::SuuntoEon => "suunto-eon",
            Self::SuuntoVyper => "suunto-vyper",
            Self::SuuntoVyper2 => "suunto-vyper2",
            Self::UwatecAladin => "uwatec-aladin",
            Self::UwatecMemoMouse => "uwatec-memomouse",
            Self::UwatecSmart => "uwatec-smart",
            Self::OceanicAtom2 => "oceanic-atom2",
            Self::CressiGoa => "cressi-goa",
        }
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Profile event types reported inside sample streams.
#[repr(u32)]
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Serialize, Deserialize_repr)]
pub enum EventKind {
    #[default]
    None = 0,
    Deco,
    Rbt,
    Ascent,
    Ceiling,
    Workload,
    Transmitter,
    Violation,
    Bookmark,
    Surface,
    SafetyStop,
    GasChange,
    SafetyStopVoluntary,
    SafetyStopMandatory,
    DeepStop,
    CeilingSafetyStop,
    Floor,
    DiveTime,
    MaxDepth,
    Olf,
    Po2,
    AirTime,
    Rgbm,
    Heading,
    TissueLevel,
}

impl From<u32> for EventKind {
    fn from(value: u32) -> Self {
        if value <= EventKind::TissueLevel as u32 {
            // Discriminants are dense, so a checked transmute-by-match is
            // not worth the noise.
            [
                Self::None,
                Self::Deco,
                Self::Rbt,
                Self::Ascent,
                Self::Ceiling,
                Self::Workload,
                Self::Transmitter,
                Self::Violation,
                Self::Bookmark,
                Self::Surface,
                Self::SafetyStop,
                Self::GasChange,
                Self::SafetyStopVoluntary,
                Self::SafetyStopMandatory,
                Self::DeepStop,
                Self::CeilingSafetyStop,
                Self::Floor,
                Self::DiveTime,
                Self::MaxDepth,
                Self::Olf,
                Self::Po2,
                Self::AirTime,
                Self::Rgbm,
                Self::Heading,
                Self::TissueLevel,
            ][value as usize]
        } else {
            Self::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for code in -10..=1 {
            if let Ok(status) = Status::try_from(code) {
                assert_eq!(status as i32, code);
            }
        }
        assert!(Status::try_from(42).is_err());
    }

    #[test]
    fn test_family_from_u32() {
        assert_eq!(Family::from(0x00010002), Family::SuuntoVyper);
        assert_eq!(Family::from(0x00020002), Family::UwatecSmart);
        assert_eq!(Family::from(0xdeadbeef), Family::None);
    }

    #[test]
    fn test_transport_bitflag() {
        let transports = Transport::vec_from_bitflag(
            Transport::Serial as u32 | Transport::Irda as u32,
        );
        assert_eq!(transports, vec![Transport::Serial, Transport::Irda]);
    }
}
