use std::{
    collections::HashMap,
    fmt::{self, Display},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::common::EventKind;

/// One fully parsed dive: summary fields plus the sample rows.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Dive {
    pub fingerprint: Fingerprint,
    pub start: jiff::Timestamp,
    pub duration: Duration,
    pub max_depth: f64,
    pub avg_depth: Option<f64>,
    pub gasmixes: Vec<Gasmix>,
    pub atmospheric_pressure: Option<f64>,
    pub temperature_surface: Option<f64>,
    pub temperature_minimum: Option<f64>,
    pub temperature_maximum: Option<f64>,
    pub tanks: Vec<Tank>,
    pub dive_mode: DiveMode,
    pub deco_model: DecoModel,
    pub salinity: Option<Salinity>,
    pub samples: Vec<DiveSample>,
    pub metadata: HashMap<String, String>,
}

#[derive(Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub(crate) data: Vec<u8>,
}

impl Fingerprint {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl TryFrom<&str> for Fingerprint {
    type Error = std::num::ParseIntError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            data: hex_string_to_bytes(value)?,
        })
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = std::num::ParseIntError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<&[u8]> for Fingerprint {
    fn from(value: &[u8]) -> Self {
        Self {
            data: value.to_vec(),
        }
    }
}

impl From<Vec<u8>> for Fingerprint {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", bytes_to_hex(&self.data))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint(0x{})", bytes_to_hex(&self.data))
    }
}

/// Hex helpers shared by the fingerprint cache and the demo binaries.
pub fn hex_string_to_bytes(hex: &str) -> std::result::Result<Vec<u8>, std::num::ParseIntError> {
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..(i + 2).min(hex.len())], 16))
        .collect()
}

pub fn bytes_to_hex(data: &[u8]) -> String {
    let mut hex_string = String::new();
    for byte in data {
        hex_string.push_str(&format!("{byte:02X}"));
    }
    hex_string
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Salinity {
    pub kind: SalinityKind,
    pub density: f64,
}

impl Display for Salinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.density)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SalinityKind {
    #[default]
    Fresh,
    Salt,
}

impl Display for SalinityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Salt => write!(f, "salt"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum DiveMode {
    #[default]
    None,
    Freedive,
    Gauge,
    OC,
    CCR,
    SCR,
}

impl From<String> for DiveMode {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "freedive" => Self::Freedive,
            "gauge" => Self::Gauge,
            "oc" => Self::OC,
            "ccr" => Self::CCR,
            "scr" => Self::SCR,
            _ => Self::None,
        }
    }
}

impl fmt::Display for DiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::None => "None",
                Self::Freedive => "Freedive",
                Self::Gauge => "Gauge",
                Self::OC => "OC",
                Self::CCR => "CCR",
                Self::SCR => "SCR",
            }
        )
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecoModel {
    #[default]
    None,

    Buhlmann {
        conservatism: i32,
        low: u32,
        high: u32,
    },

    Vpm {
        conservatism: i32,
    },

    Rgbm {
        conservatism: i32,
    },

    Dciem {
        conservatism: i32,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tank {
    pub gasmix_idx: Option<usize>,
    pub kind: TankKind,
    pub volume: f64,         // Volume (liter)
    pub work_pressure: f64,  // Work pressure (bar)
    pub begin_pressure: f64, // Begin pressure (bar)
    pub end_pressure: f64,   // End pressure (bar)
    pub usage: TankUsage,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TankKind {
    #[default]
    None,
    Metric,
    Imperial,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TankUsage {
    #[default]
    None,
    Sidemount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gasmix {
    pub helium: f64,
    pub oxygen: f64,
    pub nitrogen: f64,
    pub usage: GasUsage,
}

impl Gasmix {
    /// Open-circuit mix from an oxygen percentage; 0 means plain air.
    pub fn from_o2_percent(percent: u8) -> Self {
        let oxygen = if percent == 0 { 0.21 } else { percent as f64 / 100.0 };
        Self {
            helium: 0.,
            oxygen,
            nitrogen: 1.0 - oxygen,
            usage: GasUsage::None,
        }
    }
}

impl Default for Gasmix {
    fn default() -> Self {
        Self {
            helium: 0.,
            oxygen: 0.21,
            nitrogen: 0.79,
            usage: GasUsage::default(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GasUsage {
    #[default]
    None,
    Oxygen,
    Diluent,
    OpenCircuit,
}

impl fmt::Display for GasUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Oxygen => write!(f, "Oxygen"),
            Self::Diluent => write!(f, "Diluent"),
            Self::OpenCircuit => write!(f, "Open Circuit"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiveEvent {
    pub time: Duration,
    pub kind: EventKind,
    pub flags: u32,
    pub value: u32,
}

/// One aggregated sample row, as delivered to applications.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DiveSample {
    pub time: Duration,
    pub depth: f64,
    pub gasmix: Option<Gasmix>,
    pub temperature: Option<f64>,
    pub events: Vec<DiveEvent>,
    pub rbt: Option<Duration>,
    pub heartbeat: Option<u16>,
    pub bearing: Option<u16>,
    pub setpoint: Option<f64>,
    pub ppo2: Vec<Ppo2>,
    pub pressure: Vec<(usize, f64)>,
    pub cns: Option<f64>,
    pub deco: Option<Deco>,
}

impl DiveSample {
    /// Start a new row at `time`, carrying over the slow-moving state the
    /// way sample streams expect.
    pub(crate) fn carry_over(&self, time: Duration) -> Self {
        Self {
            time,
            depth: self.depth,
            setpoint: self.setpoint,
            deco: self.deco.clone(),
            cns: self.cns,
            heartbeat: self.heartbeat,
            bearing: self.bearing,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ppo2 {
    pub sensor: Sensor,
    pub bar: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deco {
    pub kind: DecoKind,
    pub time: Duration,
    pub tts: Duration,
}

impl fmt::Display for Deco {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DecoKind::Ndl => write!(f, "NDL: {} min", self.time.as_secs() / 60),
            DecoKind::DecoStop { depth } => {
                write!(f, "Deco stop: {} min @ {depth}m", self.time.as_secs() / 60)
            }
            DecoKind::DeepStop { depth } => {
                write!(f, "Deep stop: {} min @ {depth}m", self.time.as_secs() / 60)
            }
            DecoKind::SafetyStop { depth } => write!(
                f,
                "Safety stop: {} min @ {depth}m",
                self.time.as_secs() / 60
            ),
            DecoKind::None => Ok(()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub enum Sensor {
    #[default]
    None,
    Id(u32),
}

impl Sensor {
    pub fn id(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Id(id) => *id,
        }
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Id(id) => write!(f, "Sensor {id}"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecoKind {
    #[default]
    None,
    Ndl,
    DecoStop {
        depth: f64, // meters
    },
    DeepStop {
        depth: f64, // meters
    },
    SafetyStop {
        depth: f64, // meters
    },
}
