use std::fmt;

use crate::common::{Family, Status, Transport};
use crate::error::{DcError, Result};

struct Entry {
    vendor: &'static str,
    product: &'static str,
    family: Family,
    model: u32,
    transports: u32,
}

const SERIAL: u32 = Transport::Serial as u32;
const IRDA: u32 = Transport::Irda as u32;
const BLE: u32 = Transport::Ble as u32;

/// Catalog of supported models. Order matters: family lookups without an
/// exact model fall back to the first entry of that family.
static REGISTRY: &[Entry] = &[
    // Suunto
    Entry { vendor: "Suunto", product: "Solution", family: Family::SuuntoSolution, model: 0x01, transports: SERIAL },
    Entry { vendor: "Suunto", product: "Eon", family: Family::SuuntoEon, model: 0x02, transports: SERIAL },
    Entry { vendor: "Suunto", product: "Solution Alpha", family: Family::SuuntoEon, model: 0x03, transports: SERIAL },
    Entry { vendor: "Suunto", product: "Vyper", family: Family::SuuntoVyper, model: 0x0A, transports: SERIAL },
    Entry { vendor: "Suunto", product: "Cobra", family: Family::SuuntoVyper, model: 0x0C, transports: SERIAL },
    Entry { vendor: "Suunto", product: "Vytec", family: Family::SuuntoVyper, model: 0x0B, transports: SERIAL },
    Entry { vendor: "Suunto", product: "Stinger", family: Family::SuuntoVyper, model: 0x03, transports: SERIAL },
    Entry { vendor: "Suunto", product: "Mosquito", family: Family::SuuntoVyper, model: 0x04, transports: SERIAL },
    Entry { vendor: "Suunto", product: "Gekko", family: Family::SuuntoVyper, model: 0x0D, transports: SERIAL },
    Entry { vendor: "Suunto", product: "Zoop", family: Family::SuuntoVyper, model: 0x16, transports: SERIAL },
    Entry { vendor: "Suunto", product: "Spyder", family: Family::SuuntoVyper, model: 0x14, transports: SERIAL },
    Entry { vendor: "Suunto", product: "Vyper 2", family: Family::SuuntoVyper2, model: 0x10, transports: SERIAL },
    Entry { vendor: "Suunto", product: "Cobra 3", family: Family::SuuntoVyper2, model: 0x11, transports: SERIAL },
    Entry { vendor: "Suunto", product: "D9", family: Family::SuuntoVyper2, model: 0x0E, transports: SERIAL },
    Entry { vendor: "Suunto", product: "D6", family: Family::SuuntoVyper2, model: 0x0F, transports: SERIAL },
    Entry { vendor: "Suunto", product: "D4", family: Family::SuuntoVyper2, model: 0x12, transports: SERIAL },
    Entry { vendor: "Suunto", product: "HelO2", family: Family::SuuntoVyper2, model: 0x15, transports: SERIAL },
    // Uwatec
    Entry { vendor: "Uwatec", product: "Aladin Pro", family: Family::UwatecAladin, model: 0x3F, transports: SERIAL },
    Entry { vendor: "Uwatec", product: "Aladin Sport", family: Family::UwatecAladin, model: 0x3E, transports: SERIAL },
    Entry { vendor: "Uwatec", product: "Aladin Air X", family: Family::UwatecAladin, model: 0x1C, transports: SERIAL },
    Entry { vendor: "Uwatec", product: "Memomouse", family: Family::UwatecMemoMouse, model: 0x00, transports: SERIAL },
    Entry { vendor: "Uwatec", product: "Smart Pro", family: Family::UwatecSmart, model: 0x10, transports: IRDA },
    Entry { vendor: "Uwatec", product: "Galileo Sol", family: Family::UwatecSmart, model: 0x11, transports: IRDA },
    Entry { vendor: "Uwatec", product: "Aladin Tec", family: Family::UwatecSmart, model: 0x12, transports: IRDA },
    Entry { vendor: "Uwatec", product: "Aladin Tec 2G", family: Family::UwatecSmart, model: 0x13, transports: IRDA },
    Entry { vendor: "Uwatec", product: "Smart Com", family: Family::UwatecSmart, model: 0x14, transports: IRDA },
    Entry { vendor: "Uwatec", product: "Smart Tec", family: Family::UwatecSmart, model: 0x18, transports: IRDA },
    Entry { vendor: "Uwatec", product: "Galileo Luna", family: Family::UwatecSmart, model: 0x19, transports: IRDA },
    Entry { vendor: "Uwatec", product: "Smart Z", family: Family::UwatecSmart, model: 0x1C, transports: IRDA },
    // Oceanic
    Entry { vendor: "Oceanic", product: "Atom 2.0", family: Family::OceanicAtom2, model: 0x4342, transports: SERIAL },
    Entry { vendor: "Oceanic", product: "Veo 2.0", family: Family::OceanicAtom2, model: 0x4245, transports: SERIAL },
    Entry { vendor: "Oceanic", product: "Geo", family: Family::OceanicAtom2, model: 0x4359, transports: SERIAL },
    Entry { vendor: "Oceanic", product: "Pro Plus 2", family: Family::OceanicAtom2, model: 0x4347, transports: SERIAL },
    Entry { vendor: "Oceanic", product: "Atom 3.0", family: Family::OceanicAtom2, model: 0x4434, transports: SERIAL },
    // Cressi
    Entry { vendor: "Cressi", product: "Goa", family: Family::CressiGoa, model: 0x01, transports: BLE | SERIAL },
    Entry { vendor: "Cressi", product: "Cartesio", family: Family::CressiGoa, model: 0x02, transports: BLE | SERIAL },
    Entry { vendor: "Cressi", product: "Neon", family: Family::CressiGoa, model: 0x03, transports: BLE | SERIAL },
    Entry { vendor: "Cressi", product: "Donatello", family: Family::CressiGoa, model: 0x04, transports: BLE | SERIAL },
    Entry { vendor: "Cressi", product: "Michelangelo", family: Family::CressiGoa, model: 0x05, transports: BLE | SERIAL },
];

/// One supported model.
///
/// Descriptors are owned values: the iterator that produced one may be
/// dropped or restarted without invalidating it.
#[derive(Clone, PartialEq, Eq)]
pub struct Descriptor {
    index: usize,
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Descriptor({}, {}, {}, {:?}, {:?})",
            self.vendor(),
            self.product(),
            self.model(),
            self.family(),
            self.transports(),
        )
    }
}

impl Descriptor {
    fn entry(&self) -> &'static Entry {
        &REGISTRY[self.index]
    }

    pub fn vendor(&self) -> &'static str {
        self.entry().vendor
    }

    pub fn product(&self) -> &'static str {
        self.entry().product
    }

    pub fn model(&self) -> u32 {
        self.entry().model
    }

    pub fn family(&self) -> Family {
        self.entry().family
    }

    pub fn transports(&self) -> Vec<Transport> {
        Transport::vec_from_bitflag(self.entry().transports)
    }

    /// The transport a caller gets when not overriding one.
    pub fn default_transport(&self) -> Transport {
        *self.transports().first().unwrap_or(&Transport::None)
    }
}

/// A restartable iterator over every supported model.
///
/// # Examples
///
/// ```
/// use divecomputer::descriptor::Descriptors;
///
/// for descriptor in Descriptors::new() {
///     println!("{descriptor:?}");
/// }
/// ```
#[derive(Default)]
pub struct Descriptors {
    index: usize,
}

impl Descriptors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind to the first descriptor.
    pub fn restart(&mut self) {
        self.index = 0;
    }
}

impl Iterator for Descriptors {
    type Item = Descriptor;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= REGISTRY.len() {
            return None;
        }
        let item = Descriptor { index: self.index };
        self.index += 1;
        Some(item)
    }
}

/// Find a descriptor by `"<vendor> <product>"` or `<product>` alone,
/// case-insensitively.
pub fn lookup_name(name: &str) -> Result<Descriptor> {
    Descriptors::new()
        .find(|item| {
            let full = format!("{} {}", item.vendor(), item.product());
            name.eq_ignore_ascii_case(&full) || name.eq_ignore_ascii_case(item.product())
        })
        .ok_or_else(|| DcError::status_with_context(Status::NoDevice, format!("unknown device: {name}")))
}

/// Find a descriptor by family, preferring an exact model match and
/// falling back to the first entry of the family.
pub fn lookup_family(family: Family, model: Option<u32>) -> Result<Descriptor> {
    let mut fallback = None;
    for item in Descriptors::new() {
        if item.family() != family {
            continue;
        }
        match model {
            Some(model) if item.model() == model => return Ok(item),
            Some(_) => fallback.get_or_insert(item),
            None => return Ok(item),
        };
    }
    fallback.ok_or_else(|| {
        DcError::status_with_context(Status::NoDevice, format!("no descriptor for {family}"))
    })
}
