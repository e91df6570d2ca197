//! Vendor-neutral dive computer access: device drivers that speak each
//! family's serial protocol over a pluggable I/O stream, parsers that
//! turn raw dive blobs into typed samples, and a download pipeline with
//! fingerprint-based incremental sync.
//!
//! Platform transport backends (termios, HID, IrDA, BLE) are not part
//! of this crate; they plug in through [`iostream::IoStream`].

pub mod buffer;
pub mod checksum;
pub mod common;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod hdlc;
pub mod iostream;
pub mod parser;
pub mod pipeline;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use crate::common::{EventKind, Family, Status, Transport};
pub use crate::context::{CancelToken, Context, LogLevel};
pub use crate::descriptor::{Descriptor, Descriptors};
pub use crate::device::{DevInfo, Device, DeviceEvent, EventMask};
pub use crate::error::{DcError, Result};
pub use crate::parser::{
    Deco, DecoKind, DecoModel, Dive, DiveEvent, DiveMode, DiveSample, Fingerprint, GasUsage,
    Gasmix, Parser, Ppo2, Sample, Sensor, Tank, TankKind, TankUsage,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub vendor: String,
    pub name: String,
    pub model: u32,
    pub family: Family,
    pub transports: Vec<Transport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub name: String,
    pub products: Vec<Product>,
}

/// The supported models, grouped and sorted by vendor.
pub fn vendors() -> Vec<Vendor> {
    let mut vendor_map: BTreeMap<String, Vec<Product>> = BTreeMap::new();

    for descriptor in Descriptors::new() {
        let vendor_name = descriptor.vendor().to_string();
        let product = Product {
            vendor: vendor_name.clone(),
            name: descriptor.product().to_string(),
            model: descriptor.model(),
            family: descriptor.family(),
            transports: descriptor.transports(),
        };

        vendor_map.entry(vendor_name).or_default().push(product);
    }

    vendor_map
        .into_iter()
        .map(|(name, mut products)| {
            products.sort_by(|a, b| a.name.cmp(&b.name));
            Vendor { name, products }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendors_are_grouped_and_sorted() {
        let vendors = vendors();
        assert!(vendors.len() >= 3);

        let names: Vec<&str> = vendors.iter().map(|vendor| vendor.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);

        let suunto = vendors
            .iter()
            .find(|vendor| vendor.name == "Suunto")
            .unwrap();
        assert!(suunto.products.iter().any(|product| product.name == "Vyper"));
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
