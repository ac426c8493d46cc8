//! Core domain types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Format a numeric USB vendor ID the way vendors are configured:
/// four uppercase hex digits, zero padded (e.g. `0x2341` → `"2341"`).
pub fn format_vendor_id(vendor_id: u16) -> String {
    format!("{vendor_id:04X}")
}

/// An attached USB device as reported by the driver layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    /// OS device name, e.g. `/dev/ttyACM0` or `/dev/bus/usb/001/004`
    pub name: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl UsbDevice {
    pub fn new(vendor_id: u16, product_id: u16, name: impl Into<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            name: name.into(),
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// Vendor ID as a 4-digit uppercase hex string
    pub fn vendor_hex(&self) -> String {
        format_vendor_id(self.vendor_id)
    }
}

impl fmt::Display for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:04X}:{:04X})", self.name, self.vendor_id, self.product_id)
    }
}

/// Serial data bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

/// Serial stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Line settings applied to a port after it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortParameters {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl PortParameters {
    /// 8 data bits, no parity, 1 stop bit
    pub fn eight_n_one(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

/// Where the manager stands in the OS permission flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PermissionState {
    #[default]
    Unknown,
    Requested,
    Granted,
    Denied,
}

/// Externally visible connection state, derived from the open port and the
/// permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Closed,
    PermissionRequested,
    Open,
}
