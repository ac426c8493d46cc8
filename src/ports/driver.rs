//! USB serial driver traits
//!
//! Split the same way a USB serial driver library is:
//! - `UsbSerialProber` — finds drivers for attached devices
//! - `UsbSerialDriver` — one recognised device, hands out its ports
//! - `UsbDeviceConnection` — the low-level device handle a port is opened on
//! - `UsbSerialPort` — a single serial endpoint

use std::time::Duration;

use crate::domain::{CommResult, PortParameters, UsbDevice};

/// Enumerates attached devices that a serial driver recognises.
pub trait UsbSerialProber: Send + Sync {
    fn find_all_drivers(&self) -> CommResult<Vec<Box<dyn UsbSerialDriver>>>;
}

/// A driver bound to one attached USB device.
pub trait UsbSerialDriver: Send {
    fn device(&self) -> &UsbDevice;

    /// Open the low-level device connection.
    /// `None` when the OS refuses access (typically: no permission yet).
    fn open_device(&self) -> Option<Box<dyn UsbDeviceConnection>>;

    /// Serial endpoints on the device. Most devices have exactly one.
    fn ports(&self) -> Vec<Box<dyn UsbSerialPort>>;
}

/// Opaque handle to an opened USB device; consumed by `UsbSerialPort::open`.
pub trait UsbDeviceConnection: Send {
    fn device(&self) -> &UsbDevice;
}

/// A serial endpoint.
/// Only requires `Send` (not `Sync`) — always accessed behind a Mutex.
pub trait UsbSerialPort: Send {
    /// Open the port on an established device connection
    fn open(&mut self, connection: Box<dyn UsbDeviceConnection>) -> CommResult<()>;

    /// Apply baud rate, data bits, stop bits and parity
    fn set_parameters(&mut self, params: &PortParameters) -> CommResult<()>;

    /// Read available bytes, waiting at most `timeout`.
    /// A timeout with nothing received is `Ok(0)`, not an error.
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> CommResult<usize>;

    /// Write the whole buffer, failing if it does not complete within `timeout`
    fn write(&mut self, data: &[u8], timeout: Duration) -> CommResult<()>;

    /// Close the port (and the device connection it owns)
    fn close(&mut self) -> CommResult<()>;

    fn is_open(&self) -> bool;
}
