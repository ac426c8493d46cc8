//! Adapters: implementations of the port traits.
//!
//! - `serial_port` / `host_permission` — desktop OS via the `serialport` crate
//! - `mock_usb` — in-memory USB bus for tests and hardware-free runs
//! - `channel_listener` — listener backed by a bounded event queue

pub mod channel_listener;
pub mod host_permission;
pub mod mock_usb;
pub mod serial_port;
