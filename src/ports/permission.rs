//! Device permission port
//!
//! Access to a USB device may need a user decision. The gate answers whether
//! access was already granted and, when asked, requests it asynchronously.
//! The decision comes back like an OS broadcast: a `PermissionResult` tagged
//! with an action string, delivered through the `PermissionReply` handed to
//! the gate with the request.

use crossbeam_channel::Sender;

use crate::domain::UsbDevice;

/// Action string identifying permission results meant for this library.
pub const GRANT_USB_ACTION: &str = concat!(env!("CARGO_PKG_NAME"), ".GRANT_USB");

/// Outcome of a permission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionResult {
    pub action: String,
    pub device: UsbDevice,
    pub granted: bool,
}

/// Return address for a permission request.
///
/// Cloneable and `Send`, so a gate can answer from whatever thread the
/// platform calls it on.
#[derive(Debug, Clone)]
pub struct PermissionReply {
    device: UsbDevice,
    sender: Sender<PermissionResult>,
}

impl PermissionReply {
    pub fn new(device: UsbDevice, sender: Sender<PermissionResult>) -> Self {
        Self { device, sender }
    }

    pub fn device(&self) -> &UsbDevice {
        &self.device
    }

    pub fn grant(&self) {
        self.deliver(GRANT_USB_ACTION, true);
    }

    pub fn deny(&self) {
        self.deliver(GRANT_USB_ACTION, false);
    }

    /// Forward a raw broadcast. Results with a foreign action are dropped by
    /// the manager.
    pub fn deliver(&self, action: &str, granted: bool) {
        let result = PermissionResult {
            action: action.to_string(),
            device: self.device.clone(),
            granted,
        };
        if self.sender.send(result).is_err() {
            log::debug!("Permission result for {} dropped: manager gone", self.device);
        }
    }
}

/// Trait for the platform's device permission service
pub trait PermissionGate: Send + Sync {
    /// Whether access to `device` was already granted
    fn has_permission(&self, device: &UsbDevice) -> bool;

    /// Ask for access. Must not block; the answer goes through `reply`.
    fn request_permission(&self, device: &UsbDevice, reply: PermissionReply);
}
