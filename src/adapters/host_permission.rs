//! Desktop permission gate.
//!
//! On a desktop OS access to a serial device is governed by file
//! permissions checked when the port is opened, so there is nothing to ask
//! the user. Requests are answered with a grant straight away.

use crate::domain::UsbDevice;
use crate::ports::{PermissionGate, PermissionReply};

pub struct HostPermissionGate;

impl PermissionGate for HostPermissionGate {
    fn has_permission(&self, _device: &UsbDevice) -> bool {
        true
    }

    fn request_permission(&self, device: &UsbDevice, reply: PermissionReply) {
        log::debug!("Host permission granted for {device}");
        reply.grant();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::GRANT_USB_ACTION;

    #[test]
    fn request_is_granted_immediately() {
        let device = UsbDevice::new(0x0403, 0x6001, "/dev/ttyUSB0");
        let (tx, rx) = crossbeam_channel::unbounded();

        HostPermissionGate.request_permission(&device, PermissionReply::new(device.clone(), tx));

        let result = rx.try_recv().unwrap();
        assert!(result.granted);
        assert_eq!(result.device, device);
        assert_eq!(result.action, GRANT_USB_ACTION);
    }

    #[test]
    fn has_permission_for_any_device() {
        assert!(HostPermissionGate.has_permission(&UsbDevice::new(1, 2, "x")));
    }
}
