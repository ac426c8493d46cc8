//! Mock USB bus for development and testing without hardware.
//!
//! Activate in the console host by setting MOCK_USB=1 in the environment:
//!
//!   MOCK_USB=1 RUST_LOG=portcomm_lib=debug cargo run
//!
//! `MockUsbBus` plays both the driver library and the permission service.
//! Devices are added with a `MockPort` handle that tests use to inject
//! incoming bytes and failures and to inspect what was written.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::domain::{CommError, CommResult, PortParameters, UsbDevice};
use crate::ports::{
    PermissionGate, PermissionReply, UsbDeviceConnection, UsbSerialDriver, UsbSerialPort,
    UsbSerialProber,
};

/// Longest a mock read sleeps when there is nothing to deliver
const IDLE_READ_SLEEP: Duration = Duration::from_millis(5);

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockPortState {
    open: bool,
    open_count: usize,
    parameters: Option<PortParameters>,
    written: Vec<Vec<u8>>,
    incoming: VecDeque<u8>,
    read_error: Option<String>,
    write_error: Option<String>,
    configure_error: Option<String>,
    loopback: bool,
}

/// Test-side handle to a mock device's serial port.
#[derive(Clone, Default)]
pub struct MockPort {
    state: Arc<Mutex<MockPortState>>,
}

impl MockPort {
    fn lock(&self) -> MutexGuard<'_, MockPortState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue bytes for the next reads
    pub fn push_incoming(&self, data: &[u8]) {
        self.lock().incoming.extend(data.iter().copied());
    }

    /// Make the next read fail once
    pub fn fail_next_read(&self, message: &str) {
        self.lock().read_error = Some(message.to_string());
    }

    /// Make every write fail until cleared with `None`
    pub fn fail_writes(&self, message: Option<&str>) {
        self.lock().write_error = message.map(String::from);
    }

    /// Make the next `set_parameters` fail
    pub fn fail_configure(&self, message: &str) {
        self.lock().configure_error = Some(message.to_string());
    }

    /// Echo every write back as incoming data
    pub fn set_loopback(&self, enabled: bool) {
        self.lock().loopback = enabled;
    }

    /// Frames written so far, one entry per write call
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Bytes queued but not read yet
    pub fn pending_incoming(&self) -> usize {
        self.lock().incoming.len()
    }

    pub fn parameters(&self) -> Option<PortParameters> {
        self.lock().parameters
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// How many times the port was opened
    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }
}

/// The `UsbSerialPort` handed to the manager
struct MockSerialPort {
    port: MockPort,
}

impl UsbSerialPort for MockSerialPort {
    fn open(&mut self, connection: Box<dyn UsbDeviceConnection>) -> CommResult<()> {
        let mut state = self.port.lock();
        if state.open {
            return Err(CommError::Io("Port already open".into()));
        }
        state.open = true;
        state.open_count += 1;
        log::info!("[MOCK USB] Opened port on {}", connection.device());
        Ok(())
    }

    fn set_parameters(&mut self, params: &PortParameters) -> CommResult<()> {
        let mut state = self.port.lock();
        if !state.open {
            return Err(CommError::Io("Port not open".into()));
        }
        if let Some(message) = state.configure_error.take() {
            return Err(CommError::Io(message));
        }
        log::info!("[MOCK USB] Line settings {params:?}");
        state.parameters = Some(*params);
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> CommResult<usize> {
        {
            let mut state = self.port.lock();
            if !state.open {
                return Err(CommError::Io("Port closed".into()));
            }
            if let Some(message) = state.read_error.take() {
                return Err(CommError::Io(message));
            }
            if !state.incoming.is_empty() {
                let n = state.incoming.len().min(buffer.len());
                for (slot, byte) in buffer.iter_mut().zip(state.incoming.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        thread::sleep(timeout.min(IDLE_READ_SLEEP));
        Ok(0)
    }

    fn write(&mut self, data: &[u8], _timeout: Duration) -> CommResult<()> {
        let mut state = self.port.lock();
        if !state.open {
            return Err(CommError::Io("Port closed".into()));
        }
        if let Some(message) = &state.write_error {
            return Err(CommError::Io(message.clone()));
        }
        state.written.push(data.to_vec());
        if state.loopback {
            state.incoming.extend(data.iter().copied());
        }
        Ok(())
    }

    fn close(&mut self) -> CommResult<()> {
        let mut state = self.port.lock();
        if state.open {
            log::info!("[MOCK USB] Closed port");
        }
        state.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_open()
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

struct MockDeviceEntry {
    device: UsbDevice,
    permitted: bool,
    /// Opening fails even with permission (device busy or unplugged mid-open)
    refuse_open: bool,
    /// `None` for a recognised device without serial ports
    port: Option<MockPort>,
}

#[derive(Default)]
struct BusState {
    devices: Vec<MockDeviceEntry>,
    pending: Vec<PermissionReply>,
    permission_requests: usize,
    enumeration_error: Option<String>,
}

/// In-memory USB bus implementing `UsbSerialProber` and `PermissionGate`.
#[derive(Clone, Default)]
pub struct MockUsbBus {
    state: Arc<Mutex<BusState>>,
}

impl MockUsbBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn attach(&self, device: UsbDevice, permitted: bool, port: Option<MockPort>) {
        log::info!("[MOCK USB] Attached {device} (permitted={permitted})");
        self.lock().devices.push(MockDeviceEntry {
            device,
            permitted,
            refuse_open: false,
            port,
        });
    }

    /// Attach a device the host may already access
    pub fn add_device(&self, device: UsbDevice) -> MockPort {
        let port = MockPort::default();
        self.attach(device, true, Some(port.clone()));
        port
    }

    /// Attach a device that needs a permission grant before it can be opened
    pub fn add_restricted_device(&self, device: UsbDevice) -> MockPort {
        let port = MockPort::default();
        self.attach(device, false, Some(port.clone()));
        port
    }

    /// Attach a recognised device that exposes no serial ports
    pub fn add_portless_device(&self, device: UsbDevice) {
        self.attach(device, true, None);
    }

    /// Detach every device with this OS name
    pub fn remove_device(&self, name: &str) {
        self.lock().devices.retain(|entry| entry.device.name != name);
        log::info!("[MOCK USB] Detached {name}");
    }

    /// Grant or revoke access to every device with this OS name
    pub fn set_permission(&self, name: &str, permitted: bool) {
        for entry in self.lock().devices.iter_mut() {
            if entry.device.name == name {
                entry.permitted = permitted;
            }
        }
    }

    /// Make opening the device fail without touching its permission
    pub fn refuse_open(&self, name: &str, refuse: bool) {
        for entry in self.lock().devices.iter_mut() {
            if entry.device.name == name {
                entry.refuse_open = refuse;
            }
        }
    }

    /// Make enumeration fail until cleared with `None`
    pub fn fail_enumeration(&self, message: Option<&str>) {
        self.lock().enumeration_error = message.map(String::from);
    }

    /// Total permission requests received
    pub fn permission_requests(&self) -> usize {
        self.lock().permission_requests
    }

    /// Requests not answered yet
    pub fn pending_requests(&self) -> usize {
        self.lock().pending.len()
    }

    /// Answer every pending request, as if the user clicked allow or deny.
    /// Returns how many requests were answered.
    pub fn resolve_permissions(&self, granted: bool) -> usize {
        let replies: Vec<PermissionReply> = {
            let mut state = self.lock();
            let replies: Vec<PermissionReply> = state.pending.drain(..).collect();
            if granted {
                for reply in &replies {
                    for entry in state.devices.iter_mut() {
                        if entry.device.name == reply.device().name {
                            entry.permitted = true;
                        }
                    }
                }
            }
            replies
        };

        for reply in &replies {
            log::info!(
                "[MOCK USB] Permission {} for {}",
                if granted { "granted" } else { "denied" },
                reply.device()
            );
            if granted {
                reply.grant();
            } else {
                reply.deny();
            }
        }
        replies.len()
    }
}

struct MockDriver {
    device: UsbDevice,
    openable: bool,
    port: Option<MockPort>,
}

struct MockConnection {
    device: UsbDevice,
}

impl UsbDeviceConnection for MockConnection {
    fn device(&self) -> &UsbDevice {
        &self.device
    }
}

impl UsbSerialDriver for MockDriver {
    fn device(&self) -> &UsbDevice {
        &self.device
    }

    fn open_device(&self) -> Option<Box<dyn UsbDeviceConnection>> {
        if !self.openable {
            return None;
        }
        Some(Box::new(MockConnection {
            device: self.device.clone(),
        }))
    }

    fn ports(&self) -> Vec<Box<dyn UsbSerialPort>> {
        self.port
            .iter()
            .map(|port| Box::new(MockSerialPort { port: port.clone() }) as Box<dyn UsbSerialPort>)
            .collect()
    }
}

impl UsbSerialProber for MockUsbBus {
    fn find_all_drivers(&self) -> CommResult<Vec<Box<dyn UsbSerialDriver>>> {
        let state = self.lock();
        if let Some(message) = &state.enumeration_error {
            return Err(CommError::Io(message.clone()));
        }
        Ok(state
            .devices
            .iter()
            .map(|entry| {
                Box::new(MockDriver {
                    device: entry.device.clone(),
                    openable: entry.permitted && !entry.refuse_open,
                    port: entry.port.clone(),
                }) as Box<dyn UsbSerialDriver>
            })
            .collect())
    }
}

impl PermissionGate for MockUsbBus {
    fn has_permission(&self, device: &UsbDevice) -> bool {
        self.lock()
            .devices
            .iter()
            .any(|entry| entry.device.name == device.name && entry.permitted)
    }

    fn request_permission(&self, device: &UsbDevice, reply: PermissionReply) {
        log::info!("[MOCK USB] Permission requested for {device}");
        let mut state = self.lock();
        state.permission_requests += 1;
        state.pending.push(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::GRANT_USB_ACTION;

    fn arduino() -> UsbDevice {
        UsbDevice::new(0x2341, 0x0043, "/dev/bus/usb/001/002")
    }

    fn open_port(bus: &MockUsbBus) -> Box<dyn UsbSerialPort> {
        let drivers = bus.find_all_drivers().unwrap();
        let connection = drivers[0].open_device().unwrap();
        let mut port = drivers[0].ports().remove(0);
        port.open(connection).unwrap();
        port
    }

    #[test]
    fn enumeration_lists_devices_in_attach_order() {
        let bus = MockUsbBus::new();
        bus.add_device(arduino());
        bus.add_device(UsbDevice::new(0x0403, 0x6001, "ftdi"));
        let names: Vec<String> = bus
            .find_all_drivers()
            .unwrap()
            .iter()
            .map(|d| d.device().name.clone())
            .collect();
        assert_eq!(names, vec!["/dev/bus/usb/001/002", "ftdi"]);
    }

    #[test]
    fn restricted_device_cannot_be_opened() {
        let bus = MockUsbBus::new();
        bus.add_restricted_device(arduino());
        let drivers = bus.find_all_drivers().unwrap();
        assert!(drivers[0].open_device().is_none());
        assert!(!bus.has_permission(&arduino()));
    }

    #[test]
    fn refused_open_keeps_permission() {
        let bus = MockUsbBus::new();
        bus.add_device(arduino());
        bus.refuse_open(&arduino().name, true);

        let drivers = bus.find_all_drivers().unwrap();
        assert!(drivers[0].open_device().is_none());
        assert!(bus.has_permission(&arduino()));

        bus.refuse_open(&arduino().name, false);
        assert!(bus.find_all_drivers().unwrap()[0].open_device().is_some());
    }

    #[test]
    fn revoked_permission_blocks_open() {
        let bus = MockUsbBus::new();
        bus.add_device(arduino());
        bus.set_permission(&arduino().name, false);

        assert!(!bus.has_permission(&arduino()));
        assert!(bus.find_all_drivers().unwrap()[0].open_device().is_none());
    }

    #[test]
    fn loopback_echoes_writes() {
        let bus = MockUsbBus::new();
        let handle = bus.add_device(arduino());
        handle.set_loopback(true);
        let mut port = open_port(&bus);

        port.write(&[1, 2, 3], Duration::from_millis(10)).unwrap();
        let mut buf = [0u8; 8];
        let n = port.read(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
        assert_eq!(handle.written(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn read_splits_across_small_buffers() {
        let bus = MockUsbBus::new();
        let handle = bus.add_device(arduino());
        handle.push_incoming(&[0xA, 0xB, 0xC]);
        let mut port = open_port(&bus);

        let mut buf = [0u8; 2];
        assert_eq!(port.read(&mut buf, Duration::from_millis(1)).unwrap(), 2);
        assert_eq!(buf, [0xA, 0xB]);
        assert_eq!(port.read(&mut buf, Duration::from_millis(1)).unwrap(), 1);
        assert_eq!(buf[0], 0xC);
    }

    #[test]
    fn closed_port_rejects_io() {
        let bus = MockUsbBus::new();
        let handle = bus.add_device(arduino());
        let mut port = open_port(&bus);
        port.close().unwrap();

        assert!(!handle.is_open());
        assert!(port.write(&[1], Duration::from_millis(1)).is_err());
        let mut buf = [0u8; 1];
        assert!(port.read(&mut buf, Duration::from_millis(1)).is_err());
    }

    #[test]
    fn resolve_grant_sends_result_and_permits_device() {
        let bus = MockUsbBus::new();
        bus.add_restricted_device(arduino());
        let (tx, rx) = crossbeam_channel::unbounded();
        bus.request_permission(&arduino(), PermissionReply::new(arduino(), tx));
        assert_eq!(bus.pending_requests(), 1);

        assert_eq!(bus.resolve_permissions(true), 1);
        let result = rx.try_recv().unwrap();
        assert!(result.granted);
        assert_eq!(result.action, GRANT_USB_ACTION);
        assert!(bus.has_permission(&arduino()));
        assert_eq!(bus.pending_requests(), 0);
    }

    #[test]
    fn resolve_deny_keeps_device_restricted() {
        let bus = MockUsbBus::new();
        bus.add_restricted_device(arduino());
        let (tx, rx) = crossbeam_channel::unbounded();
        bus.request_permission(&arduino(), PermissionReply::new(arduino(), tx));

        bus.resolve_permissions(false);
        assert!(!rx.try_recv().unwrap().granted);
        assert!(!bus.has_permission(&arduino()));
    }

    #[test]
    fn enumeration_failure_is_io_error() {
        let bus = MockUsbBus::new();
        bus.fail_enumeration(Some("usb stack down"));
        assert!(matches!(bus.find_all_drivers(), Err(CommError::Io(_))));
    }
}
