//! ConnectionManager: finds the vendor's USB serial device, walks the
//! permission flow, opens the port and relays frames to a listener.
//!
//! The manager is an ordinary value owned by the host (share it with
//! `Arc<ConnectionManager>`), not a process-wide global. All state
//! transitions (open, disconnect, permission results, vendor changes) go
//! through one Mutex. Permission results arrive on a channel and are applied
//! by a dispatcher thread through that same lock, so a grant arriving while
//! the host calls `open_and_connect` cannot race it.
//!
//! Failures never cross the public API: `open_and_connect` and `write`
//! return `bool` and log the cause. Only errors from the background reader
//! reach the listener.

pub mod io_manager;

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Receiver, Sender};

use crate::codec::{hex_to_bytes, to_hex_string};
use crate::domain::{
    normalize_vendor, CommError, CommResult, ConnectionState, ManagerConfig, PermissionState,
    PortParameters, UsbDevice,
};
use crate::ports::{
    PermissionGate, PermissionReply, PermissionResult, PortReceiverListener, UsbSerialDriver,
    UsbSerialProber, GRANT_USB_ACTION,
};
use crate::state::{ListenerSlot, ManagerState, OpenConnection, SharedPort};

use self::io_manager::SerialIoManager;

/// Coordinates one USB serial connection for the host application.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    shutdown: Option<Sender<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

/// State and collaborators shared with the permission dispatcher thread.
struct Shared {
    config: ManagerConfig,
    prober: Arc<dyn UsbSerialProber>,
    gate: Arc<dyn PermissionGate>,
    permission_tx: Sender<PermissionResult>,
    state: Mutex<ManagerState>,
    listener: ListenerSlot,
}

impl ConnectionManager {
    /// Build a manager for `config.vendor` and start listening for
    /// permission results.
    pub fn new(
        config: ManagerConfig,
        prober: Arc<dyn UsbSerialProber>,
        gate: Arc<dyn PermissionGate>,
    ) -> CommResult<Self> {
        let config = ManagerConfig {
            vendor: normalize_vendor(&config.vendor),
            ..config
        };
        config.validate()?;

        let (permission_tx, permission_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);

        let shared = Arc::new(Shared {
            state: Mutex::new(ManagerState::new(config.vendor.clone())),
            config,
            prober,
            gate,
            permission_tx,
            listener: Arc::new(Mutex::new(None)),
        });

        let dispatcher_shared = Arc::clone(&shared);
        let dispatcher = thread::Builder::new()
            .name("portcomm-permission".into())
            .spawn(move || run_dispatcher(dispatcher_shared, permission_rx, shutdown_rx))
            .map_err(|e| CommError::Io(format!("Failed to start permission dispatcher: {e}")))?;

        log::info!("Connection manager ready for vendor {}", shared.config.vendor);

        Ok(Self {
            shared,
            shutdown: Some(shutdown_tx),
            dispatcher: Some(dispatcher),
        })
    }

    /// Find the vendor's device and open it at `baud_rate` (8N1).
    ///
    /// Returns `false` when already open, when no matching device is
    /// attached, on any I/O failure, and when permission had to be requested
    /// first. In the last case the open is retried automatically once the
    /// permission result arrives; watch `on_state_change` for the outcome.
    pub fn open_and_connect(&self, baud_rate: u32) -> bool {
        let (outcome, change) = {
            let mut state = self.shared.lock_state();
            let before = state.connection_state();
            let outcome = self.shared.open_locked(&mut state, baud_rate);
            (outcome, state.transition_from(before))
        };
        self.shared.notify_state(change);
        report_open(outcome)
    }

    /// Decode `hex_str` and write it to the port, blocking up to the
    /// configured write timeout. `false` when closed, on malformed hex and on
    /// I/O failure. A failed write leaves the connection open.
    pub fn write(&self, hex_str: &str) -> bool {
        let port = match self.shared.current_port() {
            Some(port) => port,
            None => {
                log::warn!("Write ignored: port not open");
                return false;
            }
        };

        match self.shared.write_frame(&port, hex_str) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Write failed: {e}");
                false
            }
        }
    }

    /// Stop the reader, close the port and clear the connection. An open
    /// waiting on a permission request is cancelled: the result is still
    /// recorded when it arrives but no longer reopens the port.
    /// Safe to call at any time, any number of times.
    pub fn disconnect(&self) {
        let (reader, change) = {
            let mut state = self.shared.lock_state();
            let before = state.connection_state();
            state.retry_pending = false;
            let reader = state.connection.take().map(close_connection);
            (reader, state.transition_from(before))
        };
        // Joined outside the lock: the reader may be inside a listener
        // callback that calls back into the manager.
        if let Some(reader) = reader {
            reader.join();
        }
        self.shared.notify_state(change);
    }

    /// Replace the listener. Events raised while no listener is set are lost.
    pub fn set_listener(&self, listener: Arc<dyn PortReceiverListener>) {
        *self.shared.lock_listener() = Some(listener);
    }

    pub fn clear_listener(&self) {
        *self.shared.lock_listener() = None;
    }

    /// Change the vendor used by subsequent opens. An open connection is
    /// left untouched.
    pub fn set_vendor(&self, vendor: &str) {
        let vendor = normalize_vendor(vendor);
        log::info!("Vendor set to {vendor}");
        self.shared.lock_state().vendor = vendor;
    }

    /// Apply a permission result as if it had arrived from the platform.
    ///
    /// This is what the dispatcher thread calls; hosts that receive
    /// permission broadcasts on their own thread may call it directly.
    /// The open is retried only if one was deferred waiting for this result.
    /// Returns whether the retried open succeeded.
    pub fn handle_permission_result(&self, result: PermissionResult) -> bool {
        self.shared.handle_permission_result(result)
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock_state().is_open()
    }

    pub fn vendor(&self) -> String {
        self.shared.lock_state().vendor.clone()
    }

    /// Last baud rate requested (0 before the first open attempt)
    pub fn baud_rate(&self) -> u32 {
        self.shared.lock_state().baud_rate
    }

    pub fn permission_state(&self) -> PermissionState {
        self.shared.lock_state().permission
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock_state().connection_state()
    }

    pub fn connected_device(&self) -> Option<UsbDevice> {
        self.shared
            .lock_state()
            .connection
            .as_ref()
            .map(|conn| conn.device.clone())
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Dropping the sender wakes the dispatcher's select. Stop it before
        // disconnecting so a late grant cannot reopen the port.
        drop(self.shutdown.take());
        if let Some(handle) = self.dispatcher.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::error!("Permission dispatcher thread panicked");
            }
        }
        self.disconnect();
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<Arc<dyn PortReceiverListener>>> {
        self.listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_port(&self) -> Option<SharedPort> {
        self.lock_state()
            .connection
            .as_ref()
            .map(|conn| Arc::clone(&conn.port))
    }

    /// The open sequence. Caller holds the state lock.
    fn open_locked(&self, state: &mut ManagerState, baud_rate: u32) -> CommResult<()> {
        if state.is_open() {
            return Err(CommError::AlreadyOpen);
        }
        state.baud_rate = baud_rate;

        let drivers = self.prober.find_all_drivers()?;
        if drivers.is_empty() {
            return Err(CommError::NoDevice);
        }

        let driver = select_driver(drivers, &state.vendor)
            .ok_or_else(|| CommError::VendorNotMatched(state.vendor.clone()))?;
        let device = driver.device().clone();

        let connection = match driver.open_device() {
            Some(connection) => connection,
            None => return Err(self.permission_needed(state, &device)),
        };

        // Most devices have just one port (port 0)
        let mut port = driver
            .ports()
            .into_iter()
            .next()
            .ok_or_else(|| CommError::NoPort(device.to_string()))?;
        port.open(connection)?;
        if let Err(e) = port.set_parameters(&PortParameters::eight_n_one(baud_rate)) {
            if let Err(close_err) = port.close() {
                log::warn!("Close after failed configure: {close_err}");
            }
            return Err(e);
        }

        let port: SharedPort = Arc::new(Mutex::new(port));
        let reader = match SerialIoManager::start(
            Arc::clone(&port),
            Arc::clone(&self.listener),
            self.config.read_poll(),
            self.config.read_buffer_size,
        ) {
            Ok(reader) => reader,
            Err(e) => {
                close_port(&port);
                return Err(e);
            }
        };

        log::info!("Opened {device} at {baud_rate} baud");
        state.connection = Some(OpenConnection {
            device,
            port,
            reader,
        });
        Ok(())
    }

    /// The device could not be opened. Ask for permission the first time
    /// round; afterwards a missing connection is just a failure.
    fn permission_needed(&self, state: &mut ManagerState, device: &UsbDevice) -> CommError {
        match state.permission {
            PermissionState::Unknown if !self.gate.has_permission(device) => {
                state.permission = PermissionState::Requested;
                state.retry_pending = true;
                log::info!("Requesting USB permission for {device}");
                let reply = PermissionReply::new(device.clone(), self.permission_tx.clone());
                self.gate.request_permission(device, reply);
                CommError::PermissionPending(device.to_string())
            }
            PermissionState::Requested => {
                state.retry_pending = true;
                CommError::PermissionPending(device.to_string())
            }
            PermissionState::Denied => CommError::PermissionDenied(device.to_string()),
            _ => CommError::Io(format!("Could not open device {device}")),
        }
    }

    fn write_frame(&self, port: &SharedPort, hex_str: &str) -> CommResult<()> {
        let data = hex_to_bytes(hex_str)?;
        log::debug!("TX: {}", to_hex_string(&data));
        let mut port = port
            .lock()
            .map_err(|_| CommError::Io("Port state corrupted".into()))?;
        if !port.is_open() {
            return Err(CommError::NotOpen);
        }
        port.write(&data, self.config.write_timeout())
    }

    fn handle_permission_result(&self, result: PermissionResult) -> bool {
        if result.action != GRANT_USB_ACTION {
            log::debug!("Ignoring broadcast '{}'", result.action);
            return false;
        }

        let (outcome, change) = {
            let mut state = self.lock_state();
            let before = state.connection_state();
            state.permission = if result.granted {
                PermissionState::Granted
            } else {
                PermissionState::Denied
            };
            log::info!(
                "USB permission {} for {}",
                if result.granted { "granted" } else { "denied" },
                result.device
            );

            let outcome = if std::mem::take(&mut state.retry_pending) {
                let baud_rate = state.baud_rate;
                Some(self.open_locked(&mut state, baud_rate))
            } else {
                log::debug!("No deferred open to retry");
                None
            };
            (outcome, state.transition_from(before))
        };
        self.notify_state(change);
        outcome.is_some_and(report_open)
    }

    /// Tell the listener about a state change. Never called with the state
    /// lock held.
    fn notify_state(&self, change: Option<ConnectionState>) {
        let Some(state) = change else {
            return;
        };
        log::debug!("Connection state → {state:?}");
        let listener = self.lock_listener().clone();
        if let Some(listener) = listener {
            listener.on_state_change(state);
        }
    }
}

/// Pick the driver for `vendor`. The scan covers the whole list, so when
/// several attached devices share the vendor the last one enumerated wins.
fn select_driver(
    drivers: Vec<Box<dyn UsbSerialDriver>>,
    vendor: &str,
) -> Option<Box<dyn UsbSerialDriver>> {
    drivers
        .into_iter()
        .filter(|driver| driver.device().vendor_hex() == vendor)
        .last()
}

/// Signal the reader, close the port, hand back the reader for joining.
fn close_connection(conn: OpenConnection) -> SerialIoManager {
    conn.reader.stop();
    close_port(&conn.port);
    log::info!("Disconnected from {}", conn.device);
    conn.reader
}

fn close_port(port: &SharedPort) {
    match port.lock() {
        Ok(mut port) => {
            if let Err(e) = port.close() {
                log::warn!("Close failed: {e}");
            }
        }
        Err(_) => log::warn!("Close skipped: port state corrupted"),
    }
}

fn report_open(outcome: CommResult<()>) -> bool {
    match outcome {
        Ok(()) => true,
        Err(e @ CommError::PermissionPending(_)) => {
            log::info!("Open deferred: {e}");
            false
        }
        Err(e) => {
            log::error!("Open failed: {e}");
            false
        }
    }
}

/// Applies permission results until the manager is dropped.
fn run_dispatcher(
    shared: Arc<Shared>,
    permissions: Receiver<PermissionResult>,
    shutdown: Receiver<()>,
) {
    loop {
        select! {
            recv(permissions) -> msg => match msg {
                Ok(result) => {
                    shared.handle_permission_result(result);
                }
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    log::debug!("Permission dispatcher exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VendorOnly(UsbDevice);

    impl UsbSerialDriver for VendorOnly {
        fn device(&self) -> &UsbDevice {
            &self.0
        }
        fn open_device(&self) -> Option<Box<dyn crate::ports::UsbDeviceConnection>> {
            None
        }
        fn ports(&self) -> Vec<Box<dyn crate::ports::UsbSerialPort>> {
            Vec::new()
        }
    }

    fn driver(vendor_id: u16, name: &str) -> Box<dyn UsbSerialDriver> {
        Box::new(VendorOnly(UsbDevice::new(vendor_id, 0x0001, name)))
    }

    #[test]
    fn select_driver_takes_last_match() {
        let drivers = vec![
            driver(0x2341, "first"),
            driver(0x0403, "other"),
            driver(0x2341, "second"),
        ];
        let picked = select_driver(drivers, "2341").unwrap();
        assert_eq!(picked.device().name, "second");
    }

    #[test]
    fn select_driver_compares_padded_hex() {
        let drivers = vec![driver(0x0403, "ftdi")];
        assert!(select_driver(drivers, "0403").is_some());
        let drivers = vec![driver(0x0403, "ftdi")];
        assert!(select_driver(drivers, "403").is_none());
    }

    #[test]
    fn select_driver_none_when_no_vendor_matches() {
        let drivers = vec![driver(0x1A86, "ch340")];
        assert!(select_driver(drivers, "2341").is_none());
    }

    #[test]
    fn report_open_collapses_errors_to_false() {
        assert!(report_open(Ok(())));
        assert!(!report_open(Err(CommError::NoDevice)));
        assert!(!report_open(Err(CommError::PermissionPending("dev".into()))));
    }
}
