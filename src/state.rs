//! Connection manager state
//!
//! Everything that changes on open, disconnect or a permission result lives
//! in `ManagerState`, which the manager keeps behind a single Mutex. The
//! background reader never touches it: it only shares the port and the
//! listener slot.

use std::sync::{Arc, Mutex};

use crate::domain::{ConnectionState, PermissionState, UsbDevice};
use crate::manager::io_manager::SerialIoManager;
use crate::ports::{PortReceiverListener, UsbSerialPort};

/// Port shared between the manager (writes, close) and its reader
pub type SharedPort = Arc<Mutex<Box<dyn UsbSerialPort>>>;

/// The registered listener, if any. Replaced wholesale by `set_listener`.
pub type ListenerSlot = Arc<Mutex<Option<Arc<dyn PortReceiverListener>>>>;

/// An open port and the reader bound to it
pub struct OpenConnection {
    pub device: UsbDevice,
    pub port: SharedPort,
    pub reader: SerialIoManager,
}

pub struct ManagerState {
    /// Target vendor, 4 uppercase hex digits
    pub vendor: String,
    /// Last baud rate passed to `open_and_connect` (0 = never called)
    pub baud_rate: u32,
    pub permission: PermissionState,
    /// An open was deferred for a permission request and should re-run when
    /// the result arrives. Cleared by `disconnect`.
    pub retry_pending: bool,
    /// `Some` exactly while the port is open
    pub connection: Option<OpenConnection>,
}

impl ManagerState {
    pub fn new(vendor: String) -> Self {
        Self {
            vendor,
            baud_rate: 0,
            permission: PermissionState::Unknown,
            retry_pending: false,
            connection: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.is_open() {
            ConnectionState::Open
        } else if self.retry_pending {
            ConnectionState::PermissionRequested
        } else {
            ConnectionState::Closed
        }
    }

    /// The new connection state, if it differs from `before`.
    pub fn transition_from(&self, before: ConnectionState) -> Option<ConnectionState> {
        let now = self.connection_state();
        (now != before).then_some(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_closed() {
        let state = ManagerState::new("2341".into());
        assert!(!state.is_open());
        assert_eq!(state.baud_rate, 0);
        assert_eq!(state.connection_state(), ConnectionState::Closed);
    }

    #[test]
    fn deferred_open_is_visible_as_state() {
        let mut state = ManagerState::new("2341".into());
        state.permission = PermissionState::Requested;
        state.retry_pending = true;
        assert_eq!(state.connection_state(), ConnectionState::PermissionRequested);
        assert_eq!(
            state.transition_from(ConnectionState::Closed),
            Some(ConnectionState::PermissionRequested)
        );
    }

    #[test]
    fn outstanding_request_without_retry_reads_as_closed() {
        let mut state = ManagerState::new("2341".into());
        state.permission = PermissionState::Requested;
        assert_eq!(state.connection_state(), ConnectionState::Closed);
    }

    #[test]
    fn denied_permission_reads_as_closed() {
        let mut state = ManagerState::new("2341".into());
        state.permission = PermissionState::Denied;
        assert_eq!(state.connection_state(), ConnectionState::Closed);
        assert_eq!(state.transition_from(ConnectionState::Closed), None);
    }
}
