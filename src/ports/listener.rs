//! Listener port — how received frames and reader errors reach the host

use crate::domain::{CommError, ConnectionState};

/// Receives events from an open connection.
///
/// Called from the background reader thread (data, errors) or from whichever
/// thread caused a state change. Never called while the manager holds its
/// state lock, so implementations may call back into the manager.
pub trait PortReceiverListener: Send + Sync {
    /// A frame arrived, as an uppercase hex string
    fn on_data_receive(&self, hex: &str);

    /// The background reader failed and stopped
    fn on_error(&self, error: &CommError);

    /// The connection state changed (e.g. a permission grant opened the port)
    fn on_state_change(&self, _state: ConnectionState) {}
}
