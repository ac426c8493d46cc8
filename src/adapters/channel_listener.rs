//! Listener adapter that turns callbacks into a bounded event queue.
//!
//! Callbacks run on the reader thread; a host that drains events on its own
//! schedule (a UI loop, say) registers a `ChannelListener` and reads the
//! `Receiver`. When the queue is full the newest event is dropped and
//! counted, so a slow consumer can tell that it missed frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::domain::{CommError, ConnectionState};
use crate::ports::PortReceiverListener;

/// Events delivered through the queue
#[derive(Debug, Clone, PartialEq)]
pub enum PortEvent {
    /// Received frame, uppercase hex
    Data(String),
    /// Background reader failure
    Error(CommError),
    StateChanged(ConnectionState),
}

pub struct ChannelListener {
    sender: Sender<PortEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelListener {
    /// Create a listener with room for `capacity` undelivered events.
    pub fn bounded(capacity: usize) -> (Self, Receiver<PortEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let listener = Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (listener, receiver)
    }

    /// Events dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn push(&self, event: PortEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("Listener queue full, event dropped ({total} so far)");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Listener queue closed, event dropped");
            }
        }
    }
}

impl PortReceiverListener for ChannelListener {
    fn on_data_receive(&self, hex: &str) {
        self.push(PortEvent::Data(hex.to_string()));
    }

    fn on_error(&self, error: &CommError) {
        self.push(PortEvent::Error(error.clone()));
    }

    fn on_state_change(&self, state: ConnectionState) {
        self.push(PortEvent::StateChanged(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (listener, rx) = ChannelListener::bounded(8);
        listener.on_state_change(ConnectionState::Open);
        listener.on_data_receive("0A0B");
        listener.on_error(&CommError::Io("gone".into()));

        assert_eq!(rx.try_recv().unwrap(), PortEvent::StateChanged(ConnectionState::Open));
        assert_eq!(rx.try_recv().unwrap(), PortEvent::Data("0A0B".into()));
        assert_eq!(rx.try_recv().unwrap(), PortEvent::Error(CommError::Io("gone".into())));
        assert_eq!(listener.dropped(), 0);
    }

    #[test]
    fn full_queue_drops_newest_and_counts() {
        let (listener, rx) = ChannelListener::bounded(2);
        for hex in ["01", "02", "03", "04"] {
            listener.on_data_receive(hex);
        }

        assert_eq!(listener.dropped(), 2);
        assert_eq!(rx.try_recv().unwrap(), PortEvent::Data("01".into()));
        assert_eq!(rx.try_recv().unwrap(), PortEvent::Data("02".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receiver_is_not_counted_as_full() {
        let (listener, rx) = ChannelListener::bounded(1);
        drop(rx);
        listener.on_data_receive("FF");
        assert_eq!(listener.dropped(), 0);
    }
}
