//! Background reader for an open port.
//!
//! Runs on its own thread, one per open connection. Each pass locks the port
//! for a single bounded read, releases it, then hands any bytes to the
//! listener as hex. Writes from the manager interleave between reads, so a
//! writer waits at most one read poll for the port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::codec::to_hex_string;
use crate::domain::{CommError, CommResult};
use crate::ports::PortReceiverListener;
use crate::state::{ListenerSlot, SharedPort};

/// Owns the reader thread. `stop()` only signals; `join()` also waits.
pub struct SerialIoManager {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SerialIoManager {
    pub fn start(
        port: SharedPort,
        listener: ListenerSlot,
        poll: Duration,
        buffer_size: usize,
    ) -> CommResult<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("portcomm-io".into())
            .spawn(move || run_reader(port, listener, flag, poll, buffer_size))
            .map_err(|e| CommError::Io(format!("Failed to start reader thread: {e}")))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// True until stopped or until the reader exits on an error
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop and wait for the thread to exit.
    ///
    /// Called from the reader thread itself (a listener disconnecting from
    /// inside a callback) the thread is detached instead; it exits as soon as
    /// the callback returns.
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Serial reader thread panicked");
            }
        }
    }
}

impl Drop for SerialIoManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_reader(
    port: SharedPort,
    listener: ListenerSlot,
    running: Arc<AtomicBool>,
    poll: Duration,
    buffer_size: usize,
) {
    log::debug!("Serial reader started");
    let mut buffer = vec![0u8; buffer_size];

    while running.load(Ordering::SeqCst) {
        // Lock scope ends before any listener call
        let result = match port.lock() {
            Ok(mut port) => port.read(&mut buffer, poll),
            Err(_) => Err(CommError::Io("Port state corrupted".into())),
        };

        match result {
            Ok(0) => {}
            Ok(n) => on_new_data(&listener, &buffer[..n]),
            Err(e) => {
                // Errors after stop() come from the port being closed under us
                if running.swap(false, Ordering::SeqCst) {
                    log::warn!("Serial reader stopped: {e}");
                    on_run_error(&listener, &e);
                }
                break;
            }
        }
    }

    log::debug!("Serial reader exited");
}

fn on_new_data(listener: &ListenerSlot, data: &[u8]) {
    let hex = to_hex_string(data);
    log::debug!("RX: {hex}");
    match current_listener(listener) {
        Some(listener) => listener.on_data_receive(&hex),
        None => log::debug!("RX dropped: no listener"),
    }
}

fn on_run_error(listener: &ListenerSlot, error: &CommError) {
    if let Some(listener) = current_listener(listener) {
        listener.on_error(error);
    }
}

fn current_listener(slot: &ListenerSlot) -> Option<Arc<dyn PortReceiverListener>> {
    slot.lock().ok().and_then(|listener| listener.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    use crate::domain::{ConnectionState, PortParameters};
    use crate::ports::{UsbDeviceConnection, UsbSerialPort};

    // ---------------------------------------------------------------------------
    // ScriptedPort: returns queued read results, then idles
    // ---------------------------------------------------------------------------

    struct ScriptedPort {
        reads: Vec<CommResult<Vec<u8>>>,
    }

    impl UsbSerialPort for ScriptedPort {
        fn open(&mut self, _connection: Box<dyn UsbDeviceConnection>) -> CommResult<()> {
            Ok(())
        }
        fn set_parameters(&mut self, _params: &PortParameters) -> CommResult<()> {
            Ok(())
        }
        fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> CommResult<usize> {
            if self.reads.is_empty() {
                thread::sleep(timeout);
                return Ok(0);
            }
            let data = self.reads.remove(0)?;
            buffer[..data.len()].copy_from_slice(&data);
            Ok(data.len())
        }
        fn write(&mut self, _data: &[u8], _timeout: Duration) -> CommResult<()> {
            Ok(())
        }
        fn close(&mut self) -> CommResult<()> {
            Ok(())
        }
        fn is_open(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct Recorder {
        data: Mutex<Vec<String>>,
        errors: Mutex<Vec<CommError>>,
    }

    impl PortReceiverListener for Recorder {
        fn on_data_receive(&self, hex: &str) {
            self.data.lock().unwrap().push(hex.to_string());
        }
        fn on_error(&self, error: &CommError) {
            self.errors.lock().unwrap().push(error.clone());
        }
        fn on_state_change(&self, _state: ConnectionState) {}
    }

    fn start(reads: Vec<CommResult<Vec<u8>>>) -> (SerialIoManager, Arc<Recorder>) {
        let port: SharedPort = Arc::new(Mutex::new(Box::new(ScriptedPort { reads })));
        let recorder = Arc::new(Recorder::default());
        let slot: ListenerSlot = Arc::new(Mutex::new(Some(
            recorder.clone() as Arc<dyn PortReceiverListener>
        )));
        let reader = SerialIoManager::start(port, slot, Duration::from_millis(5), 64).unwrap();
        (reader, recorder)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn data_is_delivered_as_hex() {
        let (reader, recorder) = start(vec![Ok(vec![0x01, 0xAB]), Ok(vec![0xFF])]);
        assert!(wait_for(|| recorder.data.lock().unwrap().len() == 2));
        assert_eq!(*recorder.data.lock().unwrap(), vec!["01AB", "FF"]);
        reader.join();
    }

    #[test]
    fn read_error_is_forwarded_and_stops_reader() {
        let (reader, recorder) = start(vec![Err(CommError::Io("device detached".into()))]);
        assert!(wait_for(|| !recorder.errors.lock().unwrap().is_empty()));
        assert!(wait_for(|| !reader.is_running()));
        assert_eq!(
            recorder.errors.lock().unwrap()[0],
            CommError::Io("device detached".into())
        );
        reader.join();
    }

    #[test]
    fn stop_then_join_returns() {
        let (reader, recorder) = start(Vec::new());
        reader.stop();
        assert!(!reader.is_running());
        reader.join();
        assert!(recorder.errors.lock().unwrap().is_empty());
    }
}
