//! USB serial connection manager
//!
//! Finds an attached USB device by vendor ID, obtains permission to use it,
//! opens its serial port and exchanges hex-encoded frames with the host.
//!
//! ## Architecture (Hexagonal / Ports & Adapters)
//!
//! - `domain/` - Pure domain types, errors and configuration
//! - `codec/` - Hex frame encoding/decoding (pure functions)
//! - `ports/` - Trait definitions for the USB driver, permission service and listener
//! - `adapters/` - Implementations of ports (serialport, mock USB bus, channel listener)
//! - `manager/` - The connection manager and its background reader
//! - `state` - Connection manager state
//! - `commands/` - Console host commands (driving adapter)

// Core domain (pure, no I/O)
pub mod codec;
pub mod domain;
pub mod ports;

// Adapters (external I/O)
pub mod adapters;

// Connection management
pub mod manager;
pub mod state;

// Console host
pub mod commands;

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use adapters::host_permission::HostPermissionGate;
use adapters::mock_usb::MockUsbBus;
use adapters::serial_port::SystemUsbProber;
use commands::console::{self, PrintListener};
use domain::{CommError, CommResult, ConnectionState, ManagerConfig, UsbDevice};
use ports::{PermissionGate, UsbSerialProber};

pub use manager::ConnectionManager;

/// Vendor used when neither a config file nor PORTCOMM_VENDOR names one (Arduino)
const FALLBACK_VENDOR: &str = "2341";

/// How long the console waits for a permission-driven open to complete
const PERMISSION_WAIT: Duration = Duration::from_secs(5);

/// Initialise `env_logger`, honouring RUST_LOG (default level: info).
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

fn load_config() -> CommResult<ManagerConfig> {
    if let Some(path) = std::env::var_os("PORTCOMM_CONFIG") {
        return ManagerConfig::load(Path::new(&path));
    }
    let vendor = std::env::var("PORTCOMM_VENDOR").unwrap_or_else(|_| FALLBACK_VENDOR.to_string());
    Ok(ManagerConfig::for_vendor(&vendor))
}

/// Console host: open the configured vendor's device, send each stdin line
/// as a hex frame, print what comes back.
///
/// Set MOCK_USB=1 to run against an in-memory loopback device that first
/// has to be granted permission.
pub fn run() -> CommResult<()> {
    init_logging();
    let config = load_config()?;
    config.validate()?;

    let mock_bus = if std::env::var("MOCK_USB").is_ok_and(|v| v == "1") {
        let vendor_id = u16::from_str_radix(&config.vendor, 16)
            .map_err(|e| CommError::Config(format!("vendor '{}': {e}", config.vendor)))?;
        let bus = MockUsbBus::new();
        let port = bus.add_restricted_device(UsbDevice::new(vendor_id, 0x0001, "mock-usb-0"));
        port.set_loopback(true);
        Some(bus)
    } else {
        None
    };

    let (prober, gate): (Arc<dyn UsbSerialProber>, Arc<dyn PermissionGate>) = match &mock_bus {
        Some(bus) => (Arc::new(bus.clone()), Arc::new(bus.clone())),
        None => (Arc::new(SystemUsbProber), Arc::new(HostPermissionGate)),
    };

    let baud_rate = config.default_baud_rate;
    let manager = ConnectionManager::new(config, prober, gate)?;
    manager.set_listener(Arc::new(PrintListener));

    let opened = manager.open_and_connect(baud_rate);
    log::info!("Open at {baud_rate} baud: success={opened}");
    if !opened && manager.connection_state() == ConnectionState::PermissionRequested {
        if let Some(bus) = &mock_bus {
            // Stand-in for the user tapping "allow"
            bus.resolve_permissions(true);
        }
        wait_for_open(&manager, PERMISSION_WAIT);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let io_err = |e: io::Error| CommError::Io(format!("Console I/O failed: {e}"));
    writeln!(stdout, "{}", console::HELP).map_err(io_err)?;

    for line in stdin.lock().lines() {
        let line = line.map_err(io_err)?;
        match console::parse_line(&line) {
            Ok(Some(command)) => {
                if !console::execute(&manager, command, &mut stdout).map_err(io_err)? {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => writeln!(stdout, "{message}").map_err(io_err)?,
        }
    }

    manager.disconnect();
    Ok(())
}

fn wait_for_open(manager: &ConnectionManager, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match manager.connection_state() {
            ConnectionState::Open => return,
            ConnectionState::Closed => break,
            ConnectionState::PermissionRequested => thread::sleep(Duration::from_millis(50)),
        }
    }
    log::warn!("Device not opened after permission request");
}
