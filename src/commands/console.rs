//! Console commands — the text interface of the `portcomm` binary
//!
//! Each stdin line is either a hex frame to send or a `:`-prefixed command.
//! Parsing is pure; `execute` drives the manager and reports on `out`.

use std::io::{self, Write};

use crate::domain::{CommError, ConnectionState};
use crate::manager::ConnectionManager;
use crate::ports::PortReceiverListener;

pub const HELP: &str = "\
<hex>          send a frame, e.g. AA55010203
:open [baud]   open the vendor's device (default: configured baud rate)
:close         disconnect
:vendor <id>   change the target vendor (4 hex digits)
:status        show connection state
:help          this text
:quit          disconnect and exit";

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Send(String),
    Open(Option<u32>),
    Disconnect,
    Vendor(String),
    Status,
    Help,
    Quit,
}

/// Parse one input line. Blank lines are `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix(':') else {
        return Ok(Some(ConsoleCommand::Send(line.to_string())));
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();
    if parts.next().is_some() {
        return Err(format!("Too many arguments for ':{name}'"));
    }

    let parsed = match (name, arg) {
        ("open", None) => ConsoleCommand::Open(None),
        ("open", Some(baud)) => {
            let baud: u32 = baud
                .parse()
                .map_err(|_| format!("Invalid baud rate '{baud}'"))?;
            if baud == 0 {
                return Err("Baud rate must be non-zero".to_string());
            }
            ConsoleCommand::Open(Some(baud))
        }
        ("close", None) => ConsoleCommand::Disconnect,
        ("vendor", Some(vendor)) => ConsoleCommand::Vendor(vendor.to_string()),
        ("vendor", None) => return Err("Usage: :vendor <id>".to_string()),
        ("status", None) => ConsoleCommand::Status,
        ("help", None) => ConsoleCommand::Help,
        ("quit", None) | ("exit", None) => ConsoleCommand::Quit,
        _ => return Err(format!("Unknown command ':{command}' (try :help)")),
    };
    Ok(Some(parsed))
}

/// Run a command. Returns `Ok(false)` when the console should exit.
pub fn execute(
    manager: &ConnectionManager,
    command: ConsoleCommand,
    out: &mut impl Write,
) -> io::Result<bool> {
    match command {
        ConsoleCommand::Send(hex) => {
            if !manager.write(&hex) {
                writeln!(out, "send failed")?;
            }
        }
        ConsoleCommand::Open(baud) => {
            let baud = baud.unwrap_or(manager.config().default_baud_rate);
            let opened = manager.open_and_connect(baud);
            writeln!(out, "open at {baud} baud: {}", if opened { "ok" } else { "failed" })?;
            if !opened && manager.connection_state() == ConnectionState::PermissionRequested {
                writeln!(out, "waiting for USB permission")?;
            }
        }
        ConsoleCommand::Disconnect => {
            manager.disconnect();
            writeln!(out, "disconnected")?;
        }
        ConsoleCommand::Vendor(vendor) => {
            manager.set_vendor(&vendor);
            writeln!(out, "vendor set to {}", manager.vendor())?;
        }
        ConsoleCommand::Status => {
            let device = manager
                .connected_device()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                out,
                "state={:?} permission={:?} vendor={} baud={} device={device}",
                manager.connection_state(),
                manager.permission_state(),
                manager.vendor(),
                manager.baud_rate(),
            )?;
        }
        ConsoleCommand::Help => writeln!(out, "{HELP}")?,
        ConsoleCommand::Quit => {
            manager.disconnect();
            return Ok(false);
        }
    }
    Ok(true)
}

/// Prints received frames and reader errors to stdout.
pub struct PrintListener;

impl PortReceiverListener for PrintListener {
    fn on_data_receive(&self, hex: &str) {
        println!("<< {hex}");
    }

    fn on_error(&self, error: &CommError) {
        println!("!! {error}");
    }

    fn on_state_change(&self, state: ConnectionState) {
        println!("-- {state:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_line_is_a_frame() {
        assert_eq!(
            parse_line("  AA55 ").unwrap(),
            Some(ConsoleCommand::Send("AA55".into()))
        );
    }

    #[test]
    fn blank_line_is_nothing() {
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn open_with_and_without_baud() {
        assert_eq!(parse_line(":open").unwrap(), Some(ConsoleCommand::Open(None)));
        assert_eq!(
            parse_line(":open 115200").unwrap(),
            Some(ConsoleCommand::Open(Some(115_200)))
        );
        assert!(parse_line(":open fast").is_err());
        assert!(parse_line(":open 0").is_err());
    }

    #[test]
    fn vendor_needs_an_argument() {
        assert_eq!(
            parse_line(":vendor 1a86").unwrap(),
            Some(ConsoleCommand::Vendor("1a86".into()))
        );
        assert!(parse_line(":vendor").is_err());
    }

    #[test]
    fn quit_and_exit_are_aliases() {
        assert_eq!(parse_line(":quit").unwrap(), Some(ConsoleCommand::Quit));
        assert_eq!(parse_line(":exit").unwrap(), Some(ConsoleCommand::Quit));
    }

    #[test]
    fn unknown_and_overlong_commands_error() {
        assert!(parse_line(":frobnicate").is_err());
        assert!(parse_line(":status now please").is_err());
    }
}
