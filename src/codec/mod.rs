//! Hex codec for serial frames.
//!
//! Frames cross the public API as hexadecimal strings: outbound writes are
//! decoded to bytes before hitting the port, inbound reads are encoded before
//! reaching the listener.
//!
//! - `encode`: bytes → uppercase hex string (pure)
//! - `decode`: hex string → bytes (pure)

pub mod decode;
pub mod encode;

pub use decode::hex_to_bytes;
pub use encode::to_hex_string;
