//! Core domain types
//!
//! Pure types with no I/O dependencies: errors, device descriptions,
//! line settings, permission/connection state and the manager configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;
