//! Port traits (interfaces)
//!
//! These traits define the boundaries between the connection manager and
//! the outside world: the USB serial driver, the platform permission
//! service and the host's listener. Adapters implement them.

pub mod driver;
pub mod listener;
pub mod permission;

pub use driver::*;
pub use listener::*;
pub use permission::*;
