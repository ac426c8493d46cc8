//! Driving adapters: the console host that exercises the manager.

pub mod console;
