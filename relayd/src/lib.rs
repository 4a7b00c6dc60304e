//! relayd library crate.
//!
//! Exposes the daemon's modules to integration tests; the binary is in
//! main.rs.

pub mod config;
pub mod listener;
pub mod runtime;
pub mod telemetry;
pub mod worker;
