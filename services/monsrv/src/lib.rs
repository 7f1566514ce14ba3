//! Modbus TCP Monitoring Service
//!
//! Backend for a browser UI that monitors a single Modbus TCP device. The
//! [`device::ConnectionManager`] owns the one connection to the device; the
//! [`api`] module exposes it over a small JSON API.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod device;
pub mod error;

pub use common::wait_for_shutdown;
