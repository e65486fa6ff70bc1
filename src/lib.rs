//! Tasmota MQTT gateway library.
//!
//! Terminates MQTT sessions from Tasmota-class devices, decodes their
//! telemetry into a hierarchical state store and routes external state
//! changes back to the devices as commands.

pub mod color;
pub mod config;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod server;
pub mod store;
pub mod wire;
