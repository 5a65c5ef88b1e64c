#![no_std]

// Shared logic for the voltage relay node.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and exposing collaborator traits the other crates implement.

pub mod channel;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod frame;
pub mod relay;
pub mod sampling;
pub mod storage;
pub mod telemetry;
pub mod transport;

pub use config::NodeConfig;
