//! VO2 Mini firmware library.
//!
//! Breath detection and gas-exchange computation for the portable metabolic
//! analyser, plus the glue around it (settings, telemetry, screens). Pure
//! logic builds and tests on a host; ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` inside each module.

#![deny(unused_must_use)]

pub mod config;
pub mod display;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod events;
pub mod input;
pub mod sensors;
pub mod settings;
pub mod tasks;
pub mod telemetry;
