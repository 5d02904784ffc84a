//! # skylink-ground: ground link service
//!
//! Runs a [`skylink_core::Supervisor`] against a vehicle over UDP or TCP
//! and reports link state, heartbeat age, and synchronized parameters.
//!
//! Settings come from a TOML file (see [`config::GroundConfig`]), with
//! the most common ones overridable on the command line.

pub mod config;
