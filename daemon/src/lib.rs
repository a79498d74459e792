//! Binary wiring for the whole workspace (headless-client analog).
//!
//! Grounded on `headless-client::main`'s shape: parse config, init logging,
//! construct every long-lived collaborator, spawn its worker(s), then block
//! on a signal before tearing everything down. The actual per-component
//! logic all lives in `libs/*`; this crate only composes it for one host
//! process.

pub mod config;
pub mod signals;
pub mod wiring;

pub use config::DaemonConfig;
pub use wiring::{run, Handles};
