//! Composition root for the `sendcored` binary: top-level config plus the
//! controller that wires every sub-crate into one running instance.

pub mod config;
pub mod controller;

pub use config::Config;
