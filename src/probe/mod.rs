//! Probe modules for exercising gateway rate limits.

pub mod runner;

pub use runner::{CancelToken, ProbeConfig, ProbeRunner};
