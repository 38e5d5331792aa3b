//! Shared test utilities for subq integration tests.
//!
//! - `TestHarness`: temp library root, in-memory job store and settings
//! - `fakes`: scripted stand-ins for the external tools

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::{fast_config, TestHarness};
