//! # charcoal
//!
//! Operator CLI over `charcoal-core`. The binary in `main.rs` only parses
//! arguments and installs logging; everything else lives here so it can be
//! driven from tests.

pub mod cli;
pub mod config;
