//! Command-line interface
//!
//! Only available with the `server` feature.

#[path = "main.rs"]
mod main_impl;

pub use main_impl::{main, Cli, CliBackend, Command};
