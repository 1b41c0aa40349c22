//! Vatel CLI Library Crate
//!
//! Configuration, command-line definition and the work behind each
//! subcommand. The `vatel` binary is a thin wrapper around this library.

pub mod cli;
pub mod commands;
pub mod config;
