//! nbdeploy - deployment tasks for the nbviewer fleet.
//!
//! The binary is a thin wrapper over [`commands::Cli`]; the modules below
//! hold the deployment logic so it can be driven against test doubles.

pub mod bump;
pub mod commands;
pub mod config;
pub mod error;
pub mod fleet;
pub mod launcher;
pub mod liveness;
pub mod output;
pub mod secrets;
pub mod smoke;
pub mod upgrade;
