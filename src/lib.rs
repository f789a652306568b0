// Stepwright: Workflow step-execution engine for RPA automation
// License: Apache-2.0

pub mod bus;
pub mod config;
pub mod debug;
pub mod engine;
pub mod error;
pub mod journal;
pub mod local;
pub mod logger;
pub mod registry;
pub mod remote;
pub mod validate;
pub mod variables;
pub mod workflow;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
