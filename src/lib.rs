// ABOUTME: Main library module for the netsched dataflow scheduler
// ABOUTME: Exports all core modules and provides the public API

pub mod cli;
pub mod engine;
pub mod network;

// Re-export commonly used types
pub use cli::{App, Args, Config};
pub use engine::{
    ExecutionContext, ExecutionStrategy, RunEvent, RunHandle, RunReport, Scheduler,
    SchedulerConfig, SchedulerError,
};
pub use network::{ExecutionState, FnModule, Module, ModuleId, Network};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
