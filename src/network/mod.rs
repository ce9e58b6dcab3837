// ABOUTME: Network module for the dataflow scheduler
// ABOUTME: Provides modules, connections and the lookups the engine consumes

pub mod error;
pub mod graph;
pub mod module;

pub use error::{NetworkError, Result};
pub use graph::{Connection, ExecutableLookup, Network, NetworkInterface};
pub use module::{
    AtomicExecutionState, ExecutionState, FnModule, Module, ModuleError, ModuleHandle, ModuleId,
};
