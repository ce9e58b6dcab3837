// ABOUTME: Execution engine module for the netsched dataflow scheduler
// ABOUTME: Groups modules by dependency and runs them concurrently as they become ready

pub mod barrier;
pub mod consumer;
pub mod context;
pub mod dependency;
pub mod error;
pub mod producer;
pub mod queue;
pub mod result;
pub mod scheduler;
pub mod strategy;
pub mod thread_group;

pub use barrier::StartupBarrier;
pub use consumer::Consumer;
pub use context::{filters, ExecutionBounds, ExecutionContext, ModuleFilter, RunEvent};
pub use dependency::{DependencyGrouper, ExecutionOrder};
pub use error::{Result, SchedulerError};
pub use producer::Producer;
pub use queue::ReadyWorkQueue;
pub use result::{
    ModuleReport, RunReport, RunStatus, RunSummary, NO_ERROR, STRUCTURAL_ERROR, SYSTEM_ERROR,
};
pub use scheduler::{RunHandle, Scheduler, SchedulerConfig};
pub use strategy::ExecutionStrategy;
pub use thread_group::{ExecutionTask, ExecutionThreadGroup};
