// ABOUTME: Error types for the execution scheduler
// ABOUTME: Separates structural graph failures from runtime and configuration errors

use thiserror::Error;

use crate::network::{ModuleId, NetworkError};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Network contains a dependency cycle through modules: {modules:?}")]
    CyclicGraph { modules: Vec<ModuleId> },

    #[error("No schedulable group remains: {enqueued} enqueued, {starved} starved, {total} total")]
    BadGroup {
        enqueued: usize,
        starved: usize,
        total: usize,
    },

    #[error("No executable available for module: {module_id}")]
    ExecutableNotFound { module_id: ModuleId },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("System error: {0}")]
    SystemError(String),
}

impl SchedulerError {
    /// True for failures caused by the shape of the graph rather than by a module.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SchedulerError::CyclicGraph { .. } | SchedulerError::BadGroup { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
