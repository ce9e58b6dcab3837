// ABOUTME: Error types for network structure operations
// ABOUTME: Covers unknown or duplicate modules and mutation during a run

use thiserror::Error;

use super::module::ModuleId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Module already exists: {module_id}")]
    DuplicateModule { module_id: ModuleId },

    #[error("Module not found: {module_id}")]
    UnknownModule { module_id: ModuleId },

    #[error("Network structure cannot change while an execution is in progress")]
    ExecutionInProgress,
}

pub type Result<T> = std::result::Result<T, NetworkError>;
