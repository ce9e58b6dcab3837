// ABOUTME: Module capability interface and per-module execution state
// ABOUTME: Defines everything the scheduler may observe or invoke on a dataflow module

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Stable identity of a module, unique within one network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ModuleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ModuleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Waiting,
    Executing,
    Completed,
    Errored,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Errored)
    }

    fn as_u8(self) -> u8 {
        match self {
            ExecutionState::Waiting => 0,
            ExecutionState::Executing => 1,
            ExecutionState::Completed => 2,
            ExecutionState::Errored => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ExecutionState::Waiting,
            1 => ExecutionState::Executing,
            2 => ExecutionState::Completed,
            _ => ExecutionState::Errored,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionState::Waiting => write!(f, "waiting"),
            ExecutionState::Executing => write!(f, "executing"),
            ExecutionState::Completed => write!(f, "completed"),
            ExecutionState::Errored => write!(f, "errored"),
        }
    }
}

/// Lock-free cell holding an [`ExecutionState`].
///
/// Written by the single task executing the module, read by the producer at any time.
#[derive(Debug)]
pub struct AtomicExecutionState(AtomicU8);

impl AtomicExecutionState {
    pub fn new(state: ExecutionState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn load(&self) -> ExecutionState {
        ExecutionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ExecutionState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    /// Transition only if the current state is `current`. Returns whether it happened.
    pub fn transition(&self, current: ExecutionState, next: ExecutionState) -> bool {
        self.0
            .compare_exchange(
                current.as_u8(),
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for AtomicExecutionState {
    fn default() -> Self {
        Self::new(ExecutionState::Waiting)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("module {module_id} failed: {message}")]
pub struct ModuleError {
    pub module_id: ModuleId,
    pub message: String,
}

/// The capability interface the scheduler depends on.
///
/// Implementations own their computation; the scheduler only reads the state,
/// moves it to `Executing` on dispatch and to a terminal state when `execute` returns.
pub trait Module: Send + Sync {
    fn id(&self) -> &ModuleId;

    fn execution_state(&self) -> ExecutionState;

    fn set_execution_state(&self, state: ExecutionState);

    /// Performs the module's work on the calling thread.
    fn execute(&self) -> Result<(), ModuleError>;
}

pub type ModuleHandle = Arc<dyn Module>;

type ModuleWork = Box<dyn Fn() -> std::result::Result<(), String> + Send + Sync>;

/// A module whose work is an arbitrary closure.
pub struct FnModule {
    id: ModuleId,
    state: AtomicExecutionState,
    work: ModuleWork,
}

impl FnModule {
    pub fn new<F>(id: impl Into<ModuleId>, work: F) -> Self
    where
        F: Fn() -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            state: AtomicExecutionState::default(),
            work: Box::new(work),
        }
    }

    pub fn noop(id: impl Into<ModuleId>) -> Self {
        Self::new(id, || Ok(()))
    }

    pub fn failing(id: impl Into<ModuleId>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(id, move || Err(message.clone()))
    }

    pub fn into_handle(self) -> ModuleHandle {
        Arc::new(self)
    }
}

impl Module for FnModule {
    fn id(&self) -> &ModuleId {
        &self.id
    }

    fn execution_state(&self) -> ExecutionState {
        self.state.load()
    }

    fn set_execution_state(&self, state: ExecutionState) {
        self.state.store(state);
    }

    fn execute(&self) -> Result<(), ModuleError> {
        (self.work)().map_err(|message| ModuleError {
            module_id: self.id.clone(),
            message,
        })
    }
}

impl fmt::Debug for FnModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnModule")
            .field("id", &self.id)
            .field("state", &self.state.load())
            .finish()
    }
}
