// ABOUTME: Run status codes and the post-run report
// ABOUTME: Summarizes per-module outcomes and timings after the scheduler has joined a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use super::thread_group::ExecutionThreadGroup;
use crate::network::{ExecutionState, ModuleId, NetworkInterface};

/// Every module that ran completed.
pub const NO_ERROR: i32 = 0;
/// The network could not be grouped (cycle or bad group).
pub const STRUCTURAL_ERROR: i32 = -1;
/// The scheduler itself failed, for example a control task died.
pub const SYSTEM_ERROR: i32 = -2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failed,
    StructuralError,
}

impl RunStatus {
    fn classify(code: i32, summary: &RunSummary) -> Self {
        match code {
            NO_ERROR if summary.starved == 0 => RunStatus::Success,
            NO_ERROR => RunStatus::PartialSuccess,
            STRUCTURAL_ERROR | SYSTEM_ERROR => RunStatus::StructuralError,
            _ if summary.completed > 0 => RunStatus::PartialSuccess,
            _ => RunStatus::Failed,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "SUCCESS"),
            RunStatus::PartialSuccess => write!(f, "PARTIAL SUCCESS"),
            RunStatus::Failed => write!(f, "FAILED"),
            RunStatus::StructuralError => write!(f, "STRUCTURAL ERROR"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleReport {
    pub module_id: ModuleId,
    pub state: ExecutionState,
    pub execution_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub errored: usize,
    pub waiting: usize,
    pub executing: usize,
    /// Waiting modules held back by an errored upstream module, errored in this run or earlier.
    pub starved: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub code: i32,
    pub status: RunStatus,
    pub generated_at: DateTime<Utc>,
    pub modules: Vec<ModuleReport>,
    pub summary: RunSummary,
}

impl RunReport {
    /// Builds the report from the network's module states and the thread group registry.
    pub fn collect(
        run_id: impl Into<String>,
        code: i32,
        network: &dyn NetworkInterface,
        thread_group: &ExecutionThreadGroup,
    ) -> Self {
        let mut summary = RunSummary::default();

        let modules: Vec<ModuleReport> = network
            .modules()
            .into_iter()
            .map(|module| {
                let state = module.execution_state();
                summary.total += 1;
                match state {
                    ExecutionState::Waiting => summary.waiting += 1,
                    ExecutionState::Executing => summary.executing += 1,
                    ExecutionState::Completed => summary.completed += 1,
                    ExecutionState::Errored => summary.errored += 1,
                }

                let task = thread_group.get_thread_for_module(module.id());
                let (execution_id, started_at, finished_at) = match task {
                    Some(task) => (Some(task.execution_id), task.started_at, task.finished_at),
                    None => (None, None, None),
                };
                let duration = match (started_at, finished_at) {
                    (Some(start), Some(end)) => (end - start).to_std().ok(),
                    _ => None,
                };

                ModuleReport {
                    module_id: module.id().clone(),
                    state,
                    execution_id,
                    started_at,
                    finished_at,
                    duration,
                }
            })
            .collect();

        summary.starved = starved_modules(network).len();
        let status = RunStatus::classify(code, &summary);

        Self {
            run_id: run_id.into(),
            code,
            status,
            generated_at: Utc::now(),
            modules,
            summary,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == NO_ERROR
    }

    pub fn module(&self, id: &ModuleId) -> Option<&ModuleReport> {
        self.modules.iter().find(|report| &report.module_id == id)
    }

    pub fn modules_in(&self, state: ExecutionState) -> Vec<&ModuleId> {
        self.modules
            .iter()
            .filter(|report| report.state == state)
            .map(|report| &report.module_id)
            .collect()
    }
}

/// Waiting modules reachable from an errored module through Waiting modules only.
fn starved_modules(network: &dyn NetworkInterface) -> HashSet<ModuleId> {
    let states: HashMap<ModuleId, ExecutionState> = network
        .modules()
        .into_iter()
        .map(|module| (module.id().clone(), module.execution_state()))
        .collect();

    let mut dependents: HashMap<ModuleId, Vec<ModuleId>> = HashMap::new();
    for (id, deps) in network.dependency_map() {
        for dep in deps {
            dependents.entry(dep).or_default().push(id.clone());
        }
    }

    let mut frontier: VecDeque<ModuleId> = states
        .iter()
        .filter(|(_, state)| **state == ExecutionState::Errored)
        .map(|(id, _)| id.clone())
        .collect();
    let mut starved = HashSet::new();

    while let Some(id) = frontier.pop_front() {
        for next in dependents.get(&id).into_iter().flatten() {
            if states.get(next) == Some(&ExecutionState::Waiting) && starved.insert(next.clone()) {
                frontier.push_back(next.clone());
            }
        }
    }

    starved
}
