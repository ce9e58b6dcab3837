// ABOUTME: Execution thread group tracking one execution task per dispatched module
// ABOUTME: Starts module work on blocking threads, records it, and joins it at run end

use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::network::{ExecutableLookup, ExecutionState, ModuleHandle, ModuleId};

/// Registry entry for one module execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTask {
    pub module_id: ModuleId,
    pub execution_id: String,
    pub dispatched_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub final_state: Option<ExecutionState>,
}

type Registry = Arc<Mutex<IndexMap<ModuleId, ExecutionTask>>>;

pub struct ExecutionThreadGroup {
    registry: Registry,
    handles: Mutex<Vec<JoinHandle<()>>>,
    completions: Arc<Notify>,
    limiter: Option<Arc<Semaphore>>,
}

impl ExecutionThreadGroup {
    /// `max_concurrent` of `None` lets every dispatched module run at once.
    pub fn new(max_concurrent: Option<usize>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(IndexMap::new())),
            handles: Mutex::new(Vec::new()),
            completions: Arc::new(Notify::new()),
            limiter: max_concurrent.map(|permits| Arc::new(Semaphore::new(permits.max(1)))),
        }
    }

    /// Marks the module `Executing` and runs it on its own task without waiting.
    ///
    /// When the work returns the module moves to `Completed` or `Errored`; errors
    /// and panics are recorded in `lookup` and never propagate further.
    pub fn start_execution(&self, module: ModuleHandle, lookup: Arc<dyn ExecutableLookup>) {
        let module_id = module.id().clone();
        module.set_execution_state(ExecutionState::Executing);

        self.registry.lock().insert(
            module_id.clone(),
            ExecutionTask {
                module_id: module_id.clone(),
                execution_id: uuid::Uuid::new_v4().to_string(),
                dispatched_at: Utc::now(),
                started_at: None,
                finished_at: None,
                final_state: None,
            },
        );

        let registry = Arc::clone(&self.registry);
        let completions = Arc::clone(&self.completions);
        let limiter = self.limiter.clone();

        let handle = tokio::spawn(async move {
            let _permit = match limiter {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };

            if let Some(task) = registry.lock().get_mut(&module_id) {
                task.started_at = Some(Utc::now());
            }
            debug!("Executing module {}", module_id);

            let work = Arc::clone(&module);
            let state = match tokio::task::spawn_blocking(move || work.execute()).await {
                Ok(Ok(())) => ExecutionState::Completed,
                Ok(Err(module_error)) => {
                    warn!("{}", module_error);
                    ExecutionState::Errored
                }
                Err(join_error) => {
                    error!("Module {} aborted: {}", module_id, join_error);
                    ExecutionState::Errored
                }
            };

            if state == ExecutionState::Errored {
                lookup.record_error(&module_id);
            }
            module.set_execution_state(state);

            if let Some(task) = registry.lock().get_mut(&module_id) {
                task.finished_at = Some(Utc::now());
                task.final_state = Some(state);
            }
            debug!("Module {} finished: {}", module_id, state);

            completions.notify_one();
        });

        self.handles.lock().push(handle);
    }

    /// Waits until every task started so far has finished. Returns how many were joined.
    pub async fn join_all(&self) -> usize {
        let mut joined = 0;

        loop {
            let handles = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                break;
            }

            for result in join_all(handles).await {
                joined += 1;
                if let Err(join_error) = result {
                    error!("Execution task join error: {}", join_error);
                }
            }
        }

        joined
    }

    /// Forgets every recorded execution. Used between runs.
    pub fn clear(&self) {
        self.registry.lock().clear();
        self.handles.lock().clear();
    }

    pub fn get_thread_for_module(&self, id: &ModuleId) -> Option<ExecutionTask> {
        self.registry.lock().get(id).cloned()
    }

    /// Snapshot of all executions in dispatch order.
    pub fn tasks(&self) -> Vec<ExecutionTask> {
        self.registry.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    /// Notified once each time a module reaches a terminal state.
    pub fn completion_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.completions)
    }
}

impl Default for ExecutionThreadGroup {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for ExecutionThreadGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionThreadGroup")
            .field("tasks", &self.len())
            .field("bounded", &self.limiter.is_some())
            .finish()
    }
}
