// ABOUTME: Execution strategies selectable on the scheduler
// ABOUTME: Serial and group-at-a-time executors alongside the dynamic producer/consumer mode

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::context::ExecutionContext;
use super::dependency::DependencyGrouper;
use super::error::{Result, SchedulerError};
use super::thread_group::ExecutionThreadGroup;
use crate::network::{ExecutionState, Module, ModuleId};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// One module at a time in grouping order.
    Serial,
    /// One group at a time, every member of the group concurrently.
    Parallel,
    /// Producer/consumer: modules start as soon as their dependencies complete.
    #[default]
    Dynamic,
}

impl FromStr for ExecutionStrategy {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(ExecutionStrategy::Serial),
            "parallel" => Ok(ExecutionStrategy::Parallel),
            "dynamic" => Ok(ExecutionStrategy::Dynamic),
            other => Err(SchedulerError::ConfigurationError(format!(
                "unknown execution strategy '{}', expected serial, parallel or dynamic",
                other
            ))),
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecutionStrategy::Serial => write!(f, "serial"),
            ExecutionStrategy::Parallel => write!(f, "parallel"),
            ExecutionStrategy::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Precomputed-order executor shared by the serial and parallel strategies.
struct BatchRunner<'a> {
    context: &'a ExecutionContext,
    thread_group: &'a ExecutionThreadGroup,
    /// Snapshot taken at start; the network is frozen for the rest of the run.
    dependencies: HashMap<ModuleId, Vec<ModuleId>>,
    blocked: HashSet<ModuleId>,
    dispatched: usize,
}

impl<'a> BatchRunner<'a> {
    fn new(context: &'a ExecutionContext, thread_group: &'a ExecutionThreadGroup) -> Self {
        Self {
            context,
            thread_group,
            dependencies: context.network.dependency_map(),
            blocked: HashSet::new(),
            dispatched: 0,
        }
    }

    /// Starts `id` unless an upstream module errored or was blocked.
    fn dispatch(&mut self, id: &ModuleId) {
        let failed_dependency = self
            .dependencies
            .get(id)
            .and_then(|deps| deps.iter().find(|&dep| self.is_failed(dep)))
            .cloned();

        if let Some(dep) = failed_dependency {
            warn!("Module {} will not run: dependency {} failed", id, dep);
            self.blocked.insert(id.clone());
            return;
        }

        match self.context.lookup.lookup_executable(id) {
            Some(module) => {
                debug!("Dispatching module {}", id);
                self.thread_group
                    .start_execution(module, Arc::clone(&self.context.lookup));
                self.dispatched += 1;
            }
            None => {
                error!("{}", SchedulerError::ExecutableNotFound { module_id: id.clone() });
                self.context.lookup.record_error(id);
                self.blocked.insert(id.clone());
            }
        }
    }

    fn is_failed(&self, id: &ModuleId) -> bool {
        self.blocked.contains(id)
            || self
                .context
                .lookup
                .lookup_executable(id)
                .map(|module| module.execution_state() == ExecutionState::Errored)
                .unwrap_or(false)
    }
}

/// Runs the universe one module at a time, joining each before the next starts.
pub async fn run_serial(
    context: &ExecutionContext,
    grouper: &DependencyGrouper,
    thread_group: &ExecutionThreadGroup,
    universe: &HashSet<ModuleId>,
) -> Result<usize> {
    let order = grouper.schedule_filtered(context.network.as_ref(), &|module: &dyn Module| {
        universe.contains(module.id())
    })?;
    info!("Serial run over {} modules", order.len());

    let mut runner = BatchRunner::new(context, thread_group);
    for id in order.flatten() {
        runner.dispatch(&id);
        thread_group.join_all().await;
    }

    Ok(runner.dispatched)
}

/// Runs the universe group by group; all members of a group execute concurrently.
pub async fn run_parallel(
    context: &ExecutionContext,
    grouper: &DependencyGrouper,
    thread_group: &ExecutionThreadGroup,
    universe: &HashSet<ModuleId>,
) -> Result<usize> {
    let order = grouper.schedule_filtered(context.network.as_ref(), &|module: &dyn Module| {
        universe.contains(module.id())
    })?;
    info!(
        "Parallel run over {} modules in {} groups",
        order.len(),
        order.depth()
    );

    let mut runner = BatchRunner::new(context, thread_group);
    for (index, members) in order.groups() {
        debug!("Starting group {} with {} modules", index, members.len());
        for id in members {
            runner.dispatch(id);
        }
        thread_group.join_all().await;
    }

    Ok(runner.dispatched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{FnModule, Network};
    use parking_lot::Mutex;

    fn recording_network(order: Arc<Mutex<Vec<String>>>) -> Arc<Network> {
        let network = Arc::new(Network::new());
        for id in ["c", "b", "a", "d"] {
            let order = Arc::clone(&order);
            let module = FnModule::new(id, move || {
                order.lock().push(id.to_string());
                Ok(())
            });
            network.add_module(module.into_handle()).unwrap();
        }
        network.connect("a", "b").unwrap();
        network.connect("b", "c").unwrap();
        network.connect("a", "d").unwrap();
        network
    }

    fn universe_of(network: &Network) -> HashSet<ModuleId> {
        ["a", "b", "c", "d"]
            .into_iter()
            .filter_map(|id| network.module(&ModuleId::from(id)))
            .map(|module| module.id().clone())
            .collect()
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "Serial".parse::<ExecutionStrategy>().unwrap(),
            ExecutionStrategy::Serial
        );
        assert_eq!(ExecutionStrategy::default(), ExecutionStrategy::Dynamic);
        assert!("round-robin".parse::<ExecutionStrategy>().is_err());
        assert_eq!(ExecutionStrategy::Parallel.to_string(), "parallel");
    }

    #[tokio::test]
    async fn test_serial_respects_dependencies() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let network = recording_network(order.clone());
        let context = ExecutionContext::for_network(network.clone());
        let group = ExecutionThreadGroup::default();

        let dispatched = run_serial(
            &context,
            &DependencyGrouper::new(),
            &group,
            &universe_of(&network),
        )
        .await
        .unwrap();

        assert_eq!(dispatched, 4);
        let order = order.lock();
        let position = |id: &str| order.iter().position(|seen| seen == id).unwrap();
        assert_eq!(position("a"), 0);
        assert!(position("b") < position("c"));
    }

    #[tokio::test]
    async fn test_parallel_blocks_downstream_of_failure() {
        let network = Arc::new(Network::new());
        network
            .add_module(FnModule::failing("src", "no data").into_handle())
            .unwrap();
        for id in ["mid", "sink", "other"] {
            network.add_module(FnModule::noop(id).into_handle()).unwrap();
        }
        network.connect("src", "mid").unwrap();
        network.connect("mid", "sink").unwrap();

        let universe: HashSet<ModuleId> = ["src", "mid", "sink", "other"]
            .into_iter()
            .map(ModuleId::from)
            .collect();
        let context = ExecutionContext::for_network(network.clone());
        let group = ExecutionThreadGroup::default();

        let dispatched = run_parallel(&context, &DependencyGrouper::new(), &group, &universe)
            .await
            .unwrap();

        assert_eq!(dispatched, 2);
        let state = |id: &str| network.module(&ModuleId::from(id)).unwrap().execution_state();
        assert_eq!(state("src"), ExecutionState::Errored);
        assert_eq!(state("other"), ExecutionState::Completed);
        assert_eq!(state("mid"), ExecutionState::Waiting);
        assert_eq!(state("sink"), ExecutionState::Waiting);
    }
}
