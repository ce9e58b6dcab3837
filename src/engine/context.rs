// ABOUTME: Execution context and bounds for one scheduler run
// ABOUTME: Carries the network, executable lookup, module filter and run event channel

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::network::{
    ExecutableLookup, ExecutionState, Module, ModuleId, Network, NetworkInterface,
};

/// Caller-supplied restriction on which modules a run may touch.
pub type ModuleFilter = Arc<dyn Fn(&dyn Module) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Started { run_id: String },
    Finished { run_id: String, code: i32 },
}

/// Start/finish notification points observable by any number of listeners.
///
/// Both events travel on one channel, so every subscriber sees `Started`
/// before the matching `Finished`.
#[derive(Debug, Clone)]
pub struct ExecutionBounds {
    events: broadcast::Sender<RunEvent>,
}

impl ExecutionBounds {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self { events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    pub fn emit_started(&self, run_id: &str) {
        // No subscribers is not an error.
        let _ = self.events.send(RunEvent::Started {
            run_id: run_id.to_string(),
        });
    }

    pub fn emit_finished(&self, run_id: &str, code: i32) {
        let _ = self.events.send(RunEvent::Finished {
            run_id: run_id.to_string(),
            code,
        });
    }
}

impl Default for ExecutionBounds {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub network: Arc<dyn NetworkInterface>,
    pub lookup: Arc<dyn ExecutableLookup>,
    pub filter: Option<ModuleFilter>,
    pub bounds: ExecutionBounds,
}

impl ExecutionContext {
    pub fn new(network: Arc<dyn NetworkInterface>, lookup: Arc<dyn ExecutableLookup>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            network,
            lookup,
            filter: None,
            bounds: ExecutionBounds::new(),
        }
    }

    /// Context whose network also serves as the executable lookup.
    pub fn for_network(network: Arc<Network>) -> Self {
        Self::new(network.clone(), network)
    }

    pub fn with_filter(mut self, filter: ModuleFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_bounds(mut self, bounds: ExecutionBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Same collaborators and listeners, fresh run id.
    pub fn for_run(&self) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            ..self.clone()
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.bounds.subscribe()
    }

    pub fn accepts(&self, module: &dyn Module) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(module))
    }

    /// Modules this run is responsible for: accepted by the filter and still `Waiting`.
    pub fn eligible_modules(&self) -> HashSet<ModuleId> {
        let eligible: HashSet<ModuleId> = self
            .network
            .modules()
            .into_iter()
            .filter(|module| {
                module.execution_state() == ExecutionState::Waiting && self.accepts(module.as_ref())
            })
            .map(|module| module.id().clone())
            .collect();

        debug!(
            "Run {} covers {} of {} modules",
            self.run_id,
            eligible.len(),
            self.network.module_count()
        );
        eligible
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Ready-made module filters.
pub mod filters {
    use super::*;

    pub fn all() -> ModuleFilter {
        Arc::new(|_| true)
    }

    pub fn waiting_only() -> ModuleFilter {
        Arc::new(|module| module.execution_state() == ExecutionState::Waiting)
    }

    pub fn only<I, T>(ids: I) -> ModuleFilter
    where
        I: IntoIterator<Item = T>,
        T: Into<ModuleId>,
    {
        let ids: HashSet<ModuleId> = ids.into_iter().map(Into::into).collect();
        Arc::new(move |module| ids.contains(module.id()))
    }

    /// `start` and every module reachable from it through connections.
    pub fn downstream_of(network: &dyn NetworkInterface, start: &ModuleId) -> ModuleFilter {
        let connections = network.connections();
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();

        reachable.insert(start.clone());
        queue.push_back(start.clone());

        while let Some(current) = queue.pop_front() {
            for connection in connections.iter().filter(|c| c.from == current) {
                if reachable.insert(connection.to.clone()) {
                    queue.push_back(connection.to.clone());
                }
            }
        }

        Arc::new(move |module| reachable.contains(module.id()))
    }
}
