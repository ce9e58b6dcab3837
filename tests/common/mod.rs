// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides a network builder with instrumented modules that record their executions

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use netsched::network::{
    AtomicExecutionState, ExecutionState, Module, ModuleError, ModuleHandle, ModuleId, Network,
};

/// One execute() call as seen by a [`TrackedModule`].
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub module_id: ModuleId,
    pub started: Instant,
    pub finished: Instant,
}

/// Shared log of every execution across a network, plus a running-count high-water mark.
#[derive(Debug, Default)]
pub struct ExecutionLog {
    records: Mutex<Vec<ExecutionRecord>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ExecutionLog {
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().clone()
    }

    pub fn record(&self, id: &str) -> Option<ExecutionRecord> {
        self.records
            .lock()
            .iter()
            .find(|record| record.module_id.as_str() == id)
            .cloned()
    }

    pub fn executed(&self, id: &str) -> bool {
        self.record(id).is_some()
    }

    pub fn count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// True if `after` started only once `before` had finished.
    pub fn ran_after(&self, before: &str, after: &str) -> bool {
        match (self.record(before), self.record(after)) {
            (Some(before), Some(after)) => before.finished <= after.started,
            _ => false,
        }
    }
}

pub struct TrackedModule {
    id: ModuleId,
    state: AtomicExecutionState,
    delay: Duration,
    failure: Option<String>,
    runs: AtomicUsize,
    log: Arc<ExecutionLog>,
}

impl TrackedModule {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Module for TrackedModule {
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
        self.runs.fetch_add(1, Ordering::SeqCst);
        let running = self.log.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.peak.fetch_max(running, Ordering::SeqCst);

        let started = Instant::now();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let finished = Instant::now();

        self.log.running.fetch_sub(1, Ordering::SeqCst);
        self.log.records.lock().push(ExecutionRecord {
            module_id: self.id.clone(),
            started,
            finished,
        });

        match &self.failure {
            Some(message) => Err(ModuleError {
                module_id: self.id.clone(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

pub struct TestNetworkBuilder {
    modules: Vec<(String, Duration, Option<String>)>,
    edges: Vec<(String, String)>,
    default_delay: Duration,
}

/// A built network together with handles to its instrumented modules.
pub struct TestNetwork {
    pub network: Arc<Network>,
    pub log: Arc<ExecutionLog>,
    modules: HashMap<String, Arc<TrackedModule>>,
}

impl TestNetworkBuilder {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            edges: Vec::new(),
            default_delay: Duration::ZERO,
        }
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn module(mut self, id: &str) -> Self {
        self.modules.push((id.to_string(), self.default_delay, None));
        self
    }

    pub fn modules(mut self, ids: &[&str]) -> Self {
        for id in ids {
            self = self.module(id);
        }
        self
    }

    pub fn slow_module(mut self, id: &str, delay: Duration) -> Self {
        self.modules.push((id.to_string(), delay, None));
        self
    }

    pub fn failing_module(mut self, id: &str) -> Self {
        self.modules.push((
            id.to_string(),
            self.default_delay,
            Some(format!("{} failed on purpose", id)),
        ));
        self
    }

    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.edges.push((from.to_string(), to.to_string()));
        self
    }

    pub fn build(self) -> TestNetwork {
        let network = Arc::new(Network::new());
        let log = Arc::new(ExecutionLog::default());
        let mut modules = HashMap::new();

        for (id, delay, failure) in self.modules {
            let module = Arc::new(TrackedModule {
                id: ModuleId::new(id.clone()),
                state: AtomicExecutionState::default(),
                delay,
                failure,
                runs: AtomicUsize::new(0),
                log: Arc::clone(&log),
            });
            let handle: ModuleHandle = module.clone();
            network.add_module(handle).unwrap();
            modules.insert(id, module);
        }

        for (from, to) in self.edges {
            network.connect(from.as_str(), to.as_str()).unwrap();
        }

        TestNetwork {
            network,
            log,
            modules,
        }
    }
}

impl Default for TestNetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestNetwork {
    pub fn module(&self, id: &str) -> &Arc<TrackedModule> {
        self.modules
            .get(id)
            .unwrap_or_else(|| panic!("no module named {}", id))
    }

    pub fn state(&self, id: &str) -> ExecutionState {
        self.module(id).execution_state()
    }

    pub fn runs(&self, id: &str) -> usize {
        self.module(id).runs()
    }

    /// Every module executed at most once.
    pub fn assert_at_most_once(&self) {
        for (id, module) in &self.modules {
            assert!(module.runs() <= 1, "module {} ran {} times", id, module.runs());
        }
    }
}
