// ABOUTME: Producer half of the dynamic scheduler
// ABOUTME: Regroups the network on every pass and enqueues newly ready modules exactly once

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::dependency::{DependencyGrouper, ExecutionOrder};
use super::error::{Result, SchedulerError};
use super::queue::ReadyWorkQueue;
use crate::network::{ExecutionState, ModuleId, NetworkInterface};

pub struct Producer {
    network: Arc<dyn NetworkInterface>,
    queue: Arc<ReadyWorkQueue>,
    grouper: DependencyGrouper,
    universe: HashSet<ModuleId>,
    state: Mutex<ProducerState>,
    done: AtomicBool,
}

#[derive(Debug, Default)]
struct ProducerState {
    enqueued: HashSet<ModuleId>,
    /// Waiting modules behind an errored or lost dependency. Never enqueued.
    starved: HashSet<ModuleId>,
    /// Enqueued modules the consumer could not dispatch.
    lost: HashSet<ModuleId>,
}

impl ProducerState {
    fn settled(&self) -> usize {
        self.enqueued.len() + self.starved.len()
    }
}

impl Producer {
    /// `universe` is the fixed set of modules this run is responsible for.
    pub fn new(
        network: Arc<dyn NetworkInterface>,
        queue: Arc<ReadyWorkQueue>,
        grouper: DependencyGrouper,
        universe: HashSet<ModuleId>,
    ) -> Self {
        Self {
            network,
            queue,
            grouper,
            universe,
            state: Mutex::new(ProducerState::default()),
            done: AtomicBool::new(false),
        }
    }

    /// One grouping pass. Pushes every `Waiting`, not yet enqueued module of the
    /// lowest group and returns how many were pushed.
    ///
    /// The whole regroup-then-push sequence runs under one lock, so concurrent
    /// callers can never enqueue a module twice.
    pub fn enqueue_ready_modules(&self) -> Result<usize> {
        let mut state = self.state.lock();

        if state.settled() >= self.universe.len() {
            self.done.store(true, Ordering::Release);
            return Ok(0);
        }

        let states: HashMap<ModuleId, ExecutionState> = self
            .network
            .modules()
            .into_iter()
            .map(|module| (module.id().clone(), module.execution_state()))
            .collect();

        let order = self
            .grouper
            .schedule_filtered(self.network.as_ref(), &|module| {
                self.universe.contains(module.id())
                    && module.execution_state() != ExecutionState::Completed
            })
            .map_err(|err| match err {
                SchedulerError::CyclicGraph { modules } => {
                    warn!("Network became cyclic during the run: {:?}", modules);
                    self.bad_group(&state)
                }
                other => other,
            })?;

        let Some(min_group) = order.min_group() else {
            let err = self.bad_group(&state);
            warn!("{}", err);
            return Err(err);
        };

        let dependencies = self.network.dependency_map();
        self.update_starved(&mut state, &order, &states, &dependencies);

        let mut pushed = 0;
        for id in order.group(min_group) {
            if state.enqueued.contains(id) || state.starved.contains(id) {
                continue;
            }
            if states.get(id) != Some(&ExecutionState::Waiting) {
                continue;
            }
            if self.queue.push(id.clone()) {
                debug!("Enqueued module {}", id);
                state.enqueued.insert(id.clone());
                pushed += 1;
            }
        }

        if state.settled() >= self.universe.len() {
            self.done.store(true, Ordering::Release);
        }

        Ok(pushed)
    }

    /// Walks groups in ascending order so starvation spreads along whole chains in one pass.
    fn update_starved(
        &self,
        state: &mut ProducerState,
        order: &ExecutionOrder,
        states: &HashMap<ModuleId, ExecutionState>,
        dependencies: &HashMap<ModuleId, Vec<ModuleId>>,
    ) {
        for (_, members) in order.groups() {
            for id in members {
                if state.enqueued.contains(id) || state.starved.contains(id) {
                    continue;
                }

                let Some(deps) = dependencies.get(id) else {
                    continue;
                };

                // Errored modules outside the run still block; other outsiders count as satisfied.
                let blocked_by = deps.iter().find(|&dep| {
                    states.get(dep) == Some(&ExecutionState::Errored)
                        || state.starved.contains(dep)
                        || state.lost.contains(dep)
                });

                if let Some(dep) = blocked_by {
                    warn!("Module {} will not run: dependency {} failed", id, dep);
                    state.starved.insert(id.clone());
                }
            }
        }
    }

    fn bad_group(&self, state: &ProducerState) -> SchedulerError {
        SchedulerError::BadGroup {
            enqueued: state.enqueued.len(),
            starved: state.starved.len(),
            total: self.universe.len(),
        }
    }

    /// Records that an enqueued module never started, so its dependents starve.
    pub fn mark_lost(&self, id: &ModuleId) {
        self.state.lock().lost.insert(id.clone());
    }

    /// True once every module in the universe has been enqueued or starved.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn enqueued(&self) -> usize {
        self.state.lock().enqueued.len()
    }

    pub fn starved(&self) -> Vec<ModuleId> {
        let mut starved: Vec<ModuleId> = self.state.lock().starved.iter().cloned().collect();
        starved.sort();
        starved
    }

    /// Control loop. Re-runs [`enqueue_ready_modules`](Self::enqueue_ready_modules)
    /// whenever a module finishes, or every `poll_interval` at the latest, until
    /// done or a bad group. The queue is closed on every exit path.
    pub async fn run(
        self: Arc<Self>,
        completions: Arc<Notify>,
        poll_interval: Duration,
    ) -> Result<usize> {
        let outcome = loop {
            let notified = completions.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Err(err) = self.enqueue_ready_modules() {
                break Err(err);
            }
            if self.is_done() {
                break Ok(self.enqueued());
            }

            // Elapsed timeouts just trigger another pass.
            let _ = tokio::time::timeout(poll_interval, notified).await;
        };

        self.queue.close();
        debug!("Producer finished: {:?}", outcome);
        outcome
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Producer")
            .field("universe", &self.universe.len())
            .field("enqueued", &state.enqueued.len())
            .field("starved", &state.starved.len())
            .field("done", &self.is_done())
            .finish()
    }
}
