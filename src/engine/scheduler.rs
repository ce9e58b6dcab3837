// ABOUTME: Run coordinator and cycle-checked entry point of the execution scheduler
// ABOUTME: Serializes runs, wires producer, consumer and thread group, and reports the run code

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::barrier::StartupBarrier;
use super::consumer::Consumer;
use super::context::ExecutionContext;
use super::dependency::DependencyGrouper;
use super::error::Result;
use super::producer::Producer;
use super::queue::ReadyWorkQueue;
use super::result::{NO_ERROR, STRUCTURAL_ERROR, SYSTEM_ERROR};
use super::strategy::{self, ExecutionStrategy};
use super::thread_group::ExecutionThreadGroup;
use crate::network::{Module, ModuleId};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub strategy: ExecutionStrategy,
    /// Fallback period for the producer when no completion wakes it.
    pub poll_interval: Duration,
    /// `None` lets every ready module run at once.
    pub max_concurrent: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::Dynamic,
            poll_interval: Duration::from_millis(10),
            max_concurrent: None,
        }
    }
}

/// Owns the thread group and the run lock for one network or session.
///
/// Clones share both, so at most one run is in flight across all clones.
#[derive(Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    grouper: DependencyGrouper,
    thread_group: Arc<ExecutionThreadGroup>,
    run_lock: Arc<Mutex<()>>,
    barrier: Arc<StartupBarrier>,
}

/// Pending result of a run started with [`Scheduler::execute`].
#[derive(Debug)]
pub struct RunHandle {
    run_id: String,
    handle: JoinHandle<i32>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the run and returns its aggregate code.
    pub async fn wait(self) -> Result<i32> {
        Ok(self.handle.await?)
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let thread_group = Arc::new(ExecutionThreadGroup::new(config.max_concurrent));
        Self {
            config,
            grouper: DependencyGrouper::new(),
            thread_group,
            run_lock: Arc::new(Mutex::new(())),
            barrier: Arc::new(StartupBarrier::opened()),
        }
    }

    /// Runs wait on `barrier` before touching any module.
    pub fn with_startup_barrier(mut self, barrier: Arc<StartupBarrier>) -> Self {
        self.barrier = barrier;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn grouper(&self) -> &DependencyGrouper {
        &self.grouper
    }

    /// Registry of the latest run's executions. Cleared when the next run begins.
    pub fn thread_group(&self) -> &Arc<ExecutionThreadGroup> {
        &self.thread_group
    }

    /// Starts a run in the background and returns immediately.
    ///
    /// Runs are serialized: a second call waits for the first run to finish
    /// before it emits its own start event.
    pub fn execute(&self, context: ExecutionContext) -> RunHandle {
        let scheduler = self.clone();
        let run_id = context.run_id.clone();
        let handle = tokio::spawn(async move { scheduler.coordinate(context).await });
        RunHandle { run_id, handle }
    }

    /// Like [`execute`](Self::execute), but rejects a cyclic network before any
    /// module starts. A rejected run still emits its start and finish events.
    pub fn execute_with_cycle_check(&self, context: ExecutionContext) -> RunHandle {
        let validation = self
            .grouper
            .schedule_filtered(context.network.as_ref(), &|module: &dyn Module| {
                context.accepts(module)
            });

        match validation {
            Err(err) if err.is_structural() => {
                error!("Refusing to run network: {}", err);
                context.bounds.emit_started(&context.run_id);
                context.bounds.emit_finished(&context.run_id, STRUCTURAL_ERROR);
                RunHandle {
                    run_id: context.run_id,
                    handle: tokio::spawn(async { STRUCTURAL_ERROR }),
                }
            }
            _ => self.execute(context),
        }
    }

    #[instrument(skip(self, context), fields(run_id = %context.run_id, strategy = %self.config.strategy))]
    async fn coordinate(&self, context: ExecutionContext) -> i32 {
        let _run = self.run_lock.lock().await;

        info!("Run started");
        context.bounds.emit_started(&context.run_id);
        self.barrier.wait().await;

        self.thread_group.clear();
        context.lookup.reset_error_code();
        let universe = context.eligible_modules();

        context.network.begin_execution();
        let outcome = match self.config.strategy {
            ExecutionStrategy::Dynamic => self.run_dynamic(&context, universe).await,
            ExecutionStrategy::Serial => {
                strategy::run_serial(&context, &self.grouper, &self.thread_group, &universe).await
            }
            ExecutionStrategy::Parallel => {
                strategy::run_parallel(&context, &self.grouper, &self.thread_group, &universe)
                    .await
            }
        };
        self.thread_group.join_all().await;
        context.network.end_execution();

        let code = run_code(context.lookup.error_code(), &outcome);
        match &outcome {
            Ok(dispatched) => info!(
                "Run finished with code {} ({} modules dispatched)",
                code, dispatched
            ),
            Err(err) => error!("Run aborted with code {}: {}", code, err),
        }

        context.bounds.emit_finished(&context.run_id, code);
        code
    }

    async fn run_dynamic(
        &self,
        context: &ExecutionContext,
        universe: HashSet<ModuleId>,
    ) -> Result<usize> {
        let queue = Arc::new(ReadyWorkQueue::new());
        let producer = Arc::new(Producer::new(
            Arc::clone(&context.network),
            Arc::clone(&queue),
            self.grouper,
            universe,
        ));
        let consumer = Consumer::new(
            queue,
            Arc::clone(&context.lookup),
            Arc::clone(&self.thread_group),
            Arc::clone(&producer),
        );

        let producing = tokio::spawn(Arc::clone(&producer).run(
            self.thread_group.completion_signal(),
            self.config.poll_interval,
        ));
        let consuming = tokio::spawn(consumer.run());

        let (produced, consumed) = tokio::join!(producing, consuming);
        let dispatched = consumed?;
        produced??;

        let starved = producer.starved();
        if !starved.is_empty() {
            warn!("{} modules starved by failed dependencies: {:?}", starved.len(), starved);
        }

        Ok(dispatched)
    }
}

/// Module errors win; a run with none but a scheduler failure gets a sentinel.
fn run_code(error_code: i32, outcome: &Result<usize>) -> i32 {
    match outcome {
        _ if error_code != NO_ERROR => error_code,
        Ok(_) => NO_ERROR,
        Err(err) if err.is_structural() => STRUCTURAL_ERROR,
        Err(_) => SYSTEM_ERROR,
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("thread_group", &self.thread_group)
            .finish()
    }
}
