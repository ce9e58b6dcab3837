// ABOUTME: Consumer half of the dynamic scheduler
// ABOUTME: Drains the ready work queue and hands each module to the execution thread group

use std::sync::Arc;
use tracing::{debug, error};

use super::error::SchedulerError;
use super::producer::Producer;
use super::queue::ReadyWorkQueue;
use super::thread_group::ExecutionThreadGroup;
use crate::network::ExecutableLookup;

pub struct Consumer {
    queue: Arc<ReadyWorkQueue>,
    lookup: Arc<dyn ExecutableLookup>,
    thread_group: Arc<ExecutionThreadGroup>,
    producer: Arc<Producer>,
}

impl Consumer {
    pub fn new(
        queue: Arc<ReadyWorkQueue>,
        lookup: Arc<dyn ExecutableLookup>,
        thread_group: Arc<ExecutionThreadGroup>,
        producer: Arc<Producer>,
    ) -> Self {
        Self {
            queue,
            lookup,
            thread_group,
            producer,
        }
    }

    /// Dispatches until the producer has closed the queue and it is drained.
    ///
    /// Never waits for a dispatched module to finish. Returns the number of
    /// modules started.
    pub async fn run(self) -> usize {
        let mut dispatched = 0;

        while let Some(id) = self.queue.pop().await {
            match self.lookup.lookup_executable(&id) {
                Some(module) => {
                    debug!("Dispatching module {}", id);
                    self.thread_group
                        .start_execution(module, Arc::clone(&self.lookup));
                    dispatched += 1;
                }
                None => {
                    error!("{}", SchedulerError::ExecutableNotFound { module_id: id.clone() });
                    self.lookup.record_error(&id);
                    self.producer.mark_lost(&id);
                    self.thread_group.completion_signal().notify_one();
                }
            }
        }

        debug!("Consumer finished after {} dispatches", dispatched);
        dispatched
    }
}
