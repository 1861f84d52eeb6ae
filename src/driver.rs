//! Single-worker drive loop.
//!
//! Stands in for the upstream grouping and timer redelivery in tests
//! and simple single-process runs: feed a batch of seed work items,
//! then keep draining due timer firings back into resume work items
//! until no work remains. Being single-threaded, it satisfies the
//! one-work-item-per-key-at-a-time precondition trivially.
//!
//! Elements whose processing step never finishes keep the loop alive
//! forever; resubmission is bounded only by the step's own
//! willingness to complete (or a nonzero resume delay on the
//! processor).

use std::collections::VecDeque;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::WorkError;
use crate::invoker::ProcessElementInvoker;
use crate::logic::SplitLogic;
use crate::processor::ResumableProcessor;
use crate::state::StateStore;
use crate::timers::in_mem::InMemTimerService;
use crate::work_item::Element;
use crate::work_item::StateKey;
use crate::work_item::WorkItem;

/// Runs a processor to quiescence over an in-memory timer service.
pub struct Driver<L, I, S> {
    processor: ResumableProcessor<L, I, S, InMemTimerService>,
}

impl<L, I, S> Driver<L, I, S>
where
    L: SplitLogic,
    L::Value: Serialize + DeserializeOwned,
    L::Restriction: Serialize + DeserializeOwned,
    I: ProcessElementInvoker<L>,
    S: StateStore,
{
    /// Wrap a processor and run its one-time setup.
    pub fn new(mut processor: ResumableProcessor<L, I, S, InMemTimerService>) -> Self {
        processor.setup();
        Self { processor }
    }

    pub fn processor(&self) -> &ResumableProcessor<L, I, S, InMemTimerService> {
        &self.processor
    }

    /// Feed seeds and re-drive every wake-up until no timer is
    /// pending, collecting all outputs with the key they belong to.
    ///
    /// Work items are handled in bundles: one bundle per delivery
    /// round, bracketed by the logic's start/finish bundle hooks. An
    /// error stops the loop immediately and surfaces unchanged;
    /// undelivered firings stay pending.
    pub fn run_to_quiescence(
        &mut self,
        seeds: impl IntoIterator<Item = WorkItem<L::Value, L::Restriction>>,
    ) -> Result<Vec<(StateKey, Element<L::Output>)>, WorkError> {
        let mut queue: VecDeque<WorkItem<L::Value, L::Restriction>> =
            seeds.into_iter().collect();
        let mut collected = Vec::new();

        while !queue.is_empty() {
            self.processor.start_bundle();
            while let Some(item) = queue.pop_front() {
                let key = item.key.clone();
                let handled = self.processor.handle(item)?;
                collected.extend(
                    handled
                        .outputs
                        .into_iter()
                        .map(|output| (key.clone(), output)),
                );
            }
            self.processor.finish_bundle();

            // Redeliver due firings for the next round. If timers are
            // pending but none due yet, advance the simulated clock
            // to the earliest one.
            loop {
                let due = self.processor.timers_mut().drain_due();
                if !due.is_empty() {
                    queue.extend(
                        due.into_iter()
                            .map(|(key, timer)| WorkItem::resume(key, timer)),
                    );
                    break;
                }
                match self.processor.timers().next_fire_at() {
                    Some(fire_at) => self.processor.timers_mut().advance_to(fire_at),
                    None => break,
                }
            }
            tracing::trace!("Delivery round done; {} item(s) queued", queue.len());
        }

        Ok(collected)
    }

    /// Run the logic's teardown and hand the processor back.
    pub fn shutdown(mut self) -> ResumableProcessor<L, I, S, InMemTimerService> {
        self.processor.teardown();
        self.processor
    }
}
