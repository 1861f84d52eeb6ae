//! The resumable element processor.
//!
//! This is the engine: it turns one [`WorkItem`] into side effects
//! (via the processing step) plus updated persistent state, keeping
//! the watermark-hold invariant at every observable point. A handling
//! is a pure function of (current state, work item); mutual exclusion
//! per key is the caller's job, and different keys never share state.
//!
//! The flow per work item:
//!
//! 1. Classify as seed or resume by extracting the single timer
//!    firing, if any.
//! 2. Resolve the namespace: from the seed element's window, or from
//!    the timer.
//! 3. Seed: cache the element in state for later resumptions. Resume:
//!    read the cached element and residual restriction back.
//! 4. Invoke the processing step once with a fresh tracker.
//! 5. Done: clear element, restriction, and hold together. Residual:
//!    persist it, add a watermark hold, and set one processing-time
//!    timer to re-drive this element.

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::WorkError;
use crate::invoker::ProcessElementInvoker;
use crate::logic::FinishBundleContext;
use crate::logic::SplitLogic;
use crate::logic::StartBundleContext;
use crate::state::StateBytes;
use crate::state::StateCell;
use crate::state::StateNamespace;
use crate::state::StateStore;
use crate::timers::TimeDomain;
use crate::timers::TimerData;
use crate::timers::TimerService;
use crate::work_item::Element;
use crate::work_item::WorkInput;
use crate::work_item::WorkItem;

/// Whether an element's work survived this handling.
///
/// See [`ResumableProcessor::handle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkFate {
    /// All work for this element is complete and its state is gone.
    /// Terminal for this (key, namespace).
    Complete,
    /// Residual work was persisted and a wake-up scheduled; the
    /// element will be re-driven.
    Resumed,
}

/// The observable result of handling one work item.
#[derive(Debug)]
pub struct Handled<O> {
    pub fate: WorkFate,
    /// Outputs emitted by the processing step during this attempt.
    pub outputs: Vec<Element<O>>,
}

/// Drives splittable elements to completion across any number of
/// attempts.
///
/// One instance serves every key routed to it; per-element progress
/// lives in the [`StateStore`], never in this struct, so re-entering
/// with a timer firing on a different thread or process works as long
/// as the substrate delivers state writes before wake-ups.
pub struct ResumableProcessor<L, I, S, T> {
    logic: L,
    invoker: I,
    state: S,
    timers: T,
    resume_delay: Duration,
}

impl<L, I, S, T> ResumableProcessor<L, I, S, T>
where
    L: SplitLogic,
    L::Value: Serialize + DeserializeOwned,
    L::Restriction: Serialize + DeserializeOwned,
    I: ProcessElementInvoker<L>,
    S: StateStore,
    T: TimerService,
{
    pub fn new(logic: L, invoker: I, state: S, timers: T) -> Self {
        Self {
            logic,
            invoker,
            state,
            timers,
            resume_delay: Duration::zero(),
        }
    }

    /// Delay between a residual result and its wake-up timer.
    ///
    /// Zero (the default) re-drives the element as soon as the
    /// runtime allows, which makes the resubmission loop as tight as
    /// the processing step's own checkpoint cadence. Set a nonzero
    /// delay to back off instead.
    pub fn with_resume_delay(mut self, resume_delay: Duration) -> Self {
        self.resume_delay = resume_delay;
        self
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    pub fn setup(&mut self) {
        self.logic.setup();
    }

    pub fn start_bundle(&mut self) {
        self.logic.start_bundle(&StartBundleContext::new());
    }

    pub fn finish_bundle(&mut self) {
        self.logic.finish_bundle(&FinishBundleContext::new());
    }

    pub fn teardown(&mut self) {
        self.logic.teardown();
    }

    /// Handle one work item: invoke the processing step once and
    /// apply its result to state and timers.
    ///
    /// Errors propagate unchanged with no retry and no partial
    /// cleanup; state stays as last written.
    pub fn handle(
        &mut self,
        work_item: WorkItem<L::Value, L::Restriction>,
    ) -> Result<Handled<L::Output>, WorkError> {
        let (key, input) = work_item.into_classified()?;

        // The namespace is fixed at seed time; timers carry it back
        // on every resumption.
        let namespace = match &input {
            WorkInput::Seed(seed) => StateNamespace::window(seed.element.window),
            WorkInput::Resume(timer) => timer.namespace,
        };

        let (element, restriction) = match input {
            WorkInput::Seed(seed) => {
                tracing::trace!("Seed call for key {key} in {namespace}");
                // Cache the element so resume calls, which carry only
                // a timer, can reconstruct it.
                self.state.write(
                    &key,
                    &namespace,
                    StateCell::Element,
                    StateBytes::ser(&seed.element),
                );
                (seed.element, seed.restriction)
            }
            WorkInput::Resume(_) => {
                tracing::trace!("Resume call for key {key} in {namespace}");
                let element = self
                    .state
                    .read(&key, &namespace, StateCell::Element)
                    .ok_or_else(|| WorkError::MissingResumeState {
                        key: key.clone(),
                        namespace,
                    })?
                    .de::<Element<L::Value>>();
                let restriction = self
                    .state
                    .read(&key, &namespace, StateCell::Restriction)
                    .ok_or_else(|| WorkError::MissingResumeState {
                        key: key.clone(),
                        namespace,
                    })?
                    .de::<L::Restriction>();
                (element, restriction)
            }
        };

        let tracker = self
            .logic
            .new_tracker(restriction)
            .map_err(WorkError::ProcessingStep)?;
        let result = self
            .invoker
            .invoke_process_element(&mut self.logic, &element, tracker)
            .map_err(WorkError::ProcessingStep)?;

        let fate = match result.residual {
            None => {
                // All work for this element is done. Clear state and
                // release the hold as a unit.
                self.state.clear(&key, &namespace, StateCell::Element);
                self.state.clear(&key, &namespace, StateCell::Restriction);
                self.state.clear(&key, &namespace, StateCell::Hold);
                tracing::trace!("Key {key} in {namespace} complete; state cleared");
                WorkFate::Complete
            }
            Some(residual) => {
                self.state.write(
                    &key,
                    &namespace,
                    StateCell::Restriction,
                    StateBytes::ser(&residual),
                );
                // Never leave the hold unset while work remains; the
                // element's own timestamp is the conservative
                // fallback.
                let hold = result
                    .future_output_watermark
                    .unwrap_or(element.timestamp);
                self.state.add_hold(&key, &namespace, hold);
                let fire_at = self.timers.current_processing_time() + self.resume_delay;
                self.timers.set(
                    &key,
                    TimerData {
                        namespace,
                        fire_at,
                        domain: TimeDomain::ProcessingTime,
                    },
                );
                tracing::trace!("Key {key} in {namespace} holding at {hold:?}, wake at {fire_at:?}");
                WorkFate::Resumed
            }
        };

        Ok(Handled {
            fate,
            outputs: result.outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use anyhow::Result;
    use chrono::DateTime;
    use chrono::Utc;

    use super::*;
    use crate::invoker::CheckpointInvoker;
    use crate::logic::ProcessContext;
    use crate::logic::ProcessContinuation;
    use crate::logic::RestrictionTracker;
    use crate::state::in_mem::InMemStateStore;
    use crate::timers::in_mem::InMemTimerService;
    use crate::window::WindowKey;
    use crate::work_item::Seed;
    use crate::work_item::StateKey;

    /// Restriction: units of work remaining. Tracker claims them one
    /// at a time.
    struct CountdownTracker {
        remaining: u64,
    }

    impl CountdownTracker {
        fn try_claim(&mut self) -> bool {
            if self.remaining > 0 {
                self.remaining -= 1;
                true
            } else {
                false
            }
        }
    }

    impl RestrictionTracker for CountdownTracker {
        type Restriction = u64;

        fn current_restriction(&self) -> u64 {
            self.remaining
        }

        fn checkpoint(&mut self) -> Option<u64> {
            if self.remaining == 0 {
                None
            } else {
                Some(std::mem::take(&mut self.remaining))
            }
        }
    }

    /// Claims up to a per-call budget of units, emitting one output
    /// per unit. Budgets beyond the configured list repeat the last
    /// entry.
    struct CountdownLogic {
        budgets: Vec<u64>,
        calls: usize,
        report_watermarks: Vec<Option<DateTime<Utc>>>,
        always_resume: bool,
        /// (value, timestamp, window, restriction) observed at the
        /// start of each attempt.
        seen: Vec<(String, DateTime<Utc>, WindowKey, u64)>,
    }

    impl CountdownLogic {
        fn new(budgets: Vec<u64>) -> Self {
            Self {
                budgets,
                calls: 0,
                report_watermarks: Vec::new(),
                always_resume: false,
                seen: Vec::new(),
            }
        }

        fn budget(&self) -> u64 {
            let i = self.calls.min(self.budgets.len() - 1);
            self.budgets[i]
        }

        fn watermark(&self) -> Option<DateTime<Utc>> {
            self.report_watermarks
                .get(self.calls)
                .copied()
                .flatten()
        }
    }

    impl SplitLogic for CountdownLogic {
        type Value = String;
        type Restriction = u64;
        type Tracker = CountdownTracker;
        type Output = String;

        fn new_tracker(&self, restriction: u64) -> Result<CountdownTracker> {
            Ok(CountdownTracker {
                remaining: restriction,
            })
        }

        fn process_element(
            &mut self,
            element: &Element<String>,
            tracker: &mut CountdownTracker,
            ctx: &mut ProcessContext<'_, String>,
        ) -> Result<ProcessContinuation> {
            self.seen.push((
                element.value.clone(),
                element.timestamp,
                element.window,
                tracker.current_restriction(),
            ));
            if let Some(watermark) = self.watermark() {
                ctx.report_output_watermark(watermark);
            }
            let budget = self.budget();
            self.calls += 1;

            for _unit in 0..budget {
                if !tracker.try_claim() {
                    return Ok(ProcessContinuation::Stop);
                }
                ctx.output(element.value.clone());
            }
            if self.always_resume || tracker.current_restriction() > 0 {
                Ok(ProcessContinuation::Resume)
            } else {
                Ok(ProcessContinuation::Stop)
            }
        }
    }

    type TestProcessor =
        ResumableProcessor<CountdownLogic, CheckpointInvoker, InMemStateStore, InMemTimerService>;

    fn processor(logic: CountdownLogic) -> TestProcessor {
        ResumableProcessor::new(
            logic,
            CheckpointInvoker::new(),
            InMemStateStore::new(),
            InMemTimerService::default(),
        )
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn key() -> StateKey {
        StateKey("a".to_owned())
    }

    fn namespace() -> StateNamespace {
        StateNamespace::window(WindowKey(1))
    }

    fn seed_item(restriction: u64) -> WorkItem<String, u64> {
        WorkItem::seed(
            key(),
            Element::new("a".to_owned(), ts(10), WindowKey(1)),
            restriction,
        )
    }

    /// Pull the single due timer firing and wrap it back up as a
    /// resume work item, the way the upstream redelivery would.
    fn fire_next(processor: &mut TestProcessor) -> WorkItem<String, u64> {
        let mut due = processor.timers_mut().drain_due();
        assert_eq!(due.len(), 1);
        let (key, timer) = due.pop().unwrap();
        WorkItem::resume(key, timer)
    }

    fn read_restriction(processor: &TestProcessor) -> Option<u64> {
        processor
            .state()
            .read(&key(), &namespace(), StateCell::Restriction)
            .map(StateBytes::de::<u64>)
    }

    fn read_hold(processor: &TestProcessor) -> Option<DateTime<Utc>> {
        processor
            .state()
            .read(&key(), &namespace(), StateCell::Hold)
            .map(StateBytes::de::<DateTime<Utc>>)
    }

    fn read_element(processor: &TestProcessor) -> Option<Element<String>> {
        processor
            .state()
            .read(&key(), &namespace(), StateCell::Element)
            .map(StateBytes::de::<Element<String>>)
    }

    #[test]
    fn seed_with_residual_persists_state_and_holds() {
        // 5 units remaining, 2 processed per call, no watermark
        // estimate.
        let mut processor = processor(CountdownLogic::new(vec![2]));

        let handled = processor.handle(seed_item(5)).unwrap();

        assert_eq!(handled.fate, WorkFate::Resumed);
        assert_eq!(handled.outputs.len(), 2);
        assert_eq!(
            read_element(&processor),
            Some(Element::new("a".to_owned(), ts(10), WindowKey(1)))
        );
        assert_eq!(read_restriction(&processor), Some(3));
        // No estimate reported, so the hold falls back to the
        // element's own timestamp.
        assert_eq!(read_hold(&processor), Some(ts(10)));
        assert_eq!(processor.timers().pending_count(), 1);
        assert!(processor.timers().is_pending(&key(), &namespace()));
        // Immediate re-drive: the wake-up is at current processing
        // time.
        assert_eq!(
            processor.timers().next_fire_at(),
            Some(processor.timers().current_processing_time())
        );
    }

    #[test]
    fn resume_to_completion_clears_everything() {
        let mut processor = processor(CountdownLogic::new(vec![2, 3]));

        let first = processor.handle(seed_item(5)).unwrap();
        assert_eq!(first.fate, WorkFate::Resumed);
        assert_eq!(read_restriction(&processor), Some(3));

        let item = fire_next(&mut processor);
        let second = processor.handle(item).unwrap();

        assert_eq!(second.fate, WorkFate::Complete);
        assert_eq!(second.outputs.len(), 3);
        assert!(processor.state().is_empty());
        assert_eq!(processor.timers().pending_count(), 0);
    }

    #[test]
    fn residuals_never_grow_across_resumptions() {
        let mut processor = processor(CountdownLogic::new(vec![2]));

        let mut residuals = Vec::new();
        let mut handled = processor.handle(seed_item(7)).unwrap();
        while handled.fate == WorkFate::Resumed {
            residuals.push(read_restriction(&processor).unwrap());
            let item = fire_next(&mut processor);
            handled = processor.handle(item).unwrap();
        }

        assert_eq!(residuals, vec![5, 3, 1]);
        assert!(processor.state().is_empty());
    }

    #[test]
    fn hold_present_iff_restriction_present() {
        let mut processor = processor(CountdownLogic::new(vec![2]));

        let mut handled = processor.handle(seed_item(5)).unwrap();
        loop {
            assert_eq!(
                read_hold(&processor).is_some(),
                read_restriction(&processor).is_some()
            );
            if handled.fate == WorkFate::Complete {
                break;
            }
            let item = fire_next(&mut processor);
            handled = processor.handle(item).unwrap();
        }
    }

    #[test]
    fn exactly_one_timer_pending_while_work_remains() {
        let mut processor = processor(CountdownLogic::new(vec![1]));

        processor.handle(seed_item(3)).unwrap();
        assert_eq!(processor.timers().pending_count(), 1);

        let item = fire_next(&mut processor);
        processor.handle(item).unwrap();
        // The new wake-up superseded the old one, it did not pile up.
        assert_eq!(processor.timers().pending_count(), 1);
    }

    #[test]
    fn hold_tracks_reported_output_watermark() {
        let mut logic = CountdownLogic::new(vec![2]);
        logic.report_watermarks = vec![Some(ts(42)), Some(ts(30))];
        let mut processor = processor(logic);

        processor.handle(seed_item(5)).unwrap();
        assert_eq!(read_hold(&processor), Some(ts(42)));

        // A later, earlier estimate cannot pull the hold backward:
        // latest wins.
        let item = fire_next(&mut processor);
        processor.handle(item).unwrap();
        assert_eq!(read_hold(&processor), Some(ts(42)));
    }

    #[test]
    fn seed_and_resume_feed_identical_element() {
        let mut processor = processor(CountdownLogic::new(vec![2]));

        processor.handle(seed_item(5)).unwrap();
        let item = fire_next(&mut processor);
        processor.handle(item).unwrap();

        let seen = &processor.logic().seen;
        assert_eq!(seen.len(), 2);
        // Same element reconstructed from state on resume...
        assert_eq!(seen[0].0, seen[1].0);
        assert_eq!(seen[0].1, seen[1].1);
        assert_eq!(seen[0].2, seen[1].2);
        // ...but the tracker is built from the persisted residual.
        assert_eq!(seen[0].3, 5);
        assert_eq!(seen[1].3, 3);
    }

    #[test]
    fn seed_with_empty_restriction_completes_immediately() {
        let mut processor = processor(CountdownLogic::new(vec![2]));

        let handled = processor.handle(seed_item(0)).unwrap();

        assert_eq!(handled.fate, WorkFate::Complete);
        assert!(handled.outputs.is_empty());
        assert!(processor.state().is_empty());
        assert_eq!(processor.timers().pending_count(), 0);
    }

    #[test]
    fn resume_request_with_exhausted_tracker_completes() {
        // The logic asks to resume, but the checkpoint finds nothing
        // unclaimed, so the element is complete after all.
        let mut logic = CountdownLogic::new(vec![5]);
        logic.always_resume = true;
        let mut processor = processor(logic);

        let handled = processor.handle(seed_item(5)).unwrap();

        assert_eq!(handled.fate, WorkFate::Complete);
        assert!(processor.state().is_empty());
        assert_eq!(processor.timers().pending_count(), 0);
    }

    #[test]
    fn malformed_item_with_both_inputs_is_rejected() {
        let mut processor = processor(CountdownLogic::new(vec![2]));

        let item = WorkItem {
            key: key(),
            seeds: vec![Seed {
                element: Element::new("a".to_owned(), ts(10), WindowKey(1)),
                restriction: 5,
            }],
            timers: vec![TimerData {
                namespace: namespace(),
                fire_at: ts(0),
                domain: TimeDomain::ProcessingTime,
            }],
        };

        assert!(matches!(
            processor.handle(item),
            Err(WorkError::MalformedWorkItem { .. })
        ));
        // Rejected before any state was touched.
        assert!(processor.state().is_empty());
    }

    #[test]
    fn malformed_item_with_multiple_seeds_is_rejected() {
        let mut processor = processor(CountdownLogic::new(vec![2]));

        let seed = Seed {
            element: Element::new("a".to_owned(), ts(10), WindowKey(1)),
            restriction: 5u64,
        };
        let item = WorkItem {
            key: key(),
            seeds: vec![seed.clone(), seed],
            timers: Vec::new(),
        };

        assert!(matches!(
            processor.handle(item),
            Err(WorkError::MalformedWorkItem { .. })
        ));
    }

    #[test]
    fn resume_without_cached_state_is_fatal() {
        let mut processor = processor(CountdownLogic::new(vec![2]));

        let item = WorkItem::resume(
            key(),
            TimerData {
                namespace: namespace(),
                fire_at: ts(0),
                domain: TimeDomain::ProcessingTime,
            },
        );

        assert!(matches!(
            processor.handle(item),
            Err(WorkError::MissingResumeState { .. })
        ));
    }

    #[test]
    fn resume_delay_defers_the_wakeup() {
        let mut processor = processor(CountdownLogic::new(vec![2]))
            .with_resume_delay(chrono::Duration::seconds(5));

        processor.handle(seed_item(5)).unwrap();

        let start = DateTime::UNIX_EPOCH;
        assert_eq!(
            processor.timers().next_fire_at(),
            Some(start + chrono::Duration::seconds(5))
        );
        // Nothing due until the clock reaches the delayed instant.
        assert!(processor.timers_mut().drain_due().is_empty());
        processor.timers_mut().advance(chrono::Duration::seconds(5));
        assert_eq!(processor.timers_mut().drain_due().len(), 1);
    }

    /// Fails on demand in tracker construction or processing.
    struct FailingLogic {
        fail_new_tracker: bool,
    }

    impl SplitLogic for FailingLogic {
        type Value = String;
        type Restriction = u64;
        type Tracker = CountdownTracker;
        type Output = String;

        fn new_tracker(&self, restriction: u64) -> Result<CountdownTracker> {
            if self.fail_new_tracker {
                Err(anyhow!("tracker construction failed"))
            } else {
                Ok(CountdownTracker {
                    remaining: restriction,
                })
            }
        }

        fn process_element(
            &mut self,
            _element: &Element<String>,
            _tracker: &mut CountdownTracker,
            _ctx: &mut ProcessContext<'_, String>,
        ) -> Result<ProcessContinuation> {
            Err(anyhow!("processing blew up"))
        }
    }

    #[test]
    fn processing_failure_propagates_without_cleanup() {
        let mut processor = ResumableProcessor::new(
            FailingLogic {
                fail_new_tracker: false,
            },
            CheckpointInvoker::new(),
            InMemStateStore::new(),
            InMemTimerService::default(),
        );

        let err = processor.handle(seed_item(5)).unwrap_err();
        assert!(matches!(err, WorkError::ProcessingStep(_)));

        // The element cache written on the seed call stays as last
        // written; nothing else was committed.
        assert!(processor
            .state()
            .read(&key(), &namespace(), StateCell::Element)
            .is_some());
        assert!(processor
            .state()
            .read(&key(), &namespace(), StateCell::Restriction)
            .is_none());
        assert!(processor
            .state()
            .read(&key(), &namespace(), StateCell::Hold)
            .is_none());
        assert_eq!(processor.timers().pending_count(), 0);
    }

    #[test]
    fn tracker_construction_failure_propagates() {
        let mut processor = ResumableProcessor::new(
            FailingLogic {
                fail_new_tracker: true,
            },
            CheckpointInvoker::new(),
            InMemStateStore::new(),
            InMemTimerService::default(),
        );

        let err = processor.handle(seed_item(5)).unwrap_err();
        assert!(matches!(err, WorkError::ProcessingStep(_)));
    }

    #[test]
    fn keys_do_not_share_state() {
        let mut processor = processor(CountdownLogic::new(vec![2]));

        processor.handle(seed_item(5)).unwrap();
        let other = WorkItem::seed(
            StateKey("b".to_owned()),
            Element::new("b".to_owned(), ts(20), WindowKey(1)),
            1u64,
        );
        let handled = processor.handle(other).unwrap();

        // Key "b" completed without disturbing "a"'s residual state.
        assert_eq!(handled.fate, WorkFate::Complete);
        assert_eq!(read_restriction(&processor), Some(3));
        assert_eq!(processor.timers().pending_count(), 1);
    }
}
