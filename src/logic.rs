//! The user-logic seam: trackers, lifecycle, and contexts.
//!
//! Impl [`SplitLogic`] to describe how one element's work is chipped
//! away at, and pair it with a [`RestrictionTracker`] that knows how
//! to claim and split the remaining work. The engine never looks
//! inside a restriction; it only cares whether one is left over after
//! an attempt.

use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;

use crate::window::WindowKey;
use crate::work_item::Element;

/// Tracks progress through one restriction during a single attempt.
///
/// A fresh tracker is built from the current restriction on every
/// attempt via [`SplitLogic::new_tracker`]; trackers never survive
/// across attempts. The claim protocol between logic and tracker is
/// the implementor's own business.
pub trait RestrictionTracker {
    type Restriction;

    /// A snapshot of the work this tracker still governs.
    fn current_restriction(&self) -> Self::Restriction;

    /// Split off everything not yet claimed as a residual
    /// restriction, leaving this tracker owning only the completed
    /// part.
    ///
    /// Returns [`None`] if nothing remains. The residual must
    /// describe less or equal work than the restriction the tracker
    /// was built from; it never grows.
    fn checkpoint(&mut self) -> Option<Self::Restriction>;
}

/// What the logic wants to happen after returning from
/// [`SplitLogic::process_element`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessContinuation {
    /// The restriction is exhausted; there is nothing left to claim.
    Stop,
    /// Work remains. The unclaimed remainder will be checkpointed and
    /// this element re-driven by a timer.
    Resume,
}

/// Context for [`SplitLogic::start_bundle`].
///
/// Deliberately has no output operation: a splittable element can
/// only produce output from `process_element`, and that restriction
/// is enforced by this type simply lacking the method.
#[derive(Debug)]
pub struct StartBundleContext(());

impl StartBundleContext {
    pub(crate) fn new() -> Self {
        Self(())
    }
}

/// Context for [`SplitLogic::finish_bundle`]. Like
/// [`StartBundleContext`], it has no output operation.
#[derive(Debug)]
pub struct FinishBundleContext(());

impl FinishBundleContext {
    pub(crate) fn new() -> Self {
        Self(())
    }
}

/// Context handed to [`SplitLogic::process_element`].
///
/// Collects outputs and an optional estimate of the earliest
/// timestamp at which this element might still produce output, which
/// tightens the watermark hold beyond the conservative
/// element-timestamp fallback.
pub struct ProcessContext<'a, O> {
    timestamp: DateTime<Utc>,
    window: WindowKey,
    outputs: &'a mut Vec<Element<O>>,
    output_watermark: &'a mut Option<DateTime<Utc>>,
}

impl<'a, O> ProcessContext<'a, O> {
    pub fn new(
        timestamp: DateTime<Utc>,
        window: WindowKey,
        outputs: &'a mut Vec<Element<O>>,
        output_watermark: &'a mut Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            timestamp,
            window,
            outputs,
            output_watermark,
        }
    }

    /// Timestamp of the element being processed.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Emit a value at the element's own timestamp.
    pub fn output(&mut self, value: O) {
        self.output_at(value, self.timestamp);
    }

    /// Emit a value at an explicit timestamp, in the element's
    /// window.
    pub fn output_at(&mut self, value: O, timestamp: DateTime<Utc>) {
        self.outputs.push(Element::new(value, timestamp, self.window));
    }

    /// Report a best-effort promise that no further output for this
    /// element will carry a timestamp earlier than `watermark`.
    pub fn report_output_watermark(&mut self, watermark: DateTime<Utc>) {
        *self.output_watermark = Some(watermark);
    }
}

/// Impl this trait to define how a splittable element is processed.
///
/// A single instance serves every key; per-element progress lives
/// entirely in the restriction, which is persisted between attempts
/// by the engine. Lifecycle calls arrive in the usual order: `setup`
/// once, then `start_bundle`/`process_element`.../`finish_bundle`
/// cycles, then `teardown` once.
pub trait SplitLogic {
    /// User payload type.
    type Value;
    /// Description of remaining work for one element.
    type Restriction;
    /// Tracker built fresh from a restriction on each attempt.
    type Tracker: RestrictionTracker<Restriction = Self::Restriction>;
    /// Emitted output type.
    type Output;

    fn setup(&mut self) {}

    fn start_bundle(&mut self, _ctx: &StartBundleContext) {}

    /// Build a tracker governing `restriction`.
    fn new_tracker(&self, restriction: Self::Restriction) -> Result<Self::Tracker>;

    /// Perform one bounded unit of work for `element`.
    ///
    /// Must not run unboundedly: claim through the tracker, emit
    /// through `ctx`, and return [`ProcessContinuation::Resume`] once
    /// a reasonable chunk is done. Returning
    /// [`ProcessContinuation::Stop`] asserts the restriction is
    /// exhausted.
    fn process_element(
        &mut self,
        element: &Element<Self::Value>,
        tracker: &mut Self::Tracker,
        ctx: &mut ProcessContext<'_, Self::Output>,
    ) -> Result<ProcessContinuation>;

    fn finish_bundle(&mut self, _ctx: &FinishBundleContext) {}

    fn teardown(&mut self) {}
}
