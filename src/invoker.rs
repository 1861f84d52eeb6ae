//! The pluggable "invoke processing once" step.
//!
//! The engine calls a [`ProcessElementInvoker`] exactly once per work
//! item and acts on the [`InvokeResult`]: no residual means the
//! element is done; a residual means persist it, hold the watermark,
//! and schedule a wake-up. How the invoker bounds the work inside one
//! invocation is its own affair, as long as each invocation
//! terminates and residuals never grow.

use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;

use crate::logic::ProcessContext;
use crate::logic::ProcessContinuation;
use crate::logic::RestrictionTracker;
use crate::logic::SplitLogic;
use crate::work_item::Element;

/// The outcome of invoking the processing step once.
#[derive(Debug)]
pub struct InvokeResult<R, O> {
    /// Values emitted during this attempt.
    pub outputs: Vec<Element<O>>,
    /// The unprocessed remainder, or [`None`] if the element's work
    /// is fully complete.
    pub residual: Option<R>,
    /// Best-effort earliest timestamp of any future output. Used to
    /// tighten the watermark hold; absent means the engine falls back
    /// to the element's own timestamp.
    pub future_output_watermark: Option<DateTime<Utc>>,
}

/// Invokes the user's processing logic for one bounded attempt.
pub trait ProcessElementInvoker<L: SplitLogic> {
    fn invoke_process_element(
        &mut self,
        logic: &mut L,
        element: &Element<L::Value>,
        tracker: L::Tracker,
    ) -> Result<InvokeResult<L::Restriction, L::Output>>;
}

/// The standard invoker: one `process_element` call, residual derived
/// from the tracker's checkpoint.
///
/// If the logic returns [`ProcessContinuation::Resume`] the tracker
/// is asked to split off everything unclaimed; if the tracker reports
/// nothing remains, the element is complete after all. A
/// [`ProcessContinuation::Stop`] is trusted as-is.
#[derive(Debug, Default)]
pub struct CheckpointInvoker;

impl CheckpointInvoker {
    pub fn new() -> Self {
        Self
    }
}

impl<L: SplitLogic> ProcessElementInvoker<L> for CheckpointInvoker {
    fn invoke_process_element(
        &mut self,
        logic: &mut L,
        element: &Element<L::Value>,
        mut tracker: L::Tracker,
    ) -> Result<InvokeResult<L::Restriction, L::Output>> {
        let mut outputs = Vec::new();
        let mut output_watermark = None;

        let continuation = {
            let mut ctx = ProcessContext::new(
                element.timestamp,
                element.window,
                &mut outputs,
                &mut output_watermark,
            );
            logic.process_element(element, &mut tracker, &mut ctx)?
        };

        let residual = match continuation {
            ProcessContinuation::Stop => None,
            ProcessContinuation::Resume => tracker.checkpoint(),
        };
        tracing::trace!(
            "Invoked once; continuation {continuation:?}, residual present: {}",
            residual.is_some()
        );

        Ok(InvokeResult {
            outputs,
            residual,
            future_output_watermark: output_watermark,
        })
    }
}
