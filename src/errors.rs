//! Error taxonomy for the engine.
//!
//! Every failure surfaces to the caller of
//! [`crate::processor::ResumableProcessor::handle`]; nothing is
//! swallowed or retried here. Retry policy, if any, belongs to the
//! substrate delivering work items.

use thiserror::Error;

use crate::state::StateNamespace;
use crate::work_item::StateKey;

/// Errors surfaced while handling a work item.
#[derive(Debug, Error)]
pub enum WorkError {
    /// The work item broke the exactly-one-of-{seed, timer} contract.
    ///
    /// Fatal: indicates a bug in the upstream grouping, not a
    /// condition to retry.
    #[error("malformed work item for key '{key}': {reason}")]
    MalformedWorkItem { key: StateKey, reason: String },

    /// A timer fired but the element or restriction cell was empty.
    ///
    /// Fatal: the state store and timer service disagree, either
    /// because state writes were not durable before the wake-up or
    /// because state was cleared out of band.
    #[error("no cached element or restriction for key '{key}' in {namespace}")]
    MissingResumeState {
        key: StateKey,
        namespace: StateNamespace,
    },

    /// The processing step or the user's tracker construction failed.
    ///
    /// Propagated unchanged; state is as last written.
    #[error("processing step failed: {0:#}")]
    ProcessingStep(anyhow::Error),
}
