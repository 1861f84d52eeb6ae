//! Timers: the scheduled wake-up contract.
//!
//! After a processing attempt leaves residual work, the engine sets a
//! single processing-time timer for the element's namespace. The
//! substrate delivers the firing back as a resume work item, which is
//! the only suspension mechanism in this design: the engine never
//! blocks waiting for resumption.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::state::StateNamespace;
use crate::work_item::StateKey;

pub mod in_mem;

/// Sense of time a timer fires in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeDomain {
    /// Fires when the event-time watermark passes the instant.
    EventTime,
    /// Fires when the runtime's own clock passes the instant. All
    /// resumption timers live here.
    ProcessingTime,
}

/// A single wake-up request, identified by its namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerData {
    pub namespace: StateNamespace,
    pub fire_at: DateTime<Utc>,
    pub domain: TimeDomain,
}

/// Contract the engine requires from a timer substrate.
///
/// At most one timer is pending per (key, namespace); setting another
/// for the same namespace supersedes it. Firings must not be
/// delivered before the state written alongside the set is durably
/// visible.
pub trait TimerService {
    /// The runtime's current notion of processing time.
    fn current_processing_time(&self) -> DateTime<Utc>;

    /// Schedule a wake-up, replacing any pending timer for the same
    /// (key, namespace).
    fn set(&mut self, key: &StateKey, timer: TimerData);
}
