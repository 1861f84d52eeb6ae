//! Implementation of an in-memory timer service with simulated time.
//!
//! "Now" only moves when told to, so tests can step through
//! seed/resume cycles deterministically. Due firings are pulled with
//! [`InMemTimerService::drain_due`] and redelivered as resume work
//! items by whatever drives the engine.

use std::collections::HashMap;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;

use super::TimerData;
use super::TimerService;
use crate::state::StateNamespace;
use crate::work_item::StateKey;

/// A timer service with all pending timers in memory and a manually
/// advanced clock.
#[derive(Debug)]
pub struct InMemTimerService {
    now: DateTime<Utc>,
    pending: HashMap<StateKey, HashMap<StateNamespace, TimerData>>,
}

impl InMemTimerService {
    pub fn new(start_at: DateTime<Utc>) -> Self {
        Self {
            now: start_at,
            pending: HashMap::new(),
        }
    }

    /// Move "now" forward by a delta.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Move "now" forward to an instant. Never moves backward.
    pub fn advance_to(&mut self, to: DateTime<Utc>) {
        self.now = self.now.max(to);
    }

    /// The earliest pending fire instant, if any timer is pending.
    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.pending
            .values()
            .flat_map(|timers| timers.values())
            .map(|timer| timer.fire_at)
            .min()
    }

    /// Remove and return all timers due at "now", earliest first.
    pub fn drain_due(&mut self) -> Vec<(StateKey, TimerData)> {
        let now = self.now;
        let mut due = Vec::new();
        for (key, timers) in self.pending.iter_mut() {
            timers.retain(|_namespace, timer| {
                if timer.fire_at <= now {
                    due.push((key.clone(), *timer));
                    false
                } else {
                    true
                }
            });
        }
        self.pending.retain(|_key, timers| !timers.is_empty());
        // Deterministic delivery order for equal instants.
        due.sort_by(|(a_key, a), (b_key, b)| {
            a.fire_at.cmp(&b.fire_at).then_with(|| a_key.0.cmp(&b_key.0))
        });
        due
    }

    pub fn is_pending(&self, key: &StateKey, namespace: &StateNamespace) -> bool {
        self.pending
            .get(key)
            .map(|timers| timers.contains_key(namespace))
            .unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(|timers| timers.len()).sum()
    }
}

impl Default for InMemTimerService {
    fn default() -> Self {
        Self::new(DateTime::UNIX_EPOCH)
    }
}

impl TimerService for InMemTimerService {
    fn current_processing_time(&self) -> DateTime<Utc> {
        self.now
    }

    fn set(&mut self, key: &StateKey, timer: TimerData) {
        self.pending
            .entry(key.clone())
            .or_default()
            .insert(timer.namespace, timer);
    }
}

#[cfg(test)]
use crate::window::WindowKey;

#[cfg(test)]
fn pt_timer(window: i64, fire_secs: i64) -> TimerData {
    TimerData {
        namespace: StateNamespace::window(WindowKey(window)),
        fire_at: DateTime::from_timestamp(fire_secs, 0).unwrap(),
        domain: super::TimeDomain::ProcessingTime,
    }
}

#[test]
fn set_replaces_pending_for_same_namespace() {
    let key = StateKey("a".to_owned());
    let mut timers = InMemTimerService::default();

    timers.set(&key, pt_timer(1, 10));
    timers.set(&key, pt_timer(1, 20));

    assert_eq!(timers.pending_count(), 1);
    assert_eq!(
        timers.next_fire_at(),
        Some(DateTime::from_timestamp(20, 0).unwrap())
    );
}

#[test]
fn drain_due_only_returns_due_timers() {
    let key = StateKey("a".to_owned());
    let mut timers = InMemTimerService::default();

    timers.set(&key, pt_timer(1, 5));
    timers.set(&key, pt_timer(2, 50));

    timers.advance(Duration::seconds(10));
    let due = timers.drain_due();

    assert_eq!(due.len(), 1);
    assert_eq!(due[0].1, pt_timer(1, 5));
    assert_eq!(timers.pending_count(), 1);
    assert!(timers.is_pending(&key, &StateNamespace::window(WindowKey(2))));
}

#[test]
fn drain_due_orders_by_fire_instant_then_key() {
    let mut timers = InMemTimerService::default();

    timers.set(&StateKey("b".to_owned()), pt_timer(1, 5));
    timers.set(&StateKey("a".to_owned()), pt_timer(1, 5));
    timers.set(&StateKey("c".to_owned()), pt_timer(1, 3));

    timers.advance(Duration::seconds(10));
    let keys: Vec<String> = timers
        .drain_due()
        .into_iter()
        .map(|(key, _timer)| key.0)
        .collect();

    assert_eq!(keys, vec!["c", "a", "b"]);
}
