//! Input data model: keys, elements, seeds, and work items.
//!
//! A [`WorkItem`] is one unit delivered to the engine by the upstream
//! grouping: a key plus either exactly one [`Seed`] (the first
//! processing attempt for an element, which carries the element
//! itself) or exactly one timer firing (a later attempt, where the
//! element has to be reconstructed from state).

use std::fmt::Display;
use std::hash::Hash;
use std::hash::Hasher;

use chrono::DateTime;
use chrono::Utc;
use seahash::SeaHasher;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::WorkError;
use crate::timers::TimerData;
use crate::window::WindowKey;

/// Key to route work and state.
///
/// All state and timers are scoped by (key, namespace). The engine
/// never inspects the contents; it only needs hashing, equality, and
/// serde so the key can cross the state store and any worker
/// exchange.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateKey(pub String);

impl StateKey {
    /// Stable worker assignment for this key.
    ///
    /// Uses a fixed hasher rather than [`std::collections::hash_map::DefaultHasher`]
    /// so the assignment is consistent across processes.
    pub fn route(&self, worker_count: usize) -> usize {
        let mut hasher = SeaHasher::new();
        self.0.hash(&mut hasher);
        (hasher.finish() % worker_count as u64) as usize
    }
}

impl Display for StateKey {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        fmt.write_str(&self.0)
    }
}

/// A user payload with its assigned window and timestamp.
///
/// This is what gets cached verbatim in the element state cell on the
/// seed call, so resume calls (which carry only a timer) can
/// reconstruct it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element<V> {
    pub value: V,
    pub timestamp: DateTime<Utc>,
    pub window: WindowKey,
}

impl<V> Element<V> {
    pub fn new(value: V, timestamp: DateTime<Utc>, window: WindowKey) -> Self {
        Self {
            value,
            timestamp,
            window,
        }
    }
}

/// An element paired with the restriction describing its remaining
/// work. The first (and only) non-timer input for an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed<V, R> {
    pub element: Element<V>,
    pub restriction: R,
}

/// The single input for this work item once classified.
#[derive(Debug)]
pub(crate) enum WorkInput<V, R> {
    /// First attempt; carries the element and its restriction.
    Seed(Seed<V, R>),
    /// Later attempt; the namespace on the firing locates the cached
    /// element and residual restriction.
    Resume(TimerData),
}

/// One unit of work delivered to the engine.
///
/// The upstream grouping guarantees exactly one seed element or
/// exactly one timer firing per item; [`WorkItem::into_classified`]
/// fails loudly if that contract is broken rather than guessing.
#[derive(Debug, Clone)]
pub struct WorkItem<V, R> {
    pub key: StateKey,
    pub seeds: Vec<Seed<V, R>>,
    pub timers: Vec<TimerData>,
}

impl<V, R> WorkItem<V, R> {
    /// A work item carrying the first attempt for an element.
    pub fn seed(key: StateKey, element: Element<V>, restriction: R) -> Self {
        Self {
            key,
            seeds: vec![Seed {
                element,
                restriction,
            }],
            timers: Vec::new(),
        }
    }

    /// A work item carrying a timer firing for a previously seeded
    /// element.
    pub fn resume(key: StateKey, timer: TimerData) -> Self {
        Self {
            key,
            seeds: Vec::new(),
            timers: vec![timer],
        }
    }

    /// Extract the single seed or single timer firing.
    ///
    /// Anything else is a bug in the caller, not in this engine, so
    /// there is no defensive recovery here.
    pub(crate) fn into_classified(self) -> Result<(StateKey, WorkInput<V, R>), WorkError> {
        let Self {
            key,
            mut seeds,
            mut timers,
        } = self;
        if seeds.len() > 1 || timers.len() > 1 {
            return Err(WorkError::MalformedWorkItem {
                key,
                reason: format!(
                    "expected a single seed element or a single timer firing, got {} seed(s) and {} firing(s)",
                    seeds.len(),
                    timers.len()
                ),
            });
        }
        match (seeds.pop(), timers.pop()) {
            (Some(seed), None) => Ok((key, WorkInput::Seed(seed))),
            (None, Some(timer)) => Ok((key, WorkInput::Resume(timer))),
            (Some(_), Some(_)) => Err(WorkError::MalformedWorkItem {
                key,
                reason: "carries both a seed element and a timer firing".to_string(),
            }),
            (None, None) => Err(WorkError::MalformedWorkItem {
                key,
                reason: "carries neither a seed element nor a timer firing".to_string(),
            }),
        }
    }
}

#[test]
fn route_is_stable_and_in_range() {
    let key = StateKey("cart-1234".to_owned());

    let worker = key.route(4);
    assert!(worker < 4);
    // Same key, same worker, every time.
    assert_eq!(worker, StateKey("cart-1234".to_owned()).route(4));
}

#[test]
fn classify_rejects_empty_item() {
    let item: WorkItem<String, u64> = WorkItem {
        key: StateKey("a".to_owned()),
        seeds: Vec::new(),
        timers: Vec::new(),
    };

    assert!(matches!(
        item.into_classified(),
        Err(WorkError::MalformedWorkItem { .. })
    ));
}
