//! Keyed state: namespaces, cells, and the store contract.
//!
//! The engine keeps three cells per (key, namespace): the cached
//! element, the residual restriction, and the watermark hold. They
//! are written and cleared as a unit over one element's lifetime;
//! there is no independent lifecycle for any single cell.
//!
//! The store itself is an external collaborator. The engine only
//! requires the operations in [`StateStore`] and assumes the
//! substrate serializes access per key; see [`crate::processor`] for
//! the ordering obligations between state writes and timer wake-ups.

use std::any::type_name;
use std::fmt::Display;

use chrono::DateTime;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::window::WindowKey;
use crate::work_item::StateKey;

pub mod in_mem;

/// Scope under which one element's state and timers live.
///
/// Derived from the element's window on the seed call and carried by
/// the timer on every resume call, so all attempts for one element
/// address the same cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateNamespace(WindowKey);

impl StateNamespace {
    /// The namespace for state scoped to a window.
    pub fn window(window: WindowKey) -> Self {
        Self(window)
    }

    pub fn window_key(&self) -> WindowKey {
        self.0
    }
}

impl Display for StateNamespace {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(fmt, "window:{}", self.0)
    }
}

/// The cells the engine addresses within one (key, namespace).
///
/// Plain constants scoped to this engine; no process-wide tag
/// registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateCell {
    /// The cached windowed element, written on the seed call and read
    /// on every resume call.
    Element,
    /// The restriction representing the unprocessed remainder of work
    /// for the element.
    Restriction,
    /// The watermark hold; present if and only if a residual
    /// restriction is present.
    Hold,
}

/// A serialized state value.
///
/// The store only deals in bytes so any serde-able element and
/// restriction type can round-trip without the store knowing about
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBytes(Vec<u8>);

impl StateBytes {
    /// Serialize a state value into bytes the store can keep.
    pub fn ser<T: Serialize>(obj: &T) -> Self {
        let t_name = type_name::<T>();
        Self(
            bincode::serialize(obj)
                .unwrap_or_else(|_| panic!("Error serializing state type {t_name}")),
        )
    }

    /// Deserialize bytes from the store back into a state value.
    pub fn de<T: DeserializeOwned>(self) -> T {
        let t_name = type_name::<T>();
        bincode::deserialize(&self.0)
            .unwrap_or_else(|_| panic!("Error deserializing state type {t_name}"))
    }
}

/// Contract the engine requires from a keyed state substrate.
///
/// Cells are addressed by (key, namespace, cell). Writes performed
/// while handling one work item must be durably visible before any
/// timer set in the same handling is allowed to fire.
pub trait StateStore {
    fn read(&self, key: &StateKey, namespace: &StateNamespace, cell: StateCell)
        -> Option<StateBytes>;

    fn write(
        &mut self,
        key: &StateKey,
        namespace: &StateNamespace,
        cell: StateCell,
        value: StateBytes,
    );

    fn clear(&mut self, key: &StateKey, namespace: &StateNamespace, cell: StateCell);

    /// Add a watermark hold, combining with any existing hold so the
    /// latest instant wins.
    ///
    /// Substrates with a native max-combiner can override this; the
    /// default reads, combines, and writes back through the plain
    /// cell operations.
    fn add_hold(&mut self, key: &StateKey, namespace: &StateNamespace, hold: DateTime<Utc>) {
        let combined = match self.read(key, namespace, StateCell::Hold) {
            Some(prior) => prior.de::<DateTime<Utc>>().max(hold),
            None => hold,
        };
        self.write(key, namespace, StateCell::Hold, StateBytes::ser(&combined));
    }
}
