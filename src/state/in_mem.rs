//! Implementation of an in-memory state store.
//!
//! This is the substrate used in tests and single-process runs. It
//! makes no durability claims; a real deployment supplies its own
//! [`StateStore`] over whatever storage it trusts.

use std::collections::HashMap;

use super::StateBytes;
use super::StateCell;
use super::StateNamespace;
use super::StateStore;
use crate::work_item::StateKey;

/// A state store with all cells in memory.
#[derive(Debug, Default)]
pub struct InMemStateStore {
    db: HashMap<StateKey, HashMap<StateNamespace, HashMap<StateCell, StateBytes>>>,
}

impl InMemStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no cell is set for any key.
    ///
    /// Cleared keys and namespaces are removed eagerly, so a store
    /// that has fully completed all work reports empty here.
    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

impl StateStore for InMemStateStore {
    fn read(
        &self,
        key: &StateKey,
        namespace: &StateNamespace,
        cell: StateCell,
    ) -> Option<StateBytes> {
        self.db.get(key)?.get(namespace)?.get(&cell).cloned()
    }

    fn write(
        &mut self,
        key: &StateKey,
        namespace: &StateNamespace,
        cell: StateCell,
        value: StateBytes,
    ) {
        self.db
            .entry(key.clone())
            .or_default()
            .entry(*namespace)
            .or_default()
            .insert(cell, value);
    }

    fn clear(&mut self, key: &StateKey, namespace: &StateNamespace, cell: StateCell) {
        let mut drop_key = false;
        if let Some(namespaces) = self.db.get_mut(key) {
            let drop_namespace = match namespaces.get_mut(namespace) {
                Some(cells) => {
                    cells.remove(&cell);
                    cells.is_empty()
                }
                None => false,
            };
            if drop_namespace {
                namespaces.remove(namespace);
            }
            drop_key = namespaces.is_empty();
        }
        // Fully cleared scopes are removed eagerly so is_empty means
        // what it says.
        if drop_key {
            self.db.remove(key);
        }
    }
}

#[cfg(test)]
fn test_addr() -> (StateKey, StateNamespace) {
    use crate::window::WindowKey;

    (
        StateKey("a".to_owned()),
        StateNamespace::window(WindowKey(1)),
    )
}

#[test]
fn write_read_clear_roundtrip() {
    let (key, ns) = test_addr();
    let mut store = InMemStateStore::new();

    store.write(&key, &ns, StateCell::Restriction, StateBytes::ser(&3u64));

    let found = store
        .read(&key, &ns, StateCell::Restriction)
        .map(StateBytes::de::<u64>);
    assert_eq!(found, Some(3));

    store.clear(&key, &ns, StateCell::Restriction);
    assert_eq!(store.read(&key, &ns, StateCell::Restriction), None);
}

#[test]
fn clearing_last_cell_drops_key() {
    let (key, ns) = test_addr();
    let mut store = InMemStateStore::new();

    store.write(&key, &ns, StateCell::Element, StateBytes::ser(&"x"));
    store.write(&key, &ns, StateCell::Hold, StateBytes::ser(&10i64));
    assert!(!store.is_empty());

    store.clear(&key, &ns, StateCell::Element);
    assert!(!store.is_empty());
    store.clear(&key, &ns, StateCell::Hold);
    assert!(store.is_empty());
}

#[test]
fn clear_of_absent_cell_is_noop() {
    let (key, ns) = test_addr();
    let mut store = InMemStateStore::new();

    store.clear(&key, &ns, StateCell::Hold);
    assert!(store.is_empty());
}

#[test]
fn add_hold_keeps_latest() {
    use chrono::DateTime;

    let (key, ns) = test_addr();
    let mut store = InMemStateStore::new();

    let early = DateTime::from_timestamp(10, 0).unwrap();
    let late = DateTime::from_timestamp(20, 0).unwrap();

    store.add_hold(&key, &ns, late);
    store.add_hold(&key, &ns, early);

    let found = store
        .read(&key, &ns, StateCell::Hold)
        .map(StateBytes::de::<chrono::DateTime<chrono::Utc>>);
    assert_eq!(found, Some(late));
}
