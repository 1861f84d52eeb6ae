//! Window identity.
//!
//! The engine does not window data itself; it only needs a stable
//! identity for the window an element was assigned upstream, because
//! all per-element state and timers live under a namespace derived
//! from that window.

use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;

/// Unique ID for the window an element was assigned to.
///
/// Produced by whatever windowing ran upstream of the engine. Two
/// elements with the same key and the same [`WindowKey`] share state
/// and timers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowKey(pub i64);

impl Display for WindowKey {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}
