//! Adaptive page sizing for upstream searches.
//!
//! Every tracked entity (a technician, a service level) gets its own belief
//! about the page size that returns everything in one request without
//! dragging along a mostly empty window.

mod engine;
mod state;

pub use engine::{AdaptivePaginationEngine, EngineStats};
pub use state::HistoryEntry;
