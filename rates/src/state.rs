//! Rate cache lifecycle states.

use serde::Serialize;

/// Rate cache operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    /// No snapshot committed yet.
    Uninitialized,
    /// A refresh is in flight. Lookups are served from the last snapshot,
    /// if any.
    Refreshing,
    /// A snapshot is committed and no refresh is running.
    Ready,
    /// Background refresh has been shut down.
    Stopped,
}

impl CacheState {
    /// Check if lookups can be served.
    pub fn is_serving(&self, has_snapshot: bool) -> bool {
        match self {
            CacheState::Ready => true,
            CacheState::Refreshing => has_snapshot,
            CacheState::Uninitialized | CacheState::Stopped => false,
        }
    }

    /// Check if the cache is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CacheState::Stopped)
    }
}
