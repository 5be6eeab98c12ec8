//! Listener lifecycle state machine
//!
//! A tagged state value behind a mutex. Transitions are checked against
//! the legal set and rejected with a typed error instead of silently
//! coercing; the processor thread reads the value atomically through the
//! same cell.

use parking_lot::Mutex;

/// Listener lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Under construction; no threads, no record
    Initializing,
    /// Torn down (re-enterable via `start`)
    Stopped,
    /// Watching and delivering batches
    Processing,
    /// Watching and accumulating, but not delivering
    Paused,
}

/// Attempted transition outside the legal set
#[derive(Debug, thiserror::Error)]
#[error("invalid listener transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: ListenerState,
    pub to: ListenerState,
}

/// Atomically-observable state cell
#[derive(Debug)]
pub struct StateCell {
    inner: Mutex<ListenerState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ListenerState::Initializing),
        }
    }

    /// Current state
    pub fn get(&self) -> ListenerState {
        *self.inner.lock()
    }

    /// Unconditional write, for internal teardown paths (a crashed
    /// processor observably leaves `Processing` this way)
    pub fn force(&self, state: ListenerState) {
        *self.inner.lock() = state;
    }

    /// Checked transition; returns the previous state on success
    pub fn transition(&self, to: ListenerState) -> Result<ListenerState, InvalidTransition> {
        let mut current = self.inner.lock();
        let from = *current;
        if !legal(from, to) {
            return Err(InvalidTransition { from, to });
        }
        *current = to;
        Ok(from)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// The legal transition set: `Stopped` is reachable from anywhere,
/// `Processing` from `Stopped`/`Paused`, `Paused` from `Processing` only.
fn legal(from: ListenerState, to: ListenerState) -> bool {
    use ListenerState::*;
    match (from, to) {
        (_, Stopped) => true,
        (Stopped | Paused, Processing) => true,
        (Processing, Paused) => true,
        _ => false,
    }
}
