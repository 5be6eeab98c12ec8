//! Lookout: cross-platform filesystem change notification
//!
//! Watches directory trees and delivers debounced, deduplicated batches
//! of logical changes (`modified` / `added` / `removed`) to a callback.
//! Native notification APIs are used where available and verified; a
//! polling backend built on the same diff engine covers everything else.
//! Raw changes can also be forwarded over TCP so one machine can react
//! to edits made on another.
//!
//! ```no_run
//! use lookout::{watch, Config};
//!
//! # fn main() -> anyhow::Result<()> {
//! let listener = watch(&["."], Config::default(), |modified, added, removed| {
//!     println!("~{} +{} -{}", modified.len(), added.len(), removed.len());
//! })?;
//! // ... listener watches until dropped or stopped
//! # drop(listener);
//! # Ok(())
//! # }
//! ```

mod backend;
mod config;
mod error;
mod event;
mod listener;
mod optimize;
mod processor;
mod state;
mod tcp;

pub use config::{Config, FallbackMessage, NATIVE_LATENCY, POLLING_LATENCY};
pub use error::BackendError;
pub use event::{ChangeBatch, ChangeKind, RawChange};
pub use listener::Listener;
pub use processor::Callback;
pub use state::{InvalidTransition, ListenerState};
pub use tcp::Broadcaster;

// Core types callers need alongside the listener
pub use lookout_core::{FileChange, HashingMode, SetupError, Silencer};

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Build and start a listener in one call
pub fn watch<P: AsRef<Path>>(
    dirs: &[P],
    config: Config,
    callback: impl Fn(Vec<PathBuf>, Vec<PathBuf>, Vec<PathBuf>) + Send + Sync + 'static,
) -> Result<Listener> {
    let mut listener = Listener::new(dirs, config, callback)?;
    listener.start()?;
    Ok(listener)
}
