//! Polling backend
//!
//! Universal fallback: a thread ticks at the configured interval and
//! points the diff engine at each watched root with a recursive directory
//! event. All change classification happens in the pipeline; this backend
//! only provides the heartbeat.

use super::Backend;
use crate::config::POLLING_LATENCY;
use crate::event::RawChange;
use anyhow::Result;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) struct PollingBackend {
    roots: Vec<PathBuf>,
    tx: Sender<RawChange>,
    interval: Duration,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PollingBackend {
    pub fn new(roots: Vec<PathBuf>, tx: Sender<RawChange>, interval: Duration) -> Self {
        Self {
            roots,
            tx,
            interval,
            stop_tx: None,
            handle: None,
        }
    }
}

impl Backend for PollingBackend {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn default_latency(&self) -> Duration {
        POLLING_LATENCY
    }

    fn start(&mut self) -> Result<()> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let roots = self.roots.clone();
        let tx = self.tx.clone();
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("lookout-poll".into())
            .spawn(move || loop {
                for root in &roots {
                    if tx.send(RawChange::dir(root, "", true)).is_err() {
                        return;
                    }
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    // Stop requested, or the backend handle was dropped.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })?;

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the sender disconnects the tick loop.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use lookout_core::EntryKind;

    #[test]
    fn test_ticks_emit_recursive_root_events() {
        let (tx, rx) = unbounded();
        let roots = vec![PathBuf::from("/w1"), PathBuf::from("/w2")];
        let mut backend = PollingBackend::new(roots, tx, Duration::from_millis(20));

        backend.start().unwrap();
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        backend.stop();

        assert_eq!(first.entry, EntryKind::Dir);
        assert!(first.recursive);
        assert_eq!(first.directory, PathBuf::from("/w1"));
        assert_eq!(second.directory, PathBuf::from("/w2"));
        assert_eq!(first.rel_path, PathBuf::new());
    }

    #[test]
    fn test_stop_halts_ticking() {
        let (tx, rx) = unbounded();
        let mut backend = PollingBackend::new(
            vec![PathBuf::from("/w")],
            tx,
            Duration::from_millis(10),
        );

        backend.start().unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        backend.stop();

        // Drain anything in flight, then verify silence.
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
