//! Debounce processor
//!
//! Dedicated thread between the backend's raw event stream and the user
//! callback. Events accumulate until the stream settles (or the window
//! anchored to the first unprocessed event expires, so a steady trickle
//! cannot starve delivery), then the batch is squashed, resolved through
//! the diff engine and change detector, reconciled, and delivered.

use crate::event::{ChangeBatch, ChangeKind, RawChange};
use crate::optimize::{reconcile, squash_renames};
use crate::state::{ListenerState, StateCell};
use crate::tcp::Broadcaster;
use crossbeam_channel::{select, Receiver, Sender};
use lookout_core::{
    detect, scan, EntryKind, FileChange, HashingMode, ScanEvent, ScanOptions, SharedRecord,
    Silencer,
};
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, trace, warn};

/// Control messages from the listener to its processor thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Pause,
    Resume,
    Stop,
}

/// Batch delivery callback: `(modified, added, removed)`, each sorted.
pub type Callback = Arc<dyn Fn(Vec<PathBuf>, Vec<PathBuf>, Vec<PathBuf>) + Send + Sync>;

pub(crate) struct Processor {
    pub raw_rx: Receiver<RawChange>,
    pub ctrl_rx: Receiver<Control>,
    pub record: SharedRecord,
    pub silencer: Arc<RwLock<Silencer>>,
    pub state: Arc<StateCell>,
    pub settle: std::time::Duration,
    pub hashing: HashingMode,
    /// Whether raw paths refer to this machine's filesystem. TCP-received
    /// streams set this false: no stat calls, raw kinds pass through.
    pub local_fs: bool,
    pub relative_paths: bool,
    pub roots: Vec<PathBuf>,
    pub callback: Callback,
    pub broadcaster: Option<Arc<Broadcaster>>,
}

impl Processor {
    /// Thread entry point. `done` is dropped on exit so the listener can
    /// bound its wait for teardown; the state cell always reads `Stopped`
    /// afterwards, even if the loop panicked.
    pub fn run(mut self, done: Sender<()>) {
        let state = Arc::clone(&self.state);
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.run_loop()));
        if outcome.is_err() {
            error!("event processor crashed; listener is stopped");
        }
        state.force(ListenerState::Stopped);
        drop(done);
    }

    fn run_loop(&mut self) {
        let mut pending: Vec<RawChange> = Vec::new();
        loop {
            // Idle: block until the first event of a batch arrives.
            select! {
                recv(self.raw_rx) -> msg => match msg {
                    Ok(event) => pending.push(event),
                    Err(_) => return,
                },
                recv(self.ctrl_rx) -> msg => match msg {
                    Ok(Control::Stop) | Err(_) => return,
                    Ok(Control::Pause) | Ok(Control::Resume) => continue,
                },
            }

            // Settle: the window is anchored to the first unprocessed
            // event and is NOT reset by later arrivals, otherwise steady
            // input would defer delivery forever.
            let mut paused = self.state.get() == ListenerState::Paused;
            let mut first_at = Instant::now();
            loop {
                if paused {
                    // No deadline while paused; just accumulate.
                    select! {
                        recv(self.raw_rx) -> msg => match msg {
                            Ok(event) => pending.push(event),
                            Err(_) => return,
                        },
                        recv(self.ctrl_rx) -> msg => match msg {
                            Ok(Control::Stop) | Err(_) => return,
                            Ok(Control::Resume) => {
                                paused = false;
                                first_at = Instant::now();
                            }
                            Ok(Control::Pause) => {}
                        },
                    }
                    continue;
                }

                let deadline = first_at + self.settle;
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                select! {
                    recv(self.raw_rx) -> msg => match msg {
                        Ok(event) => pending.push(event),
                        Err(_) => break,
                    },
                    recv(self.ctrl_rx) -> msg => match msg {
                        Ok(Control::Stop) | Err(_) => return,
                        Ok(Control::Pause) => paused = true,
                        Ok(Control::Resume) => {}
                    },
                    default(deadline - now) => break,
                }
            }

            // Deadline reached: sweep in anything already queued so one
            // delivery covers the whole burst.
            while let Ok(event) = self.raw_rx.try_recv() {
                pending.push(event);
            }
            self.process_batch(std::mem::take(&mut pending));
        }
    }

    fn process_batch(&mut self, events: Vec<RawChange>) {
        trace!(count = events.len(), "processing settled batch");

        let (events, renamed_away) = squash_renames(events, self.local_fs);

        let mut record = self.record.lock();
        for (directory, rel_path) in renamed_away {
            record.unset_at(&directory, &rel_path);
        }

        let silencer = self.silencer.read();
        let mut batch = ChangeBatch::default();
        let mut queue: VecDeque<RawChange> = events.into();
        let mut scanned: HashSet<PathBuf> = HashSet::new();

        while let Some(event) = queue.pop_front() {
            if silencer.silenced(&event.rel_path, event.entry) {
                trace!("silenced: {}", event.rel_path.display());
                continue;
            }
            match event.entry {
                EntryKind::Dir => {
                    // A symlink cycle can re-surface an already-resolved
                    // directory within the same batch; scan each once.
                    if !scanned.insert(event.abs_path()) {
                        continue;
                    }
                    let mut emitted = Vec::new();
                    scan(
                        &mut record,
                        &event.directory,
                        &event.rel_path,
                        ScanOptions {
                            recursive: event.recursive,
                            silence: false,
                        },
                        &mut |scan_event| emitted.push(scan_event),
                    );
                    for scan_event in emitted {
                        queue.push_back(match scan_event {
                            ScanEvent::File { rel_path } => {
                                RawChange::file(ChangeKind::Unknown, &event.directory, rel_path)
                            }
                            ScanEvent::Dir {
                                rel_path,
                                recursive,
                            } => RawChange::dir(&event.directory, rel_path, recursive),
                        });
                    }
                }
                EntryKind::File if self.local_fs => {
                    if let Some(change) =
                        detect(&mut record, &event.directory, &event.rel_path, self.hashing)
                    {
                        batch.insert(change, event.abs_path());
                    }
                }
                EntryKind::File => {
                    // Remote stream: trust the sender's classification.
                    let change = match event.change {
                        ChangeKind::Added | ChangeKind::MovedTo => FileChange::Added,
                        ChangeKind::Removed | ChangeKind::MovedFrom => FileChange::Removed,
                        ChangeKind::Modified | ChangeKind::Unknown => FileChange::Modified,
                    };
                    batch.insert(change, event.abs_path());
                }
            }
        }
        drop(silencer);
        drop(record);

        let local_fs = self.local_fs;
        let mut batch = reconcile(batch, |path: &Path| !local_fs || path.exists());
        if batch.is_empty() {
            trace!("batch optimized away; skipping callback");
            return;
        }

        // Forward resolved file-level changes, not the raw input: raw
        // directory ticks mean nothing on another machine.
        if let Some(broadcaster) = &self.broadcaster {
            for (kind, paths) in [
                (ChangeKind::Modified, &batch.modified),
                (ChangeKind::Added, &batch.added),
                (ChangeKind::Removed, &batch.removed),
            ] {
                for path in paths {
                    broadcaster.send(&self.remote_change(kind, path));
                }
            }
        }

        if self.relative_paths {
            batch.relativize(&self.roots);
        }

        let (modified, added, removed) = batch.into_vecs();
        debug!(
            modified = modified.len(),
            added = added.len(),
            removed = removed.len(),
            "delivering change batch"
        );
        let callback = Arc::clone(&self.callback);
        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(modified, added, removed)))
            .is_err()
        {
            warn!("change callback panicked; continuing to watch");
        }
    }

    /// Express an absolute path as root-relative for the wire, so the
    /// receiving side sees the same `(directory, rel_path)` split.
    fn remote_change(&self, change: ChangeKind, path: &Path) -> RawChange {
        for root in &self.roots {
            if let Ok(rel) = path.strip_prefix(root) {
                return RawChange::file(change, root.clone(), rel.to_path_buf());
            }
        }
        let directory = path.parent().unwrap_or(Path::new("/")).to_path_buf();
        let rel = path.file_name().map(PathBuf::from).unwrap_or_default();
        RawChange::file(change, directory, rel)
    }
}
