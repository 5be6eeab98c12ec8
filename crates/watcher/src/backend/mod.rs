//! Backend adapters
//!
//! A backend turns some change source into normalized [`RawChange`]
//! events on the pipeline channel. Selection order: TCP receiver if
//! configured, external helper if configured, then the platform's native
//! notification API (optionally verified by a live probe), and finally
//! the polling backend as the universal fallback.

mod exec;
mod native;
mod polling;

use crate::config::{Config, FallbackMessage, NATIVE_LATENCY, POLLING_LATENCY, PROBE_TIMEOUT};
use crate::event::{ChangeKind, RawChange};
use crate::tcp::TcpBackend;
use anyhow::Result;
use crossbeam_channel::Sender;
use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub(crate) use polling::PollingBackend;

/// A running change source feeding the pipeline channel
pub(crate) trait Backend: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Begin emitting events. Called once per listener start.
    fn start(&mut self) -> Result<()>;

    /// Stop emitting events and release platform resources
    fn stop(&mut self);

    /// Whether emitted paths refer to this machine's filesystem
    fn local_fs(&self) -> bool {
        true
    }

    /// Latency default when the configuration does not override it
    fn default_latency(&self) -> Duration {
        NATIVE_LATENCY
    }
}

/// Choose a backend for the given configuration.
///
/// Infallible by design: every platform can fall back to polling, and the
/// explicitly-requested transports defer their connection errors to
/// `start`.
pub(crate) fn select(
    config: &Config,
    roots: &[PathBuf],
    tx: Sender<RawChange>,
) -> Box<dyn Backend> {
    if let Some(addr) = &config.tcp_receive {
        return Box::new(TcpBackend::new(addr.clone(), tx));
    }
    if let Some(argv) = &config.exec_helper {
        return Box::new(exec::ExecBackend::new(argv.clone(), roots.to_vec(), tx));
    }

    if !config.polling_forced() {
        if let Some(backend) = native::select(config, roots, tx.clone()) {
            info!(backend = backend.name(), "using native notification backend");
            return backend;
        }
        match &config.polling_fallback_message {
            FallbackMessage::Standard => warn!(
                "no usable native notification backend; falling back to polling \
                 (expect higher latency and CPU use)"
            ),
            FallbackMessage::Custom(message) => warn!("{message}"),
            FallbackMessage::Silent => {}
        }
    }

    let interval = config.backend_latency(POLLING_LATENCY);
    Box::new(PollingBackend::new(roots.to_vec(), tx, interval))
}

/// Verify a watcher implementation actually delivers events on this
/// system: watch a scratch directory, touch a file in it, and require a
/// notification within the probe timeout.
///
/// Catches the cases where the API constructs fine but is dead in
/// practice (exhausted inotify instances, containers without the
/// facility, filesystems the API ignores).
fn probe<W: Watcher>(name: &str) -> bool {
    let scratch = match tempfile::tempdir() {
        Ok(scratch) => scratch,
        Err(err) => {
            debug!("probe: no scratch directory: {err}");
            return false;
        }
    };

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut watcher = match W::new(
        move |result: notify::Result<notify::Event>| {
            let _ = tx.send(result);
        },
        notify::Config::default(),
    ) {
        Ok(watcher) => watcher,
        Err(err) => {
            debug!("probe: {name} construction failed: {err}");
            return false;
        }
    };
    if let Err(err) = watcher.watch(scratch.path(), RecursiveMode::Recursive) {
        debug!("probe: {name} cannot watch: {err}");
        return false;
    }
    if std::fs::write(scratch.path().join("probe"), b"x").is_err() {
        return false;
    }

    let delivered = rx.recv_timeout(PROBE_TIMEOUT).is_ok();
    if !delivered {
        debug!("probe: {name} delivered nothing within {PROBE_TIMEOUT:?}");
    }
    let _ = watcher.unwatch(scratch.path());
    delivered
}

/// How a native API reports changes, which decides how its events are
/// normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flavor {
    /// Precise per-entry events (inotify, kqueue, Windows)
    FileLevel,
    /// Directory-granularity hints; the diff engine works out the actual
    /// entries (FSEvents)
    DirLevel,
}

/// Translates `notify` events into normalized raw changes on the pipeline
/// channel.
pub(crate) struct Normalizer {
    roots: Vec<PathBuf>,
    tx: Sender<RawChange>,
    flavor: Flavor,
    /// Synthesized cookie source for `RenameMode::Both` events without a
    /// tracker attribute
    rename_serial: u64,
}

impl Normalizer {
    pub fn new(roots: Vec<PathBuf>, tx: Sender<RawChange>, flavor: Flavor) -> Self {
        Self {
            roots,
            tx,
            flavor,
            rename_serial: 0,
        }
    }

    pub fn handle(&mut self, event: notify::Event) {
        if self.flavor == Flavor::DirLevel {
            // Directory-granularity source: point the diff engine at the
            // containing directory and let it work out what changed.
            for path in &event.paths {
                let dir = if path.is_dir() {
                    path.clone()
                } else {
                    match path.parent() {
                        Some(parent) => parent.to_path_buf(),
                        None => continue,
                    }
                };
                if let Some((root, rel)) = self.locate(&dir) {
                    self.send(RawChange::dir(root, rel, false));
                }
            }
            return;
        }

        match event.kind {
            EventKind::Access(_) => {}
            EventKind::Create(kind) => {
                for path in &event.paths {
                    if kind == CreateKind::Folder || path.is_dir() {
                        self.emit_dir(path, true);
                    } else {
                        self.emit_file(ChangeKind::Added, path, None);
                    }
                }
            }
            EventKind::Remove(kind) => {
                for path in &event.paths {
                    if kind == RemoveKind::Folder {
                        self.emit_dir(path, true);
                    } else {
                        self.emit_file(ChangeKind::Removed, path, None);
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                let cookie = event.attrs.tracker().map(|tracker| tracker as u64);
                match mode {
                    RenameMode::From => {
                        if let Some(path) = event.paths.first() {
                            self.emit_file(ChangeKind::MovedFrom, path, cookie);
                        }
                    }
                    RenameMode::To => {
                        if let Some(path) = event.paths.first() {
                            self.emit_file(ChangeKind::MovedTo, path, cookie);
                        }
                    }
                    RenameMode::Both => {
                        if let [from, to] = event.paths.as_slice() {
                            let cookie = cookie.unwrap_or_else(|| {
                                self.rename_serial += 1;
                                self.rename_serial
                            });
                            self.emit_file(ChangeKind::MovedFrom, from, Some(cookie));
                            self.emit_file(ChangeKind::MovedTo, to, Some(cookie));
                        }
                    }
                    RenameMode::Any | RenameMode::Other => {
                        for path in &event.paths {
                            self.emit_ambiguous(path);
                        }
                    }
                }
            }
            EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
                for path in &event.paths {
                    self.emit_ambiguous(path);
                }
            }
        }
    }

    /// Which watched root contains `path`, and the path relative to it
    fn locate(&self, path: &Path) -> Option<(PathBuf, PathBuf)> {
        for root in &self.roots {
            if let Ok(rel) = path.strip_prefix(root) {
                return Some((root.clone(), rel.to_path_buf()));
            }
        }
        debug!("event outside watched roots: {}", path.display());
        None
    }

    fn send(&self, change: RawChange) {
        let _ = self.tx.send(change);
    }

    fn emit_file(&self, change: ChangeKind, path: &Path, cookie: Option<u64>) {
        if let Some((root, rel)) = self.locate(path) {
            let mut raw = RawChange::file(change, root, rel);
            raw.cookie = cookie;
            self.send(raw);
        }
    }

    fn emit_dir(&self, path: &Path, recursive: bool) {
        if let Some((root, rel)) = self.locate(path) {
            self.send(RawChange::dir(root, rel, recursive));
        }
    }

    /// The source didn't say what the entry is; stat decides, and a
    /// vanished path goes to the detector as a file candidate (which
    /// resolves it to a removal).
    fn emit_ambiguous(&self, path: &Path) {
        if path.is_dir() {
            self.emit_dir(path, false);
        } else {
            self.emit_file(ChangeKind::Unknown, path, None);
        }
    }
}
