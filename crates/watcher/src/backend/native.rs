//! Native notification backends
//!
//! One generic adapter wraps whichever `notify` watcher implementation
//! the platform provides; only the selection function is cfg-gated.

use super::{probe, Backend, Flavor, Normalizer};
use crate::config::Config;
use crate::error::BackendError;
use crate::event::RawChange;
use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use notify::{RecursiveMode, Watcher};
use std::path::PathBuf;
use tracing::warn;

/// Pick the platform's native API, optionally verifying it with a live
/// probe. `None` means no native backend is usable here and the caller
/// should fall back to polling.
pub(crate) fn select(
    config: &Config,
    roots: &[PathBuf],
    tx: Sender<RawChange>,
) -> Option<Box<dyn Backend>> {
    #[cfg(target_os = "linux")]
    {
        build::<notify::INotifyWatcher>("inotify", Flavor::FileLevel, config, roots, tx)
    }
    #[cfg(target_os = "macos")]
    {
        build::<notify::FsEventWatcher>("fsevents", Flavor::DirLevel, config, roots, tx)
    }
    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    {
        build::<notify::KqueueWatcher>("kqueue", Flavor::FileLevel, config, roots, tx)
    }
    #[cfg(target_os = "windows")]
    {
        build::<notify::ReadDirectoryChangesWatcher>(
            "windows",
            Flavor::FileLevel,
            config,
            roots,
            tx,
        )
    }
    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly",
        target_os = "windows"
    )))]
    {
        let _ = (config, roots, tx);
        None
    }
}

#[allow(dead_code)] // unreferenced on platforms without a native API
fn build<W: Watcher + Send + 'static>(
    name: &'static str,
    flavor: Flavor,
    config: &Config,
    roots: &[PathBuf],
    tx: Sender<RawChange>,
) -> Option<Box<dyn Backend>> {
    if config.probe_backend && !probe::<W>(name) {
        return None;
    }
    Some(Box::new(NativeBackend::<W> {
        name,
        flavor,
        roots: roots.to_vec(),
        tx,
        watcher: None,
    }))
}

struct NativeBackend<W: Watcher> {
    name: &'static str,
    flavor: Flavor,
    roots: Vec<PathBuf>,
    tx: Sender<RawChange>,
    watcher: Option<W>,
}

impl<W: Watcher + Send> Backend for NativeBackend<W> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn start(&mut self) -> Result<()> {
        let mut normalizer = Normalizer::new(self.roots.clone(), self.tx.clone(), self.flavor);
        let name = self.name;
        let mut watcher = W::new(
            move |result: notify::Result<notify::Event>| match result {
                Ok(event) => normalizer.handle(event),
                Err(err) => warn!("{name} watcher error: {err}"),
            },
            notify::Config::default(),
        )
        .with_context(|| format!("initializing {name} backend"))?;

        for root in &self.roots {
            if let Err(err) = watcher.watch(root, RecursiveMode::Recursive) {
                // Partial coverage would silently drop changes; report the
                // limit as actionable and abort startup.
                if matches!(err.kind, notify::ErrorKind::MaxFilesWatch) {
                    return Err(BackendError::WatchLimit {
                        path: root.display().to_string(),
                        detail: err.to_string(),
                    }
                    .into());
                }
                return Err(err).with_context(|| format!("watching {}", root.display()));
            }
        }

        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the watcher tears down the platform handles.
        self.watcher = None;
    }
}
