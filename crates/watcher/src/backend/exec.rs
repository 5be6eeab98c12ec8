//! External helper backend
//!
//! Delegates watching to a user-supplied process. The helper is spawned
//! with the watched roots appended to its argv and prints one
//! `<change>\t<absolute path>` line per event on stdout. Line-oriented on
//! purpose: helpers are shell scripts wrapping tools like fswatch or
//! inotifywait.

use super::Backend;
use crate::error::BackendError;
use crate::event::{ChangeKind, RawChange};
use anyhow::{bail, Context, Result};
use crossbeam_channel::Sender;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

pub(crate) struct ExecBackend {
    argv: Vec<String>,
    roots: Vec<PathBuf>,
    tx: Sender<RawChange>,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
}

impl ExecBackend {
    pub fn new(argv: Vec<String>, roots: Vec<PathBuf>, tx: Sender<RawChange>) -> Self {
        Self {
            argv,
            roots,
            tx,
            child: None,
            reader: None,
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Backend for ExecBackend {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn start(&mut self) -> Result<()> {
        let Some((program, args)) = self.argv.split_first() else {
            bail!("exec helper requires a command");
        };

        let mut child = Command::new(program)
            .args(args)
            .args(&self.roots)
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning change helper {program:?}"))?;
        let stdout = child
            .stdout
            .take()
            .context("change helper has no stdout")?;

        self.stopping.store(false, Ordering::Relaxed);
        let stopping = Arc::clone(&self.stopping);
        let tx = self.tx.clone();
        let roots = self.roots.clone();
        let handle = thread::Builder::new()
            .name("lookout-exec".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(err) => {
                            error!("reading from change helper failed: {err}");
                            return;
                        }
                    };
                    match parse_line(&line, &roots) {
                        Some(change) => {
                            if tx.send(change).is_err() {
                                return;
                            }
                        }
                        None => debug!("unparseable helper line: {line:?}"),
                    }
                }
                // EOF outside of stop() means the helper died underneath
                // us; the listener keeps running but sees no more changes.
                if !stopping.load(Ordering::Relaxed) {
                    error!(
                        "{}",
                        BackendError::HelperFailed("stdout closed".to_string())
                    );
                }
            })?;

        self.child = Some(child);
        self.reader = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stopping.store(true, Ordering::Relaxed);
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill() {
                warn!("killing change helper: {err}");
            }
            let _ = child.wait();
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

/// Parse one `<change>\t<absolute path>` helper line
fn parse_line(line: &str, roots: &[PathBuf]) -> Option<RawChange> {
    let (change, path) = line.split_once('\t')?;
    let change = match change {
        "modified" => ChangeKind::Modified,
        "added" => ChangeKind::Added,
        "removed" => ChangeKind::Removed,
        "moved_to" => ChangeKind::MovedTo,
        "moved_from" => ChangeKind::MovedFrom,
        _ => ChangeKind::Unknown,
    };
    let path = Path::new(path);
    for root in roots {
        if let Ok(rel) = path.strip_prefix(root) {
            return Some(RawChange::file(change, root.clone(), rel.to_path_buf()));
        }
    }
    None
}
