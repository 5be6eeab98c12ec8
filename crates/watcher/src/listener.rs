//! Listener: the public watch lifecycle
//!
//! A listener owns one backend, one processor thread, and the shared
//! state between them. Construction validates roots and patterns but
//! touches nothing on disk; `start` builds the baseline and spins up the
//! threads; `stop` tears everything down and may be followed by another
//! `start`.

use crate::backend::{self, Backend};
use crate::config::{Config, STOP_JOIN_TIMEOUT};
use crate::processor::{Callback, Control, Processor};
use crate::state::{InvalidTransition, ListenerState, StateCell};
use crate::tcp::Broadcaster;
use anyhow::Result;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use lookout_core::{resolve_roots, shared_record, SharedRecord, Silencer};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

/// A configured (and possibly running) directory watch
pub struct Listener {
    config: Config,
    roots: Vec<PathBuf>,
    record: SharedRecord,
    silencer: Arc<RwLock<Silencer>>,
    state: Arc<StateCell>,
    callback: Callback,
    backend: Option<Box<dyn Backend>>,
    ctrl_tx: Option<Sender<Control>>,
    done_rx: Option<Receiver<()>>,
    broadcaster: Option<Arc<Broadcaster>>,
}

impl Listener {
    /// Validate directories and patterns and build a stopped listener.
    ///
    /// Each directory must exist and be a directory; aliases of the same
    /// real path are rejected. Call [`start`](Self::start) to begin
    /// watching.
    pub fn new<P: AsRef<Path>>(
        dirs: &[P],
        config: Config,
        callback: impl Fn(Vec<PathBuf>, Vec<PathBuf>, Vec<PathBuf>) + Send + Sync + 'static,
    ) -> Result<Self> {
        let dirs: Vec<PathBuf> = dirs.iter().map(|d| d.as_ref().to_path_buf()).collect();
        let roots = resolve_roots(&dirs)?;
        let silencer = Silencer::from_patterns(
            &config.ignore,
            config.ignore_replace.as_deref(),
            &config.only,
        )?;

        let state = Arc::new(StateCell::new());
        state
            .transition(ListenerState::Stopped)
            .expect("fresh cell accepts Stopped");

        Ok(Self {
            config,
            roots,
            record: shared_record(),
            silencer: Arc::new(RwLock::new(silencer)),
            state,
            callback: Arc::new(callback),
            backend: None,
            ctrl_tx: None,
            done_rx: None,
            broadcaster: None,
        })
    }

    /// Begin (or resume) watching.
    ///
    /// From `Stopped` this rebuilds the baseline record, spawns the
    /// processor thread, and starts the backend. From `Paused` it resumes
    /// delivery. Starting a listener that is already processing is a
    /// no-op.
    pub fn start(&mut self) -> Result<()> {
        match self.state.get() {
            ListenerState::Processing => Ok(()),
            ListenerState::Paused => {
                self.state.transition(ListenerState::Processing)?;
                if let Some(ctrl) = &self.ctrl_tx {
                    let _ = ctrl.send(Control::Resume);
                }
                Ok(())
            }
            ListenerState::Stopped | ListenerState::Initializing => {
                self.state.transition(ListenerState::Processing)?;
                if let Err(err) = self.spin_up() {
                    self.state.force(ListenerState::Stopped);
                    return Err(err);
                }
                Ok(())
            }
        }
    }

    fn spin_up(&mut self) -> Result<()> {
        let (raw_tx, raw_rx) = unbounded();
        let (ctrl_tx, ctrl_rx) = unbounded();
        let (done_tx, done_rx) = bounded(0);

        let mut backend = backend::select(&self.config, &self.roots, raw_tx);
        let settle = self
            .config
            .settle_delay(self.config.backend_latency(backend.default_latency()));

        // Baseline before the backend starts, so the first real event
        // diffs against a complete record. Remote streams have no local
        // tree to mirror.
        if backend.local_fs() {
            self.record.lock().rebuild(&self.roots)?;
        }

        let broadcaster = match &self.config.broadcast {
            Some(addr) => Some(Broadcaster::bind(addr)?),
            None => None,
        };

        let processor = Processor {
            raw_rx,
            ctrl_rx,
            record: Arc::clone(&self.record),
            silencer: Arc::clone(&self.silencer),
            state: Arc::clone(&self.state),
            settle,
            hashing: self.config.hashing,
            local_fs: backend.local_fs(),
            relative_paths: self.config.relative_paths,
            roots: self.roots.clone(),
            callback: Arc::clone(&self.callback),
            broadcaster: broadcaster.clone(),
        };
        thread::Builder::new()
            .name("lookout-processor".into())
            .spawn(move || processor.run(done_tx))?;

        if let Err(err) = backend.start() {
            let _ = ctrl_tx.send(Control::Stop);
            if let Some(broadcaster) = &broadcaster {
                broadcaster.shutdown();
            }
            return Err(err);
        }

        info!(backend = backend.name(), ?settle, "listener started");
        self.backend = Some(backend);
        self.ctrl_tx = Some(ctrl_tx);
        self.done_rx = Some(done_rx);
        self.broadcaster = broadcaster;
        Ok(())
    }

    /// Stop watching and tear down threads. Idempotent; the listener can
    /// be started again afterwards (with a fresh baseline).
    ///
    /// The backend is stopped before the processor so the event source
    /// is silent while the processor drains its queue; stopping the
    /// processor first would let late raw events pile up unread.
    pub fn stop(&mut self) {
        if self.state.get() == ListenerState::Stopped && self.ctrl_tx.is_none() {
            return;
        }
        let _ = self.state.transition(ListenerState::Stopped);

        // Backend first so no further raw events race the drain.
        if let Some(mut backend) = self.backend.take() {
            backend.stop();
        }
        if let Some(ctrl) = self.ctrl_tx.take() {
            let _ = ctrl.send(Control::Stop);
        }
        if let Some(done) = self.done_rx.take() {
            match done.recv_timeout(STOP_JOIN_TIMEOUT) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
                Err(RecvTimeoutError::Timeout) => {
                    warn!("processor did not stop within {STOP_JOIN_TIMEOUT:?}")
                }
            }
        }
        if let Some(broadcaster) = self.broadcaster.take() {
            broadcaster.shutdown();
        }
        self.record.lock().clear();
        info!("listener stopped");
    }

    /// Keep watching but hold delivery; changes accumulate until
    /// [`unpause`](Self::unpause).
    pub fn pause(&mut self) -> Result<(), InvalidTransition> {
        self.state.transition(ListenerState::Paused)?;
        if let Some(ctrl) = &self.ctrl_tx {
            let _ = ctrl.send(Control::Pause);
        }
        Ok(())
    }

    /// Resume delivery of accumulated and future changes
    pub fn unpause(&mut self) -> Result<(), InvalidTransition> {
        self.state.transition(ListenerState::Processing)?;
        if let Some(ctrl) = &self.ctrl_tx {
            let _ = ctrl.send(Control::Resume);
        }
        Ok(())
    }

    /// Whether the listener is watching and delivering
    pub fn processing(&self) -> bool {
        self.state.get() == ListenerState::Processing
    }

    /// Whether the listener is watching but holding delivery
    pub fn paused(&self) -> bool {
        self.state.get() == ListenerState::Paused
    }

    /// Whether the listener is stopped
    pub fn stopped(&self) -> bool {
        self.state.get() == ListenerState::Stopped
    }

    /// Append ignore patterns at runtime
    pub fn ignore(&self, patterns: &[String]) -> Result<()> {
        self.silencer.write().add_ignore(patterns)
    }

    /// Replace all ignore patterns (built-in defaults included)
    pub fn ignore_replace(&self, patterns: &[String]) -> Result<()> {
        self.silencer.write().replace_ignore(patterns)
    }

    /// Replace the `only` allow-list
    pub fn only(&self, patterns: &[String]) -> Result<()> {
        self.silencer.write().set_only(patterns)
    }

    /// The canonicalized watched roots
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Bound address of the broadcast socket, when broadcasting
    pub fn broadcast_addr(&self) -> Option<SocketAddr> {
        self.broadcaster.as_ref().map(|b| b.local_addr())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}
