//! Listener configuration

use lookout_core::HashingMode;
use std::time::Duration;

/// Default latency for native (event-driven) backends
pub const NATIVE_LATENCY: Duration = Duration::from_millis(100);

/// Default latency (scan interval) for the polling backend
pub const POLLING_LATENCY: Duration = Duration::from_secs(1);

/// Hard timeout for the one-time backend capability probe, independent of
/// the configured latency so an unresponsive native backend cannot hang
/// listener construction
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on waiting for the processor thread during `stop()`
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What to print when falling back to the polling backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FallbackMessage {
    /// The built-in notice naming the fallback and a remediation pointer
    #[default]
    Standard,
    /// A caller-supplied notice
    Custom(String),
    /// Suppress the notice entirely
    Silent,
}

/// Configuration for a [`Listener`](crate::Listener)
///
/// Plain struct with defaults; set the fields you care about.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend-level latency override (scan interval for polling, batching
    /// latency for natives). `None` uses the selected backend's default.
    pub latency: Option<Duration>,

    /// Debounce settle window for the event processor, distinct from the
    /// adapter-level latency. `None` follows the backend latency.
    pub wait_for_delay: Option<Duration>,

    /// Skip native backend selection and always poll
    pub force_polling: bool,

    /// Customize or suppress the polling-fallback warning
    pub polling_fallback_message: FallbackMessage,

    /// Additional ignore patterns (regular expressions)
    pub ignore: Vec<String>,

    /// Replace the built-in ignore defaults entirely
    pub ignore_replace: Option<Vec<String>>,

    /// Allow-list: when non-empty, files must match at least one pattern
    pub only: Vec<String>,

    /// Report paths relative to their watched root instead of absolute
    pub relative_paths: bool,

    /// Content-hash fallback behavior for same-second edits
    pub hashing: HashingMode,

    /// Verify the selected native backend with a live scratch-directory
    /// probe before committing to it
    pub probe_backend: bool,

    /// Receive raw changes from a remote broadcaster instead of watching
    /// the local filesystem (`host:port`)
    pub tcp_receive: Option<String>,

    /// Broadcast raw changes to TCP recipients (`host:port` to bind)
    pub broadcast: Option<String>,

    /// Delegate watching to an external helper process (argv). The helper
    /// prints one `<change>\t<absolute path>` line per event.
    pub exec_helper: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            latency: None,
            wait_for_delay: None,
            force_polling: false,
            polling_fallback_message: FallbackMessage::default(),
            ignore: Vec::new(),
            ignore_replace: None,
            only: Vec::new(),
            relative_paths: false,
            hashing: HashingMode::default(),
            probe_backend: true,
            tcp_receive: None,
            broadcast: None,
            exec_helper: None,
        }
    }
}

impl Config {
    /// Effective backend latency given the selected backend's default
    pub fn backend_latency(&self, backend_default: Duration) -> Duration {
        self.latency.unwrap_or(backend_default)
    }

    /// Effective settle window for the debounce processor
    pub fn settle_delay(&self, backend_latency: Duration) -> Duration {
        self.wait_for_delay.unwrap_or(backend_latency)
    }

    /// Whether polling is forced, by option or by the process-wide
    /// backend-simulation toggle (`LOOKOUT_BACKEND=polling`)
    pub fn polling_forced(&self) -> bool {
        if self.force_polling {
            return true;
        }
        std::env::var("LOOKOUT_BACKEND")
            .map(|v| v.eq_ignore_ascii_case("polling"))
            .unwrap_or(false)
    }
}
