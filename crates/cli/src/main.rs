//! `lookout` binary: watch directories and print change batches

use anyhow::Result;
use clap::Parser;
use lookout::{Config, HashingMode};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "lookout",
    about = "Watch directories and print debounced change batches",
    version
)]
struct Cli {
    /// Directories to watch
    #[arg(default_value = ".")]
    dirs: Vec<PathBuf>,

    /// Force the polling backend
    #[arg(long)]
    poll: bool,

    /// Backend latency in milliseconds (poll interval for --poll)
    #[arg(long, value_name = "MS")]
    latency: Option<u64>,

    /// Debounce window in milliseconds
    #[arg(long, value_name = "MS")]
    wait: Option<u64>,

    /// Extra ignore pattern (regex, repeatable)
    #[arg(long, value_name = "REGEX")]
    ignore: Vec<String>,

    /// Only report files matching a pattern (regex, repeatable)
    #[arg(long, value_name = "REGEX")]
    only: Vec<String>,

    /// Print paths relative to their watched root
    #[arg(long)]
    relative: bool,

    /// Always hash to catch same-second edits (slower)
    #[arg(long)]
    paranoid: bool,

    /// Broadcast changes to TCP recipients (bind address)
    #[arg(long, value_name = "HOST:PORT")]
    broadcast: Option<String>,

    /// Receive changes from a remote broadcaster instead of watching
    #[arg(long, value_name = "HOST:PORT")]
    receive: Option<String>,

    /// Delegate watching to a helper command (repeat for its args)
    #[arg(long, value_name = "ARG", num_args = 1.., allow_hyphen_values = true)]
    exec: Option<Vec<String>>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LOOKOUT_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config {
        force_polling: cli.poll,
        latency: cli.latency.map(Duration::from_millis),
        wait_for_delay: cli.wait.map(Duration::from_millis),
        ignore: cli.ignore,
        only: cli.only,
        relative_paths: cli.relative,
        hashing: if cli.paranoid {
            HashingMode::Always
        } else {
            HashingMode::default()
        },
        broadcast: cli.broadcast,
        tcp_receive: cli.receive,
        exec_helper: cli.exec,
        ..Config::default()
    };

    let listener = lookout::watch(&cli.dirs, config, |modified, added, removed| {
        for path in &added {
            println!("+ {}", path.display());
        }
        for path in &modified {
            println!("~ {}", path.display());
        }
        for path in &removed {
            println!("- {}", path.display());
        }
    })?;
    if let Some(addr) = listener.broadcast_addr() {
        tracing::info!(%addr, "broadcasting changes");
    }

    // Watch until interrupted.
    loop {
        std::thread::park();
    }
}
