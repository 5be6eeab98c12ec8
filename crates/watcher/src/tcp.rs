//! TCP transport: forward raw changes between machines
//!
//! A broadcasting listener serializes every logical change it resolves
//! and fans it out to connected recipients; a receiving listener feeds
//! the frames into its own debounce pipeline instead of watching disk.
//! Frames
//! are a 4-byte big-endian length followed by a bincode-encoded
//! [`RawChange`]. Transport only: no authentication, no reconnection.

use crate::backend::Backend;
use crate::event::RawChange;
use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Sanity cap on frame payloads; a legitimate raw change is a few hundred
/// bytes of paths at most.
const MAX_FRAME_LEN: u32 = 1 << 20;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Write one length-prefixed frame
pub(crate) fn write_frame(stream: &mut impl Write, change: &RawChange) -> io::Result<()> {
    let payload = bincode::serialize(change)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    stream.write_all(&(payload.len() as u32).to_be_bytes())?;
    stream.write_all(&payload)
}

/// Read one frame; `Ok(None)` on clean end-of-stream
pub(crate) fn read_frame(stream: &mut impl Read) -> io::Result<Option<RawChange>> {
    let mut header = [0u8; 4];
    match stream.read_exact(&mut header) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds cap"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload)?;
    bincode::deserialize(&payload)
        .map(Some)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// Fan-out side of the transport.
///
/// Accepts recipient connections on a background thread and replays every
/// raw change to all of them. A recipient that fails a write is dropped;
/// it is expected to reconnect.
pub struct Broadcaster {
    peers: Mutex<Vec<TcpStream>>,
    stopping: AtomicBool,
    local_addr: SocketAddr,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Broadcaster {
    /// Bind and start accepting recipients
    pub fn bind(addr: &str) -> Result<Arc<Self>> {
        let socket = TcpListener::bind(addr)
            .with_context(|| format!("binding broadcast socket on {addr}"))?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        let broadcaster = Arc::new(Self {
            peers: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
            local_addr,
            accept_handle: Mutex::new(None),
        });

        let acceptor = Arc::clone(&broadcaster);
        let handle = thread::Builder::new()
            .name("lookout-broadcast".into())
            .spawn(move || {
                while !acceptor.stopping.load(Ordering::Relaxed) {
                    match socket.accept() {
                        Ok((stream, peer)) => {
                            debug!(%peer, "broadcast recipient connected");
                            let _ = stream.set_nodelay(true);
                            acceptor.peers.lock().push(stream);
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(ACCEPT_POLL);
                        }
                        Err(err) => {
                            warn!("broadcast accept failed: {err}");
                            thread::sleep(ACCEPT_POLL);
                        }
                    }
                }
            })?;
        *broadcaster.accept_handle.lock() = Some(handle);

        debug!(%local_addr, "broadcasting raw changes");
        Ok(broadcaster)
    }

    /// The bound address (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently-connected recipients
    pub fn recipient_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Replay one raw change to every recipient, dropping dead ones
    pub fn send(&self, change: &RawChange) {
        self.peers.lock().retain_mut(|stream| {
            match write_frame(stream, change) {
                Ok(()) => true,
                Err(err) => {
                    debug!("dropping broadcast recipient: {err}");
                    false
                }
            }
        });
    }

    /// Stop accepting and disconnect all recipients
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Relaxed);
        if let Some(handle) = self.accept_handle.lock().take() {
            let _ = handle.join();
        }
        self.peers.lock().clear();
    }
}

/// Receiving side: a backend that connects to a remote broadcaster and
/// replays its frames into the local pipeline. Paths in the stream refer
/// to the sender's filesystem, so `local_fs` is false and the processor
/// never stats them.
pub(crate) struct TcpBackend {
    addr: String,
    tx: Sender<RawChange>,
    stream: Option<TcpStream>,
    reader: Option<JoinHandle<()>>,
}

impl TcpBackend {
    pub fn new(addr: String, tx: Sender<RawChange>) -> Self {
        Self {
            addr,
            tx,
            stream: None,
            reader: None,
        }
    }
}

impl Backend for TcpBackend {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn local_fs(&self) -> bool {
        false
    }

    fn start(&mut self) -> Result<()> {
        let stream = TcpStream::connect(&self.addr)
            .with_context(|| format!("connecting to broadcaster at {}", self.addr))?;
        let tx = self.tx.clone();
        let mut reader = BufReader::new(stream.try_clone()?);
        let handle = thread::Builder::new()
            .name("lookout-tcp-rx".into())
            .spawn(move || loop {
                match read_frame(&mut reader) {
                    Ok(Some(change)) => {
                        if tx.send(change).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        debug!("broadcaster closed the connection");
                        return;
                    }
                    Err(err) => {
                        warn!("tcp receive failed: {err}");
                        return;
                    }
                }
            })?;
        self.stream = Some(stream);
        self.reader = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}
