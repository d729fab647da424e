//! channel.rs
//! Network channel seam between peers and the dispatcher.
//!
//! - `LocalChannel`: in-process crossbeam queues; peers are `LocalPeer` handles.
//! - `TcpChannel`:   newline-delimited JSON over TCP; a reader and a writer thread per
//!                   connection, peers identified by socket address. `send` only queues, so
//!                   a peer that stops reading is dropped instead of stalling the dispatcher.

use std::{
    io::{self, BufRead, BufReader, ErrorKind, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, unbounded};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use socket2::{Domain, SockAddr, Socket, Type};

use crate::dispatch::request::{CorrelationId, Failure, FailureKind, PeerId, Request, Response};
use crate::error::ChannelError;

const INBOUND_CAPACITY: usize = 1024;
const ACCEPT_POLL_MS: u64 = 20;
/// Responses buffered per TCP peer before it counts as stalled.
const PEER_OUTBOUND_CAPACITY: usize = 256;
const PEER_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Transport consumed by the dispatcher. Wire encoding, framing and peer management are
/// the implementation's concern.
pub trait NetworkChannel: Send + Sync {
    /// Waits up to `timeout` for the next request. `Ok(None)` means nothing arrived;
    /// `Err(ChannelError::Closed)` means nothing ever will.
    fn receive(&self, timeout: Duration) -> Result<Option<Request>, ChannelError>;

    /// Delivers `response` to `response.peer`, tagged with `response.correlation_id`.
    fn send(&self, response: Response) -> Result<(), ChannelError>;
}

// ============================================================================
// In-process channel
// ============================================================================

pub struct LocalChannel {
    inbound_tx: Sender<Request>,
    inbound_rx: Receiver<Request>,
    peers: DashMap<PeerId, Sender<Response>>,
    next_peer: AtomicU64,
    closed: AtomicBool,
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalChannel {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = bounded(INBOUND_CAPACITY);
        Self {
            inbound_tx,
            inbound_rx,
            peers: DashMap::new(),
            next_peer: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn connect(&self) -> LocalPeer {
        let id = PeerId(format!("local-{}", self.next_peer.fetch_add(1, Ordering::Relaxed)));
        let (tx, rx) = unbounded();
        self.peers.insert(id.clone(), tx);
        LocalPeer {
            id,
            tx: self.inbound_tx.clone(),
            rx,
        }
    }

    /// After close, `receive` drains what is queued and then reports `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl NetworkChannel for LocalChannel {
    fn receive(&self, timeout: Duration) -> Result<Option<Request>, ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return match self.inbound_rx.try_recv() {
                Ok(req) => Ok(Some(req)),
                Err(_) => Err(ChannelError::Closed),
            };
        }
        match self.inbound_rx.recv_timeout(timeout) {
            Ok(req) => Ok(Some(req)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    fn send(&self, response: Response) -> Result<(), ChannelError> {
        let peer = response.peer.clone();
        let delivered = match self.peers.get(&peer) {
            Some(tx) => tx.send(response).is_ok(),
            None => return Err(ChannelError::UnknownPeer(peer.0)),
        };
        if !delivered {
            self.peers.remove(&peer);
            return Err(ChannelError::UnknownPeer(peer.0));
        }
        Ok(())
    }
}

/// Peer side of a `LocalChannel`.
pub struct LocalPeer {
    id: PeerId,
    tx: Sender<Request>,
    rx: Receiver<Response>,
}

impl LocalPeer {
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn submit(&self, request: Request) -> Result<(), ChannelError> {
        self.tx
            .send(request.from_peer(self.id.clone()))
            .map_err(|_| ChannelError::Closed)
    }

    pub fn recv(&self, timeout: Duration) -> Option<Response> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Submit and wait for the next response addressed to this peer.
    pub fn call(&self, request: Request, timeout: Duration) -> Option<Response> {
        self.submit(request).ok()?;
        self.recv(timeout)
    }
}

// ============================================================================
// TCP channel (JSON lines)
// ============================================================================

/// Outbound side of one TCP peer. Responses queue for its writer thread; `control` is a
/// handle on the same socket used only to disconnect it.
struct PeerWriter {
    queue: Sender<Vec<u8>>,
    control: TcpStream,
}

type PeerTable = Arc<DashMap<PeerId, PeerWriter>>;

pub struct TcpChannel {
    local_addr: SocketAddr,
    inbound: Receiver<Request>,
    writers: PeerTable,
    running: Arc<AtomicBool>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl TcpChannel {
    pub fn bind(addr: SocketAddr) -> Result<Self, ChannelError> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(true).ok();
        socket.bind(&SockAddr::from(addr))?;
        socket.listen(128)?;

        let listener: TcpListener = socket.into();
        // Non-blocking accept so the acceptor observes shutdown.
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = bounded(INBOUND_CAPACITY);
        let writers: PeerTable = Arc::new(DashMap::new());
        let running = Arc::new(AtomicBool::new(true));

        let acceptor = {
            let writers = writers.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("tcp-acceptor".to_string())
                .spawn(move || accept_loop(listener, tx, writers, running))?
        };

        info!("[TcpChannel] listening on {}", local_addr);
        Ok(Self {
            local_addr,
            inbound: rx,
            writers,
            running,
            acceptor: Mutex::new(Some(acceptor)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.writers.len()
    }

    /// Stops accepting, disconnects every peer and joins the acceptor.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        for entry in self.writers.iter() {
            let _ = entry.value().control.shutdown(Shutdown::Both);
        }
        self.writers.clear();
        if let Some(h) = self.acceptor.lock().take() {
            if h.join().is_err() {
                error!("[TcpChannel] acceptor thread panicked");
            }
        }
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl NetworkChannel for TcpChannel {
    fn receive(&self, timeout: Duration) -> Result<Option<Request>, ChannelError> {
        match self.inbound.recv_timeout(timeout) {
            Ok(req) => Ok(Some(req)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    fn send(&self, response: Response) -> Result<(), ChannelError> {
        write_response(&self.writers, response)
    }
}

/// Queues one encoded response for the peer's writer thread. Never blocks: a peer whose
/// queue is full is not reading and gets disconnected.
fn write_response(
    writers: &DashMap<PeerId, PeerWriter>,
    response: Response,
) -> Result<(), ChannelError> {
    let mut line = serde_json::to_vec(&response)?;
    line.push(b'\n');

    let peer = response.peer;
    let queued = match writers.get(&peer) {
        Some(writer) => writer.queue.try_send(line),
        None => return Err(ChannelError::UnknownPeer(peer.0)),
    };
    match queued {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            warn!("[TcpChannel] {} is not reading its responses, disconnecting", peer);
            disconnect(writers, &peer);
            Err(ChannelError::Stalled(peer.0))
        }
        Err(TrySendError::Disconnected(_)) => {
            disconnect(writers, &peer);
            Err(ChannelError::UnknownPeer(peer.0))
        }
    }
}

fn disconnect(writers: &DashMap<PeerId, PeerWriter>, peer: &PeerId) {
    if let Some((_, writer)) = writers.remove(peer) {
        let _ = writer.control.shutdown(Shutdown::Both);
    }
}

fn accept_loop(
    listener: TcpListener,
    tx: Sender<Request>,
    writers: PeerTable,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = attach_peer(stream, addr, &tx, &writers) {
                    warn!("[TcpChannel] dropping {}: {}", addr, e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(ACCEPT_POLL_MS));
            }
            Err(e) => {
                error!("[TcpChannel] accept error: {}", e);
                thread::sleep(Duration::from_millis(ACCEPT_POLL_MS));
            }
        }
    }
    debug!("[TcpChannel] acceptor exiting");
}

/// Registers a freshly accepted connection: one writer thread fed by a bounded queue, one
/// reader thread feeding the shared inbound queue.
fn attach_peer(
    stream: TcpStream,
    addr: SocketAddr,
    tx: &Sender<Request>,
    writers: &PeerTable,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(PEER_WRITE_TIMEOUT))?;
    let out = stream.try_clone()?;
    let control = stream.try_clone()?;

    let peer = PeerId(addr.to_string());
    let (queue, pending) = bounded(PEER_OUTBOUND_CAPACITY);
    {
        let peer = peer.clone();
        thread::Builder::new()
            .name(format!("tcp-out-{}", addr))
            .spawn(move || write_loop(out, peer, pending))?;
    }
    writers.insert(peer.clone(), PeerWriter { queue, control });
    debug!("[TcpChannel] peer {} connected", peer);

    let tx = tx.clone();
    let table = writers.clone();
    let spawned = thread::Builder::new()
        .name(format!("tcp-peer-{}", addr))
        .spawn({
            let peer = peer.clone();
            move || read_loop(stream, peer, tx, table)
        });
    if let Err(e) = spawned {
        disconnect(writers, &peer);
        return Err(e);
    }
    Ok(())
}

fn write_loop(mut stream: TcpStream, peer: PeerId, pending: Receiver<Vec<u8>>) {
    for line in pending.iter() {
        if let Err(e) = stream.write_all(&line) {
            debug!("[TcpChannel] write to {} failed: {}", peer, e);
            break;
        }
    }
    // Wakes the reader if the write side gave up first.
    let _ = stream.shutdown(Shutdown::Both);
}

fn read_loop(stream: TcpStream, peer: PeerId, tx: Sender<Request>, writers: PeerTable) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                debug!("[TcpChannel] read error from {}: {}", peer, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                if tx.send(request.from_peer(peer.clone())).is_err() {
                    break;
                }
            }
            Err(e) => {
                // Undecodable lines are answered here; they never reach the dispatcher.
                warn!("[TcpChannel] malformed request from {}: {}", peer, e);
                let key = recover_key(&line);
                let response = Response::failure_to(
                    peer.clone(),
                    key,
                    Failure::new(FailureKind::MalformedRequest, e.to_string()),
                );
                if let Err(e) = write_response(&writers, response) {
                    debug!("[TcpChannel] could not answer {}: {}", peer, e);
                    break;
                }
            }
        }
    }
    writers.remove(&peer);
    debug!("[TcpChannel] peer {} disconnected", peer);
}

fn recover_key(line: &str) -> CorrelationId {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("requestKey").cloned())
        .map(CorrelationId::from)
        .unwrap_or_else(CorrelationId::null)
}
