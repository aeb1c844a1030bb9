use std::cell::Cell;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatch::{self, Delivery, Peer, PeerId};
use crate::error::{CapacityExceeded, ServerError, StartError};
use crate::mux::{Multiplexer, Readiness};
use crate::protocol;
use crate::reader::{Line, LineReader, Received};
use crate::slots::SlotTable;
use crate::sys;

/// Back-off when the poll had nothing to watch.
const IDLE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Starting,
    Running,
}

/// Clears the running flag from any thread; the loop notices after its
/// current iteration.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("stop requested");
        }
    }
}

/// One admitted connection.
#[derive(Debug)]
struct Client {
    stream: TcpStream,
    addr: SocketAddr,
    reader: LineReader,
    /// Set when a send failed; the stream may hold half a frame.
    broken: Cell<bool>,
}

impl Client {
    fn receive(&mut self) -> Received {
        self.reader.receive(&self.stream)
    }
}

impl Peer for Client {
    fn id(&self) -> PeerId {
        self.stream.id()
    }

    fn send(&self, frame: &[u8]) -> io::Result<()> {
        let result = self.stream.send(frame);
        if result.is_err() {
            self.broken.set(true);
        }
        result
    }
}

/// Why a client is being removed.
#[derive(Debug, Clone, Copy)]
enum Departure {
    Quit,
    Disconnected,
    Failed,
}

/// Single-threaded chat relay.
///
/// Each iteration rebuilds the watch set from the listener and every live
/// slot, makes one bounded poll, then admits at most one new connection and
/// services every readable client in slot order.
pub struct Server {
    config: Config,
    state: State,
    listener: Option<TcpListener>,
    slots: SlotTable<Client>,
    mux: Multiplexer,
    running: Arc<AtomicBool>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let slots = SlotTable::new(config.max_clients.get());

        Self {
            config,
            state: State::Stopped,
            listener: None,
            slots,
            mux: Multiplexer::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn live_count(&self) -> usize {
        self.slots.live_count()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref()?.local_addr().ok()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
        }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Opens the listening socket. Any failure leaves the server stopped.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.state != State::Stopped {
            return Err(ServerError::AlreadyStarted);
        }

        self.state = State::Starting;
        self.listener = None;

        let listener = match self.open_listener() {
            Ok(listener) => listener,
            Err(err) => {
                error!("failed to start: {err}");
                self.state = State::Stopped;
                return Err(err.into());
            }
        };

        match listener.local_addr() {
            Ok(addr) => info!("listening on {}", addr),
            Err(_) => info!("listening on port {}", self.config.port),
        }

        self.listener = Some(listener);
        self.running.store(true, Ordering::Release);
        self.state = State::Running;

        Ok(())
    }

    fn open_listener(&self) -> Result<TcpListener, StartError> {
        let listener = sys::open_listener(self.config.port)?;
        listener
            .set_nonblocking(true)
            .map_err(StartError::Configure)?;
        Ok(listener)
    }

    /// Drives the loop until stopped or until the poll itself fails.
    pub fn run(&mut self) -> Result<(), ServerError> {
        if self.state != State::Running {
            return Err(ServerError::NotRunning);
        }

        info!(capacity = self.slots.capacity(), "event loop started");

        let result = loop {
            if !self.running.load(Ordering::Acquire) {
                break Ok(());
            }
            if let Err(err) = self.iterate() {
                break Err(err);
            }
        };

        self.running.store(false, Ordering::Release);
        self.state = State::Stopped;

        match &result {
            Ok(()) => {
                let peers: Vec<&Client> = self.slots.live().collect();
                if !peers.is_empty() {
                    dispatch::broadcast(protocol::SHUTDOWN, &peers);
                }
                info!("event loop stopped");
            }
            Err(err) => error!("event loop aborted: {err}"),
        }

        result
    }

    fn iterate(&mut self) -> Result<(), ServerError> {
        let Some(listen_fd) = self.listener.as_ref().map(AsRawFd::as_raw_fd) else {
            return Err(ServerError::NotRunning);
        };

        self.mux.reset();
        self.mux.add(listen_fd);
        for client in self.slots.live() {
            self.mux.add(client.id());
        }

        match self.mux.poll(self.config.poll_timeout()) {
            Ok(Readiness::Ready(ready)) => debug!(ready, "descriptors ready"),
            Ok(Readiness::TimedOut) => return Ok(()),
            Ok(Readiness::NoHandles) => {
                thread::sleep(IDLE_BACKOFF);
                return Ok(());
            }
            Err(err) => return Err(ServerError::Poll(err)),
        }

        if self.mux.is_ready(listen_fd) {
            self.accept_client();
        }

        for index in 0..self.slots.capacity() {
            let Some(fd) = self.slots.get(index).map(Peer::id) else {
                continue;
            };
            if !self.mux.is_ready(fd) {
                continue;
            }

            if let Some(departure) = self.service(index) {
                self.depart(index, departure);
            }
        }

        self.reap_broken();

        Ok(())
    }

    /// Evicts every client a send failed on. Leave notices can break more
    /// peers, so this repeats until none are left.
    fn reap_broken(&mut self) {
        while let Some(index) = (0..self.slots.capacity())
            .find(|&index| self.slots.get(index).is_some_and(|client| client.broken.get()))
        {
            warn!(slot = index, "send failed, dropping client");
            self.depart(index, Departure::Failed);
        }
    }

    fn accept_client(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };

        let (stream, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(err) => {
                warn!("accept failed: {err}");
                return;
            }
        };

        if let Err(err) = self.prepare_stream(&stream) {
            warn!(peer = %addr, "dropping connection, socket setup failed: {err}");
            return;
        }

        let client = Client {
            stream,
            addr,
            reader: LineReader::new(self.config.max_line_bytes.get()),
            broken: Cell::new(false),
        };

        let index = match self.slots.admit(client) {
            Ok(index) => index,
            Err(CapacityExceeded { handle, capacity }) => {
                warn!(peer = %handle.addr, capacity, "rejecting connection, server full");
                dispatch::unicast(protocol::SERVER_FULL, &handle);
                return;
            }
        };

        let name = self.slots.display_name(index);
        let online = self.slots.live_count();
        info!(slot = index, name = %name, peer = %addr, live = online, "client joined");

        let peers: Vec<&Client> = self.slots.live().collect();
        if let Some(newcomer) = self.slots.get(index) {
            dispatch::unicast(&protocol::welcome(&name, online), newcomer);
            dispatch::multicast(&protocol::joined(&name), &peers, newcomer.id());
        }
    }

    fn prepare_stream(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(self.config.io_timeout())?;
        stream.set_write_timeout(self.config.io_timeout())?;
        Ok(())
    }

    /// Performs one read for the client in `index` and acts on every line it
    /// completed. Returns why the client should leave, if it should.
    fn service(&mut self, index: usize) -> Option<Departure> {
        let received = self.slots.get_mut(index)?.receive();

        let lines = match received {
            Received::Lines(lines) => lines,
            Received::Disconnected => return Some(Departure::Disconnected),
            Received::Failed(err) => {
                warn!(slot = index, "receive failed: {err}");
                return Some(Departure::Failed);
            }
        };

        for line in lines {
            if protocol::is_quit(line.text()) {
                if let Some(client) = self.slots.get(index) {
                    dispatch::unicast(protocol::GOODBYE, client);
                }
                return Some(Departure::Quit);
            }
            self.relay(index, &line);
        }

        None
    }

    /// Broadcasts a chat line to every live client, sender included.
    fn relay(&self, index: usize, line: &Line) {
        let text = line.text();
        let name = self.slots.display_name(index);
        debug!(slot = index, name = %name, "relaying {} bytes", text.len());

        let peers: Vec<&Client> = self.slots.live().collect();
        if let Delivery::Failed = dispatch::broadcast(&protocol::chat_line(&name, text), &peers) {
            warn!(slot = index, "message from {} reached nobody", name);
        }

        if line.is_truncated() {
            if let Some(sender) = self.slots.get(index) {
                dispatch::unicast(
                    &protocol::truncated(self.config.max_line_bytes.get()),
                    sender,
                );
            }
        }
    }

    /// Tells the other clients, then closes the slot.
    fn depart(&mut self, index: usize, departure: Departure) {
        let name = self.slots.display_name(index);
        let Some(leaving) = self.slots.get(index) else {
            return;
        };
        let addr = leaving.addr;

        let peers: Vec<&Client> = self.slots.live().collect();
        dispatch::multicast(&protocol::left(&name), &peers, leaving.id());

        if let Err(err) = self.slots.evict(index) {
            warn!(slot = index, "eviction failed: {err}");
            return;
        }

        info!(
            slot = index,
            name = %name,
            peer = %addr,
            reason = ?departure,
            live = self.slots.live_count(),
            "client left"
        );
    }
}
