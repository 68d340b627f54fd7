//! mio-based worker event loop.
//!
//! Readiness model: poll tells us which sockets can accept, read, or write
//! without blocking, then we perform the non-blocking syscalls ourselves
//! (epoll on Linux, kqueue on macOS). Each worker owns its poll, its
//! listener, and every connection it accepts, so connection state is never
//! touched by two threads at once.
//!
//! With `workers > 1`, every worker binds the same address through
//! `SO_REUSEPORT` and the kernel load-balances accepted connections across
//! them.

use crate::codec;
use crate::config::Config;
use crate::handler::{AckResponder, Hooks, LogHooks, Responder};
use crate::runtime::buffer::Phase;
use crate::runtime::connection::{Connection, ConnectionRegistry, IoState};
use bytes::Bytes;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const EVENTS_CAPACITY: usize = 256;

/// Handle to a running server.
///
/// Dropping the handle does not stop the workers; call [`shutdown`] to
/// stop them or [`join`] to wait for them indefinitely.
///
/// [`shutdown`]: ServerHandle::shutdown
/// [`join`]: ServerHandle::join
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// The bound listening address. With `port = 0` in the config, this
    /// carries the port the kernel actually assigned.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal shutdown and wait for all workers to stop.
    ///
    /// Workers observe the flag within one poll interval, then drop their
    /// listener and close every live connection.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.join();
    }

    /// Wait for the workers without signaling shutdown.
    pub fn join(self) {
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Bind all listeners and start the worker threads.
///
/// Every listener is bound up front so a bind failure (port in use,
/// permission denied) surfaces here rather than inside a worker thread.
pub fn spawn(
    config: Config,
    responder: Arc<dyn Responder>,
    hooks: Arc<dyn Hooks>,
) -> io::Result<ServerHandle> {
    let num_workers = if config.workers == 0 {
        available_parallelism()
    } else {
        config.workers
    };

    let requested: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // Bind the first listener at the requested address, then bind the rest
    // at the resolved one so an ephemeral port lands every worker on the
    // same port.
    let first = bind_listener(requested)?;
    let local_addr = first.local_addr()?;
    let mut listeners = vec![first];
    for _ in 1..num_workers {
        listeners.push(bind_listener(local_addr)?);
    }

    info!(workers = num_workers, addr = %local_addr, "starting server");

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::with_capacity(num_workers);

    for (worker_id, listener) in listeners.into_iter().enumerate() {
        let config = config.clone();
        let responder = Arc::clone(&responder);
        let hooks = Arc::clone(&hooks);
        let shutdown = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                if let Err(e) = worker_loop(worker_id, listener, &config, responder, hooks, shutdown)
                {
                    error!(worker = worker_id, error = %e, "worker failed");
                }
            })?;

        handles.push(handle);
    }

    Ok(ServerHandle {
        local_addr,
        shutdown,
        workers: handles,
    })
}

/// Run the server with the default fixed-acknowledgment responder and
/// tracing-backed hooks. Blocks until the workers exit.
pub fn run(config: Config) -> io::Result<()> {
    let handle = spawn(config, Arc::new(AckResponder), Arc::new(LogHooks))?;
    handle.join();
    Ok(())
}

fn worker_loop(
    worker_id: usize,
    listener: std::net::TcpListener,
    config: &Config,
    responder: Arc<dyn Responder>,
    hooks: Arc<dyn Hooks>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(EVENTS_CAPACITY);

    let mut listener = TcpListener::from_std(listener);
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut registry = ConnectionRegistry::new(config.max_connections);
    let mut read_chunk = vec![0u8; config.read_buffer_bytes];

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let idle_timeout =
        (config.idle_timeout_ms > 0).then(|| Duration::from_millis(config.idle_timeout_ms));

    info!(worker = worker_id, "worker started");

    while !shutdown.load(Ordering::Relaxed) {
        if let Err(e) = poll.poll(&mut events, Some(poll_interval)) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(&listener, &poll, &mut registry, config, worker_id);
                }
                Token(conn_id) => {
                    // closed earlier in this batch
                    if !registry.contains(conn_id) {
                        continue;
                    }
                    if let Err(e) = handle_connection_event(
                        conn_id,
                        event,
                        &poll,
                        &mut registry,
                        &mut read_chunk,
                        responder.as_ref(),
                        hooks.as_ref(),
                    ) {
                        if let Some(peer) = registry.get(conn_id).map(|c| c.peer) {
                            hooks.on_error(peer, &e);
                        }
                        debug!(conn_id, error = %e, "closing connection on error");
                        close_connection(&poll, &mut registry, conn_id);
                    }
                }
            }
        }

        if let Some(timeout) = idle_timeout {
            reap_idle(&poll, &mut registry, timeout, hooks.as_ref());
        }
    }

    // shutdown: stop accepting, then discard every live connection
    poll.registry().deregister(&mut listener)?;
    for conn_id in registry.ids() {
        close_connection(&poll, &mut registry, conn_id);
    }
    info!(worker = worker_id, "worker stopped");
    Ok(())
}

/// Drain pending accepts until the listener would block.
///
/// Each accepted connection must be registered for read readiness before
/// returning, otherwise bytes could arrive with nobody to drain them.
fn accept_connections(
    listener: &TcpListener,
    poll: &Poll,
    registry: &mut ConnectionRegistry,
    config: &Config,
    worker_id: usize,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let conn = Connection::new(stream, peer, config.max_message_bytes);
                let conn_id = match registry.insert(conn) {
                    Ok(id) => id,
                    Err(_rejected) => {
                        warn!(%peer, "connection limit reached, rejecting");
                        continue;
                    }
                };
                if let Some(conn) = registry.get_mut(conn_id) {
                    if let Err(e) = poll.registry().register(
                        &mut conn.stream,
                        Token(conn_id),
                        Interest::READABLE,
                    ) {
                        error!(%peer, error = %e, "failed to register connection");
                        registry.remove(conn_id);
                        continue;
                    }
                    debug!(worker = worker_id, conn_id, %peer, "accepted connection");
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                error!(error = %e, "accept error");
                break;
            }
        }
    }
}

fn handle_connection_event(
    conn_id: usize,
    event: &mio::event::Event,
    poll: &Poll,
    registry: &mut ConnectionRegistry,
    read_chunk: &mut [u8],
    responder: &dyn Responder,
    hooks: &dyn Hooks,
) -> io::Result<()> {
    if event.is_readable() {
        handle_readable(conn_id, poll, registry, read_chunk, responder, hooks)?;
    }

    // the readable path may have closed the connection
    if !registry.contains(conn_id) {
        return Ok(());
    }

    if event.is_writable() {
        handle_writable(conn_id, poll, registry)?;
    }

    Ok(())
}

/// Drain available bytes into the reassembly buffer and check completion.
///
/// Incomplete: stay read-registered and report the pending text through the
/// fragment hook. Complete: decode strictly, produce the reply, stage it
/// for write readiness.
fn handle_readable(
    conn_id: usize,
    poll: &Poll,
    registry: &mut ConnectionRegistry,
    read_chunk: &mut [u8],
    responder: &dyn Responder,
    hooks: &dyn Hooks,
) -> io::Result<()> {
    let conn = match registry.get_mut(conn_id) {
        Some(conn) => conn,
        None => return Ok(()),
    };

    // one request per connection: anything readable while flushing the
    // response is left to the close
    if !matches!(conn.state, IoState::Reading) {
        return Ok(());
    }
    conn.touch();

    let mut received = false;
    loop {
        match conn.stream.read(read_chunk) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed before message completed",
                ));
            }
            Ok(n) => {
                received = true;
                let phase = conn
                    .buffer
                    .push(&read_chunk[..n])
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                if phase == Phase::Complete {
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                if received {
                    hooks.on_fragment(conn.peer, &conn.buffer.pending_text());
                }
                return Ok(());
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    // terminator observed
    let message = conn
        .buffer
        .take_message()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    hooks.on_message(conn.peer, &message);

    let reply = responder.respond(&message);
    conn.start_writing(Bytes::from(codec::encode(&reply).into_bytes()));
    poll.registry()
        .reregister(&mut conn.stream, Token(conn_id), Interest::WRITABLE)?;
    Ok(())
}

/// Flush as much of the staged response as the transport accepts, resuming
/// on the next writable event if partial. Once fully flushed, actively
/// close the connection.
fn handle_writable(conn_id: usize, poll: &Poll, registry: &mut ConnectionRegistry) -> io::Result<()> {
    let conn = match registry.get_mut(conn_id) {
        Some(conn) => conn,
        None => return Ok(()),
    };

    let (response, mut written) = match &conn.state {
        IoState::Writing { response, written } => (response.clone(), *written),
        IoState::Reading => return Ok(()),
    };
    conn.touch();

    while written < response.len() {
        match conn.stream.write(&response[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned zero",
                ));
            }
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                conn.advance_write(written);
                return Ok(());
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    debug!(conn_id, "response flushed, closing connection");
    close_connection(poll, registry, conn_id);
    Ok(())
}

/// Close connections idle past the timeout.
fn reap_idle(poll: &Poll, registry: &mut ConnectionRegistry, timeout: Duration, hooks: &dyn Hooks) {
    let stale: Vec<(usize, SocketAddr)> = registry
        .iter()
        .filter(|(_, conn)| conn.idle_for() >= timeout)
        .map(|(id, conn)| (id, conn.peer))
        .collect();

    for (conn_id, peer) in stale {
        hooks.on_error(peer, &io::Error::new(io::ErrorKind::TimedOut, "idle timeout"));
        debug!(conn_id, %peer, "reaping idle connection");
        close_connection(poll, registry, conn_id);
    }
}

fn close_connection(poll: &Poll, registry: &mut ConnectionRegistry, conn_id: usize) {
    if let Some(mut conn) = registry.remove(conn_id) {
        let _ = poll.registry().deregister(&mut conn.stream);
        debug!(conn_id, "connection closed");
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR (prompt restart
/// after a crash) and SO_REUSEPORT (kernel load balancing across workers).
fn bind_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

fn available_parallelism() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
