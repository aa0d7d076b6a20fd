//! mio event loop implementation.
//!
//! Readiness-based model: each worker owns a poller, a listener bound with
//! SO_REUSEPORT, a session allocator and a notification source. Accepted
//! sockets become sessions; everything after that is driven by the source.
//! Uses epoll on Linux, kqueue on macOS.

use super::source::MioSource;
use crate::config::Config;
use crate::runtime::connection::TcpTransport;
use crate::session::{AllocatorSettings, Session, SessionAllocator};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::thread;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Run the mio-based server.
pub fn run(config: Config) -> io::Result<()> {
    let num_workers = if config.workers == 0 {
        num_cpus()
    } else {
        config.workers
    };

    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    info!(
        workers = num_workers,
        addr = %addr,
        idle_timeout_ms = config.idle_timeout.as_millis() as u64,
        "Starting mio runtime"
    );

    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        let config = config.clone();

        let handle = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                if let Err(e) = worker_loop(worker_id, addr, &config) {
                    error!(worker = worker_id, error = %e, "Worker failed");
                }
            })?;

        handles.push(handle);
    }

    // Wait for all workers
    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

fn worker_loop(worker_id: usize, addr: SocketAddr, config: &Config) -> io::Result<()> {
    // Create listener with SO_REUSEPORT for kernel load balancing
    let listener = create_listener_with_reuseport(addr)?;
    serve(worker_id, listener, config)
}

/// Serve connections accepted on `listener` until the poller fails.
///
/// The listener must already be in non-blocking mode.
pub fn serve(worker_id: usize, listener: std::net::TcpListener, config: &Config) -> io::Result<()> {
    let mut source = MioSource::new(Poll::new()?, config.max_connections);
    let mut events = Events::with_capacity(config.batch_size);

    let mut listener = TcpListener::from_std(listener);
    source
        .registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let allocator = SessionAllocator::new(AllocatorSettings {
        max_sessions: config.max_connections,
        max_buffers: config.max_connections,
        buffer_capacity: config.buffer_capacity,
        idle_timeout: config.idle_timeout,
    });

    info!(worker = worker_id, "Worker started");

    loop {
        source.poll(&mut events)?;

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(&listener, &allocator, &mut source, worker_id);
                }
                _ => source.handle_event(event),
            }
        }

        source.run_pending();
        source.fire_timers();
    }
}

fn accept_connections(
    listener: &TcpListener,
    allocator: &Rc<SessionAllocator>,
    source: &mut MioSource,
    worker_id: usize,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let session = match Session::<TcpTransport>::create(allocator, stream) {
                    Ok(session) => session,
                    Err(e) => {
                        warn!(worker = worker_id, peer = %peer, error = %e, "Rejecting connection");
                        continue;
                    }
                };

                match session.open(source) {
                    Ok(()) => debug!(
                        worker = worker_id,
                        peer = %peer,
                        live = allocator.live_sessions(),
                        "Accepted connection"
                    ),
                    Err(e) => warn!(worker = worker_id, peer = %peer, error = %e, "Failed to open session"),
                }

                // The source holds its own references once open succeeded.
                session.release();
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(worker = worker_id, error = %e, "Accept error");
                break;
            }
        }
    }
}

/// Create a TCP listener with SO_REUSEPORT for kernel load balancing.
fn create_listener_with_reuseport(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
