//! TCP server exposing the [`Configurator`] to remote clients.
//!
//! The accept loop runs on its own thread and polls a non-blocking listener
//! so a stop request is noticed quickly. Each connection is served on a
//! separate thread and may send any number of requests, one per line.

use crate::configurator::Configurator;
use crate::rpc::{Fault, FaultKind, Request, Response};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{Span, debug, info, info_span, warn};

/// How long the accept loop sleeps when no client is waiting.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Idle time after which a client connection is closed.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest request line accepted, newline excluded.
const MAX_REQUEST_LEN: u64 = 64 * 1024;

/// A bound, not yet running, configuration server.
pub struct ConfigServer {
    listener: TcpListener,
    configurator: Arc<Configurator>,
    span: Span,
}

impl ConfigServer {
    /// Binds the server to `addr`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the address cannot be resolved or bound.
    pub fn bind(addr: impl ToSocketAddrs, configurator: Arc<Configurator>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            configurator,
            span: info_span!("config_server"),
        })
    }

    /// Replaces the span events are recorded in.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts accepting clients on a dedicated thread.
    pub fn start(self) -> io::Result<ServerHandle> {
        let local_addr = self.listener.local_addr()?;
        self.listener.set_nonblocking(true)?;

        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        let thread = thread::Builder::new()
            .name("config-server".to_string())
            .spawn(move || self.accept_loop(&flag))?;

        Ok(ServerHandle {
            local_addr,
            stopped,
            thread,
        })
    }

    fn accept_loop(self, stopped: &AtomicBool) {
        let _enter = self.span.enter();
        info!(addr = ?self.listener.local_addr().ok(), "configuration server listening");

        while !stopped.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "client connected");
                    let configurator = Arc::clone(&self.configurator);
                    let span = self.span.clone();
                    let spawned = thread::Builder::new()
                        .name("config-client".to_string())
                        .spawn(move || {
                            let _enter = span.enter();
                            if let Err(e) = serve_connection(stream, &configurator) {
                                debug!(peer = %peer, error = %e, "client connection closed");
                            }
                        });
                    if let Err(e) = spawned {
                        warn!(error = %e, "failed to start client thread");
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    warn!(error = %e, "accept error");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }

        info!("configuration server stopped");
    }
}

/// Handle to a running [`ConfigServer`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    stopped: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new clients. Connections already open are served
    /// until the client disconnects or goes idle.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Waits up to `timeout` for the accept loop to return. Returns `false`
    /// if it is still running.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.thread.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("configuration server thread panicked");
        }
    }
}

fn serve_connection(stream: TcpStream, configurator: &Configurator) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    let mut line = String::new();

    loop {
        line.clear();
        let read = (&mut reader).take(MAX_REQUEST_LEN + 1).read_line(&mut line)?;
        if read == 0 {
            break;
        }

        if !line.ends_with('\n') && read as u64 > MAX_REQUEST_LEN {
            warn!(limit = MAX_REQUEST_LEN, "request too large, closing connection");
            let fault = Fault::new(
                FaultKind::Internal,
                format!("request too large (limit is {} bytes)", MAX_REQUEST_LEN),
            );
            send(&mut writer, &fault.into())?;
            break;
        }

        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(line.trim_end()) {
            Ok(request) => handle_request(configurator, request),
            Err(e) => {
                warn!(error = %e, "malformed request");
                Fault::new(FaultKind::Internal, format!("malformed request: {}", e)).into()
            }
        };
        send(&mut writer, &response)?;
    }
    Ok(())
}

fn send(writer: &mut TcpStream, response: &Response) -> io::Result<()> {
    let mut body = serde_json::to_string(response)?;
    body.push('\n');
    writer.write_all(body.as_bytes())?;
    writer.flush()
}

/// Runs `request` against `configurator` and builds the answer.
pub fn handle_request(configurator: &Configurator, request: Request) -> Response {
    debug!(request = ?request, "handling request");
    let result = match request {
        Request::GetConfig { key } => configurator.get_config(&key).map(Some),
        Request::SetConfig { key, value } => configurator.set_config(&key, &value).map(|()| None),
    };

    match result {
        Ok(value) => Response::Ok { value },
        Err(e) => Fault::new(e.fault_kind(), e.to_string()).into(),
    }
}
