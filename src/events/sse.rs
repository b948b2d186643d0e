//! Server-Sent Events transport for the [`EventHub`].
//!
//! `may_minihttp` buffers whole responses, so the event stream gets its own
//! listener. Each accepted connection runs in a coroutine: it reads the
//! request head, answers `GET /events` with `text/event-stream` headers and
//! then writes one frame per queued message until a write fails.

use super::{EventHub, EventTransport};
use crate::middleware::BasicAuthGate;
use may::coroutine::{self, JoinHandle};
use may::net::{TcpListener, TcpStream};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Path the event stream is served on.
pub const EVENTS_PATH: &str = "/events";

const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Listener configuration for the event stream.
#[derive(Debug, Clone)]
pub struct SseTransport {
    addr: String,
    heartbeat: Duration,
    gate: Option<BasicAuthGate>,
}

impl SseTransport {
    #[must_use]
    pub fn new(addr: impl Into<String>, heartbeat: Duration) -> Self {
        Self {
            addr: addr.into(),
            heartbeat,
            gate: None,
        }
    }

    /// Require basic credentials on the stream as well.
    #[must_use]
    pub fn with_gate(mut self, gate: Option<BasicAuthGate>) -> Self {
        self.gate = gate;
        self
    }
}

/// Running event listener.
pub struct SseHandle {
    addr: SocketAddr,
    hub: Arc<EventHub>,
    accept: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl SseHandle {
    /// Bound address (useful when the configured port was `0`).
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, stop the heartbeat and end all live streams.
    pub fn stop(self) {
        // SAFETY: cancelling our own coroutines during shutdown.
        unsafe {
            self.accept.coroutine().cancel();
            self.heartbeat.coroutine().cancel();
        }
        if self.accept.join().is_err() {
            debug!("Event accept loop ended by cancellation");
        }
        if self.heartbeat.join().is_err() {
            debug!("Heartbeat ended by cancellation");
        }
        self.hub.close_all();
        info!(addr = %self.addr, "Event listener stopped");
    }
}

impl EventTransport for SseTransport {
    type Handle = SseHandle;

    fn attach(self, hub: Arc<EventHub>) -> io::Result<SseHandle> {
        let listener = TcpListener::bind(self.addr.as_str())?;
        let addr = listener.local_addr()?;
        let gate = self.gate.map(Arc::new);
        let stack_size = may::config().get_stack_size();

        let accept_hub = Arc::clone(&hub);
        // SAFETY: the coroutine owns the listener, the hub handle and the gate.
        let accept = unsafe {
            coroutine::Builder::new()
                .name("sse-accept".to_string())
                .stack_size(stack_size)
                .spawn(move || accept_loop(&listener, &accept_hub, gate.as_ref()))?
        };

        let beat_hub = Arc::clone(&hub);
        let period = self.heartbeat.max(Duration::from_millis(10));
        // SAFETY: as above.
        let heartbeat = unsafe {
            coroutine::Builder::new()
                .name("sse-heartbeat".to_string())
                .stack_size(stack_size)
                .spawn(move || loop {
                    coroutine::sleep(period);
                    let alive = beat_hub.ping();
                    debug!(subscribers = alive, "Heartbeat");
                })?
        };

        info!(addr = %addr, path = EVENTS_PATH, "Event listener started");
        Ok(SseHandle {
            addr,
            hub,
            accept,
            heartbeat,
        })
    }
}

fn accept_loop(listener: &TcpListener, hub: &Arc<EventHub>, gate: Option<&Arc<BasicAuthGate>>) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Event listener accept failed");
                continue;
            }
        };
        let hub = Arc::clone(hub);
        let gate = gate.map(Arc::clone);
        // SAFETY: the connection coroutine owns its stream and handles.
        let spawned = unsafe {
            coroutine::Builder::new()
                .stack_size(may::config().get_stack_size())
                .spawn(move || {
                    if let Err(e) = serve_connection(stream, &hub, gate.as_deref()) {
                        debug!(error = %e, "Event stream closed");
                    }
                })
        };
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn event stream coroutine");
        }
    }
}

/// Method, path and `Authorization` value from a raw request head.
fn parse_head(head: &str) -> Option<(&str, &str, Option<&str>)> {
    let mut lines = head.split("\r\n");
    let mut parts = lines.next()?.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let path = target.split('?').next().unwrap_or(target);
    let authorization = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("authorization")
            .then_some(value.trim())
    });
    Some((method, path, authorization))
}

fn read_head(stream: &mut TcpStream) -> io::Result<String> {
    let mut head = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_HEAD_BYTES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request head too large"));
        }
        if stream.read(&mut byte)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn reject(stream: &mut TcpStream, status: &str, extra: &str) -> io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 {status}\r\n{extra}Content-Length: 0\r\nConnection: close\r\n\r\n"
    )?;
    stream.flush()
}

fn serve_connection(
    mut stream: TcpStream,
    hub: &Arc<EventHub>,
    gate: Option<&BasicAuthGate>,
) -> io::Result<()> {
    let head = read_head(&mut stream)?;
    let Some((method, path, authorization)) = parse_head(&head) else {
        return reject(&mut stream, "400 Bad Request", "");
    };

    if let Some(gate) = gate {
        if gate.check(authorization).is_err() {
            let challenge = format!("{}\r\n", BasicAuthGate::challenge());
            return reject(&mut stream, "401 Unauthorized", &challenge);
        }
    }
    if method != "GET" || path != EVENTS_PATH {
        return reject(&mut stream, "404 Not Found", "");
    }

    stream.write_all(
        b"HTTP/1.1 200 OK\r\n\
          Content-Type: text/event-stream\r\n\
          Cache-Control: no-cache\r\n\
          Connection: keep-alive\r\n\r\n",
    )?;
    stream.flush()?;

    let subscription = hub.subscribe();
    let id = subscription.id();
    while let Some(msg) = subscription.recv() {
        if let Err(e) = stream
            .write_all(msg.to_frame().as_bytes())
            .and_then(|()| stream.flush())
        {
            debug!(connection_id = %id, error = %e, "Event write failed");
            break;
        }
    }
    // dropping the subscription unsubscribes
    Ok(())
}
