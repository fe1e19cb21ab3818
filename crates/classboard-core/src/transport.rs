//! WebSocket transport for the whiteboard channel.
//!
//! The socket lives on a background thread. Commands go in over one mpsc
//! channel and [`ChannelEvent`]s come out over another, so the owner never
//! blocks on the network. Dropped connections are retried a bounded number
//! of times with a fixed delay.

use crate::channel::{Channel, ChannelEvent};
use crate::config::ClientConfig;
use crate::error::SyncError;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tungstenite::{Message, WebSocket};
use url::Url;

/// Read timeout on the socket; bounds how long outgoing frames wait.
const READ_TIMEOUT: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// How the transport retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub delay: Duration,
    /// Timeout for the TCP connect and the handshake.
    pub connect_timeout: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.reconnect_attempts.max(1),
            delay: config.reconnect_delay(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Commands sent to the socket thread.
enum WsCommand {
    Send(String),
    Close,
}

/// How a connected session ended.
enum SessionEnd {
    /// Closed on request; do not reconnect.
    Closed,
    /// Lost; reconnect.
    Lost(String),
}

/// Blocking tungstenite client driven from a background thread.
pub struct WebSocketChannel {
    url: Url,
    policy: ReconnectPolicy,
    cmd_tx: Option<Sender<WsCommand>>,
    event_rx: Option<Receiver<ChannelEvent>>,
    thread: Option<JoinHandle<()>>,
}

impl WebSocketChannel {
    /// Create a disconnected channel for a `ws://` URL.
    pub fn new(url: &str, policy: ReconnectPolicy) -> Result<Self, SyncError> {
        let url = Url::parse(url).map_err(|e| SyncError::InvalidUrl(format!("{url}: {e}")))?;
        if url.scheme() != "ws" {
            return Err(SyncError::InvalidUrl(format!(
                "Unsupported WebSocket URL scheme: {}",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            policy,
            cmd_tx: None,
            event_rx: None,
            thread: None,
        })
    }

    /// Create a channel for the whiteboard server named in `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, SyncError> {
        let url = config
            .whiteboard_url()
            .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        Self::new(url.as_str(), ReconnectPolicy::from_config(config))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn is_running(&self) -> bool {
        self.cmd_tx.is_some()
    }
}

impl Channel for WebSocketChannel {
    fn connect(&mut self) -> Result<(), SyncError> {
        if self.is_running() {
            return Err(SyncError::AlreadyConnected);
        }

        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let (event_tx, event_rx) = channel::<ChannelEvent>();
        let url = self.url.clone();
        let policy = self.policy;

        let handle = thread::spawn(move || {
            log::info!("WebSocket thread: connecting to {url}");
            run(&url, policy, &cmd_rx, &event_tx);
            log::info!("WebSocket thread exiting");
        });

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self.thread = Some(handle);
        Ok(())
    }

    fn emit(&mut self, frame: String) -> Result<(), SyncError> {
        match self.cmd_tx {
            Some(ref tx) => tx
                .send(WsCommand::Send(frame))
                .map_err(|_| SyncError::ChannelClosed),
            None => Err(SyncError::NotConnected),
        }
    }

    fn poll_events(&mut self) -> Vec<ChannelEvent> {
        let Some(ref rx) = self.event_rx else {
            return Vec::new();
        };
        let mut events = Vec::new();
        let mut finished = false;
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    finished |= matches!(event, ChannelEvent::GaveUp { .. });
                    events.push(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    finished = true;
                    break;
                }
            }
        }
        if finished {
            // The thread has exited; allow a fresh connect().
            self.cmd_tx = None;
            self.event_rx = None;
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
        }
        events
    }

    fn close(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self.event_rx = None;
        // Not joined: the thread may be inside a connect timeout.
        self.thread = None;
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn run(
    url: &Url,
    policy: ReconnectPolicy,
    cmd_rx: &Receiver<WsCommand>,
    event_tx: &Sender<ChannelEvent>,
) {
    let mut failures = 0u32;
    loop {
        match open_socket(url, policy.connect_timeout) {
            Ok(mut socket) => {
                failures = 0;
                // Frames queued while the link was down belong to the old session.
                if discard_stale(cmd_rx) {
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    return;
                }
                if event_tx.send(ChannelEvent::Connected).is_err() {
                    return;
                }
                match pump(socket, cmd_rx, event_tx) {
                    SessionEnd::Closed => return,
                    SessionEnd::Lost(reason) => {
                        log::warn!("WebSocket connection lost: {reason}");
                        if event_tx.send(ChannelEvent::Disconnected { reason }).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(message) => {
                failures += 1;
                log::error!("WebSocket connection failed (attempt {failures}): {message}");
                let event = ChannelEvent::ConnectError {
                    message,
                    attempt: failures,
                };
                if event_tx.send(event).is_err() {
                    return;
                }
                if failures >= policy.max_attempts {
                    let _ = event_tx.send(ChannelEvent::GaveUp { attempts: failures });
                    return;
                }
            }
        }

        if close_requested_within(cmd_rx, policy.delay) {
            return;
        }
        log::info!("WebSocket reconnecting to {url}");
    }
}

/// Wait out the reconnect delay. Returns true if a close arrived meanwhile.
fn close_requested_within(cmd_rx: &Receiver<WsCommand>, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match cmd_rx.recv_timeout(remaining) {
            Ok(WsCommand::Close) | Err(RecvTimeoutError::Disconnected) => return true,
            Ok(WsCommand::Send(frame)) => {
                log::debug!("Dropping frame while reconnecting: {}", preview(&frame));
            }
            Err(RecvTimeoutError::Timeout) => return false,
        }
    }
}

/// Drop queued frames. Returns true if a close is among them.
fn discard_stale(cmd_rx: &Receiver<WsCommand>) -> bool {
    loop {
        match cmd_rx.try_recv() {
            Ok(WsCommand::Send(frame)) => {
                log::debug!("Dropping stale frame: {}", preview(&frame));
            }
            Ok(WsCommand::Close) | Err(TryRecvError::Disconnected) => return true,
            Err(TryRecvError::Empty) => return false,
        }
    }
}

/// First 100 characters of a frame, for logging.
fn preview(text: &str) -> &str {
    match text.char_indices().nth(100) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn open_socket(url: &Url, timeout: Duration) -> Result<WebSocket<TcpStream>, String> {
    let addrs = url
        .socket_addrs(|| None)
        .map_err(|e| format!("Cannot resolve {url}: {e}"))?;

    let mut last_error = format!("No address for {url}");
    for addr in addrs {
        let stream = match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => stream,
            Err(e) => {
                last_error = format!("{addr}: {e}");
                continue;
            }
        };
        // Bound the handshake, then switch to the short polling timeout.
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| e.to_string())?;
        stream
            .set_write_timeout(Some(WRITE_TIMEOUT))
            .map_err(|e| e.to_string())?;

        let (socket, response) =
            tungstenite::client(url.as_str(), stream)
                .map_err(|e| format!("Handshake failed: {e}"))?;
        log::info!("WebSocket connected, status: {}", response.status());
        socket
            .get_ref()
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| e.to_string())?;
        return Ok(socket);
    }
    Err(last_error)
}

fn pump(
    mut socket: WebSocket<TcpStream>,
    cmd_rx: &Receiver<WsCommand>,
    event_tx: &Sender<ChannelEvent>,
) -> SessionEnd {
    loop {
        // Flush every queued frame before blocking on a read.
        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(frame)) => {
                    log::trace!("WebSocket sending: {}", preview(&frame));
                    if let Err(e) = socket.send(Message::Text(frame)) {
                        return SessionEnd::Lost(format!("send failed: {e}"));
                    }
                }
                Ok(WsCommand::Close) | Err(TryRecvError::Disconnected) => {
                    log::info!("WebSocket close requested");
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    return SessionEnd::Closed;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        // Pings are answered by tungstenite on the next read/write.
        match socket.read() {
            Ok(Message::Text(text)) => {
                log::trace!("WebSocket received: {}", preview(&text));
                if event_tx.send(ChannelEvent::Message(text)).is_err() {
                    let _ = socket.close(None);
                    return SessionEnd::Closed;
                }
            }
            Ok(Message::Close(_)) => {
                return SessionEnd::Lost("server closed the connection".to_string());
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return SessionEnd::Lost(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn collect_until(
        channel: &mut WebSocketChannel,
        done: impl Fn(&[ChannelEvent]) -> bool,
    ) -> Vec<ChannelEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while Instant::now() < deadline && !done(&events) {
            events.extend(channel.poll_events());
            thread::sleep(Duration::from_millis(10));
        }
        events
    }

    #[test]
    fn test_rejects_non_ws_scheme() {
        assert!(matches!(
            WebSocketChannel::new("http://localhost:5000", ReconnectPolicy::default()),
            Err(SyncError::InvalidUrl(_))
        ));
        assert!(WebSocketChannel::new("ws://localhost:5000/", ReconnectPolicy::default()).is_ok());
    }

    #[test]
    fn test_emit_before_connect() {
        let mut channel =
            WebSocketChannel::new("ws://127.0.0.1:9/", ReconnectPolicy::default()).unwrap();
        assert!(matches!(channel.emit("x".into()), Err(SyncError::NotConnected)));
    }

    #[test]
    fn test_gives_up_after_bounded_attempts() {
        // Bind then drop to get a port with nothing listening.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let policy = ReconnectPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(200),
        };
        let mut channel =
            WebSocketChannel::new(&format!("ws://127.0.0.1:{port}/"), policy).unwrap();
        channel.connect().unwrap();
        let events = collect_until(&mut channel, |events| {
            events.iter().any(|e| matches!(e, ChannelEvent::GaveUp { .. }))
        });
        let errors = events
            .iter()
            .filter(|e| matches!(e, ChannelEvent::ConnectError { .. }))
            .count();
        assert_eq!(errors, 2);
        assert!(matches!(events.last(), Some(ChannelEvent::GaveUp { attempts: 2 })));
        // The thread is gone, so a new attempt may start.
        assert!(channel.connect().is_ok());
        channel.close();
    }

    #[test]
    fn test_exchanges_frames_with_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();
            ws.send(Message::Text(r#"{"event":"clear_annotations"}"#.to_string()))
                .unwrap();
            let mut received = Vec::new();
            while received.len() < 2 {
                match ws.read().unwrap() {
                    Message::Text(text) => received.push(text),
                    _ => {}
                }
            }
            received
        });

        let policy = ReconnectPolicy {
            max_attempts: 1,
            delay: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(2),
        };
        let mut channel =
            WebSocketChannel::new(&format!("ws://127.0.0.1:{port}/"), policy).unwrap();
        channel.connect().unwrap();
        let events = collect_until(&mut channel, |events| {
            events.iter().any(|e| matches!(e, ChannelEvent::Message(_)))
        });
        assert_eq!(events.first(), Some(&ChannelEvent::Connected));
        assert!(events.contains(&ChannelEvent::Message(
            r#"{"event":"clear_annotations"}"#.to_string()
        )));

        channel.emit("first".to_string()).unwrap();
        channel.emit("second".to_string()).unwrap();
        assert_eq!(server.join().unwrap(), vec!["first", "second"]);
        channel.close();
    }
}
