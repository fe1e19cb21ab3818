//! Abstract bidirectional event channel to the whiteboard server.

use crate::error::SyncError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Lifecycle and message events produced by a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The socket is up (initially or after a reconnect).
    Connected,
    /// A connection attempt failed. The transport may retry.
    ConnectError { message: String, attempt: u32 },
    /// An established connection dropped.
    Disconnected { reason: String },
    /// Automatic reconnection stopped after this many attempts.
    GaveUp { attempts: u32 },
    /// A text frame from the server.
    Message(String),
}

/// A transport for JSON text frames.
///
/// Events are queued by the transport and drained by the owner with
/// [`poll_events`](Channel::poll_events), which is the only place inbound
/// state gets applied.
pub trait Channel {
    /// Start connecting. Completion is reported as a [`ChannelEvent`].
    fn connect(&mut self) -> Result<(), SyncError>;

    /// Queue a text frame for sending. Frames go out in call order.
    fn emit(&mut self, frame: String) -> Result<(), SyncError>;

    /// Drain pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<ChannelEvent>;

    /// Tear the connection down. No further events are produced.
    fn close(&mut self);
}

#[derive(Debug, Default)]
struct MemoryInner {
    connect_requested: bool,
    closed: bool,
    sent: Vec<String>,
    inbound: VecDeque<ChannelEvent>,
}

/// In-memory channel for testing and offline use.
///
/// The paired [`MemoryRemote`] plays the server: it injects events and
/// inspects what the client sent.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    inner: Arc<Mutex<MemoryInner>>,
}

/// The server side of a [`MemoryChannel`].
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryChannel {
    /// Create a channel and its remote end.
    pub fn pair() -> (Self, MemoryRemote) {
        let channel = Self::default();
        let remote = MemoryRemote {
            inner: Arc::clone(&channel.inner),
        };
        (channel, remote)
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryInner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl Channel for MemoryChannel {
    fn connect(&mut self) -> Result<(), SyncError> {
        self.with(|inner| {
            inner.connect_requested = true;
            inner.closed = false;
        });
        Ok(())
    }

    fn emit(&mut self, frame: String) -> Result<(), SyncError> {
        self.with(|inner| {
            if inner.closed {
                return Err(SyncError::ChannelClosed);
            }
            inner.sent.push(frame);
            Ok(())
        })
    }

    fn poll_events(&mut self) -> Vec<ChannelEvent> {
        self.with(|inner| inner.inbound.drain(..).collect())
    }

    fn close(&mut self) {
        self.with(|inner| {
            inner.closed = true;
            inner.inbound.clear();
        });
    }
}

impl MemoryRemote {
    fn with<R>(&self, f: impl FnOnce(&mut MemoryInner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Queue an event for the client.
    pub fn push(&self, event: ChannelEvent) {
        self.with(|inner| {
            if !inner.closed {
                inner.inbound.push_back(event);
            }
        });
    }

    /// Queue a server message given as event name and JSON payload.
    pub fn push_message(&self, event: &str, data: serde_json::Value) {
        let frame = serde_json::json!({ "event": event, "data": data }).to_string();
        self.push(ChannelEvent::Message(frame));
    }

    /// Take everything the client has sent so far.
    pub fn take_sent(&self) -> Vec<String> {
        self.with(|inner| std::mem::take(&mut inner.sent))
    }

    /// Event names of everything sent so far, draining the log.
    pub fn take_sent_events(&self) -> Vec<String> {
        self.take_sent()
            .iter()
            .filter_map(|frame| serde_json::from_str::<serde_json::Value>(frame).ok())
            .filter_map(|value| value["event"].as_str().map(str::to_string))
            .collect()
    }

    pub fn connect_requested(&self) -> bool {
        self.with(|inner| inner.connect_requested)
    }

    pub fn is_closed(&self) -> bool {
        self.with(|inner| inner.closed)
    }
}
