//! Connection and edit-permission state.
//!
//! The whiteboard link and the audio link are tracked independently. The
//! whiteboard side also carries the server-granted `can_edit` flag, which
//! gates every outgoing drawing event.

use crate::observable::{Observable, Observer};

/// Connection state of the whiteboard socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Whiteboard connectivity plus edit permission.
///
/// `can_edit` is only ever set to `true` by [`apply_status`] while connected,
/// and every path into `Disconnected` forces it back to `false`.
///
/// [`apply_status`]: ConnectionStateMachine::apply_status
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: Observable<LinkState>,
    can_edit: Observable<bool>,
    status_message: Observable<Option<String>>,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: Observable::new(LinkState::Disconnected),
            can_edit: Observable::new(false),
            status_message: Observable::new(None),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state.get() == LinkState::Connected
    }

    pub fn can_edit(&self) -> bool {
        self.can_edit.get()
    }

    /// Whether a drawing event may be transmitted right now.
    pub fn can_send(&self) -> bool {
        self.is_connected() && self.can_edit()
    }

    /// Last user-visible status message.
    pub fn status_message(&self) -> Option<String> {
        self.status_message.get()
    }

    /// A connection attempt is in flight.
    pub fn begin_connect(&mut self) {
        if self.state.get() == LinkState::Disconnected {
            self.state.set(LinkState::Connecting);
        }
    }

    /// The socket is up. Permission always starts revoked.
    pub fn on_connected(&mut self) {
        self.state.set(LinkState::Connected);
        self.can_edit.set_if_changed(false);
    }

    /// The socket is down (error, drop, or explicit close).
    pub fn on_disconnected(&mut self) {
        self.state.set_if_changed(LinkState::Disconnected);
        self.can_edit.set_if_changed(false);
    }

    /// Apply a `connection_status` message from the server.
    pub fn apply_status(&mut self, can_edit: bool, message: &str) {
        if can_edit && !self.is_connected() {
            log::warn!("Ignoring edit grant while {:?}", self.state.get());
            self.can_edit.set_if_changed(false);
        } else {
            self.can_edit.set_if_changed(can_edit);
        }
        if !message.is_empty() {
            self.status_message.set(Some(message.to_string()));
        }
    }

    /// Replace the status banner text with a locally generated message.
    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message.set(Some(message.into()));
    }

    pub fn state_observer(&self) -> Observer<LinkState> {
        self.state.observer()
    }

    pub fn can_edit_observer(&self) -> Observer<bool> {
        self.can_edit.observer()
    }

    pub fn status_observer(&self) -> Observer<Option<String>> {
        self.status_message.observer()
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection state of the audio link.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AudioState {
    #[default]
    Disconnected,
    Connected,
    /// Capture and playback are both running.
    Communicating,
    /// Terminal for this attempt; leave it with an explicit retry.
    Error(String),
}

impl AudioState {
    /// Short label for a status indicator.
    pub fn label(&self) -> &'static str {
        match self {
            AudioState::Disconnected => "Disconnected",
            AudioState::Connected => "Connected",
            AudioState::Communicating => "Active",
            AudioState::Error(_) => "Error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, AudioState::Error(_))
    }

    /// `Communicating` may only be entered from `Connected`.
    pub fn can_start_communication(&self) -> bool {
        matches!(self, AudioState::Connected)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            AudioState::Error(message) => Some(message),
            _ => None,
        }
    }
}
