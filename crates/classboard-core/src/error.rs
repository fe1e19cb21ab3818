//! Error types shared across the client.

use std::io;
use thiserror::Error;

/// Errors from the whiteboard channel.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Not connected")]
    NotConnected,
    #[error("Channel closed")]
    ChannelClosed,
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single inbound message that could not be decoded.
///
/// These are logged and dropped by the dispatch loop.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Invalid envelope: {0}")]
    Envelope(serde_json::Error),
    #[error("Invalid payload for '{event}': {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid base64 in '{event}': {source}")]
    Base64 {
        event: String,
        #[source]
        source: base64::DecodeError,
    },
}

/// Errors producing a background image.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Page {page} out of range (document has {total} pages)")]
    PageOutOfRange { page: u32, total: u32 },
    #[error("Rasterizer failed: {0}")]
    Rasterizer(String),
    #[error("Rendered page has no area ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// Errors from the audio channel.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio permission not granted")]
    PermissionDenied,
    #[error("Not connected to server")]
    NotConnected,
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Audio device unavailable: {0}")]
    Device(String),
    #[error("Audio I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors loading client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
