//! Wire messages exchanged with the classroom server.
//!
//! Every frame is a JSON envelope naming the event and carrying its payload:
//!
//! ```json
//! { "event": "send_coordinates", "data": { "x": 0.25, "y": 0.5, "is_start": true, ... } }
//! { "event": "connection_status", "data": { "status": "ok", "can_edit": true, "message": "..." } }
//! ```

use crate::error::MessageError;
use crate::placement::NormalizedPoint;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canvas size the server assumes when a `new_image` omits it.
pub const DEFAULT_CANVAS_WIDTH: f64 = 800.0;
pub const DEFAULT_CANVAS_HEIGHT: f64 = 600.0;

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Size of the local drawing surface in device pixels.
    RegisterViewport { width: f64, height: f64 },
    /// One point of a stroke, in image-normalized coordinates.
    SendCoordinates(StrokeMessage),
    RequestEditPermission { question: String },
    ChangePage { page_number: u32 },
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::RegisterViewport { .. } => "register_viewport",
            ClientMessage::SendCoordinates(_) => "send_coordinates",
            ClientMessage::RequestEditPermission { .. } => "request_edit_permission",
            ClientMessage::ChangePage { .. } => "change_page",
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A single stroke point on the wire.
///
/// Used both for our outgoing points and for strokes the server relays from
/// other participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeMessage {
    pub x: f64,
    pub y: f64,
    /// First point of a new stroke.
    pub is_start: bool,
    pub line_width: f64,
    /// `#RRGGBB`.
    pub pen_color: String,
    pub page_number: u32,
}

impl StrokeMessage {
    pub fn point(&self) -> NormalizedPoint {
        NormalizedPoint::new(self.x, self.y)
    }
}

/// Payload of `connection_status`. All fields are optional on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionStatus {
    pub status: String,
    pub can_edit: bool,
    pub message: String,
}

/// Payload of `new_pdf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPdf {
    /// Base64 encoded PDF document.
    pub pdf_data: String,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub current_page: u32,
}

/// Payload of `new_image`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewImage {
    /// Base64 encoded PNG, JPEG or WebP.
    pub image_data: String,
    #[serde(default = "default_canvas_width")]
    pub canvas_width: f64,
    #[serde(default = "default_canvas_height")]
    pub canvas_height: f64,
}

fn default_canvas_width() -> f64 {
    DEFAULT_CANVAS_WIDTH
}

fn default_canvas_height() -> f64 {
    DEFAULT_CANVAS_HEIGHT
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ChangePagePayload {
    page_number: u32,
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ConnectionStatus(ConnectionStatus),
    NewPdf(NewPdf),
    NewImage(NewImage),
    ChangePage { page_number: u32 },
    ClearAnnotations,
    /// A stroke point drawn by another participant.
    CoordinateUpdate(StrokeMessage),
    /// An event this client does not handle.
    Unknown { event: String },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ServerMessage {
    /// Decode a JSON text frame.
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(MessageError::Envelope)?;
        let event = envelope.event;
        let data = envelope.data;

        let message = match event.as_str() {
            "connection_status" => ServerMessage::ConnectionStatus(payload(&event, data)?),
            "new_pdf" => ServerMessage::NewPdf(payload(&event, data)?),
            "new_image" => ServerMessage::NewImage(payload(&event, data)?),
            "change_page" => {
                let ChangePagePayload { page_number } = payload(&event, data)?;
                ServerMessage::ChangePage { page_number }
            }
            "clear_annotations" => ServerMessage::ClearAnnotations,
            "coordinate_update" => ServerMessage::CoordinateUpdate(payload(&event, data)?),
            _ => ServerMessage::Unknown { event },
        };
        Ok(message)
    }

    pub fn event_name(&self) -> &str {
        match self {
            ServerMessage::ConnectionStatus(_) => "connection_status",
            ServerMessage::NewPdf(_) => "new_pdf",
            ServerMessage::NewImage(_) => "new_image",
            ServerMessage::ChangePage { .. } => "change_page",
            ServerMessage::ClearAnnotations => "clear_annotations",
            ServerMessage::CoordinateUpdate(_) => "coordinate_update",
            ServerMessage::Unknown { event } => event,
        }
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, MessageError> {
    // A missing payload decodes like an empty object so all-default payloads work.
    let data = if data.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|source| MessageError::Payload {
        event: event.to_string(),
        source,
    })
}

/// Decode a base64 payload field.
///
/// Line breaks and other whitespace are ignored, since some senders wrap
/// their output.
pub fn decode_base64(event: &str, data: &str) -> Result<Vec<u8>, MessageError> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|source| MessageError::Base64 {
            event: event.to_string(),
            source,
        })
}

/// Encode bytes for a base64 payload field.
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}
