//! Classboard Core Library
//!
//! Platform-agnostic client logic for the Classboard classroom whiteboard:
//! coordinate mapping between the drawing surface and the shared image,
//! connection and edit-permission state, stroke capture and server sync,
//! plus the two-way audio link.

pub mod audio;
pub mod background;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod observable;
pub mod placement;
pub mod protocol;
pub mod strokes;
pub mod sync;
pub mod transport;
pub mod whiteboard;

pub use audio::{AudioConnector, AudioDevice, AudioSession, PermissionGateway, TcpConnector};
pub use background::{BackgroundImage, BackgroundSource, BackgroundState, PageRasterizer};
pub use channel::{Channel, ChannelEvent, MemoryChannel, MemoryRemote};
pub use config::ClientConfig;
pub use connection::{AudioState, ConnectionStateMachine, LinkState};
pub use error::{AudioError, ConfigError, MessageError, RenderError, SyncError};
pub use observable::{Observable, Observer};
pub use placement::{
    ImagePlacement, NormalizedPoint, ViewportGeometry, compute_placement, to_device, to_normalized,
};
pub use protocol::{ClientMessage, ServerMessage, StrokeMessage};
pub use strokes::{DrawPath, LocalStrokeBuffer, PenColor};
pub use sync::{SyncClient, SyncEvent};
pub use transport::{ReconnectPolicy, WebSocketChannel};
pub use whiteboard::{PenSettings, Whiteboard};
