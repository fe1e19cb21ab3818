//! Whiteboard synchronization client.
//!
//! [`SyncClient`] owns the channel to the classroom server. Local intents
//! (viewport size, stroke points, permission and page requests) become
//! outbound messages; inbound messages update connection, permission, page
//! and background state. All inbound state is applied in [`SyncClient::poll`]
//! on the owner's thread, in arrival order.

use crate::background::{
    BackgroundImage, BackgroundSource, BackgroundState, PageRasterizer, RenderWorker, decode_image,
};
use crate::channel::{Channel, ChannelEvent};
use crate::config::DEFAULT_RENDER_DPI;
use crate::connection::ConnectionStateMachine;
use crate::error::SyncError;
use crate::placement::{
    ImagePlacement, NormalizedPoint, ViewportGeometry, compute_placement, to_device, to_normalized,
};
use crate::protocol::{
    ClientMessage, ConnectionStatus, NewImage, NewPdf, ServerMessage, StrokeMessage, decode_base64,
};
use crate::strokes::PenColor;
use kurbo::Point;
use std::sync::Arc;

/// What changed after a [`SyncClient::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connected (initially or after a reconnect).
    Connected,
    /// The connection dropped; the transport is retrying.
    Disconnected { reason: String },
    /// A connection attempt failed; the transport is retrying.
    ConnectFailed { message: String, attempt: u32 },
    /// Automatic reconnection stopped.
    GaveUp { attempts: u32 },
    /// Edit permission or status message changed.
    StatusChanged { can_edit: bool, message: String },
    /// A new document arrived.
    DocumentLoaded { total_pages: u32, current_page: u32 },
    /// The current page changed.
    PageChanged { page_number: u32 },
    /// The background image was replaced.
    BackgroundChanged { width: u32, height: u32, source: BackgroundSource },
    /// A page could not be rendered.
    RenderFailed { page: u32, message: String },
    /// The server cleared all annotations.
    AnnotationsCleared,
    /// A stroke point from another participant, mapped to device pixels.
    RemoteStroke {
        point: Point,
        normalized: NormalizedPoint,
        is_start: bool,
        line_width: f64,
        color: PenColor,
        page_number: u32,
    },
}

/// Client side of the whiteboard protocol.
pub struct SyncClient<C: Channel> {
    channel: C,
    link: ConnectionStateMachine,
    background: BackgroundState,
    viewport: Option<ViewportGeometry>,
    placement: Option<ImagePlacement>,
    renderer: RenderWorker,
    render_dpi: u32,
}

impl<C: Channel> SyncClient<C> {
    /// Create a client that owns `channel`. Call [`connect`](Self::connect)
    /// to start the connection.
    pub fn new(channel: C, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self {
            channel,
            link: ConnectionStateMachine::new(),
            background: BackgroundState::new(),
            viewport: None,
            placement: None,
            renderer: RenderWorker::spawn(rasterizer),
            render_dpi: DEFAULT_RENDER_DPI,
        }
    }

    #[must_use]
    pub fn with_render_dpi(mut self, dpi: u32) -> Self {
        self.render_dpi = dpi.max(1);
        self
    }

    /// Start connecting. The outcome arrives through [`poll`](Self::poll).
    pub fn connect(&mut self) -> Result<(), SyncError> {
        self.link.begin_connect();
        if let Err(e) = self.channel.connect() {
            log::error!("Failed to start connection: {e}");
            self.link.on_disconnected();
            return Err(e);
        }
        Ok(())
    }

    /// Tear the connection down. Edit permission is revoked immediately.
    pub fn close(&mut self) {
        log::info!("Closing whiteboard connection");
        self.channel.close();
        self.link.on_disconnected();
    }

    pub fn link(&self) -> &ConnectionStateMachine {
        &self.link
    }

    pub fn background(&self) -> &BackgroundState {
        &self.background
    }

    pub fn viewport(&self) -> Option<ViewportGeometry> {
        self.viewport
    }

    /// Current image placement, if both viewport and image are known.
    pub fn placement(&self) -> Option<ImagePlacement> {
        self.placement
    }

    pub fn can_send(&self) -> bool {
        self.link.can_send()
    }

    // --- Outbound ---

    /// Record the local surface size and tell the server about it.
    ///
    /// The size is kept even when offline and re-sent on every connect.
    /// Returns true if a message was sent.
    pub fn register_viewport(&mut self, width: f64, height: f64) -> bool {
        let viewport = ViewportGeometry::new(width, height);
        if !viewport.is_valid() {
            log::warn!("Ignoring invalid viewport size {width}x{height}");
            return false;
        }
        self.viewport = Some(viewport);
        self.recompute_placement();
        self.send_viewport()
    }

    fn send_viewport(&mut self) -> bool {
        let Some(viewport) = self.viewport else {
            return false;
        };
        self.emit(ClientMessage::RegisterViewport {
            width: viewport.view_width,
            height: viewport.view_height,
        })
    }

    /// Send one stroke point given in device pixels.
    ///
    /// Nothing is sent without edit permission, without a placement, or when
    /// the point lies outside the background image. Returns true if a
    /// message was sent.
    pub fn send_stroke(
        &mut self,
        device_point: Point,
        is_start: bool,
        stroke_width: f64,
        color: PenColor,
        page_number: u32,
    ) -> bool {
        if !self.link.can_send() {
            log::trace!("Not allowed to draw, stroke point not sent");
            return false;
        }
        let Some(placement) = self.placement else {
            log::debug!("No image placement yet, stroke point not sent");
            return false;
        };
        let Some(normalized) = to_normalized(device_point, &placement) else {
            return false;
        };
        self.emit(ClientMessage::SendCoordinates(StrokeMessage {
            x: normalized.x,
            y: normalized.y,
            is_start,
            line_width: stroke_width,
            pen_color: color.to_hex(),
            page_number,
        }))
    }

    /// Ask the instructor for the pen. Sent whenever connected, even if
    /// permission is already held; never grants anything locally.
    pub fn request_edit_permission(&mut self, question: &str) -> bool {
        self.emit(ClientMessage::RequestEditPermission {
            question: question.to_string(),
        })
    }

    /// Move to another page. The local page switches immediately.
    pub fn change_page(&mut self, page_number: u32) -> bool {
        if !self.link.is_connected() {
            log::debug!("Not connected, page change to {page_number} dropped");
            return false;
        }
        if !self.background.page_in_range(page_number) {
            log::warn!(
                "Page {page_number} out of range ({} pages)",
                self.background.total_pages()
            );
            return false;
        }
        if !self.emit(ClientMessage::ChangePage { page_number }) {
            return false;
        }
        self.background.set_page(page_number);
        self.render_current_page();
        true
    }

    fn emit(&mut self, message: ClientMessage) -> bool {
        let event = message.event_name();
        if !self.link.is_connected() {
            log::debug!("Not connected, dropping '{event}'");
            return false;
        }
        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Failed to encode '{event}': {e}");
                return false;
            }
        };
        match self.channel.emit(frame) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to send '{event}': {e}");
                false
            }
        }
    }

    // --- Inbound ---

    /// Apply everything that arrived since the last call.
    pub fn poll(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        for event in self.channel.poll_events() {
            self.handle_channel_event(event, &mut events);
        }
        for outcome in self.renderer.poll() {
            match outcome.result {
                Ok(pixels) => {
                    let image =
                        BackgroundImage::new(pixels, BackgroundSource::DocumentPage(outcome.page));
                    events.push(self.replace_background(image));
                }
                Err(e) => {
                    log::error!("Error rendering page {}: {e}", outcome.page);
                    events.push(SyncEvent::RenderFailed {
                        page: outcome.page,
                        message: e.to_string(),
                    });
                }
            }
        }
        events
    }

    fn handle_channel_event(&mut self, event: ChannelEvent, events: &mut Vec<SyncEvent>) {
        match event {
            ChannelEvent::Connected => {
                log::info!("Socket connected");
                self.link.on_connected();
                self.link.set_status_message("Connected");
                self.send_viewport();
                events.push(SyncEvent::Connected);
            }
            ChannelEvent::ConnectError { message, attempt } => {
                log::warn!("Socket connection error (attempt {attempt}): {message}");
                self.link.on_disconnected();
                self.link.begin_connect();
                self.link
                    .set_status_message(format!("Connection failed, retrying (attempt {attempt})"));
                events.push(SyncEvent::ConnectFailed { message, attempt });
            }
            ChannelEvent::Disconnected { reason } => {
                log::info!("Socket disconnected: {reason}");
                self.link.on_disconnected();
                self.link.begin_connect();
                self.link.set_status_message("Disconnected, reconnecting...");
                events.push(SyncEvent::Disconnected { reason });
            }
            ChannelEvent::GaveUp { attempts } => {
                log::error!("Giving up after {attempts} connection attempts");
                self.link.on_disconnected();
                self.link
                    .set_status_message(format!(
                        "Could not reach the server after {attempts} attempts"
                    ));
                events.push(SyncEvent::GaveUp { attempts });
            }
            ChannelEvent::Message(text) => match ServerMessage::parse(&text) {
                Ok(message) => {
                    if let Some(event) = self.handle_message(message) {
                        events.push(event);
                    }
                }
                Err(e) => log::warn!("Dropping malformed message: {e}"),
            },
        }
    }

    fn handle_message(&mut self, message: ServerMessage) -> Option<SyncEvent> {
        match message {
            ServerMessage::ConnectionStatus(status) => Some(self.apply_status(status)),
            ServerMessage::NewPdf(pdf) => self.load_document(pdf),
            ServerMessage::NewImage(image) => self.load_image(image),
            ServerMessage::ChangePage { page_number } => {
                if !self.background.page_in_range(page_number) {
                    log::warn!(
                        "Ignoring change to page {page_number} ({} pages)",
                        self.background.total_pages()
                    );
                    return None;
                }
                log::debug!("Page changed to: {page_number}");
                self.background.set_page(page_number);
                self.render_current_page();
                Some(SyncEvent::PageChanged { page_number })
            }
            ServerMessage::ClearAnnotations => {
                log::debug!("Received clear annotations command");
                Some(SyncEvent::AnnotationsCleared)
            }
            ServerMessage::CoordinateUpdate(stroke) => self.map_remote_stroke(stroke),
            ServerMessage::Unknown { event } => {
                log::debug!("Ignoring unhandled event '{event}'");
                None
            }
        }
    }

    fn apply_status(&mut self, status: ConnectionStatus) -> SyncEvent {
        log::debug!(
            "Connection status: {}, can edit: {}, message: {}",
            status.status,
            status.can_edit,
            status.message
        );
        self.link.apply_status(status.can_edit, &status.message);
        SyncEvent::StatusChanged {
            can_edit: self.link.can_edit(),
            message: status.message,
        }
    }

    fn load_document(&mut self, pdf: NewPdf) -> Option<SyncEvent> {
        let bytes = match decode_base64("new_pdf", &pdf.pdf_data) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Dropping malformed message: {e}");
                return None;
            }
        };
        let mut current_page = pdf.current_page;
        if pdf.total_pages > 0 && current_page >= pdf.total_pages {
            log::warn!(
                "Current page {current_page} out of range ({} pages), starting at page 0",
                pdf.total_pages
            );
            current_page = 0;
        }
        log::info!(
            "PDF received: {} pages, current page: {current_page}",
            pdf.total_pages
        );
        self.background
            .set_document(bytes, pdf.total_pages, current_page);
        self.render_current_page();
        Some(SyncEvent::DocumentLoaded {
            total_pages: pdf.total_pages,
            current_page,
        })
    }

    fn load_image(&mut self, image: NewImage) -> Option<SyncEvent> {
        let decoded = decode_base64("new_image", &image.image_data)
            .map_err(|e| e.to_string())
            .and_then(|bytes| decode_image(&bytes).map_err(|e| e.to_string()));
        let pixels = match decoded {
            Ok(pixels) => pixels,
            Err(e) => {
                log::warn!("Dropping malformed image: {e}");
                return None;
            }
        };
        log::info!(
            "Image received: {}x{} (server canvas {}x{})",
            pixels.width(),
            pixels.height(),
            image.canvas_width,
            image.canvas_height
        );
        // A plain image replaces the document; pending page renders are stale.
        self.renderer.invalidate();
        self.background.drop_document();
        Some(self.replace_background(BackgroundImage::new(pixels, BackgroundSource::Image)))
    }

    fn replace_background(&mut self, image: BackgroundImage) -> SyncEvent {
        let event = SyncEvent::BackgroundChanged {
            width: image.width(),
            height: image.height(),
            source: image.source,
        };
        self.background.replace_image(image);
        self.recompute_placement();
        event
    }

    fn render_current_page(&mut self) {
        if let Some(document) = self.background.document() {
            let page = self.background.current_page();
            self.renderer.request(document, page, self.render_dpi);
        }
    }

    fn map_remote_stroke(&mut self, stroke: StrokeMessage) -> Option<SyncEvent> {
        let normalized = stroke.point();
        if !normalized.in_bounds() {
            log::warn!("Dropping remote stroke outside the image: ({}, {})", stroke.x, stroke.y);
            return None;
        }
        let Some(color) = PenColor::from_hex(&stroke.pen_color) else {
            log::warn!("Dropping remote stroke with bad color '{}'", stroke.pen_color);
            return None;
        };
        let Some(placement) = self.placement else {
            log::debug!("No image placement yet, remote stroke skipped");
            return None;
        };
        Some(SyncEvent::RemoteStroke {
            point: to_device(normalized, &placement),
            normalized,
            is_start: stroke.is_start,
            line_width: stroke.line_width,
            color,
            page_number: stroke.page_number,
        })
    }

    /// Placement is derived state: recompute whenever viewport or image changes.
    fn recompute_placement(&mut self) {
        self.placement = match (self.viewport, self.background.image_size()) {
            (Some(viewport), Some((width, height))) => {
                compute_placement(viewport, f64::from(width), f64::from(height))
            }
            _ => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::tests::{SizedPageRasterizer, png_bytes};
    use crate::channel::{MemoryChannel, MemoryRemote};
    use crate::connection::LinkState;
    use crate::protocol::encode_base64;
    use serde_json::{Value, json};
    use std::thread;
    use std::time::{Duration, Instant};

    fn client() -> (SyncClient<MemoryChannel>, MemoryRemote) {
        let (channel, remote) = MemoryChannel::pair();
        let mut client = SyncClient::new(channel, Arc::new(SizedPageRasterizer));
        client.connect().unwrap();
        (client, remote)
    }

    fn connected_with_image() -> (SyncClient<MemoryChannel>, MemoryRemote) {
        let (mut client, remote) = client();
        client.register_viewport(800.0, 600.0);
        remote.push(ChannelEvent::Connected);
        remote.push_message(
            "new_image",
            json!({ "image_data": encode_base64(&png_bytes(1600, 600)) }),
        );
        remote.push_message(
            "connection_status",
            json!({ "can_edit": true, "message": "Go ahead" }),
        );
        client.poll();
        remote.take_sent();
        (client, remote)
    }

    fn sent_values(remote: &MemoryRemote) -> Vec<Value> {
        remote
            .take_sent()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    fn poll_until(
        client: &mut SyncClient<MemoryChannel>,
        done: impl Fn(&SyncEvent) -> bool,
    ) -> Vec<SyncEvent> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            events.extend(client.poll());
            if events.iter().any(&done) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        events
    }

    #[test]
    fn test_connect_registers_viewport() {
        let (mut client, remote) = client();
        assert_eq!(client.link().state(), LinkState::Connecting);
        assert!(!client.register_viewport(1080.0, 1920.0), "offline, nothing sent");

        remote.push(ChannelEvent::Connected);
        assert_eq!(client.poll(), vec![SyncEvent::Connected]);
        let sent = sent_values(&remote);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["event"], "register_viewport");
        assert_eq!(sent[0]["data"]["width"], 1080.0);
        assert_eq!(sent[0]["data"]["height"], 1920.0);
    }

    #[test]
    fn test_viewport_resent_on_every_change() {
        let (mut client, remote) = client();
        remote.push(ChannelEvent::Connected);
        client.poll();
        assert!(client.register_viewport(400.0, 300.0));
        assert!(client.register_viewport(300.0, 400.0));
        assert!(!client.register_viewport(0.0, 400.0));
        assert_eq!(
            remote.take_sent_events(),
            vec!["register_viewport", "register_viewport"]
        );
        assert_eq!(client.viewport(), Some(ViewportGeometry::new(300.0, 400.0)));
    }

    #[test]
    fn test_stroke_mapped_to_image() {
        let (mut client, remote) = connected_with_image();
        let placement = client.placement().unwrap();
        assert!((placement.scale_factor - 0.5).abs() < 1e-9);
        assert!((placement.offset_y - 150.0).abs() < 1e-9);

        assert!(client.send_stroke(
            Point::new(400.0, 300.0),
            true,
            5.0,
            PenColor::rgb(255, 0, 0),
            0,
        ));
        let sent = sent_values(&remote);
        assert_eq!(sent[0]["event"], "send_coordinates");
        assert_eq!(sent[0]["data"]["x"], 0.5);
        assert_eq!(sent[0]["data"]["y"], 0.5);
        assert_eq!(sent[0]["data"]["is_start"], true);
        assert_eq!(sent[0]["data"]["pen_color"], "#FF0000");
    }

    #[test]
    fn test_stroke_outside_image_dropped() {
        let (mut client, remote) = connected_with_image();
        assert!(!client.send_stroke(Point::new(400.0, 100.0), true, 5.0, PenColor::black(), 0));
        assert!(remote.take_sent().is_empty());
    }

    #[test]
    fn test_stroke_requires_permission() {
        let (mut client, remote) = connected_with_image();
        remote.push_message(
            "connection_status",
            json!({ "can_edit": false, "message": "Pen revoked" }),
        );
        let events = client.poll();
        assert_eq!(
            events,
            vec![SyncEvent::StatusChanged {
                can_edit: false,
                message: "Pen revoked".to_string()
            }]
        );
        assert!(!client.send_stroke(Point::new(400.0, 300.0), true, 5.0, PenColor::black(), 0));
        assert!(remote.take_sent().is_empty());
    }

    #[test]
    fn test_stroke_requires_placement() {
        let (mut client, remote) = client();
        remote.push(ChannelEvent::Connected);
        remote.push_message("connection_status", json!({ "can_edit": true }));
        client.poll();
        remote.take_sent();
        assert!(!client.send_stroke(Point::new(1.0, 1.0), true, 5.0, PenColor::black(), 0));
        assert!(remote.take_sent().is_empty());
    }

    #[test]
    fn test_stroke_points_keep_order() {
        let (mut client, remote) = connected_with_image();
        for i in 0..20 {
            let point = Point::new(100.0 + i as f64 * 10.0, 300.0);
            client.send_stroke(point, i == 0, 5.0, PenColor::black(), 0);
        }
        let xs: Vec<f64> = sent_values(&remote)
            .iter()
            .map(|v| v["data"]["x"].as_f64().unwrap())
            .collect();
        assert_eq!(xs.len(), 20);
        assert!(xs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_disconnect_revokes_until_fresh_grant() {
        let (mut client, remote) = client();
        remote.push(ChannelEvent::Connected);
        remote.push_message("connection_status", json!({ "can_edit": true }));
        remote.push_message("connection_status", json!({ "can_edit": false }));
        remote.push_message("connection_status", json!({ "can_edit": true }));
        remote.push(ChannelEvent::Disconnected { reason: "network".into() });
        client.poll();
        assert!(!client.link().can_edit());
        assert!(!client.link().is_connected());

        remote.push(ChannelEvent::Connected);
        client.poll();
        assert!(client.link().is_connected());
        assert!(!client.link().can_edit());

        remote.push_message("connection_status", json!({ "can_edit": true }));
        client.poll();
        assert!(client.can_send());
    }

    #[test]
    fn test_connect_error_revokes() {
        let (mut client, remote) = client();
        remote.push(ChannelEvent::Connected);
        remote.push_message("connection_status", json!({ "can_edit": true }));
        remote.push(ChannelEvent::ConnectError { message: "refused".into(), attempt: 1 });
        let events = client.poll();
        assert!(matches!(events.last(), Some(SyncEvent::ConnectFailed { attempt: 1, .. })));
        assert!(!client.link().can_edit());
        assert_eq!(client.link().state(), LinkState::Connecting);
    }

    #[test]
    fn test_request_permission_does_not_grant() {
        let (mut client, remote) = client();
        assert!(!client.request_edit_permission("offline"));
        remote.push(ChannelEvent::Connected);
        client.poll();
        remote.take_sent();

        assert!(client.request_edit_permission("May I answer question 3?"));
        assert!(!client.link().can_edit());
        let sent = sent_values(&remote);
        assert_eq!(sent[0]["event"], "request_edit_permission");
        assert_eq!(sent[0]["data"]["question"], "May I answer question 3?");

        remote.push_message("connection_status", json!({ "can_edit": true }));
        client.poll();
        assert!(client.request_edit_permission("again"), "allowed while holding the pen");
    }

    #[test]
    fn test_malformed_messages_do_not_stop_dispatch() {
        let (mut client, remote) = client();
        remote.push(ChannelEvent::Connected);
        remote.push(ChannelEvent::Message("{{{".to_string()));
        remote.push_message("new_pdf", json!({ "total_pages": 2 }));
        remote.push_message("new_pdf", json!({ "pdf_data": "%%%not base64%%%" }));
        remote.push_message("new_image", json!({ "image_data": encode_base64(b"not an image") }));
        remote.push_message("change_page", json!({}));
        remote.push_message("clear_annotations", json!({}));
        remote.push_message("coordinate_update", json!({ "x": 0.5 }));
        let events = client.poll();
        assert_eq!(events, vec![SyncEvent::Connected, SyncEvent::AnnotationsCleared]);
        assert!(client.link().is_connected());
        assert!(client.background().image().is_none());
    }

    #[test]
    fn test_new_image_replaces_background() {
        let (mut client, remote) = connected_with_image();
        let first = client.background().image().unwrap();
        assert_eq!(first.source, BackgroundSource::Image);

        remote.push_message(
            "new_image",
            json!({ "image_data": encode_base64(&png_bytes(600, 1200)) }),
        );
        let events = client.poll();
        assert_eq!(
            events,
            vec![SyncEvent::BackgroundChanged {
                width: 600,
                height: 1200,
                source: BackgroundSource::Image
            }]
        );
        let placement = client.placement().unwrap();
        assert!((placement.offset_x - 250.0).abs() < 1e-9);
        assert!(placement.offset_y.abs() < 1e-9);
    }

    #[test]
    fn test_resize_recomputes_placement() {
        let (mut client, _remote) = connected_with_image();
        client.register_viewport(1600.0, 1200.0);
        let placement = client.placement().unwrap();
        assert!((placement.scale_factor - 1.0).abs() < 1e-9);
        assert!((placement.offset_y - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_new_pdf_renders_current_page() {
        let (mut client, remote) = client();
        client.register_viewport(800.0, 600.0);
        remote.push(ChannelEvent::Connected);
        remote.push_message(
            "new_pdf",
            json!({ "pdf_data": encode_base64(&[0u8; 3]), "total_pages": 3, "current_page": 1 }),
        );
        let events = poll_until(&mut client, |e| matches!(e, SyncEvent::BackgroundChanged { .. }));
        assert!(events.contains(&SyncEvent::DocumentLoaded {
            total_pages: 3,
            current_page: 1
        }));
        assert!(events.contains(&SyncEvent::BackgroundChanged {
            width: 101,
            height: 200,
            source: BackgroundSource::DocumentPage(1)
        }));
        assert_eq!(client.background().current_page(), 1);
        assert!(client.placement().is_some());
    }

    #[test]
    fn test_server_page_change_rerenders() {
        let (mut client, remote) = client();
        remote.push(ChannelEvent::Connected);
        remote.push_message(
            "new_pdf",
            json!({ "pdf_data": encode_base64(&[0u8; 4]), "total_pages": 4 }),
        );
        poll_until(&mut client, |e| matches!(e, SyncEvent::BackgroundChanged { .. }));

        remote.push_message("change_page", json!({ "page_number": 3 }));
        let events = poll_until(&mut client, |e| matches!(e, SyncEvent::BackgroundChanged { .. }));
        assert_eq!(events[0], SyncEvent::PageChanged { page_number: 3 });
        assert_eq!(client.background().image().unwrap().width(), 103);
    }

    #[test]
    fn test_local_page_change_is_optimistic() {
        let (mut client, remote) = client();
        assert!(!client.change_page(1), "offline");
        remote.push(ChannelEvent::Connected);
        remote.push_message(
            "new_pdf",
            json!({ "pdf_data": encode_base64(&[0u8; 3]), "total_pages": 3 }),
        );
        client.poll();
        remote.take_sent();

        assert!(client.change_page(2));
        assert_eq!(client.background().current_page(), 2);
        let sent = sent_values(&remote);
        assert_eq!(sent[0]["event"], "change_page");
        assert_eq!(sent[0]["data"]["page_number"], 2);

        assert!(!client.change_page(3), "past the last page");
        assert_eq!(client.background().current_page(), 2);
    }

    #[test]
    fn test_remote_stroke_mapped_to_device() {
        let (mut client, remote) = connected_with_image();
        remote.push_message(
            "coordinate_update",
            json!({ "x": 0.25, "y": 1.0, "is_start": true, "line_width": 3.0, "pen_color": "#00FF00", "page_number": 0 }),
        );
        let events = client.poll();
        match &events[0] {
            SyncEvent::RemoteStroke { point, color, is_start, .. } => {
                assert!((point.x - 200.0).abs() < 1e-9);
                assert!((point.y - 450.0).abs() < 1e-9);
                assert_eq!(*color, PenColor::rgb(0, 255, 0));
                assert!(*is_start);
            }
            other => panic!("Unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_close_revokes_and_stops_sending() {
        let (mut client, remote) = connected_with_image();
        assert!(client.can_send());
        client.close();
        assert!(!client.link().can_edit());
        assert_eq!(client.link().state(), LinkState::Disconnected);
        assert!(remote.is_closed());
        assert!(!client.send_stroke(Point::new(400.0, 300.0), true, 5.0, PenColor::black(), 0));
    }

    #[test]
    fn test_gave_up_reports_status() {
        let (mut client, remote) = client();
        remote.push(ChannelEvent::GaveUp { attempts: 50 });
        client.poll();
        assert_eq!(client.link().state(), LinkState::Disconnected);
        assert!(client.link().status_message().unwrap().contains("50"));
    }

    #[test]
    fn test_server_page_out_of_range_ignored() {
        let (mut client, remote) = client();
        remote.push(ChannelEvent::Connected);
        remote.push_message(
            "new_pdf",
            json!({ "pdf_data": encode_base64(&[0u8; 3]), "total_pages": 3, "current_page": 7 }),
        );
        let events = client.poll();
        assert!(events.contains(&SyncEvent::DocumentLoaded {
            total_pages: 3,
            current_page: 0
        }));

        remote.push_message("change_page", json!({ "page_number": u32::MAX }));
        remote.push_message("change_page", json!({ "page_number": 2 }));
        let events = client.poll();
        let pages: Vec<&SyncEvent> = events
            .iter()
            .filter(|e| matches!(e, SyncEvent::PageChanged { .. }))
            .collect();
        assert_eq!(pages, vec![&SyncEvent::PageChanged { page_number: 2 }]);
        assert_eq!(client.background().current_page(), 2);
    }
}
