//! Background image and page state.
//!
//! The server pushes either a raster image or a PDF document. PDF pages are
//! rasterized off the owner thread by a [`RenderWorker`]; results are tagged
//! with a generation so a slow render can never overwrite a newer page.

use crate::error::RenderError;
use crate::observable::{Observable, Observer};
use image::RgbaImage;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};

/// Renders document pages to bitmaps.
///
/// Implementations wrap a platform PDF renderer. They are called from the
/// render worker thread, never from the owner thread.
pub trait PageRasterizer: Send + Sync {
    /// Render `page` (zero based) of `document` at the given resolution.
    fn render_page(&self, document: &[u8], page: u32, dpi: u32) -> Result<RgbaImage, RenderError>;
}

/// Where the current background came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundSource {
    /// A `new_image` push.
    Image,
    /// A rendered page of the current document.
    DocumentPage(u32),
}

/// The bitmap currently drawn behind the strokes.
#[derive(Debug, Clone)]
pub struct BackgroundImage {
    pub pixels: Arc<RgbaImage>,
    pub source: BackgroundSource,
}

impl BackgroundImage {
    pub fn new(pixels: RgbaImage, source: BackgroundSource) -> Self {
        Self {
            pixels: Arc::new(pixels),
            source,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Decode an encoded PNG, JPEG or WebP image.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, RenderError> {
    let image = image::load_from_memory(bytes)?.to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(RenderError::Empty {
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(image)
}

/// Document, page and image state pushed by the server.
///
/// Written only by the inbound dispatch path; read through observers.
#[derive(Debug)]
pub struct BackgroundState {
    document: Option<Arc<[u8]>>,
    current_page: Observable<u32>,
    total_pages: Observable<u32>,
    image: Observable<Option<BackgroundImage>>,
}

impl BackgroundState {
    pub fn new() -> Self {
        Self {
            document: None,
            current_page: Observable::new(0),
            total_pages: Observable::new(0),
            image: Observable::new(None),
        }
    }

    /// Replace the document wholesale.
    pub fn set_document(&mut self, document: Vec<u8>, total_pages: u32, current_page: u32) {
        self.document = Some(Arc::from(document));
        self.total_pages.set(total_pages);
        self.current_page.set(current_page);
    }

    /// Forget the document; the background is a plain image from now on.
    pub fn drop_document(&mut self) {
        self.document = None;
        self.total_pages.set_if_changed(0);
        self.current_page.set_if_changed(0);
    }

    pub fn document(&self) -> Option<Arc<[u8]>> {
        self.document.clone()
    }

    pub fn set_page(&mut self, page: u32) {
        self.current_page.set(page);
    }

    pub fn current_page(&self) -> u32 {
        self.current_page.get()
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages.get()
    }

    /// Whether `page` exists, if the page count is known.
    pub fn page_in_range(&self, page: u32) -> bool {
        let total = self.total_pages();
        total == 0 || page < total
    }

    /// Swap in a new background image atomically.
    pub fn replace_image(&mut self, image: BackgroundImage) {
        self.image.set(Some(image));
    }

    pub fn image(&self) -> Option<BackgroundImage> {
        self.image.get()
    }

    /// Pixel size of the current background, if any.
    pub fn image_size(&self) -> Option<(u32, u32)> {
        self.image.get().map(|img| (img.width(), img.height()))
    }

    pub fn page_observer(&self) -> Observer<u32> {
        self.current_page.observer()
    }

    pub fn total_pages_observer(&self) -> Observer<u32> {
        self.total_pages.observer()
    }

    pub fn image_observer(&self) -> Observer<Option<BackgroundImage>> {
        self.image.observer()
    }
}

impl Default for BackgroundState {
    fn default() -> Self {
        Self::new()
    }
}

struct RenderJob {
    generation: u64,
    document: Arc<[u8]>,
    page: u32,
    dpi: u32,
}

/// A finished render.
#[derive(Debug)]
pub struct RenderOutcome {
    pub page: u32,
    pub result: Result<RgbaImage, RenderError>,
}

/// Background thread that rasterizes pages.
pub struct RenderWorker {
    job_tx: Option<Sender<RenderJob>>,
    result_rx: Receiver<(u64, RenderOutcome)>,
    thread: Option<JoinHandle<()>>,
    generation: u64,
}

impl RenderWorker {
    /// Start the worker thread.
    pub fn spawn(rasterizer: Arc<dyn PageRasterizer>) -> Self {
        let (job_tx, job_rx) = channel::<RenderJob>();
        let (result_tx, result_rx) = channel();

        let handle = thread::spawn(move || {
            while let Ok(mut job) = job_rx.recv() {
                // Only the newest queued request matters.
                loop {
                    match job_rx.try_recv() {
                        Ok(newer) => job = newer,
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => return,
                    }
                }
                log::debug!("Rendering page {} at {} dpi", job.page, job.dpi);
                let result = rasterizer.render_page(&job.document, job.page, job.dpi);
                let outcome = RenderOutcome {
                    page: job.page,
                    result,
                };
                if result_tx.send((job.generation, outcome)).is_err() {
                    break;
                }
            }
            log::debug!("Render worker exiting");
        });

        Self {
            job_tx: Some(job_tx),
            result_rx,
            thread: Some(handle),
            generation: 0,
        }
    }

    /// Queue a page render. Supersedes every earlier request.
    pub fn request(&mut self, document: Arc<[u8]>, page: u32, dpi: u32) {
        self.generation += 1;
        let job = RenderJob {
            generation: self.generation,
            document,
            page,
            dpi,
        };
        let sent = self.job_tx.as_ref().is_some_and(|tx| tx.send(job).is_ok());
        if !sent {
            log::error!("Render worker is gone, page {page} will not be rendered");
        }
    }

    /// Discard every render still in flight.
    pub fn invalidate(&mut self) {
        self.generation += 1;
    }

    /// Drain finished renders, keeping only the current generation.
    pub fn poll(&mut self) -> Vec<RenderOutcome> {
        let mut outcomes = Vec::new();
        while let Ok((generation, outcome)) = self.result_rx.try_recv() {
            if generation == self.generation {
                outcomes.push(outcome);
            } else {
                log::debug!("Dropping stale render of page {}", outcome.page);
            }
        }
        outcomes
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.job_tx = None;
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
