//! Headless stand-ins for the platform pieces: file-backed audio, an
//! always-granted permission check and a blank page rasterizer.

use classboard_core::audio::{
    AUDIO_BUFFER_SIZE, BITS_PER_SAMPLE, CHANNELS, CaptureStream, PlaybackStream, SAMPLE_RATE,
};
use classboard_core::error::{AudioError, RenderError};
use classboard_core::{AudioDevice, PageRasterizer, PermissionGateway};
use image::{Rgba, RgbaImage};
use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// A4 in inches.
const PAGE_WIDTH_IN: f64 = 8.27;
const PAGE_HEIGHT_IN: f64 = 11.69;

/// PCM bytes per second of audio.
const BYTES_PER_SECOND: u64 = SAMPLE_RATE as u64 * CHANNELS as u64 * (BITS_PER_SAMPLE as u64 / 8);

/// Reads PCM from a source at real-time speed, then silence once it runs out.
struct PacedCapture<R> {
    source: Option<R>,
}

impl<R: Read> Read for PacedCapture<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(AUDIO_BUFFER_SIZE);
        let mut n = 0;
        if let Some(source) = self.source.as_mut() {
            n = source.read(&mut buf[..len])?;
            if n == 0 {
                log::info!("Capture file exhausted, sending silence");
                self.source = None;
            }
        }
        if n == 0 {
            buf[..len].fill(0);
            n = len;
        }
        thread::sleep(Duration::from_micros(n as u64 * 1_000_000 / BYTES_PER_SECOND));
        Ok(n)
    }
}

/// Audio "device" backed by raw PCM files.
#[derive(Debug, Clone, Default)]
pub struct FileAudioDevice {
    /// Streamed to the server; silence when unset.
    pub capture: Option<PathBuf>,
    /// Receives the server's audio; discarded when unset.
    pub playback: Option<PathBuf>,
}

impl AudioDevice for FileAudioDevice {
    fn open_capture(&self) -> Result<CaptureStream, AudioError> {
        let source = match &self.capture {
            Some(path) => Some(
                File::open(path)
                    .map_err(|e| AudioError::Device(format!("{}: {e}", path.display())))?,
            ),
            None => None,
        };
        Ok(Box::new(PacedCapture { source }))
    }

    fn open_playback(&self) -> Result<PlaybackStream, AudioError> {
        match &self.playback {
            Some(path) => {
                let file = File::create(path)
                    .map_err(|e| AudioError::Device(format!("{}: {e}", path.display())))?;
                Ok(Box::new(BufWriter::new(file)))
            }
            None => Ok(Box::new(io::sink())),
        }
    }
}

/// There is no runtime permission prompt on the desktop.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantedPermissions;

impl PermissionGateway for GrantedPermissions {
    fn has_audio_permission(&self) -> bool {
        true
    }
}

/// Renders every page of a PDF as a blank A4 sheet at the requested DPI.
///
/// Keeps page switching and placement working without a PDF engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankPageRasterizer;

impl PageRasterizer for BlankPageRasterizer {
    fn render_page(&self, document: &[u8], page: u32, dpi: u32) -> Result<RgbaImage, RenderError> {
        if !document.starts_with(b"%PDF") {
            return Err(RenderError::Rasterizer("not a PDF document".to_string()));
        }
        let width = (PAGE_WIDTH_IN * f64::from(dpi)).round() as u32;
        let height = (PAGE_HEIGHT_IN * f64::from(dpi)).round() as u32;
        if width == 0 || height == 0 {
            return Err(RenderError::Empty { width, height });
        }
        log::debug!("Rendering blank page {page} at {width}x{height}");
        Ok(RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])))
    }
}
