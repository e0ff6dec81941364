use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat, RgbaImage};
use tracing::{debug, info};

use super::{Frame, FrameSource};
use crate::error::CaptureError;

/// Grabs the primary monitor and encodes it as a downsized JPEG.
///
/// Capture and encoding run on the blocking pool so the async runtime keeps
/// ticking while a frame is produced.
#[derive(Debug, Clone)]
pub struct ScreenCapture {
    max_edge: u32,
    jpeg_quality: u8,
}

impl ScreenCapture {
    pub fn new(max_edge: u32, jpeg_quality: u8) -> Self {
        info!(max_edge, jpeg_quality, "Screen capture configured");
        Self {
            max_edge: max_edge.max(1),
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    fn grab(max_edge: u32, jpeg_quality: u8) -> Result<Frame, CaptureError> {
        let monitors = xcap::Monitor::all().map_err(|e| CaptureError::Backend(e.to_string()))?;
        let monitor = monitors
            .iter()
            .find(|m| m.is_primary())
            .or_else(|| monitors.first())
            .ok_or(CaptureError::NoDisplay)?;

        let shot = monitor
            .capture_image()
            .map_err(|e| CaptureError::Backend(e.to_string()))?;

        // xcap and this crate may link different `image` versions; hand over raw pixels.
        let (width, height) = (shot.width(), shot.height());
        let rgba = RgbaImage::from_raw(width, height, shot.into_raw())
            .ok_or_else(|| CaptureError::Backend("pixel buffer size mismatch".to_string()))?;

        encode_frame(rgba, max_edge, jpeg_quality)
    }
}

#[async_trait]
impl FrameSource for ScreenCapture {
    async fn capture(&self) -> Result<Frame, CaptureError> {
        let (max_edge, quality) = (self.max_edge, self.jpeg_quality);
        tokio::task::spawn_blocking(move || Self::grab(max_edge, quality))
            .await
            .map_err(|e| CaptureError::Backend(format!("capture task failed: {}", e)))?
    }
}

/// Downsizes so the longest edge is at most `max_edge`, then encodes JPEG.
pub fn encode_frame(rgba: RgbaImage, max_edge: u32, jpeg_quality: u8) -> Result<Frame, CaptureError> {
    let mut image = DynamicImage::ImageRgba8(rgba);
    if image.width().max(image.height()) > max_edge {
        image = image.resize(max_edge, max_edge, FilterType::Triangle);
    }

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let (width, height) = (rgb.width(), rgb.height());

    let mut bytes = Vec::new();
    rgb.write_to(&mut bytes, ImageOutputFormat::Jpeg(jpeg_quality))
        .map_err(|e| CaptureError::Encode(e.to_string()))?;

    debug!(width, height, size = bytes.len(), "Frame encoded");
    Ok(Frame::new(bytes, "image/jpeg", width, height))
}
