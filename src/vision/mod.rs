pub mod capture;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::CaptureError;

pub use capture::ScreenCapture;

/// One encoded sensory frame. Opaque to the arbitration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    mime: &'static str,
    width: u32,
    height: u32,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, mime: &'static str, width: u32, height: u32) -> Self {
        Self { bytes, mime, width, height }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `data:` URL form accepted by OpenAI-compatible vision endpoints.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }
}

/// Sensor collaborator. Called once per annotator iteration.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self) -> Result<Frame, CaptureError>;
}
