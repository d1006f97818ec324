//! Contract between the coaching core and an inference runtime.
//!
//! The runtime is opaque: it loads weights, accepts an image prefill and
//! streams generated tokens back through a callback. It is not reentrant, so
//! the core only ever drives it from the inference worker.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::CoachError;

/// Status returned by [`InferenceRuntime::load`]. Zero is success.
pub type StatusCode = i32;

pub const STATUS_OK: StatusCode = 0;

/// Number of colour channels the vision model expects.
pub const VISION_IMAGE_CHANNELS: u8 = 3;

/// Category of model behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    Vision,
    AudioEncoder,
    AudioDecoder,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Vision, ModelKind::AudioEncoder, ModelKind::AudioDecoder];

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Vision => "vision",
            ModelKind::AudioEncoder => "audio-encoder",
            ModelKind::AudioDecoder => "audio-decoder",
        }
    }

    /// Vision handles must be primed with the system preamble before use.
    pub fn requires_warm_up(&self) -> bool {
        matches!(self, ModelKind::Vision)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Files a runtime needs to load a model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPaths {
    pub model: PathBuf,
    pub tokenizer: PathBuf,
}

impl ModelPaths {
    pub fn new(model: impl Into<PathBuf>, tokenizer: impl Into<PathBuf>) -> Self {
        Self { model: model.into(), tokenizer: tokenizer.into() }
    }

    /// Checks that every required path is present. Existence on disk is the
    /// deployment layer's concern.
    pub fn validate(&self, kind: ModelKind) -> Result<(), CoachError> {
        if self.model.as_os_str().is_empty() {
            return Err(CoachError::InvalidPath { model: kind, field: "model" });
        }
        if self.tokenizer.as_os_str().is_empty() {
            return Err(CoachError::InvalidPath { model: kind, field: "tokenizer" });
        }
        Ok(())
    }
}

/// Options handed to a [`RuntimeFactory`] when a handle is (re)loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub kind: ModelKind,
    pub temperature: f32,
}

/// A ready-to-use image buffer, already colour-converted and resized by the
/// capture layer. Cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pixels: Bytes,
    width: u32,
    height: u32,
    channels: u8,
}

impl ImageFrame {
    pub fn new(pixels: impl Into<Bytes>, width: u32, height: u32, channels: u8) -> Result<Self, CoachError> {
        let pixels = pixels.into();
        if width == 0 || height == 0 || channels == 0 {
            return Err(CoachError::InvalidFrame(format!(
                "degenerate dimensions {}x{}x{}",
                width, height, channels
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(CoachError::InvalidFrame(format!(
                "expected {} bytes for {}x{}x{}, got {}",
                expected,
                width,
                height,
                channels,
                pixels.len()
            )));
        }
        Ok(Self { pixels, width, height, channels })
    }

    /// Solid RGB frame, handy for synthetic capture sources.
    pub fn solid_rgb(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels: Vec<u8> = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self { pixels: Bytes::from(pixels), width, height, channels: VISION_IMAGE_CHANNELS }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }
}

/// Thread-safe way to interrupt a running generation.
pub trait RuntimeStop: Send + Sync {
    fn stop(&self);
}

/// Blocking inference runtime.
pub trait InferenceRuntime: Send {
    fn name(&self) -> &str;

    fn load(&mut self, paths: &ModelPaths) -> StatusCode;

    fn prefill_prompt(&mut self, prompt: &str) -> anyhow::Result<()>;

    fn prefill_image(&mut self, frame: &ImageFrame) -> anyhow::Result<()>;

    /// Streams generated tokens into `on_token` until the model emits its stop
    /// token, `max_tokens` is reached or [`RuntimeStop::stop`] is called.
    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: u32,
        echo: bool,
        on_token: &mut dyn FnMut(&str),
    ) -> anyhow::Result<()>;

    fn stop_handle(&self) -> Arc<dyn RuntimeStop>;
}

/// Builds runtimes for a handle. One runtime instance per successful load.
pub trait RuntimeFactory: Send + Sync {
    fn create(&self, config: &RuntimeConfig) -> anyhow::Result<Box<dyn InferenceRuntime>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths_validation() {
        assert!(ModelPaths::new("llava.pte", "tokenizer.bin").validate(ModelKind::Vision).is_ok());

        let missing_model = ModelPaths::new("", "tokenizer.bin");
        assert_eq!(
            missing_model.validate(ModelKind::Vision),
            Err(CoachError::InvalidPath { model: ModelKind::Vision, field: "model" })
        );

        let missing_tokenizer = ModelPaths::new("encoder.pte", "");
        assert_eq!(
            missing_tokenizer.validate(ModelKind::AudioEncoder),
            Err(CoachError::InvalidPath { model: ModelKind::AudioEncoder, field: "tokenizer" })
        );
    }

    #[test]
    fn test_frame_length_must_match_dimensions() {
        assert!(ImageFrame::new(vec![0u8; 12], 2, 2, 3).is_ok());
        assert!(matches!(ImageFrame::new(vec![0u8; 11], 2, 2, 3), Err(CoachError::InvalidFrame(_))));
        assert!(matches!(ImageFrame::new(Vec::<u8>::new(), 0, 2, 3), Err(CoachError::InvalidFrame(_))));
    }

    #[test]
    fn test_solid_frame_dimensions() {
        let frame = ImageFrame::solid_rgb(4, 3, [10, 20, 30]);
        assert_eq!(frame.pixels().len(), 36);
        assert_eq!(&frame.pixels()[..6], &[10, 20, 30, 10, 20, 30]);
        assert_eq!(frame.channels(), VISION_IMAGE_CHANNELS);
    }

    #[test]
    fn test_only_vision_needs_warm_up() {
        assert!(ModelKind::Vision.requires_warm_up());
        assert!(!ModelKind::AudioEncoder.requires_warm_up());
        assert!(!ModelKind::AudioDecoder.requires_warm_up());
        assert_eq!(ModelKind::AudioDecoder.to_string(), "audio-decoder");
    }
}
