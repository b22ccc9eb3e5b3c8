//! CAPTCHA solving.
//!
//! The engine only needs `solve(image) -> (text, confidence)`. The bundled
//! [`OcrCaptchaSolver`] normalizes the challenge image (contrast stretch,
//! median denoise, binarization) and asks one or more [`OcrEngine`]s for a
//! reading, combining their answers by weighted consensus. The OCR engines
//! themselves are external.

mod normalize;
mod ocr;

pub use normalize::{NormalizationProfile, normalize};
pub use ocr::{OcrCaptchaSolver, OcrEngine, Recognition};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Grayscale challenge bitmap, one byte per pixel in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl ChallengeImage {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self, CaptchaError> {
        if width == 0 || height == 0 {
            return Err(CaptchaError::InvalidImage("empty image".into()));
        }
        if pixels.len() != width * height {
            return Err(CaptchaError::InvalidImage(format!(
                "expected {} pixels for {}x{}, got {}",
                width * height,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * self.width + x]
    }
}

#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    pub timeout: Duration,
    /// Readings below this confidence are reported as recognition failures.
    pub min_confidence: f64,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            min_confidence: 0.0,
        }
    }
}

/// Candidate answer and the solver's own confidence in it.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptchaSolution {
    pub text: String,
    pub confidence: f64,
    pub metadata: HashMap<String, String>,
}

impl CaptchaSolution {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            metadata: HashMap::new(),
        }
    }

    pub fn insert_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub type CaptchaResult = Result<CaptchaSolution, CaptchaError>;

/// Solver contract. `pass` starts at zero and grows with every rejected
/// submission so implementations can normalize more aggressively.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn solve(&self, image: &ChallengeImage, pass: u32) -> CaptchaResult;
}

#[derive(Debug, Clone, Error)]
pub enum CaptchaError {
    #[error("captcha solver misconfigured: {0}")]
    Configuration(String),
    #[error("invalid challenge image: {0}")]
    InvalidImage(String),
    #[error("recognition failed: {0}")]
    Recognition(String),
    #[error("captcha solving timed out after {0:?}")]
    Timeout(Duration),
}
