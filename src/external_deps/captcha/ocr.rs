use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::normalize::{NormalizationProfile, normalize};
use super::{CaptchaConfig, CaptchaError, CaptchaResult, CaptchaSolution, CaptchaSolver, ChallengeImage};

/// A single reading produced by an OCR engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f64,
}

/// Opaque text recognizer (tesseract bindings, a remote OCR service, ...).
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;
    async fn recognize(&self, image: &ChallengeImage) -> Result<Recognition, CaptchaError>;
}

/// CAPTCHA solver backed by weighted OCR consensus.
pub struct OcrCaptchaSolver {
    engines: Vec<(Arc<dyn OcrEngine>, f64)>,
    config: CaptchaConfig,
}

impl OcrCaptchaSolver {
    pub fn new() -> Self {
        Self {
            engines: Vec::new(),
            config: CaptchaConfig::default(),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn OcrEngine>, weight: f64) -> Self {
        self.engines.push((engine, weight.max(0.0)));
        self
    }

    pub fn with_config(mut self, config: CaptchaConfig) -> Self {
        self.config = config;
        self
    }
}

impl Default for OcrCaptchaSolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptchaSolver for OcrCaptchaSolver {
    fn name(&self) -> &'static str {
        "ocr-consensus"
    }

    async fn solve(&self, image: &ChallengeImage, pass: u32) -> CaptchaResult {
        if self.engines.is_empty() {
            return Err(CaptchaError::Configuration("no OCR engines registered".into()));
        }

        let prepared = normalize(image, &NormalizationProfile::for_pass(pass));
        let total_weight: f64 = self.engines.iter().map(|(_, weight)| weight).sum();
        let mut votes: HashMap<String, f64> = HashMap::new();

        for (engine, weight) in &self.engines {
            let reading =
                match tokio::time::timeout(self.config.timeout, engine.recognize(&prepared)).await {
                    Ok(Ok(reading)) => reading,
                    Ok(Err(err)) => {
                        log::debug!("ocr engine {} failed: {}", engine.name(), err);
                        continue;
                    }
                    Err(_) => {
                        log::debug!("ocr engine {} timed out", engine.name());
                        continue;
                    }
                };
            let text = clean_reading(&reading.text);
            if text.is_empty() {
                continue;
            }
            *votes.entry(text).or_default() += reading.confidence.clamp(0.0, 1.0) * weight;
        }

        let (text, score) = votes
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .ok_or_else(|| CaptchaError::Recognition("no engine produced a reading".into()))?;

        let confidence = if total_weight > 0.0 { score / total_weight } else { 0.0 };
        if confidence < self.config.min_confidence {
            return Err(CaptchaError::Recognition(format!(
                "best reading {text:?} below confidence floor ({confidence:.2})"
            )));
        }

        Ok(CaptchaSolution::new(text, confidence).insert_metadata("pass", pass.to_string()))
    }
}

fn clean_reading(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}
