//! Anti-bot page detection.
//!
//! Pattern-based identification of challenge walls, CAPTCHA interstitials,
//! rate-limit pages and access-denied responses. A positive detection turns
//! an attempt into `Blocked` regardless of what the parse rule would say.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Category of blocking page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    JsChallenge,
    Captcha,
    RateLimit,
    AccessDenied,
    BotManagement,
    Custom,
}

impl BlockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::JsChallenge => "js_challenge",
            BlockKind::Captcha => "captcha",
            BlockKind::RateLimit => "rate_limit",
            BlockKind::AccessDenied => "access_denied",
            BlockKind::BotManagement => "bot_management",
            BlockKind::Custom => "custom",
        }
    }
}

/// Detection output.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSignal {
    pub kind: BlockKind,
    pub signature: String,
    pub confidence: f32,
    pub matched_indicators: Vec<String>,
}

#[derive(Debug)]
struct BlockSignature {
    id: &'static str,
    kind: BlockKind,
    base_confidence: f32,
    patterns: Vec<Regex>,
}

impl BlockSignature {
    fn new(id: &'static str, kind: BlockKind, base_confidence: f32, raw: &[&str]) -> Self {
        Self {
            id,
            kind,
            base_confidence,
            patterns: raw.iter().map(|pattern| build_regex(pattern)).collect(),
        }
    }

    fn evaluate(&self, body: &str) -> Option<(f32, Vec<String>)> {
        let matched: Vec<String> = self
            .patterns
            .iter()
            .filter(|regex| regex.is_match(body))
            .map(|regex| regex.as_str().to_string())
            .collect();
        if matched.is_empty() {
            return None;
        }
        // A single strong indicator is enough; more indicators raise confidence.
        let ratio = matched.len() as f32 / self.patterns.len() as f32;
        let confidence = (self.base_confidence * (0.6 + 0.4 * ratio)).min(1.0);
        Some((confidence, matched))
    }
}

static KNOWN_SIGNATURES: Lazy<Vec<BlockSignature>> = Lazy::new(|| {
    vec![
        BlockSignature::new(
            "js_interstitial",
            BlockKind::JsChallenge,
            0.95,
            &[
                r"<title>\s*Just a moment\.\.\.\s*</title>",
                r"window\._cf_chl_opt\s*=",
                r"/cdn-cgi/challenge-platform/",
                r"Checking your browser before accessing",
                r"Enable JavaScript and cookies to continue",
            ],
        ),
        BlockSignature::new(
            "captcha_wall",
            BlockKind::Captcha,
            0.97,
            &[
                r#"class="(?:cf-turnstile|h-captcha|g-recaptcha)""#,
                r"challenges\.cloudflare\.com/turnstile",
                r"hcaptcha\.com/1/api\.js",
                r"www\.google\.com/recaptcha/api\.js",
                r"/captcha/(?:image|challenge)",
            ],
        ),
        BlockSignature::new(
            "rate_limited",
            BlockKind::RateLimit,
            0.99,
            &[
                r#"<span[^>]*class="cf-error-code">1015<"#,
                r"You are being rate limited",
                r"Too Many Requests",
                r"<title>\s*Rate Limited\s*</title>",
            ],
        ),
        BlockSignature::new(
            "access_denied",
            BlockKind::AccessDenied,
            0.9,
            &[
                r#"<span[^>]*class="cf-error-code">1020<"#,
                r"<title>\s*Access denied",
                r"The owner of this website has banned your access",
                r"Request blocked\.",
            ],
        ),
        BlockSignature::new(
            "unusual_traffic",
            BlockKind::BotManagement,
            0.92,
            &[
                r"unusual traffic from your computer network",
                r#"<span[^>]*class="cf-error-code">1010<"#,
                r"automated (?:queries|requests)",
                r"are you a robot",
                r"px-captcha",
            ],
        ),
    ]
});

/// Stateless detector over the built-in signature catalog plus any
/// platform-specific patterns.
pub struct BlockDetector;

impl BlockDetector {
    pub fn detect(status: u16, body: &str, extra: &[Regex]) -> Option<BlockSignal> {
        let mut best: Option<BlockSignal> = None;

        for signature in KNOWN_SIGNATURES.iter() {
            if let Some((confidence, matched)) = signature.evaluate(body)
                && best
                    .as_ref()
                    .is_none_or(|current| confidence > current.confidence)
            {
                best = Some(BlockSignal {
                    kind: signature.kind,
                    signature: signature.id.to_string(),
                    confidence,
                    matched_indicators: matched,
                });
            }
        }

        if best.is_none() {
            let matched: Vec<String> = extra
                .iter()
                .filter(|regex| regex.is_match(body))
                .map(|regex| regex.as_str().to_string())
                .collect();
            if !matched.is_empty() {
                best = Some(BlockSignal {
                    kind: BlockKind::Custom,
                    signature: "platform_pattern".into(),
                    confidence: 0.9,
                    matched_indicators: matched,
                });
            }
        }

        if best.is_none() && status == 429 {
            best = Some(BlockSignal {
                kind: BlockKind::RateLimit,
                signature: "http_429".into(),
                confidence: 0.9,
                matched_indicators: vec!["status 429".into()],
            });
        }

        best
    }
}

fn build_regex(pattern: &str) -> Regex {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid block signature regex `{}`: {}", pattern, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_js_interstitial() {
        let body = "<html><head><title>Just a moment...</title></head><script>window._cf_chl_opt = {}</script></html>";
        let signal = BlockDetector::detect(503, body, &[]).unwrap();
        assert_eq!(signal.kind, BlockKind::JsChallenge);
        assert_eq!(signal.matched_indicators.len(), 2);
    }

    #[test]
    fn status_429_counts_as_rate_limit() {
        let signal = BlockDetector::detect(429, "slow down", &[]).unwrap();
        assert_eq!(signal.kind, BlockKind::RateLimit);
    }

    #[test]
    fn platform_patterns_apply() {
        let extra = vec![build_regex("whoa there, pardner")];
        let signal = BlockDetector::detect(200, "<h1>Whoa there, pardner!</h1>", &extra).unwrap();
        assert_eq!(signal.kind, BlockKind::Custom);
    }

    #[test]
    fn ordinary_pages_pass() {
        assert!(BlockDetector::detect(404, "<h1>Not Found</h1>", &[]).is_none());
        assert!(BlockDetector::detect(200, "<h1>octocat</h1>", &[]).is_none());
    }
}
