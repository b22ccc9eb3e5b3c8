//! Client identity generation.
//!
//! Produces disposable, internally consistent fingerprints: the user agent,
//! platform, locale, `Accept-Language`, timezone, viewport and TLS profile
//! all come from the same browser template so they never contradict each
//! other.

use chrono::{DateTime, Utc};
use http::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderName, UPGRADE_INSECURE_REQUESTS, USER_AGENT};
use http::{HeaderMap, HeaderValue};
use rand::Rng;
use rand::seq::SliceRandom;

use super::tls::TlsProfileCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserType {
    Chrome,
    Firefox,
    Safari,
    Edge,
    MobileChrome,
    MobileSafari,
}

impl BrowserType {
    pub const ALL: [BrowserType; 6] = [
        BrowserType::Chrome,
        BrowserType::Firefox,
        BrowserType::Safari,
        BrowserType::Edge,
        BrowserType::MobileChrome,
        BrowserType::MobileSafari,
    ];

    fn sends_client_hints(self) -> bool {
        matches!(self, BrowserType::Chrome | BrowserType::Edge | BrowserType::MobileChrome)
    }
}

/// A synthetic identity owned by exactly one attempt.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub browser: BrowserType,
    pub user_agent: String,
    pub platform: String,
    pub locale: String,
    pub accept_language: String,
    pub timezone: String,
    pub viewport: (u16, u16),
    pub tls_profile: String,
    pub headers: HeaderMap,
    pub created_at: DateTime<Utc>,
}

impl Fingerprint {
    /// User agent and a generic `Accept`, nothing else.
    pub fn minimal_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers
    }
}

/// Source of fresh fingerprints; every call must return a new identity.
pub trait FingerprintProvider: Send + Sync {
    fn generate(&self) -> Fingerprint;
}

/// Template-driven generator over a set of browser families.
#[derive(Debug, Clone)]
pub struct FingerprintGenerator {
    browsers: Vec<BrowserType>,
    tls: TlsProfileCatalog,
}

impl FingerprintGenerator {
    pub fn new(browsers: Vec<BrowserType>) -> Self {
        let browsers = if browsers.is_empty() {
            vec![BrowserType::Chrome]
        } else {
            browsers
        };
        Self {
            browsers,
            tls: TlsProfileCatalog::default(),
        }
    }

    pub fn with_tls_catalog(mut self, tls: TlsProfileCatalog) -> Self {
        self.tls = tls;
        self
    }

    fn random_fingerprint(&self) -> Fingerprint {
        let mut rng = rand::thread_rng();
        let browser = self
            .browsers
            .choose(&mut rng)
            .copied()
            .unwrap_or(BrowserType::Chrome);
        let template = template_for_browser(browser);

        let (locale, accept_language) = template
            .locales
            .choose(&mut rng)
            .copied()
            .unwrap_or(("en-US", "en-US,en;q=0.9"));
        let viewport = template
            .viewports
            .choose(&mut rng)
            .copied()
            .unwrap_or((1920, 1080));
        let timezone = template
            .timezones
            .choose(&mut rng)
            .copied()
            .unwrap_or("UTC");
        let tls_profile = self
            .tls
            .pick(browser, &mut rng)
            .map(|profile| profile.tag())
            .unwrap_or_else(|| "default".into());

        let mut headers = HeaderMap::new();
        insert(&mut headers, USER_AGENT, template.user_agent);
        insert(&mut headers, ACCEPT, template.accept);
        insert(&mut headers, ACCEPT_LANGUAGE, accept_language);
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        if browser.sends_client_hints() {
            insert(&mut headers, HeaderName::from_static("sec-ch-ua"), template.client_hint);
            insert(
                &mut headers,
                HeaderName::from_static("sec-ch-ua-mobile"),
                if template.mobile { "?1" } else { "?0" },
            );
            insert(
                &mut headers,
                HeaderName::from_static("sec-ch-ua-platform"),
                &format!("\"{}\"", template.client_platform),
            );
        }
        if rng.gen_bool(0.3) {
            headers.insert(HeaderName::from_static("dnt"), HeaderValue::from_static("1"));
        }

        Fingerprint {
            browser,
            user_agent: template.user_agent.to_string(),
            platform: template.platform.to_string(),
            locale: locale.to_string(),
            accept_language: accept_language.to_string(),
            timezone: timezone.to_string(),
            viewport,
            tls_profile,
            headers,
            created_at: Utc::now(),
        }
    }
}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new(vec![BrowserType::Chrome, BrowserType::Firefox, BrowserType::Safari])
    }
}

impl FingerprintProvider for FingerprintGenerator {
    fn generate(&self) -> Fingerprint {
        self.random_fingerprint()
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

struct FingerprintTemplate {
    user_agent: &'static str,
    platform: &'static str,
    accept: &'static str,
    client_hint: &'static str,
    client_platform: &'static str,
    mobile: bool,
    locales: &'static [(&'static str, &'static str)],
    viewports: &'static [(u16, u16)],
    timezones: &'static [&'static str],
}

const HTML_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

fn template_for_browser(browser: BrowserType) -> FingerprintTemplate {
    match browser {
        BrowserType::Chrome => FingerprintTemplate {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
            platform: "Win32",
            accept: HTML_ACCEPT,
            client_hint: "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\", \"Not-A.Brand\";v=\"99\"",
            client_platform: "Windows",
            mobile: false,
            locales: &[("en-US", "en-US,en;q=0.9"), ("en-GB", "en-GB,en;q=0.9"), ("de-DE", "de-DE,de;q=0.9,en;q=0.7")],
            viewports: &[(1920, 1080), (2560, 1440), (1366, 768)],
            timezones: &["America/New_York", "Europe/Berlin", "Europe/London"],
        },
        BrowserType::Edge => FingerprintTemplate {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
            platform: "Win32",
            accept: HTML_ACCEPT,
            client_hint: "\"Chromium\";v=\"124\", \"Microsoft Edge\";v=\"124\", \"Not-A.Brand\";v=\"99\"",
            client_platform: "Windows",
            mobile: false,
            locales: &[("en-US", "en-US,en;q=0.9"), ("fr-FR", "fr-FR,fr;q=0.9,en;q=0.6")],
            viewports: &[(1920, 1080), (1536, 864)],
            timezones: &["America/Chicago", "Europe/Paris"],
        },
        BrowserType::Firefox => FingerprintTemplate {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
            platform: "Win64",
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            client_hint: "",
            client_platform: "Windows",
            mobile: false,
            locales: &[("en-US", "en-US,en;q=0.5"), ("fr-FR", "fr-FR,fr;q=0.8,en-US;q=0.5,en;q=0.3")],
            viewports: &[(1920, 1080), (1680, 1050)],
            timezones: &["America/Los_Angeles", "Europe/Paris"],
        },
        BrowserType::Safari => FingerprintTemplate {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
            platform: "MacIntel",
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            client_hint: "",
            client_platform: "macOS",
            mobile: false,
            locales: &[("en-US", "en-US,en;q=0.9"), ("en-AU", "en-AU,en;q=0.9")],
            viewports: &[(2560, 1600), (1440, 900)],
            timezones: &["America/Los_Angeles", "Australia/Sydney"],
        },
        BrowserType::MobileChrome => FingerprintTemplate {
            user_agent: "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
            platform: "Linux armv8l",
            accept: HTML_ACCEPT,
            client_hint: "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\", \"Not-A.Brand\";v=\"99\"",
            client_platform: "Android",
            mobile: true,
            locales: &[("en-US", "en-US,en;q=0.9"), ("es-ES", "es-ES,es;q=0.9,en;q=0.6")],
            viewports: &[(412, 915), (393, 873)],
            timezones: &["America/New_York", "Europe/Madrid"],
        },
        BrowserType::MobileSafari => FingerprintTemplate {
            user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
            platform: "iPhone",
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            client_hint: "",
            client_platform: "iOS",
            mobile: true,
            locales: &[("en-US", "en-US,en;q=0.9"), ("ja-JP", "ja-JP,ja;q=0.9")],
            viewports: &[(390, 844), (430, 932)],
            timezones: &["America/Chicago", "Asia/Tokyo"],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprints_are_consistent_with_their_template() {
        let generator = FingerprintGenerator::default();
        for _ in 0..20 {
            let fp = generator.generate();
            let header = fp.headers.get(ACCEPT_LANGUAGE).unwrap().to_str().unwrap();
            assert_eq!(header, fp.accept_language);
            assert!(fp.accept_language.starts_with(&fp.locale));
            assert_eq!(
                fp.headers.get(USER_AGENT).unwrap().to_str().unwrap(),
                fp.user_agent
            );
            assert_eq!(fp.headers.contains_key("sec-ch-ua"), fp.browser.sends_client_hints());
        }
    }

    #[test]
    fn tls_profile_matches_browser_family() {
        let generator = FingerprintGenerator::new(vec![BrowserType::Firefox]);
        let fp = generator.generate();
        assert_eq!(fp.browser, BrowserType::Firefox);
        assert!(fp.tls_profile.starts_with("firefox"));
    }

    #[test]
    fn minimal_headers_only_identify() {
        let fp = FingerprintGenerator::default().generate();
        let headers = fp.minimal_headers();
        assert_eq!(headers.len(), 2);
    }
}
