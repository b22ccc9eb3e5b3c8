//! TLS client profiles.
//!
//! Catalog of JA3-style handshake profiles per browser family. Fingerprints
//! carry the tag of a profile from their own family so the advertised TLS
//! stack agrees with the user agent.

use rand::Rng;
use rand::seq::SliceRandom;

use super::spoofing::BrowserType;

#[derive(Debug, Clone, PartialEq)]
pub struct BrowserProfile {
    pub browser: BrowserType,
    pub name: String,
    pub ja3: String,
    pub cipher_suites: Vec<String>,
    pub alpn_protocols: Vec<String>,
    pub tls_extensions: Vec<u16>,
}

impl BrowserProfile {
    /// Short identifier, e.g. `chrome-124-3f1a`.
    pub fn tag(&self) -> String {
        let digest = self
            .ja3
            .bytes()
            .fold(0u16, |acc, byte| acc.rotate_left(5) ^ u16::from(byte));
        format!("{}-{:04x}", self.name, digest)
    }
}

#[derive(Debug, Clone)]
pub struct TlsProfileCatalog {
    profiles: Vec<BrowserProfile>,
}

impl TlsProfileCatalog {
    pub fn new(profiles: Vec<BrowserProfile>) -> Self {
        Self { profiles }
    }

    pub fn add_profile(&mut self, profile: BrowserProfile) {
        self.profiles.push(profile);
    }

    pub fn profiles(&self) -> &[BrowserProfile] {
        &self.profiles
    }

    /// Random profile of the requested family; Chromium-based families fall
    /// back to Chrome profiles.
    pub fn pick<R: Rng + ?Sized>(&self, browser: BrowserType, rng: &mut R) -> Option<&BrowserProfile> {
        let family = |wanted: BrowserType| {
            self.profiles
                .iter()
                .filter(|profile| profile.browser == wanted)
                .collect::<Vec<_>>()
        };
        let mut candidates = family(browser);
        if candidates.is_empty() && browser == BrowserType::Edge {
            candidates = family(BrowserType::Chrome);
        }
        candidates.choose(rng).copied()
    }
}

impl Default for TlsProfileCatalog {
    fn default() -> Self {
        Self::new(build_default_profiles())
    }
}

fn build_default_profiles() -> Vec<BrowserProfile> {
    vec![
        BrowserProfile {
            browser: BrowserType::Chrome,
            name: "chrome-124".into(),
            ja3: "771,4865-4866-4867-49195-49199-49196-49200-52393-52392,0-23-65281-10-11-35-16-5-13-18-51-45-43-27-17513,29-23-24,0".into(),
            cipher_suites: vec![
                "TLS_AES_128_GCM_SHA256".into(),
                "TLS_AES_256_GCM_SHA384".into(),
                "TLS_CHACHA20_POLY1305_SHA256".into(),
            ],
            alpn_protocols: vec!["h2".into(), "http/1.1".into()],
            tls_extensions: vec![0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513],
        },
        BrowserProfile {
            browser: BrowserType::Firefox,
            name: "firefox-125".into(),
            ja3: "771,4865-4867-4866-49195-49199-52393-52392-49196-49200,0-23-65281-10-11-35-16-5-34-51-43-13-45-28-65037,29-23-24-25-256-257,0".into(),
            cipher_suites: vec![
                "TLS_AES_128_GCM_SHA256".into(),
                "TLS_CHACHA20_POLY1305_SHA256".into(),
                "TLS_AES_256_GCM_SHA384".into(),
            ],
            alpn_protocols: vec!["h2".into(), "http/1.1".into()],
            tls_extensions: vec![0, 23, 65281, 10, 11, 35, 16, 5, 34, 51, 43, 13, 45, 28, 65037],
        },
        BrowserProfile {
            browser: BrowserType::Safari,
            name: "safari-17".into(),
            ja3: "771,4865-4866-4867-49196-49195-52393-49200-49199-52392,0-23-65281-10-11-16-5-13-18-51-45-43-27,29-23-24-25,0".into(),
            cipher_suites: vec![
                "TLS_AES_128_GCM_SHA256".into(),
                "TLS_AES_256_GCM_SHA384".into(),
                "TLS_CHACHA20_POLY1305_SHA256".into(),
            ],
            alpn_protocols: vec!["h2".into(), "http/1.1".into()],
            tls_extensions: vec![0, 23, 65281, 10, 11, 16, 5, 13, 18, 51, 45, 43, 27],
        },
        BrowserProfile {
            browser: BrowserType::MobileChrome,
            name: "chrome-android-124".into(),
            ja3: "771,4865-4866-4867-49195-49199-49196-49200-52393-52392,0-23-65281-10-11-35-16-5-13-18-51-45-43-27,29-23-24,0".into(),
            cipher_suites: vec![
                "TLS_AES_128_GCM_SHA256".into(),
                "TLS_CHACHA20_POLY1305_SHA256".into(),
            ],
            alpn_protocols: vec!["h2".into(), "http/1.1".into()],
            tls_extensions: vec![0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27],
        },
        BrowserProfile {
            browser: BrowserType::MobileSafari,
            name: "safari-ios-17".into(),
            ja3: "771,4865-4866-4867-49196-49195-52393-49200-49199,0-23-65281-10-11-16-5-13-18-51-45-43,29-23-24,0".into(),
            cipher_suites: vec![
                "TLS_AES_128_GCM_SHA256".into(),
                "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256".into(),
            ],
            alpn_protocols: vec!["h2".into(), "http/1.1".into()],
            tls_extensions: vec![0, 23, 65281, 10, 11, 16, 5, 13, 18, 51, 45, 43],
        },
    ]
}
