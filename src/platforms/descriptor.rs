use std::collections::BTreeMap;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use url::Url;

use super::RegistryError;
use super::parse::ParseRule;
use crate::strategies::StrategyKind;
use crate::username::Username;

const USERNAME_PLACEHOLDER: &str = "{username}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Messaging,
    Social,
    Gaming,
    Productivity,
    AiCreative,
    Tech,
    Regional,
    #[default]
    Other,
}

/// How hard the platform is to probe without being blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
    Extreme,
}

impl Difficulty {
    pub fn is_high(self) -> bool {
        self >= Difficulty::Hard
    }
}

/// Minimum spacing between two attempts against the same platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub min_interval_ms: u64,
}

impl RateLimitPolicy {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            min_interval_ms: 2_000,
        }
    }
}

/// First-party API endpoint used by the API-backed strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub url_template: String,
    /// Key looked up in the engine's credential store.
    pub credential: String,
    #[serde(default = "default_auth_header")]
    pub header: String,
    #[serde(default = "default_auth_scheme")]
    pub scheme: String,
    #[serde(default = "default_api_parse")]
    pub parse: ParseRule,
}

fn default_auth_header() -> String {
    "authorization".into()
}

fn default_auth_scheme() -> String {
    "Bearer".into()
}

fn default_api_parse() -> ParseRule {
    ParseRule::json_field("/id")
}

impl ApiEndpoint {
    pub fn url_for(&self, username: &Username) -> Result<Url, url::ParseError> {
        Url::parse(&self.url_template.replace(USERNAME_PLACEHOLDER, username.as_str()))
    }
}

/// Catalog entry exactly as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub probe: String,
    pub strategies: Vec<StrategyKind>,
    pub parse: ParseRule,
    #[serde(default)]
    pub rate_limit: RateLimitPolicy,
    #[serde(default = "default_trust_weight")]
    pub trust_weight: f64,
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default)]
    pub confidence_ceilings: BTreeMap<String, f64>,
    #[serde(default)]
    pub api: Option<ApiEndpoint>,
    /// Metadata name to a regex with one capture group.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub block_patterns: Vec<String>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

fn default_trust_weight() -> f64 {
    1.0
}

impl PlatformSpec {
    pub fn new(
        id: impl Into<String>,
        probe: impl Into<String>,
        strategies: Vec<StrategyKind>,
        parse: ParseRule,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            category: Category::Other,
            difficulty: Difficulty::default(),
            probe: probe.into(),
            strategies,
            parse,
            rate_limit: RateLimitPolicy::default(),
            trust_weight: default_trust_weight(),
            min_confidence: None,
            confidence_ceilings: BTreeMap::new(),
            api: None,
            metadata: BTreeMap::new(),
            block_patterns: Vec::new(),
            max_length: None,
        }
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.rate_limit.min_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_ceiling(mut self, kind: StrategyKind, ceiling: f64) -> Self {
        self.confidence_ceilings.insert(kind.as_str().into(), ceiling);
        self
    }

    pub fn with_api(mut self, api: ApiEndpoint) -> Self {
        self.api = Some(api);
        self
    }
}

/// Validated, immutable platform description shared by all tasks.
#[derive(Debug, Clone)]
pub struct PlatformDescriptor {
    pub id: String,
    pub display_name: String,
    pub category: Category,
    pub difficulty: Difficulty,
    pub probe_template: String,
    pub strategies: Vec<StrategyKind>,
    pub parse: ParseRule,
    pub rate_limit: RateLimitPolicy,
    pub trust_weight: f64,
    pub min_confidence: Option<f64>,
    pub ceilings: BTreeMap<StrategyKind, f64>,
    pub api: Option<ApiEndpoint>,
    pub metadata: Vec<(String, Regex)>,
    pub block_patterns: Vec<Regex>,
    pub max_length: Option<usize>,
}

impl PlatformDescriptor {
    pub fn probe_url(&self, username: &Username) -> Result<Url, url::ParseError> {
        Url::parse(&self.probe_template.replace(USERNAME_PLACEHOLDER, username.as_str()))
    }

    /// Confidence ceiling for a strategy on this platform.
    pub fn ceiling(&self, kind: StrategyKind) -> f64 {
        self.ceilings
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_ceiling())
    }

    pub fn accepts_length(&self, username: &Username) -> bool {
        self.max_length.is_none_or(|max| username.len() <= max)
    }

    /// Opportunistically pulls secondary data (follower counts, display
    /// names) out of a profile page.
    pub fn capture_metadata(&self, body: &str) -> BTreeMap<String, String> {
        self.metadata
            .iter()
            .filter_map(|(name, regex)| {
                let value = regex.captures(body)?.get(1)?.as_str().trim();
                if value.is_empty() {
                    return None;
                }
                Some((name.clone(), html_escape::decode_html_entities(value).into_owned()))
            })
            .collect()
    }
}

impl TryFrom<PlatformSpec> for PlatformDescriptor {
    type Error = RegistryError;

    fn try_from(spec: PlatformSpec) -> Result<Self, Self::Error> {
        let invalid = |reason: String| RegistryError::Invalid {
            platform: spec.id.clone(),
            reason,
        };

        if spec.id.trim().is_empty() {
            return Err(invalid("empty platform id".into()));
        }
        if !spec.probe.contains(USERNAME_PLACEHOLDER) {
            return Err(invalid(format!("probe `{}` lacks {{username}}", spec.probe)));
        }
        Url::parse(&spec.probe.replace(USERNAME_PLACEHOLDER, "probe"))
            .map_err(|err| invalid(format!("probe `{}` is not a url: {err}", spec.probe)))?;
        if spec.strategies.is_empty() {
            return Err(invalid("strategy chain is empty".into()));
        }
        if !(0.0..=1.0).contains(&spec.trust_weight) {
            return Err(invalid(format!("trust weight {} outside [0, 1]", spec.trust_weight)));
        }
        if let Some(min) = spec.min_confidence
            && !(0.0..=1.0).contains(&min)
        {
            return Err(invalid(format!("min confidence {min} outside [0, 1]")));
        }
        spec.parse.validate().map_err(&invalid)?;

        let mut ceilings = BTreeMap::new();
        for (raw, ceiling) in &spec.confidence_ceilings {
            let kind: StrategyKind = raw.parse().map_err(&invalid)?;
            if !(0.0..=1.0).contains(ceiling) {
                return Err(invalid(format!("ceiling {ceiling} for {kind} outside [0, 1]")));
            }
            ceilings.insert(kind, *ceiling);
        }

        if let Some(api) = &spec.api {
            if !api.url_template.contains(USERNAME_PLACEHOLDER) {
                return Err(invalid("api url template lacks {username}".into()));
            }
            api.parse.validate().map_err(&invalid)?;
        } else if spec.strategies.contains(&StrategyKind::Api) {
            return Err(invalid("api strategy listed without an api endpoint".into()));
        }

        let mut metadata = Vec::with_capacity(spec.metadata.len());
        for (name, pattern) in &spec.metadata {
            let regex = build_regex(pattern)
                .map_err(|err| invalid(format!("metadata `{name}`: {err}")))?;
            if regex.captures_len() < 2 {
                return Err(invalid(format!("metadata `{name}` needs a capture group")));
            }
            metadata.push((name.clone(), regex));
        }

        let block_patterns = spec
            .block_patterns
            .iter()
            .map(|pattern| {
                build_regex(pattern).map_err(|err| invalid(format!("block pattern: {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: spec.id.clone(),
            display_name: spec.name.clone(),
            category: spec.category,
            difficulty: spec.difficulty,
            probe_template: spec.probe.clone(),
            strategies: spec.strategies.clone(),
            parse: spec.parse.clone(),
            rate_limit: spec.rate_limit,
            trust_weight: spec.trust_weight,
            min_confidence: spec.min_confidence,
            ceilings,
            api: spec.api.clone(),
            metadata,
            block_patterns,
            max_length: spec.max_length,
        })
    }
}

fn build_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
}
