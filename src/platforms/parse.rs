//! Response parsing rules.
//!
//! Each platform declares how a page maps to a verdict. Rules are plain data
//! (deserialized from the catalog) and are validated once at load time.

use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::strategies::AttemptStatus;
use crate::username::Username;

const USERNAME_PLACEHOLDER: &str = "{username}";

/// Page content handed to a parse rule.
#[derive(Debug, Clone, Copy)]
pub struct PageInput<'a> {
    pub status: u16,
    pub body: &'a str,
    pub final_url: Option<&'a str>,
}

/// Verdict produced by a rule before strategy ceilings are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: AttemptStatus,
    pub signal: f64,
    pub matched: String,
}

impl Verdict {
    fn new(status: AttemptStatus, signal: f64, matched: impl Into<String>) -> Self {
        Self {
            status,
            signal,
            matched: matched.into(),
        }
    }

    fn unmatched(signal: f64) -> Self {
        Self::new(AttemptStatus::Ambiguous, signal, "no rule matched")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParseRule {
    /// Status code alone decides.
    StatusCode {
        #[serde(default = "default_available_statuses")]
        available: Vec<u16>,
        #[serde(default = "default_taken_statuses")]
        taken: Vec<u16>,
        #[serde(default = "default_status_signal")]
        signal: f64,
    },
    /// Regexes over the body; `{username}` is substituted (escaped) per call.
    BodyPattern {
        #[serde(default)]
        available: Vec<String>,
        #[serde(default)]
        taken: Vec<String>,
        #[serde(default)]
        ambiguous: Vec<String>,
        #[serde(default = "default_body_signal")]
        signal: f64,
    },
    /// CSS selectors over the rendered DOM.
    Selector {
        #[serde(default)]
        available: Vec<String>,
        #[serde(default)]
        taken: Vec<String>,
        #[serde(default = "default_selector_signal")]
        signal: f64,
    },
    /// JSON document; a non-null value at `pointer` means taken.
    JsonField {
        pointer: String,
        #[serde(default = "default_available_statuses")]
        available_statuses: Vec<u16>,
        #[serde(default = "default_json_signal")]
        signal: f64,
    },
    /// First non-ambiguous verdict among nested rules.
    AnyOf { rules: Vec<ParseRule> },
}

fn default_available_statuses() -> Vec<u16> {
    vec![404]
}

fn default_taken_statuses() -> Vec<u16> {
    vec![200]
}

fn default_status_signal() -> f64 {
    0.99
}

fn default_body_signal() -> f64 {
    0.85
}

fn default_selector_signal() -> f64 {
    0.9
}

fn default_json_signal() -> f64 {
    1.0
}

impl ParseRule {
    pub fn status_code() -> Self {
        ParseRule::StatusCode {
            available: default_available_statuses(),
            taken: default_taken_statuses(),
            signal: default_status_signal(),
        }
    }

    pub fn json_field(pointer: impl Into<String>) -> Self {
        ParseRule::JsonField {
            pointer: pointer.into(),
            available_statuses: default_available_statuses(),
            signal: default_json_signal(),
        }
    }

    /// Checks every pattern, selector and pointer so bad catalog entries fail
    /// at load instead of mid-batch.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ParseRule::StatusCode {
                available,
                taken,
                signal,
            } => {
                validate_signal(*signal)?;
                if let Some(code) = available.iter().find(|code| taken.contains(code)) {
                    return Err(format!("status {code} listed as both available and taken"));
                }
                Ok(())
            }
            ParseRule::BodyPattern {
                available,
                taken,
                ambiguous,
                signal,
            } => {
                validate_signal(*signal)?;
                if available.is_empty() && taken.is_empty() {
                    return Err("body_pattern needs at least one available or taken pattern".into());
                }
                for pattern in available.iter().chain(taken).chain(ambiguous) {
                    compile_pattern(pattern, "probe")
                        .map_err(|err| format!("invalid body pattern `{pattern}`: {err}"))?;
                }
                Ok(())
            }
            ParseRule::Selector {
                available,
                taken,
                signal,
            } => {
                validate_signal(*signal)?;
                if available.is_empty() && taken.is_empty() {
                    return Err("selector rule needs at least one selector".into());
                }
                for selector in available.iter().chain(taken) {
                    Selector::parse(selector)
                        .map_err(|err| format!("invalid selector `{selector}`: {err:?}"))?;
                }
                Ok(())
            }
            ParseRule::JsonField {
                pointer, signal, ..
            } => {
                validate_signal(*signal)?;
                if !pointer.is_empty() && !pointer.starts_with('/') {
                    return Err(format!("json pointer `{pointer}` must start with '/'"));
                }
                Ok(())
            }
            ParseRule::AnyOf { rules } => {
                if rules.is_empty() {
                    return Err("any_of needs at least one rule".into());
                }
                rules.iter().try_for_each(ParseRule::validate)
            }
        }
    }

    pub fn evaluate(&self, page: &PageInput<'_>, username: &Username) -> Verdict {
        match self {
            ParseRule::StatusCode {
                available,
                taken,
                signal,
            } => {
                if available.contains(&page.status) {
                    Verdict::new(AttemptStatus::Available, *signal, format!("status {}", page.status))
                } else if taken.contains(&page.status) {
                    Verdict::new(AttemptStatus::Taken, *signal, format!("status {}", page.status))
                } else {
                    Verdict::new(
                        AttemptStatus::Ambiguous,
                        0.2,
                        format!("unexpected status {}", page.status),
                    )
                }
            }
            ParseRule::BodyPattern {
                available,
                taken,
                ambiguous,
                signal,
            } => {
                let hit = |patterns: &[String]| pattern_hit(patterns, page.body, username).cloned();
                match (hit(available.as_slice()), hit(taken.as_slice())) {
                    (Some(a), Some(t)) => Verdict::new(
                        AttemptStatus::Ambiguous,
                        0.3,
                        format!("conflicting patterns `{a}` / `{t}`"),
                    ),
                    (Some(a), None) => Verdict::new(AttemptStatus::Available, *signal, a),
                    (None, Some(t)) => Verdict::new(AttemptStatus::Taken, *signal, t),
                    (None, None) => match hit(ambiguous.as_slice()) {
                        Some(pattern) => Verdict::new(AttemptStatus::Ambiguous, 0.3, pattern),
                        None => Verdict::unmatched(0.2),
                    },
                }
            }
            ParseRule::Selector {
                available,
                taken,
                signal,
            } => {
                let document = Html::parse_document(page.body);
                let hit = |selectors: &[String]| selector_hit(selectors, &document).cloned();
                match (hit(available.as_slice()), hit(taken.as_slice())) {
                    (Some(a), Some(t)) => Verdict::new(
                        AttemptStatus::Ambiguous,
                        0.3,
                        format!("conflicting selectors `{a}` / `{t}`"),
                    ),
                    (Some(a), None) => Verdict::new(AttemptStatus::Available, *signal, a),
                    (None, Some(t)) => Verdict::new(AttemptStatus::Taken, *signal, t),
                    (None, None) => Verdict::unmatched(0.2),
                }
            }
            ParseRule::JsonField {
                pointer,
                available_statuses,
                signal,
            } => {
                if available_statuses.contains(&page.status) {
                    return Verdict::new(
                        AttemptStatus::Available,
                        *signal,
                        format!("status {}", page.status),
                    );
                }
                match serde_json::from_str::<serde_json::Value>(page.body) {
                    Ok(document) => match document.pointer(pointer) {
                        Some(value) if !value.is_null() => {
                            Verdict::new(AttemptStatus::Taken, *signal, pointer.clone())
                        }
                        _ => Verdict::new(
                            AttemptStatus::Available,
                            *signal,
                            format!("{pointer} absent"),
                        ),
                    },
                    Err(_) => Verdict::new(AttemptStatus::Ambiguous, 0.1, "body is not json"),
                }
            }
            ParseRule::AnyOf { rules } => {
                let mut fallback = Verdict::unmatched(0.0);
                for rule in rules {
                    let verdict = rule.evaluate(page, username);
                    if verdict.status.is_definitive() {
                        return verdict;
                    }
                    if verdict.signal >= fallback.signal {
                        fallback = verdict;
                    }
                }
                fallback
            }
        }
    }
}

fn validate_signal(signal: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&signal) {
        Ok(())
    } else {
        Err(format!("signal {signal} outside [0, 1]"))
    }
}

fn pattern_hit<'p>(patterns: &'p [String], body: &str, username: &Username) -> Option<&'p String> {
    patterns.iter().find(|pattern| {
        compile_pattern(pattern, username.as_str())
            .map(|regex| regex.is_match(body))
            .unwrap_or(false)
    })
}

fn selector_hit<'p>(selectors: &'p [String], document: &Html) -> Option<&'p String> {
    selectors.iter().find(|raw| {
        Selector::parse(raw)
            .map(|selector| document.select(&selector).next().is_some())
            .unwrap_or(false)
    })
}

fn compile_pattern(pattern: &str, username: &str) -> Result<Regex, regex::Error> {
    let expanded = pattern.replace(USERNAME_PLACEHOLDER, &regex::escape(username));
    RegexBuilder::new(&expanded)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::username::UsernamePolicy;

    fn user(raw: &str) -> Username {
        Username::parse(raw, &UsernamePolicy::default()).unwrap()
    }

    fn page(status: u16, body: &str) -> PageInput<'_> {
        PageInput {
            status,
            body,
            final_url: None,
        }
    }

    #[test]
    fn status_rule_maps_codes() {
        let rule = ParseRule::status_code();
        let name = user("admin");
        assert_eq!(rule.evaluate(&page(404, ""), &name).status, AttemptStatus::Available);
        assert_eq!(rule.evaluate(&page(200, ""), &name).status, AttemptStatus::Taken);
        assert_eq!(rule.evaluate(&page(302, ""), &name).status, AttemptStatus::Ambiguous);
    }

    #[test]
    fn body_rule_substitutes_escaped_username() {
        let rule = ParseRule::BodyPattern {
            available: vec!["Sorry, this page isn't available".into()],
            taken: vec![r#"<title>@{username} "#.into()],
            ambiguous: vec![],
            signal: 0.85,
        };
        let verdict = rule.evaluate(&page(200, "<title>@john.doe | Profile</title>"), &user("john.doe"));
        assert_eq!(verdict.status, AttemptStatus::Taken);

        let other = rule.evaluate(&page(200, "<title>@johnxdoe | Profile</title>"), &user("john.doe"));
        assert_eq!(other.status, AttemptStatus::Ambiguous);
    }

    #[test]
    fn selector_rule_reads_dom() {
        let rule = ParseRule::Selector {
            available: vec!["div.not-found".into()],
            taken: vec!["img.avatar".into()],
            signal: 0.9,
        };
        let verdict = rule.evaluate(
            &page(200, r#"<html><body><img class="avatar" src="a.png"></body></html>"#),
            &user("someone"),
        );
        assert_eq!(verdict.status, AttemptStatus::Taken);
        assert_eq!(verdict.signal, 0.9);
    }

    #[test]
    fn json_rule_uses_pointer() {
        let rule = ParseRule::json_field("/data/user/id");
        let name = user("someone");
        let taken = rule.evaluate(&page(200, r#"{"data":{"user":{"id":42}}}"#), &name);
        assert_eq!(taken.status, AttemptStatus::Taken);
        let free = rule.evaluate(&page(200, r#"{"data":{"user":null}}"#), &name);
        assert_eq!(free.status, AttemptStatus::Available);
        let garbage = rule.evaluate(&page(200, "<html>"), &name);
        assert_eq!(garbage.status, AttemptStatus::Ambiguous);
    }

    #[test]
    fn validation_rejects_bad_rules() {
        let bad_regex = ParseRule::BodyPattern {
            available: vec!["(unclosed".into()],
            taken: vec![],
            ambiguous: vec![],
            signal: 0.8,
        };
        assert!(bad_regex.validate().is_err());

        let overlapping = ParseRule::StatusCode {
            available: vec![200],
            taken: vec![200],
            signal: 0.9,
        };
        assert!(overlapping.validate().is_err());

        let rule: ParseRule =
            serde_json::from_str(r#"{"type":"any_of","rules":[{"type":"status_code"}]}"#).unwrap();
        assert!(rule.validate().is_ok());
    }
}
