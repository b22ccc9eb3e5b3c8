//! Leet-speak analysis.
//!
//! Usernames are restricted to ASCII alphanumerics and a few separators, so
//! only single-character substitutions that keep a name valid are considered.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::Username;

/// Letters and the characters commonly written in their place, most common first.
const LETTER_SUBSTITUTES: &[(char, &[char])] = &[
    ('a', &['4']),
    ('b', &['8']),
    ('e', &['3']),
    ('g', &['9', '6']),
    ('i', &['1']),
    ('l', &['1']),
    ('o', &['0']),
    ('s', &['5', 'z']),
    ('t', &['7']),
    ('z', &['2']),
];

/// Share of substitute digits above which a username reads as leet.
const SUBSTITUTE_RATIO: f64 = 0.5;

static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // "leet" / "1337"
        r"[l1][3e]{2}[7t]",
        // xX_name_Xx framing
        r"^xx|xx$",
        // digit inside a word: h4x0r, j0hn
        r"[a-z][0-9]+[a-z]",
        // word opening with substitute digits: 4lpha
        r"^[013457-9]+[a-z]{2,}",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("leet pattern"))
    .collect()
});

fn letter_for(digit: char) -> Option<char> {
    match digit {
        '0' => Some('o'),
        '1' => Some('i'),
        '3' => Some('e'),
        '4' => Some('a'),
        '5' => Some('s'),
        '7' => Some('t'),
        '8' => Some('b'),
        '9' => Some('g'),
        _ => None,
    }
}

fn substitutes_for(letter: char) -> &'static [char] {
    LETTER_SUBSTITUTES
        .iter()
        .find(|(candidate, _)| *candidate == letter)
        .map(|(_, subs)| *subs)
        .unwrap_or(&[])
}

/// Result of [`Username::leet_analysis`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LeetAnalysis {
    pub is_leet: bool,
    /// How strongly the username reads as leet, in `[0, 1]`.
    pub confidence: f64,
    /// Digits mapped back to letters, long runs shortened.
    pub normalized: String,
    /// `normalized` with separators removed as well.
    pub aggressive: String,
    pub variants: Vec<String>,
    pub substitutions: usize,
    pub substitution_ratio: f64,
}

fn substitution_counts(name: &str) -> (usize, f64) {
    let alnum = name.chars().filter(char::is_ascii_alphanumeric).count();
    let substitutions = name.chars().filter(|ch| letter_for(*ch).is_some()).count();
    let ratio = if alnum == 0 {
        0.0
    } else {
        substitutions as f64 / alnum as f64
    };
    (substitutions, ratio)
}

pub(super) fn is_leet(name: &str) -> bool {
    if name.len() < 2 {
        return false;
    }
    if PATTERNS.iter().any(|pattern| pattern.is_match(name)) {
        return true;
    }
    substitution_counts(name).1 > SUBSTITUTE_RATIO
}

pub(super) fn confidence(name: &str) -> f64 {
    if name.len() < 2 {
        return 0.0;
    }
    let (_, ratio) = substitution_counts(name);
    let matched = PATTERNS.iter().filter(|pattern| pattern.is_match(name)).count();
    let pattern_score = matched as f64 / PATTERNS.len() as f64;

    let letters = name.chars().any(|ch| ch.is_ascii_alphabetic());
    let digits = name.chars().any(|ch| ch.is_ascii_digit());
    let mix_score = if letters && digits {
        0.7
    } else if name.chars().any(|ch| !ch.is_ascii_alphanumeric()) {
        0.5
    } else {
        0.0
    };

    (ratio * 0.4 + pattern_score * 0.3 + mix_score * 0.3).min(1.0)
}

pub(super) fn normalize(name: &str, aggressive: bool) -> String {
    if !is_leet(name) {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let ch = letter_for(ch).unwrap_or(ch);
        if aggressive && !ch.is_ascii_alphanumeric() {
            continue;
        }
        // At most two identical characters in a row.
        let mut tail = out.chars().rev();
        if tail.next() == Some(ch) && tail.next() == Some(ch) {
            continue;
        }
        out.push(ch);
    }
    out.trim_matches(|ch: char| !ch.is_ascii_alphanumeric())
        .to_string()
}

/// Single-substitution spellings in character order, original excluded.
pub(super) fn variants(name: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut found: Vec<String> = Vec::new();
    for (idx, ch) in chars.iter().enumerate() {
        let replacements: Vec<char> = match letter_for(*ch) {
            Some(letter) => vec![letter],
            None => substitutes_for(*ch).to_vec(),
        };
        for replacement in replacements {
            if found.len() >= max {
                return found;
            }
            let mut candidate = chars.clone();
            candidate[idx] = replacement;
            let candidate: String = candidate.into_iter().collect();
            if candidate != name && !found.contains(&candidate) {
                found.push(candidate);
            }
        }
    }
    found
}

impl Username {
    pub fn is_leet(&self) -> bool {
        is_leet(self.as_str())
    }

    /// Spellings of this username with one character swapped for its leet
    /// form, or a leet digit swapped back to its letter.
    pub fn leet_variants(&self, max: usize) -> Vec<String> {
        variants(self.as_str(), max)
    }

    pub fn leet_analysis(&self) -> LeetAnalysis {
        let name = self.as_str();
        let (substitutions, substitution_ratio) = substitution_counts(name);
        LeetAnalysis {
            is_leet: is_leet(name),
            confidence: confidence(name),
            normalized: normalize(name, false),
            aggressive: normalize(name, true),
            variants: variants(name, 5),
            substitutions,
            substitution_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::username::UsernamePolicy;

    fn username(raw: &str) -> Username {
        Username::parse(raw, &UsernamePolicy::default()).unwrap()
    }

    #[test]
    fn detects_digit_substitutions() {
        assert!(username("h4x0r").is_leet());
        assert!(username("j0hn_do3").is_leet());
        assert!(username("1337").is_leet());
        assert!(username("xX_shadow_Xx").is_leet());
        assert!(!username("normal_user").is_leet());
        assert!(!username("abc123").is_leet());
        assert!(!username("x").is_leet());
    }

    #[test]
    fn normalizes_back_to_letters() {
        let analysis = username("j0hn_do3").leet_analysis();
        assert_eq!(analysis.normalized, "john_doe");
        assert_eq!(analysis.aggressive, "johndoe");
        assert_eq!(analysis.substitutions, 2);

        let analysis = username("l333t-h4x0r").leet_analysis();
        assert_eq!(analysis.normalized, "leet-haxor");

        let plain = username("normal_user").leet_analysis();
        assert_eq!(plain.normalized, "normal_user");
        assert_eq!(plain.aggressive, "normal_user");
    }

    #[test]
    fn confidence_grows_with_leet_signals() {
        let plain = confidence("normaluser");
        let light = confidence("h4x0r");
        let heavy = confidence("xx_l33t_h4x0r_xx");
        assert_eq!(plain, 0.0);
        assert!(light > plain);
        assert!(heavy > light);
        assert!(heavy <= 1.0);
    }

    #[test]
    fn variants_swap_one_character_at_a_time() {
        let variants = username("ghost").leet_variants(10);
        assert_eq!(variants, ["9host", "6host", "gh0st", "gho5t", "ghozt", "ghos7"]);
        assert_eq!(username("ghost").leet_variants(2), ["9host", "6host"]);
        assert_eq!(username("h4x0r").leet_variants(10), ["hax0r", "h4xor"]);
    }
}
