//! Glossary term enforcement.
//!
//! Terms loaded from a JSON file and/or a CSV env var are frozen into
//! sentinels `<|GLO:{id}:{crc}|>` before translation (and re-wrapped as
//! `[#GLO:{id}#]` ASCII-safe tokens for worker calls that strip pipes/angle
//! brackets), then swapped back for the term's canonical spelling afterward.
//! Unlike invariants, a glossary miss is tolerated if the canonical term
//! already survived translation verbatim.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::cell::RefCell;
use std::collections::HashSet;

#[derive(Debug, Clone, Deserialize)]
struct TermFileEntry {
    term: String,
    #[serde(default)]
    canonical: Option<String>,
    #[serde(default)]
    langs: Option<Vec<String>>,
    #[serde(default)]
    regex: bool,
}

#[derive(Debug, Deserialize)]
struct TermFile {
    #[serde(default)]
    terms: Vec<TermFileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlossaryTerm {
    pub term: String,
    pub canonical: String,
    pub langs: Vec<String>,
    pub is_regex: bool,
}

fn sha6(s: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())[..6].to_uppercase()
}

/// Load terms from an optional JSON file and an optional comma-separated
/// env-var list, deduplicated by `(canonical, sorted langs)`.
pub fn load_terms(path: Option<&str>, env_terms: Option<&str>) -> Vec<GlossaryTerm> {
    let mut terms = Vec::new();

    if let Some(path) = path {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if let Ok(parsed) = serde_json::from_str::<TermFile>(&contents) {
                for t in parsed.terms {
                    if t.term.is_empty() {
                        continue;
                    }
                    let canonical = t.canonical.unwrap_or_else(|| t.term.clone());
                    let langs = t.langs.unwrap_or_else(|| vec!["*".to_string()]);
                    terms.push(GlossaryTerm {
                        term: t.term,
                        canonical,
                        langs,
                        is_regex: t.regex,
                    });
                }
            }
        }
    }

    if let Some(env_terms) = env_terms {
        for raw in env_terms.split(',') {
            let w = raw.trim();
            if !w.is_empty() {
                terms.push(GlossaryTerm {
                    term: w.to_string(),
                    canonical: w.to_string(),
                    langs: vec!["*".to_string()],
                    is_regex: false,
                });
            }
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for t in terms {
        let mut sorted_langs = t.langs.clone();
        sorted_langs.sort();
        let key = (t.canonical.clone(), sorted_langs);
        if seen.insert(key) {
            out.push(t);
        }
    }
    out
}

static HAS_LATIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]").unwrap());

struct Matcher {
    pattern: Regex,
    canonical: String,
}

fn build_matchers(terms: &[GlossaryTerm], lang_engine: &str) -> Vec<Matcher> {
    let mut matchers: Vec<Matcher> = terms
        .iter()
        .filter(|t| t.langs.iter().any(|l| l == "*") || t.langs.iter().any(|l| l == lang_engine))
        .filter_map(|t| {
            let pattern = if t.is_regex {
                Regex::new(&t.term).ok()?
            } else if HAS_LATIN_RE.is_match(&t.term) {
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&t.term))).ok()?
            } else {
                Regex::new(&regex::escape(&t.term)).ok()?
            };
            Some(Matcher {
                pattern,
                canonical: t.canonical.clone(),
            })
        })
        .collect();
    matchers.sort_by(|a, b| b.pattern.as_str().len().cmp(&a.pattern.as_str().len()));
    matchers
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlossaryMapping {
    pub placeholder: String,
    pub raw: String,
}

/// Replace every matched glossary term with a `<|GLO:{id}:{crc}|>` sentinel,
/// recording the canonical spelling to restore after translation.
pub fn freeze_glossary(
    text: &str,
    lang_engine: &str,
    terms: &[GlossaryTerm],
) -> (String, Vec<GlossaryMapping>) {
    if terms.is_empty() {
        return (text.to_string(), Vec::new());
    }

    let mapping = RefCell::new(Vec::new());
    let idx = RefCell::new(0usize);
    let mut out = text.to_string();

    for matcher in build_matchers(terms, lang_engine) {
        out = matcher
            .pattern
            .replace_all(&out, |caps: &regex::Captures| {
                let raw_match = caps.get(0).unwrap().as_str();
                let mut i = idx.borrow_mut();
                let placeholder = format!("<|GLO:{}:{}|>", *i, sha6(raw_match));
                mapping.borrow_mut().push(GlossaryMapping {
                    placeholder: placeholder.clone(),
                    raw: matcher.canonical.clone(),
                });
                *i += 1;
                placeholder
            })
            .to_string();
    }

    (out, mapping.into_inner())
}

/// Rewrite `<|GLO:{id}:{crc}|>` sentinels as ASCII-safe `[#GLO:{id}#]`
/// tokens, for worker backends known to strip pipes or angle brackets.
pub fn to_safe_tokens(text: &str, mapping: &[GlossaryMapping]) -> String {
    let mut out = text.to_string();
    for (i, m) in mapping.iter().enumerate() {
        out = out.replace(&m.placeholder, &format!("[#GLO:{i}#]"));
    }
    out
}

/// Inverse of [`to_safe_tokens`].
pub fn from_safe_tokens(text: &str, mapping: &[GlossaryMapping]) -> String {
    let mut out = text.to_string();
    for (i, m) in mapping.iter().enumerate() {
        out = out.replace(&format!("[#GLO:{i}#]"), &m.placeholder);
    }
    out
}

static TOL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[<＜《【]?\s*[|｜︱∣]?\s*G\s*L\s*O\s*[:：| ]\s*(\d{1,4})\s*(?:[:：| ]\s*([0-9A-Fa-f]{4,8}))?\s*[|｜︱∣]?\s*[>＞》】]?",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlossaryUnfreezeStats {
    pub replaced_total: usize,
    pub missing: usize,
}

/// Swap sentinels back for their canonical spelling, falling back to a
/// tolerant sentinel match and finally a presence check for the canonical
/// term having survived translation verbatim.
pub fn unfreeze_glossary(text: &str, mapping: &[GlossaryMapping]) -> (String, GlossaryUnfreezeStats) {
    if mapping.is_empty() {
        return (
            text.to_string(),
            GlossaryUnfreezeStats {
                replaced_total: 0,
                missing: 0,
            },
        );
    }

    let mut replaced = 0usize;
    let mut missing = 0usize;
    let mut out = text.to_string();

    for (i, m) in mapping.iter().enumerate() {
        if out.contains(&m.placeholder) {
            out = out.replace(&m.placeholder, &m.raw);
            replaced += 1;
            continue;
        }

        let target = i.to_string();
        let mut found = false;
        if let Some(caps) = TOL_RE.captures(&out) {
            if caps.get(1).map(|g| g.as_str()) == Some(target.as_str()) {
                out = TOL_RE.replace(&out, m.raw.as_str()).to_string();
                found = true;
            }
        }
        if found {
            replaced += 1;
            continue;
        }

        if HAS_LATIN_RE.is_match(&m.raw) {
            let pat = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&m.raw))).unwrap();
            if pat.is_match(&out) {
                replaced += 1;
                continue;
            }
        } else if out.contains(m.raw.as_str()) {
            replaced += 1;
            continue;
        }

        missing += 1;
    }

    (
        out,
        GlossaryUnfreezeStats {
            replaced_total: replaced,
            missing,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(term: &str, canonical: &str) -> GlossaryTerm {
        GlossaryTerm {
            term: term.to_string(),
            canonical: canonical.to_string(),
            langs: vec!["*".to_string()],
            is_regex: false,
        }
    }

    #[test]
    fn freeze_and_unfreeze_round_trip() {
        let terms = vec![term("TranceLate", "TranceLate")];
        let (frozen, mapping) = freeze_glossary("Buy TranceLate today", "de", &terms);
        assert!(frozen.contains("<|GLO:0:"));
        let (restored, stats) = unfreeze_glossary(&frozen, &mapping);
        assert_eq!(stats.missing, 0);
        assert!(restored.contains("TranceLate"));
    }

    #[test]
    fn safe_token_round_trip_preserves_sentinel() {
        let terms = vec![term("Acme", "Acme")];
        let (frozen, mapping) = freeze_glossary("Acme Corp", "de", &terms);
        let safe = to_safe_tokens(&frozen, &mapping);
        assert!(safe.contains("[#GLO:0#]"));
        let back = from_safe_tokens(&safe, &mapping);
        assert_eq!(back, frozen);
    }

    #[test]
    fn unfreeze_accepts_surviving_canonical_as_non_missing() {
        let terms = vec![term("Acme", "Acme")];
        let (frozen, mapping) = freeze_glossary("Acme Corp", "de", &terms);
        // Worker translated around the sentinel but dropped it entirely,
        // leaving the canonical brand name intact in plain text.
        let worker_output = frozen.replace(&mapping[0].placeholder, "Acme");
        let (_, stats) = unfreeze_glossary(&worker_output, &mapping);
        assert_eq!(stats.missing, 0);
    }

    #[test]
    fn lang_filter_excludes_non_matching_engine() {
        let mut t = term("Nur", "Nur");
        t.langs = vec!["de".to_string()];
        let (frozen, mapping) = freeze_glossary("Nur heute", "fr", &[t]);
        assert!(mapping.is_empty());
        assert_eq!(frozen, "Nur heute");
    }

    #[test]
    fn load_terms_dedupes_by_canonical_and_langs() {
        let terms = load_terms(None, Some("TranceLate,TranceLate,OpenAI"));
        assert_eq!(terms.len(), 2);
    }
}
