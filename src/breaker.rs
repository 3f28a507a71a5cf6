//! Output-quality degradation heuristic.
//!
//! Distinct from the network-level circuit breaker in [`crate::worker`]: this
//! judges whether a worker response that came back HTTP 200 is actually
//! usable, so the orchestrator can fall back to a safer strategy even though
//! the call itself "succeeded".

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

static CYR_ENGINES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["ru", "bg", "uk", "sr", "mk", "be"].into_iter().collect());

static REPEATED_CHAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(.)\1{9,}").unwrap());
static ANGLE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[<>]{8,}").unwrap());
static SAFE_PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[#INV:(\d+)#\]").unwrap());
static STD_PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\|INV:(\d+):([0-9A-Fa-f]{4,8})\|>").unwrap());

fn nfkc_trim(s: &str) -> String {
    s.nfkc().collect::<String>().trim().to_string()
}

fn looks_like_gibberish(s: &str) -> bool {
    let t = nfkc_trim(s);
    if t.chars().count() < 2 {
        return true;
    }
    if REPEATED_CHAR_RE.is_match(&t) {
        return true;
    }
    if ANGLE_RUN_RE.is_match(&t) {
        return true;
    }
    let tokens: Vec<&str> = t.split_whitespace().collect();
    if tokens.len() >= 8 {
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for tok in &tokens {
            *counts.entry(tok).or_insert(0) += 1;
        }
        let top = counts.values().copied().max().unwrap_or(0);
        let variety_ratio = counts.len() as f64 / tokens.len() as f64;
        let dominance_ratio = top as f64 / tokens.len() as f64;
        if variety_ratio < 0.2 && dominance_ratio >= 0.25 {
            return true;
        }
    }
    false
}

/// Count both safe-token and sentinel placeholder occurrences in `s`.
pub fn count_placeholders(s: &str) -> usize {
    SAFE_PLACEHOLDER_RE.find_iter(s).count() + STD_PLACEHOLDER_RE.find_iter(s).count()
}

/// Subset of [`crate::invariants::InvariantChecks`] this heuristic actually
/// consults, plus the invariant-restore miss count it is named after in the
/// upstream design (`freeze.missing`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DegradeChecks {
    pub ph_ok: bool,
    pub missing: u32,
}

/// Decide whether to fall back to a safer translation strategy. Returns
/// `(should_degrade, reason)`; an empty reason means no degradation.
pub fn should_degrade(worker_raw: Option<&str>, checks: DegradeChecks, target_engine: &str) -> (bool, String) {
    let Some(raw) = worker_raw else {
        return (true, "empty_output".to_string());
    };
    if raw.is_empty() {
        return (true, "empty_output".to_string());
    }
    if looks_like_gibberish(raw) {
        return (true, "gibberish".to_string());
    }

    if checks.missing >= 2 {
        return (true, format!("missing_placeholders:{}", checks.missing));
    }

    if CYR_ENGINES.contains(target_engine) {
        if !checks.ph_ok {
            return (true, "cyr_ph_fail".to_string());
        }
        if checks.missing > 0 {
            return (true, format!("cyr_missing:{}", checks.missing));
        }
    }

    (false, String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_output_always_degrades() {
        let (yes, reason) = should_degrade(None, DegradeChecks::default(), "de");
        assert!(yes);
        assert_eq!(reason, "empty_output");
    }

    #[test]
    fn repeated_char_run_is_gibberish() {
        let (yes, reason) = should_degrade(Some("aaaaaaaaaaaaaa"), DegradeChecks::default(), "de");
        assert!(yes);
        assert_eq!(reason, "gibberish");
    }

    #[test]
    fn angle_bracket_run_is_gibberish() {
        let (yes, reason) = should_degrade(Some("text <<<<<<<< more"), DegradeChecks::default(), "de");
        assert!(yes);
        assert_eq!(reason, "gibberish");
    }

    #[test]
    fn two_or_more_missing_placeholders_degrades() {
        let checks = DegradeChecks { ph_ok: true, missing: 2 };
        let (yes, reason) = should_degrade(Some("plausible output"), checks, "de");
        assert!(yes);
        assert_eq!(reason, "missing_placeholders:2");
    }

    #[test]
    fn one_missing_placeholder_is_tolerated_for_latin_engine() {
        let checks = DegradeChecks { ph_ok: true, missing: 1 };
        let (yes, _) = should_degrade(Some("plausible output"), checks, "de");
        assert!(!yes);
    }

    #[test]
    fn cyrillic_engine_is_stricter_on_single_miss() {
        let checks = DegradeChecks { ph_ok: true, missing: 1 };
        let (yes, reason) = should_degrade(Some("plausible output"), checks, "ru");
        assert!(yes);
        assert_eq!(reason, "cyr_missing:1");
    }

    #[test]
    fn cyrillic_engine_degrades_on_placeholder_failure() {
        let checks = DegradeChecks { ph_ok: false, missing: 0 };
        let (yes, reason) = should_degrade(Some("plausible output"), checks, "bg");
        assert!(yes);
        assert_eq!(reason, "cyr_ph_fail");
    }

    #[test]
    fn clean_output_does_not_degrade() {
        let checks = DegradeChecks { ph_ok: true, missing: 0 };
        let (yes, reason) = should_degrade(Some("A perfectly normal sentence."), checks, "de");
        assert!(!yes);
        assert_eq!(reason, "");
    }

    #[test]
    fn count_placeholders_counts_both_formats() {
        let s = "[#INV:0#] and <|INV:1:ABCDEF|>";
        assert_eq!(count_placeholders(s), 2);
    }
}
