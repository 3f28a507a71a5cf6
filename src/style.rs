//! Per-locale post-translation style filters.
//!
//! Applied after the worker responds, before caching, so the cached
//! translation already carries the requested formality and gender form.

pub mod de;
pub mod romance;

use std::collections::HashSet;

use crate::invariants::InvariantChecks;

const ROMANCE_ENGINES: &[&str] = &["fr", "it", "es", "pt"];

/// Dispatch to the style filter for `lang_engine`, if the locale is covered
/// and `style_langs` (the configured opt-in set) includes it. Returns the
/// input unchanged for any engine without a style filter.
pub fn apply_style_filter(
    text: &str,
    lang_engine: &str,
    address: &str,
    gender: &str,
    keep_terms: &HashSet<String>,
    style_langs: &HashSet<String>,
) -> (String, InvariantChecks) {
    if !style_langs.contains(lang_engine) {
        return (text.to_string(), InvariantChecks::trivially_ok());
    }

    if lang_engine == "de" {
        return de::apply_style_de_safe(text, address, gender, keep_terms);
    }

    if ROMANCE_ENGINES.contains(&lang_engine) {
        return romance::apply_style_romance_safe(text, lang_engine, address);
    }

    (text.to_string(), InvariantChecks::trivially_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_language_is_untouched() {
        let keep = HashSet::new();
        let style_langs: HashSet<String> = ["de".to_string()].into_iter().collect();
        let (out, _) = apply_style_filter("Vous êtes ici", "fr", "du", "none", &keep, &style_langs);
        assert_eq!(out, "Vous êtes ici");
    }

    #[test]
    fn configured_german_applies_address_filter() {
        let keep = HashSet::new();
        let style_langs: HashSet<String> = ["de".to_string()].into_iter().collect();
        let (out, checks) =
            apply_style_filter("Haben Sie Zeit?", "de", "du", "none", &keep, &style_langs);
        assert!(checks.ok);
        assert!(out.contains("du") || out.contains("Hast"));
    }

    #[test]
    fn configured_romance_applies_pronoun_filter() {
        let keep = HashSet::new();
        let style_langs: HashSet<String> = ["fr".to_string()].into_iter().collect();
        let (out, checks) =
            apply_style_filter("Vous avez votre code", "fr", "du", "none", &keep, &style_langs);
        assert!(checks.ok);
        assert!(out.contains("tu") || out.contains("ton"));
    }
}
