//! Supported locale listing and capability discovery.

use serde::Serialize;
use std::collections::HashSet;

use crate::lang;

/// Read and parse an optional locales override file from disk. Returns
/// `None` on any I/O or parse failure, matching the "fall back to the
/// built-in list" behavior `load_locales_list` already applies.
pub fn load_locales_json_file(path: &str) -> Option<serde_json::Value> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn default_list() -> Vec<&'static str> {
    vec![
        "en-US", "en-GB", "de-DE", "de-AT", "fr-FR", "it-IT", "es-ES", "pt-PT", "pt-BR", "nl-NL",
        "sv-SE", "da-DK", "nb-NO", "fi-FI", "pl-PL", "cs-CZ", "sk-SK", "sl-SI", "hr-HR", "ro-RO",
        "hu-HU", "tr-TR", "el-GR", "ru-RU", "uk-UA", "he-IL", "ar-SA", "fa-IR", "ur-PK", "ps-AF",
        "hi-IN", "bn-BD", "ta-IN", "te-IN", "mr-IN", "gu-IN", "pa-IN", "ja-JP", "ko-KR", "zh-CN",
        "zh-TW", "th-TH", "vi-VN", "id-ID", "ms-MY", "fil-PH", "km-KH", "lo-LA", "my-MM",
    ]
}

/// Locales that only support the spans-only HTML chunking strategy
/// (scripts where word-level reflow inside markup is unsafe).
const SPANS_ONLY: &[&str] = &[
    "zh-CN", "zh-TW", "ja-JP", "ko-KR", "th-TH", "vi-VN", "km-KH", "lo-LA", "my-MM", "he-IL",
    "ar-SA", "fa-IR", "ur-PK", "ps-AF",
];

#[derive(Debug, Clone, Serialize)]
pub struct LocaleEntry {
    pub bcp47: String,
    pub engine: String,
}

/// Build the deduplicated, canonicalized, sorted locale list from a JSON
/// override file plus the CSV extra/disable config knobs.
pub fn load_locales_list(
    locales_json: Option<&serde_json::Value>,
    locales_extra: &[String],
    locales_disable: &HashSet<String>,
) -> Vec<String> {
    let base: Vec<String> = match locales_json {
        Some(serde_json::Value::Object(map)) => match map.get("locales") {
            Some(serde_json::Value::Array(arr)) => arr
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => default_list().into_iter().map(String::from).collect(),
        },
        Some(serde_json::Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default_list().into_iter().map(String::from).collect(),
    };

    let all_codes = base
        .into_iter()
        .chain(locales_extra.iter().map(|s| s.trim().to_string()))
        .filter(|c| !c.is_empty() && !locales_disable.contains(c));

    let mut seen = HashSet::new();
    let mut uniq = Vec::new();
    for code in all_codes {
        let norm = lang::normalize_lang_input(&code).bcp47;
        if !norm.is_empty() && seen.insert(norm.clone()) {
            uniq.push(norm);
        }
    }
    uniq.sort();
    uniq
}

/// Pair each locale code with the engine key the worker understands.
pub fn map_locales_with_engine(codes: &[String]) -> Vec<LocaleEntry> {
    codes
        .iter()
        .map(|code| {
            let n = lang::normalize_lang_input(code);
            LocaleEntry {
                bcp47: n.bcp47,
                engine: n.engine,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct StyleOptions {
    pub address: Vec<&'static str>,
    pub gender: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub version: serde_json::Value,
    pub features: CapabilityFeatures,
    pub locales: Vec<LocaleEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityFeatures {
    pub invariants: InvariantCapabilities,
    pub styles: std::collections::BTreeMap<String, StyleOptions>,
    pub spans_only_locales: Vec<String>,
    pub locales_count: usize,
    pub engines: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvariantCapabilities {
    pub sentinel_format: &'static str,
    pub protected: Vec<&'static str>,
    pub i18n_hardening: bool,
}

/// Assemble the `/capabilities` payload: invariant protection summary,
/// per-locale style option sets, spans-only locales, and the full locale
/// catalog paired with worker engine keys.
pub fn compute_capabilities(
    version: serde_json::Value,
    locales_json: Option<&serde_json::Value>,
    locales_extra: &[String],
    locales_disable: &HashSet<String>,
) -> Capabilities {
    let codes = load_locales_list(locales_json, locales_extra, locales_disable);
    let locs = map_locales_with_engine(&codes);
    let mut engines: Vec<String> = locs
        .iter()
        .map(|l| l.engine.clone())
        .filter(|e| !e.is_empty())
        .collect();
    engines.sort();
    engines.dedup();

    let de_style = StyleOptions {
        address: vec!["auto", "du", "sie", "divers"],
        gender: vec!["none", "colon", "star", "innen"],
    };
    let romance_style = StyleOptions {
        address: vec!["auto", "du", "sie"],
        gender: vec!["none"],
    };
    let mut styles = std::collections::BTreeMap::new();
    styles.insert("de".to_string(), de_style);
    for engine in ["fr", "it", "es", "pt"] {
        styles.insert(engine.to_string(), romance_style.clone());
    }

    let spans_only: Vec<String> = codes
        .iter()
        .filter(|c| SPANS_ONLY.contains(&c.as_str()))
        .cloned()
        .collect();

    Capabilities {
        version,
        features: CapabilityFeatures {
            invariants: InvariantCapabilities {
                sentinel_format: "<|INV:ID:CRC|>",
                protected: vec!["html", "email", "url", "currency", "number", "date", "time", "placeholder"],
                i18n_hardening: true,
            },
            styles,
            spans_only_locales: spans_only,
            locales_count: locs.len(),
            engines,
        },
        locales: locs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_list_is_used_without_override() {
        let disable = HashSet::new();
        let codes = load_locales_list(None, &[], &disable);
        assert!(codes.contains(&"de-DE".to_string()));
        assert!(codes.contains(&"zh-CN".to_string()));
    }

    #[test]
    fn disable_set_removes_codes() {
        let disable: HashSet<String> = ["de-DE".to_string()].into_iter().collect();
        let codes = load_locales_list(None, &[], &disable);
        assert!(!codes.contains(&"de-DE".to_string()));
    }

    #[test]
    fn extra_codes_are_added_and_deduped() {
        let disable = HashSet::new();
        let extra = vec!["de-DE".to_string(), "xx-YY".to_string()];
        let codes = load_locales_list(None, &extra, &disable);
        let count = codes.iter().filter(|c| *c == "de-DE").count();
        assert_eq!(count, 1);
        assert!(codes.contains(&"xx-YY".to_string()));
    }

    #[test]
    fn map_locales_with_engine_resolves_engine_keys() {
        let entries = map_locales_with_engine(&["zh-TW".to_string()]);
        assert_eq!(entries[0].engine, "zh");
    }

    #[test]
    fn capabilities_lists_spans_only_locales() {
        let disable = HashSet::new();
        let caps = compute_capabilities(serde_json::json!({"v": "1"}), None, &[], &disable);
        assert!(caps.features.spans_only_locales.contains(&"ja-JP".to_string()));
        assert!(caps.features.styles.contains_key("de"));
    }
}
