//! BCP-47 canonicalization and lightweight script-based language detection.
//!
//! The heuristic detector below is the only detection tier this service
//! implements — script-range matching over Unicode blocks. Statistical and
//! ML-backed detectors (cld3, langdetect) are treated as the external
//! language-detection engines the orchestration layer sits in front of, not
//! something this crate reimplements.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Underscore-separated inputs that should be read as hyphen-separated
/// before alias lookup.
static SIMPLE_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("en_GB", "en-GB"),
        ("en_US", "en-US"),
        ("pt_BR", "pt-BR"),
        ("pt_PT", "pt-PT"),
        ("de_AT", "de-AT"),
        ("de_CH", "de-CH"),
        ("fr_CA", "fr-CA"),
        ("es_MX", "es-MX"),
        ("es_AR", "es-AR"),
        ("zh_CN", "zh-CN"),
        ("zh_TW", "zh-TW"),
        ("zh_HK", "zh-HK"),
        ("sr_Latn", "sr-Latn"),
        ("sr_Cyrl", "sr-Cyrl"),
    ]
    .into_iter()
    .collect()
});

/// BCP-47 aliasing table: regional/script variants that collapse to a
/// canonical tag, plus the identity entries for every supported base
/// language (kept explicit so `canonicalize` rejects unknown codes cleanly).
static BCP47_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, &'static str> = HashMap::new();
    m.insert("en-GB", "en-GB");
    m.insert("en-US", "en");
    m.insert("pt-BR", "pt-BR");
    m.insert("pt-PT", "pt-PT");
    m.insert("de-AT", "de-AT");
    m.insert("de-CH", "de-CH");
    m.insert("fr-CA", "fr-CA");
    m.insert("es-MX", "es-MX");
    m.insert("es-AR", "es-AR");
    m.insert("sr-Latn", "sr-Latn");
    m.insert("sr-Cyrl", "sr-Cyrl");
    m.insert("zh-CN", "zh-Hans");
    m.insert("zh-TW", "zh-Hant");
    m.insert("zh-HK", "zh-Hant-HK");
    m.insert("zh-SG", "zh-Hans-SG");
    m.insert("zh-MO", "zh-Hant-MO");
    m
});

/// Chinese topolects that the engine speaks only as `zh`.
static ZH_TOPOLECTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "cmn", "cdo", "cjy", "hsn", "cpx", "czh", "czo", "gan", "hak", "nan", "wuu", "yue",
    ]
});

/// Result of parsing a raw language code into its BCP-47 components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    pub input: String,
    pub lang: Option<String>,
    pub script: Option<String>,
    pub region: Option<String>,
    pub bcp47: Option<String>,
    pub alias_applied: bool,
}

/// Parse `code` into canonical BCP-47 components, applying the alias table.
pub fn canonicalize(code: &str) -> Canonical {
    if code.is_empty() {
        return Canonical {
            input: code.to_string(),
            lang: None,
            script: None,
            region: None,
            bcp47: None,
            alias_applied: false,
        };
    }

    let original = code.to_string();
    let mut working = code.to_string();
    let mut alias_applied = false;

    if let Some(mapped) = SIMPLE_MAP.get(working.as_str()) {
        working = mapped.to_string();
        alias_applied = true;
    }

    let lowered = working.to_lowercase();
    if matches!(
        lowered.as_str(),
        "zh-cn" | "zh-tw" | "zh-hk" | "zh-sg" | "zh-mo"
    ) {
        working = lowered;
        alias_applied = true;
    }

    if let Some(mapped) = BCP47_ALIASES.get(working.as_str()) {
        working = mapped.to_string();
        alias_applied = true;
    }

    let parts: Vec<&str> = working.split('-').collect();
    let lang = parts.first().map(|s| s.to_lowercase());

    let mut script = None;
    let mut region = None;
    if parts.len() > 1 {
        let second = parts[1];
        if second.len() == 4 && second.chars().next().is_some_and(|c| c.is_uppercase()) {
            script = Some(second.to_string());
            if parts.len() > 2 {
                region = Some(parts[2].to_uppercase());
            }
        } else {
            region = Some(second.to_uppercase());
            if parts.len() > 2 {
                script = Some(parts[2].to_string());
            }
        }
    }

    let mut bcp47_parts = Vec::new();
    if let Some(l) = &lang {
        bcp47_parts.push(l.clone());
    }
    if let Some(s) = &script {
        bcp47_parts.push(s.clone());
    }
    if let Some(r) = &region {
        bcp47_parts.push(r.clone());
    }
    let bcp47 = if bcp47_parts.is_empty() {
        None
    } else {
        Some(bcp47_parts.join("-"))
    };

    Canonical {
        input: original,
        lang,
        script,
        region,
        bcp47,
        alias_applied,
    }
}

/// Map a canonical BCP-47 tag to the code the MT worker expects. Regional
/// and script subtags collapse to their base language; Chinese topolects
/// fold to `zh`.
pub fn engine_lang_from_bcp47(bcp47: &str) -> String {
    if bcp47.is_empty() {
        return "en".to_string();
    }
    let lang = bcp47.split('-').next().unwrap_or("en").to_lowercase();
    if ZH_TOPOLECTS.contains(&lang.as_str()) {
        "zh".to_string()
    } else {
        lang
    }
}

/// `{input, bcp47, engine}` triple used throughout the request pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedLang {
    pub input: String,
    pub bcp47: String,
    pub engine: String,
}

/// Canonicalize and resolve an engine code for `code` in one step.
pub fn normalize_lang_input(code: &str) -> NormalizedLang {
    if code.is_empty() {
        return NormalizedLang {
            input: code.to_string(),
            bcp47: "en".to_string(),
            engine: "en".to_string(),
        };
    }
    let canon = canonicalize(code);
    let bcp47 = canon.bcp47.unwrap_or_else(|| "en".to_string());
    let engine = engine_lang_from_bcp47(&bcp47);
    NormalizedLang {
        input: canon.input,
        bcp47,
        engine,
    }
}

/// One Accept-Language entry after RFC 7231 parsing, sorted by `q` descending.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptEntry {
    pub code: String,
    pub q: f64,
}

static Q_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"q=([0-9.]+)").unwrap());

pub fn parse_accept_language(header: &str) -> Vec<AcceptEntry> {
    if header.trim().is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (code, q) = if let Some((lang_part, q_part)) = part.split_once(';') {
            let q = Q_RE
                .captures(q_part)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .unwrap_or(1.0);
            (lang_part.trim().to_string(), q)
        } else {
            (part.to_string(), 1.0)
        };
        if !code.is_empty() && q >= 0.0 {
            out.push(AcceptEntry { code, q });
        }
    }
    out.sort_by(|a, b| b.q.partial_cmp(&a.q).unwrap_or(std::cmp::Ordering::Equal));
    out
}

/// One detection candidate: language code, confidence score, reliability.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Candidate {
    pub lang: String,
    pub score: f64,
    pub reliable: bool,
    pub bcp47: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Recommendation {
    pub bcp47: String,
    pub from: &'static str,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Detection {
    pub engine: &'static str,
    pub candidates: Vec<Candidate>,
    pub recommendation: Recommendation,
}

fn ascii_quote(text: &str) -> f64 {
    static ASCII_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9 ,.;:!?$%/()-]").unwrap());
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    ASCII_RE.find_iter(text).count() as f64 / total as f64
}

fn build_recommendation(candidates: &mut [Candidate], accept_lang: &[String]) -> Recommendation {
    if candidates.is_empty() {
        return Recommendation {
            bcp47: "en".to_string(),
            from: "fallback",
        };
    }
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let mut best = candidates[0].clone();

    for accept_code in accept_lang {
        let accept_canon = canonicalize(accept_code);
        let Some(prefix) = accept_canon.lang else {
            continue;
        };
        let mut matched = false;
        for cand in candidates.iter() {
            if cand.lang == prefix && best.score - cand.score <= 0.25 {
                best = cand.clone();
                matched = true;
                break;
            }
        }
        if matched && best.lang == prefix {
            break;
        }
    }

    let mut rec = Recommendation {
        bcp47: best.bcp47.clone(),
        from: "model",
    };

    if best.lang == "en" {
        for accept_code in accept_lang {
            let accept_canon = canonicalize(accept_code);
            if accept_canon.lang.as_deref() == Some("en") {
                if let Some(region) = accept_canon.region {
                    rec.bcp47 = format!("en-{region}");
                    rec.from = "accept-language";
                    break;
                }
            }
        }
    }

    rec
}

/// Script-range heuristic fallback, used directly as the `/detect` engine.
pub fn detect_lang(text: &str, accept_lang: &[String]) -> Detection {
    if text.trim().is_empty() {
        let mut candidates = vec![Candidate {
            lang: "en".to_string(),
            score: 0.5,
            reliable: false,
            bcp47: "en".to_string(),
        }];
        let recommendation = build_recommendation(&mut candidates, accept_lang);
        return Detection {
            engine: "heuristic",
            candidates,
            recommendation,
        };
    }

    let ranges: &[(&str, char, char, f64, &str)] = &[
        ("hi", '\u{0900}', '\u{097F}', 0.8, "hi"),
        ("ko", '\u{AC00}', '\u{D7AF}', 0.8, "ko"),
        ("zh", '\u{4E00}', '\u{9FFF}', 0.7, "zh"),
        ("ja", '\u{3040}', '\u{30FF}', 0.8, "ja"),
        ("ar", '\u{0600}', '\u{06FF}', 0.7, "ar"),
        ("th", '\u{0E00}', '\u{0E7F}', 0.8, "th"),
    ];

    for (lang, lo, hi, score, bcp47) in ranges {
        if text.chars().any(|c| c >= *lo && c <= *hi) {
            let mut candidates = vec![Candidate {
                lang: lang.to_string(),
                score: *score,
                reliable: true,
                bcp47: bcp47.to_string(),
            }];
            let recommendation = build_recommendation(&mut candidates, accept_lang);
            return Detection {
                engine: "heuristic",
                candidates,
                recommendation,
            };
        }
    }

    let quote = ascii_quote(text);
    let en_score = 0.5 + quote * 0.3;
    let mut candidates = vec![Candidate {
        lang: "en".to_string(),
        score: en_score,
        reliable: quote > 0.7,
        bcp47: "en".to_string(),
    }];
    let recommendation = build_recommendation(&mut candidates, accept_lang);
    Detection {
        engine: "heuristic",
        candidates,
        recommendation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_en_us_collapses_to_en() {
        let c = canonicalize("en-US");
        assert_eq!(c.bcp47.as_deref(), Some("en"));
        assert!(c.alias_applied);
    }

    #[test]
    fn canonicalize_zh_cn_maps_to_zh_hans() {
        let c = canonicalize("zh-CN");
        assert_eq!(c.bcp47.as_deref(), Some("zh-Hans"));
    }

    #[test]
    fn canonicalize_parses_region_without_alias() {
        let c = canonicalize("fr-BE");
        assert_eq!(c.lang.as_deref(), Some("fr"));
        assert_eq!(c.region.as_deref(), Some("BE"));
        assert_eq!(c.bcp47.as_deref(), Some("fr-BE"));
    }

    #[test]
    fn engine_lang_folds_topolects_to_zh() {
        assert_eq!(engine_lang_from_bcp47("yue-HK"), "zh");
        assert_eq!(engine_lang_from_bcp47("cmn"), "zh");
        assert_eq!(engine_lang_from_bcp47("de-AT"), "de");
    }

    #[test]
    fn normalize_lang_input_round_trips() {
        let n = normalize_lang_input("pt-BR");
        assert_eq!(n.bcp47, "pt-BR");
        assert_eq!(n.engine, "pt");
    }

    #[test]
    fn parse_accept_language_sorts_by_q() {
        let entries = parse_accept_language("en-GB,en;q=0.8,de;q=0.9");
        assert_eq!(entries[0].code, "en-GB");
        assert_eq!(entries[1].code, "de");
        assert_eq!(entries[2].code, "en");
    }

    #[test]
    fn detect_lang_empty_text_falls_back_to_english() {
        let d = detect_lang("", &[]);
        assert_eq!(d.engine, "heuristic");
        assert_eq!(d.candidates[0].lang, "en");
        assert!(!d.candidates[0].reliable);
    }

    #[test]
    fn detect_lang_recognizes_cjk_block() {
        let d = detect_lang("你好世界", &[]);
        assert_eq!(d.candidates[0].lang, "zh");
        assert_eq!(d.recommendation.bcp47, "zh");
    }

    #[test]
    fn detect_lang_recognizes_hangul() {
        let d = detect_lang("안녕하세요", &[]);
        assert_eq!(d.candidates[0].lang, "ko");
    }

    #[test]
    fn detect_lang_prefers_accept_language_within_margin() {
        let d = detect_lang("Plain ascii text with no strong signal.", &["de".to_string()]);
        assert_eq!(d.recommendation.from, "model");
        assert_eq!(d.candidates[0].lang, "en");
    }
}
