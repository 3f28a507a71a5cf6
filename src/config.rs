//! Runtime configuration.
//!
//! Every switch in this module corresponds to one of the environment
//! variables listed under "Configuration & environment" — values are read
//! once at startup (`load_config`) and then travel immutably inside
//! `AppState` for the lifetime of the process.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => !matches!(v.as_str(), "0" | "" | "false" | "False"),
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_csv_set(key: &str) -> HashSet<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub mt_backend: String,
    pub mt_timeout_secs: u64,
    pub max_workers_guard: usize,
    pub worker_timeout_secs: u64,
    pub enable_worker_batch: bool,
    pub batch_concurrency: usize,

    pub strict_invariants: bool,
    pub strict_invariants_exclude: HashSet<String>,

    pub cache_enable: bool,
    pub cache_max: usize,
    pub cache_ttl_secs: u64,

    pub glossary_enable: bool,
    pub glossary_path: String,
    pub glossary_terms: String,

    pub enable_style_filter: bool,
    pub style_langs: String,
    pub style_default_address: String,
    pub style_default_gender: String,
    pub style_keep_terms: String,

    pub cb_enable: bool,
    pub cb_max_retries: u32,

    pub spans_only_force_bcp47: HashSet<String>,
    pub spans_only_force_engines: HashSet<String>,

    pub pivot_langs: HashSet<String>,
    pub pivot_mid_lang: String,
    pub leak_latin_max: f64,

    pub locales_public_path: Option<String>,
    pub locales_extra: String,
    pub locales_disable: String,
    pub public_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,

            mt_backend: "http://127.0.0.1:8093".into(),
            mt_timeout_secs: 60,
            max_workers_guard: 3,
            worker_timeout_secs: 60,
            enable_worker_batch: true,
            batch_concurrency: 8,

            strict_invariants: false,
            strict_invariants_exclude: HashSet::new(),

            cache_enable: true,
            cache_max: 5000,
            cache_ttl_secs: 86_400,

            glossary_enable: false,
            glossary_path: String::new(),
            glossary_terms: String::new(),

            enable_style_filter: true,
            style_langs: "de".into(),
            style_default_address: "auto".into(),
            style_default_gender: "none".into(),
            style_keep_terms: "TranceLate".into(),

            cb_enable: true,
            cb_max_retries: 0,

            spans_only_force_bcp47: HashSet::new(),
            spans_only_force_engines: HashSet::new(),

            pivot_langs: ["km", "lo", "my"].into_iter().map(String::from).collect(),
            pivot_mid_lang: "en".into(),
            leak_latin_max: 0.15,

            locales_public_path: None,
            locales_extra: String::new(),
            locales_disable: String::new(),
            public_dir: None,
        }
    }
}

/// Load configuration from the process environment, layered over defaults.
pub fn load_config() -> Config {
    let mut c = Config::default();

    c.host = env_str("HOST", &c.host);
    c.port = env_u64("PORT", c.port as u64) as u16;

    c.mt_backend = env_str("MT_BACKEND", &c.mt_backend);
    c.mt_timeout_secs = env_u64("MT_TIMEOUT", c.mt_timeout_secs);
    c.max_workers_guard = env_u64("MAX_WORKERS_GUARD", c.max_workers_guard as u64) as usize;
    c.worker_timeout_secs = env_f64("WORKER_TIMEOUT_S", c.worker_timeout_secs as f64) as u64;
    c.enable_worker_batch = env_bool("ENABLE_WORKER_BATCH", c.enable_worker_batch);
    c.batch_concurrency = env_u64("BATCH_CONCURRENCY", c.batch_concurrency as u64) as usize;

    c.strict_invariants = env_bool("STRICT_INVARIANTS", c.strict_invariants);
    c.strict_invariants_exclude = env_csv_set("STRICT_INVARIANTS_EXCLUDE");

    c.cache_enable = env_bool("CACHE_ENABLE", c.cache_enable);
    c.cache_max = env_u64("CACHE_MAX", c.cache_max as u64) as usize;
    c.cache_ttl_secs = env_u64("CACHE_TTL", c.cache_ttl_secs);

    c.glossary_enable = env_bool("GLOSSARY_ENABLE", c.glossary_enable);
    c.glossary_path = env_str("GLOSSARY_PATH", &c.glossary_path);
    c.glossary_terms = env_str("GLOSSARY_TERMS", &c.glossary_terms);

    c.enable_style_filter = env_bool("ENABLE_STYLE_FILTER", c.enable_style_filter);
    c.style_langs = env_str("STYLE_LANGS", &c.style_langs);
    c.style_default_address = env_str("STYLE_DEFAULT_ADDRESS", &c.style_default_address);
    c.style_default_gender = env_str("STYLE_DEFAULT_GENDER", &c.style_default_gender);
    c.style_keep_terms = env_str("STYLE_KEEP_TERMS", &c.style_keep_terms);

    c.cb_enable = env_bool("CB_ENABLE", c.cb_enable);
    c.cb_max_retries = env_u64("CB_MAX_RETRIES", c.cb_max_retries as u64) as u32;

    let spans_bcp47 = env_csv_set("SPANS_ONLY_FORCE");
    if !spans_bcp47.is_empty() {
        c.spans_only_force_bcp47 = spans_bcp47;
    }
    let spans_engines = env_csv_set("SPANS_ONLY_FORCE_ENGINES");
    if !spans_engines.is_empty() {
        c.spans_only_force_engines = spans_engines;
    }

    let pivot_langs = env_csv_set("PIVOT_LANGS");
    if !pivot_langs.is_empty() {
        c.pivot_langs = pivot_langs;
    }
    c.pivot_mid_lang = env_str("PIVOT_MID_LANG", &c.pivot_mid_lang);
    c.leak_latin_max = env_f64("LEAK_LATIN_MAX", c.leak_latin_max);

    c.locales_public_path = std::env::var("LOCALES_PUBLIC_PATH").ok();
    c.locales_extra = env_str("LOCALES_EXTRA", &c.locales_extra);
    c.locales_disable = env_str("LOCALES_DISABLE", &c.locales_disable);
    c.public_dir = std::env::var("PUBLIC_DIR").ok();

    c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_settings() {
        let c = Config::default();
        assert_eq!(c.mt_backend, "http://127.0.0.1:8093");
        assert_eq!(c.cache_max, 5000);
        assert_eq!(c.cache_ttl_secs, 86_400);
        assert!(c.enable_worker_batch);
        assert!(c.cb_enable);
        assert_eq!(c.style_default_gender, "none");
        assert!(c.pivot_langs.contains("km"));
        assert_eq!(c.leak_latin_max, 0.15);
    }

    #[test]
    fn env_bool_parses_falsy_values() {
        std::env::set_var("TEST_GUARD_BOOL_FLAG", "0");
        assert!(!env_bool("TEST_GUARD_BOOL_FLAG", true));
        std::env::set_var("TEST_GUARD_BOOL_FLAG", "false");
        assert!(!env_bool("TEST_GUARD_BOOL_FLAG", true));
        std::env::set_var("TEST_GUARD_BOOL_FLAG", "1");
        assert!(env_bool("TEST_GUARD_BOOL_FLAG", false));
        std::env::remove_var("TEST_GUARD_BOOL_FLAG");
    }

    #[test]
    fn env_csv_set_trims_and_drops_empty() {
        std::env::set_var("TEST_GUARD_CSV", " ru, bg ,,uk ");
        let set = env_csv_set("TEST_GUARD_CSV");
        assert_eq!(set.len(), 3);
        assert!(set.contains("ru"));
        assert!(set.contains("bg"));
        assert!(set.contains("uk"));
        std::env::remove_var("TEST_GUARD_CSV");
    }
}
