//! Prometheus-text-format counters exposed at `/metrics`.
//!
//! Mirrors the upstream service's process-global counters: a handful of
//! scalar totals plus a few label-keyed maps (per-target-locale, per-degrade
//! -reason). Kept process-wide rather than per-request since that is what a
//! scrape expects to read.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);

static REQUESTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static ERRORS_TOTAL: AtomicU64 = AtomicU64::new(0);
static LATENCY_SUM_MICROS: AtomicU64 = AtomicU64::new(0);
static LATENCY_COUNT: AtomicU64 = AtomicU64::new(0);

static SPANS_ONLY_TOTAL: Lazy<Mutex<HashMap<String, u64>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static DEGRADE_TOTAL: Lazy<Mutex<HashMap<String, u64>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static GLOSSARY_MISSING_TOTAL: Lazy<Mutex<HashMap<String, u64>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static GLOSSARY_REPLACED_TOTAL: Lazy<Mutex<HashMap<String, u64>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn bump(map: &Mutex<HashMap<String, u64>>, key: &str, n: u64) {
    let mut guard = map.lock().unwrap();
    *guard.entry(key.to_string()).or_insert(0) += n;
}

/// Record one completed request and its latency.
pub fn record_request(elapsed: std::time::Duration, is_error: bool) {
    REQUESTS_TOTAL.fetch_add(1, Ordering::Relaxed);
    if is_error {
        ERRORS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }
    LATENCY_SUM_MICROS.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    LATENCY_COUNT.fetch_add(1, Ordering::Relaxed);
}

pub fn record_spans_only(target_bcp47: &str) {
    bump(&SPANS_ONLY_TOTAL, target_bcp47, 1);
}

pub fn record_degrade(reason: &str) {
    if reason.is_empty() {
        return;
    }
    bump(&DEGRADE_TOTAL, reason, 1);
}

pub fn record_glossary_missing(target_bcp47: &str, n: u64) {
    if n > 0 {
        bump(&GLOSSARY_MISSING_TOTAL, target_bcp47, n);
    }
}

pub fn record_glossary_replaced(target_bcp47: &str, n: u64) {
    if n > 0 {
        bump(&GLOSSARY_REPLACED_TOTAL, target_bcp47, n);
    }
}

fn render_labeled(name: &str, label: &str, map: &Mutex<HashMap<String, u64>>) -> String {
    let guard = map.lock().unwrap();
    let mut keys: Vec<&String> = guard.keys().collect();
    keys.sort();
    let mut out = String::new();
    for key in keys {
        let v = guard[key];
        out.push_str(&format!("{name}{{{label}=\"{key}\"}} {v}\n"));
    }
    out
}

/// Render the full Prometheus text-exposition body.
pub fn render() -> String {
    let up = STARTED_AT.elapsed().as_secs();
    let requests = REQUESTS_TOTAL.load(Ordering::Relaxed);
    let errors = ERRORS_TOTAL.load(Ordering::Relaxed);
    let lat_sum = LATENCY_SUM_MICROS.load(Ordering::Relaxed) as f64 / 1_000_000.0;
    let lat_n = LATENCY_COUNT.load(Ordering::Relaxed);
    let avg = if lat_n > 0 { lat_sum / lat_n as f64 } else { 0.0 };

    let mut body = format!(
        "anni_uptime_seconds {up}\n\
         anni_requests_total {requests}\n\
         anni_errors_total {errors}\n\
         anni_translate_latency_seconds_avg {avg:.3}\n"
    );

    body.push_str(&render_labeled("anni_spans_only_total", "target", &SPANS_ONLY_TOTAL));
    body.push_str(&render_labeled("anni_degrade_total", "reason", &DEGRADE_TOTAL));
    body.push_str(&render_labeled(
        "anni_glossary_missing_total",
        "target",
        &GLOSSARY_MISSING_TOTAL,
    ));
    body.push_str(&render_labeled(
        "anni_glossary_replaced_total",
        "target",
        &GLOSSARY_REPLACED_TOTAL,
    ));
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_scalar_counters() {
        let body = render();
        assert!(body.contains("anni_uptime_seconds"));
        assert!(body.contains("anni_requests_total"));
    }

    #[test]
    fn labeled_counters_appear_after_bump() {
        record_spans_only("ja-JP-metrics-test");
        record_degrade("gibberish-metrics-test");
        let body = render();
        assert!(body.contains("anni_spans_only_total{target=\"ja-JP-metrics-test\"}"));
        assert!(body.contains("anni_degrade_total{reason=\"gibberish-metrics-test\"}"));
    }

    #[test]
    fn glossary_counters_ignore_zero() {
        record_glossary_missing("zz-zero-test", 0);
        let body = render();
        assert!(!body.contains("zz-zero-test"));
    }
}
