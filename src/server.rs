//! HTTP service: axum router, shared application state, and the endpoint
//! handlers listed under the external interfaces.

use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::cache::LruCache;
use crate::config::Config;
use crate::error::{GuardError, Result};
use crate::glossary::{self, GlossaryTerm};
use crate::lang;
use crate::locales;
use crate::metrics;
use crate::orchestrator::{self, TranslateRequest};
use crate::worker::WorkerClient;

/// Everything a request handler needs, shared across the connection pool.
/// The glossary and locales snapshots sit behind a `RwLock<Arc<_>>` so
/// `/admin/reload` can publish a new immutable snapshot without blocking
/// in-flight requests, which keep reading the `Arc` they already cloned.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub worker: Arc<WorkerClient>,
    pub cache: Arc<LruCache>,
    pub glossary_terms: Arc<RwLock<Arc<Vec<GlossaryTerm>>>>,
    pub locales_json: Arc<RwLock<Arc<Option<serde_json::Value>>>>,
    pub version: serde_json::Value,
    pub commit: String,
}

impl AppState {
    fn glossary_snapshot(&self) -> Arc<Vec<GlossaryTerm>> {
        self.glossary_terms.read().unwrap().clone()
    }

    fn locales_snapshot(&self) -> Arc<Option<serde_json::Value>> {
        self.locales_json.read().unwrap().clone()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/meta", get(meta))
        .route("/capabilities", get(capabilities))
        .route("/locales", get(locales_json))
        .route("/locales.csv", get(locales_csv))
        .route("/cache/stats", get(cache_stats))
        .route("/metrics", get(metrics_text))
        .route("/translate", post(translate))
        .route("/translate_batch", post(translate_batch))
        .route("/detect", post(detect_post).get(detect_get))
        .route("/admin/reload", post(admin_reload))
        .with_state(state)
}

async fn root() -> &'static str {
    "trancelate-guard is running"
}

fn locales_disable_set(cfg: &Config) -> HashSet<String> {
    cfg.locales_disable
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn locales_extra_vec(cfg: &Config) -> Vec<String> {
    cfg.locales_extra
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let backend_alive = state.worker.ping_health().await;
    Json(serde_json::json!({
        "ok": true,
        "ready": true,
        "backend_alive": backend_alive,
        "backend_url": state.worker.backend_url(),
        "version": state.version,
        "commit": state.commit,
    }))
}

async fn meta(State(state): State<AppState>) -> impl IntoResponse {
    let disable = locales_disable_set(&state.cfg);
    let extra = locales_extra_vec(&state.cfg);
    let locales_snapshot = state.locales_snapshot();
    let caps = locales::compute_capabilities(
        state.version.clone(),
        locales_snapshot.as_ref().as_ref(),
        &extra,
        &disable,
    );
    Json(serde_json::json!({
        "version": caps.version,
        "locales_count": caps.features.locales_count,
        "engines": caps.features.engines,
    }))
}

async fn capabilities(State(state): State<AppState>) -> impl IntoResponse {
    let disable = locales_disable_set(&state.cfg);
    let extra = locales_extra_vec(&state.cfg);
    let locales_snapshot = state.locales_snapshot();
    let caps = locales::compute_capabilities(
        state.version.clone(),
        locales_snapshot.as_ref().as_ref(),
        &extra,
        &disable,
    );
    Json(caps)
}

async fn locales_json(State(state): State<AppState>) -> impl IntoResponse {
    let disable = locales_disable_set(&state.cfg);
    let extra = locales_extra_vec(&state.cfg);
    let locales_snapshot = state.locales_snapshot();
    let codes = locales::load_locales_list(locales_snapshot.as_ref().as_ref(), &extra, &disable);
    Json(locales::map_locales_with_engine(&codes))
}

async fn locales_csv(State(state): State<AppState>) -> impl IntoResponse {
    let disable = locales_disable_set(&state.cfg);
    let extra = locales_extra_vec(&state.cfg);
    let locales_snapshot = state.locales_snapshot();
    let codes = locales::load_locales_list(locales_snapshot.as_ref().as_ref(), &extra, &disable);
    let entries = locales::map_locales_with_engine(&codes);
    let mut body = String::from("bcp47,engine\n");
    for e in entries {
        body.push_str(&format!("{},{}\n", e.bcp47, e.engine));
    }
    (
        [("content-type", "text/csv")],
        body,
    )
}

async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.cache.stats();
    Json(serde_json::json!({
        "size": stats.size,
        "hits": stats.hits,
        "misses": stats.misses,
        "evictions": stats.evictions,
    }))
}

async fn metrics_text() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

/// Re-read the glossary and locales files from disk and publish fresh
/// immutable snapshots. Requests already holding the old `Arc` finish
/// against it; only requests starting after this point see the reload.
async fn admin_reload(State(state): State<AppState>) -> impl IntoResponse {
    let cfg = &state.cfg;

    let new_terms = if cfg.glossary_enable {
        glossary::load_terms(
            (!cfg.glossary_path.is_empty()).then_some(cfg.glossary_path.as_str()),
            (!cfg.glossary_terms.is_empty()).then_some(cfg.glossary_terms.as_str()),
        )
    } else {
        Vec::new()
    };
    let terms_count = new_terms.len();
    *state.glossary_terms.write().unwrap() = Arc::new(new_terms);

    let new_locales = cfg
        .locales_public_path
        .as_ref()
        .and_then(|path| locales::load_locales_json_file(path));
    let locales_loaded = new_locales.is_some();
    *state.locales_json.write().unwrap() = Arc::new(new_locales);

    tracing::info!(terms_count, locales_loaded, "admin reload published new snapshot");

    Json(serde_json::json!({
        "ok": true,
        "glossary_terms": terms_count,
        "locales_reloaded": locales_loaded,
    }))
}

#[derive(Debug, Deserialize, Default)]
struct ContextPayload {
    #[serde(default)]
    keep_terms: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StylePayload {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    keep_terms: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GlossaryTermPayload {
    term: String,
    #[serde(default)]
    canonical: Option<String>,
    #[serde(default)]
    langs: Option<Vec<String>>,
    #[serde(default)]
    regex: bool,
}

#[derive(Debug, Deserialize, Default)]
struct GlossaryPayload {
    #[serde(default)]
    terms: Vec<GlossaryTermPayload>,
}

#[derive(Debug, Deserialize)]
struct TranslatePayload {
    source: String,
    target: String,
    text: String,
    #[serde(default)]
    #[allow(dead_code)]
    max_new_tokens: Option<u32>,
    #[serde(default)]
    debug: bool,
    #[serde(default)]
    context: Option<ContextPayload>,
    #[serde(default)]
    style: Option<StylePayload>,
    #[serde(default)]
    glossary: Option<GlossaryPayload>,
}

fn validate_source(source: &str) -> Result<()> {
    if source.trim().eq_ignore_ascii_case("auto") {
        return Err(GuardError::InvalidInput(
            "source language 'auto' is not accepted; detect first via /detect".to_string(),
        ));
    }
    Ok(())
}

fn resolve_glossary_terms(
    cfg: &Config,
    server_terms: &[GlossaryTerm],
    payload_glossary: &Option<GlossaryPayload>,
) -> Vec<GlossaryTerm> {
    let mut terms = if cfg.glossary_enable {
        server_terms.to_vec()
    } else {
        Vec::new()
    };
    if let Some(g) = payload_glossary {
        for t in &g.terms {
            if t.term.is_empty() {
                continue;
            }
            terms.push(GlossaryTerm {
                term: t.term.clone(),
                canonical: t.canonical.clone().unwrap_or_else(|| t.term.clone()),
                langs: t.langs.clone().unwrap_or_else(|| vec!["*".to_string()]),
                is_regex: t.regex,
            });
        }
    }
    terms
}

fn resolve_keep_terms(cfg: &Config, context: &Option<ContextPayload>, style: &Option<StylePayload>) -> HashSet<String> {
    let mut out: HashSet<String> = cfg
        .style_keep_terms
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if let Some(c) = context {
        out.extend(c.keep_terms.iter().cloned());
    }
    if let Some(s) = style {
        out.extend(s.keep_terms.iter().cloned());
    }
    out
}

fn strict_excluded(cfg: &Config, bcp47: &str, engine: &str) -> bool {
    cfg.strict_invariants_exclude.contains(bcp47) || cfg.strict_invariants_exclude.contains(engine)
}

async fn translate(State(state): State<AppState>, Json(payload): Json<TranslatePayload>) -> Response {
    let start = Instant::now();
    let result = run_translate(&state, payload).await;
    let is_error = result.is_err();
    metrics::record_request(start.elapsed(), is_error);
    match result {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn run_translate(state: &AppState, payload: TranslatePayload) -> Result<Response> {
    validate_source(&payload.source)?;

    let norm_src = lang::normalize_lang_input(&payload.source);
    let norm_tgt = lang::normalize_lang_input(&payload.target);

    let style = payload.style.as_ref();
    let address = style
        .and_then(|s| s.address.clone())
        .unwrap_or_else(|| state.cfg.style_default_address.clone());
    let gender = style
        .and_then(|s| s.gender.clone())
        .unwrap_or_else(|| state.cfg.style_default_gender.clone());
    let keep_terms = resolve_keep_terms(&state.cfg, &payload.context, &payload.style);
    let glossary_snapshot = state.glossary_snapshot();
    let terms = resolve_glossary_terms(&state.cfg, &glossary_snapshot, &payload.glossary);

    let req = TranslateRequest {
        text: payload.text.clone(),
        src_engine: norm_src.engine.clone(),
        tgt_bcp47: norm_tgt.bcp47.clone(),
        tgt_engine: norm_tgt.engine.clone(),
        address,
        gender,
        keep_terms,
    };

    let outcome = orchestrator::translate(&state.worker, &state.cache, &state.cfg, &terms, &req).await?;

    if outcome.debug.degrade_reason.is_some() {
        metrics::record_degrade(outcome.debug.degrade_reason.as_deref().unwrap_or(""));
    }
    if outcome.debug.strategy == "spans_only" || outcome.debug.strategy == "force_spans_only" {
        metrics::record_spans_only(&norm_tgt.bcp47);
    }
    metrics::record_glossary_missing(&norm_tgt.bcp47, outcome.debug.glossary_missing as u64);
    metrics::record_glossary_replaced(&norm_tgt.bcp47, outcome.debug.glossary_replaced as u64);

    let status = if state.cfg.strict_invariants
        && !outcome.checks.ok
        && !strict_excluded(&state.cfg, &norm_tgt.bcp47, &norm_tgt.engine)
    {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };

    let mut checks_json = serde_json::to_value(&outcome.checks).unwrap_or(serde_json::Value::Null);
    if let serde_json::Value::Object(ref mut map) = checks_json {
        map.insert(
            "freeze".to_string(),
            serde_json::json!({
                "replaced_total": outcome.debug.invariant_replaced,
                "missing": outcome.debug.invariant_missing,
            }),
        );
        map.insert("fallback_used".to_string(), serde_json::json!(outcome.debug.strategy));
        if outcome.debug.glossary_replaced > 0 || outcome.debug.glossary_missing > 0 {
            map.insert(
                "glossary".to_string(),
                serde_json::json!({
                    "replaced_total": outcome.debug.glossary_replaced,
                    "missing": outcome.debug.glossary_missing,
                }),
            );
        }
    }

    let mut body = serde_json::json!({
        "translated_text": outcome.text,
        "checks": checks_json,
    });
    if payload.debug {
        body["debug"] = serde_json::json!({
            "strategy": outcome.debug.strategy,
            "degrade_reason": outcome.debug.degrade_reason,
            "attempts": outcome.debug.attempts,
            "cache_hit": outcome.debug.cache_hit,
            "glossary_replaced": outcome.debug.glossary_replaced,
            "glossary_missing": outcome.debug.glossary_missing,
        });
    }

    let mut resp = (status, Json(body)).into_response();
    let headers = resp.headers_mut();
    insert_header(headers, "x-source-lang", &norm_src.bcp47);
    insert_header(headers, "x-source-engine-lang", &norm_src.engine);
    insert_header(headers, "x-target-lang", &norm_tgt.bcp47);
    insert_header(headers, "x-target-engine-lang", &norm_tgt.engine);
    if state.cfg.cache_enable {
        insert_header(headers, "x-cache", if outcome.debug.cache_hit { "hit" } else { "miss_store" });
    }
    if payload.debug {
        insert_header(headers, "x-fallback", &outcome.debug.strategy);
        insert_header(headers, "x-glossary-replaced", &outcome.debug.glossary_replaced.to_string());
        insert_header(headers, "x-glossary-missing", &outcome.debug.glossary_missing.to_string());
    }
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        if let Ok(v) = serde_json::to_string(&outcome.checks) {
            insert_header(headers, "x-invariant-checks", &v);
        }
    }
    Ok(resp)
}

fn insert_header(headers: &mut axum::http::HeaderMap, name: &'static str, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(name, v);
    }
}

#[derive(Debug, Deserialize)]
struct BatchItemPayload {
    source: String,
    target: String,
    text: String,
    #[serde(default)]
    debug: bool,
    #[serde(default)]
    context: Option<ContextPayload>,
    #[serde(default)]
    style: Option<StylePayload>,
    #[serde(default)]
    glossary: Option<GlossaryPayload>,
}

#[derive(Debug, Deserialize)]
struct BatchPayload {
    items: Vec<BatchItemPayload>,
}

const MAX_BATCH_ITEMS: usize = 200;
const MAX_ITEM_CHARS: usize = 2000;

async fn translate_batch(State(state): State<AppState>, Json(payload): Json<BatchPayload>) -> Response {
    let start = Instant::now();
    let result = run_translate_batch(&state, payload).await;
    let is_error = result.is_err();
    metrics::record_request(start.elapsed(), is_error);
    match result {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn run_translate_batch(state: &AppState, payload: BatchPayload) -> Result<Response> {
    if payload.items.is_empty() {
        return Err(GuardError::InvalidInput("batch request has no items".to_string()));
    }
    if payload.items.len() > MAX_BATCH_ITEMS {
        return Err(GuardError::InvalidInput(format!(
            "batch size {} exceeds the {} item limit",
            payload.items.len(),
            MAX_BATCH_ITEMS
        )));
    }
    for item in &payload.items {
        validate_source(&item.source)?;
        if item.text.chars().count() > MAX_ITEM_CHARS {
            return Err(GuardError::InvalidInput(format!(
                "item text exceeds the {MAX_ITEM_CHARS} character limit"
            )));
        }
    }

    use futures::stream::{self, StreamExt};
    let concurrency = state.cfg.batch_concurrency.max(1);

    let results = stream::iter(payload.items.into_iter().enumerate())
        .map(|(i, item)| {
            let state = state.clone();
            async move {
                let norm_src = lang::normalize_lang_input(&item.source);
                let norm_tgt = lang::normalize_lang_input(&item.target);
                let style = item.style.as_ref();
                let address = style
                    .and_then(|s| s.address.clone())
                    .unwrap_or_else(|| state.cfg.style_default_address.clone());
                let gender = style
                    .and_then(|s| s.gender.clone())
                    .unwrap_or_else(|| state.cfg.style_default_gender.clone());
                let keep_terms = resolve_keep_terms(&state.cfg, &item.context, &item.style);
                let glossary_snapshot = state.glossary_snapshot();
                let terms = resolve_glossary_terms(&state.cfg, &glossary_snapshot, &item.glossary);

                let req = TranslateRequest {
                    text: item.text.clone(),
                    src_engine: norm_src.engine.clone(),
                    tgt_bcp47: norm_tgt.bcp47.clone(),
                    tgt_engine: norm_tgt.engine.clone(),
                    address,
                    gender,
                    keep_terms,
                };
                let outcome = orchestrator::translate(&state.worker, &state.cache, &state.cfg, &terms, &req).await;
                (i, norm_tgt.bcp47, item.debug, outcome)
            }
        })
        .buffer_unordered(concurrency)
        .collect::<Vec<_>>()
        .await;

    let mut ordered: Vec<Option<(String, bool, Result<orchestrator::TranslateOutcome>)>> =
        (0..results.len()).map(|_| None).collect();
    for (i, tgt_bcp47, debug_flag, outcome) in results {
        ordered[i] = Some((tgt_bcp47, debug_flag, outcome));
    }

    let mut items_out = Vec::with_capacity(ordered.len());
    let mut glossary_replaced_total = 0usize;
    let mut glossary_missing_total = 0usize;
    let mut any_strict_failure = false;
    let mut ok_count = 0usize;
    let mut fail_count = 0usize;

    for slot in ordered.into_iter().flatten() {
        let (tgt_bcp47, debug_flag, outcome) = slot;
        match outcome {
            Ok(o) => {
                glossary_replaced_total += o.debug.glossary_replaced;
                glossary_missing_total += o.debug.glossary_missing;
                if o.checks.ok {
                    ok_count += 1;
                } else {
                    fail_count += 1;
                }
                if o.debug.strategy == "spans_only" || o.debug.strategy == "force_spans_only" {
                    metrics::record_spans_only(&tgt_bcp47);
                }
                if let Some(reason) = &o.debug.degrade_reason {
                    metrics::record_degrade(reason);
                }
                if state.cfg.strict_invariants && !o.checks.ok {
                    any_strict_failure = true;
                }
                let mut item_checks = serde_json::to_value(&o.checks).unwrap_or(serde_json::Value::Null);
                if let serde_json::Value::Object(ref mut map) = item_checks {
                    map.insert(
                        "freeze".to_string(),
                        serde_json::json!({
                            "replaced_total": o.debug.invariant_replaced,
                            "missing": o.debug.invariant_missing,
                        }),
                    );
                    map.insert("fallback_used".to_string(), serde_json::json!(o.debug.strategy));
                    if o.debug.glossary_replaced > 0 || o.debug.glossary_missing > 0 {
                        map.insert(
                            "glossary".to_string(),
                            serde_json::json!({
                                "replaced_total": o.debug.glossary_replaced,
                                "missing": o.debug.glossary_missing,
                            }),
                        );
                    }
                }
                let mut entry = serde_json::json!({
                    "translated_text": o.text,
                    "checks": item_checks,
                });
                if debug_flag {
                    entry["debug"] = serde_json::json!({
                        "strategy": o.debug.strategy,
                        "degrade_reason": o.debug.degrade_reason,
                        "attempts": o.debug.attempts,
                        "cache_hit": o.debug.cache_hit,
                    });
                }
                items_out.push(entry);
            }
            Err(e) => {
                items_out.push(serde_json::json!({"error": e.to_string()}));
            }
        }
    }

    let status = if any_strict_failure {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };

    let mut resp = (status, Json(serde_json::json!({"items": items_out}))).into_response();
    let headers = resp.headers_mut();
    insert_header(headers, "x-glossary-replaced-total", &glossary_replaced_total.to_string());
    insert_header(headers, "x-glossary-missing-total", &glossary_missing_total.to_string());
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        insert_header(headers, "x-batch-counts", &format!("ok={ok_count};failed={fail_count}"));
    }
    Ok(resp)
}

#[derive(Debug, Deserialize)]
struct DetectPayload {
    text: String,
    #[serde(default)]
    accept_language: Vec<String>,
}

async fn detect_post(Json(payload): Json<DetectPayload>) -> impl IntoResponse {
    Json(lang::detect_lang(&payload.text, &payload.accept_language))
}

#[derive(Debug, Deserialize)]
struct DetectQuery {
    text: String,
    #[serde(default)]
    accept_language: Option<String>,
}

async fn detect_get(Query(q): Query<DetectQuery>) -> impl IntoResponse {
    let accept: Vec<String> = q
        .accept_language
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    Json(lang::detect_lang(&q.text, &accept))
}
