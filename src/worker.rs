//! HTTP client for the neural MT worker: persistent connection pool, batch
//! translation with a parallel-singles fallback, and a network-level circuit
//! breaker that is independent of [`crate::breaker`]'s output-quality judgment.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{GuardError, Result};

/// Circuit breaker states for the worker connection, not to be confused with
/// [`crate::breaker::should_degrade`]'s output-quality heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Lock-free circuit breaker guarding calls to the worker backend.
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    threshold: u32,
    opened_at: AtomicU64,
    reset_timeout_secs: u64,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_timeout_secs: u64) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            threshold: threshold.max(1),
            opened_at: AtomicU64::new(0),
            reset_timeout_secs,
        }
    }

    pub fn state(&self) -> CircuitState {
        let opened_at = self.opened_at.load(Ordering::Acquire);
        if opened_at == 0 {
            return CircuitState::Closed;
        }
        let elapsed = now_secs().saturating_sub(opened_at);
        if elapsed >= self.reset_timeout_secs {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn allow_request(&self) -> bool {
        loop {
            let opened_at = self.opened_at.load(Ordering::Acquire);
            if opened_at == 0 {
                return true;
            }
            let elapsed = now_secs().saturating_sub(opened_at);
            if elapsed < self.reset_timeout_secs {
                return false;
            }
            match self.opened_at.compare_exchange_weak(
                opened_at,
                now_secs(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    pub fn record_success(&self) {
        let opened_at = self.opened_at.load(Ordering::Acquire);
        if opened_at != 0 {
            let _ = self
                .opened_at
                .compare_exchange(opened_at, 0, Ordering::AcqRel, Ordering::Acquire);
        }
        self.failure_count.store(0, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.threshold {
            let _ = self.opened_at.compare_exchange(
                0,
                now_secs(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    source: &'a str,
    target: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translated_text: String,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    source: &'a str,
    target: &'a str,
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    translated_texts: Vec<String>,
}

/// Strip a trailing `/translate` suffix and slash so `{backend}/translate`
/// never doubles up regardless of how the backend URL was configured.
pub fn normalize_backend_url(u: &str) -> String {
    if u.trim().is_empty() {
        return "http://127.0.0.1:8093".to_string();
    }
    let trimmed = u.trim().trim_end_matches('/');
    let lower = trimmed.to_lowercase();
    if let Some(stripped) = lower.strip_suffix("/translate") {
        trimmed[..stripped.len()].to_string()
    } else {
        trimmed.to_string()
    }
}

pub struct WorkerClient {
    http: reqwest::Client,
    backend: String,
    timeout: Duration,
    max_workers: usize,
    enable_batch: bool,
    breaker: CircuitBreaker,
}

impl WorkerClient {
    pub fn new(
        backend: &str,
        timeout_secs: u64,
        max_workers: usize,
        enable_batch: bool,
        cb_threshold: u32,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .tcp_keepalive(Duration::from_secs(60))
                .build()
                .expect("reqwest client builds with default TLS backend"),
            backend: normalize_backend_url(backend),
            timeout: Duration::from_secs(timeout_secs.max(1)),
            max_workers: max_workers.max(1),
            enable_batch,
            breaker: CircuitBreaker::new(cb_threshold, 30),
        }
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn backend_url(&self) -> &str {
        &self.backend
    }

    /// Probe the worker's own `/health` endpoint. Does not touch the
    /// network-level circuit breaker: a dead backend should be visible on
    /// `/health` even while the breaker is open.
    pub async fn ping_health(&self) -> bool {
        let url = format!("{}/health", self.backend);
        matches!(
            self.http
                .get(&url)
                .timeout(Duration::from_secs(2))
                .send()
                .await,
            Ok(resp) if resp.status().is_success()
        )
    }

    async fn call_translate(&self, text: &str, src: &str, tgt: &str) -> Result<String> {
        if !self.breaker.allow_request() {
            return Err(GuardError::WorkerUnreachable("circuit open".to_string()));
        }
        let url = format!("{}/translate", self.backend);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .http
                .post(&url)
                .json(&TranslateRequest { source: src, target: tgt, text })
                .timeout(self.timeout)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let body: TranslateResponse = resp.json().await?;
                    self.breaker.record_success();
                    return Ok(body.translated_text);
                }
                Ok(resp) if resp.status().is_server_error() && attempt < 3 => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                Ok(resp) => {
                    self.breaker.record_failure();
                    return Err(GuardError::WorkerUnreachable(format!(
                        "worker responded {}",
                        resp.status()
                    )));
                }
                Err(e) => {
                    self.breaker.record_failure();
                    return Err(GuardError::Http(e));
                }
            }
        }
    }

    async fn call_batch(&self, texts: &[String], src: &str, tgt: &str) -> Result<Vec<String>> {
        if !self.breaker.allow_request() {
            return Err(GuardError::WorkerUnreachable("circuit open".to_string()));
        }
        let url = format!("{}/translate_batch", self.backend);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .http
                .post(&url)
                .json(&BatchRequest { source: src, target: tgt, texts })
                .timeout(self.timeout)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let body: BatchResponse = resp.json().await?;
                    self.breaker.record_success();
                    return Ok(body.translated_texts);
                }
                Ok(resp) if resp.status().is_server_error() && attempt < 3 => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                Ok(resp) => {
                    self.breaker.record_failure();
                    return Err(GuardError::WorkerUnreachable(format!(
                        "batch worker responded {}",
                        resp.status()
                    )));
                }
                Err(e) => {
                    self.breaker.record_failure();
                    return Err(GuardError::Http(e));
                }
            }
        }
    }

    /// Translate every chunk. Tries one batch call first (if enabled and
    /// more than one chunk); on any failure or a mismatched reply length,
    /// falls back to parallel single calls capped at `max_workers`.
    pub async fn translate_via_worker(
        &self,
        chunks: &[String],
        src: &str,
        tgt: &str,
    ) -> Result<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        if self.enable_batch && chunks.len() > 1 {
            if let Ok(outs) = self.call_batch(chunks, src, tgt).await {
                if outs.len() == chunks.len() {
                    return Ok(outs);
                }
            }
        }

        let results = stream::iter(chunks.iter().cloned().enumerate())
            .map(|(i, text)| async move {
                let out = self.call_translate(&text, src, tgt).await;
                (i, out)
            })
            .buffer_unordered(self.max_workers)
            .collect::<Vec<_>>()
            .await;

        let mut out = vec![String::new(); chunks.len()];
        for (i, r) in results {
            out[i] = r?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_translate_suffix() {
        assert_eq!(
            normalize_backend_url("http://127.0.0.1:8093/translate/"),
            "http://127.0.0.1:8093"
        );
    }

    #[test]
    fn normalize_defaults_empty_to_local_backend() {
        assert_eq!(normalize_backend_url(""), "http://127.0.0.1:8093");
    }

    #[test]
    fn normalize_leaves_bare_host_untouched() {
        assert_eq!(normalize_backend_url("http://worker:9000"), "http://worker:9000");
    }

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(3, 60);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn breaker_success_resets_failure_count() {
        let cb = CircuitBreaker::new(3, 60);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
