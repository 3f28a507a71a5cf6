//! Central translation pipeline state machine: strategy selection,
//! invariant/glossary freeze-unfreeze around the worker call, degrade
//! detection, and the fallback chain (spans-only, interleave, outer-HTML,
//! pivot).

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::breaker::{self, DegradeChecks};
use crate::cache::LruCache;
use crate::config::Config;
use crate::error::Result;
use crate::glossary::{self, GlossaryTerm};
use crate::invariants::{self, InvariantChecks, InvariantItem, UnfreezeStats};
use crate::style;
use crate::worker::WorkerClient;

/// One normalized `/translate` request, after language resolution.
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub text: String,
    pub src_engine: String,
    pub tgt_bcp47: String,
    pub tgt_engine: String,
    pub address: String,
    pub gender: String,
    pub keep_terms: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub strategy: String,
    pub degrade_reason: Option<String>,
    pub attempts: Vec<String>,
    pub cache_hit: bool,
    pub glossary_replaced: usize,
    pub glossary_missing: usize,
    pub invariant_replaced: usize,
    pub invariant_missing: usize,
}

#[derive(Debug, Clone)]
pub struct TranslateOutcome {
    pub text: String,
    pub checks: InvariantChecks,
    pub debug: DebugInfo,
}

/// Which fallback path produced the final text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Direct,
    SpansOnly,
    /// Spans-only chosen up front because the target locale/engine is
    /// configured to always require it, not reached via degrade fallback.
    ForceSpansOnly,
    Interleave,
    OuterHtml,
}

impl Strategy {
    fn label(self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::SpansOnly => "spans_only",
            Strategy::ForceSpansOnly => "force_spans_only",
            Strategy::Interleave => "interleave",
            Strategy::OuterHtml => "outer_html",
        }
    }
}

static HTML_TAG_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(<[^<>]+>)").unwrap());
static SENTINEL_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(<\|INV:\d{1,4}:[0-9A-Fa-f]{4,8}\|>|<\|GLO:\d{1,4}:[0-9A-Fa-f]{4,8}\|>)").unwrap());
static SENTINEL_FULL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(<\|INV:\d{1,4}:[0-9A-Fa-f]{4,8}\|>|<\|GLO:\d{1,4}:[0-9A-Fa-f]{4,8}\|>)$").unwrap()
});
static NOISE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s[:punct:]]{0,1}$").unwrap());
static LATIN_LETTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]").unwrap());
static OUTER_OPEN_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(<[^/][^<>]*>)").unwrap());
static OUTER_CLOSE_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(</[^<>]+>)\s*$").unwrap());

/// Reject an obviously looping or runaway translation, substituting the
/// source segment back in.
fn anti_loop_guard(src: &str, candidate: &str) -> bool {
    let chars: Vec<char> = candidate.chars().collect();
    let len = chars.len();
    if len == 0 {
        return true;
    }

    let unique: HashSet<char> = chars.iter().copied().collect();
    if len >= 16 && (unique.len() as f64 / len as f64) < 0.12 {
        return true;
    }

    for unit in 1..=4 {
        if len < unit * 2 {
            continue;
        }
        let mut counts = std::collections::HashMap::new();
        for w in chars.windows(unit) {
            *counts.entry(w.to_vec()).or_insert(0usize) += 1;
        }
        if let Some(&top) = counts.values().max() {
            if (top * unit) as f64 / len as f64 > 0.65 {
                return true;
            }
        }
    }

    let tokens: Vec<&str> = candidate.split_whitespace().collect();
    if tokens.len() >= 10 {
        let mut counts = std::collections::HashMap::new();
        for t in &tokens {
            *counts.entry(*t).or_insert(0usize) += 1;
        }
        let top = counts.values().copied().max().unwrap_or(0);
        if top as f64 / tokens.len() as f64 > 0.65 {
            return true;
        }
    }

    if candidate.chars().count() as f64 > 6.0 * src.chars().count() as f64 + 64.0 {
        return true;
    }

    false
}

fn latin_fraction(s: &str) -> f64 {
    let total = s.chars().filter(|c| c.is_alphabetic()).count();
    if total == 0 {
        return 0.0;
    }
    let latin = LATIN_LETTER_RE.find_iter(s).count();
    latin as f64 / total as f64
}

/// Split frozen text at sentinel boundaries, returning alternating
/// (is_sentinel, chunk) pairs in source order.
fn split_at_sentinels(frozen: &str) -> Vec<(bool, String)> {
    let mut out = Vec::new();
    let mut last = 0;
    for m in SENTINEL_SPLIT_RE.find_iter(frozen) {
        if m.start() > last {
            out.push((false, frozen[last..m.start()].to_string()));
        }
        out.push((true, m.as_str().to_string()));
        last = m.end();
    }
    if last < frozen.len() {
        out.push((false, frozen[last..].to_string()));
    }
    out
}

fn is_noise(segment: &str) -> bool {
    segment.trim().is_empty() || NOISE_RE.is_match(segment)
}

/// Whether `segment` is a whole invariant or glossary sentinel carrier, as
/// opposed to visible text that merely contains one. Segments produced by
/// `split_at_sentinels` are either a single sentinel or sentinel-free text,
/// so a full match is enough to tell the two apart.
fn is_sentinel_carrier(segment: &str) -> bool {
    SENTINEL_FULL_RE.is_match(segment)
}

/// Shift a chunk-local invariant mapping's ids by `base_id`, rewriting the
/// matching sentinel text in `frozen` so the embedded id stays a valid
/// index into the combined mapping once chunks are merged.
fn renumber_sentinels(frozen: &str, mapping: Vec<InvariantItem>, base_id: usize) -> (String, Vec<InvariantItem>) {
    let mut out = frozen.to_string();
    let mut renumbered = Vec::with_capacity(mapping.len());
    for item in mapping {
        let local_sentinel = format!("<|INV:{}:{}|>", item.id, item.crc);
        let global_id = base_id + item.id;
        let global_sentinel = format!("<|INV:{}:{}|>", global_id, item.crc);
        out = out.replace(&local_sentinel, &global_sentinel);
        renumbered.push(InvariantItem { id: global_id, ..item });
    }
    (out, renumbered)
}

/// Translate a flat list of text segments (skipping noise/sentinel carriers),
/// applying the worker call and anti-loop guard per segment.
async fn translate_segments(
    worker: &WorkerClient,
    segments: &[String],
    src: &str,
    tgt: &str,
) -> Result<Vec<String>> {
    let mut to_translate = Vec::new();
    let mut indices = Vec::new();
    for (i, seg) in segments.iter().enumerate() {
        if !is_noise(seg) && !is_sentinel_carrier(seg) {
            to_translate.push(seg.clone());
            indices.push(i);
        }
    }
    if to_translate.is_empty() {
        return Ok(segments.to_vec());
    }

    let outs = worker.translate_via_worker(&to_translate, src, tgt).await?;
    let mut result = segments.to_vec();
    for (idx, (seg_idx, out)) in indices.into_iter().zip(outs.into_iter()).enumerate() {
        let _ = idx;
        let src_seg = &segments[seg_idx];
        result[seg_idx] = if anti_loop_guard(src_seg, &out) {
            src_seg.clone()
        } else {
            out
        };
    }
    Ok(result)
}

/// *Direct* strategy: freeze the whole text, one worker call, decode.
/// Runs one worker call over frozen text and returns the raw reply with
/// sentinels restored to their standard `<|INV:…|>` form. Callers unfreeze
/// and validate afterward; this stays at the "still frozen" layer so every
/// strategy can be scrubbed/validated uniformly.
async fn run_direct(
    worker: &WorkerClient,
    text: &str,
    src: &str,
    tgt: &str,
    keep_terms: &[String],
    glossary_mapping: &[glossary::GlossaryMapping],
) -> Result<(String, Vec<InvariantItem>)> {
    let (frozen, mapping) = invariants::freeze_invariants(text);
    let (frozen, mapping) = invariants::freeze_keep_terms_into(&frozen, &mapping, keep_terms);
    let safe = invariants::to_safe_tokens(&frozen, &mapping);
    let safe = glossary::to_safe_tokens(&safe, glossary_mapping);
    let outs = worker.translate_via_worker(&[safe], src, tgt).await?;
    let raw = outs.into_iter().next().unwrap_or_default();
    let raw = glossary::from_safe_tokens(&raw, glossary_mapping);
    let restored_sentinels = invariants::from_safe_tokens(&raw, &mapping);
    Ok((restored_sentinels, mapping))
}

/// *Invariant-interleave* strategy: freeze the whole text, split at sentinel
/// boundaries, translate each text-bearing segment independently.
async fn run_interleave(
    worker: &WorkerClient,
    text: &str,
    src: &str,
    tgt: &str,
    keep_terms: &[String],
) -> Result<(String, Vec<InvariantItem>)> {
    let (frozen, mapping) = invariants::freeze_invariants(text);
    let (frozen, mapping) = invariants::freeze_keep_terms_into(&frozen, &mapping, keep_terms);
    let pieces = split_at_sentinels(&frozen);
    let texts: Vec<String> = pieces.into_iter().map(|(_, t)| t).collect();
    let translated = translate_segments(worker, &texts, src, tgt).await?;
    let out = translated.concat();
    Ok((out, mapping))
}

/// *Spans-only* strategy: split on HTML tags first (tags pass through
/// untouched), then apply the interleave approach within each text span.
async fn run_spans_only(
    worker: &WorkerClient,
    text: &str,
    src: &str,
    tgt: &str,
    keep_terms: &[String],
) -> Result<(String, Vec<InvariantItem>)> {
    let html_pieces = HTML_TAG_SPLIT_RE.split(text).collect::<Vec<_>>();
    let tags: Vec<&str> = HTML_TAG_SPLIT_RE.find_iter(text).map(|m| m.as_str()).collect();

    let mut full_mapping = Vec::new();
    let mut rendered = String::new();
    let mut tag_idx = 0;

    for (i, chunk) in html_pieces.iter().enumerate() {
        if !chunk.is_empty() {
            if is_noise(chunk) {
                rendered.push_str(chunk);
            } else {
                let (local_frozen, local_mapping) = invariants::freeze_invariants(chunk);
                let (local_frozen, local_mapping) =
                    invariants::freeze_keep_terms_into(&local_frozen, &local_mapping, keep_terms);
                let base_id = full_mapping.len();
                let (frozen, mapping) = renumber_sentinels(&local_frozen, local_mapping, base_id);
                let pieces = split_at_sentinels(&frozen);
                let texts: Vec<String> = pieces.iter().map(|(_, t)| t.clone()).collect();
                let translated = translate_segments(worker, &texts, src, tgt).await?;
                for (is_sentinel, seg) in pieces.into_iter().zip(translated.into_iter()) {
                    let _ = is_sentinel;
                    rendered.push_str(&seg);
                }
                full_mapping.extend(mapping);
            }
        }
        if i < tags.len() {
            rendered.push_str(tags[tag_idx]);
            tag_idx += 1;
        }
    }

    Ok((rendered, full_mapping))
}

/// *Outer-HTML (v3b)* fallback: strip tags, translate the visible text only,
/// then re-wrap with the outermost opening/closing tags from the source.
async fn run_outer_html(
    worker: &WorkerClient,
    text: &str,
    src: &str,
    tgt: &str,
    keep_terms: &[String],
    glossary_mapping: &[glossary::GlossaryMapping],
) -> Result<(String, Vec<InvariantItem>)> {
    let open_tag = OUTER_OPEN_TAG_RE
        .captures(text)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let close_tag = OUTER_CLOSE_TAG_RE
        .captures(text)
        .map(|c| c[1].to_string())
        .unwrap_or_default();

    let stripped = HTML_TAG_SPLIT_RE.replace_all(text, "").to_string();
    let (translated, mapping) = run_direct(worker, &stripped, src, tgt, keep_terms, glossary_mapping).await?;
    Ok((format!("{open_tag}{translated}{close_tag}"), mapping))
}

fn contains_html(text: &str) -> bool {
    HTML_TAG_SPLIT_RE.is_match(text)
}

/// Unfreeze invariants, then glossary sentinels, then scrub artifacts and
/// validate — the common tail every strategy runs through before its
/// result is compared against the current best candidate.
fn finalize(
    raw: &str,
    mapping: &[InvariantItem],
    glossary_mapping: &[glossary::GlossaryMapping],
) -> (String, InvariantChecks, glossary::GlossaryUnfreezeStats, UnfreezeStats) {
    let (unfrozen_inv, inv_stats) = invariants::unfreeze_invariants(raw, mapping);
    let (unfrozen_glossary, glossary_stats) = glossary::unfreeze_glossary(&unfrozen_inv, glossary_mapping);
    let scrubbed = invariants::scrub_artifacts(&unfrozen_glossary);
    let checks = invariants::validate_invariants(&scrubbed, mapping);
    (scrubbed, checks, glossary_stats, inv_stats)
}

/// Re-translate a single segment through an intermediate language when its
/// Latin-letter fraction indicates the target engine silently fell back to
/// a pivot language the worker doesn't natively support.
async fn maybe_pivot(
    worker: &WorkerClient,
    cfg: &Config,
    text: &str,
    src: &str,
    tgt: &str,
    translated: &str,
) -> Result<String> {
    if !cfg.pivot_langs.contains(tgt) {
        return Ok(translated.to_string());
    }
    if latin_fraction(translated) <= cfg.leak_latin_max {
        return Ok(translated.to_string());
    }
    let mid = &cfg.pivot_mid_lang;
    let via_mid = worker.translate_via_worker(&[text.to_string()], src, mid).await?;
    let mid_text = via_mid.into_iter().next().unwrap_or_default();
    let back = worker.translate_via_worker(&[mid_text], mid, tgt).await?;
    Ok(back.into_iter().next().unwrap_or(translated.to_string()))
}

/// Run the full pipeline for one request: cache lookup, glossary/invariant
/// freeze, worker call with fallback chain, style filters, cache store.
pub async fn translate(
    worker: &WorkerClient,
    cache: &Arc<LruCache>,
    cfg: &Config,
    glossary_terms: &[GlossaryTerm],
    req: &TranslateRequest,
) -> Result<TranslateOutcome> {
    let mut debug = DebugInfo::default();

    let style_sig = crate::cache::style_signature(Some(&req.address), Some(&req.gender));
    let canonical_terms: Vec<String> = glossary_terms.iter().map(|t| t.canonical.clone()).collect();
    let glossary_sig = crate::cache::glossary_signature(&canonical_terms);
    let (freeze_std, _) = invariants::freeze_invariants(&req.text);
    let cache_key = crate::cache::build_key(&req.src_engine, &req.tgt_engine, &freeze_std, &format!("{style_sig}|{glossary_sig}"));

    if cfg.cache_enable {
        if let Some(cached) = cache.get(&cache_key) {
            if let Ok(outcome) = serde_json::from_value::<CachedOutcome>(cached) {
                debug.cache_hit = true;
                debug.strategy = outcome.strategy;
                return Ok(TranslateOutcome {
                    text: outcome.text,
                    checks: InvariantChecks::trivially_ok(),
                    debug,
                });
            }
        }
    }

    let (glossary_frozen, glossary_mapping) = if cfg.glossary_enable {
        glossary::freeze_glossary(&req.text, &req.tgt_engine, glossary_terms)
    } else {
        (req.text.clone(), Vec::new())
    };

    let force_spans_only = cfg.spans_only_force_bcp47.contains(&req.tgt_bcp47)
        || cfg.spans_only_force_engines.contains(&req.tgt_engine)
        || contains_html(&glossary_frozen);

    let keep_terms: Vec<String> = req.keep_terms.iter().cloned().collect();

    let (raw, mapping, mut strategy) = if force_spans_only && contains_html(&glossary_frozen) {
        debug.attempts.push(Strategy::ForceSpansOnly.label().to_string());
        let (t, m) = run_spans_only(worker, &glossary_frozen, &req.src_engine, &req.tgt_engine, &keep_terms).await?;
        (t, m, Strategy::ForceSpansOnly)
    } else {
        debug.attempts.push(Strategy::Direct.label().to_string());
        let (t, m) = run_direct(worker, &glossary_frozen, &req.src_engine, &req.tgt_engine, &keep_terms, &glossary_mapping).await?;
        (t, m, Strategy::Direct)
    };

    let (text, checks, gstats, istats) = finalize(&raw, &mapping, &glossary_mapping);

    let degrade_checks = DegradeChecks {
        ph_ok: checks.ph_ok,
        missing: istats.missing as u32,
    };
    let (should_degrade, degrade_reason) =
        breaker::should_degrade(Some(&text), degrade_checks, &req.tgt_engine);

    let (mut final_text, mut final_checks) = (text, checks);
    let mut final_gstats = gstats;
    let mut final_istats = istats;

    if !final_checks.ok && contains_html(&req.text) && strategy != Strategy::OuterHtml {
        debug.attempts.push(Strategy::OuterHtml.label().to_string());
        if let Ok((raw, m)) = run_outer_html(worker, &glossary_frozen, &req.src_engine, &req.tgt_engine, &keep_terms, &glossary_mapping).await {
            let (candidate_text, candidate_checks, candidate_gstats, candidate_istats) = finalize(&raw, &m, &glossary_mapping);
            if candidate_checks.ok {
                final_text = candidate_text;
                final_checks = candidate_checks;
                final_gstats = candidate_gstats;
                final_istats = candidate_istats;
                strategy = Strategy::OuterHtml;
            }
        }
    }

    if !final_checks.ok {
        debug.attempts.push(Strategy::Interleave.label().to_string());
        if let Ok((raw, m)) = run_interleave(worker, &glossary_frozen, &req.src_engine, &req.tgt_engine, &keep_terms).await {
            let (candidate_text, candidate_checks, candidate_gstats, candidate_istats) = finalize(&raw, &m, &glossary_mapping);
            if candidate_checks.ok || !final_checks.ok {
                final_text = candidate_text;
                final_checks = candidate_checks;
                final_gstats = candidate_gstats;
                final_istats = candidate_istats;
                strategy = Strategy::Interleave;
            }
        }
    }

    if should_degrade && !matches!(strategy, Strategy::SpansOnly | Strategy::ForceSpansOnly) {
        debug.degrade_reason = Some(degrade_reason);
        debug.attempts.push(Strategy::SpansOnly.label().to_string());
        if let Ok((raw, m)) = run_spans_only(worker, &glossary_frozen, &req.src_engine, &req.tgt_engine, &keep_terms).await {
            let (candidate_text, candidate_checks, candidate_gstats, candidate_istats) = finalize(&raw, &m, &glossary_mapping);
            final_text = candidate_text;
            final_checks = candidate_checks;
            final_gstats = candidate_gstats;
            final_istats = candidate_istats;
            strategy = Strategy::SpansOnly;
        }
    }

    final_text = maybe_pivot(
        worker,
        cfg,
        &req.text,
        &req.src_engine,
        &req.tgt_engine,
        &final_text,
    )
    .await
    .unwrap_or(final_text);

    if cfg.enable_style_filter {
        let style_langs: HashSet<String> = cfg
            .style_langs
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        // apply_style_filter falls back to its input unchanged whenever the
        // transform would fail re-validation, so the result is always safe
        // to adopt here.
        let (styled, _style_checks) = style::apply_style_filter(
            &final_text,
            &req.tgt_engine,
            &req.address,
            &req.gender,
            &req.keep_terms,
            &style_langs,
        );
        final_text = styled;
    }

    debug.strategy = strategy.label().to_string();
    debug.glossary_replaced = final_gstats.replaced_total;
    debug.glossary_missing = final_gstats.missing;
    debug.invariant_replaced = final_istats.replaced_total;
    debug.invariant_missing = final_istats.missing;

    if cfg.cache_enable && final_checks.ok {
        let payload = serde_json::to_value(CachedOutcome {
            text: final_text.clone(),
            strategy: strategy.label().to_string(),
        })
        .unwrap_or(serde_json::Value::Null);
        cache.set(&cache_key, payload);
    }

    Ok(TranslateOutcome {
        text: final_text,
        checks: final_checks,
        debug,
    })
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CachedOutcome {
    text: String,
    strategy: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anti_loop_flags_low_diversity_run() {
        let candidate = "aaaaaaaaaaaaaaaaaaaa";
        assert!(anti_loop_guard("short source", candidate));
    }

    #[test]
    fn anti_loop_flags_excessive_length() {
        let src = "hi";
        let candidate = "x".repeat(200);
        assert!(anti_loop_guard(src, &candidate));
    }

    #[test]
    fn anti_loop_accepts_plausible_translation() {
        assert!(!anti_loop_guard("Hello there, friend.", "Hallo dort, Freund."));
    }

    #[test]
    fn split_at_sentinels_preserves_order() {
        let frozen = "intro <|INV:0:ABCDEF|> outro";
        let pieces = split_at_sentinels(frozen);
        assert_eq!(pieces.len(), 3);
        assert!(!pieces[0].0);
        assert!(pieces[1].0);
        assert!(!pieces[2].0);
    }

    #[test]
    fn contains_html_detects_tags() {
        assert!(contains_html("<b>hi</b>"));
        assert!(!contains_html("plain text"));
    }

    #[test]
    fn latin_fraction_counts_ascii_letters() {
        assert!(latin_fraction("abc") > 0.9);
        assert_eq!(latin_fraction(""), 0.0);
    }

    #[test]
    fn is_sentinel_carrier_matches_whole_sentinel_only() {
        assert!(is_sentinel_carrier("<|INV:0:ABCDEF|>"));
        assert!(is_sentinel_carrier("<|GLO:3:12ab34|>"));
        assert!(!is_sentinel_carrier("text around <|INV:0:ABCDEF|>"));
        assert!(!is_sentinel_carrier("plain text"));
    }

    #[test]
    fn force_spans_only_and_degrade_spans_only_report_distinct_labels() {
        assert_eq!(Strategy::ForceSpansOnly.label(), "force_spans_only");
        assert_eq!(Strategy::SpansOnly.label(), "spans_only");
        assert_ne!(Strategy::ForceSpansOnly.label(), Strategy::SpansOnly.label());
    }
}
