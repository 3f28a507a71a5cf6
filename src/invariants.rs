//! Invariant freeze/unfreeze engine.
//!
//! Detects HTML tags, placeholders, URLs, emails, currency amounts, dates,
//! times and bare numbers, then replaces each with a stable sentinel
//! `<|INV:{id}:{crc}|>` before the text reaches the MT worker. After
//! translation the sentinels are swapped back for their original raw text,
//! tolerating sentinels the worker mangled (dropped CRC, fullwidth digits,
//! stray whitespace) via a three-pass decode.

use once_cell::sync::Lazy;
use regex::Regex;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvariantType {
    Html,
    Email,
    Url,
    Time,
    Date,
    Currency,
    Placeholder1,
    Placeholder2,
    Number,
    KeepTerm,
}

impl InvariantType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Email => "email",
            Self::Url => "url",
            Self::Time => "time",
            Self::Date => "date",
            Self::Currency => "currency",
            Self::Placeholder1 => "ph1",
            Self::Placeholder2 => "ph2",
            Self::Number => "number",
            Self::KeepTerm => "keep_term",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantItem {
    pub id: usize,
    pub crc: String,
    pub raw: String,
    pub kind: InvariantType,
}

const CURRENCY_SEP: &str = r"[\u{00A0}\u{202F}\u{2009},._\u{066B}\u{066C}\u{FF0C}\u{FF0E}\s]";
const CURRENCY_SYM: &str = r"[€$£¥₹₩₽₺₪₫฿₦₱]";

static P_HTML: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</?[a-z][^>]*>").unwrap());
static P_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").unwrap());
static P_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)https?://[^\s<>]+").unwrap());
static P_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-2]?\d:[0-5]\d\b").unwrap());
static P_DATE_EU: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{1,2}\.\d{1,2}\.\d{2,4}\b").unwrap());
static P_CURRENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(?:{sym}\s*\d(?:{sep}?\d)*/?\d*(?:{sep}\d+)*|\d(?:{sep}?\d)*/?\d*(?:{sep}\d+)*\s*{sym})",
        sym = CURRENCY_SYM,
        sep = CURRENCY_SEP
    ))
    .unwrap()
});
static P_PH1: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[A-Za-z0-9_:-]+\}").unwrap());
static P_PH2: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{[^}]+\}\}").unwrap());
static P_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"\d(?:{sep}?\d)*", sep = CURRENCY_SEP)).unwrap());

fn patterns() -> [(&'static Lazy<Regex>, InvariantType); 9] {
    [
        (&P_HTML, InvariantType::Html),
        (&P_EMAIL, InvariantType::Email),
        (&P_URL, InvariantType::Url),
        (&P_TIME, InvariantType::Time),
        (&P_DATE_EU, InvariantType::Date),
        (&P_CURRENCY, InvariantType::Currency),
        (&P_PH1, InvariantType::Placeholder1),
        (&P_PH2, InvariantType::Placeholder2),
        (&P_NUMBER, InvariantType::Number),
    ]
}

static STRICT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\|INV:(\d{1,4}):([0-9A-F]{4,8})\|>").unwrap());
static SIMPLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\|INV:(\d{1,4})(?::([0-9A-F]{4,8}))?\|>").unwrap());
static LOOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)INV[^\w]{0,2}:(\d{1,4})(?:[^\w]{0,2}:([0-9A-F]{4,8}))?").unwrap());
static PIPE_CRC_WRAP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\|(?P<inner>[^|]+):(?P<crc>[0-9A-Fa-f]{4,8})\|").unwrap());

/// 6-character uppercase hex fingerprint used in sentinel tags.
pub fn make_crc(raw: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(raw.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..6].to_uppercase()
}

fn find_non_overlapping_matches(text: &str) -> Vec<(usize, usize, String, InvariantType)> {
    let mut matches = Vec::new();
    let mut occupied: Vec<(usize, usize)> = Vec::new();

    for (pattern, kind) in patterns() {
        for m in pattern.find_iter(text) {
            let (start, end) = (m.start(), m.end());
            let overlaps = occupied
                .iter()
                .any(|&(os, oe)| start < oe && end > os);
            if !overlaps {
                matches.push((start, end, m.as_str().to_string(), kind));
                occupied.push((start, end));
            }
        }
    }

    matches.sort_by_key(|m| m.0);
    matches
}

/// Replace every detected invariant with a `<|INV:{id}:{crc}|>` sentinel.
pub fn freeze_invariants(text: &str) -> (String, Vec<InvariantItem>) {
    if text.is_empty() {
        return (text.to_string(), Vec::new());
    }

    let matches = find_non_overlapping_matches(text);
    let mut mapping = Vec::with_capacity(matches.len());
    let mut pieces = Vec::new();
    let mut last_end = 0;

    for (start, end, raw, kind) in matches {
        if start > last_end {
            pieces.push(text[last_end..start].to_string());
        }

        let id = mapping.len();
        let crc = make_crc(&raw);
        let mut sentinel = format!("<|INV:{id}:{crc}|>");

        if start > 0 {
            if let Some(prev) = text[..start].chars().next_back() {
                if prev.is_ascii_alphanumeric() {
                    sentinel = format!(" {sentinel}");
                }
            }
        }
        if end < text.len() {
            if let Some(next) = text[end..].chars().next() {
                if next.is_ascii_alphanumeric() {
                    sentinel = format!("{sentinel} ");
                }
            }
        }

        pieces.push(sentinel);
        mapping.push(InvariantItem { id, crc, raw, kind });
        last_end = end;
    }

    if last_end < text.len() {
        pieces.push(text[last_end..].to_string());
    }

    (pieces.concat(), mapping)
}

/// Swap `<|INV:{id}:{crc}|>` sentinels for the transport-safe `[#INV:{id}#]`
/// form, for worker backends that choke on pipe/angle-bracket characters.
pub fn to_safe_tokens(text: &str, mapping: &[InvariantItem]) -> String {
    let mut out = text.to_string();
    for item in mapping {
        let sentinel = format!("<|INV:{}:{}|>", item.id, item.crc);
        out = out.replace(&sentinel, &format!("[#INV:{}#]", item.id));
    }
    out
}

/// Inverse of [`to_safe_tokens`].
pub fn from_safe_tokens(text: &str, mapping: &[InvariantItem]) -> String {
    let mut out = text.to_string();
    for item in mapping {
        let safe = format!("[#INV:{}#]", item.id);
        out = out.replace(&safe, &format!("<|INV:{}:{}|>", item.id, item.crc));
    }
    out
}

/// Freeze a caller-supplied list of literal terms into already-frozen text,
/// appending them to `mapping` with IDs continuing past the existing ones.
pub fn freeze_keep_terms_into(
    frozen_text: &str,
    mapping: &[InvariantItem],
    keep_terms: &[String],
) -> (String, Vec<InvariantItem>) {
    if keep_terms.is_empty() {
        return (frozen_text.to_string(), mapping.to_vec());
    }

    let mut new_mapping = mapping.to_vec();
    let mut new_frozen = frozen_text.to_string();
    let mut next_id = mapping.iter().map(|m| m.id).max().unwrap_or(0) + 1;

    for term in keep_terms {
        if term.is_empty() || !new_frozen.contains(term.as_str()) {
            continue;
        }
        let crc = make_crc(term);
        let sentinel = format!("<|INV:{next_id}:{crc}|>");
        new_frozen = new_frozen.replace(term.as_str(), &sentinel);
        new_mapping.push(InvariantItem {
            id: next_id,
            crc,
            raw: term.clone(),
            kind: InvariantType::KeepTerm,
        });
        next_id += 1;
    }

    (new_frozen, new_mapping)
}

fn fold_fullwidth_char(c: char) -> Option<char> {
    Some(match c {
        '0'..='9' | 'A'..='F' | 'a'..='f' => c,
        '\u{FF10}'..='\u{FF19}' => char::from_u32(c as u32 - 0xFF10 + '0' as u32)?,
        '\u{FF21}'..='\u{FF26}' => char::from_u32(c as u32 - 0xFF21 + 'A' as u32)?,
        '\u{FF41}'..='\u{FF46}' => char::from_u32(c as u32 - 0xFF41 + 'a' as u32)?,
        '（' => '(',
        '）' => ')',
        '【' | '［' => '[',
        '】' | '］' => ']',
        '＜' | '〈' | '《' | '«' | '‹' => '<',
        '＞' | '〉' | '》' | '»' | '›' => '>',
        '｜' | '︱' | '∣' => '|',
        '：' | '︰' => ':',
        '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' => return None,
        other => other,
    })
}

/// Fold fullwidth digit/bracket variants to ASCII and drop zero-width chars,
/// returning the normalized string plus a map from each normalized char's
/// index back to its byte offset in the original string.
fn normalize_for_inv_matching(s: &str) -> (String, Vec<usize>) {
    let mut norm = String::with_capacity(s.len());
    let mut idx_map = Vec::new();
    for (byte_idx, c) in s.char_indices() {
        if let Some(folded) = fold_fullwidth_char(c) {
            norm.push(folded);
            idx_map.push(byte_idx);
        }
    }
    (norm, idx_map)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnfreezeStats {
    pub replaced_total: usize,
    pub missing: usize,
    pub crc_mismatches: usize,
}

fn apply_tolerant_pass(
    out: &str,
    mapping: &[InvariantItem],
    re: &Regex,
) -> (String, usize) {
    let (norm, idx_map) = normalize_for_inv_matching(out);
    let hits: Vec<_> = re.captures_iter(&norm).collect();
    if hits.is_empty() {
        return (out.to_string(), 0);
    }

    let norm_char_count = norm.chars().count();

    let mut parts = Vec::new();
    let mut cur = 0usize;
    let mut replaced = 0usize;

    for cap in hits {
        let m = cap.get(0).unwrap();
        let norm_start_char = norm[..m.start()].chars().count();
        let norm_end_char = norm[..m.end()].chars().count();
        if norm_start_char >= idx_map.len() || norm_end_char == 0 || norm_end_char > idx_map.len() {
            continue;
        }
        let orig_start = idx_map[norm_start_char];
        let orig_end = if norm_end_char < norm_char_count {
            idx_map[norm_end_char]
        } else {
            out.len()
        };

        let idx: Option<usize> = cap.get(1).and_then(|g| g.as_str().parse().ok());
        let Some(idx) = idx else { continue };
        let raw = mapping.get(idx).map(|m| m.raw.as_str()).unwrap_or("");

        if orig_start < cur || orig_start > out.len() || orig_end > out.len() {
            continue;
        }
        parts.push(out[cur..orig_start].to_string());
        parts.push(raw.to_string());
        cur = orig_end;
        replaced += 1;
    }
    parts.push(out[cur..].to_string());
    (parts.concat(), replaced)
}

/// Swap sentinels back for their original raw text, tolerating sentinels
/// the worker mangled. Tries a strict match first, then a fullwidth/zero
/// width-normalized match, then a loose match with no wrapper required.
pub fn unfreeze_invariants(text: &str, mapping: &[InvariantItem]) -> (String, UnfreezeStats) {
    if mapping.is_empty() {
        return (
            text.to_string(),
            UnfreezeStats {
                replaced_total: 0,
                missing: 0,
                crc_mismatches: 0,
            },
        );
    }

    let mut replaced_total = 0usize;
    let mut out = String::new();
    let mut cur = 0usize;
    for cap in STRICT_RE.captures_iter(text) {
        let m = cap.get(0).unwrap();
        out.push_str(&text[cur..m.start()]);
        let idx: Option<usize> = cap.get(1).and_then(|g| g.as_str().parse().ok());
        let raw = idx
            .and_then(|i| mapping.get(i))
            .map(|item| item.raw.as_str())
            .unwrap_or("");
        out.push_str(raw);
        cur = m.end();
        replaced_total += 1;
    }
    out.push_str(&text[cur..]);

    if replaced_total < mapping.len() {
        let (next, n) = apply_tolerant_pass(&out, mapping, &SIMPLE_RE);
        out = next;
        replaced_total += n;
    }

    if replaced_total < mapping.len() {
        let (next, _) = apply_tolerant_pass(&out, mapping, &LOOSE_RE);
        out = next;
    }

    let missing = mapping.iter().filter(|m| !out.contains(m.raw.as_str())).count();
    (
        out,
        UnfreezeStats {
            replaced_total,
            missing,
            crc_mismatches: 0,
        },
    )
}

fn strip_stray_lt(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == '<' {
            if let Some(&next) = chars.get(i + 1) {
                if next.is_ascii_alphabetic() || next == '/' {
                    out.push(c);
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn strip_stray_gt(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == '>' {
            if i > 0 {
                let prev = chars[i - 1];
                if prev.is_ascii_alphabetic() || prev == '/' {
                    out.push(c);
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static WS_BEFORE_PUNCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+([.,!?;:])").unwrap());
static STRAY_SENTINEL_WRAPPED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<\s*\|\s*INV\s*:\s*\d+\s*:\s*[0-9A-Fa-f]{4,8}\s*\|\s*>").unwrap()
});
static STRAY_SENTINEL_BARE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\|\s*INV\s*:\s*\d+\s*:\s*[0-9A-Fa-f]{4,8}\s*\|").unwrap());

/// Remove RTL isolates, stray bracket fragments and leftover sentinel debris
/// that the worker sometimes leaves behind, and collapse whitespace.
pub fn scrub_artifacts(text: &str) -> String {
    if text.is_empty() {
        return text.to_string();
    }

    let mut s = text
        .replace('\u{2066}', "")
        .replace('\u{2067}', "")
        .replace('\u{2068}', "")
        .replace('\u{2069}', "")
        .replace('♰', "");

    s = Regex::new(r"<\s*♰\s*").unwrap().replace_all(&s, "").to_string();
    s = Regex::new(r"\s*♰\s*>").unwrap().replace_all(&s, "").to_string();

    s = strip_stray_lt(&s);
    s = strip_stray_gt(&s);

    s = STRAY_SENTINEL_WRAPPED_RE.replace_all(&s, "").to_string();
    s = STRAY_SENTINEL_BARE_RE.replace_all(&s, "").to_string();

    s = WS_RE.replace_all(&s, " ").to_string();
    s = WS_BEFORE_PUNCT_RE.replace_all(&s, "$1").to_string();

    for _ in 0..3 {
        let next = PIPE_CRC_WRAP_RE.replace_all(&s, "$inner").to_string();
        if next == s {
            break;
        }
        s = next;
    }

    s.trim().to_string()
}

/// Whether `text` is free of RTL isolates, the rare artifact marker and any
/// residual `<|INV:` fragment.
pub fn is_artifact_free(text: &str) -> bool {
    if text.is_empty() {
        return true;
    }
    if text.contains('\u{2066}')
        || text.contains('\u{2067}')
        || text.contains('\u{2068}')
        || text.contains('\u{2069}')
        || text.contains('♰')
    {
        return false;
    }
    static INV_OPEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\s*\|\s*INV\s*:").unwrap());
    !INV_OPEN_RE.is_match(text)
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InvariantChecks {
    pub ok: bool,
    pub html_ok: bool,
    pub num_ok: bool,
    pub ph_ok: bool,
    pub paren_ok: bool,
    pub artifact_ok: bool,
    pub email_ok: bool,
    pub url_ok: bool,
    pub counts: HashMap<String, usize>,
}

impl InvariantChecks {
    /// The all-fields-ok result used when a pass had nothing to check.
    pub fn trivially_ok() -> Self {
        Self {
            ok: true,
            html_ok: true,
            num_ok: true,
            ph_ok: true,
            paren_ok: true,
            artifact_ok: true,
            email_ok: true,
            url_ok: true,
            counts: HashMap::new(),
        }
    }
}

/// Check that every invariant's raw text survived into `out`, HTML/email/URL
/// fragments are present, brackets balance, and no sentinel debris remains.
pub fn validate_invariants(out: &str, mapping: &[InvariantItem]) -> InvariantChecks {
    if mapping.is_empty() {
        return InvariantChecks::trivially_ok();
    }

    let mut counts = HashMap::new();
    for item in mapping {
        *counts.entry(item.kind.as_str().to_string()).or_insert(0) += 1;
    }

    let present = |kind: InvariantType| {
        mapping
            .iter()
            .filter(|i| i.kind == kind)
            .all(|i| out.contains(i.raw.as_str()))
    };

    let html_ok = present(InvariantType::Html);
    let email_ok = present(InvariantType::Email);
    let url_ok = present(InvariantType::Url);
    let num_ok = mapping
        .iter()
        .filter(|i| matches!(i.kind, InvariantType::Currency | InvariantType::Number))
        .all(|i| out.contains(i.raw.as_str()));
    let ph_ok = mapping
        .iter()
        .filter(|i| matches!(i.kind, InvariantType::Placeholder1 | InvariantType::Placeholder2))
        .all(|i| out.contains(i.raw.as_str()));

    let mut paren_ok = true;
    let mut stack = Vec::new();
    for c in out.chars() {
        match c {
            '(' | '[' | '<' => stack.push(c),
            ')' | ']' | '>' => {
                let Some(top) = stack.pop() else {
                    paren_ok = false;
                    break;
                };
                let matches = matches!((top, c), ('(', ')') | ('[', ']') | ('<', '>'));
                if !matches {
                    paren_ok = false;
                    break;
                }
            }
            _ => {}
        }
    }
    if !stack.is_empty() {
        paren_ok = false;
    }

    let artifact_ok = is_artifact_free(out);
    let ok = html_ok && num_ok && ph_ok && paren_ok && artifact_ok && email_ok && url_ok;

    InvariantChecks {
        ok,
        html_ok,
        num_ok,
        ph_ok,
        paren_ok,
        artifact_ok,
        email_ok,
        url_ok,
        counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_detects_html_and_placeholder() {
        let (frozen, mapping) = freeze_invariants("<b>Hi {name}</b>");
        assert_eq!(mapping.len(), 3);
        assert!(frozen.contains("<|INV:0:"));
        assert_eq!(mapping[0].kind, InvariantType::Html);
        assert_eq!(mapping[2].kind, InvariantType::Placeholder1);
    }

    #[test]
    fn freeze_detects_email_url_currency() {
        let (_, mapping) = freeze_invariants("mail me at a@b.com or visit https://x.io, cost $9.99");
        let kinds: Vec<_> = mapping.iter().map(|m| m.kind).collect();
        assert!(kinds.contains(&InvariantType::Email));
        assert!(kinds.contains(&InvariantType::Url));
        assert!(kinds.contains(&InvariantType::Currency));
    }

    #[test]
    fn freeze_then_unfreeze_round_trips() {
        let original = "Contact <b>support@example.com</b> before 10:30.";
        let (frozen, mapping) = freeze_invariants(original);
        let (restored, stats) = unfreeze_invariants(&frozen, &mapping);
        assert_eq!(stats.missing, 0);
        assert!(restored.contains("support@example.com"));
        assert!(restored.contains("10:30"));
    }

    #[test]
    fn unfreeze_tolerates_missing_crc() {
        let original = "Price: $42 today";
        let (frozen, mapping) = freeze_invariants(original);
        let mangled = frozen.replace(&format!(":{}", mapping[0].crc), "");
        let (restored, _) = unfreeze_invariants(&mangled, &mapping);
        assert!(restored.contains("$42"));
    }

    #[test]
    fn scrub_artifacts_removes_leftover_sentinel() {
        let out = scrub_artifacts("Hello <|INV:0:ABCDEF|> world");
        assert!(!out.contains("INV:"));
        assert_eq!(out, "Hello world");
    }

    #[test]
    fn validate_invariants_flags_missing_html() {
        let (_, mapping) = freeze_invariants("<b>hi</b>");
        let checks = validate_invariants("hi", &mapping);
        assert!(!checks.html_ok);
        assert!(!checks.ok);
    }

    #[test]
    fn validate_invariants_passes_when_everything_survives() {
        let (frozen, mapping) = freeze_invariants("<b>hi</b> {x}");
        let (restored, _) = unfreeze_invariants(&frozen, &mapping);
        let checks = validate_invariants(&restored, &mapping);
        assert!(checks.ok);
    }

    #[test]
    fn keep_terms_get_frozen_with_continuing_ids() {
        let (frozen, mapping) = freeze_invariants("Buy TranceLate now");
        let (frozen2, mapping2) =
            freeze_keep_terms_into(&frozen, &mapping, &["TranceLate".to_string()]);
        assert_eq!(mapping2.len(), mapping.len() + 1);
        assert!(frozen2.contains("<|INV:"));
        assert_eq!(mapping2.last().unwrap().kind, InvariantType::KeepTerm);
    }
}
