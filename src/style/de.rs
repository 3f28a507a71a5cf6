//! German formality (Du/Sie) and gender-inclusive style harmonization.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::invariants::{self, InvariantChecks};

const GENDER_STEMS: &[(&str, &str)] = &[
    ("Kunde", "Kunden"),
    ("Nutzer", "Nutzer"),
    ("Benutzer", "Benutzer"),
    ("Teilnehmer", "Teilnehmer"),
    ("Abonnent", "Abonnenten"),
    ("Leser", "Leser"),
    ("Student", "Studenten"),
    ("Mitarbeiter", "Mitarbeiter"),
];

fn plural_base(singular: &str) -> &str {
    GENDER_STEMS
        .iter()
        .find(|(sg, _)| *sg == singular)
        .map(|_| match singular {
            "Kunde" => "Kund",
            other => other,
        })
        .unwrap_or(singular)
}

fn de_du_pairs() -> Vec<(Regex, &'static str)> {
    vec![
        (Regex::new(r"\bSie\b").unwrap(), "du"),
        (Regex::new(r"\bIhnen\b").unwrap(), "dir"),
        (Regex::new(r"\bIhrer\b").unwrap(), "deiner"),
        (Regex::new(r"\bIhrem\b").unwrap(), "deinem"),
        (Regex::new(r"\bIhren\b").unwrap(), "deinen"),
        (Regex::new(r"\bIhre\b").unwrap(), "deine"),
        (Regex::new(r"\bIhr\b").unwrap(), "dein"),
    ]
}

fn de_sie_pairs() -> Vec<(Regex, &'static str)> {
    vec![
        (Regex::new(r"\bdu\b").unwrap(), "Sie"),
        (Regex::new(r"\bdir\b").unwrap(), "Ihnen"),
        (Regex::new(r"\bdich\b").unwrap(), "Sie"),
        (Regex::new(r"\bdeiner\b").unwrap(), "Ihrer"),
        (Regex::new(r"\bdeinem\b").unwrap(), "Ihrem"),
        (Regex::new(r"\bdeinen\b").unwrap(), "Ihren"),
        (Regex::new(r"\bdeine\b").unwrap(), "Ihre"),
        (Regex::new(r"\bdein\b").unwrap(), "Ihr"),
    ]
}

static DET_PLURAL: &str = r"(unsere|alle|viele|neue|zahlreiche|mehrere|diese|jene|solche|manche)";
static SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\W+)").unwrap());
static ALL_NONWORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\W+$").unwrap());
static DIVERS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(Sie|Ihnen|Ihrer|Ihrem|Ihren|Ihre|Ihr|du|dir|dich|deiner|deinem|deinen|deine|dein)\b")
        .unwrap()
});
static MULTI_WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Formality mode: `du`, `sie`, `divers` (strip address pronouns), or `auto`/empty (no-op).
fn apply_address(text: &str, address: &str) -> String {
    match address {
        "" | "auto" => text.to_string(),
        "divers" => {
            let stripped = DIVERS_RE.replace_all(text, "");
            MULTI_WS_RE.replace_all(&stripped, " ").trim().to_string()
        }
        "du" => {
            let mut out = text.to_string();
            for (pat, rep) in de_du_pairs() {
                out = pat.replace_all(&out, rep).to_string();
            }
            out
        }
        "sie" => {
            let mut out = text.to_string();
            for (pat, rep) in de_sie_pairs() {
                out = pat.replace_all(&out, rep).to_string();
            }
            out
        }
        _ => text.to_string(),
    }
}

fn sing_suffix(mode: &str) -> &'static str {
    match mode {
        "colon" => ":in",
        "star" => "*in",
        "innen" => "In",
        _ => "",
    }
}

fn plural_suffix(mode: &str) -> &'static str {
    match mode {
        "colon" => ":innen",
        "star" => "*innen",
        "innen" => "Innen",
        _ => "",
    }
}

fn genderize_token(tok: &str, mode: &str) -> String {
    if matches!(mode, "none" | "") {
        return tok.to_string();
    }
    let cap = tok.chars().next().is_some_and(|c| c.is_uppercase());
    let mut result = tok.to_string();
    for (sg, pl) in GENDER_STEMS {
        if tok == *sg {
            result = format!("{sg}{}", sing_suffix(mode));
            break;
        }
        if tok == *pl {
            result = format!("{}{}", plural_base(sg), plural_suffix(mode));
            break;
        }
    }
    if cap {
        let mut chars = result.chars();
        match chars.next() {
            Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str()),
            None => result,
        }
    } else {
        result
    }
}

/// Rewrite gendered occupational nouns into a gender-inclusive form
/// (`:in`/`*in`/`In` suffix families), skipping caller-supplied keep terms.
fn apply_gender(text: &str, mode: &str, keep_terms: &HashSet<String>) -> String {
    if matches!(mode, "none" | "") {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    for tok in SPLIT_RE.split(text) {
        if tok.is_empty() || ALL_NONWORD_RE.is_match(tok) {
            out.push_str(tok);
            continue;
        }
        if keep_terms.contains(tok) {
            out.push_str(tok);
            continue;
        }
        out.push_str(&genderize_token(tok, mode));
    }
    out
}

/// Make a gender-inclusive plural suffix agree after a plural determiner
/// (`unsere Kund:innen`, not `unsere Kund:in`).
fn plural_harmonize(text: &str, mode: &str) -> String {
    if matches!(mode, "none" | "") {
        return text.to_string();
    }
    let sing = sing_suffix(mode);
    let plur = plural_suffix(mode);
    let mut out = text.to_string();

    for (sg, plword) in GENDER_STEMS {
        let base = plural_base(sg);
        let sg_pat = Regex::new(&format!(
            r"(?i)\b{det}\s+{sg}{sing}\b",
            det = DET_PLURAL,
            sg = regex::escape(sg),
            sing = regex::escape(sing)
        ))
        .unwrap();
        out = sg_pat
            .replace_all(&out, |c: &regex::Captures| format!("{} {base}{plur}", &c[1]))
            .to_string();

        let pl_pat = Regex::new(&format!(
            r"(?i)\b{det}\s+{plword}{sing}\b",
            det = DET_PLURAL,
            plword = regex::escape(plword),
            sing = regex::escape(sing)
        ))
        .unwrap();
        out = pl_pat
            .replace_all(&out, |c: &regex::Captures| format!("{} {base}{plur}", &c[1]))
            .to_string();
    }

    let suffix_fixup = match mode {
        "colon" => Some((r":in\b", ":innen")),
        "star" => Some((r"\*in\b", "*innen")),
        "innen" => Some((r"In\b", "Innen")),
        _ => None,
    };
    if let Some((suffix_pat, replacement)) = suffix_fixup {
        let re = Regex::new(&format!(
            r"(?i)({det}\b[^.!?]{{0,120}}?){suffix}",
            det = DET_PLURAL,
            suffix = suffix_pat
        ))
        .unwrap();
        out = re
            .replace_all(&out, |c: &regex::Captures| format!("{}{replacement}", &c[1]))
            .to_string();
    }
    out
}

/// Contract `Jeder/Jede/Jedes Nutzer:in` into the combined `Jede:r Nutzer:in` form.
fn article_harmonize(text: &str, mode: &str) -> String {
    let (suffix_re, template): (&str, &str) = match mode {
        "colon" => (r"\b(Jeder|Jede|Jedes)\s+([A-Za-zÄÖÜäöüß\-]+):in\b", "Jede:r $2:in"),
        "star" => (r"\b(Jeder|Jede|Jedes)\s+([A-Za-zÄÖÜäöüß\-]+)\*in\b", "Jede*r $2*in"),
        "innen" => (r"\b(Jeder|Jede|Jedes)\s+([A-Za-zÄÖÜäöüß\-]+)In\b", "Jede/r $2In"),
        _ => return text.to_string(),
    };
    Regex::new(suffix_re).unwrap().replace_all(text, template).to_string()
}

static MAIL_LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bMail\s*(zu|an)?\s*:").unwrap());
static LABEL_SPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(Budget|E-?Mail):\s*").unwrap());

fn label_normalize(text: &str) -> String {
    let out = MAIL_LABEL_RE.replace_all(text, "E-Mail: ");
    LABEL_SPACE_RE.replace_all(&out, "$1: ").to_string()
}

static PUNCT_SPACE_BEFORE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*([,.;!?])").unwrap());
static PUNCT_SPACE_AFTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([,;:])(\S)").unwrap());

fn punct_ws_normalize(text: &str) -> String {
    let out = MULTI_WS_RE.replace_all(text, " ");
    let out = PUNCT_SPACE_BEFORE_RE.replace_all(&out, "$1");
    PUNCT_SPACE_AFTER_RE.replace_all(&out, "$1 $2").to_string()
}

/// Apply the full German style pipeline to already-translated text, protecting
/// invariants and discarding the result if re-validation fails.
pub fn apply_style_de_safe(
    text: &str,
    address: &str,
    gender: &str,
    keep_terms: &HashSet<String>,
) -> (String, InvariantChecks) {
    let (frozen, mapping) = invariants::freeze_invariants(text);

    let mut seg = apply_address(&frozen, address);
    seg = apply_gender(&seg, gender, keep_terms);
    seg = plural_harmonize(&seg, gender);
    seg = article_harmonize(&seg, gender);
    seg = label_normalize(&seg);
    seg = punct_ws_normalize(&seg);

    let (restored, _) = invariants::unfreeze_invariants(&seg, &mapping);
    let checks = invariants::validate_invariants(&restored, &mapping);

    if checks.ok {
        (restored, checks)
    } else {
        (text.to_string(), checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn du_address_rewrites_formal_pronouns() {
        let keep = HashSet::new();
        let (out, checks) = apply_style_de_safe("Haben Sie Ihren Code?", "du", "none", &keep);
        assert!(checks.ok);
        assert!(out.contains("du") || out.contains("dein"));
    }

    #[test]
    fn gender_colon_suffix_applies_to_stems() {
        let keep = HashSet::new();
        let (out, checks) = apply_style_de_safe("Jeder Kunde profitiert", "auto", "colon", &keep);
        assert!(checks.ok);
        assert!(out.contains("Kunde:in") || out.contains("Jede:r"));
    }

    #[test]
    fn divers_strips_address_pronouns() {
        let keep = HashSet::new();
        let (out, checks) = apply_style_de_safe("Haben Sie das?", "divers", "none", &keep);
        assert!(checks.ok);
        assert!(!out.contains("Sie"));
    }

    #[test]
    fn invariants_survive_style_pass() {
        let keep = HashSet::new();
        let (out, checks) = apply_style_de_safe("Kontakt: <b>support@example.com</b>", "du", "none", &keep);
        assert!(checks.ok);
        assert!(out.contains("support@example.com"));
    }

    #[test]
    fn label_normalize_adds_e_mail_prefix() {
        assert_eq!(label_normalize("Mail:"), "E-Mail: ");
    }
}
