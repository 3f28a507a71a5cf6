//! Romance-language (fr/it/es/pt) formality pronoun substitution.

use regex::Regex;

use crate::invariants::{self, InvariantChecks};

fn apply_pairs(text: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = text.to_string();
    for (pat, rep) in pairs {
        out = Regex::new(pat).unwrap().replace_all(&out, *rep).to_string();
    }
    out
}

const FR_INFORMAL: &[(&str, &str)] = &[
    (r"\b[Vv]ous\b", "tu"),
    (r"\b[Vv]otre\b", "ton"),
    (r"\b[Vv]os\b", "tes"),
];
const FR_FORMAL: &[(&str, &str)] = &[
    (r"\b[Tt]u\b", "vous"),
    (r"\b[Tt]on\b", "votre"),
    (r"\b[Tt]a\b", "votre"),
    (r"\b[Tt]es\b", "vos"),
];

const IT_INFORMAL: &[(&str, &str)] = &[
    (r"\b[Ll]ei\b", "tu"),
    (r"\b[Ll]e\b", "ti"),
    (r"\b[Ss]uo[ai]\b", "tuo"),
    (r"\b[Ss]uoi\b", "tuoi"),
    (r"\b[Ss]ue\b", "tue"),
];
const IT_FORMAL: &[(&str, &str)] = &[
    (r"\b[Tt]u\b", "Lei"),
    (r"\b[Tt]i\b", "Le"),
    (r"\b[Tt]uo[ai]\b", "Suo"),
    (r"\b[Tt]uoi\b", "Suoi"),
    (r"\b[Tt]ue\b", "Sue"),
];

const ES_INFORMAL: &[(&str, &str)] = &[
    (r"\b[Uu]sted(es)?\b", "tú"),
    (r"\b[Ss]u(s)?\b", "tu"),
    (r"\b[Ll]e(s)?\b", "te"),
];
const ES_FORMAL: &[(&str, &str)] = &[
    (r"\b[Tt]ú\b", "usted"),
    (r"\b[Tt]u\b", "su"),
    (r"\b[Tt]e\b", "le"),
];

const PT_INFORMAL: &[(&str, &str)] = &[
    (r"\b[Vv]ocê(s)?\b", "tu"),
    (r"\b[Ss]eu(s)?\b", "teu"),
    (r"\b[Ss]ua(s)?\b", "tua"),
];
const PT_FORMAL: &[(&str, &str)] = &[
    (r"\b[Tt]u\b", "você"),
    (r"\b[Tt]eu(s)?\b", "seu"),
    (r"\b[Tt]ua(s)?\b", "sua"),
];

/// Apply formal/informal pronoun substitution for `lang_engine`, protecting
/// invariants and discarding the result if re-validation fails. A no-op
/// (address empty/"auto", or an unsupported language) returns `text` unchanged.
pub fn apply_style_romance_safe(
    text: &str,
    lang_engine: &str,
    address: &str,
) -> (String, InvariantChecks) {
    let addr = address.to_lowercase();
    if addr.is_empty() || addr == "auto" {
        return (text.to_string(), InvariantChecks::trivially_ok());
    }

    let informal = matches!(addr.as_str(), "du" | "informal");
    let formal = matches!(addr.as_str(), "sie" | "formal");

    let pairs: &[(&str, &str)] = match (lang_engine.to_lowercase().as_str(), informal, formal) {
        ("fr", true, _) => FR_INFORMAL,
        ("fr", _, true) => FR_FORMAL,
        ("it", true, _) => IT_INFORMAL,
        ("it", _, true) => IT_FORMAL,
        ("es", true, _) => ES_INFORMAL,
        ("es", _, true) => ES_FORMAL,
        ("pt", true, _) => PT_INFORMAL,
        ("pt", _, true) => PT_FORMAL,
        _ => return (text.to_string(), InvariantChecks::trivially_ok()),
    };

    let (frozen, mapping) = invariants::freeze_invariants(text);
    let transformed = apply_pairs(&frozen, pairs);
    let (restored, _) = invariants::unfreeze_invariants(&transformed, &mapping);
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
    fn auto_address_is_a_no_op() {
        let (out, _) = apply_style_romance_safe("Vous êtes ici", "fr", "auto");
        assert_eq!(out, "Vous êtes ici");
    }

    #[test]
    fn french_informal_rewrites_vous() {
        let (out, checks) = apply_style_romance_safe("Vous avez votre code", "fr", "du");
        assert!(checks.ok);
        assert!(out.contains("tu") || out.contains("ton"));
    }

    #[test]
    fn spanish_formal_rewrites_tu() {
        let (out, checks) = apply_style_romance_safe("Tu tienes tu código", "es", "sie");
        assert!(checks.ok);
        assert!(out.contains("usted") || out.contains("su"));
    }

    #[test]
    fn unsupported_language_is_a_no_op() {
        let (out, _) = apply_style_romance_safe("Du hast deinen Code", "de", "du");
        assert_eq!(out, "Du hast deinen Code");
    }

    #[test]
    fn invariants_survive_romance_pass() {
        let (out, checks) = apply_style_romance_safe("Vous avez <b>votre</b> code", "fr", "du");
        assert!(checks.ok);
        assert!(out.contains("<b>"));
    }
}
