//! Declarative categorization rules for uploaded documents.
//!
//! The source metadata users supply is free-form; this table turns a title
//! or filename into a [`DocumentCategory`] plus default tags. Rules are
//! evaluated in order, first match wins, and the whole thing is a pure
//! function so it can be tested without any storage or UI attached.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::DocumentCategory;

/// One categorization rule: a case-insensitive pattern, the category it
/// assigns, and the tags it contributes.
struct CategoryRule {
    pattern: &'static str,
    category: DocumentCategory,
    tags: &'static [&'static str],
}

/// Ordered rule table. More specific patterns sit above generic ones —
/// "water bill" must hit `Bill` before a later rule could claim "water".
const RULES: &[CategoryRule] = &[
    CategoryRule {
        pattern: r"aadhaar|aadhar|pan\s*card|passport|voter|ration\s*card|driving\s*licen[cs]e",
        category: DocumentCategory::IdProof,
        tags: &["identity"],
    },
    CategoryRule {
        pattern: r"electricity|water\s*bill|gas\s*bill|invoice|receipt|bill\b",
        category: DocumentCategory::Bill,
        tags: &["utility"],
    },
    CategoryRule {
        pattern: r"scheme|yojana|yojna|subsidy|pradhan\s*mantri|atal\s*bhujal",
        category: DocumentCategory::Scheme,
        tags: &["scheme", "government"],
    },
    CategoryRule {
        pattern: r"prescription|medical|vaccin|hospital|health",
        category: DocumentCategory::Health,
        tags: &["health"],
    },
    CategoryRule {
        pattern: r"marksheet|mark\s*sheet|degree|diploma|school|college|certificate",
        category: DocumentCategory::Education,
        tags: &["education"],
    },
    CategoryRule {
        pattern: r"court|affidavit|agreement|deed|legal|notary",
        category: DocumentCategory::Legal,
        tags: &["legal"],
    },
    CategoryRule {
        pattern: r"bank|loan|insurance|tax|salary|statement",
        category: DocumentCategory::Financial,
        tags: &["finance"],
    },
];

static COMPILED: Lazy<Vec<(Regex, DocumentCategory, &'static [&'static str])>> = Lazy::new(|| {
    RULES
        .iter()
        .map(|rule| {
            let regex = Regex::new(&format!("(?i){}", rule.pattern))
                .expect("category rule patterns are valid regexes");
            (regex, rule.category, rule.tags)
        })
        .collect()
});

/// Categorize a document title or filename.
///
/// Returns the first matching rule's category and tags, or
/// ([`DocumentCategory::Other`], empty tags) when nothing matches.
///
/// # Examples
/// ```
/// use bhujal::rules::categorize;
/// use bhujal::types::DocumentCategory;
///
/// let (category, tags) = categorize("Atal Bhujal Yojana guidelines.pdf");
/// assert_eq!(category, DocumentCategory::Scheme);
/// assert!(tags.contains(&"scheme".to_string()));
/// ```
#[must_use]
pub fn categorize(title: &str) -> (DocumentCategory, Vec<String>) {
    for (regex, category, tags) in COMPILED.iter() {
        if regex.is_match(title) {
            return (*category, tags.iter().map(|t| (*t).to_string()).collect());
        }
    }
    (DocumentCategory::Other, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins() {
        // "water bill" matches the Bill rule even though later rules exist.
        let (category, _) = categorize("Water bill March 2025");
        assert_eq!(category, DocumentCategory::Bill);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let (category, _) = categorize("AADHAAR card scan");
        assert_eq!(category, DocumentCategory::IdProof);
    }

    #[test]
    fn scheme_documents_pick_up_tags() {
        let (category, tags) = categorize("PM Krishi Sinchayee Yojana circular");
        assert_eq!(category, DocumentCategory::Scheme);
        assert_eq!(tags, vec!["scheme".to_string(), "government".to_string()]);
    }

    #[test]
    fn unmatched_titles_default_to_other() {
        let (category, tags) = categorize("holiday photos");
        assert_eq!(category, DocumentCategory::Other);
        assert!(tags.is_empty());
    }
}
