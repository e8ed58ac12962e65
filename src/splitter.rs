use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::normalize::{is_noise_name, ORG_KEYWORD_RE};

// Semicolons and pipes are the only separators treated as reliable; many
// institution names legitimately contain commas.
static DELIM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[;|]\s*").expect("valid delimiter regex"));

static AND_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\band\b").expect("valid and regex"));
static AND_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+and\s+").expect("valid and split regex"));

const TRIVIAL_NOISE: &[&str] = &["unknown", "n/a", "na", "none"];

/// Breaks a raw affiliation field into a deduplicated ordered list of
/// institution-name candidates.
///
/// A segment is additionally split on " and " only when every side carries an
/// organization keyword, so phrases like "Science and Engineering" stay
/// intact while "Kyoto University and RIKEN AIP" splits in two.
pub fn split_affiliations(value: &str) -> Vec<String> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    let mut cleaned: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for part in DELIM_RE.split(value) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut subparts = vec![part.to_string()];
        if AND_WORD_RE.is_match(part) {
            let pieces: Vec<String> = AND_SPLIT_RE
                .split(part)
                .map(str::trim)
                .filter(|seg| !seg.is_empty())
                .map(str::to_string)
                .collect();
            if pieces.len() >= 2 && pieces.iter().all(|seg| ORG_KEYWORD_RE.is_match(seg)) {
                subparts = pieces;
            }
        }
        for sp in subparts {
            let lowered = sp.to_lowercase();
            if TRIVIAL_NOISE.contains(&lowered.as_str()) {
                continue;
            }
            if is_noise_name(&sp) {
                continue;
            }
            if seen.insert(sp.clone()) {
                cleaned.push(sp);
            }
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_candidate_when_no_delimiters() {
        assert_eq!(
            split_affiliations("  Stanford University  "),
            vec!["Stanford University"]
        );
    }

    #[test]
    fn splits_on_semicolons_and_pipes() {
        assert_eq!(
            split_affiliations("MIT; Stanford University | ETH Zurich"),
            vec!["MIT", "Stanford University", "ETH Zurich"]
        );
    }

    #[test]
    fn and_split_needs_org_keywords_on_both_sides() {
        assert_eq!(
            split_affiliations("Kyoto University and RIKEN AIP"),
            vec!["Kyoto University", "RIKEN AIP"]
        );
        assert_eq!(
            split_affiliations("Faculty of Science and Engineering"),
            vec!["Faculty of Science and Engineering"]
        );
    }

    #[test]
    fn noise_segments_are_discarded() {
        assert!(split_affiliations("unknown").is_empty());
        assert!(split_affiliations("N/A; none; 42; x").is_empty());
        assert_eq!(
            split_affiliations("unknown; Stanford University"),
            vec!["Stanford University"]
        );
    }

    #[test]
    fn duplicates_within_one_field_collapse() {
        assert_eq!(
            split_affiliations("MIT; MIT; MIT"),
            vec!["MIT"]
        );
    }

    #[test]
    fn empty_input_yields_no_candidates() {
        assert!(split_affiliations("").is_empty());
        assert!(split_affiliations("   ").is_empty());
    }
}
