use deunicode::deunicode;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Reverse;

/// Keyword pattern shared by the splitter and the core-name ranker. Matches
/// the organization words that reliably mark a standalone institution name.
pub static ORG_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:University|Institute|Research|College|Laborator\w*|Center|Centre|CNRS|INRAE|RIKEN|Google Research|Microsoft Research)\b",
    )
    .expect("valid org keyword regex")
});

static LEADING_UNIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:Department|Dept\.?|School|Faculty) of [^,]+,\s*")
        .expect("valid leading unit regex")
});

static JOINER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(?:,| and | & |\+|;|\|)\s*").expect("valid joiner regex"));

static UNIVERSITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bUniversity\b").expect("valid university regex"));
static INSTITUTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bInstitute\b").expect("valid institute regex"));
static RESEARCH_UNIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:Research|Laborator\w*|Center|Centre)\b").expect("valid research regex")
});

// Trailing footnote markers that survive OCR: digits, daggers, section and
// pilcrow marks, superscripts, asterisks, carets, stray plus/minus.
static FOOTNOTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\s\x{2020}\x{2021}\x{A7}\x{B6}\x{B0}\x{B9}\x{B2}\x{B3}*^+\-\d]+$")
        .expect("valid footnote regex")
});

// Dash, quote and accent characters dropped before ASCII folding. Includes
// both the combining accents and their standalone forms so OCR artifacts like
// "T ¨ubingen" normalize the same way as the clean spelling.
const STRIPPED_MARKS: &[char] = &[
    '\u{2013}', '\u{2014}', '\u{2019}', '\u{2018}', '\u{00B4}', '\u{02DC}', '\u{00A8}',
    '\u{0308}', '\u{0301}', '\u{0300}', '\u{0302}',
];

const NOISE_NAMES: &[&str] = &["inc", "ltd", "research", "faculty"];

/// Lowercased ASCII key used for alias-table matching. Applied consistently
/// to both table keys and inputs so diacritic and punctuation variants of the
/// same name collide.
pub fn norm_key(value: &str) -> String {
    let pre: String = value
        .chars()
        .filter(|ch| !STRIPPED_MARKS.contains(ch))
        .collect();
    let folded = deunicode(&pre).to_lowercase();
    let mut kept = String::with_capacity(folded.len());
    for ch in folded.chars() {
        match ch {
            'a'..='z' | '0'..='9' | '+' | '&' | '@' | '#' | '-' => kept.push(ch),
            c if c.is_whitespace() => kept.push(' '),
            _ => {}
        }
    }
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Removes trailing footnote-like tokens ("USC†" -> "USC", "AITRICS2" -> "AITRICS").
pub fn strip_footnotes(value: &str) -> String {
    FOOTNOTE_RE.replace(value, "").trim().to_string()
}

/// True for segments that carry no usable institution name: empty after
/// normalization, a bare filler word, pure digits, or a single character.
pub fn is_noise_name(name: &str) -> bool {
    let n = norm_key(name);
    if n.is_empty() {
        return true;
    }
    if NOISE_NAMES.contains(&n.as_str()) {
        return true;
    }
    if n.chars().all(|ch| ch.is_ascii_digit()) {
        return true;
    }
    n.chars().count() == 1
}

fn rank(segment: &str) -> usize {
    if UNIVERSITY_RE.is_match(segment) {
        0
    } else if INSTITUTE_RE.is_match(segment) {
        1
    } else if RESEARCH_UNIT_RE.is_match(segment) {
        2
    } else {
        3
    }
}

/// Heuristically strips department/lab segments and returns the most likely
/// core organization name.
///
/// Examples:
///   - "Department of Computer Science, Stanford University" -> "Stanford University"
///   - "Microsoft Research, Cambridge" -> "Microsoft Research"
///   - "Kyoto University and RIKEN AIP" -> "Kyoto University"
pub fn core_name(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() {
        return String::new();
    }
    let s = LEADING_UNIT_RE.replace(s, "");
    let candidates: Vec<&str> = JOINER_RE
        .split(&s)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    if candidates.is_empty() {
        return s.trim().to_string();
    }
    let mut orgs: Vec<&str> = candidates
        .iter()
        .copied()
        .filter(|part| ORG_KEYWORD_RE.is_match(part))
        .collect();
    if !orgs.is_empty() {
        // Prefer universities, then institutes, then research units; ties go
        // to the longer segment, which is usually the more specific one.
        orgs.sort_by_key(|part| (rank(part), Reverse(part.len())));
        return orgs[0].to_string();
    }
    // The last comma segment is usually the outermost parent organization in
    // "department, institute" orderings.
    candidates.last().map(|s| s.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_name_strips_department_prefix() {
        assert_eq!(
            core_name("Department of Computer Science, Stanford University"),
            "Stanford University"
        );
        assert_eq!(
            core_name("School of Informatics, University of Edinburgh"),
            "University of Edinburgh"
        );
    }

    #[test]
    fn core_name_prefers_university_over_institute() {
        assert_eq!(
            core_name("Kyoto University and RIKEN AIP"),
            "Kyoto University"
        );
        assert_eq!(
            core_name("The University of Tokyo and RIKEN AIP"),
            "The University of Tokyo"
        );
    }

    #[test]
    fn core_name_falls_back_to_last_segment() {
        assert_eq!(core_name("Microsoft Research, Cambridge"), "Microsoft Research");
        assert_eq!(core_name("Some Lab, Acme Corp"), "Acme Corp");
    }

    #[test]
    fn norm_key_folds_diacritics_and_punctuation() {
        assert_eq!(norm_key("Linköping University"), "linkoping university");
        assert_eq!(norm_key("Chang\u{2019}an University"), norm_key("Chang'an University"));
        assert_eq!(
            norm_key("University of T \u{00A8}ubingen"),
            "university of t ubingen"
        );
        assert_eq!(norm_key("  Texas  A&M   University "), "texas a&m university");
    }

    #[test]
    fn strip_footnotes_removes_trailing_markers() {
        assert_eq!(strip_footnotes("USC\u{2020}"), "USC");
        assert_eq!(strip_footnotes("AITRICS2"), "AITRICS");
        assert_eq!(strip_footnotes("MIT *"), "MIT");
        assert_eq!(strip_footnotes("ETH Zurich"), "ETH Zurich");
    }

    #[test]
    fn noise_names_are_detected() {
        assert!(is_noise_name(""));
        assert!(is_noise_name("  "));
        assert!(is_noise_name("Research"));
        assert!(is_noise_name("1234"));
        assert!(is_noise_name("x"));
        assert!(!is_noise_name("MIT"));
    }
}
