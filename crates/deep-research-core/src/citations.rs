//! Inline citation extraction and cleanup.
//!
//! Narratives cite sources with bracketed numbers: `[3]` or grouped
//! `[1, 4]`. After synthesis every group is rewritten so that only IDs
//! present in the source index remain; a group with no known IDs is removed
//! together with the single space before it. The cleaned citation list is
//! the ascending set of IDs left in the text.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};

fn citation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<lead>[ \t]?)\[(?P<nums>\s*\d{1,9}(?:\s*[,;]\s*\d{1,9})*\s*)\]")
            .expect("citation pattern is valid")
    })
}

fn parse_group(nums: &str) -> impl Iterator<Item = u32> + '_ {
    nums.split([',', ';'])
        .filter_map(|n| n.trim().parse::<u32>().ok())
}

/// Every number cited in `text`, in order of first appearance.
pub fn extract_citations(text: &str) -> Vec<u32> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for caps in citation_re().captures_iter(text) {
        for n in parse_group(&caps["nums"]) {
            if seen.insert(n) {
                out.push(n);
            }
        }
    }
    out
}

/// Rewrite `text` keeping only citations in `known`, and return the cleaned
/// text with the ascending list of IDs it still cites.
pub fn clean_citations(text: &str, known: &BTreeSet<u32>) -> (String, Vec<u32>) {
    let mut cited = BTreeSet::new();
    let cleaned = citation_re().replace_all(text, |caps: &Captures| {
        let mut kept: Vec<u32> = Vec::new();
        for n in parse_group(&caps["nums"]) {
            if known.contains(&n) && !kept.contains(&n) {
                kept.push(n);
            }
        }
        if kept.is_empty() {
            return String::new();
        }
        cited.extend(kept.iter().copied());
        let list: Vec<String> = kept.iter().map(|n| n.to_string()).collect();
        format!("{}[{}]", &caps["lead"], list.join(", "))
    });
    (cleaned.into_owned(), cited.into_iter().collect())
}

/// Remove every citation marker from `text`, leaving plain prose.
pub fn strip_citations(text: &str) -> String {
    citation_re().replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(ids: &[u32]) -> BTreeSet<u32> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_extract_single_and_grouped() {
        let text = "AI triage cut wait times [2]. Adoption is uneven [1, 3; 2].";
        assert_eq!(extract_citations(text), vec![2, 1, 3]);
    }

    #[test]
    fn test_extract_ignores_non_numeric_brackets() {
        assert!(extract_citations("See [note] and [a1] and [].").is_empty());
    }

    #[test]
    fn test_clean_drops_unknown_ids() {
        let (text, cited) = clean_citations("Claim one [1]. Claim two [9]. Both [1, 9, 2].", &known(&[1, 2]));
        assert_eq!(text, "Claim one [1]. Claim two. Both [1, 2].");
        assert_eq!(cited, vec![1, 2]);
    }

    #[test]
    fn test_clean_is_sorted_and_deduplicated() {
        let (_, cited) = clean_citations("x [3] y [1] z [3][1]", &known(&[1, 2, 3]));
        assert_eq!(cited, vec![1, 3]);
    }

    #[test]
    fn test_clean_no_known_ids() {
        let (text, cited) = clean_citations("Nothing here [4].", &BTreeSet::new());
        assert_eq!(text, "Nothing here.");
        assert!(cited.is_empty());
    }

    #[test]
    fn test_clean_is_idempotent() {
        let ids = known(&[1, 2]);
        let (once, c1) = clean_citations("A [1]. B [5]. C [2, 7].", &ids);
        let (twice, c2) = clean_citations(&once, &ids);
        assert_eq!(once, twice);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_strip_citations() {
        assert_eq!(strip_citations("Rates rose [1, 2] sharply [3]."), "Rates rose sharply.");
    }
}
