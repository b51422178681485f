//! Deduplicating source registry shared across the waves of one run.
//!
//! Sources are keyed by [`canonicalize_url`]. Each new source gets
//! `id = max(existing ids) + 1`; existing entries are never mutated or
//! removed, so IDs strictly increase and are never reused.

use std::collections::{BTreeSet, HashMap};

use crate::canonical::{canonicalize_url, domain_of};
use crate::models::{RawHit, SourceItem};

/// Outcome of a single [`SourceIndex::merge`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// IDs assigned by this merge, ascending.
    pub added: Vec<u32>,
    /// Hits whose canonical URL was already indexed.
    pub duplicates: usize,
    /// Hits left unexamined because the index reached capacity.
    pub skipped_at_capacity: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SourceIndex {
    items: Vec<SourceItem>,
    by_canonical: HashMap<String, u32>,
}

impl SourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All sources in ascending ID order.
    pub fn items(&self) -> &[SourceItem] {
        &self.items
    }

    pub fn get(&self, id: u32) -> Option<&SourceItem> {
        self.items
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(|pos| &self.items[pos])
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.by_canonical.contains_key(&canonicalize_url(url))
    }

    /// Highest assigned ID, or 0 when empty. Captured before a merge to find
    /// the sources that merge added.
    pub fn high_water_mark(&self) -> u32 {
        self.items.last().map(|s| s.id).unwrap_or(0)
    }

    /// Sources with an ID strictly greater than `mark`.
    pub fn items_after(&self, mark: u32) -> &[SourceItem] {
        let start = self.items.partition_point(|s| s.id <= mark);
        &self.items[start..]
    }

    pub fn known_ids(&self) -> BTreeSet<u32> {
        self.items.iter().map(|s| s.id).collect()
    }

    /// Add every hit whose canonical URL is not yet indexed, stopping as soon
    /// as the index holds `capacity` sources.
    pub fn merge<I>(&mut self, hits: I, capacity: usize) -> MergeReport
    where
        I: IntoIterator<Item = RawHit>,
    {
        let mut report = MergeReport::default();
        let mut hits = hits.into_iter();

        while let Some(hit) = hits.next() {
            if self.items.len() >= capacity {
                report.skipped_at_capacity = 1 + hits.count();
                break;
            }

            let key = canonicalize_url(&hit.url);
            if self.by_canonical.contains_key(&key) {
                report.duplicates += 1;
                continue;
            }

            let id = self.high_water_mark() + 1;
            let domain = domain_of(&hit.url);
            self.by_canonical.insert(key, id);
            self.items.push(SourceItem {
                id,
                title: hit.title,
                url: hit.url,
                snippet: hit.snippet,
                date: hit.published,
                domain,
            });
            report.added.push(id);
        }

        report
    }
}

/// Functional form of [`SourceIndex::merge`]: consumes the index and returns
/// the extended one.
pub fn merge<I>(mut existing: SourceIndex, hits: I, capacity: usize) -> (SourceIndex, MergeReport)
where
    I: IntoIterator<Item = RawHit>,
{
    let report = existing.merge(hits, capacity);
    (existing, report)
}
