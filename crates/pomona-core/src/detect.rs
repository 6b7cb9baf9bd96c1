//! Change detection between stored records and fresh catalog items.
//!
//! Comparison happens on normalized values only, so cosmetic differences
//! (case, accents, tag punctuation, URL slashes) never count as changes.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::models::{CatalogItem, EnrichmentSet, ResourceRef, StoredRecord};
use crate::normalize::normalize_tag;
use crate::sync::SyncOutcome;

/// Tags a harvester adds on top of what the catalog provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPolicy {
    sentinel_tags: BTreeSet<String>,
    enrichment_tag: Option<String>,
}

impl Default for TagPolicy {
    fn default() -> Self {
        Self::new(["ine.pt"], Some("hvd"))
    }
}

impl TagPolicy {
    /// Creates a policy. All tags are normalized on construction.
    pub fn new<I, S>(sentinel_tags: I, enrichment_tag: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            sentinel_tags: sentinel_tags
                .into_iter()
                .map(|t| normalize_tag(t.as_ref()))
                .filter(|t| !t.is_empty())
                .collect(),
            enrichment_tag: enrichment_tag
                .map(normalize_tag)
                .filter(|t| !t.is_empty()),
        }
    }

    /// Full tag set a record for `item` should carry.
    pub fn effective_tags(&self, item: &CatalogItem, enrichment: &EnrichmentSet) -> BTreeSet<String> {
        let mut tags: BTreeSet<String> = item
            .tags
            .iter()
            .map(|t| normalize_tag(t))
            .filter(|t| !t.is_empty())
            .collect();
        tags.extend(self.sentinel_tags.iter().cloned());
        if let Some(tag) = &self.enrichment_tag {
            if enrichment.contains(&item.remote_id) {
                tags.insert(tag.clone());
            }
        }
        tags
    }
}

/// Result of comparing a stored record with a fresh item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDecision {
    /// The outcome classification for this item
    pub outcome: SyncOutcome,
    /// Human-readable reason for the decision
    pub reason: &'static str,
}

impl ChangeDecision {
    fn new(outcome: SyncOutcome, reason: &'static str) -> Self {
        Self { outcome, reason }
    }

    /// Returns true when the record must be (re)written.
    pub fn is_change(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Created | SyncOutcome::Updated)
    }
}

/// Decides whether a fresh item differs from its stored record.
///
/// Pure and cheap to clone; the enrichment set is shared.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    policy: TagPolicy,
    enrichment: Arc<EnrichmentSet>,
    force_full_sync: bool,
}

impl ChangeDetector {
    pub fn new(policy: TagPolicy, enrichment: Arc<EnrichmentSet>) -> Self {
        Self {
            policy,
            enrichment,
            force_full_sync: false,
        }
    }

    /// Treats every existing record as changed.
    pub fn with_force_full_sync(mut self, force: bool) -> Self {
        self.force_full_sync = force;
        self
    }

    pub fn policy(&self) -> &TagPolicy {
        &self.policy
    }

    pub fn enrichment(&self) -> &EnrichmentSet {
        &self.enrichment
    }

    /// Returns true if `fresh` should be written over `stored`.
    pub fn has_changed(&self, stored: Option<&StoredRecord>, fresh: &CatalogItem) -> bool {
        self.decide(stored, fresh).is_change()
    }

    /// Compares title, description, tags, resource identity and resource
    /// metadata, in that order, and reports the first difference.
    pub fn decide(&self, stored: Option<&StoredRecord>, fresh: &CatalogItem) -> ChangeDecision {
        let Some(stored) = stored else {
            return ChangeDecision::new(SyncOutcome::Created, "new record");
        };

        if self.force_full_sync {
            return ChangeDecision::new(SyncOutcome::Updated, "full resync forced");
        }

        if stored.title.trim() != fresh.title.trim() {
            return ChangeDecision::new(SyncOutcome::Updated, "title changed");
        }

        if stored.description.trim() != fresh.description.trim() {
            return ChangeDecision::new(SyncOutcome::Updated, "description changed");
        }

        let stored_tags: BTreeSet<String> = stored
            .tags
            .iter()
            .map(|t| normalize_tag(t))
            .filter(|t| !t.is_empty())
            .collect();
        if stored_tags != self.policy.effective_tags(fresh, &self.enrichment) {
            return ChangeDecision::new(SyncOutcome::Updated, "tags changed");
        }

        if resource_urls(&stored.resources) != resource_urls(&fresh.resources) {
            return ChangeDecision::new(SyncOutcome::Updated, "resource set changed");
        }

        if resource_tuples(&stored.resources) != resource_tuples(&fresh.resources) {
            return ChangeDecision::new(SyncOutcome::Updated, "resource metadata changed");
        }

        ChangeDecision::new(SyncOutcome::Unchanged, "unchanged")
    }
}

fn resource_urls(resources: &[ResourceRef]) -> BTreeSet<&str> {
    resources.iter().map(|r| r.url.trim()).collect()
}

fn resource_tuples(resources: &[ResourceRef]) -> Vec<(&str, &str, &str, &str)> {
    let mut tuples: Vec<_> = resources
        .iter()
        .map(|r| {
            (
                r.url.trim(),
                r.title.trim(),
                r.description.trim(),
                r.format.trim(),
            )
        })
        .collect();
    tuples.sort_unstable();
    tuples
}
