//! Mapping of extracted catalog items onto store records.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::detect::TagPolicy;
use crate::models::{CatalogContext, CatalogItem, EnrichmentSet, Frequency, StoredRecord};

/// Date format of the `last_update` field.
const LAST_UPDATE_FORMAT: &str = "%d-%m-%Y";

/// Builds finalized records from catalog items.
///
/// Uses the same [`TagPolicy`] and enrichment set as the change detector, so
/// a record written here compares as unchanged on the next run.
#[derive(Debug, Clone)]
pub struct RecordMapper {
    policy: TagPolicy,
    enrichment: Arc<EnrichmentSet>,
    extras_namespace: String,
    license: Option<String>,
}

impl RecordMapper {
    pub fn new(policy: TagPolicy, enrichment: Arc<EnrichmentSet>) -> Self {
        Self {
            policy,
            enrichment,
            extras_namespace: "ine".to_string(),
            license: Some("cc-by".to_string()),
        }
    }

    pub fn with_extras_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.extras_namespace = namespace.into();
        self
    }

    pub fn with_license(mut self, license: Option<String>) -> Self {
        self.license = license;
        self
    }

    /// Overwrites the harvested fields of `record` with values from `item`.
    ///
    /// Store-owned fields (`id`, `source`) are kept. `last_modified` is only
    /// replaced when the item carries a parseable update date.
    pub fn finalize(&self, mut record: StoredRecord, item: &CatalogItem, context: &CatalogContext) -> StoredRecord {
        record.remote_id = item.remote_id.clone();
        record.title = item.title.trim().to_string();
        record.description = item.description.trim().to_string();
        record.tags = self
            .policy
            .effective_tags(item, &self.enrichment)
            .into_iter()
            .collect();
        record.resources = item.resources.clone();
        record.frequency = Frequency::from_periodicity(item.fields.periodicity.as_deref());
        record.license = self.license.clone();

        if let Some(modified) = item.fields.last_update.as_deref().and_then(parse_last_update) {
            record.last_modified = Some(modified);
        }

        let fields = &item.fields;
        let extras = [
            ("language", context.language.as_deref()),
            ("extraction_date", context.extraction_date.as_deref()),
            ("varcd", fields.varcd.as_deref()),
            ("last_period_available", fields.last_period_available.as_deref()),
            ("update_type", fields.update_type.as_deref()),
            ("source", fields.source.as_deref()),
            ("geo_lastlevel", fields.geo_lastlevel.as_deref()),
            ("last_update", fields.last_update.as_deref()),
        ];
        for (key, value) in extras {
            let key = format!("{}:{}", self.extras_namespace, key);
            match value.map(str::trim).filter(|v| !v.is_empty()) {
                Some(value) => {
                    record.extras.insert(key, value.to_string());
                }
                None => {
                    record.extras.remove(&key);
                }
            }
        }

        record
    }
}

/// Parses a `dd-mm-YYYY` date as midnight UTC.
pub fn parse_last_update(value: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(value.trim(), LAST_UPDATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
