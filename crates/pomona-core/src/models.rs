use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::normalize::strip_accents;

// =============================================================================
// Extracted catalog data
// =============================================================================

/// A link attached to a catalog item (HTML page, JSON data, metadata).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub url: String,
    pub title: String,
    pub description: String,
    pub format: String,
}

impl ResourceRef {
    pub fn new(url: impl Into<String>, title: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            description: String::new(),
            format: format.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Raw indicator sub-fields that feed record enrichment but not change detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorFields {
    pub periodicity: Option<String>,
    pub last_update: Option<String>,
    pub last_period_available: Option<String>,
    pub varcd: Option<String>,
    pub update_type: Option<String>,
    pub source: Option<String>,
    pub geo_lastlevel: Option<String>,
}

/// One indicator as extracted from the catalog.
///
/// Created by the streaming extractor and never mutated afterwards. Lives
/// for the duration of a single harvest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogItem {
    /// Identifier assigned by the remote catalog. May be empty when the
    /// source element had no `id` attribute.
    pub remote_id: String,
    pub title: String,
    pub description: String,
    /// Normalized tags from keywords, theme and subtheme.
    pub tags: BTreeSet<String>,
    pub resources: Vec<ResourceRef>,
    pub fields: IndicatorFields,
}

/// Catalog-wide values captured on their first occurrence in a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogContext {
    pub language: Option<String>,
    pub extraction_date: Option<String>,
}

impl CatalogContext {
    /// Fills the fields missing here from `fallback`.
    pub fn or(mut self, fallback: &CatalogContext) -> Self {
        if self.language.is_none() {
            self.language = fallback.language.clone();
        }
        if self.extraction_date.is_none() {
            self.extraction_date = fallback.extraction_date.clone();
        }
        self
    }
}

/// Where a unit of work gets its metadata from.
///
/// Decided once when the item is discovered: items present in the catalog are
/// processed from the catalog, seed ids the catalog lacked are fetched
/// individually from the detail endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    FromCatalog(Box<CatalogItem>),
    FallbackFetch(String),
}

impl ItemSource {
    pub fn remote_id(&self) -> &str {
        match self {
            ItemSource::FromCatalog(item) => &item.remote_id,
            ItemSource::FallbackFetch(id) => id,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ItemSource::FallbackFetch(_))
    }
}

/// Remote ids flagged by the enrichment endpoint (high-value datasets).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentSet {
    ids: HashSet<String>,
}

impl EnrichmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, remote_id: &str) -> bool {
        self.ids.contains(remote_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for EnrichmentSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter
                .into_iter()
                .map(Into::into)
                .map(|id: String| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }
}

// =============================================================================
// Frequency
// =============================================================================

/// Update frequency vocabulary of the destination portal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Frequency {
    #[default]
    Unknown,
    Punctual,
    Continuous,
    Hourly,
    FourTimesADay,
    ThreeTimesADay,
    Semidaily,
    Daily,
    FourTimesAWeek,
    ThreeTimesAWeek,
    Semiweekly,
    Weekly,
    Biweekly,
    ThreeTimesAMonth,
    Semimonthly,
    Monthly,
    Bimonthly,
    Quarterly,
    ThreeTimesAYear,
    Semiannual,
    Annual,
    Biennial,
    Triennial,
    Quinquennial,
    Irregular,
}

const ALL_FREQUENCIES: [Frequency; 25] = [
    Frequency::Unknown,
    Frequency::Punctual,
    Frequency::Continuous,
    Frequency::Hourly,
    Frequency::FourTimesADay,
    Frequency::ThreeTimesADay,
    Frequency::Semidaily,
    Frequency::Daily,
    Frequency::FourTimesAWeek,
    Frequency::ThreeTimesAWeek,
    Frequency::Semiweekly,
    Frequency::Weekly,
    Frequency::Biweekly,
    Frequency::ThreeTimesAMonth,
    Frequency::Semimonthly,
    Frequency::Monthly,
    Frequency::Bimonthly,
    Frequency::Quarterly,
    Frequency::ThreeTimesAYear,
    Frequency::Semiannual,
    Frequency::Annual,
    Frequency::Biennial,
    Frequency::Triennial,
    Frequency::Quinquennial,
    Frequency::Irregular,
];

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Unknown => "unknown",
            Frequency::Punctual => "punctual",
            Frequency::Continuous => "continuous",
            Frequency::Hourly => "hourly",
            Frequency::FourTimesADay => "fourTimesADay",
            Frequency::ThreeTimesADay => "threeTimesADay",
            Frequency::Semidaily => "semidaily",
            Frequency::Daily => "daily",
            Frequency::FourTimesAWeek => "fourTimesAWeek",
            Frequency::ThreeTimesAWeek => "threeTimesAWeek",
            Frequency::Semiweekly => "semiweekly",
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::ThreeTimesAMonth => "threeTimesAMonth",
            Frequency::Semimonthly => "semimonthly",
            Frequency::Monthly => "monthly",
            Frequency::Bimonthly => "bimonthly",
            Frequency::Quarterly => "quarterly",
            Frequency::ThreeTimesAYear => "threeTimesAYear",
            Frequency::Semiannual => "semiannual",
            Frequency::Annual => "annual",
            Frequency::Biennial => "biennial",
            Frequency::Triennial => "triennial",
            Frequency::Quinquennial => "quinquennial",
            Frequency::Irregular => "irregular",
        }
    }

    /// Maps a Portuguese periodicity label onto the portal vocabulary.
    ///
    /// Matching ignores case, accents and surrounding whitespace. Unknown or
    /// missing labels map to [`Frequency::Unknown`].
    ///
    /// # Examples
    ///
    /// ```
    /// use pomona_core::Frequency;
    ///
    /// assert_eq!(Frequency::from_periodicity(Some("Mensal")), Frequency::Monthly);
    /// assert_eq!(Frequency::from_periodicity(Some("Não periódica")), Frequency::Irregular);
    /// assert_eq!(Frequency::from_periodicity(None), Frequency::Unknown);
    /// ```
    pub fn from_periodicity(label: Option<&str>) -> Self {
        let Some(label) = label else {
            return Frequency::Unknown;
        };
        let key = strip_accents(label.trim()).to_lowercase();
        match key.as_str() {
            "anual" => Frequency::Annual,
            "semestral" => Frequency::Semiannual,
            "trimestral" => Frequency::Quarterly,
            "mensal" => Frequency::Monthly,
            "decenal" => Frequency::Unknown,
            "quinzenal" => Frequency::Biweekly,
            "semanal" => Frequency::Weekly,
            "diario" => Frequency::Daily,
            "continuo" => Frequency::Continuous,
            "irregular" => Frequency::Irregular,
            "pontual" => Frequency::Punctual,
            "quinquenal" => Frequency::Quinquennial,
            "bienal" => Frequency::Biennial,
            "trienal" => Frequency::Triennial,
            "nao periodica" => Frequency::Irregular,
            _ => Frequency::Unknown,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an invalid frequency string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFrequencyError(String);

impl fmt::Display for ParseFrequencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid frequency: {}", self.0)
    }
}

impl std::error::Error for ParseFrequencyError {}

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_FREQUENCIES
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ParseFrequencyError(s.to_string()))
    }
}

// =============================================================================
// Stored records
// =============================================================================

/// A dataset record as held by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Store identifier, `None` until the record is first saved.
    pub id: Option<Uuid>,
    pub source: String,
    pub remote_id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub resources: Vec<ResourceRef>,
    pub frequency: Frequency,
    pub license: Option<String>,
    pub extras: BTreeMap<String, String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl StoredRecord {
    /// Creates an empty, unsaved record for `(source, remote_id)`.
    pub fn new(source: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            remote_id: remote_id.into(),
            title: String::new(),
            description: String::new(),
            tags: Vec::new(),
            resources: Vec::new(),
            frequency: Frequency::Unknown,
            license: None,
            extras: BTreeMap::new(),
            last_modified: None,
        }
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Checks the record against the constraints the store enforces.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.remote_id.trim().is_empty() {
            return Err(AppError::ValidationError(
                "remote identifier must not be empty".to_string(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(AppError::ValidationError(format!(
                "record {} has an empty title",
                self.remote_id
            )));
        }
        for resource in &self.resources {
            let url = resource.url.as_str();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AppError::ValidationError(format!(
                    "record {} has a resource with an invalid URL: {}",
                    self.remote_id, url
                )));
            }
        }
        Ok(())
    }
}

/// Options controlling a record save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Run [`StoredRecord::validate`] before writing. The harvest hot path
    /// skips it because records are built from already-normalized values.
    pub validate: bool,
}

impl SaveOptions {
    pub fn validated() -> Self {
        Self { validate: true }
    }

    pub fn unvalidated() -> Self {
        Self { validate: false }
    }
}
