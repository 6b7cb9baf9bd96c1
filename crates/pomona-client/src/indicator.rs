//! Client for statistical indicator catalogs served as XML over HTTP.
//!
//! A source exposes three documents: the full catalog, a per-item detail
//! view (the catalog URL plus `varcd=<id>`), and an optional id list of
//! high-value indicators.

use std::sync::Arc;

use pomona_core::error::AppError;
use pomona_core::extract::read_id_list;
use pomona_core::metrics::MetricsSink;
use pomona_core::traits::{CatalogClient, CatalogClientFactory};
use pomona_core::{EnrichmentSet, HttpConfig, ScratchDocument, SourceEntry};
use reqwest::Url;

use crate::fetch::HttpFetcher;

/// Catalog client for one configured source.
///
/// # Examples
///
/// ```
/// use pomona_client::{HttpFetcher, IndicatorClient};
/// use pomona_core::{HttpConfig, SourceEntry};
///
/// let fetcher = HttpFetcher::new(HttpConfig::default()).unwrap();
/// let source = SourceEntry::new("ine", "https://www.ine.pt/ine/xml_indic.jsp?opc=3");
/// let client = IndicatorClient::new(fetcher, &source).unwrap();
///
/// let url = client.detail_url("0008074");
/// assert_eq!(url.as_str(), "https://www.ine.pt/ine/xml_indic.jsp?opc=3&lang=PT&varcd=0008074");
/// ```
#[derive(Clone)]
pub struct IndicatorClient {
    fetcher: HttpFetcher,
    catalog_url: Url,
    enrichment_url: Option<Url>,
    detail_language: String,
}

impl IndicatorClient {
    /// Creates a client for `source`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the catalog or enrichment URL does not parse.
    pub fn new(fetcher: HttpFetcher, source: &SourceEntry) -> Result<Self, AppError> {
        let catalog_url = parse_url(&source.url)?;
        let enrichment_url = source.enrichment_url.as_deref().map(parse_url).transpose()?;

        Ok(Self {
            fetcher,
            catalog_url,
            enrichment_url,
            detail_language: source.detail_language.clone(),
        })
    }

    pub fn catalog_url(&self) -> &Url {
        &self.catalog_url
    }

    /// Detail URL for one indicator.
    ///
    /// Keeps the catalog's query, adds `lang` when absent and sets `varcd`.
    pub fn detail_url(&self, remote_id: &str) -> Url {
        let mut url = self.catalog_url.clone();
        let mut has_lang = false;
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "varcd")
            .inspect(|(key, value)| has_lang |= key == "lang" && !value.is_empty())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        {
            let mut query = url.query_pairs_mut();
            query.clear();
            for (key, value) in &pairs {
                if key == "lang" && value.is_empty() {
                    continue;
                }
                query.append_pair(key, value);
            }
            if !has_lang {
                query.append_pair("lang", &self.detail_language);
            }
            query.append_pair("varcd", remote_id);
        }
        url
    }
}

fn parse_url(raw: &str) -> Result<Url, AppError> {
    Url::parse(raw.trim()).map_err(|_| AppError::InvalidUrl(raw.to_string()))
}

impl CatalogClient for IndicatorClient {
    async fn download_catalog(&self) -> Result<ScratchDocument, AppError> {
        let document = self.fetcher.download_to_scratch(&self.catalog_url).await?;
        if document.is_empty() {
            return Err(AppError::EmptyResponse);
        }
        Ok(document)
    }

    async fn fetch_detail(&self, remote_id: &str) -> Result<Vec<u8>, AppError> {
        self.fetcher.fetch_bytes(&self.detail_url(remote_id)).await
    }

    async fn fetch_enrichment(&self) -> Result<Option<EnrichmentSet>, AppError> {
        let Some(url) = &self.enrichment_url else {
            return Ok(None);
        };
        let body = self.fetcher.fetch_bytes(url).await?;
        let ids = read_id_list(body.as_slice())?;
        tracing::debug!(url = %url, count = ids.len(), "Enrichment list fetched");
        Ok(Some(ids))
    }
}

/// Factory for creating [`IndicatorClient`]s that share one HTTP client.
#[derive(Clone)]
pub struct IndicatorClientFactory {
    fetcher: HttpFetcher,
}

impl IndicatorClientFactory {
    pub fn new(config: HttpConfig) -> Result<Self, AppError> {
        Ok(Self {
            fetcher: HttpFetcher::new(config)?,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.fetcher = self.fetcher.with_metrics(metrics);
        self
    }
}

impl CatalogClientFactory for IndicatorClientFactory {
    type Client = IndicatorClient;

    fn create(&self, source: &SourceEntry) -> Result<Self::Client, AppError> {
        IndicatorClient::new(self.fetcher.clone(), source)
    }
}
