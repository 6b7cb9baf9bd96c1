//! IndicatorClient against a local catalog server.

use pomona_client::{HttpFetcher, IndicatorClient, IndicatorClientFactory};
use pomona_core::traits::{CatalogClient, CatalogClientFactory};
use pomona_core::{AppError, SourceEntry};

use crate::integration::common::{Reply, TestServer, catalog_body, fast_config};

#[tokio::test]
async fn test_download_catalog() {
    let server = TestServer::start(vec![Reply::Ok(catalog_body())]).await;
    let factory = IndicatorClientFactory::new(fast_config(2)).unwrap();
    let source = SourceEntry::new("ine", server.url("/xml_indic.jsp?opc=3").as_str());
    let client = factory.create(&source).unwrap();

    let document = client.download_catalog().await.unwrap();

    assert_eq!(document.len(), catalog_body().len() as u64);
}

#[tokio::test]
async fn test_empty_catalog_is_an_error() {
    let server = TestServer::start(vec![Reply::Ok(Vec::new())]).await;
    let fetcher = HttpFetcher::new(fast_config(1)).unwrap();
    let source = SourceEntry::new("ine", server.url("/").as_str());
    let client = IndicatorClient::new(fetcher, &source).unwrap();

    let err = client.download_catalog().await.unwrap_err();

    assert!(matches!(err, AppError::EmptyResponse));
}

#[tokio::test]
async fn test_fetch_detail_requests_varcd() {
    let server = TestServer::start(vec![Reply::Ok(b"<indicator id=\"42\"/>".to_vec())]).await;
    let fetcher = HttpFetcher::new(fast_config(1)).unwrap();
    let source = SourceEntry::new("ine", server.url("/xml_indic.jsp?opc=3").as_str());
    let client = IndicatorClient::new(fetcher, &source).unwrap();

    let body = client.fetch_detail("42").await.unwrap();

    assert_eq!(body, b"<indicator id=\"42\"/>");
    assert_eq!(
        server.request_lines(),
        vec!["GET /xml_indic.jsp?opc=3&lang=PT&varcd=42 HTTP/1.1".to_string()]
    );
}

#[tokio::test]
async fn test_fetch_enrichment() {
    let ids = b"<ids><id>0008074</id><id>0008075</id></ids>".to_vec();
    let server = TestServer::start(vec![Reply::Ok(ids)]).await;
    let fetcher = HttpFetcher::new(fast_config(1)).unwrap();
    let mut source = SourceEntry::new("ine", server.url("/catalog").as_str());
    source.enrichment_url = Some(server.url("/hvd").to_string());
    let client = IndicatorClient::new(fetcher, &source).unwrap();

    let set = client.fetch_enrichment().await.unwrap().unwrap();

    assert_eq!(set.len(), 2);
    assert!(set.contains("0008074"));
}

#[tokio::test]
async fn test_no_enrichment_url_skips_request() {
    let server = TestServer::start(vec![Reply::Status(500)]).await;
    let fetcher = HttpFetcher::new(fast_config(1)).unwrap();
    let mut source = SourceEntry::new("ine", server.url("/catalog").as_str());
    source.enrichment_url = None;
    let client = IndicatorClient::new(fetcher, &source).unwrap();

    assert!(client.fetch_enrichment().await.unwrap().is_none());
    assert_eq!(server.connections(), 0);
}
