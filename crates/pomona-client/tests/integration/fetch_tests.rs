//! HttpFetcher retry and streaming behavior.

use std::sync::Arc;
use std::time::Duration;

use pomona_client::HttpFetcher;
use pomona_core::AppError;
use pomona_core::metrics::{InMemoryMetrics, names};

use crate::integration::common::{Reply, TestServer, catalog_body, fast_config};

#[tokio::test]
async fn test_download_to_scratch_streams_body() {
    let body = catalog_body();
    let server = TestServer::start(vec![Reply::Ok(body.clone())]).await;
    let fetcher = HttpFetcher::new(fast_config(3)).unwrap();

    let document = fetcher
        .download_to_scratch(&server.url("/catalog.xml"))
        .await
        .unwrap();

    assert_eq!(document.len(), body.len() as u64);
    assert_eq!(std::fs::read(document.path()).unwrap(), body);
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_http_status_is_not_retried() {
    let server = TestServer::start(vec![Reply::Status(404)]).await;
    let fetcher = HttpFetcher::new(fast_config(5)).unwrap();

    let err = fetcher
        .fetch_bytes(&server.url("/missing"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::HttpStatus { status: 404, .. }));
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = TestServer::start(vec![Reply::Status(503), Reply::Ok(catalog_body())]).await;
    let fetcher = HttpFetcher::new(fast_config(5)).unwrap();

    let err = fetcher.fetch_bytes(&server.url("/")).await.unwrap_err();

    assert!(matches!(err, AppError::HttpStatus { status: 503, .. }));
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_truncated_transfer_is_retried() {
    let body = catalog_body();
    let server = TestServer::start(vec![
        Reply::Truncated {
            declared: 100,
            body: b"<catalog>".to_vec(),
        },
        Reply::Ok(body.clone()),
    ])
    .await;
    let metrics = Arc::new(InMemoryMetrics::new());
    let fetcher = HttpFetcher::new(fast_config(3))
        .unwrap()
        .with_metrics(metrics.clone());

    let document = fetcher
        .download_to_scratch(&server.url("/catalog.xml"))
        .await
        .unwrap();

    assert_eq!(std::fs::read(document.path()).unwrap(), body);
    assert_eq!(server.connections(), 2);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.counter(names::FETCH_ATTEMPTS), 2);
    assert_eq!(snapshot.counter(names::FETCH_RETRIES), 1);
    assert_eq!(snapshot.counter(names::BYTES_DOWNLOADED), body.len() as u64);
}

#[tokio::test]
async fn test_truncated_transfer_exhausts_retries() {
    let server = TestServer::start(vec![Reply::Truncated {
        declared: 64,
        body: b"<cat".to_vec(),
    }])
    .await;
    let fetcher = HttpFetcher::new(fast_config(3)).unwrap();

    let err = fetcher.fetch_bytes(&server.url("/")).await.unwrap_err();

    match err {
        AppError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, AppError::TruncatedTransfer { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(server.connections(), 3);
}

#[tokio::test]
async fn test_failed_downloads_leave_no_scratch_files() {
    let server = TestServer::start(vec![Reply::Truncated {
        declared: 64,
        body: b"<cat".to_vec(),
    }])
    .await;
    let scratch = tempfile::tempdir().unwrap();
    let fetcher = HttpFetcher::new(fast_config(3).with_scratch_dir(scratch.path())).unwrap();

    let err = fetcher
        .download_to_scratch(&server.url("/catalog.xml"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(server.connections(), 3);
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_download_lands_in_scratch_dir() {
    let server = TestServer::start(vec![Reply::Ok(catalog_body())]).await;
    let scratch = tempfile::tempdir().unwrap();
    let fetcher = HttpFetcher::new(fast_config(1).with_scratch_dir(scratch.path())).unwrap();

    let document = fetcher
        .download_to_scratch(&server.url("/catalog.xml"))
        .await
        .unwrap();

    assert!(document.path().starts_with(scratch.path()));
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 1);
    drop(document);
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_connection_refused_exhausts_retries() {
    // Bind and drop to get a port nobody listens on.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let fetcher = HttpFetcher::new(fast_config(2)).unwrap();
    let url = format!("http://{addr}/catalog.xml").parse().unwrap();

    let err = fetcher.fetch_bytes(&url).await.unwrap_err();

    match err {
        AppError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, AppError::NetworkError(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_stalled_body_times_out() {
    let server = TestServer::start(vec![Reply::Stall]).await;
    let config = fast_config(1).with_read_timeout(Duration::from_millis(200));
    let fetcher = HttpFetcher::new(config).unwrap();

    let err = fetcher
        .download_to_scratch(&server.url("/slow"))
        .await
        .unwrap_err();

    match err {
        AppError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 1);
            // The read bound fired, not the 15s connect bound.
            assert!(matches!(*last, AppError::Timeout(1)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
