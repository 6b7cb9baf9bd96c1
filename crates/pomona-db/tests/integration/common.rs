//! Test utilities for integration tests.
//!
//! Provides helper functions to set up isolated PostgreSQL containers
//! with the pomona schema for each test.

use std::collections::BTreeMap;

use pomona_core::{Frequency, ResourceRef, StoredRecord};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Sets up a PostgreSQL container and returns a connection pool with the
/// schema applied.
///
/// The container is cleaned up when the returned `ContainerAsync` is dropped.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "postgres")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    // The server restarts once after initdb; retry until it accepts connections.
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!(
                        "Failed to connect to database after {} retries: {}",
                        MAX_RETRIES, e
                    );
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    pomona_db::ensure_schema(&pool)
        .await
        .expect("Failed to create schema");

    (pool, container)
}

/// A fully populated, unsaved record.
pub fn sample_record(remote_id: &str) -> StoredRecord {
    let mut record = StoredRecord::new("ine", remote_id);
    record.title = format!("Indicador {}", remote_id);
    record.description = format!("Descrição do indicador {}", remote_id);
    record.tags = vec!["emprego".to_string(), "ine-pt".to_string()];
    record.resources = vec![
        ResourceRef::new(
            format!("https://www.ine.pt/indicador?id={}", remote_id),
            "Página do indicador",
            "html",
        ),
    ];
    record.frequency = Frequency::Quarterly;
    record.license = Some("cc-by".to_string());
    record.extras = BTreeMap::from([
        ("ine_varcd".to_string(), remote_id.to_string()),
        ("ine_language".to_string(), "PT".to_string()),
    ]);
    record
}
