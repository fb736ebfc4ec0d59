//! Remote metadata store: the key-value collaborator behind the cache.
//!
//! The cache only ever needs get/put/delete by opaque key, so that is the
//! whole trait. `S3Store` is the production backend; `MemoryStore` backs
//! tests and offline runs.

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use pictor_common::{PictorError, Result};

/// Key-value operations against the remote metadata store. Keys are opaque
/// strings assigned by the caller.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch a value; `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// S3 (or S3-compatible) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl S3Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "pictor-cache".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .map_err(|_| {
                    PictorError::Config("S3_ACCESS_KEY or AWS_ACCESS_KEY_ID must be set".into())
                })?,
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .map_err(|_| {
                    PictorError::Config("S3_SECRET_KEY or AWS_SECRET_ACCESS_KEY must be set".into())
                })?,
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }
}

/// S3-backed metadata store.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(config: S3Config) -> Self {
        debug!("Initializing S3 store for bucket: {}", config.bucket);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "pictor-store",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("S3 store initialized for bucket: {}", config.bucket);

        Self {
            client,
            bucket: config.bucket,
        }
    }
}

#[async_trait]
impl MetadataStore for S3Store {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        debug!("Fetching s3://{}/{}", self.bucket, key);

        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => {
                let data = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| PictorError::Store(e.to_string()))?
                    .into_bytes()
                    .to_vec();
                Ok(Some(data))
            }
            Err(err) => {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(PictorError::Store(service.to_string()))
                }
            }
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        debug!("Uploading {} bytes to s3://{}/{}", data.len(), self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| PictorError::Store(e.into_service_error().to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        debug!("Deleting s3://{}/{}", self.bucket, key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| PictorError::Store(e.into_service_error().to_string()))?;

        Ok(())
    }
}

/// In-memory metadata store for tests and offline runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `put` calls observed, for write-skip assertions.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.lock().remove(key);
        Ok(())
    }
}
