use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::primitives::ByteStream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Prefix under which every structure file is stored.
pub const STRUCTURE_PREFIX: &str = "structures3d";

// 1. StorageService Contract
/// StorageService
///
/// Abstract contract for the object storage holding compound structure files. Handlers only
/// see this trait, so the S3 client used in production can be swapped for the in-memory
/// `MockStorageService` in tests.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Ensures the configured bucket exists. Used in the `Env::Local` setup to provision
    /// the MinIO bucket at startup.
    async fn ensure_bucket_exists(&self);

    /// Stores `bytes` under `key`.
    async fn put_object(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> AppResult<()>;

    /// Releases the object stored under `key`. Deleting a missing key is not an error.
    async fn delete_object(&self, key: &str) -> AppResult<()>;

    /// Absolute URL under which clients can download `key`.
    fn public_url(&self, key: &str) -> String;
}

// 2. The Real Implementation (S3/MinIO)
/// S3StorageClient
///
/// Concrete implementation using the AWS SDK for S3. `force_path_style(true)` keeps it
/// compatible with MinIO and other S3-compatible gateways.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
    public_base_url: String,
}

impl S3StorageClient {
    /// Constructs the S3 client using credentials and configuration from AppConfig.
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        public_base_url: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        let client = s3::Client::from_conf(config);

        Self {
            client,
            bucket_name: bucket.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    /// CreateBucket is idempotent, so this is safe to call at every startup.
    async fn ensure_bucket_exists(&self) {
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!(error = %e, bucket = %self.bucket_name, "create_bucket skipped");
        }
    }

    async fn put_object(&self, key: &str, content_type: &str, bytes: Vec<u8>) -> AppResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        tracing::debug!(key, "structure file stored");
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> AppResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        tracing::debug!(key, "structure file released");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

/// sanitize_key
///
/// Removes directory navigation components (`..`, `.`) and empty segments from a
/// user-provided path so it cannot escape the storage prefix.
pub fn sanitize_key(key: &str) -> String {
    key.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// structure_file_key
///
/// Builds a unique object key for an uploaded structure file, keeping only the base name of
/// the client-supplied file name: `structures3d/<uuid>-<name>`.
pub fn structure_file_key(file_name: &str) -> String {
    let sanitized = sanitize_key(file_name);
    let base = sanitized
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("structure.bin");
    let base: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}/{}-{}", STRUCTURE_PREFIX, Uuid::new_v4(), base)
}

// 3. The Mock Implementation (For Tests)
/// MockStorageService
///
/// In-memory `StorageService` used by tests. Stored objects are kept in a shared map so
/// tests can assert that files were written and released.
#[derive(Clone, Default)]
pub struct MockStorageService {
    /// When true, all writes return a simulated failure.
    pub should_fail: bool,
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn put_object(&self, key: &str, _content_type: &str, bytes: Vec<u8>) -> AppResult<()> {
        if self.should_fail {
            return Err(AppError::Storage(
                "Mock Storage Error: Simulation requested".to_string(),
            ));
        }
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| AppError::Storage("mock storage poisoned".to_string()))?;
        objects.insert(sanitize_key(key), bytes);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> AppResult<()> {
        if self.should_fail {
            return Err(AppError::Storage(
                "Mock Storage Error: Simulation requested".to_string(),
            ));
        }
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| AppError::Storage("mock storage poisoned".to_string()))?;
        objects.remove(&sanitize_key(key));
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("http://localhost:9000/mock-bucket/{}", sanitize_key(key))
    }
}

/// StorageState
///
/// The concrete type used to share the storage service across the application state.
pub type StorageState = Arc<dyn StorageService>;
