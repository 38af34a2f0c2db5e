// crates/flight-recorder-object-store/src/s3.rs
// ============================================================================
// Module: S3 Artifact Store
// Description: S3-compatible content-addressed blob sink.
// Purpose: Persist artifact bytes in object storage behind a blocking
//          facade.
// Dependencies: flight-recorder-core, aws-config, aws-sdk-s3, tokio
// ============================================================================

//! ## Overview
//! The S3 backend targets any S3-compatible endpoint (AWS, MinIO, and
//! friends). The client owns a dedicated tokio runtime and exposes the
//! blocking [`ArtifactStore`] interface; calls issued from inside an async
//! runtime are bridged through `block_in_place` or a helper thread.
//! Existence checks use `HeadObject`; `store` skips the upload when the
//! object is already present.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use flight_recorder_core::ArtifactHash;
use flight_recorder_core::ArtifactStore;
use flight_recorder_core::ArtifactStoreError;
use flight_recorder_core::StoredArtifact;
use tokio::runtime::Handle;
use tokio::runtime::Runtime;
use tokio::runtime::RuntimeFlavor;

// ============================================================================
// SECTION: Runtime Helpers
// ============================================================================

/// Blocks on an object-store future using a compatible runtime.
fn block_on_with_runtime<F, T>(runtime: &Runtime, future: F) -> Result<T, ArtifactStoreError>
where
    F: Future<Output = Result<T, ArtifactStoreError>> + Send + 'static,
    T: Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        if matches!(handle.runtime_flavor(), RuntimeFlavor::MultiThread) {
            return tokio::task::block_in_place(|| handle.block_on(future));
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        std::thread::spawn(move || {
            let result = Runtime::new()
                .map_err(|err| ArtifactStoreError::Io(err.to_string()))
                .and_then(|runtime| runtime.block_on(future));
            let _ = tx.send(result);
        });
        return rx.recv().unwrap_or_else(|_| {
            Err(ArtifactStoreError::Io("object store thread join failed".to_string()))
        });
    }

    runtime.block_on(future)
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// S3 artifact store configuration.
///
/// # Invariants
/// - `endpoint`, when set, is a full URL including scheme.
/// - `access_key` and `secret_key` are either both set or both absent.
#[derive(Debug, Clone)]
pub struct S3StoreConfig {
    /// Bucket holding artifact objects.
    pub bucket: String,
    /// Custom endpoint URL for S3-compatible services.
    pub endpoint: Option<String>,
    /// Static access key; falls back to ambient credentials when absent.
    pub access_key: Option<String>,
    /// Static secret key; falls back to ambient credentials when absent.
    pub secret_key: Option<String>,
    /// Region name.
    pub region: String,
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// S3-compatible artifact store.
///
/// # Invariants
/// - Object keys derive only from the artifact hash.
/// - Existing objects are never rewritten.
pub struct S3ArtifactStore {
    /// Underlying S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Dedicated runtime for blocking S3 operations.
    runtime: Option<Arc<Runtime>>,
}

impl Drop for S3ArtifactStore {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            let _ = std::thread::spawn(move || drop(runtime));
        }
    }
}

impl S3ArtifactStore {
    /// Builds an S3-backed artifact store.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactStoreError`] when the runtime or client cannot be
    /// initialized.
    pub fn new(config: &S3StoreConfig) -> Result<Self, ArtifactStoreError> {
        if config.bucket.is_empty() {
            return Err(ArtifactStoreError::Invalid("artifact bucket is empty".to_string()));
        }
        let runtime = Runtime::new().map_err(|err| ArtifactStoreError::Io(err.to_string()))?;
        let region = config.region.clone();
        let endpoint = config.endpoint.clone();
        let credentials = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => Some(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "flight-recorder-static",
            )),
            _ => None,
        };
        let force_path_style = endpoint.is_some();
        let shared_config = block_on_with_runtime(&runtime, async move {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            loader = loader.region(Region::new(region));
            if let Some(endpoint) = endpoint {
                loader = loader.endpoint_url(endpoint);
            }
            if let Some(credentials) = credentials {
                loader = loader.credentials_provider(credentials);
            }
            Ok(loader.load().await)
        })?;
        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if force_path_style {
            s3_builder = s3_builder.force_path_style(true);
        }
        let client = Client::from_conf(s3_builder.build());
        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            runtime: Some(Arc::new(runtime)),
        })
    }

    /// Returns the runtime or an error if shut down.
    fn runtime(&self) -> Result<&Runtime, ArtifactStoreError> {
        self.runtime
            .as_ref()
            .map(AsRef::as_ref)
            .ok_or_else(|| ArtifactStoreError::Io("object store runtime closed".to_string()))
    }

    /// Probes object existence via `HeadObject`.
    fn head(&self, key: &str) -> Result<bool, ArtifactStoreError> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = key.to_string();
        block_on_with_runtime(self.runtime()?, async move {
            match client.head_object().bucket(bucket).key(key).send().await {
                Ok(_) => Ok(true),
                Err(err) => {
                    if err.as_service_error().is_some_and(|service| service.is_not_found()) {
                        Ok(false)
                    } else {
                        Err(ArtifactStoreError::Backend(err.to_string()))
                    }
                }
            }
        })
    }
}

impl ArtifactStore for S3ArtifactStore {
    fn store(
        &self,
        hash: &ArtifactHash,
        bytes: &[u8],
    ) -> Result<StoredArtifact, ArtifactStoreError> {
        let key = hash.object_key();
        if !self.head(&key)? {
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let upload_key = key.clone();
            let body = bytes.to_vec();
            block_on_with_runtime(self.runtime()?, async move {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(upload_key)
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .map_err(|err| ArtifactStoreError::Backend(err.to_string()))?;
                Ok(())
            })?;
        }
        Ok(StoredArtifact {
            bucket: self.bucket.clone(),
            object_key: key,
        })
    }

    fn exists(&self, hash: &ArtifactHash) -> Result<bool, ArtifactStoreError> {
        self.head(&hash.object_key())
    }
}
