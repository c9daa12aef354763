//! S3-compatible backend (AWS S3 or MinIO).

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use vidflow_core::detection::UnitResult;
use vidflow_core::types::JobId;

use crate::error::StorageError;
use crate::source::SourceRef;
use crate::{parse_result_key, result_key, FrameSource, ResultStore};

/// Connection settings for [`S3Store`].
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Custom endpoint, e.g. a MinIO URL. Enables path-style addressing.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Bucket results are written to.
    pub results_bucket: String,
}

impl S3Settings {
    /// Load settings from environment variables.
    ///
    /// | Env Var          | Default        |
    /// |------------------|----------------|
    /// | `S3_ENDPOINT`    | (AWS default)  |
    /// | `S3_REGION`      | (AWS default)  |
    /// | `S3_ACCESS_KEY`  | (AWS chain)    |
    /// | `S3_SECRET_KEY`  | (AWS chain)    |
    /// | `RESULTS_BUCKET` | `predictions`  |
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            endpoint: var("S3_ENDPOINT"),
            region: var("S3_REGION"),
            access_key: var("S3_ACCESS_KEY"),
            secret_key: var("S3_SECRET_KEY"),
            results_bucket: var("RESULTS_BUCKET").unwrap_or_else(|| "predictions".into()),
        }
    }
}

fn backend<E: std::error::Error>(err: E) -> StorageError {
    StorageError::Backend(DisplayErrorContext(err).to_string())
}

/// Frame source and result store backed by one S3 client.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    results_bucket: String,
}

impl S3Store {
    /// Build a client from the shared AWS config chain, overridden by any
    /// explicit settings.
    pub async fn connect(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(access), Some(secret)) = (&settings.access_key, &settings.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "vidflow-static",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        tracing::info!(
            endpoint = settings.endpoint.as_deref().unwrap_or("aws"),
            results_bucket = %settings.results_bucket,
            "S3 client configured",
        );

        Self::new(Client::from_conf(builder.build()), settings.results_bucket.clone())
    }

    pub fn new(client: Client, results_bucket: String) -> Self {
        Self {
            client,
            results_bucket,
        }
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(backend)?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .filter(|key| !key.ends_with('/'))
                    .map(str::to_string),
            );
        }
        Ok(keys)
    }

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    backend(e)
                }
            })?;
        let data = output.body.collect().await.map_err(backend)?;
        Ok(data.into_bytes().to_vec())
    }

    fn result_prefix(job_id: JobId) -> String {
        format!("{job_id}/")
    }
}

#[async_trait]
impl FrameSource for S3Store {
    async fn list_units(&self, source: &SourceRef) -> Result<Vec<String>, StorageError> {
        let mut keys = self.list_keys(&source.bucket, &source.list_prefix()).await?;
        keys.sort();
        Ok(keys)
    }

    async fn fetch_unit(&self, source: &SourceRef, unit_key: &str) -> Result<Vec<u8>, StorageError> {
        self.get_bytes(&source.bucket, unit_key).await
    }
}

#[async_trait]
impl ResultStore for S3Store {
    async fn store_result(&self, result: &UnitResult) -> Result<(), StorageError> {
        let body = serde_json::to_vec(result)?;
        self.client
            .put_object()
            .bucket(&self.results_bucket)
            .key(result_key(result.job_id, result.unit_index))
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn count_results(&self, job_id: JobId) -> Result<u64, StorageError> {
        let keys = self
            .list_keys(&self.results_bucket, &Self::result_prefix(job_id))
            .await?;
        Ok(keys.iter().filter(|k| parse_result_key(k).is_some()).count() as u64)
    }

    async fn recent_results(&self, job_id: JobId, limit: usize) -> Result<Vec<UnitResult>, StorageError> {
        let mut indexed: Vec<(i64, String)> = self
            .list_keys(&self.results_bucket, &Self::result_prefix(job_id))
            .await?
            .into_iter()
            .filter_map(|k| parse_result_key(&k).map(|i| (i, k)))
            .collect();
        indexed.sort_by(|a, b| b.0.cmp(&a.0));
        indexed.truncate(limit);

        let fetches = indexed.iter().map(|(_, key)| async move {
            let bytes = self.get_bytes(&self.results_bucket, key).await?;
            Ok::<_, StorageError>(serde_json::from_slice::<UnitResult>(&bytes)?)
        });
        futures::future::try_join_all(fetches).await
    }
}
