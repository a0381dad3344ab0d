//! Object store registration for remote GeoParquet locations (S3, GCS).

use std::env;
use std::sync::Arc;

use datafusion::datasource::listing::ListingTableUrl;
use datafusion::error::{DataFusionError, Result};
use datafusion::execution::runtime_env::RuntimeEnv;
use log::debug;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;

/// Options applied when building an object store for a remote location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteStoreOptions {
    /// S3 region. When unset the store reads `AWS_REGION` or
    /// `AWS_DEFAULT_REGION`.
    pub region: Option<String>,
}

impl RemoteStoreOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// Register the object store backing `location` with the runtime.
///
/// Local paths need no registration; `s3://` and `gs://` locations get a
/// store keyed by bucket.
///
/// # Errors
///
/// Returns an error when the location cannot be parsed or the store cannot
/// be built from the options and environment.
pub fn register_store_for_location(
    runtime: &RuntimeEnv,
    location: &str,
    options: &RemoteStoreOptions,
) -> Result<()> {
    let table_url = ListingTableUrl::parse(location)?;
    match table_url.get_url().scheme() {
        "s3" | "s3a" => register_s3_store(runtime, &table_url, options),
        "gs" => register_gcs_store(runtime, &table_url),
        _ => Ok(()),
    }
}

fn register_s3_store(
    runtime: &RuntimeEnv,
    table_url: &ListingTableUrl,
    options: &RemoteStoreOptions,
) -> Result<()> {
    let url = table_url.get_url();
    let bucket = url
        .host_str()
        .ok_or_else(|| DataFusionError::Configuration(format!("S3 URL has no bucket: {url}")))?;
    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
    if let Some(region) = &options.region {
        builder = builder.with_region(region);
    }

    // Public buckets are read unsigned when no credentials are configured.
    let has_credentials =
        env::var("AWS_ACCESS_KEY_ID").is_ok() && env::var("AWS_SECRET_ACCESS_KEY").is_ok();
    if !has_credentials {
        builder = builder.with_skip_signature(true);
    }

    let store = builder
        .build()
        .map_err(|e| DataFusionError::External(Box::new(e)))?;

    debug!(
        "Registered S3 object store for bucket {bucket} (region {})",
        options.region.as_deref().unwrap_or("from environment")
    );
    runtime.register_object_store(table_url.object_store().as_ref(), Arc::new(store));
    Ok(())
}

fn register_gcs_store(runtime: &RuntimeEnv, table_url: &ListingTableUrl) -> Result<()> {
    let url = table_url.get_url();
    let bucket = url
        .host_str()
        .ok_or_else(|| DataFusionError::Configuration(format!("GCS URL has no bucket: {url}")))?;

    let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
    if env::var("GOOGLE_APPLICATION_CREDENTIALS").is_err() {
        builder = builder.with_skip_signature(true);
    }

    let store = builder
        .build()
        .map_err(|e| DataFusionError::External(Box::new(e)))?;

    debug!("Registered GCS object store for bucket {bucket}");
    runtime.register_object_store(table_url.object_store().as_ref(), Arc::new(store));
    Ok(())
}
