//! S3-compatible backend driver using the AWS SDK for Rust.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::Client as S3Client;

use msfs_common::trim_etag;

use crate::error::DriverError;
use crate::retry::RetrySettings;
use crate::traits::BackendDriver;
use crate::types::{DirPage, FileStat, ListedFile, ReadChunk};

/// Driver-specific configuration for an S3-compatible backend.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct S3Options {
    /// AWS region. Falls back to the SDK's default resolution chain.
    pub region: Option<String>,
    /// Custom endpoint URL (MinIO, Ceph RGW, and friends).
    pub endpoint: Option<String>,
    /// Static access key. When unset, the default credential chain is used.
    pub access_key_id: Option<String>,
    /// Static secret key, paired with `access_key_id`.
    pub secret_access_key: Option<String>,
    /// Shared config/credentials profile name.
    pub profile: Option<String>,
    /// Use path-style addressing instead of virtual-hosted-style.
    pub force_path_style: bool,
    /// Retry settings, applied through the SDK's standard retry mode.
    pub retry: RetrySettings,
}

/// BackendDriver implementation for S3-compatible object stores.
///
/// `If-Match` is not honored by every S3-compatible server, so every
/// conditional operation also performs a manual ETag comparison against the
/// HEAD response. The comparison is non-atomic but produces the same `Stale`
/// signal either way.
pub struct S3Driver {
    s3_client: S3Client,
    bucket: String,
    /// Key prefix, empty or ending with `/`.
    prefix: String,
    line_size: u64,
    trace_level: u8,
}

impl S3Driver {
    /// Create a new S3 driver, constructing the long-lived SDK client.
    ///
    /// # Arguments
    /// * `bucket` - Bucket name
    /// * `prefix` - Key prefix (empty or ending with `/`)
    /// * `line_size` - Cache line size in bytes, fixed for the mount
    /// * `trace_level` - Per-backend request logging verbosity
    /// * `options` - Driver-specific configuration
    pub async fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        line_size: u64,
        trace_level: u8,
        options: S3Options,
    ) -> Result<Self, DriverError> {
        let mut config_loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::standard().with_max_attempts(options.retry.max_attempts));

        if let Some(ref region) = options.region {
            config_loader =
                config_loader.region(aws_sdk_s3::config::Region::new(region.clone()));
        }

        if let Some(ref profile) = options.profile {
            config_loader = config_loader.profile_name(profile);
        }

        if let (Some(access_key), Some(secret_key)) =
            (&options.access_key_id, &options.secret_access_key)
        {
            let credentials = Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "msfs-config",
            );
            config_loader = config_loader.credentials_provider(credentials);
        }

        let sdk_config = config_loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(options.force_path_style);
        if let Some(ref endpoint) = options.endpoint {
            s3_config = s3_config.endpoint_url(endpoint);
        }

        Ok(Self {
            s3_client: S3Client::from_conf(s3_config.build()),
            bucket: bucket.into(),
            prefix: prefix.into(),
            line_size,
            trace_level,
        })
    }

    /// Create a driver from an existing S3 client (for testing).
    pub fn from_client(
        s3_client: S3Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        line_size: u64,
    ) -> Self {
        Self {
            s3_client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            line_size,
            trace_level: 0,
        }
    }

    fn full_key(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }
}

#[async_trait]
impl BackendDriver for S3Driver {
    async fn stat_file(
        &self,
        path: &str,
        if_match: Option<&str>,
    ) -> Result<FileStat, DriverError> {
        let key = self.full_key(path);
        if self.trace_level >= 1 {
            log::debug!("[S3] stat_file {key}");
        }

        let mut request = self.s3_client.head_object().bucket(&self.bucket).key(&key);
        if let Some(tag) = if_match {
            request = request.if_match(tag);
        }

        let output = request
            .send()
            .await
            .map_err(|err| map_sdk_error(err, &key))?;

        let etag = output.e_tag().map(trim_etag).unwrap_or_default().to_string();

        // If-Match is not necessarily supported, so the non-atomic manual
        // ETag comparison runs as well.
        if let Some(tag) = if_match {
            if !etag.is_empty() && etag != tag {
                return Err(DriverError::Stale { key });
            }
        }

        Ok(FileStat {
            etag,
            mtime: datetime_to_system_time(output.last_modified()),
            size: output.content_length().map(|l| l as u64).unwrap_or(0),
        })
    }

    async fn stat_directory(&self, path: &str) -> Result<(), DriverError> {
        let full_dir = self.full_key(path);
        if self.trace_level >= 1 {
            log::debug!("[S3] stat_directory {full_dir}");
        }

        let output = self
            .s3_client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(1)
            .prefix(&full_dir)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, &full_dir))?;

        // The bucket root always stats as present; any other prefix must
        // have at least one key or common prefix under it.
        if !full_dir.is_empty()
            && output.common_prefixes().is_empty()
            && output.contents().is_empty()
        {
            return Err(DriverError::NotFound { key: full_dir });
        }

        Ok(())
    }

    async fn list_directory(
        &self,
        path: &str,
        max_items: usize,
        cookie: Option<&str>,
    ) -> Result<DirPage, DriverError> {
        let full_dir = self.full_key(path);
        if self.trace_level >= 1 {
            log::debug!("[S3] list_directory {full_dir} cookie={cookie:?}");
        }

        let mut request = self
            .s3_client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&full_dir)
            .delimiter("/");
        if let Some(token) = cookie {
            request = request.continuation_token(token);
        }
        if max_items != 0 {
            request = request.max_keys(max_items as i32);
        }

        let output = request
            .send()
            .await
            .map_err(|err| map_sdk_error(err, &full_dir))?;

        let mut page = DirPage {
            subdirs: Vec::with_capacity(output.common_prefixes().len()),
            files: Vec::with_capacity(output.contents().len()),
            // AWS S3 neglects to set IsTruncated reliably for delimited
            // listings, so truncation is derived from the presence of a
            // continuation token instead.
            next_cookie: output.next_continuation_token().map(str::to_string),
        };

        for common_prefix in output.common_prefixes() {
            let Some(raw) = common_prefix.prefix() else {
                continue;
            };
            let name = raw
                .strip_prefix(full_dir.as_str())
                .unwrap_or(raw)
                .trim_end_matches('/');
            if !name.is_empty() {
                page.subdirs.push(name.to_string());
            }
        }

        for object in output.contents() {
            let Some(raw_key) = object.key() else {
                continue;
            };
            let basename = raw_key.strip_prefix(full_dir.as_str()).unwrap_or(raw_key);
            // A zero-length basename is the directory marker object itself.
            if basename.is_empty() {
                continue;
            }
            page.files.push(ListedFile {
                basename: basename.to_string(),
                etag: object.e_tag().map(trim_etag).unwrap_or_default().to_string(),
                mtime: datetime_to_system_time(object.last_modified()),
                size: object.size().map(|s| s as u64).unwrap_or(0),
            });
        }

        Ok(page)
    }

    async fn read_file(
        &self,
        path: &str,
        line_number: u64,
        if_match: Option<&str>,
    ) -> Result<ReadChunk, DriverError> {
        let key = self.full_key(path);
        let range_begin = line_number * self.line_size;
        let range_end = range_begin + self.line_size - 1;
        if self.trace_level >= 1 {
            log::debug!("[S3] read_file {key} bytes={range_begin}-{range_end}");
        }

        // If-Match is not necessarily supported, so HEAD first and compare
        // manually before the ranged GET.
        let head = self.stat_file(path, if_match).await?;

        let mut request = self
            .s3_client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .range(format!("bytes={range_begin}-{range_end}"));
        if let Some(tag) = if_match {
            request = request.if_match(tag);
        }

        let output = match request.send().await {
            Ok(output) => output,
            // Requesting a range entirely past the end of the object is not
            // an error upstream; it is an EOF-truncated (empty) read.
            Err(err) if sdk_error_status(&err) == Some(416) => {
                return Ok(ReadChunk {
                    etag: head.etag,
                    bytes: bytes::Bytes::new(),
                });
            }
            Err(err) => return Err(map_sdk_error(err, &key)),
        };

        let etag = output.e_tag().map(trim_etag).unwrap_or_default().to_string();

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| DriverError::Network {
                message: e.to_string(),
                retryable: true,
            })?
            .into_bytes();

        Ok(ReadChunk { etag, bytes })
    }
}

/// Convert an SDK timestamp to a `SystemTime`, clamping pre-epoch values.
fn datetime_to_system_time(dt: Option<&aws_sdk_s3::primitives::DateTime>) -> SystemTime {
    dt.and_then(|dt| dt.to_millis().ok())
        .filter(|ms| *ms >= 0)
        .map(|ms| UNIX_EPOCH + Duration::from_millis(ms as u64))
        .unwrap_or(UNIX_EPOCH)
}

/// HTTP status of a service error, if the request got far enough to have one.
fn sdk_error_status<E>(err: &SdkError<E>) -> Option<u16> {
    match err {
        SdkError::ServiceError(ctx) => Some(ctx.raw().status().as_u16()),
        _ => None,
    }
}

/// Map an SDK error onto the driver error taxonomy.
///
/// Retryability mirrors the usual S3 guidance: 429 and 5xx are retryable,
/// other 4xx are not, and anything that never produced a response is.
fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> DriverError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match sdk_error_status(&err) {
        Some(404) => DriverError::NotFound {
            key: key.to_string(),
        },
        Some(412) => DriverError::Stale {
            key: key.to_string(),
        },
        Some(403) => DriverError::AccessDenied {
            key: key.to_string(),
            message,
        },
        Some(status) => DriverError::Network {
            message,
            retryable: status == 429 || status >= 500,
        },
        None => DriverError::Network {
            message,
            retryable: true,
        },
    }
}
