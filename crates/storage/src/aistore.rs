//! AIStore backend driver using the cluster's HTTP API.
//!
//! Unlike the S3 SDK, the AIStore API has no client-side retry policy we can
//! lean on, so calls are wrapped in the bounded-backoff helper from
//! [`crate::retry`]. Listings are flat (no server-side delimiter); immediate
//! subdirectories are derived from the first `/` of each returned name.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::retry::{with_retry, RetrySettings};
use crate::traits::BackendDriver;
use crate::types::{DirPage, FileStat, ListedFile, ReadChunk};

/// Response header carrying the object checksum, used as the ETag.
const HDR_CHECKSUM_VALUE: &str = "ais-checksum-value";

/// Response header carrying the object access time (unix microseconds).
const HDR_ATIME: &str = "ais-atime";

/// Characters escaped in object-name path segments. `/` stays literal so
/// nested keys keep their path shape in the URL.
const OBJECT_NAME_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Driver-specific configuration for an AIStore backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AisOptions {
    /// Cluster proxy endpoint, e.g. `http://ais-proxy:51080`.
    pub endpoint: String,
    /// Bucket provider (`ais`, `aws`, `gcp`, `azure`, `ht`).
    pub provider: String,
    /// AuthN bearer token.
    pub authn_token: Option<String>,
    /// Path to a file containing the AuthN token; used when `authn_token`
    /// is unset. An unreadable file degrades to no token.
    pub authn_token_file: Option<String>,
    /// Skip TLS certificate verification.
    pub skip_tls_verify: bool,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retry settings for the bounded-backoff wrapper.
    pub retry: RetrySettings,
}

impl Default for AisOptions {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            provider: "ais".to_string(),
            authn_token: None,
            authn_token_file: None,
            skip_tls_verify: false,
            timeout_secs: 60,
            retry: RetrySettings::default(),
        }
    }
}

/// BackendDriver implementation for AIStore clusters.
///
/// An empty prefix is *not* visible as a directory: `stat_directory` requires
/// at least one listed entry, including for the backend root. This matches
/// the cluster's behavior of reporting nothing for prefixes with no objects.
pub struct AisDriver {
    http: reqwest::Client,
    endpoint: String,
    bucket: String,
    provider: String,
    token: Option<String>,
    /// Key prefix, empty or ending with `/`.
    prefix: String,
    line_size: u64,
    trace_level: u8,
    retry: RetrySettings,
}

impl AisDriver {
    /// Create a new AIStore driver, constructing the long-lived HTTP client.
    ///
    /// # Arguments
    /// * `bucket` - Bucket name
    /// * `prefix` - Key prefix (empty or ending with `/`)
    /// * `line_size` - Cache line size in bytes, fixed for the mount
    /// * `trace_level` - Per-backend request logging verbosity
    /// * `options` - Driver-specific configuration
    pub fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        line_size: u64,
        trace_level: u8,
        options: AisOptions,
    ) -> Result<Self, DriverError> {
        if options.endpoint.is_empty() {
            return Err(DriverError::InvalidConfig {
                message: "AIStore endpoint is required".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .danger_accept_invalid_certs(options.skip_tls_verify)
            .build()
            .map_err(|e| DriverError::InvalidConfig {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let token = match (&options.authn_token, &options.authn_token_file) {
            (Some(token), _) if !token.is_empty() => Some(token.clone()),
            (_, Some(path)) => match std::fs::read_to_string(path) {
                Ok(contents) => Some(contents.trim().to_string()).filter(|t| !t.is_empty()),
                Err(e) => {
                    // Unreadable token file degrades to anonymous access.
                    log::warn!("[AIStore] could not read AuthN token file {path}: {e}");
                    None
                }
            },
            _ => None,
        };

        Ok(Self {
            http,
            endpoint: options.endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            provider: options.provider,
            token,
            prefix: prefix.into(),
            line_size,
            trace_level,
            retry: options.retry,
        })
    }

    fn full_key(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/v1/objects/{}/{}?provider={}",
            self.endpoint,
            self.bucket,
            utf8_percent_encode(key, OBJECT_NAME_ENCODE_SET),
            self.provider,
        )
    }

    fn bucket_url(&self) -> String {
        format!(
            "{}/v1/buckets/{}?provider={}",
            self.endpoint, self.bucket, self.provider,
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Fetch one raw listing page from the cluster.
    async fn list_page(
        &self,
        prefix: &str,
        page_size: usize,
        cookie: Option<&str>,
    ) -> Result<BucketList, DriverError> {
        let msg = ListMsg {
            action: "list",
            value: ListMsgValue {
                prefix,
                pagesize: (page_size != 0).then_some(page_size as i64),
                props: "name,size,checksum,atime",
                continuation_token: cookie,
            },
        };

        with_retry(&self.retry, "aistore list_directory", || {
            // The request is rebuilt per attempt; the body is serialized
            // eagerly so the future owns everything it needs.
            let request = self.authorize(self.http.get(self.bucket_url()).json(&msg));
            let key = prefix.to_string();
            async move {
                let response = request.send().await.map_err(map_transport_error)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(map_status(status, &key));
                }
                response
                    .json::<BucketList>()
                    .await
                    .map_err(|e| DriverError::Other {
                        message: format!("malformed listing response: {e}"),
                    })
            }
        })
        .await
    }
}

#[async_trait]
impl BackendDriver for AisDriver {
    async fn stat_file(
        &self,
        path: &str,
        if_match: Option<&str>,
    ) -> Result<FileStat, DriverError> {
        let key = self.full_key(path);
        if self.trace_level >= 1 {
            log::debug!("[AIStore] stat_file {key}");
        }

        let response = with_retry(&self.retry, "aistore stat_file", || {
            let request = self.authorize(self.http.head(self.object_url(&key)));
            let key = key.clone();
            async move {
                let response = request.send().await.map_err(map_transport_error)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(map_status(status, &key));
                }
                Ok(response)
            }
        })
        .await?;

        let etag = header_str(response.headers(), HDR_CHECKSUM_VALUE).to_string();

        if let Some(tag) = if_match {
            if !etag.is_empty() && etag != tag {
                return Err(DriverError::Stale { key });
            }
        }

        Ok(FileStat {
            etag,
            mtime: parse_atime_micro(header_str(response.headers(), HDR_ATIME))
                .unwrap_or(UNIX_EPOCH),
            size: header_str(response.headers(), CONTENT_LENGTH.as_str())
                .parse()
                .unwrap_or(0),
        })
    }

    async fn stat_directory(&self, path: &str) -> Result<(), DriverError> {
        let full_dir = self.full_key(path);
        if self.trace_level >= 1 {
            log::debug!("[AIStore] stat_directory {full_dir}");
        }

        // Directories are just prefixes; a prefix with no objects under it,
        // the backend root included, does not exist.
        let page = self.list_page(&full_dir, 1, None).await?;
        if page.entries.as_deref().unwrap_or_default().is_empty() {
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
            log::debug!("[AIStore] list_directory {full_dir} cookie={cookie:?}");
        }

        let raw = self.list_page(&full_dir, max_items, cookie).await?;

        let mut page = DirPage {
            subdirs: Vec::new(),
            files: Vec::new(),
            next_cookie: raw.continuation_token.filter(|t| !t.is_empty()),
        };

        // The listing is flat; split each name on its first slash to derive
        // immediate children.
        for entry in raw.entries.unwrap_or_default() {
            let relative = entry
                .name
                .strip_prefix(full_dir.as_str())
                .unwrap_or(entry.name.as_str());
            if relative.is_empty() {
                continue;
            }

            match relative.split_once('/') {
                Some((subdir, _)) => {
                    let subdir = subdir.to_string();
                    if !page.subdirs.contains(&subdir) {
                        page.subdirs.push(subdir);
                    }
                }
                None => {
                    page.files.push(ListedFile {
                        basename: relative.to_string(),
                        etag: entry.checksum.unwrap_or_default(),
                        mtime: entry
                            .atime
                            .as_deref()
                            .and_then(parse_atime_micro)
                            .unwrap_or_else(SystemTime::now),
                        size: entry.size.max(0) as u64,
                    });
                }
            }
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
            log::debug!("[AIStore] read_file {key} bytes={range_begin}-{range_end}");
        }

        // GET has no If-Match support; emulate with a HEAD comparison first.
        let head = self.stat_file(path, if_match).await?;

        let response = with_retry(&self.retry, "aistore read_file", || {
            let request = self
                .authorize(self.http.get(self.object_url(&key)))
                .header(RANGE, format!("bytes={range_begin}-{range_end}"));
            let key = key.clone();
            async move {
                let response = request.send().await.map_err(map_transport_error)?;
                let status = response.status();
                if !status.is_success() && status != StatusCode::RANGE_NOT_SATISFIABLE {
                    return Err(map_status(status, &key));
                }
                Ok(response)
            }
        })
        .await?;

        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            // Entirely past end-of-object: an EOF-truncated (empty) read.
            return Ok(ReadChunk {
                etag: head.etag,
                bytes: Bytes::new(),
            });
        }

        let mut etag = header_str(response.headers(), HDR_CHECKSUM_VALUE).to_string();
        if etag.is_empty() {
            etag = head.etag;
        }

        let bytes = response.bytes().await.map_err(map_transport_error)?;

        Ok(ReadChunk { etag, bytes })
    }
}

/// List request message, mirroring the cluster's action-message shape.
#[derive(Serialize)]
struct ListMsg<'a> {
    action: &'a str,
    value: ListMsgValue<'a>,
}

#[derive(Serialize)]
struct ListMsgValue<'a> {
    prefix: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagesize: Option<i64>,
    props: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation_token: Option<&'a str>,
}

/// One listing page as returned by the cluster.
#[derive(Deserialize)]
struct BucketList {
    entries: Option<Vec<LsEntry>>,
    #[serde(default)]
    continuation_token: Option<String>,
}

#[derive(Deserialize)]
struct LsEntry {
    name: String,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    atime: Option<String>,
    #[serde(default)]
    size: i64,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Parse an AIStore access-time string (unix microseconds).
fn parse_atime_micro(raw: &str) -> Option<SystemTime> {
    let micros: i64 = raw.parse().ok()?;
    if micros < 0 {
        return None;
    }
    Some(UNIX_EPOCH + Duration::from_micros(micros as u64))
}

fn map_transport_error(err: reqwest::Error) -> DriverError {
    DriverError::Network {
        message: err.to_string(),
        retryable: true,
    }
}

fn map_status(status: StatusCode, key: &str) -> DriverError {
    match status {
        StatusCode::NOT_FOUND => DriverError::NotFound {
            key: key.to_string(),
        },
        StatusCode::PRECONDITION_FAILED => DriverError::Stale {
            key: key.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DriverError::AccessDenied {
            key: key.to_string(),
            message: format!("HTTP {status}"),
        },
        _ => DriverError::Network {
            message: format!("HTTP {status} for {key}"),
            retryable: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_with(prefix: &str) -> AisDriver {
        AisDriver::new(
            "mlperf",
            prefix,
            1024 * 1024,
            0,
            AisOptions {
                endpoint: "http://ais-proxy:51080/".to_string(),
                ..AisOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let driver = driver_with("");
        assert_eq!(
            driver.object_url("data/shard-000.tar"),
            "http://ais-proxy:51080/v1/objects/mlperf/data/shard-000.tar?provider=ais"
        );
    }

    #[test]
    fn test_object_url_escapes_spaces() {
        let driver = driver_with("");
        assert_eq!(
            driver.object_url("a b"),
            "http://ais-proxy:51080/v1/objects/mlperf/a%20b?provider=ais"
        );
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let result = AisDriver::new("b", "", 1024, 0, AisOptions::default());
        assert!(matches!(result, Err(DriverError::InvalidConfig { .. })));
    }

    #[test]
    fn test_parse_atime_micro() {
        let t = parse_atime_micro("1500000000000000").unwrap();
        assert_eq!(t, UNIX_EPOCH + Duration::from_secs(1_500_000_000));
        assert!(parse_atime_micro("").is_none());
        assert!(parse_atime_micro("-1").is_none());
        assert!(parse_atime_micro("bogus").is_none());
    }
}
