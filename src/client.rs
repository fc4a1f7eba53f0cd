//! HTTP client for reading a folder from the Consul KV store.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::flatten::{flatten, RawNode};
use crate::snapshot::{ConfigSnapshot, SnapshotBuilder};
use crate::utils::{join_path, ConsulConfigError, Result};

/// Response header carrying the change cursor for blocking queries.
pub const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";

#[derive(Debug, Deserialize)]
struct KvRecord {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value", default)]
    value: Option<String>,
}

/// Decoded records of one KV query, keyed relative to the watched folder.
#[derive(Debug, Clone, PartialEq)]
pub struct KvResponse {
    pub records: Vec<(String, RawNode)>,
    /// Cursor for the next blocking query.
    pub index: Option<u64>,
}

impl KvResponse {
    /// Flatten every record and merge them into one snapshot.
    ///
    /// A case-insensitive path collision anywhere in the folder fails the whole response.
    pub fn into_snapshot(self, delimiter: &str) -> Result<ConfigSnapshot> {
        let mut builder = SnapshotBuilder::default();
        for (key, node) in &self.records {
            let prefix = join_path("", key, delimiter);
            for entry in flatten(&prefix, node, delimiter) {
                builder.insert(entry)?;
            }
        }
        Ok(builder.build(self.index))
    }
}

/// Reads one KV folder from any of the configured endpoints.
#[derive(Debug, Clone)]
pub struct KvClient {
    folder: String,
    client: Client,
}

impl KvClient {
    /// Create a client for `folder` with gzip and deflate decoding enabled.
    ///
    /// Without `request_timeout` a blocking query waits as long as the store holds it.
    pub fn new(folder: &str, request_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().gzip(true).deflate(true);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ConsulConfigError::HttpClient(e.to_string()))?;
        Ok(Self::with_client(folder, client))
    }

    pub fn with_client(folder: &str, client: Client) -> Self {
        Self {
            folder: folder.to_string(),
            client,
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Query the folder recursively.
    ///
    /// With `blocking`, the store holds the response until its index moves past `index`
    /// (or its own wait time elapses). The returned index falls back to `index` when the
    /// response carries no usable `X-Consul-Index`.
    pub async fn fetch(&self, endpoint: &Endpoint, index: Option<u64>, blocking: bool) -> Result<KvResponse> {
        let mut request = self
            .client
            .get(endpoint.kv_url().clone())
            .query(&[("recurse", "true")]);
        if blocking {
            request = request.query(&[("index", index.unwrap_or(0))]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(endpoint, e, blocking))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConsulConfigError::RemoteUnavailable {
                endpoint: endpoint.to_string(),
                status: Some(status),
                reason: format!("HTTP {}", status),
            });
        }

        let next_index = match parse_index(response.headers().get(CONSUL_INDEX_HEADER)) {
            Some(next) => Some(next),
            None => {
                debug!(endpoint = %endpoint, ?index, "No usable X-Consul-Index header, keeping previous index");
                index
            }
        };

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(endpoint, e, blocking))?;
        let records: Vec<KvRecord> = serde_json::from_slice(&body)
            .map_err(|e| ConsulConfigError::malformed(format!("Invalid KV response body: {}", e)))?;

        Ok(KvResponse {
            records: decode_records(&self.folder, records)?,
            index: next_index,
        })
    }
}

/// A timed-out blocking query is a cancelled wait. Any other timeout is a failure.
fn transport_error(endpoint: &Endpoint, error: reqwest::Error, blocking: bool) -> ConsulConfigError {
    if blocking && error.is_timeout() {
        return ConsulConfigError::Cancelled;
    }
    ConsulConfigError::RemoteUnavailable {
        endpoint: endpoint.to_string(),
        status: error.status(),
        reason: error.to_string(),
    }
}

fn parse_index(header: Option<&reqwest::header::HeaderValue>) -> Option<u64> {
    header?.to_str().ok()?.trim().parse().ok()
}

/// Strip the folder prefix and decode each value.
///
/// Records outside the folder, and the folder marker itself, are skipped.
fn decode_records(folder: &str, records: Vec<KvRecord>) -> Result<Vec<(String, RawNode)>> {
    let prefix = format!("{}/", folder);
    let mut decoded = Vec::with_capacity(records.len());

    for record in records {
        let relative = match record.key.strip_prefix(&prefix) {
            Some(relative) => relative,
            None => {
                debug!(key = %record.key, folder, "Skipping key outside the watched folder");
                continue;
            }
        };
        if relative.trim().is_empty() {
            continue;
        }

        let node = match record.value.as_deref() {
            Some(encoded) => decode_value(&record.key, encoded)?,
            None => RawNode::null(),
        };
        decoded.push((relative.to_string(), node));
    }

    Ok(decoded)
}

fn decode_value(key: &str, encoded: &str) -> Result<RawNode> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| ConsulConfigError::malformed(format!("Value of '{}' is not valid base64: {}", key, e)))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| ConsulConfigError::malformed(format!("Value of '{}' is not valid UTF-8: {}", key, e)))?;
    if text.trim().is_empty() {
        return Ok(RawNode::null());
    }
    RawNode::parse(&text)
}
