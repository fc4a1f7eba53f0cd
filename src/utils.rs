//! Error type and path helpers shared by the provider modules.

use reqwest::StatusCode;

/// Default separator between configuration path segments.
pub const KEY_DELIMITER: &str = ":";

/// Errors raised while building or refreshing the Consul configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConsulConfigError {
    /// No endpoints or an empty folder were supplied.
    #[error("[Consul Config] {0}")]
    ConfigurationMissing(String),

    #[error("[Consul Config] Invalid endpoint URL {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// The store answered with a non-success status, or could not be reached.
    #[error("[Consul Config] Consul endpoint {endpoint} unavailable: {reason}")]
    RemoteUnavailable {
        endpoint: String,
        status: Option<StatusCode>,
        reason: String,
    },

    #[error("[Consul Config] Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("[Consul Config] Malformed response: {0}")]
    MalformedResponse(String),

    /// Two flattened entries collapse onto the same case-insensitive path.
    #[error("[Consul Config] Duplicate configuration path '{path}' (conflicts with '{existing}')")]
    DuplicateKeyConflict { path: String, existing: String },

    /// A blocking query was interrupted by shutdown or a client-side timeout.
    #[error("[Consul Config] Request cancelled")]
    Cancelled,
}

impl ConsulConfigError {
    pub fn missing(message: &str) -> Self {
        Self::ConfigurationMissing(message.to_string())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Cancellation is not a failure and never counts toward backoff.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ConsulConfigError>;

/// Trim leading and trailing `/` from a KV folder.
pub fn normalize_folder(folder: &str) -> String {
    folder.trim().trim_matches('/').to_string()
}

/// Append `key` to `prefix`, treating every `/` in the key as a hierarchy separator.
///
/// Empty segments are kept, so the folder key `Logging/` becomes `Logging:` and never
/// collides with a value stored at `Logging`.
pub fn join_path(prefix: &str, key: &str, delimiter: &str) -> String {
    let mut out = prefix.to_string();
    for (i, segment) in key.split('/').enumerate() {
        if i > 0 || !prefix.is_empty() {
            out.push_str(delimiter);
        }
        out.push_str(segment);
    }
    out
}

/// Append an array position to `prefix` using the `segment:index` form.
pub fn index_path(prefix: &str, index: usize) -> String {
    if prefix.is_empty() {
        index.to_string()
    } else {
        format!("{}:{}", prefix, index)
    }
}

/// Case-insensitive lookup key for a configuration path.
pub fn normalize_key(path: &str) -> String {
    path.to_lowercase()
}
