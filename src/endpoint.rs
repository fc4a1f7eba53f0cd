//! Consul agent endpoints and round-robin failover between them.

use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Url;

use crate::utils::{ConsulConfigError, Result};

/// Characters escaped inside a KV path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One Consul agent, resolved to the KV URL of the watched folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
    kv_url: Url,
}

impl Endpoint {
    /// Resolve `{base}/v1/kv/{folder}`. A path on `base` is kept as a prefix.
    pub fn new(base: &str, folder: &str) -> Result<Self> {
        let invalid = |reason: String| ConsulConfigError::InvalidEndpoint {
            url: base.to_string(),
            reason,
        };

        let mut base_url = Url::parse(base.trim()).map_err(|e| invalid(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid("URL cannot be a base".to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let encoded: Vec<String> = folder
            .split('/')
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect();
        let kv_url = base_url
            .join(&format!("v1/kv/{}", encoded.join("/")))
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            base: base_url,
            kv_url,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn kv_url(&self) -> &Url {
        &self.kv_url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}

/// Tracks the active endpoint. Owned by the watch task.
#[derive(Debug, Clone)]
pub struct EndpointRotator {
    endpoints: Vec<Endpoint>,
    active: usize,
}

impl EndpointRotator {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(ConsulConfigError::missing("No Consul endpoints configured"));
        }
        Ok(Self { endpoints, active: 0 })
    }

    pub fn current(&self) -> &Endpoint {
        &self.endpoints[self.active]
    }

    /// Move to the next endpoint, wrapping after the last.
    pub fn advance(&mut self) {
        self.active = (self.active + 1) % self.endpoints.len();
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
