//! Consul-backed configuration provider.
//!
//! [`ConsulConfigSource`] collects the settings and performs the initial load. The
//! resulting [`ConsulConfigProvider`] serves the current snapshot and owns the
//! background watch task that keeps it fresh.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::client::KvClient;
use crate::endpoint::{Endpoint, EndpointRotator};
use crate::settings::ConsulConfig;
use crate::snapshot::{ConfigSnapshot, SnapshotStore};
use crate::utils::{normalize_folder, ConsulConfigError, Result, KEY_DELIMITER};
use crate::watch::{run_watch_loop, WatchContext, WatchState, DEFAULT_PAUSE_INTERVAL};

const NOTIFY_CAPACITY: usize = 16;

/// Settings for a [`ConsulConfigProvider`], built with `with_*` methods.
#[derive(Debug, Clone)]
pub struct ConsulConfigSource {
    urls: Vec<String>,
    folder: String,
    key_delimiter: String,
    pause_interval: Duration,
    request_timeout: Option<Duration>,
    http_client: Option<Client>,
}

impl ConsulConfigSource {
    /// Watch `folder` on the given Consul agents, tried in order on failure.
    pub fn new<I, S>(urls: I, folder: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            urls: urls.into_iter().map(|u| u.as_ref().to_string()).collect(),
            folder: folder.to_string(),
            key_delimiter: KEY_DELIMITER.to_string(),
            pause_interval: DEFAULT_PAUSE_INTERVAL,
            request_timeout: None,
            http_client: None,
        }
    }

    pub fn from_config(config: &ConsulConfig) -> Self {
        Self::new(&config.urls, &config.key_store_folder)
    }

    /// Separator between path segments (default `:`).
    pub fn with_key_delimiter(mut self, delimiter: &str) -> Self {
        self.key_delimiter = delimiter.to_string();
        self
    }

    /// Wait after every endpoint has failed in a row (default 60 seconds).
    pub fn with_pause_interval(mut self, interval: Duration) -> Self {
        self.pause_interval = interval;
        self
    }

    /// Client-side limit on each request. Unset by default so blocking queries wait for
    /// the store's own timeout. An expired blocking query counts as cancelled, not failed;
    /// an expired initial load fails with `RemoteUnavailable`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Use a preconfigured HTTP client. Overrides `with_request_timeout`.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Load the folder once and start watching it.
    ///
    /// Fails if no endpoint or folder is configured, an endpoint URL is invalid, or the
    /// first fetch against the first endpoint fails. Must be called within a tokio runtime.
    pub async fn load(self) -> Result<ConsulConfigProvider> {
        let folder = normalize_folder(&self.folder);
        if folder.is_empty() {
            return Err(ConsulConfigError::missing("No Consul key store folder configured"));
        }
        let endpoints = self
            .urls
            .iter()
            .map(|url| Endpoint::new(url, &folder))
            .collect::<Result<Vec<_>>>()?;
        let rotator = EndpointRotator::new(endpoints)?;

        let client = match self.http_client {
            Some(http) => KvClient::with_client(&folder, http),
            None => KvClient::new(&folder, self.request_timeout)?,
        };

        let response = client.fetch(rotator.current(), None, false).await?;
        let snapshot = response.into_snapshot(&self.key_delimiter)?;
        info!(
            folder = %folder,
            endpoint = %rotator.current(),
            index = ?snapshot.index(),
            entries = snapshot.len(),
            "Loaded Consul configuration"
        );

        let state = WatchState::new(rotator, snapshot.index());
        let store = Arc::new(SnapshotStore::new(snapshot));
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        let shutdown = CancellationToken::new();

        let ctx = WatchContext {
            client,
            store: Arc::clone(&store),
            notifier: notifier.clone(),
            delimiter: self.key_delimiter,
            pause_interval: self.pause_interval,
        };
        let span = info_span!("consul_watch", folder = %folder);
        let task_shutdown = shutdown.child_token();
        let task = tokio::spawn(
            async move {
                run_watch_loop(state, ctx, task_shutdown).await;
            }
            .instrument(span),
        );

        Ok(ConsulConfigProvider {
            folder,
            store,
            notifier,
            shutdown,
            task: Some(task),
        })
    }
}

/// Live view of a Consul KV folder.
///
/// Reads never block. Dropping the provider stops the watch task.
#[derive(Debug)]
pub struct ConsulConfigProvider {
    folder: String,
    store: Arc<SnapshotStore>,
    notifier: broadcast::Sender<Arc<ConfigSnapshot>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConsulConfigProvider {
    /// Current snapshot. Holding it pins that version; later refreshes do not touch it.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.store.load()
    }

    /// Value at `path` in the current snapshot.
    pub fn get(&self, path: &str) -> Option<String> {
        self.store.load().get(path).map(str::to_string)
    }

    /// `X-Consul-Index` of the current snapshot.
    pub fn index(&self) -> Option<u64> {
        self.store.load().index()
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Receive every snapshot published by the watch task. The initial load is not sent.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ConfigSnapshot>> {
        self.notifier.subscribe()
    }

    pub fn is_watching(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the watch task, interrupting any blocking query, and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Consul watch task failed: {}", e);
            }
        }
    }
}

impl Drop for ConsulConfigProvider {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
