use anyhow::Result;
use dashmap::{DashMap, mapref::entry::Entry};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, info};

use crate::{
    SdkConfig, WeatherError,
    client::{ClientHandle, WeatherClient},
    mode::OperationMode,
    provider::{HttpFetcher, JsonParser, WeatherFetcher},
};

type FetcherFactory =
    dyn Fn(&str) -> Result<Arc<dyn WeatherFetcher>, WeatherError> + Send + Sync + 'static;

/// Owns one [`WeatherClient`] per credential.
///
/// Construct it once at application startup and share it. Clients are created
/// on first [`acquire`](Registry::acquire) and torn down by
/// [`release`](Registry::release) or [`shutdown_all`](Registry::shutdown_all).
pub struct Registry {
    config: SdkConfig,
    clients: DashMap<String, ClientHandle>,
    fetchers: Box<FetcherFactory>,
}

impl Registry {
    /// Registry whose clients talk HTTP to `config.base_url` and parse JSON.
    pub fn new(config: SdkConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.base_url()?;
        let timeout = config.request_timeout();

        Self::with_fetcher_factory(config, move |_| {
            let fetcher: Arc<dyn WeatherFetcher> =
                Arc::new(HttpFetcher::new(base_url.clone(), timeout)?);
            Ok(fetcher)
        })
    }

    /// Registry with a custom transport. `factory` is called once per new client.
    ///
    /// The factory runs while the credential's map slot is locked. It must not
    /// call back into this registry, and should not block for long.
    pub fn with_fetcher_factory<F>(config: SdkConfig, factory: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Arc<dyn WeatherFetcher>, WeatherError> + Send + Sync + 'static,
    {
        config.validate()?;

        Ok(Self { config, clients: DashMap::new(), fetchers: Box::new(factory) })
    }

    /// Existing client for `credential`, or a new one created with `mode`.
    ///
    /// Existing clients are returned from a shared read, without taking the
    /// slot's write lock. Creation runs while the map slot for `credential` is
    /// locked, so racing callers always share one client. When they pass
    /// different modes, the first caller's mode wins; keep modes consistent per
    /// credential.
    pub fn acquire(&self, credential: &str, mode: OperationMode) -> Result<ClientHandle, WeatherError> {
        if let Some(client) = self.get(credential) {
            return Ok(Self::reuse(client, credential, mode));
        }

        match self.clients.entry(credential.to_string()) {
            Entry::Occupied(entry) => Ok(Self::reuse(Arc::clone(entry.get()), credential, mode)),
            Entry::Vacant(entry) => {
                let fetcher = (self.fetchers)(credential)?;
                let client = Arc::new(WeatherClient::with_collaborators(
                    credential,
                    mode,
                    &self.config,
                    fetcher,
                    Arc::new(JsonParser),
                )?);
                entry.insert(Arc::clone(&client));

                info!(credential = %redact(credential), mode = %mode, "weather client created");
                Ok(client)
            }
        }
    }

    fn reuse(client: ClientHandle, credential: &str, mode: OperationMode) -> ClientHandle {
        if client.mode() != mode {
            debug!(
                credential = %redact(credential),
                existing = %client.mode(),
                requested = %mode,
                "reusing client created with a different mode"
            );
        }
        client
    }

    /// Client for `credential` if one exists. Never creates.
    pub fn get(&self, credential: &str) -> Option<ClientHandle> {
        self.clients.get(credential).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove the client for `credential` and shut it down. No-op if absent.
    pub fn release(&self, credential: &str) -> Option<ClientHandle> {
        let (_, client) = self.clients.remove(credential)?;
        client.shutdown();

        info!(credential = %redact(credential), "weather client released");
        Some(client)
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn active_keys(&self) -> BTreeSet<String> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Release every client. Returns how many were shut down.
    pub fn shutdown_all(&self) -> usize {
        self.active_keys().iter().filter_map(|key| self.release(key)).count()
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

/// Keep only the last four characters of a credential for logs.
fn redact(credential: &str) -> String {
    let visible: String = credential
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{visible}")
}
