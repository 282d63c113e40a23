use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::debug;

use crate::WeatherError;

use super::WeatherFetcher;

/// Fetches raw observations from `{base}/{location}/{credential}`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    base_url: Url,
    http: Client,
}

impl HttpFetcher {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, WeatherError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, http })
    }

    /// Request URL with both segments percent-encoded.
    pub fn endpoint(&self, location: &str, credential: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(location).push(credential);
        }
        url
    }
}

#[async_trait]
impl WeatherFetcher for HttpFetcher {
    async fn fetch(&self, location: &str, credential: &str) -> Result<Vec<u8>, WeatherError> {
        let url = self.endpoint(location, credential);
        debug!(location, "requesting current weather");

        let res = self.http.get(url).send().await?;

        let status = res.status();
        let body = res.bytes().await?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            let message = if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown status").to_string()
            } else {
                truncate_body(&text)
            };

            return Err(WeatherError::Upstream { status: status.as_u16(), message });
        }

        Ok(body.to_vec())
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
