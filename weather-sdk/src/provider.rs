use async_trait::async_trait;
use std::fmt::Debug;

use crate::{WeatherError, model::Observation};

pub mod http;
pub mod json;

pub use http::HttpFetcher;
pub use json::JsonParser;

/// Transport to the upstream provider.
#[async_trait]
pub trait WeatherFetcher: Send + Sync + Debug {
    /// Raw response body for `location`, requested with `credential`.
    async fn fetch(&self, location: &str, credential: &str) -> Result<Vec<u8>, WeatherError>;
}

/// Turns a raw upstream body into an [`Observation`].
pub trait ResponseParser: Send + Sync + Debug {
    fn parse(&self, raw: &[u8]) -> Result<Observation, WeatherError>;
}
