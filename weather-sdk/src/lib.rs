//! Per-credential cached access to a weather provider.
//!
//! This crate defines:
//! - A [`Registry`] holding exactly one client per credential
//! - A bounded, TTL-aware cache per client
//! - An optional background refresher that keeps cached locations warm
//! - Swappable transport and parsing collaborators
//!
//! Logging goes through `tracing`; install a subscriber in the application.

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod mode;
pub mod model;
pub mod provider;
pub mod refresher;
pub mod registry;

pub use cache::WeatherCache;
pub use client::{ClientHandle, WeatherClient};
pub use clock::{Clock, SystemClock};
pub use config::SdkConfig;
pub use error::WeatherError;
pub use mode::OperationMode;
pub use model::{Observation, WeatherData};
pub use provider::{HttpFetcher, JsonParser, ResponseParser, WeatherFetcher};
pub use refresher::{RefreshStats, Refresher};
pub use registry::Registry;
