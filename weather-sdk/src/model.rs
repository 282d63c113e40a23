use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSummary {
    /// Category, e.g. "Clouds".
    pub main: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub temp: f64,
    pub feels_like: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    pub speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunTimes {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

/// One observation as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub location_name: String,
    pub weather: WeatherSummary,
    pub temperature: Temperature,
    pub visibility: u32,
    pub wind: Wind,
    pub observed_at: DateTime<Utc>,
    pub sun: SunTimes,
    /// Shift from UTC in seconds.
    pub utc_offset_secs: i32,
}

impl Observation {
    pub fn local_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_secs)
    }
}

/// An [`Observation`] stamped with the wall-clock time it was fetched.
///
/// The capture time is assigned once, at construction, and cannot be changed
/// afterwards. A refresh produces a new record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherData {
    observation: Observation,
    captured_at: DateTime<Utc>,
}

impl WeatherData {
    pub fn capture(observation: Observation) -> Self {
        Self::capture_at(observation, Utc::now())
    }

    /// Stamp with a time taken from an explicit clock.
    pub fn capture_at(observation: Observation, captured_at: DateTime<Utc>) -> Self {
        Self { observation, captured_at }
    }

    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    pub fn location_name(&self) -> &str {
        &self.observation.location_name
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// `now - captured_at < ttl`. A capture time ahead of `now` counts as relevant.
    pub fn is_relevant_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match now.signed_duration_since(self.captured_at).to_std() {
            Ok(age) => age < ttl,
            Err(_) => true,
        }
    }

    pub fn is_relevant(&self, ttl: Duration) -> bool {
        self.is_relevant_at(Utc::now(), ttl)
    }
}

impl std::ops::Deref for WeatherData {
    type Target = Observation;

    fn deref(&self) -> &Self::Target {
        &self.observation
    }
}

#[cfg(test)]
pub(crate) fn sample_observation(location: &str) -> Observation {
    let epoch = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();

    Observation {
        location_name: location.to_string(),
        weather: WeatherSummary { main: "Clouds".into(), description: "scattered clouds".into() },
        temperature: Temperature { temp: 269.6, feels_like: 267.57 },
        visibility: 10_000,
        wind: Wind { speed: 1.38 },
        observed_at: epoch,
        sun: SunTimes { sunrise: epoch, sunset: epoch },
        utc_offset_secs: 3600,
    }
}
