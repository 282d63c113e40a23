use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    WeatherError,
    model::{Observation, SunTimes, Temperature, WeatherSummary, Wind},
};

use super::ResponseParser;

/// Parser for the provider's JSON document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

#[derive(Debug, Deserialize)]
struct RawWeather {
    main: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawTemperature {
    temp: f64,
    feels_like: f64,
}

#[derive(Debug, Deserialize)]
struct RawWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct RawSys {
    sunrise: i64,
    sunset: i64,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    weather: RawWeather,
    temperature: RawTemperature,
    visibility: u32,
    wind: RawWind,
    datetime: i64,
    sys: RawSys,
    timezone: i32,
    name: String,
}

impl ResponseParser for JsonParser {
    fn parse(&self, raw: &[u8]) -> Result<Observation, WeatherError> {
        let parsed: RawResponse = serde_json::from_slice(raw)
            .map_err(|e| WeatherError::Parse(format!("malformed response body: {e}")))?;

        Ok(Observation {
            location_name: parsed.name,
            weather: WeatherSummary {
                main: parsed.weather.main,
                description: parsed.weather.description,
            },
            temperature: Temperature {
                temp: parsed.temperature.temp,
                feels_like: parsed.temperature.feels_like,
            },
            visibility: parsed.visibility,
            wind: Wind { speed: parsed.wind.speed },
            observed_at: unix_to_utc("datetime", parsed.datetime)?,
            sun: SunTimes {
                sunrise: unix_to_utc("sys.sunrise", parsed.sys.sunrise)?,
                sunset: unix_to_utc("sys.sunset", parsed.sys.sunset)?,
            },
            utc_offset_secs: parsed.timezone,
        })
    }
}

fn unix_to_utc(field: &str, ts: i64) -> Result<DateTime<Utc>, WeatherError> {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .ok_or_else(|| WeatherError::Parse(format!("timestamp out of range in `{field}`: {ts}")))
}
