//! Serde helpers for durations in config files.
//!
//! Accepts either an integer number of milliseconds (`30000`) or a
//! humantime string (`"30s"`, `"1m 30s"`). Serializes as humantime.

use serde::{de, Deserialize};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

impl RawDuration {
    fn into_duration<E: de::Error>(self) -> Result<Duration, E> {
        match self {
            RawDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
            RawDuration::Text(text) => humantime::parse_duration(text.trim())
                .map_err(|e| E::custom(format!("invalid duration '{}': {}", text, e))),
        }
    }
}

fn format(duration: &Duration) -> String {
    humantime::format_duration(*duration).to_string()
}

pub mod required {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        super::RawDuration::deserialize(deserializer)?.into_duration()
    }
}

pub mod optional {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&super::format(d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<super::RawDuration>::deserialize(deserializer)?
            .map(|raw| raw.into_duration())
            .transpose()
    }
}

/// Parse a duration the way config files spell it.
pub fn parse(text: &str) -> Result<Duration, String> {
    let raw = match text.trim().parse::<u64>() {
        Ok(ms) => RawDuration::Millis(ms),
        Err(_) => RawDuration::Text(text.to_string()),
    };
    raw.into_duration::<de::value::Error>()
        .map_err(|e| e.to_string())
}
