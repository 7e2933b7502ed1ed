//! Raw status polls as published by upstream operators.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AssetId, BatchId, SourceId, ValidationError};

/// The status an operator reports for an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollStatus {
    /// Actively discharging.
    Start,
    /// Not discharging.
    Stop,
    /// Sensor unreachable.
    Offline,
}

impl PollStatus {
    /// Decodes the numeric status most feature services publish.
    pub fn from_code(code: i64) -> Result<Self, ValidationError> {
        match code {
            1 => Ok(Self::Start),
            0 => Ok(Self::Stop),
            -1 => Ok(Self::Offline),
            _ => Err(ValidationError::UnknownStatus {
                value: code.to_string(),
            }),
        }
    }

    /// Decodes the free-text status used by operators without a numeric code.
    ///
    /// "Under Investigation" is treated as not discharging.
    pub fn from_description(text: &str) -> Result<Self, ValidationError> {
        let text = text.trim();
        if text == "Overflow Operating" {
            Ok(Self::Start)
        } else if text.starts_with("Overflow Not Operating") || text == "Under Investigation" {
            Ok(Self::Stop)
        } else {
            Err(ValidationError::UnknownStatus {
                value: text.to_string(),
            })
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::Offline => "Offline",
        }
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Start" | "start" => Ok(Self::Start),
            "Stop" | "stop" => Ok(Self::Stop),
            "Offline" | "offline" => Ok(Self::Offline),
            other => other.parse::<i64>().map_or_else(
                |_| Self::from_description(other),
                Self::from_code,
            ),
        }
    }
}

impl Serialize for PollStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PollStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Code(i64),
            Text(String),
        }

        let decoded = match Wire::deserialize(deserializer)? {
            Wire::Code(code) => Self::from_code(code),
            Wire::Text(text) => text.parse(),
        };
        decoded.map_err(serde::de::Error::custom)
    }
}

/// One observation of one asset in one poll batch.
///
/// Which timestamp means what depends on the source; see
/// [`Strategy`](crate::Strategy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPoll {
    pub asset_id: AssetId,
    pub source_id: SourceId,
    pub batch_id: BatchId,
    pub reported_status: PollStatus,
    /// When the reported status is claimed to have begun.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_event_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_event_end: Option<DateTime<Utc>>,
    /// When the source last refreshed the record. Fallback only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// When the batch itself was taken.
    pub poll_time: DateTime<Utc>,
}
