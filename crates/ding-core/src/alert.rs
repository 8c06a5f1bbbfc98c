//! Alertmanager webhook payload.
//!
//! Every field is optional on the wire. Absent values decode to empty so the
//! template layer never has to distinguish "missing" from "blank".

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type KeyValues = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Firing,
    Resolved,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Firing => write!(f, "firing"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// One notification batch as posted by Alertmanager's webhook receiver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertGroup {
    pub version: String,
    pub group_key: String,
    pub truncated_alerts: u64,
    pub status: AlertStatus,
    pub receiver: String,
    pub group_labels: KeyValues,
    pub common_labels: KeyValues,
    pub common_annotations: KeyValues,
    #[serde(rename = "externalURL")]
    pub external_url: String,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Alert {
    pub status: AlertStatus,
    pub labels: KeyValues,
    pub annotations: KeyValues,
    #[serde(deserialize_with = "lenient_time")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_time")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
    pub fingerprint: String,
}

impl AlertGroup {
    pub fn firing(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(|a| a.status == AlertStatus::Firing)
    }

    pub fn resolved(&self) -> impl Iterator<Item = &Alert> {
        self.alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Resolved)
    }

    /// Link to the Alertmanager UI filtered to this group's receiver.
    pub fn alertmanager_url(&self) -> String {
        if self.external_url.is_empty() {
            return String::new();
        }
        let base = self.external_url.trim_end_matches('/');
        if self.receiver.is_empty() {
            format!("{base}/#/alerts")
        } else {
            format!("{base}/#/alerts?receiver={}", self.receiver)
        }
    }
}

/// Alertmanager sends `0001-01-01T00:00:00Z` for "not set"; treat that, empty
/// strings and unparsable values as absent.
fn lenient_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.timestamp() > 0))
}
