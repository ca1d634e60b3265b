use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Locked,
    Suspended,
    Expired,
}

impl KeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Locked => "locked",
            KeyStatus::Suspended => "suspended",
            KeyStatus::Expired => "expired",
        }
    }

    /// Parse a status an admin is allowed to assign. `expired` is only ever
    /// reached through validation.
    pub fn parse_settable(s: &str) -> Result<Self, Error> {
        match s.parse()? {
            KeyStatus::Expired => Err(Error::invalid(
                "status must be one of active, locked, suspended",
            )),
            status => Ok(status),
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(KeyStatus::Active),
            "locked" => Ok(KeyStatus::Locked),
            "suspended" => Ok(KeyStatus::Suspended),
            "expired" => Ok(KeyStatus::Expired),
            other => Err(Error::invalid(format!(
                "unknown status {other:?}; expected one of active, locked, suspended"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: String,
    pub value: String,
    pub status: KeyStatus,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_used_at: Option<i64>,
    pub note: Option<String>,
    pub history: Vec<HistoryEntry>,
}

impl KeyRecord {
    /// Returns true once wall-clock time has passed `expires_at`. Shared by
    /// validation and stats so the two never disagree.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// Status as observed at `now`, folding in lazy expiry.
    pub fn effective_status(&self, now: i64) -> KeyStatus {
        if self.status == KeyStatus::Expired || self.is_expired(now) {
            KeyStatus::Expired
        } else {
            self.status
        }
    }

    pub(crate) fn record(&mut self, action: impl Into<String>, timestamp: i64) {
        self.history.push(HistoryEntry {
            action: action.into(),
            timestamp,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub default_duration_days: u32,
    pub key_length: usize,
    pub max_keys: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_duration_days: 30,
            key_length: 16,
            max_keys: 1000,
        }
    }
}

pub const MIN_KEY_LENGTH: usize = 8;
pub const MAX_KEY_LENGTH: usize = 128;

/// Partial settings update. Omitted fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    pub default_duration_days: Option<u32>,
    pub key_length: Option<usize>,
    pub max_keys: Option<usize>,
}

impl Settings {
    /// Shallow-merge `patch`, rejecting values the store cannot honor.
    pub fn merged(&self, patch: &SettingsPatch) -> Result<Settings, Error> {
        let merged = Settings {
            default_duration_days: patch
                .default_duration_days
                .unwrap_or(self.default_duration_days),
            key_length: patch.key_length.unwrap_or(self.key_length),
            max_keys: patch.max_keys.unwrap_or(self.max_keys),
        };
        if merged.default_duration_days == 0 {
            return Err(Error::invalid("default_duration_days must be at least 1"));
        }
        if !(MIN_KEY_LENGTH..=MAX_KEY_LENGTH).contains(&merged.key_length) {
            return Err(Error::invalid(format!(
                "key_length must be between {MIN_KEY_LENGTH} and {MAX_KEY_LENGTH}"
            )));
        }
        if merged.max_keys == 0 {
            return Err(Error::invalid("max_keys must be at least 1"));
        }
        Ok(merged)
    }
}

/// Per-status counts. Every record lands in exactly one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total: usize,
    pub active: usize,
    pub locked: usize,
    pub suspended: usize,
    pub expired: usize,
}

impl Stats {
    pub(crate) fn count(&mut self, status: KeyStatus) {
        self.total += 1;
        match status {
            KeyStatus::Active => self.active += 1,
            KeyStatus::Locked => self.locked += 1,
            KeyStatus::Suspended => self.suspended += 1,
            KeyStatus::Expired => self.expired += 1,
        }
    }
}

/// Outcome of an end-client validation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Validation {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            expires_at: None,
            note: None,
        }
    }
}

/// The whole persisted state as one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub admin_secret_hash: String,
    pub keys: Vec<KeyRecord>,
    pub settings: Settings,
}
