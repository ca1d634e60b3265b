use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use redb::{Database, ReadTransaction, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::model::{
    KeyRecord, KeyStatus, Settings, SettingsPatch, StateDocument, Stats, Validation,
    SECONDS_PER_DAY,
};
use crate::auth::SecretHash;
use crate::error::{Error, Result};
use crate::keygen::{generate_id, generate_key};

const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("keys");
/// Secondary index: key value → record id.
const KEY_VALUES: TableDefinition<&str, &str> = TableDefinition::new("key_values");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const META_ADMIN_SECRET: &str = "admin_secret_hash";
const META_SETTINGS: &str = "settings";

/// Largest batch a single `create` call may issue.
pub const MAX_BATCH: u32 = 100;

pub const MSG_KEY_MISSING: &str = "key does not exist";
pub const MSG_KEY_EXPIRED: &str = "key has expired";
pub const MSG_KEY_VALID: &str = "key is valid";

/// Thread-safe handle to the redb store.
///
/// Every operation runs in a single redb transaction. redb admits one write
/// transaction at a time, so read-modify-write cycles are serialized and an
/// operation that returns early without committing leaves no trace.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(KEYS)?;
            write_txn.open_table(KEY_VALUES)?;
            let mut meta = write_txn.open_table(META)?;
            if meta.get(META_SETTINGS)?.is_none() {
                meta.insert(META_SETTINGS, encode(&Settings::default())?.as_slice())?;
            }
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    pub(crate) fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    // ── Keys ─────────────────────────────────────────────────────────────────

    /// All records, oldest first.
    pub fn list(&self) -> Result<Vec<KeyRecord>> {
        let read_txn = self.db.begin_read()?;
        read_keys(&read_txn)
    }

    /// Issue `count` fresh active keys valid for `duration_days` (or the
    /// configured default when `None`).
    pub fn create(
        &self,
        count: u32,
        duration_days: Option<u32>,
        note: Option<&str>,
    ) -> Result<Vec<KeyRecord>> {
        self.create_at(count, duration_days, note, Self::now())
    }

    pub fn create_at(
        &self,
        count: u32,
        duration_days: Option<u32>,
        note: Option<&str>,
        now: i64,
    ) -> Result<Vec<KeyRecord>> {
        if !(1..=MAX_BATCH).contains(&count) {
            return Err(Error::invalid(format!(
                "count must be between 1 and {MAX_BATCH}"
            )));
        }
        if duration_days == Some(0) {
            return Err(Error::invalid("duration_days must be at least 1"));
        }
        let note = note
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_owned);

        let write_txn = self.db.begin_write()?;
        let created = {
            let settings = settings_in(&write_txn.open_table(META)?)?;
            let mut keys = write_txn.open_table(KEYS)?;
            let mut values = write_txn.open_table(KEY_VALUES)?;

            let existing = keys.len()? as usize;
            if existing + count as usize > settings.max_keys {
                return Err(Error::invalid(format!(
                    "creating {count} key(s) would exceed the limit of {} keys",
                    settings.max_keys
                )));
            }

            let days = duration_days.unwrap_or(settings.default_duration_days);
            let expires_at = now + i64::from(days) * SECONDS_PER_DAY;

            let mut created = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let value = loop {
                    let candidate = generate_key(settings.key_length);
                    if values.get(candidate.as_str())?.is_none() {
                        break candidate;
                    }
                    debug!("generated key value collided; drawing again");
                };
                let record = KeyRecord {
                    id: generate_id(),
                    value,
                    status: KeyStatus::Active,
                    created_at: now,
                    expires_at,
                    last_used_at: None,
                    note: note.clone(),
                    history: Vec::new(),
                };
                keys.insert(record.id.as_str(), encode(&record)?.as_slice())?;
                values.insert(record.value.as_str(), record.id.as_str())?;
                created.push(record);
            }
            created
        };
        write_txn.commit()?;

        debug!(count = created.len(), "stored new keys");
        Ok(created)
    }

    /// Move a record to `status`. Any settable status is reachable from any
    /// other.
    pub fn set_status(&self, id: &str, status: KeyStatus) -> Result<KeyRecord> {
        if status == KeyStatus::Expired {
            return Err(Error::invalid(
                "status must be one of active, locked, suspended",
            ));
        }
        let now = Self::now();

        let write_txn = self.db.begin_write()?;
        let record = {
            let mut keys = write_txn.open_table(KEYS)?;
            let raw_bytes: Option<Vec<u8>> = keys.get(id)?.map(|guard| guard.value().to_vec());
            let Some(bytes) = raw_bytes else {
                return Err(not_found(id));
            };

            let mut record: KeyRecord = decode(&bytes)?;
            let previous = record.status;
            record.status = status;
            record.record(format!("status changed from {previous} to {status}"), now);
            keys.insert(id, encode(&record)?.as_slice())?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    /// Permanently remove a record.
    pub fn delete(&self, id: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut keys = write_txn.open_table(KEYS)?;
            let raw_bytes: Option<Vec<u8>> =
                keys.remove(id)?.map(|guard| guard.value().to_vec());
            let Some(bytes) = raw_bytes else {
                return Err(not_found(id));
            };
            let record: KeyRecord = decode(&bytes)?;
            let mut values = write_txn.open_table(KEY_VALUES)?;
            values.remove(record.value.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Check whether the key string `value` is currently usable.
    pub fn validate(&self, value: &str) -> Result<Validation> {
        self.validate_at(value, Self::now())
    }

    /// Validation as of `now`. An active key found past its expiry is moved
    /// to `expired` here; nothing else sweeps them.
    pub fn validate_at(&self, value: &str, now: i64) -> Result<Validation> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let values = write_txn.open_table(KEY_VALUES)?;
            let id: Option<String> = values.get(value)?.map(|guard| guard.value().to_owned());
            let Some(id) = id else {
                return Ok(Validation::invalid(MSG_KEY_MISSING));
            };

            let mut keys = write_txn.open_table(KEYS)?;
            let raw_bytes: Option<Vec<u8>> =
                keys.get(id.as_str())?.map(|guard| guard.value().to_vec());
            let Some(bytes) = raw_bytes else {
                warn!(id = %id, "value index points at a missing record");
                return Ok(Validation::invalid(MSG_KEY_MISSING));
            };
            let mut record: KeyRecord = decode(&bytes)?;

            match record.status {
                KeyStatus::Active if record.is_expired(now) => {
                    record.status = KeyStatus::Expired;
                    record.record("expired", now);
                    keys.insert(id.as_str(), encode(&record)?.as_slice())?;
                    debug!(id = %id, "lazily expired key");
                    Validation::invalid(MSG_KEY_EXPIRED)
                }
                KeyStatus::Active => {
                    record.last_used_at = Some(now);
                    record.record("validated", now);
                    keys.insert(id.as_str(), encode(&record)?.as_slice())?;
                    Validation {
                        valid: true,
                        message: MSG_KEY_VALID.to_owned(),
                        expires_at: Some(record.expires_at),
                        note: record.note,
                    }
                }
                KeyStatus::Expired => return Ok(Validation::invalid(MSG_KEY_EXPIRED)),
                blocked => return Ok(Validation::invalid(format!("key is {blocked}"))),
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Per-status counts using the live expiry check.
    pub fn stats(&self) -> Result<Stats> {
        self.stats_at(Self::now())
    }

    pub fn stats_at(&self, now: i64) -> Result<Stats> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KEYS)?;

        let mut stats = Stats::default();
        for item in table.iter()? {
            let (_id, v) = item?;
            let record: KeyRecord = decode(v.value())?;
            stats.count(record.effective_status(now));
        }
        Ok(stats)
    }

    // ── Settings ─────────────────────────────────────────────────────────────

    pub fn settings(&self) -> Result<Settings> {
        let read_txn = self.db.begin_read()?;
        settings_in(&read_txn.open_table(META)?)
    }

    pub fn update_settings(&self, patch: &SettingsPatch) -> Result<Settings> {
        let write_txn = self.db.begin_write()?;
        let settings = {
            let mut meta = write_txn.open_table(META)?;
            let settings = settings_in(&meta)?.merged(patch)?;
            meta.insert(META_SETTINGS, encode(&settings)?.as_slice())?;
            settings
        };
        write_txn.commit()?;
        info!(?settings, "settings updated");
        Ok(settings)
    }

    // ── Admin secret ─────────────────────────────────────────────────────────

    pub fn admin_secret_hash(&self) -> Result<Option<SecretHash>> {
        let read_txn = self.db.begin_read()?;
        admin_hash_in(&read_txn.open_table(META)?)
    }

    /// Store `hash` unless an admin secret already exists. Returns whether it
    /// was stored.
    pub fn seed_admin_secret(&self, hash: &SecretHash) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META)?;
            if meta.get(META_ADMIN_SECRET)?.is_some() {
                return Ok(false);
            }
            meta.insert(META_ADMIN_SECRET, hash.encoded().as_bytes())?;
        }
        write_txn.commit()?;
        Ok(true)
    }

    /// Replace the admin secret hash with whatever `replace` derives from the
    /// current one. The check and the write share one transaction; an error
    /// from `replace` leaves the stored hash untouched.
    pub fn update_admin_secret<F>(&self, replace: F) -> Result<()>
    where
        F: FnOnce(Option<&SecretHash>) -> Result<SecretHash>,
    {
        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META)?;
            let current = admin_hash_in(&meta)?;
            let next = replace(current.as_ref())?;
            meta.insert(META_ADMIN_SECRET, next.encoded().as_bytes())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // ── Export ───────────────────────────────────────────────────────────────

    /// The full persisted state as one consistent document.
    pub fn snapshot(&self) -> Result<StateDocument> {
        let read_txn = self.db.begin_read()?;
        let meta = read_txn.open_table(META)?;
        let admin_secret_hash = admin_hash_in(&meta)?
            .map(|h| h.encoded())
            .unwrap_or_default();
        Ok(StateDocument {
            admin_secret_hash,
            keys: read_keys(&read_txn)?,
            settings: settings_in(&meta)?,
        })
    }
}

fn read_keys(read_txn: &ReadTransaction) -> Result<Vec<KeyRecord>> {
    let table = read_txn.open_table(KEYS)?;

    let mut records = Vec::new();
    for item in table.iter()? {
        let (_id, v) = item?;
        records.push(decode::<KeyRecord>(v.value())?);
    }
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(records)
}

fn settings_in(meta: &impl ReadableTable<&'static str, &'static [u8]>) -> Result<Settings> {
    match meta.get(META_SETTINGS)? {
        Some(guard) => decode(guard.value()),
        None => Ok(Settings::default()),
    }
}

fn admin_hash_in(
    meta: &impl ReadableTable<&'static str, &'static [u8]>,
) -> Result<Option<SecretHash>> {
    let Some(guard) = meta.get(META_ADMIN_SECRET)? else {
        return Ok(None);
    };
    let encoded = std::str::from_utf8(guard.value()).context("admin secret hash is not UTF-8")?;
    Ok(Some(SecretHash::from_encoded(encoded)?))
}

fn not_found(id: &str) -> Error {
    Error::NotFound(format!("key {id} not found"))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, bincode::config::standard())
        .context("bincode encode")?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode")?;
    Ok(value)
}
