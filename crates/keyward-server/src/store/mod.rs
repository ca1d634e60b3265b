pub mod db;
pub mod model;

pub use db::{Store, MAX_BATCH};
pub use model::{
    HistoryEntry, KeyRecord, KeyStatus, Settings, SettingsPatch, StateDocument, Stats,
    Validation,
};
