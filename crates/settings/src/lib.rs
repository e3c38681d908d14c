//! Persistence of per-template print settings: a local JSON cache mirrored to
//! a shared key/value store.

pub mod print_settings;

pub use print_settings::{
    sanitize_key, NoRemote, PrintSettings, PrintSettingsStore, RemoteSettings, SaveOutcome,
    SettingsError, SharedDirectoryRemote, DEFAULT_SETTINGS_KEY,
};
