use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use pagepress_printing::{
    DuplexMode, JobSettings, Margin, Orientation, PageConfig, PaperSize, PrinterClass,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

const SETTINGS_VERSION: u32 = 1;
const MAX_COPIES: u32 = 99;
const MIN_SCALE: f32 = 0.1;
const MAX_SCALE: f32 = 5.0;

/// Key used when the caller does not name a settings profile.
pub const DEFAULT_SETTINGS_KEY: &str = "print";

/// Errors raised while reading or writing print settings.
/// 讀寫列印設定時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read print settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse print settings {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("print settings {origin} must be a JSON object")]
    NotAnObject { origin: String },
    #[error("failed to serialize print settings for key {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write print settings {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("remote settings store failed for key {key}: {message}")]
    Remote { key: String, message: String },
}

/// Persisted print options for one template profile.
/// 單一模板的列印設定（序列化保存）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintSettings {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub paper: PaperSize,
    #[serde(default)]
    pub margins_mm: Margin,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub duplex: DuplexMode,
    #[serde(default)]
    pub fixed_logo: bool,
    #[serde(default)]
    pub printer_class: PrinterClass,
    #[serde(default = "default_copies")]
    pub copies: u32,
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// `-1` selects the default printer.
    #[serde(default = "default_printer_index")]
    pub printer_index: i32,
    #[serde(default)]
    pub close_on_printed: bool,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

fn default_copies() -> u32 {
    1
}

fn default_scale() -> f32 {
    1.0
}

fn default_printer_index() -> i32 {
    -1
}

fn default_file_prefix() -> String {
    "export".to_string()
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            paper: PaperSize::default(),
            margins_mm: Margin::default(),
            orientation: Orientation::default(),
            duplex: DuplexMode::default(),
            fixed_logo: false,
            printer_class: PrinterClass::default(),
            copies: default_copies(),
            scale: default_scale(),
            printer_index: default_printer_index(),
            close_on_printed: false,
            file_prefix: default_file_prefix(),
        }
    }
}

impl PrintSettings {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = SETTINGS_VERSION;
        }
        self.copies = self.copies.clamp(1, MAX_COPIES);
        self.scale = if self.scale.is_finite() && self.scale > 0.0 {
            self.scale.clamp(MIN_SCALE, MAX_SCALE)
        } else {
            default_scale()
        };
        self.printer_index = self.printer_index.max(-1);
        if self.file_prefix.trim().is_empty() {
            self.file_prefix = default_file_prefix();
        }
        self.sanitize_paper();
        self.sanitize_margins();
    }

    fn sanitize_paper(&mut self) {
        match PaperSize::standard(self.paper.id) {
            Some(standard) => self.paper = standard,
            None => {
                let valid = |value: f32| value.is_finite() && value > 0.0;
                if !valid(self.paper.width_mm) || !valid(self.paper.height_mm) {
                    self.paper = PaperSize::default();
                }
            }
        }
    }

    fn sanitize_margins(&mut self) {
        let fallback = Margin::default();
        let fix = |value: f32, default: f32| {
            if value.is_finite() {
                value.max(0.0)
            } else {
                default
            }
        };
        self.margins_mm = Margin {
            top: fix(self.margins_mm.top, fallback.top),
            bottom: fix(self.margins_mm.bottom, fallback.bottom),
            left: fix(self.margins_mm.left, fallback.left),
            right: fix(self.margins_mm.right, fallback.right),
        };
        // Margins that eat the whole sheet leave nothing to pack.
        let (width, height) = self.paper.oriented(self.orientation);
        if self.margins_mm.vertical() >= height || self.margins_mm.horizontal() >= width {
            self.margins_mm = fallback;
        }
    }

    /// Layout-affecting part of the settings.
    pub fn to_page_config(&self) -> PageConfig {
        PageConfig {
            orientation: self.orientation,
            paper: self.paper,
            margins: self.margins_mm,
            printer_class: self.printer_class,
            fixed_logo: self.fixed_logo,
            scale: self.scale,
        }
    }

    pub fn to_job_settings(&self, job_name: impl Into<String>) -> JobSettings {
        JobSettings {
            job_name: job_name.into(),
            printer_index: self.printer_index,
            copies: self.copies,
            duplex: self.duplex,
            file_prefix: self.file_prefix.clone(),
        }
    }
}

/// Key/value store shared between workstations. Blobs are the JSON form of
/// [`PrintSettings`].
/// 遠端（共用）設定儲存的介面。
pub trait RemoteSettings {
    fn fetch(&self, key: &str) -> Result<Option<String>, SettingsError>;
    fn save(&self, key: &str, blob: &str) -> Result<(), SettingsError>;
}

/// Remote store for standalone use: nothing to fetch, saving is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemote;

impl RemoteSettings for NoRemote {
    fn fetch(&self, _key: &str) -> Result<Option<String>, SettingsError> {
        Ok(None)
    }

    fn save(&self, _key: &str, _blob: &str) -> Result<(), SettingsError> {
        Ok(())
    }
}

/// Remote store backed by a shared directory (for example a network mount),
/// one `{key}.json` blob per key.
#[derive(Debug, Clone)]
pub struct SharedDirectoryRemote {
    root: PathBuf,
}

impl SharedDirectoryRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(key)))
    }
}

impl RemoteSettings for SharedDirectoryRemote {
    fn fetch(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let path = self.blob_path(key);
        match fs::read_to_string(&path) {
            Ok(blob) => Ok(Some(blob)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SettingsError::Remote {
                key: key.to_string(),
                message: err.to_string(),
            }),
        }
    }

    fn save(&self, key: &str, blob: &str) -> Result<(), SettingsError> {
        write_atomic(&self.blob_path(key), blob).map_err(|err| SettingsError::Remote {
            key: key.to_string(),
            message: err.to_string(),
        })
    }
}

/// Which sides accepted a [`PrintSettingsStore::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    pub local: bool,
    pub remote: bool,
}

impl SaveOutcome {
    pub fn is_complete(&self) -> bool {
        self.local && self.remote
    }
}

/// Print settings for one key, cached locally as JSON and mirrored to a
/// remote store. Storage failures never surface: they are logged and the
/// store keeps working with what it has.
/// 以本機 JSON 快取並同步至遠端的列印設定儲存。
#[derive(Debug)]
pub struct PrintSettingsStore<R: RemoteSettings = NoRemote> {
    key: String,
    path: PathBuf,
    remote: R,
    data: PrintSettings,
}

impl<R: RemoteSettings> PrintSettingsStore<R> {
    /// Loads the local cache, then overlays the fields present in the remote
    /// copy. A remote blob that is not a JSON object is ignored.
    pub fn load(cache_dir: impl AsRef<Path>, key: &str, remote: R) -> Self {
        let key = sanitize_key(key);
        let path = cache_dir.as_ref().join(format!("{key}.json"));

        let mut data = match read_local(&path) {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                debug!(path = %path.display(), "no cached print settings");
                PrintSettings::default()
            }
            Err(err) => {
                warn!(error = %err, "ignoring unreadable print settings cache");
                PrintSettings::default()
            }
        };

        match remote.fetch(&key) {
            Ok(Some(blob)) => match overlay_blob(&data, &blob, &format!("remote:{key}")) {
                Ok(settings) => data = settings,
                Err(err) => warn!(error = %err, "ignoring malformed remote print settings"),
            },
            Ok(None) => debug!(key = %key, "no remote print settings"),
            Err(err) => warn!(error = %err, "remote print settings unavailable"),
        }

        data.sanitize();
        Self {
            key,
            path,
            remote,
            data,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &PrintSettings {
        &self.data
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn update<F>(&mut self, op: F) -> SaveOutcome
    where
        F: FnOnce(&mut PrintSettings),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    pub fn overwrite(&mut self, settings: PrintSettings) -> SaveOutcome {
        self.data = settings;
        self.data.sanitize();
        self.save()
    }

    /// Writes the local cache and the remote copy independently.
    pub fn save(&self) -> SaveOutcome {
        let blob = match serde_json::to_string_pretty(&self.data) {
            Ok(blob) => blob,
            Err(source) => {
                let err = SettingsError::Serialize {
                    key: self.key.clone(),
                    source,
                };
                warn!(error = %err, "print settings not saved");
                return SaveOutcome {
                    local: false,
                    remote: false,
                };
            }
        };

        let local = match write_atomic(&self.path, &blob) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "failed to cache print settings locally");
                false
            }
        };
        let remote = match self.remote.save(&self.key, &blob) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "failed to save print settings remotely");
                false
            }
        };
        debug!(key = %self.key, local, remote, "print settings saved");
        SaveOutcome { local, remote }
    }
}

/// Restricts a settings key to characters safe in a file name.
pub fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        DEFAULT_SETTINGS_KEY.to_string()
    } else {
        cleaned.to_string()
    }
}

fn read_local(path: &Path) -> Result<Option<PrintSettings>, SettingsError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_blob(&contents, &path.display().to_string()).map(Some)
}

fn parse_blob(blob: &str, origin: &str) -> Result<PrintSettings, SettingsError> {
    overlay_blob(&PrintSettings::default(), blob, origin)
}

/// Applies the fields present in `blob` on top of `base`; absent fields keep
/// the base value.
fn overlay_blob(
    base: &PrintSettings,
    blob: &str,
    origin: &str,
) -> Result<PrintSettings, SettingsError> {
    let parse_error = |source| SettingsError::Parse {
        origin: origin.to_string(),
        source,
    };
    let Value::Object(fields) = serde_json::from_str::<Value>(blob).map_err(parse_error)? else {
        return Err(SettingsError::NotAnObject {
            origin: origin.to_string(),
        });
    };
    let mut merged = serde_json::to_value(base).map_err(parse_error)?;
    if let Value::Object(target) = &mut merged {
        target.extend(fields);
    }
    serde_json::from_value(merged).map_err(parse_error)
}

fn write_atomic(path: &Path, payload: &str) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| SettingsError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload.as_bytes()).map_err(|source| SettingsError::Write {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagepress_printing::PaperId;

    #[test]
    fn keys_are_made_file_safe() {
        assert_eq!(sanitize_key("invoice/A5 copy"), "invoice_A5_copy");
        assert_eq!(sanitize_key("  "), DEFAULT_SETTINGS_KEY);
        assert_eq!(sanitize_key(".."), DEFAULT_SETTINGS_KEY);
        assert_eq!(sanitize_key("delivery-note.v2"), "delivery-note.v2");
    }

    #[test]
    fn sanitize_repairs_out_of_range_values() {
        let mut settings = PrintSettings {
            version: 0,
            copies: 0,
            scale: f32::NAN,
            printer_index: -7,
            file_prefix: " ".into(),
            margins_mm: Margin {
                top: -3.0,
                bottom: f32::INFINITY,
                left: 4.0,
                right: 4.0,
            },
            ..PrintSettings::default()
        };
        settings.sanitize();
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.copies, 1);
        assert_eq!(settings.scale, 1.0);
        assert_eq!(settings.printer_index, -1);
        assert_eq!(settings.file_prefix, "export");
        assert_eq!(settings.margins_mm.top, 0.0);
        assert_eq!(settings.margins_mm.bottom, 10.0);
        assert_eq!(settings.margins_mm.left, 4.0);
    }

    #[test]
    fn standard_paper_dimensions_are_restored() {
        let mut settings = PrintSettings {
            paper: PaperSize::new(PaperId::A5, 1.0, 1.0),
            ..PrintSettings::default()
        };
        settings.sanitize();
        assert_eq!(settings.paper, PaperSize::A5);

        let mut custom = PrintSettings {
            paper: PaperSize::new(PaperId::Custom, 0.0, 100.0),
            ..PrintSettings::default()
        };
        custom.sanitize();
        assert_eq!(custom.paper, PaperSize::A4);
    }

    #[test]
    fn oversized_margins_fall_back_to_defaults() {
        let mut settings = PrintSettings {
            paper: PaperSize::A5,
            margins_mm: Margin::uniform(120.0),
            ..PrintSettings::default()
        };
        settings.sanitize();
        assert_eq!(settings.margins_mm, Margin::default());
    }

    #[test]
    fn conversions_carry_every_field() {
        let settings = PrintSettings {
            orientation: Orientation::Landscape,
            printer_class: PrinterClass::Stylus,
            fixed_logo: true,
            scale: 0.8,
            copies: 3,
            printer_index: 2,
            duplex: DuplexMode::Automatic,
            file_prefix: "invoice".into(),
            ..PrintSettings::default()
        };
        let config = settings.to_page_config();
        assert_eq!(config.orientation, Orientation::Landscape);
        assert_eq!(config.printer_class, PrinterClass::Stylus);
        assert!(config.fixed_logo);
        assert_eq!(config.scale, 0.8);

        let job = settings.to_job_settings("invoice 42");
        assert_eq!(job.job_name, "invoice 42");
        assert_eq!(job.copies, 3);
        assert_eq!(job.printer_index, 2);
        assert_eq!(job.duplex, DuplexMode::Automatic);
        assert_eq!(job.file_prefix, "invoice");
    }

    #[test]
    fn partial_blob_uses_field_defaults() {
        let settings = parse_blob(r#"{ "copies": 4, "orientation": "landscape" }"#, "test").unwrap();
        assert_eq!(settings.copies, 4);
        assert_eq!(settings.orientation, Orientation::Landscape);
        assert_eq!(settings.paper, PaperSize::A4);
        assert_eq!(settings.scale, 1.0);
    }

    #[test]
    fn overlay_keeps_fields_missing_from_blob() {
        let base = PrintSettings {
            copies: 5,
            fixed_logo: true,
            ..PrintSettings::default()
        };
        let blob = r#"{ "paper": { "id": "a5", "width_mm": 148.0, "height_mm": 210.0 } }"#;
        let merged = overlay_blob(&base, blob, "test").unwrap();
        assert_eq!(merged.paper.id, PaperId::A5);
        assert_eq!(merged.copies, 5);
        assert!(merged.fixed_logo);

        assert_eq!(overlay_blob(&base, "{}", "test").unwrap(), base);
    }

    #[test]
    fn non_object_blobs_are_rejected() {
        for blob in ["[]", "null", "3", r#""copies""#] {
            assert!(matches!(
                parse_blob(blob, "test"),
                Err(SettingsError::NotAnObject { .. })
            ));
        }
        assert!(matches!(
            parse_blob("{ broken", "test"),
            Err(SettingsError::Parse { .. })
        ));
    }
}
