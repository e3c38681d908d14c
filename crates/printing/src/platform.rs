use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::job::{
    DuplexMode, JobSettings, Orientation, PageConfig, PrinterClass, PrinterItem, TaskId,
};
use crate::units;

/// Invoked once when the driver reports the outcome of a submitted job.
/// 列印作業完成時由驅動呼叫一次的回呼。
pub type CompletionCallback = Box<dyn FnOnce(JobCompletion) + Send>;

/// Outcome reported by the driver for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCompletion {
    pub task_id: TaskId,
    pub success: bool,
}

/// Orientation codes understood by the native page-size setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOrientation {
    Portrait = 1,
    Landscape = 2,
    /// Page height follows the content (continuous feed).
    Continuous = 3,
}

impl From<Orientation> for NativeOrientation {
    fn from(orientation: Orientation) -> Self {
        match orientation {
            Orientation::Portrait => NativeOrientation::Portrait,
            Orientation::Landscape => NativeOrientation::Landscape,
        }
    }
}

/// Page size in driver-native units (0.1 mm).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativePageSize {
    pub orientation: NativeOrientation,
    pub width: i32,
    pub height: i32,
    pub paper_name: String,
}

/// Margins in driver-native units (0.1 mm).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeMargins {
    pub top: i32,
    pub bottom: i32,
    pub left: i32,
    pub right: i32,
}

/// Fully configured job handed to a [`PrintDriver`].
/// 交給列印驅動的完整作業描述。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeJob {
    pub task_id: TaskId,
    pub job_name: String,
    /// `-1` selects the system default printer.
    pub printer_index: i32,
    pub copies: u32,
    pub duplex: DuplexMode,
    pub page_size: NativePageSize,
    pub margins: NativeMargins,
    pub html: String,
}

/// Errors raised by print drivers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("print driver is not installed")]
    Unavailable,
    #[error("printer index {0} is not available")]
    UnknownPrinter(i32),
    #[error("print driver rejected the job: {0}")]
    Rejected(String),
    #[error("failed to export {path}: {message}")]
    Export { path: PathBuf, message: String },
}

/// Capability object over a native print component.
/// 原生列印元件的能力介面。
pub trait PrintDriver {
    fn enumerate_printers(&self) -> Result<Vec<String>, DriverError>;

    /// Queues `job`; `done` is invoked when the driver learns the outcome,
    /// possibly never.
    fn submit_job(&self, job: &NativeJob, done: CompletionCallback) -> Result<(), DriverError>;

    fn export_file(&self, job: &NativeJob, path: &Path) -> Result<(), DriverError>;
}

/// Adapter configuring native jobs from page and job settings. It never lets
/// a driver failure escape as a panic.
/// 依頁面與作業設定組態原生列印作業的橋接層。
pub struct DriverBridge<D> {
    driver: D,
    warned_unavailable: Cell<bool>,
}

impl<D: PrintDriver> DriverBridge<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            warned_unavailable: Cell::new(false),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Printers offered to the user. Falls back to a single default-printer
    /// entry when the driver cannot be queried.
    pub fn printer_items(&self) -> Vec<PrinterItem> {
        match self.driver.enumerate_printers() {
            Ok(names) if !names.is_empty() => names
                .into_iter()
                .enumerate()
                .map(|(index, text)| PrinterItem {
                    text,
                    value: index as i32,
                })
                .collect(),
            Ok(_) => vec![PrinterItem::default_printer()],
            Err(err) => {
                if !self.warned_unavailable.replace(true) {
                    warn!(error = %err, "print driver enumeration failed; using default printer");
                }
                vec![PrinterItem::default_printer()]
            }
        }
    }

    /// Submits `html` as a print job. Submission failures are reported through
    /// `done` as an unsuccessful completion.
    pub fn print(
        &self,
        html: &str,
        config: &PageConfig,
        settings: &JobSettings,
        content_height_px: f32,
        done: CompletionCallback,
    ) -> TaskId {
        let job = build_job(html, config, settings, content_height_px);
        let task_id = job.task_id;
        let slot = Arc::new(Mutex::new(Some(done)));
        let driver_slot = Arc::clone(&slot);
        let forward: CompletionCallback = Box::new(move |completion| {
            if let Some(callback) = take_callback(&driver_slot) {
                callback(completion);
            }
        });

        match self.driver.submit_job(&job, forward) {
            Ok(()) => info!(
                task = %task_id,
                printer = job.printer_index,
                copies = job.copies,
                "print job submitted"
            ),
            Err(err) => {
                warn!(task = %task_id, error = %err, "print job submission failed");
                if let Some(callback) = take_callback(&slot) {
                    callback(JobCompletion {
                        task_id,
                        success: false,
                    });
                }
            }
        }
        task_id
    }

    /// Exports `html` into `dir` under a timestamped file name and returns the
    /// written path.
    pub fn export_to_file(
        &self,
        html: &str,
        config: &PageConfig,
        settings: &JobSettings,
        dir: &Path,
        now: NaiveDateTime,
    ) -> Result<PathBuf, DriverError> {
        // Exports are sheet documents: size them from the paper even when the
        // job is routed to a continuous-feed printer.
        let sheet = PageConfig {
            printer_class: PrinterClass::Laser,
            ..config.clone()
        };
        let job = build_job(html, &sheet, settings, 0.0);
        let path = dir.join(export_file_name(&settings.file_prefix, now));
        debug!(path = %path.display(), "exporting document");
        self.driver.export_file(&job, &path)?;
        Ok(path)
    }
}

fn take_callback(slot: &Mutex<Option<CompletionCallback>>) -> Option<CompletionCallback> {
    match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

/// `{prefix}_{YYYYMMDDHHMMSS}.xls`
pub fn export_file_name(prefix: &str, now: NaiveDateTime) -> String {
    let prefix = prefix.trim();
    let prefix = if prefix.is_empty() { "export" } else { prefix };
    format!("{prefix}_{}.xls", now.format("%Y%m%d%H%M%S"))
}

/// Page size for the native setter. Continuous-feed paper takes the paper
/// width and grows with the scaled content plus the vertical margins.
pub fn native_page_size(config: &PageConfig, content_height_px: f32) -> NativePageSize {
    match config.printer_class {
        PrinterClass::Laser => NativePageSize {
            orientation: config.orientation.into(),
            width: units::mm_to_native(config.paper.width_mm),
            height: units::mm_to_native(config.paper.height_mm),
            paper_name: config.paper.name().to_string(),
        },
        // The driver rotates laser sheets itself from the orientation code, so
        // both classes report the unrotated paper width.
        PrinterClass::Stylus => {
            let content_mm = units::px_to_mm(content_height_px.max(0.0) * config.effective_scale());
            NativePageSize {
                orientation: NativeOrientation::Continuous,
                width: units::mm_to_native(config.paper.width_mm),
                height: units::mm_to_native(content_mm + config.margins.vertical()),
                paper_name: String::new(),
            }
        }
    }
}

pub fn build_job(
    html: &str,
    config: &PageConfig,
    settings: &JobSettings,
    content_height_px: f32,
) -> NativeJob {
    let margins = config.margins;
    NativeJob {
        task_id: TaskId::new(),
        job_name: settings.job_name.clone(),
        printer_index: settings.printer_index.max(-1),
        copies: settings.copies.max(1),
        duplex: settings.duplex,
        page_size: native_page_size(config, content_height_px),
        margins: NativeMargins {
            top: units::mm_to_native(margins.top),
            bottom: units::mm_to_native(margins.bottom),
            left: units::mm_to_native(margins.left),
            right: units::mm_to_native(margins.right),
        },
        html: html.to_string(),
    }
}

/// How the mock driver answers submitted jobs.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCompletion {
    Succeed,
    Fail,
    Never,
}

/// In-memory implementation of [`PrintDriver`] used for tests.
#[cfg(test)]
#[derive(Clone)]
pub struct MockDriver {
    pub printers: Option<Vec<String>>,
    pub completion: MockCompletion,
    pub reject_submit: bool,
    pub(crate) jobs: Arc<Mutex<Vec<NativeJob>>>,
    pub(crate) exports: Arc<Mutex<Vec<(NativeJob, PathBuf)>>>,
}

#[cfg(test)]
impl MockDriver {
    pub fn new(printers: &[&str]) -> Self {
        Self {
            printers: Some(printers.iter().map(|name| name.to_string()).collect()),
            completion: MockCompletion::Succeed,
            reject_submit: false,
            jobs: Arc::default(),
            exports: Arc::default(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            printers: None,
            ..Self::new(&[])
        }
    }

    pub fn drain_jobs(&self) -> Vec<NativeJob> {
        self.jobs.lock().expect("lock poisoned").drain(..).collect()
    }

    pub fn drain_exports(&self) -> Vec<(NativeJob, PathBuf)> {
        self.exports.lock().expect("lock poisoned").drain(..).collect()
    }
}

#[cfg(test)]
impl PrintDriver for MockDriver {
    fn enumerate_printers(&self) -> Result<Vec<String>, DriverError> {
        self.printers.clone().ok_or(DriverError::Unavailable)
    }

    fn submit_job(&self, job: &NativeJob, done: CompletionCallback) -> Result<(), DriverError> {
        if self.reject_submit {
            return Err(DriverError::Rejected("mock rejection".into()));
        }
        self.jobs.lock().expect("lock poisoned").push(job.clone());
        match self.completion {
            MockCompletion::Succeed => done(JobCompletion {
                task_id: job.task_id,
                success: true,
            }),
            MockCompletion::Fail => done(JobCompletion {
                task_id: job.task_id,
                success: false,
            }),
            MockCompletion::Never => {}
        }
        Ok(())
    }

    fn export_file(&self, job: &NativeJob, path: &Path) -> Result<(), DriverError> {
        if self.printers.is_none() {
            return Err(DriverError::Unavailable);
        }
        self.exports
            .lock()
            .expect("lock poisoned")
            .push((job.clone(), path.to_path_buf()));
        Ok(())
    }
}
