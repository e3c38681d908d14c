use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use pagepress_printing::{
    CompletionCallback, DriverError, DuplexMode, JobCompletion, NativeJob, NativeMargins,
    PrintDriver,
};
use serde::Serialize;
use tracing::debug;

/// 工作區內的列印佇列資料夾驅動。 / Print driver that spools jobs into a
/// workspace directory instead of talking to a native print component.
#[derive(Debug, Clone)]
pub struct SpoolDriver {
    root: PathBuf,
}

/// Job ticket written next to the spooled document.
#[derive(Debug, Serialize)]
struct SpoolTicket<'a> {
    task: String,
    job_name: &'a str,
    printer_index: i32,
    printer: Option<String>,
    copies: u32,
    duplex: DuplexMode,
    orientation: i32,
    paper: &'a str,
    width: i32,
    height: i32,
    margins: TicketMargins,
    document: String,
}

#[derive(Debug, Serialize)]
struct TicketMargins {
    top: i32,
    bottom: i32,
    left: i32,
    right: i32,
}

impl From<NativeMargins> for TicketMargins {
    fn from(margins: NativeMargins) -> Self {
        Self {
            top: margins.top,
            bottom: margins.bottom,
            left: margins.left,
            right: margins.right,
        }
    }
}

impl SpoolDriver {
    /// `root` is the workspace state directory (`<workspace>/.pagepress`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.root.join("spool")
    }

    fn printers_path(&self) -> PathBuf {
        self.root.join("printers.json")
    }

    fn read_printers(&self) -> Result<Vec<String>, DriverError> {
        let path = self.printers_path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(DriverError::Unavailable)
            }
            Err(err) => {
                return Err(DriverError::Rejected(format!(
                    "failed to read {}: {err}",
                    path.display()
                )))
            }
        };
        serde_json::from_str(&contents).map_err(|err| {
            DriverError::Rejected(format!("invalid printer list {}: {err}", path.display()))
        })
    }

    /// Claims the next free `job-NNNNN` stem in the spool directory and opens
    /// its document for writing. Task ids restart with every process, so
    /// they cannot name spool files.
    fn claim_document(&self) -> io::Result<(PathBuf, File)> {
        let dir = self.spool_dir();
        fs::create_dir_all(&dir)?;
        let mut seq = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "html"))
            .count()
            + 1;
        loop {
            let path = dir.join(format!("job-{seq:05}.html"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => seq += 1,
                Err(err) => return Err(err),
            }
        }
    }

    fn printer_name(&self, index: i32) -> Result<Option<String>, DriverError> {
        if index < 0 {
            return Ok(None);
        }
        let printers = self.read_printers().unwrap_or_default();
        usize::try_from(index)
            .ok()
            .and_then(|idx| printers.get(idx).cloned())
            .map(Some)
            .ok_or(DriverError::UnknownPrinter(index))
    }
}

impl PrintDriver for SpoolDriver {
    fn enumerate_printers(&self) -> Result<Vec<String>, DriverError> {
        self.read_printers()
    }

    fn submit_job(&self, job: &NativeJob, done: CompletionCallback) -> Result<(), DriverError> {
        let printer = self.printer_name(job.printer_index)?;
        let rejected = |err: io::Error| DriverError::Rejected(err.to_string());
        let (document, mut file) = self.claim_document().map_err(rejected)?;
        file.write_all(job.html.as_bytes()).map_err(rejected)?;

        let ticket = SpoolTicket {
            task: job.task_id.to_string(),
            job_name: &job.job_name,
            printer_index: job.printer_index,
            printer,
            copies: job.copies,
            duplex: job.duplex,
            orientation: job.page_size.orientation as i32,
            paper: &job.page_size.paper_name,
            width: job.page_size.width,
            height: job.page_size.height,
            margins: job.margins.into(),
            document: document.display().to_string(),
        };
        let payload = serde_json::to_string_pretty(&ticket)
            .map_err(|err| DriverError::Rejected(err.to_string()))?;
        write_file(&document.with_extension("json"), &payload).map_err(rejected)?;
        debug!(task = %job.task_id, path = %document.display(), "job spooled");

        // The spool directory is the printer: once written, the job is done.
        done(JobCompletion {
            task_id: job.task_id,
            success: true,
        });
        Ok(())
    }

    fn export_file(&self, job: &NativeJob, path: &Path) -> Result<(), DriverError> {
        write_file(path, &job.html).map_err(|err| DriverError::Export {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }
}

fn write_file(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}
