use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, warn};

use crate::job::{JobSettings, PageConfig, PrinterClass, TaskId};
use crate::layout::{GreedyPaginator, LayoutSummary, PackedPage, Paginator};
use crate::platform::{CompletionCallback, DriverBridge, DriverError, JobCompletion, PrintDriver};
use crate::preview::{self, PreviewGeometry, PreviewState, PreviewSurface, DEFAULT_VIEWPORT_WIDTH_PX};
use crate::serialize::{self, OutputTarget, SerializeError};
use crate::template::{self, PrintTemplate, RenderedElement, TemplateError};

/// Message key the UI localizes when a native job reports failure.
pub const JOB_FAILED_MESSAGE_KEY: &str = "print.error.job_failed";

/// Errors raised while running print or export actions.
/// 列印或匯出流程執行時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum PrintJobError {
    #[error("output assembly failed: {0}")]
    Serialize(#[from] SerializeError),
    #[error("print driver failed: {0}")]
    Driver(#[from] DriverError),
}

/// Controller state for UI markers (e.g. disabling the print button).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrintJobControllerState {
    #[default]
    Idle,
    Spooling,
    Completed,
    Failed,
}

/// What the UI should do after a job completion arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintNotice {
    /// Job succeeded and the preview asked to close once printed.
    Close,
    /// Job succeeded; keep the preview open.
    Stay,
    /// Job failed; show the localized message and keep the preview open.
    Error {
        task_id: TaskId,
        message_key: &'static str,
    },
}

/// Owned print state machine: template, configuration, packed pages and the
/// preview position always move together.
/// 列印狀態機：模板、設定、分頁結果與預覽位置一併管理。
pub struct PrintSession<P: Paginator = GreedyPaginator> {
    paginator: P,
    template: PrintTemplate,
    config: PageConfig,
    pages: Vec<PackedPage>,
    summary: LayoutSummary,
    preview: PreviewState,
    job_state: PrintJobControllerState,
    pending_task: Option<TaskId>,
}

impl PrintSession<GreedyPaginator> {
    pub fn new(template: PrintTemplate, config: PageConfig) -> Self {
        Self::with_paginator(GreedyPaginator, template, config)
    }

    /// Measures a rendered template and packs it. A template that is not a
    /// table is a fatal configuration error: it is logged and the preview
    /// never initializes.
    pub fn from_rendered(
        root: &RenderedElement,
        config: PageConfig,
    ) -> Result<Self, TemplateError> {
        match template::measure(root) {
            Ok(template) => Ok(Self::new(template, config)),
            Err(err) => {
                warn!(error = %err, "print template rejected; preview not initialized");
                Err(err)
            }
        }
    }
}

impl<P: Paginator> PrintSession<P> {
    pub fn with_paginator(paginator: P, template: PrintTemplate, config: PageConfig) -> Self {
        let mut session = Self {
            paginator,
            template,
            config,
            pages: Vec::new(),
            summary: LayoutSummary {
                total_pages: 0,
                total_rows: 0,
                usable_height_px: 0.0,
            },
            preview: PreviewState::default(),
            job_state: PrintJobControllerState::Idle,
            pending_task: None,
        };
        session.repack();
        session
    }

    /// Re-runs the paginator and clamps the preview into the new page range.
    /// Clears the loading marker set by [`PrintSession::begin_loading`].
    pub fn repack(&mut self) -> &LayoutSummary {
        let result = self.paginator.paginate(&self.template, &self.config);
        self.pages = result.pages;
        self.summary = result.summary;
        self.preview.clamp_to(self.pages.len());
        self.preview.loading = false;
        debug!(
            pages = self.summary.total_pages,
            rows = self.summary.total_rows,
            usable_px = self.summary.usable_height_px,
            "repacked print template"
        );
        &self.summary
    }

    /// Replaces the page configuration; repacks only when it changed.
    pub fn set_config(&mut self, config: PageConfig) -> bool {
        if config == self.config {
            return false;
        }
        self.config = config;
        self.repack();
        true
    }

    /// Marks the preview as waiting for the renderer to flush layout after the
    /// template was mounted or mutated. Heights measured before the flush are
    /// stale, so nothing is rendered until the next repack.
    pub fn begin_loading(&mut self) {
        self.preview.loading = true;
    }

    pub fn set_template(&mut self, template: PrintTemplate) {
        self.template = template;
        self.repack();
    }

    pub fn template(&self) -> &PrintTemplate {
        &self.template
    }

    pub fn config(&self) -> &PageConfig {
        &self.config
    }

    pub fn pages(&self) -> &[PackedPage] {
        &self.pages
    }

    pub fn summary(&self) -> &LayoutSummary {
        &self.summary
    }

    pub fn preview(&self) -> PreviewState {
        self.preview
    }

    pub fn job_state(&self) -> PrintJobControllerState {
        self.job_state
    }

    /// True while a submitted job has not reported back.
    pub fn is_busy(&self) -> bool {
        self.job_state == PrintJobControllerState::Spooling
    }

    /// Selects a 1-based page without repacking.
    pub fn select_page(&mut self, page: usize) -> usize {
        self.preview.select(page)
    }

    pub fn next_page(&mut self) -> usize {
        self.preview.next()
    }

    pub fn previous_page(&mut self) -> usize {
        self.preview.previous()
    }

    pub fn geometry(&self, viewport_width_px: f32) -> PreviewGeometry {
        PreviewGeometry::compute(&self.config, viewport_width_px)
    }

    /// Renders the current page into `surface`. Returns `false` when the
    /// preview is loading (surface untouched) or nothing is packed (surface
    /// cleared).
    pub fn render_current(
        &self,
        surface: &mut dyn PreviewSurface,
        viewport_width_px: Option<f32>,
    ) -> Result<bool, SerializeError> {
        if self.preview.loading {
            return Ok(false);
        }
        let Some(index) = self.preview.current_index() else {
            surface.set_content("");
            return Ok(false);
        };
        let geometry = self.geometry(viewport_width_px.unwrap_or(DEFAULT_VIEWPORT_WIDTH_PX));
        preview::render_page(surface, &self.template, &self.pages, index, &geometry)?;
        Ok(true)
    }

    /// Serialized document for one page (0-based) or all pages.
    pub fn document(&self, target: OutputTarget) -> Result<String, SerializeError> {
        serialize::serialize(&self.template, &self.pages, target)
    }

    /// Height of everything a continuous-feed job has to feed.
    pub fn content_height_px(&self) -> f32 {
        let logo = match self.config.printer_class {
            PrinterClass::Stylus => self.template.logo_height(),
            PrinterClass::Laser => 0,
        };
        (self.template.content_height() + u64::from(logo)) as f32
    }

    /// Prints every packed page. Preview-then-print and direct print share
    /// this path.
    pub fn print_all<D: PrintDriver>(
        &mut self,
        bridge: &DriverBridge<D>,
        settings: &JobSettings,
        done: CompletionCallback,
    ) -> Result<TaskId, PrintJobError> {
        let html = self.document(OutputTarget::All)?;
        let task_id = bridge.print(
            &html,
            &self.config,
            settings,
            self.content_height_px(),
            done,
        );
        // A synchronous driver may already have answered through the callback;
        // the caller still routes that answer through `on_job_completed`.
        self.job_state = PrintJobControllerState::Spooling;
        self.pending_task = Some(task_id);
        Ok(task_id)
    }

    /// Exports the unpaginated template rows.
    pub fn export<D: PrintDriver>(
        &self,
        bridge: &DriverBridge<D>,
        settings: &JobSettings,
        dir: &Path,
        now: NaiveDateTime,
    ) -> Result<PathBuf, PrintJobError> {
        let html = serialize::serialize_flat(&self.template);
        bridge
            .export_to_file(&html, &self.config, settings, dir, now)
            .map_err(|err| {
                warn!(error = %err, "export failed");
                PrintJobError::from(err)
            })
    }

    /// Folds a driver completion into the session and tells the UI what to do.
    /// Completions for anything but the pending task (a late answer to an
    /// older job, or a repeat) are ignored and yield `None`.
    pub fn on_job_completed(
        &mut self,
        completion: JobCompletion,
        close_on_printed: bool,
    ) -> Option<PrintNotice> {
        if self.pending_task != Some(completion.task_id) {
            debug!(task = %completion.task_id, "ignoring completion for a task that is not pending");
            return None;
        }
        self.pending_task = None;
        let notice = if completion.success {
            self.job_state = PrintJobControllerState::Completed;
            if close_on_printed {
                PrintNotice::Close
            } else {
                PrintNotice::Stay
            }
        } else {
            self.job_state = PrintJobControllerState::Failed;
            warn!(task = %completion.task_id, "print job reported failure");
            PrintNotice::Error {
                task_id: completion.task_id,
                message_key: JOB_FAILED_MESSAGE_KEY,
            }
        };
        Some(notice)
    }
}

/// Packs and prints in one step, without a preview.
pub fn direct_print<D: PrintDriver>(
    template: PrintTemplate,
    config: PageConfig,
    bridge: &DriverBridge<D>,
    settings: &JobSettings,
    done: CompletionCallback,
) -> Result<TaskId, PrintJobError> {
    PrintSession::new(template, config).print_all(bridge, settings, done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Margin, PaperId, PaperSize};
    use crate::platform::{MockCompletion, MockDriver};
    use crate::preview::MemorySurface;
    use crate::template::RowRecord;
    use crate::units;
    use std::sync::mpsc;

    fn template(count: usize, height: u32) -> PrintTemplate {
        PrintTemplate {
            table_class: "bill".into(),
            column_grid: r#"<tr class="column-grid"></tr>"#.into(),
            rows: (0..count)
                .map(|idx| RowRecord::new(format!("<tr><td>{idx}</td></tr>"), height))
                .collect(),
            ..PrintTemplate::default()
        }
    }

    fn config(usable_px: f32) -> PageConfig {
        PageConfig {
            paper: PaperSize::new(PaperId::Custom, 100.0, units::px_to_mm(usable_px)),
            margins: Margin::zero(),
            ..PageConfig::default()
        }
    }

    #[test]
    fn repack_clamps_current_page() {
        let mut session = PrintSession::new(template(10, 100), config(250.0));
        assert_eq!(session.preview().total_pages, 5);
        assert_eq!(session.select_page(5), 5);

        session.set_config(config(1000.0));
        assert_eq!(session.preview().total_pages, 1);
        assert_eq!(session.preview().current_page, 1);
        assert!(!session.preview().loading);
    }

    #[test]
    fn loading_preview_skips_render_until_repacked() {
        let mut session = PrintSession::new(template(4, 100), config(250.0));
        session.begin_loading();
        assert!(session.preview().loading);

        let mut surface = MemorySurface {
            content: "previous page".into(),
            ..MemorySurface::default()
        };
        assert!(!session.render_current(&mut surface, None).unwrap());
        assert_eq!(surface.content, "previous page");

        session.set_template(template(4, 100));
        assert!(!session.preview().loading);
        assert!(session.render_current(&mut surface, None).unwrap());
        assert!(surface.content.contains("<td>0</td>"));
    }

    #[test]
    fn unchanged_config_does_not_repack() {
        let mut session = PrintSession::new(template(3, 100), config(250.0));
        assert!(!session.set_config(config(250.0)));
        assert!(session.set_config(PageConfig {
            fixed_logo: true,
            ..config(250.0)
        }));
    }

    #[test]
    fn navigation_does_not_touch_pages() {
        let mut session = PrintSession::new(template(6, 100), config(250.0));
        let before = session.pages().to_vec();
        session.next_page();
        session.next_page();
        session.previous_page();
        assert_eq!(session.preview().current_page, 2);
        assert_eq!(session.pages(), before.as_slice());
    }

    #[test]
    fn render_current_writes_the_selected_page() {
        let mut session = PrintSession::new(template(4, 100), config(250.0));
        session.select_page(2);
        let mut surface = MemorySurface::default();
        assert!(session.render_current(&mut surface, Some(800.0)).unwrap());
        assert!(surface.content.contains("<td>2</td>"));
        assert!(surface.content.contains("<td>3</td>"));
        assert!(!surface.content.contains("<td>0</td>"));
    }

    #[test]
    fn empty_template_leaves_preview_empty() {
        let session = PrintSession::new(template(0, 100), config(250.0));
        let mut surface = MemorySurface {
            content: "stale".into(),
            ..MemorySurface::default()
        };
        assert!(!session.render_current(&mut surface, None).unwrap());
        assert!(surface.content.is_empty());
        assert_eq!(session.preview().current_page, 0);
    }

    #[test]
    fn non_table_template_never_initializes() {
        let root = RenderedElement {
            tag: "section".into(),
            ..RenderedElement::default()
        };
        assert!(matches!(
            PrintSession::from_rendered(&root, PageConfig::default()),
            Err(TemplateError::NotATable(_))
        ));
    }

    #[test]
    fn failed_job_keeps_preview_open_with_message() {
        let driver = MockDriver {
            completion: MockCompletion::Fail,
            ..MockDriver::new(&["A"])
        };
        let bridge = DriverBridge::new(driver);
        let mut session = PrintSession::new(template(3, 100), config(250.0));
        let (tx, rx) = mpsc::channel();
        let task = session
            .print_all(
                &bridge,
                &JobSettings::default(),
                Box::new(move |completion: JobCompletion| tx.send(completion).unwrap()),
            )
            .unwrap();
        assert!(session.is_busy());

        let notice = session.on_job_completed(rx.recv().unwrap(), true);
        assert_eq!(
            notice,
            Some(PrintNotice::Error {
                task_id: task,
                message_key: JOB_FAILED_MESSAGE_KEY
            })
        );
        assert_eq!(session.job_state(), PrintJobControllerState::Failed);
    }

    #[test]
    fn successful_job_closes_when_requested() {
        let bridge = DriverBridge::new(MockDriver::new(&["A"]));
        let mut session = PrintSession::new(template(3, 100), config(250.0));
        let (tx, rx) = mpsc::channel();
        session
            .print_all(
                &bridge,
                &JobSettings::default(),
                Box::new(move |completion: JobCompletion| tx.send(completion).unwrap()),
            )
            .unwrap();
        let completion = rx.recv().unwrap();
        assert_eq!(
            session.on_job_completed(completion, true),
            Some(PrintNotice::Close)
        );
        assert_eq!(session.on_job_completed(completion, false), None);
        assert_eq!(session.job_state(), PrintJobControllerState::Completed);
        assert!(!session.is_busy());

        let jobs = bridge.driver().drain_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].html.matches("page-break\" style").count(), 1);
    }

    #[test]
    fn late_completion_of_older_job_is_ignored() {
        let driver = MockDriver {
            completion: MockCompletion::Never,
            ..MockDriver::new(&["A"])
        };
        let bridge = DriverBridge::new(driver);
        let mut session = PrintSession::new(template(2, 100), config(250.0));
        let first = session
            .print_all(&bridge, &JobSettings::default(), Box::new(|_: JobCompletion| {}))
            .unwrap();
        let second = session
            .print_all(&bridge, &JobSettings::default(), Box::new(|_: JobCompletion| {}))
            .unwrap();
        assert_ne!(first, second);

        let stale = JobCompletion {
            task_id: first,
            success: false,
        };
        assert_eq!(session.on_job_completed(stale, true), None);
        assert!(session.is_busy());
        assert_eq!(session.job_state(), PrintJobControllerState::Spooling);

        let current = JobCompletion {
            task_id: second,
            success: true,
        };
        assert_eq!(
            session.on_job_completed(current, false),
            Some(PrintNotice::Stay)
        );
        assert!(!session.is_busy());
    }

    #[test]
    fn silent_driver_leaves_job_spooling() {
        let driver = MockDriver {
            completion: MockCompletion::Never,
            ..MockDriver::new(&["A"])
        };
        let bridge = DriverBridge::new(driver);
        let mut session = PrintSession::new(template(1, 10), config(250.0));
        session
            .print_all(&bridge, &JobSettings::default(), Box::new(|_: JobCompletion| {}))
            .unwrap();
        assert!(session.is_busy());
    }

    #[test]
    fn direct_print_matches_preview_print() {
        let bridge = DriverBridge::new(MockDriver::new(&["A"]));
        let mut session = PrintSession::new(template(5, 100), config(250.0));
        session
            .print_all(&bridge, &JobSettings::default(), Box::new(|_: JobCompletion| {}))
            .unwrap();
        direct_print(
            template(5, 100),
            config(250.0),
            &bridge,
            &JobSettings::default(),
            Box::new(|_: JobCompletion| {}),
        )
        .unwrap();
        let jobs = bridge.driver().drain_jobs();
        assert_eq!(jobs[0].html, jobs[1].html);
    }

    #[test]
    fn export_failure_is_reported_not_panicked() {
        let bridge = DriverBridge::new(MockDriver::unavailable());
        let session = PrintSession::new(template(2, 10), config(250.0));
        let now = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let result = session.export(&bridge, &JobSettings::default(), Path::new("out"), now);
        assert!(matches!(
            result,
            Err(PrintJobError::Driver(DriverError::Unavailable))
        ));
    }

    #[test]
    fn stylus_job_feeds_logo_and_rows() {
        let mut template = template(5, 60);
        template.logo = Some(RowRecord::new("<tr>logo</tr>", 40));
        let session = PrintSession::new(
            template,
            PageConfig {
                printer_class: PrinterClass::Stylus,
                ..config(100.0)
            },
        );
        assert_eq!(session.pages().len(), 1);
        assert_eq!(session.content_height_px(), 340.0);
    }
}
