mod spool;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pagepress_printing::{
    DriverBridge, DuplexMode, JobCompletion, Margin, MemorySurface, Orientation, PaperSize,
    PrintNotice, PrintSession, PrinterClass, RenderedElement, RowRecord,
};
use pagepress_settings::{
    NoRemote, PrintSettings, PrintSettingsStore, RemoteSettings, SaveOutcome, SettingsError,
    SharedDirectoryRemote, DEFAULT_SETTINGS_KEY,
};
use serde_json::json;

use crate::spool::SpoolDriver;

#[derive(Parser)]
#[command(
    name = "pagepress-cli",
    about = "Paginate, preview, print and export business templates",
    author,
    version
)]
struct Cli {
    /// 指定工作區根目錄；預設為目前目錄。 / Workspace root (defaults to current directory).
    #[arg(long, global = true, value_name = "PATH")]
    workspace: Option<PathBuf>,

    /// 共用設定資料夾；提供時會覆寫本機快取。 / Shared settings directory; overrides the local cache when present.
    #[arg(long, global = true, value_name = "PATH")]
    remote_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 計算分頁結果並輸出 JSON 摘要。 / Pack a rendered template and print a JSON page summary.
    Paginate(PaginateArgs),
    /// 輸出單一頁面的預覽 HTML。 / Write the preview HTML of one page.
    Preview(PreviewArgs),
    /// 將所有頁面送至列印佇列。 / Send every page to the spool printer.
    Print(PrintArgs),
    /// 匯出未分頁的表格檔案。 / Export the unpaginated table to a timestamped file.
    Export(ExportArgs),
    /// 列出可用的印表機。 / List the printers offered to the user.
    Printers,
    /// 檢視或修改列印設定。 / Show or change the stored print settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Args)]
struct TemplateArgs {
    /// 已排版模板的 JSON 快照。 / JSON snapshot of the rendered template table.
    snapshot: PathBuf,

    /// 使用的設定鍵。 / Settings key holding the print options for this template.
    #[arg(long, value_name = "KEY", default_value = DEFAULT_SETTINGS_KEY)]
    settings_key: String,

    /// 標誌列的 HTML。 / Markup of the logo row.
    #[arg(long, value_name = "HTML")]
    logo: Option<String>,

    /// 標誌列的高度（像素）。 / Height of the logo row in pixels.
    #[arg(long, value_name = "PX", default_value_t = 0, requires = "logo")]
    logo_height: u32,

    /// 附加到輸出文件的 CSS 檔案。 / CSS file injected into every output document.
    #[arg(long, value_name = "FILE")]
    style: Option<PathBuf>,

    #[command(flatten)]
    layout: LayoutOverrides,
}

/// Per-invocation layout overrides on top of the stored settings.
#[derive(Args)]
struct LayoutOverrides {
    /// 紙張大小。 / Paper size.
    #[arg(long)]
    paper: Option<PaperChoice>,

    /// 紙張方向。 / Page orientation.
    #[arg(long)]
    orientation: Option<OrientationChoice>,

    /// 印表機類型。 / Printer class (cut-sheet laser or continuous-feed stylus).
    #[arg(long)]
    printer_class: Option<PrinterClassChoice>,

    /// 四邊統一邊界（公釐）。 / Uniform page margin in millimetres.
    #[arg(long, value_name = "MM", allow_negative_numbers = true)]
    margin: Option<f32>,

    /// 列印縮放比例。 / Print scale factor.
    #[arg(long, allow_negative_numbers = true)]
    scale: Option<f32>,

    /// 每頁是否保留標誌。 / Whether the logo repeats on every page.
    #[arg(long, value_name = "true|false")]
    fixed_logo: Option<bool>,
}

impl LayoutOverrides {
    fn apply(&self, settings: &mut PrintSettings) {
        if let Some(paper) = self.paper {
            settings.paper = paper.into();
        }
        if let Some(orientation) = self.orientation {
            settings.orientation = orientation.into();
        }
        if let Some(class) = self.printer_class {
            settings.printer_class = class.into();
        }
        if let Some(margin) = self.margin {
            settings.margins_mm = Margin::uniform(margin);
        }
        if let Some(scale) = self.scale {
            settings.scale = scale;
        }
        if let Some(fixed_logo) = self.fixed_logo {
            settings.fixed_logo = fixed_logo;
        }
        settings.sanitize();
    }
}

#[derive(Args)]
struct PaginateArgs {
    #[command(flatten)]
    template: TemplateArgs,
}

#[derive(Args)]
struct PreviewArgs {
    #[command(flatten)]
    template: TemplateArgs,

    /// 預覽頁碼（從 1 起算，超出範圍時夾限）。 / Page to preview, 1-based and clamped to the packed range.
    #[arg(long, default_value_t = 1)]
    page: usize,

    /// 預覽區寬度（像素）。 / Preview viewport width in pixels.
    #[arg(long, value_name = "PX")]
    viewport: Option<f32>,

    /// 輸出檔案；省略時寫到標準輸出。 / Output file; stdout when omitted.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct PrintArgs {
    #[command(flatten)]
    template: TemplateArgs,

    /// 印表機索引；-1 為預設印表機。 / Printer index; -1 selects the default printer.
    #[arg(long, allow_negative_numbers = true)]
    printer: Option<i32>,

    /// 列印份數。 / Number of copies.
    #[arg(long)]
    copies: Option<u32>,

    /// 列印作業名稱。 / Job name shown by the spooler.
    #[arg(long, default_value = "document")]
    job_name: String,
}

#[derive(Args)]
struct ExportArgs {
    #[command(flatten)]
    template: TemplateArgs,

    /// 匯出資料夾；預設為工作區的 exports。 / Destination directory (defaults to `<workspace>/exports`).
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// 顯示目前的列印設定。 / Print the stored settings as JSON.
    Show(SettingsShowArgs),
    /// 修改並保存列印設定。 / Change and save the stored settings.
    Set(SettingsSetArgs),
}

#[derive(Args)]
struct SettingsShowArgs {
    #[arg(long, value_name = "KEY", default_value = DEFAULT_SETTINGS_KEY)]
    key: String,
}

#[derive(Args)]
struct SettingsSetArgs {
    #[arg(long, value_name = "KEY", default_value = DEFAULT_SETTINGS_KEY)]
    key: String,

    #[command(flatten)]
    layout: LayoutOverrides,

    /// 列印份數。 / Number of copies.
    #[arg(long)]
    copies: Option<u32>,

    /// 印表機索引。 / Printer index; -1 selects the default printer.
    #[arg(long, allow_negative_numbers = true)]
    printer: Option<i32>,

    /// 雙面列印模式。 / Duplex mode.
    #[arg(long)]
    duplex: Option<DuplexChoice>,

    /// 列印完成後關閉預覽。 / Close the preview once the job has printed.
    #[arg(long, value_name = "true|false")]
    close_on_printed: Option<bool>,

    /// 匯出檔名前綴。 / Prefix of exported file names.
    #[arg(long)]
    file_prefix: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PaperChoice {
    A3,
    A4,
    A5,
    Letter,
    Legal,
    #[value(name = "continuous", alias = "continuous-form")]
    Continuous,
}

impl From<PaperChoice> for PaperSize {
    fn from(choice: PaperChoice) -> Self {
        match choice {
            PaperChoice::A3 => PaperSize::A3,
            PaperChoice::A4 => PaperSize::A4,
            PaperChoice::A5 => PaperSize::A5,
            PaperChoice::Letter => PaperSize::LETTER,
            PaperChoice::Legal => PaperSize::LEGAL,
            PaperChoice::Continuous => PaperSize::CONTINUOUS_FORM,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OrientationChoice {
    Portrait,
    Landscape,
}

impl From<OrientationChoice> for Orientation {
    fn from(choice: OrientationChoice) -> Self {
        match choice {
            OrientationChoice::Portrait => Orientation::Portrait,
            OrientationChoice::Landscape => Orientation::Landscape,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PrinterClassChoice {
    Laser,
    #[value(alias = "dot-matrix")]
    Stylus,
}

impl From<PrinterClassChoice> for PrinterClass {
    fn from(choice: PrinterClassChoice) -> Self {
        match choice {
            PrinterClassChoice::Laser => PrinterClass::Laser,
            PrinterClassChoice::Stylus => PrinterClass::Stylus,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DuplexChoice {
    Off,
    Automatic,
    #[value(name = "manual-flip", alias = "manual")]
    ManualFlip,
}

impl From<DuplexChoice> for DuplexMode {
    fn from(choice: DuplexChoice) -> Self {
        match choice {
            DuplexChoice::Off => DuplexMode::Off,
            DuplexChoice::Automatic => DuplexMode::Automatic,
            DuplexChoice::ManualFlip => DuplexMode::ManualFlip,
        }
    }
}

/// Remote settings source picked from the command line.
enum RemoteChoice {
    Local(NoRemote),
    Shared(SharedDirectoryRemote),
}

impl RemoteSettings for RemoteChoice {
    fn fetch(&self, key: &str) -> Result<Option<String>, SettingsError> {
        match self {
            RemoteChoice::Local(remote) => remote.fetch(key),
            RemoteChoice::Shared(remote) => remote.fetch(key),
        }
    }

    fn save(&self, key: &str, blob: &str) -> Result<(), SettingsError> {
        match self {
            RemoteChoice::Local(remote) => remote.save(key, blob),
            RemoteChoice::Shared(remote) => remote.save(key, blob),
        }
    }
}

struct Workspace {
    workspace_root: PathBuf,
    remote_dir: Option<PathBuf>,
}

impl Workspace {
    fn state_dir(&self) -> PathBuf {
        self.workspace_root.join(".pagepress")
    }

    fn settings_store(&self, key: &str) -> PrintSettingsStore<RemoteChoice> {
        let remote = match &self.remote_dir {
            Some(dir) => RemoteChoice::Shared(SharedDirectoryRemote::new(dir.clone())),
            None => RemoteChoice::Local(NoRemote),
        };
        PrintSettingsStore::load(self.state_dir().join("settings"), key, remote)
    }

    fn bridge(&self) -> DriverBridge<SpoolDriver> {
        DriverBridge::new(SpoolDriver::new(self.state_dir()))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let Cli {
        workspace,
        remote_dir,
        command,
    } = Cli::parse();
    let ctx = Workspace {
        workspace_root: resolve_workspace(workspace)?,
        remote_dir: remote_dir.map(|dir| resolve_path(&dir)).transpose()?,
    };
    match command {
        Commands::Paginate(args) => execute_paginate(args, &ctx),
        Commands::Preview(args) => execute_preview(args, &ctx),
        Commands::Print(args) => execute_print(args, &ctx),
        Commands::Export(args) => execute_export(args, &ctx),
        Commands::Printers => list_printers(&ctx),
        Commands::Settings(SettingsCommand::Show(args)) => show_settings(args, &ctx),
        Commands::Settings(SettingsCommand::Set(args)) => set_settings(args, &ctx),
    }
}

/// Loads the stored settings for the template, applies the overrides and packs
/// the snapshot.
fn open_session(args: &TemplateArgs, ctx: &Workspace) -> Result<(PrintSession, PrintSettings)> {
    let mut settings = ctx.settings_store(&args.settings_key).settings().clone();
    args.layout.apply(&mut settings);

    let snapshot = resolve_path(&args.snapshot)?;
    let contents = fs::read_to_string(&snapshot)
        .with_context(|| format!("failed to read snapshot {}", snapshot.display()))?;
    let root: RenderedElement = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse snapshot {}", snapshot.display()))?;
    let mut session = PrintSession::from_rendered(&root, settings.to_page_config())
        .with_context(|| format!("snapshot {} is not a printable table", snapshot.display()))?;

    if args.logo.is_some() || args.style.is_some() {
        let mut template = session.template().clone();
        if let Some(logo) = &args.logo {
            template = template.with_logo(RowRecord::new(logo.clone(), args.logo_height));
        }
        if let Some(style) = &args.style {
            let style_path = resolve_path(style)?;
            let css = fs::read_to_string(&style_path)
                .with_context(|| format!("failed to read style {}", style_path.display()))?;
            template = template.with_style(css);
        }
        session.set_template(template);
    }
    Ok((session, settings))
}

fn execute_paginate(args: PaginateArgs, ctx: &Workspace) -> Result<()> {
    let (session, _) = open_session(&args.template, ctx)?;
    let template = session.template();
    let pages: Vec<_> = session
        .pages()
        .iter()
        .enumerate()
        .map(|(index, page)| {
            let rows: Vec<usize> = page.row_indices().collect();
            let heights: Vec<u32> = rows
                .iter()
                .filter_map(|&row| template.rows.get(row).map(|record| record.height_px))
                .collect();
            let logo_height = if page.has_logo() {
                template.logo_height()
            } else {
                0
            };
            json!({
                "page": index + 1,
                "rows": rows,
                "heights": heights,
                "logo": page.has_logo(),
                "height_px": heights.iter().map(|&h| u64::from(h)).sum::<u64>() + u64::from(logo_height),
            })
        })
        .collect();
    let summary = session.summary();
    let report = json!({
        "total_pages": summary.total_pages,
        "total_rows": summary.total_rows,
        "usable_height_px": summary.usable_height_px,
        "pages": pages,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn execute_preview(args: PreviewArgs, ctx: &Workspace) -> Result<()> {
    let (mut session, _) = open_session(&args.template, ctx)?;
    let selected = session.select_page(args.page);
    let mut surface = MemorySurface::default();
    if !session.render_current(&mut surface, args.viewport)? {
        bail!("template has no rows to preview");
    }
    let geometry = surface
        .geometry
        .context("preview surface received no geometry")?;
    let html = format!(r#"<div class="page" style="{}">{}</div>"#, geometry.css(), surface.content);

    match args.output {
        Some(output) => {
            let output = resolve_path(&output)?;
            write_output(&output, &html)?;
            println!(
                "Wrote page {selected}/{} to {}",
                session.preview().total_pages,
                output.display()
            );
        }
        None => println!("{html}"),
    }
    Ok(())
}

fn execute_print(args: PrintArgs, ctx: &Workspace) -> Result<()> {
    let (mut session, settings) = open_session(&args.template, ctx)?;
    let mut job = settings.to_job_settings(args.job_name.clone());
    if let Some(printer) = args.printer {
        job.printer_index = printer;
    }
    if let Some(copies) = args.copies {
        job.copies = copies;
    }

    let bridge = ctx.bridge();
    let (tx, rx) = mpsc::channel();
    let task_id = session.print_all(
        &bridge,
        &job,
        Box::new(move |completion: JobCompletion| {
            let _ = tx.send(completion);
        }),
    )?;

    let Ok(completion) = rx.try_recv() else {
        println!("Spooled {task_id}; waiting for the printer to report back");
        return Ok(());
    };
    match session.on_job_completed(completion, settings.close_on_printed) {
        None => {
            println!("Spooled {task_id}; waiting for the printer to report back");
            Ok(())
        }
        Some(PrintNotice::Close | PrintNotice::Stay) => {
            println!(
                "Printed {task_id}: {} page(s) x {} copies",
                session.summary().total_pages,
                job.copies.max(1)
            );
            Ok(())
        }
        Some(PrintNotice::Error {
            task_id,
            message_key,
        }) => bail!("print job {task_id} failed ({message_key})"),
    }
}

fn execute_export(args: ExportArgs, ctx: &Workspace) -> Result<()> {
    let (session, settings) = open_session(&args.template, ctx)?;
    let dir = match &args.output_dir {
        Some(dir) => resolve_path(dir)?,
        None => ctx.workspace_root.join("exports"),
    };
    let job = settings.to_job_settings("export");
    let now = chrono::Local::now().naive_local();
    let path = session.export(&ctx.bridge(), &job, &dir, now)?;
    println!("Exported {}", path.display());
    Ok(())
}

fn list_printers(ctx: &Workspace) -> Result<()> {
    for item in ctx.bridge().printer_items() {
        println!("{}\t{}", item.value, item.text);
    }
    Ok(())
}

fn show_settings(args: SettingsShowArgs, ctx: &Workspace) -> Result<()> {
    let store = ctx.settings_store(&args.key);
    println!("{}", serde_json::to_string_pretty(store.settings())?);
    Ok(())
}

fn set_settings(args: SettingsSetArgs, ctx: &Workspace) -> Result<()> {
    let mut store = ctx.settings_store(&args.key);
    let outcome = store.update(|settings| {
        args.layout.apply(settings);
        if let Some(copies) = args.copies {
            settings.copies = copies;
        }
        if let Some(printer) = args.printer {
            settings.printer_index = printer;
        }
        if let Some(duplex) = args.duplex {
            settings.duplex = duplex.into();
        }
        if let Some(close) = args.close_on_printed {
            settings.close_on_printed = close;
        }
        if let Some(prefix) = &args.file_prefix {
            settings.file_prefix = prefix.clone();
        }
    });
    report_save(store.key(), outcome, ctx.remote_dir.is_some())
}

fn report_save(key: &str, outcome: SaveOutcome, has_remote: bool) -> Result<()> {
    if !outcome.local && !(has_remote && outcome.remote) {
        bail!("print settings '{key}' could not be saved");
    }
    if has_remote && !outcome.remote {
        println!("Saved print settings '{key}' locally; shared copy not updated");
    } else {
        println!("Saved print settings '{key}'");
    }
    Ok(())
}

fn write_output(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn resolve_workspace(workspace: Option<PathBuf>) -> Result<PathBuf> {
    match workspace {
        Some(path) => resolve_path(&path),
        None => std::env::current_dir().context("determine current directory"),
    }
}

fn resolve_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("determine current directory")?
            .join(path))
    }
}
