//! Print pagination and output engine: measures a rendered business template,
//! packs its rows into physical pages, previews them and hands the serialized
//! document to a print driver or a file export.

pub mod controller;
pub mod job;
pub mod layout;
pub mod platform;
pub mod preview;
pub mod serialize;
pub mod template;
pub mod units;

pub use controller::{
    direct_print, PrintJobControllerState, PrintJobError, PrintNotice, PrintSession,
    JOB_FAILED_MESSAGE_KEY,
};
pub use job::{
    DuplexMode, JobSettings, Margin, Orientation, PageConfig, PaperId, PaperSize, PrinterClass,
    PrinterItem, TaskId,
};
pub use layout::{
    GreedyPaginator, LayoutSummary, PackedPage, PageEntry, PaginationResult, Paginator,
};
pub use platform::{
    CompletionCallback, DriverBridge, DriverError, JobCompletion, NativeJob, NativeMargins,
    NativeOrientation, NativePageSize, PrintDriver,
};
pub use preview::{MemorySurface, PreviewGeometry, PreviewState, PreviewSurface};
pub use serialize::{serialize, serialize_flat, OutputTarget, SerializeError};
pub use template::{measure, pin_heights, PrintTemplate, RenderedElement, RowRecord, TemplateError};
