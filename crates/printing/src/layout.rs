use crate::job::{PageConfig, PrinterClass};
use crate::template::PrintTemplate;
use crate::units;

/// One slot of a packed page.
/// 已分頁頁面中的單一項目。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEntry {
    /// Zero-height row pinning the column widths.
    ColumnGrid,
    /// Header/logo block of the template.
    Logo,
    /// Content row, by index into [`PrintTemplate::rows`].
    Row(usize),
    /// Forces the printer onto a new sheet.
    PageBreak,
}

/// Rows assigned to one physical page.
/// 分配到單一實體頁面的列。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedPage {
    pub entries: Vec<PageEntry>,
}

impl PackedPage {
    /// Indices of the content rows on this page, in order.
    pub fn row_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            PageEntry::Row(index) => Some(*index),
            _ => None,
        })
    }

    pub fn has_logo(&self) -> bool {
        self.entries.contains(&PageEntry::Logo)
    }

    pub fn ends_with_break(&self) -> bool {
        self.entries.last() == Some(&PageEntry::PageBreak)
    }
}

/// Summary produced after pagination.
/// 分頁完成後的摘要資訊。
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutSummary {
    pub total_pages: u32,
    pub total_rows: usize,
    pub usable_height_px: f32,
}

/// Result from running the paginator.
/// 分頁器執行後的整體結果。
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationResult {
    pub pages: Vec<PackedPage>,
    pub summary: LayoutSummary,
}

/// Contract implemented by the pagination engine.
/// 分頁引擎需實作的介面契約。
pub trait Paginator {
    fn paginate(&self, template: &PrintTemplate, config: &PageConfig) -> PaginationResult;
}

/// Usable content height of one page, in whole unscaled template pixels.
///
/// With a fixed logo the logo is reserved on every page; otherwise only the
/// first page pays for it (see [`GreedyPaginator`]).
pub fn usable_height_px(template: &PrintTemplate, config: &PageConfig) -> f32 {
    let printable =
        (units::mm_to_px(config.printable_height_mm()) / config.effective_scale()).round();
    if config.fixed_logo {
        (printable - template.logo_height() as f32).max(0.0)
    } else {
        printable
    }
}

/// Greedy, order-preserving paginator. Rows are never split: a row taller
/// than a page is placed alone on its own page.
/// 貪婪且保持順序的分頁器；單列不會被拆開。
#[derive(Debug, Default)]
pub struct GreedyPaginator;

impl Paginator for GreedyPaginator {
    fn paginate(&self, template: &PrintTemplate, config: &PageConfig) -> PaginationResult {
        let usable = usable_height_px(template, config);
        let pages = match config.printer_class {
            PrinterClass::Stylus => vec![continuous_page(template)],
            PrinterClass::Laser => pack_sheets(template, config, usable),
        };

        PaginationResult {
            summary: LayoutSummary {
                total_pages: pages.len() as u32,
                total_rows: template.rows.len(),
                usable_height_px: usable,
            },
            pages,
        }
    }
}

/// Continuous-feed output: one unbounded page holding everything.
fn continuous_page(template: &PrintTemplate) -> PackedPage {
    let mut entries = Vec::with_capacity(template.rows.len() + 2);
    entries.push(PageEntry::ColumnGrid);
    if template.logo.is_some() {
        entries.push(PageEntry::Logo);
    }
    entries.extend(
        template
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !row.is_page_break)
            .map(|(index, _)| PageEntry::Row(index)),
    );
    PackedPage { entries }
}

fn pack_sheets(template: &PrintTemplate, config: &PageConfig, usable: f32) -> Vec<PackedPage> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut buffer: Vec<usize> = Vec::new();
    // Without a fixed logo the first page carries the logo inside its budget.
    let mut running = if config.fixed_logo {
        0.0
    } else {
        template.logo_height() as f32
    };

    for (index, row) in template.rows.iter().enumerate() {
        if row.is_page_break {
            if !buffer.is_empty() {
                groups.push(std::mem::take(&mut buffer));
                running = 0.0;
            }
            continue;
        }

        let height = row.height_px as f32;
        if running + height > usable && !buffer.is_empty() {
            groups.push(std::mem::take(&mut buffer));
            running = 0.0;
        }
        running += height;
        buffer.push(index);
    }
    if !buffer.is_empty() {
        groups.push(buffer);
    }

    let has_logo = template.logo.is_some();
    let last = groups.len().saturating_sub(1);
    groups
        .into_iter()
        .enumerate()
        .map(|(page, rows)| {
            let mut entries = Vec::with_capacity(rows.len() + 3);
            entries.push(PageEntry::ColumnGrid);
            if has_logo && (config.fixed_logo || page == 0) {
                entries.push(PageEntry::Logo);
            }
            entries.extend(rows.into_iter().map(PageEntry::Row));
            if page != last {
                entries.push(PageEntry::PageBreak);
            }
            PackedPage { entries }
        })
        .collect()
}
