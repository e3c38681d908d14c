//! Assembles the self-contained HTML handed to the preview, the print driver
//! and the file export.
//! 組裝提供預覽、列印驅動與匯出使用的獨立 HTML。

use std::fmt::Write as _;

use thiserror::Error;

use crate::layout::{PackedPage, PageEntry};
use crate::template::{PrintTemplate, PAGE_BREAK_CLASS, PAGE_BREAK_ROW};

/// Which packed pages to serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTarget {
    /// A single page, 0-based.
    One(usize),
    All,
}

/// Errors raised while assembling output documents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializeError {
    #[error("page {index} requested but only {total} page(s) are packed")]
    PageOutOfRange { index: usize, total: usize },
    #[error("packed page refers to row {0}, which the template does not have")]
    RowOutOfRange(usize),
}

/// Serializes one or all packed pages into a single table document.
pub fn serialize(
    template: &PrintTemplate,
    pages: &[PackedPage],
    target: OutputTarget,
) -> Result<String, SerializeError> {
    let selected: &[PackedPage] = match target {
        OutputTarget::All => pages,
        OutputTarget::One(index) => {
            let total = pages.len();
            let page = pages
                .get(index)
                .ok_or(SerializeError::PageOutOfRange { index, total })?;
            std::slice::from_ref(page)
        }
    };

    let mut body = String::new();
    for page in selected {
        for entry in &page.entries {
            push_entry(&mut body, template, *entry)?;
        }
    }
    Ok(wrap_document(template, &body))
}

/// Serializes the template rows in their original order, ignoring
/// pagination. Used by file export.
pub fn serialize_flat(template: &PrintTemplate) -> String {
    let mut body = String::new();
    body.push_str(&template.column_grid);
    if let Some(logo) = &template.logo {
        body.push_str(&logo.markup);
    }
    for row in template.rows.iter().filter(|row| !row.is_page_break) {
        body.push_str(&row.markup);
    }
    wrap_document(template, &body)
}

fn push_entry(
    body: &mut String,
    template: &PrintTemplate,
    entry: PageEntry,
) -> Result<(), SerializeError> {
    match entry {
        PageEntry::ColumnGrid => body.push_str(&template.column_grid),
        PageEntry::Logo => {
            if let Some(logo) = &template.logo {
                body.push_str(&logo.markup);
            }
        }
        PageEntry::Row(index) => {
            let row = template
                .rows
                .get(index)
                .ok_or(SerializeError::RowOutOfRange(index))?;
            body.push_str(&row.markup);
        }
        PageEntry::PageBreak => body.push_str(PAGE_BREAK_ROW),
    }
    Ok(())
}

fn wrap_document(template: &PrintTemplate, body: &str) -> String {
    let mut output = String::with_capacity(body.len() + template.style_block.len() + 160);
    output.push_str("<style>");
    if !template.style_block.is_empty() {
        output.push_str(&template.style_block);
        output.push('\n');
    }
    let _ = write!(
        output,
        "tr.{PAGE_BREAK_CLASS}{{page-break-after:always;break-after:page}}</style>"
    );
    let _ = write!(
        output,
        r#"<table class="{}">{}</table>"#,
        escape_attribute(&template.table_class),
        body
    );
    output
}

fn escape_attribute(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '"' => output.push_str("&quot;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            _ => output.push(ch),
        }
    }
    output
}
