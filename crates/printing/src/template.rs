use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot of a mounted (hidden) template element after the renderer has
/// flushed layout.
/// 模板掛載並完成排版後的元素快照。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RenderedElement {
    pub tag: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub height_px: f32,
    #[serde(default)]
    pub width_px: f32,
    /// Serialized outer markup of the element.
    #[serde(default)]
    pub markup: String,
    #[serde(default)]
    pub children: Vec<RenderedElement>,
}

impl RenderedElement {
    fn is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    fn has_class(&self, class: &str) -> bool {
        self.class.split_whitespace().any(|name| name == class)
    }
}

/// One measured row of the business template.
/// 模板中量測完成的一列。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRecord {
    pub markup: String,
    pub height_px: u32,
    #[serde(default)]
    pub is_page_break: bool,
}

impl RowRecord {
    pub fn new(markup: impl Into<String>, height_px: u32) -> Self {
        Self {
            markup: markup.into(),
            height_px,
            is_page_break: false,
        }
    }

    pub fn page_break() -> Self {
        Self {
            markup: PAGE_BREAK_ROW.to_string(),
            height_px: 0,
            is_page_break: true,
        }
    }
}

/// Class carried by forced page-break rows in the template and in the output.
pub const PAGE_BREAK_CLASS: &str = "page-break";
pub const PAGE_BREAK_ROW: &str = r#"<tr class="page-break" style="height:0"></tr>"#;
pub const COLUMN_GRID_CLASS: &str = "column-grid";

/// Measured template plus the caller-supplied decorations used by the packer
/// and the serializer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrintTemplate {
    /// CSS class of the original template table.
    pub table_class: String,
    /// Raw CSS injected into every output document.
    pub style_block: String,
    /// Zero-height row pinning the column widths of every page table.
    pub column_grid: String,
    pub logo: Option<RowRecord>,
    pub rows: Vec<RowRecord>,
}

impl PrintTemplate {
    pub fn with_logo(mut self, logo: RowRecord) -> Self {
        self.logo = Some(logo);
        self
    }

    pub fn with_style(mut self, style_block: impl Into<String>) -> Self {
        self.style_block = style_block.into();
        self
    }

    pub fn logo_height(&self) -> u32 {
        self.logo.as_ref().map_or(0, |logo| logo.height_px)
    }

    /// Sum of all content row heights.
    pub fn content_height(&self) -> u64 {
        self.rows.iter().map(|row| u64::from(row.height_px)).sum()
    }
}

/// Errors raised while measuring a rendered template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template root must render as a table, found <{0}>")]
    NotATable(String),
    #[error("unexpected <{0}> inside the template table; only rows are allowed")]
    UnexpectedChild(String),
}

/// Extracts the ordered row records of a rendered table without mutating it.
pub fn measure(root: &RenderedElement) -> Result<PrintTemplate, TemplateError> {
    if !root.is("table") {
        return Err(TemplateError::NotATable(root.tag.clone()));
    }

    let row_elements = collect_rows(root)?;
    let rows = row_elements
        .iter()
        .map(|element| measure_row(element))
        .collect();

    Ok(PrintTemplate {
        table_class: root.class.clone(),
        style_block: String::new(),
        column_grid: column_grid_markup(&row_elements),
        logo: None,
        rows,
    })
}

/// Applies frozen heights back onto the rendered tree. Calling it twice with
/// the same rows leaves the tree unchanged.
pub fn pin_heights(root: &mut RenderedElement, rows: &[RowRecord]) {
    let mut records = rows.iter();
    for element in row_elements_mut(root) {
        let Some(record) = records.next() else {
            break;
        };
        element.style = with_height_style(&element.style, record.height_px);
        element.height_px = record.height_px as f32;
        element.markup = record.markup.clone();
    }
}

/// Rewrites the opening tag of `markup` so its inline style pins `height`.
pub fn freeze_height(markup: &str, height_px: u32) -> String {
    let trimmed = markup.trim_start();
    if !trimmed.starts_with('<') {
        return format!(r#"<tr style="height:{height_px}px">{markup}</tr>"#);
    }
    let Some(tag_end) = opening_tag_end(trimmed) else {
        return markup.to_string();
    };
    let open_tag = &trimmed[..tag_end];
    let rest = &trimmed[tag_end..];

    match find_style_value(open_tag) {
        Some((start, end)) => {
            let style = with_height_style(&open_tag[start..end], height_px);
            format!("{}{}{}{}", &open_tag[..start], style, &open_tag[end..], rest)
        }
        None => {
            let insert_at = if open_tag.ends_with('/') {
                open_tag.len() - 1
            } else {
                open_tag.len()
            };
            format!(
                r#"{} style="height:{height_px}px"{}{}"#,
                open_tag[..insert_at].trim_end(),
                &open_tag[insert_at..],
                rest
            )
        }
    }
}

fn measure_row(element: &RenderedElement) -> RowRecord {
    if element.has_class(PAGE_BREAK_CLASS) {
        return RowRecord::page_break();
    }
    let height_px = element.height_px.max(0.0).round() as u32;
    let markup = if element.markup.is_empty() {
        "<tr></tr>".to_string()
    } else {
        element.markup.clone()
    };
    RowRecord::new(freeze_height(&markup, height_px), height_px)
}

fn is_section(element: &RenderedElement) -> bool {
    element.is("tbody") || element.is("thead") || element.is("tfoot")
}

fn is_ignored(element: &RenderedElement) -> bool {
    element.is("colgroup") || element.is("caption")
}

fn collect_rows(root: &RenderedElement) -> Result<Vec<&RenderedElement>, TemplateError> {
    let mut rows = Vec::new();
    for child in &root.children {
        if child.is("tr") {
            rows.push(child);
        } else if is_section(child) {
            for row in &child.children {
                if !row.is("tr") {
                    return Err(TemplateError::UnexpectedChild(row.tag.clone()));
                }
                rows.push(row);
            }
        } else if !is_ignored(child) {
            return Err(TemplateError::UnexpectedChild(child.tag.clone()));
        }
    }
    Ok(rows)
}

fn row_elements_mut(root: &mut RenderedElement) -> Vec<&mut RenderedElement> {
    let mut rows = Vec::new();
    for child in root.children.iter_mut() {
        if child.is("tr") {
            rows.push(child);
        } else if is_section(child) {
            rows.extend(child.children.iter_mut().filter(|row| row.is("tr")));
        }
    }
    rows
}

fn column_grid_markup(rows: &[&RenderedElement]) -> String {
    let widest = rows
        .iter()
        .filter(|row| !row.has_class(PAGE_BREAK_CLASS))
        .max_by_key(|row| row.children.len());

    let mut markup = format!(r#"<tr class="{COLUMN_GRID_CLASS}" style="height:0">"#);
    if let Some(row) = widest {
        for cell in &row.children {
            let width = cell.width_px.max(0.0).round() as u32;
            markup.push_str(&format!(
                r#"<td style="width:{width}px;height:0;padding:0;border:0"></td>"#
            ));
        }
    }
    markup.push_str("</tr>");
    markup
}

fn with_height_style(style: &str, height_px: u32) -> String {
    let mut declarations = vec![format!("height:{height_px}px")];
    declarations.extend(
        style
            .split(';')
            .map(str::trim)
            .filter(|decl| !decl.is_empty())
            .filter(|decl| {
                let property = decl.split(':').next().unwrap_or_default().trim();
                !property.eq_ignore_ascii_case("height")
            })
            .map(str::to_string),
    );
    declarations.join(";")
}

/// Byte index of the `>` closing the first tag, honouring quoted attribute values.
fn opening_tag_end(markup: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, ch) in markup.char_indices() {
        match (quote, ch) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(ch),
            (None, '>') => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Byte range of the `style` attribute value inside an opening tag.
fn find_style_value(open_tag: &str) -> Option<(usize, usize)> {
    let lower = open_tag.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(found) = lower[search_from..].find("style") {
        let start = search_from + found;
        search_from = start + "style".len();
        let preceded_by_space = lower[..start]
            .chars()
            .last()
            .is_some_and(char::is_whitespace);
        if !preceded_by_space {
            continue;
        }
        let after = lower[search_from..].trim_start();
        let Some(after_eq) = after.strip_prefix('=') else {
            continue;
        };
        let value = after_eq.trim_start();
        let value_offset = open_tag.len() - value.len();
        let quote = value.chars().next()?;
        if quote == '"' || quote == '\'' {
            let body_start = value_offset + 1;
            let body_end = body_start + open_tag[body_start..].find(quote)?;
            return Some((body_start, body_end));
        }
        let body_end = value
            .find(|c: char| c.is_whitespace() || c == '/')
            .map_or(open_tag.len(), |end| value_offset + end);
        return Some((value_offset, body_end));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(width: f32) -> RenderedElement {
        RenderedElement {
            tag: "td".into(),
            width_px: width,
            ..RenderedElement::default()
        }
    }

    fn row(markup: &str, height: f32, cells: usize) -> RenderedElement {
        RenderedElement {
            tag: "tr".into(),
            height_px: height,
            markup: markup.into(),
            children: (0..cells).map(|idx| cell(50.0 + idx as f32)).collect(),
            ..RenderedElement::default()
        }
    }

    fn table(children: Vec<RenderedElement>) -> RenderedElement {
        RenderedElement {
            tag: "TABLE".into(),
            class: "invoice".into(),
            children,
            ..RenderedElement::default()
        }
    }

    #[test]
    fn measures_rows_in_order_and_freezes_heights() {
        let root = table(vec![
            row("<tr><td>a</td></tr>", 20.4, 1),
            row(r#"<tr style="color:red;height:3px"><td>b</td></tr>"#, 31.6, 1),
        ]);
        let template = measure(&root).unwrap();
        assert_eq!(template.table_class, "invoice");
        assert_eq!(template.rows.len(), 2);
        assert_eq!(template.rows[0].height_px, 20);
        assert_eq!(template.rows[0].markup, r#"<tr style="height:20px"><td>a</td></tr>"#);
        assert_eq!(template.rows[1].height_px, 32);
        assert_eq!(
            template.rows[1].markup,
            r#"<tr style="height:32px;color:red"><td>b</td></tr>"#
        );
    }

    #[test]
    fn rows_inside_sections_are_flattened() {
        let root = table(vec![
            RenderedElement {
                tag: "colgroup".into(),
                ..RenderedElement::default()
            },
            RenderedElement {
                tag: "thead".into(),
                children: vec![row("<tr><th>h</th></tr>", 10.0, 3)],
                ..RenderedElement::default()
            },
            RenderedElement {
                tag: "tbody".into(),
                children: vec![row("<tr><td>1</td></tr>", 12.0, 2)],
                ..RenderedElement::default()
            },
        ]);
        let template = measure(&root).unwrap();
        assert_eq!(template.rows.len(), 2);
        assert_eq!(template.column_grid.matches("<td").count(), 3);
        assert!(template.column_grid.contains("width:52px"));
    }

    #[test]
    fn non_table_root_is_rejected() {
        let root = RenderedElement {
            tag: "div".into(),
            ..RenderedElement::default()
        };
        assert_eq!(
            measure(&root),
            Err(TemplateError::NotATable("div".into()))
        );
    }

    #[test]
    fn stray_block_inside_table_is_rejected() {
        let root = table(vec![RenderedElement {
            tag: "div".into(),
            ..RenderedElement::default()
        }]);
        assert_eq!(
            measure(&root),
            Err(TemplateError::UnexpectedChild("div".into()))
        );
    }

    #[test]
    fn page_break_rows_are_flagged() {
        let mut marker = row("<tr></tr>", 5.0, 0);
        marker.class = "page-break".into();
        let template = measure(&table(vec![row("<tr></tr>", 5.0, 1), marker])).unwrap();
        assert!(!template.rows[0].is_page_break);
        assert!(template.rows[1].is_page_break);
        assert_eq!(template.rows[1].height_px, 0);
    }

    #[test]
    fn pin_heights_is_idempotent() {
        let mut root = table(vec![row("<tr><td>a</td></tr>", 19.7, 1)]);
        let template = measure(&root).unwrap();
        pin_heights(&mut root, &template.rows);
        let once = root.clone();
        pin_heights(&mut root, &template.rows);
        assert_eq!(root, once);
        assert_eq!(root.children[0].style, "height:20px");
        assert_eq!(root.children[0].height_px, 20.0);
    }

    #[test]
    fn freeze_height_handles_quotes_and_self_closing() {
        assert_eq!(
            freeze_height(r#"<tr data-x="a>b" style='width:1px'>x</tr>"#, 7),
            r#"<tr data-x="a>b" style='height:7px;width:1px'>x</tr>"#
        );
        assert_eq!(freeze_height("<tr/>", 4), r#"<tr style="height:4px"/>"#);
        assert_eq!(
            freeze_height("plain", 4),
            r#"<tr style="height:4px">plain</tr>"#
        );
    }

    #[test]
    fn snapshot_deserializes_from_json() {
        let json = r#"{
            "tag": "table",
            "class": "bill",
            "children": [
                { "tag": "tr", "height_px": 18, "markup": "<tr><td>x</td></tr>",
                  "children": [ { "tag": "td", "width_px": 120 } ] }
            ]
        }"#;
        let root: RenderedElement = serde_json::from_str(json).unwrap();
        let template = measure(&root).unwrap();
        assert_eq!(template.rows[0].height_px, 18);
        assert!(template.column_grid.contains("width:120px"));
    }
}
