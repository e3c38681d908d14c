use std::fmt;

use crate::job::PageConfig;
use crate::layout::PackedPage;
use crate::serialize::{self, OutputTarget, SerializeError};
use crate::template::PrintTemplate;
use crate::units;

/// Width of the preview viewport used when the caller does not supply one.
pub const DEFAULT_VIEWPORT_WIDTH_PX: f32 = 900.0;

/// Page navigation state owned by the workspace renderer. Pages are 1-based;
/// `current_page` is 0 only while nothing is packed.
/// 預覽區的頁面導覽狀態（頁碼從 1 起算）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreviewState {
    pub current_page: usize,
    pub total_pages: usize,
    pub loading: bool,
}

impl PreviewState {
    /// Adopts a new page count and clamps the current page into range.
    pub fn clamp_to(&mut self, total_pages: usize) {
        self.total_pages = total_pages;
        self.current_page = if total_pages == 0 {
            0
        } else {
            self.current_page.clamp(1, total_pages)
        };
    }

    /// Selects `page` (1-based), clamped to the packed range. Returns the page
    /// actually selected.
    pub fn select(&mut self, page: usize) -> usize {
        if self.total_pages > 0 {
            self.current_page = page.clamp(1, self.total_pages);
        }
        self.current_page
    }

    pub fn next(&mut self) -> usize {
        self.select(self.current_page.saturating_add(1))
    }

    pub fn previous(&mut self) -> usize {
        self.select(self.current_page.saturating_sub(1))
    }

    /// 0-based index of the current page, if any page is packed.
    pub fn current_index(&self) -> Option<usize> {
        self.current_page.checked_sub(1)
    }

    pub fn is_first(&self) -> bool {
        self.current_page <= 1
    }

    pub fn is_last(&self) -> bool {
        self.current_page >= self.total_pages
    }
}

/// Placement of the scaled page inside the fixed-width preview viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewGeometry {
    pub scale: f32,
    pub translate_x_px: f32,
    pub page_width_px: f32,
    pub page_height_px: f32,
    pub scaled_width_px: f32,
    pub scaled_height_px: f32,
    /// Top, right, bottom, left padding (the page margins), unscaled.
    pub padding_px: [f32; 4],
    /// The scaled page is wider than the viewport and is clipped on the right.
    pub clipped: bool,
}

impl PreviewGeometry {
    /// Centers the page scaled by `config.scale` inside a viewport of
    /// `viewport_width_px`. Shrinking and enlarging share one formula; an
    /// enlarged page wider than the viewport is pinned to the left edge.
    pub fn compute(config: &PageConfig, viewport_width_px: f32) -> Self {
        let scale = config.effective_scale();
        let (width_mm, height_mm) = config.page_size_mm();
        let page_width_px = units::mm_to_px(width_mm);
        let page_height_px = units::mm_to_px(height_mm);
        let scaled_width_px = page_width_px * scale;
        let scaled_height_px = page_height_px * scale;
        let slack = viewport_width_px.max(0.0) - scaled_width_px;
        let margins = config.margins;

        Self {
            scale,
            translate_x_px: (slack / 2.0).max(0.0),
            page_width_px,
            page_height_px,
            scaled_width_px,
            scaled_height_px,
            padding_px: [
                units::mm_to_px(margins.top),
                units::mm_to_px(margins.right),
                units::mm_to_px(margins.bottom),
                units::mm_to_px(margins.left),
            ],
            clipped: slack < 0.0,
        }
    }

    /// Inline CSS for the page container.
    pub fn css(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PreviewGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [top, right, bottom, left] = self.padding_px;
        write!(
            f,
            "width:{:.2}px;min-height:{:.2}px;padding:{:.2}px {:.2}px {:.2}px {:.2}px;\
             box-sizing:border-box;transform-origin:0 0;\
             transform:translateX({:.2}px) scale({:.4})",
            self.page_width_px,
            self.page_height_px,
            top,
            right,
            bottom,
            left,
            self.translate_x_px,
            self.scale
        )?;
        if self.clipped {
            f.write_str(";overflow:hidden")?;
        }
        Ok(())
    }
}

/// Surface the workspace renderer draws into (a web view, a widget...).
/// 預覽繪製目標的抽象介面。
pub trait PreviewSurface {
    fn set_geometry(&mut self, geometry: &PreviewGeometry);
    fn set_content(&mut self, html: &str);
    fn scroll_to_top(&mut self);
}

/// In-memory [`PreviewSurface`] used by headless callers and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    pub content: String,
    pub geometry: Option<PreviewGeometry>,
    pub scroll_top: f32,
    pub renders: usize,
}

impl PreviewSurface for MemorySurface {
    fn set_geometry(&mut self, geometry: &PreviewGeometry) {
        self.geometry = Some(*geometry);
    }

    fn set_content(&mut self, html: &str) {
        self.content = html.to_string();
        self.renders += 1;
    }

    fn scroll_to_top(&mut self) {
        self.scroll_top = 0.0;
    }
}

/// Writes page `page_index` (0-based) into `surface` and scrolls it to the top.
pub fn render_page(
    surface: &mut dyn PreviewSurface,
    template: &PrintTemplate,
    pages: &[PackedPage],
    page_index: usize,
    geometry: &PreviewGeometry,
) -> Result<(), SerializeError> {
    let html = serialize::serialize(template, pages, OutputTarget::One(page_index))?;
    surface.set_geometry(geometry);
    surface.set_content(&html);
    surface.scroll_to_top();
    Ok(())
}
