use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::units;

/// Opaque identifier for a submitted print task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "print-task-{}", self.0)
    }
}

/// Orientation of a print page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Duplex (two-sided) printing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplexMode {
    #[default]
    Off,
    /// The printer turns the sheet itself.
    Automatic,
    /// The driver pauses so the operator can flip the stack.
    ManualFlip,
}

/// Physical class of the target printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterClass {
    /// Cut-sheet printer with fixed-size pages.
    #[default]
    Laser,
    /// Continuous-feed (dot-matrix) printer.
    Stylus,
}

/// Margin values expressed in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margin {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl Margin {
    pub const fn zero() -> Self {
        Self::uniform(0.0)
    }

    pub const fn uniform(value: f32) -> Self {
        Self {
            top: value,
            bottom: value,
            left: value,
            right: value,
        }
    }

    pub fn vertical(&self) -> f32 {
        self.top + self.bottom
    }

    pub fn horizontal(&self) -> f32 {
        self.left + self.right
    }
}

impl Default for Margin {
    fn default() -> Self {
        Self::uniform(10.0)
    }
}

/// Supported paper identifiers for quick selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperId {
    A4,
    A5,
    A3,
    Letter,
    Legal,
    /// 241 mm continuous form used by stylus printers.
    ContinuousForm,
    Custom,
}

/// Represents a paper size in millimetres, always stored portrait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaperSize {
    pub id: PaperId,
    pub width_mm: f32,
    pub height_mm: f32,
}

impl PaperSize {
    pub const A4: PaperSize = PaperSize::new(PaperId::A4, 210.0, 297.0);
    pub const A5: PaperSize = PaperSize::new(PaperId::A5, 148.0, 210.0);
    pub const A3: PaperSize = PaperSize::new(PaperId::A3, 297.0, 420.0);
    pub const LETTER: PaperSize = PaperSize::new(PaperId::Letter, 215.9, 279.4);
    pub const LEGAL: PaperSize = PaperSize::new(PaperId::Legal, 215.9, 355.6);
    pub const CONTINUOUS_FORM: PaperSize = PaperSize::new(PaperId::ContinuousForm, 241.0, 280.0);

    pub const fn new(id: PaperId, width_mm: f32, height_mm: f32) -> Self {
        Self {
            id,
            width_mm,
            height_mm,
        }
    }

    /// Standard size for a known identifier; `None` for [`PaperId::Custom`].
    pub fn standard(id: PaperId) -> Option<Self> {
        match id {
            PaperId::A4 => Some(Self::A4),
            PaperId::A5 => Some(Self::A5),
            PaperId::A3 => Some(Self::A3),
            PaperId::Letter => Some(Self::LETTER),
            PaperId::Legal => Some(Self::LEGAL),
            PaperId::ContinuousForm => Some(Self::CONTINUOUS_FORM),
            PaperId::Custom => None,
        }
    }

    /// Width and height in millimetres after applying `orientation`.
    pub fn oriented(&self, orientation: Orientation) -> (f32, f32) {
        match orientation {
            Orientation::Portrait => (self.width_mm, self.height_mm),
            Orientation::Landscape => (self.height_mm, self.width_mm),
        }
    }

    pub fn to_points(&self, orientation: Orientation) -> (f32, f32) {
        let (width, height) = self.oriented(orientation);
        (units::mm_to_points(width), units::mm_to_points(height))
    }

    /// Short name handed to drivers that select paper by name.
    pub fn name(&self) -> &'static str {
        match self.id {
            PaperId::A4 => "A4",
            PaperId::A5 => "A5",
            PaperId::A3 => "A3",
            PaperId::Letter => "Letter",
            PaperId::Legal => "Legal",
            PaperId::ContinuousForm => "ContinuousForm",
            PaperId::Custom => "Custom",
        }
    }
}

impl Default for PaperSize {
    fn default() -> Self {
        Self::A4
    }
}

/// Layout-affecting configuration; every change invalidates the packing.
#[derive(Debug, Clone, PartialEq)]
pub struct PageConfig {
    pub orientation: Orientation,
    pub paper: PaperSize,
    pub margins: Margin,
    pub printer_class: PrinterClass,
    pub fixed_logo: bool,
    pub scale: f32,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            orientation: Orientation::Portrait,
            paper: PaperSize::A4,
            margins: Margin::default(),
            printer_class: PrinterClass::Laser,
            fixed_logo: false,
            scale: 1.0,
        }
    }
}

impl PageConfig {
    /// Scale factor guarded against zero, negative and non-finite input.
    pub fn effective_scale(&self) -> f32 {
        if self.scale.is_finite() && self.scale > 0.0 {
            self.scale
        } else {
            1.0
        }
    }

    /// Page size in millimetres after applying the orientation.
    pub fn page_size_mm(&self) -> (f32, f32) {
        self.paper.oriented(self.orientation)
    }

    /// Printable height in millimetres (page height minus vertical margins).
    pub fn printable_height_mm(&self) -> f32 {
        let (_, height) = self.page_size_mm();
        (height - self.margins.vertical()).max(0.0)
    }

    pub fn printable_width_mm(&self) -> f32 {
        let (width, _) = self.page_size_mm();
        (width - self.margins.horizontal()).max(0.0)
    }
}

/// Job-level options that do not affect pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSettings {
    pub job_name: String,
    /// Printer index as enumerated by the driver; `-1` selects the default printer.
    pub printer_index: i32,
    pub copies: u32,
    pub duplex: DuplexMode,
    /// Prefix of generated export file names.
    pub file_prefix: String,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            job_name: "document".to_string(),
            printer_index: -1,
            copies: 1,
            duplex: DuplexMode::Off,
            file_prefix: "export".to_string(),
        }
    }
}

/// One selectable printer as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterItem {
    pub text: String,
    pub value: i32,
}

impl PrinterItem {
    pub const DEFAULT_PRINTER_TEXT: &'static str = "default printer";

    pub fn default_printer() -> Self {
        Self {
            text: Self::DEFAULT_PRINTER_TEXT.to_string(),
            value: -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_swaps_dimensions() {
        assert_eq!(PaperSize::A4.oriented(Orientation::Landscape), (297.0, 210.0));
        let (w, h) = PaperSize::A4.to_points(Orientation::Portrait);
        assert!(w < h);
    }

    #[test]
    fn printable_height_subtracts_margins() {
        let config = PageConfig {
            margins: Margin {
                top: 20.0,
                bottom: 7.0,
                left: 0.0,
                right: 0.0,
            },
            ..PageConfig::default()
        };
        assert_eq!(config.printable_height_mm(), 270.0);
    }

    #[test]
    fn invalid_scale_falls_back_to_one() {
        for scale in [0.0, -2.0, f32::NAN, f32::INFINITY] {
            let config = PageConfig {
                scale,
                ..PageConfig::default()
            };
            assert_eq!(config.effective_scale(), 1.0);
        }
    }

    #[test]
    fn task_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }
}
