//! Length conversions shared by the packer, the preview and the driver bridge.
//! 分頁、預覽與列印驅動共用的長度換算。

/// Assumed screen resolution of the rendering surface.
pub const CSS_DPI: f32 = 96.0;
pub const MM_PER_INCH: f32 = 25.4;
/// Pixels per millimetre at [`CSS_DPI`].
pub const PX_PER_MM: f32 = CSS_DPI / MM_PER_INCH;
/// Driver-native length unit, in millimetres (0.1 mm).
pub const NATIVE_UNIT_MM: f32 = 0.1;

/// Converts millimetres to CSS pixels.
pub fn mm_to_px(mm: f32) -> f32 {
    mm * PX_PER_MM
}

/// Converts CSS pixels to millimetres.
pub fn px_to_mm(px: f32) -> f32 {
    px / PX_PER_MM
}

/// Converts millimetres to points (1/72").
pub fn mm_to_points(mm: f32) -> f32 {
    mm / MM_PER_INCH * 72.0
}

/// Converts millimetres to the driver-native unit, rounded to the nearest step.
pub fn mm_to_native(mm: f32) -> i32 {
    (mm / NATIVE_UNIT_MM).round() as i32
}
