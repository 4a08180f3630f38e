//! Color representation.

use std::ops::{Deref, DerefMut};

/// Helper macro for creating colors.
#[macro_export]
macro_rules! color {
    // Creates a new color from r, g, b values.
    ($r:expr, $g:expr, $b:expr) => {
        $crate::core::Color::new($r, $g, $b, 1.0)
    };
    // Creates a new color from r, g, b, a values.
    ($r:expr, $g:expr, $b:expr, $a:expr) => {
        $crate::core::Color::new($r, $g, $b, $a)
    };
}

/// Linear color representation.
///
/// Used as the clear value of render targets. Components are expected to be
/// in `[0, 1]`; values outside are clamped when converted to 8-bit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color(wgpu::Color);

impl Color {
    pub const WHITE: Self = color!(1.0, 1.0, 1.0);
    pub const BLACK: Self = color!(0.0, 0.0, 0.0);
    pub const RED: Self = color!(1.0, 0.0, 0.0);
    pub const GREEN: Self = color!(0.0, 1.0, 0.0);
    pub const BLUE: Self = color!(0.0, 0.0, 1.0);
    pub const ORANGE: Self = color!(1.0, 0.5, 0.0);
    /// Fully transparent black, the initial clear value of a fresh context.
    pub const TRANSPARENT: Self = color!(0.0, 0.0, 0.0, 0.0);

    /// Creates a new color.
    #[inline]
    pub const fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self(wgpu::Color { r, g, b, a })
    }

    /// Creates a new color from a hex value.
    ///
    /// The hex value should be in the format `0xRRGGBBAA`
    #[inline]
    pub fn from_hex(hex: u32) -> Self {
        Self::new(
            ((hex >> 24) & 0xFF) as f64 / 255.0,
            ((hex >> 16) & 0xFF) as f64 / 255.0,
            ((hex >> 8) & 0xFF) as f64 / 255.0,
            (hex & 0xFF) as f64 / 255.0,
        )
    }

    /// Creates a new opaque color from 8-bit channels.
    #[inline]
    pub fn from_rgb8(rgb: [u8; 3]) -> Self {
        Self::new(
            rgb[0] as f64 / 255.0,
            rgb[1] as f64 / 255.0,
            rgb[2] as f64 / 255.0,
            1.0,
        )
    }

    /// Converts the color to 8-bit RGB, dropping alpha.
    #[inline]
    pub fn to_rgb8(&self) -> [u8; 3] {
        [
            unorm8(self.0.r),
            unorm8(self.0.g),
            unorm8(self.0.b),
        ]
    }

    /// Converts the color to 8-bit RGBA.
    #[inline]
    pub fn to_rgba8(&self) -> [u8; 4] {
        [
            unorm8(self.0.r),
            unorm8(self.0.g),
            unorm8(self.0.b),
            unorm8(self.0.a),
        ]
    }
}

/// Same rounding rule as the UNORM conversion of a GPU clear.
#[inline]
fn unorm8(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl Default for Color {
    fn default() -> Self {
        Self::TRANSPARENT
    }
}

impl Deref for Color {
    type Target = wgpu::Color;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Color {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Color> for wgpu::Color {
    fn from(c: Color) -> Self {
        c.0
    }
}
