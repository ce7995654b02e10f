use bytemuck::{Pod, Zeroable};

/// Represents a colour in RGBA format with floating point channels.
///
/// Channels are nominally in `[0.0, 1.0]` but are not clamped on construction;
/// values outside that range survive until the colour reaches an 8-bit path
/// (texture upload, readback) where they are clamped.
///
/// # Examples
///
/// ```
/// use scena::Color;
///
/// let red = Color::rgb(1.0, 0.0, 0.0);
/// assert_eq!(red.to_rgba8(), [255, 0, 0, 255]);
///
/// let grey = Color::from_rgba8([128, 128, 128, 255]);
/// assert_eq!(grey.to_rgba8(), [128, 128, 128, 255]);
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// A fully transparent colour.
    pub const TRANSPARENT: Self = Self::rgba(0.0, 0.0, 0.0, 0.0);
    /// An opaque black colour.
    pub const BLACK: Self = Self::rgb(0.0, 0.0, 0.0);
    /// An opaque white colour.
    pub const WHITE: Self = Self::rgb(1.0, 1.0, 1.0);

    /// Creates a new colour with the given RGB channels and full opacity.
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Creates a new colour with the given RGBA channels.
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Converts the colour to 8-bit RGBA, clamping each channel to `[0, 255]`.
    pub fn to_rgba8(self) -> [u8; 4] {
        [
            channel_to_u8(self.r),
            channel_to_u8(self.g),
            channel_to_u8(self.b),
            channel_to_u8(self.a),
        ]
    }

    /// Builds a colour from 8-bit RGBA samples, mapping `0..=255` to `0.0..=1.0`.
    pub fn from_rgba8(rgba: [u8; 4]) -> Self {
        Self {
            r: rgba[0] as f32 / 255.0,
            g: rgba[1] as f32 / 255.0,
            b: rgba[2] as f32 / 255.0,
            a: rgba[3] as f32 / 255.0,
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

fn channel_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0 + 0.5).floor() as u8
}

/// Converts a colour slice to tightly packed RGBA8 bytes.
pub(crate) fn colors_to_rgba8(colors: &[Color]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(colors.len() * 4);
    for color in colors {
        bytes.extend_from_slice(&color.to_rgba8());
    }
    bytes
}
