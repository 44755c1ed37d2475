use serde::{Deserialize, Serialize};

/// Normalized RGBA color; every channel lives in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Colors offered to the user when placing a marker, addressed by index.
pub const PALETTE: [Rgba; 8] = [
    Rgba::OPAQUE_RED,
    Rgba::rgb(0.2, 0.8, 0.2),
    Rgba::rgb(0.2, 0.4, 1.0),
    Rgba::rgb(1.0, 0.85, 0.1),
    Rgba::rgb(0.6, 0.2, 0.8),
    Rgba::rgb(1.0, 0.55, 0.0),
    Rgba::rgb(0.0, 0.85, 0.9),
    Rgba::rgb(1.0, 1.0, 1.0),
];

impl Rgba {
    pub const OPAQUE_RED: Self = Self::rgb(1.0, 0.0, 0.0);

    #[must_use]
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Builds a color, clamping every channel into `[0, 1]`. Non-finite
    /// channels become `0` (or `1` for alpha).
    #[must_use]
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self {
            r: clamp_channel(r, 0.0),
            g: clamp_channel(g, 0.0),
            b: clamp_channel(b, 0.0),
            a: clamp_channel(a, 1.0),
        }
    }

    /// Palette lookup; out-of-range indices wrap around.
    #[must_use]
    pub fn from_palette(index: usize) -> Self {
        PALETTE[index % PALETTE.len()]
    }

    #[must_use]
    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Channel-wise comparison at 8-bit display precision.
    #[must_use]
    pub fn approx_eq(&self, other: &Self) -> bool {
        const TOLERANCE: f32 = 1.0 / 255.0;
        self.to_array()
            .iter()
            .zip(other.to_array())
            .all(|(a, b)| (a - b).abs() <= TOLERANCE)
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::OPAQUE_RED
    }
}

fn clamp_channel(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_are_clamped() {
        let c = Rgba::new(1.5, -0.2, f32::NAN, f32::INFINITY);
        assert_eq!(c, Rgba { r: 1.0, g: 0.0, b: 0.0, a: 1.0 });
    }

    #[test]
    fn palette_wraps() {
        assert_eq!(Rgba::from_palette(0), Rgba::OPAQUE_RED);
        assert_eq!(Rgba::from_palette(PALETTE.len()), Rgba::OPAQUE_RED);
        assert_eq!(Rgba::from_palette(PALETTE.len() + 2), PALETTE[2]);
    }
}
