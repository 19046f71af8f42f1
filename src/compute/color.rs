//! Color types and color-space conversion.
//!
//! Lab values use the unit scale (L in 0-1), so a Lab distance between
//! black and white is 1.0.

use palette::{Hsl, IntoColor, LinSrgb, Srgb};
use serde::{Deserialize, Serialize};

/// palette's Lab has L in 0-100.
const LAB_SCALE: f32 = 100.0;

/// 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::opaque(0, 0, 0);

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    fn srgb(self) -> Srgb {
        Srgb::new(self.r, self.g, self.b).into_format()
    }

    /// Convert to (hue degrees, saturation, lightness).
    pub fn to_hsl(self) -> (f32, f32, f32) {
        let hsl: Hsl = self.srgb().into_color();
        (
            hsl.hue.into_positive_degrees(),
            hsl.saturation,
            hsl.lightness,
        )
    }

    /// Build from (hue degrees, saturation, lightness), keeping `alpha`.
    pub fn from_hsl(h: f32, s: f32, l: f32, alpha: u8) -> Self {
        let hsl = Hsl::new(h.rem_euclid(360.0), s.clamp(0.0, 1.0), l.clamp(0.0, 1.0));
        let rgb: Srgb = hsl.into_color();
        let rgb: Srgb<u8> = rgb.into_format();
        Self {
            r: rgb.red,
            g: rgb.green,
            b: rgb.blue,
            a: alpha,
        }
    }

    /// Packed 24-bit key, used to memoize conversions.
    #[inline]
    pub fn rgb_key(r: u8, g: u8, b: u8) -> u32 {
        ((r as u32) << 16) | ((g as u32) << 8) | b as u32
    }
}

/// CIE L*a*b* color (D65 white point), unit scale.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Lab {
    pub l: f32,
    pub a: f32,
    pub b: f32,
}

impl Lab {
    /// Convert an sRGB triple.
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        let linear: LinSrgb = Srgb::new(r, g, b).into_format::<f32>().into_linear();
        let lab: palette::Lab = linear.into_color();
        Self {
            l: lab.l / LAB_SCALE,
            a: lab.a / LAB_SCALE,
            b: lab.b / LAB_SCALE,
        }
    }

    /// Euclidean distance in Lab space.
    #[inline]
    pub fn distance(&self, other: &Lab) -> f32 {
        let dl = self.l - other.l;
        let da = self.a - other.a;
        let db = self.b - other.b;
        (dl * dl + da * da + db * db).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hsl_round_trip() {
        for color in [
            Rgba::opaque(255, 0, 0),
            Rgba::opaque(12, 200, 90),
            Rgba::opaque(30, 30, 30),
            Rgba::opaque(250, 240, 10),
        ] {
            let (h, s, l) = color.to_hsl();
            let back = Rgba::from_hsl(h, s, l, color.a);
            assert!((back.r as i32 - color.r as i32).abs() <= 1);
            assert!((back.g as i32 - color.g as i32).abs() <= 1);
            assert!((back.b as i32 - color.b as i32).abs() <= 1);
        }
    }

    #[test]
    fn test_lab_black_white_distance() {
        let black = Lab::from_rgb(0, 0, 0);
        let white = Lab::from_rgb(255, 255, 255);
        assert!(black.l.abs() < 1e-4);
        assert!((white.l - 1.0).abs() < 1e-3);
        assert!((black.distance(&white) - 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_hsl_of_primary() {
        let (h, s, l) = Rgba::opaque(0, 0, 255).to_hsl();
        assert!((h - 240.0).abs() < 1e-3);
        assert!((s - 1.0).abs() < 1e-4);
        assert!((l - 0.5).abs() < 1e-4);
        assert_eq!(Rgba::from_hsl(-120.0, 1.0, 0.5, 7), Rgba { r: 0, g: 0, b: 255, a: 7 });
    }

    #[test]
    fn test_lab_distance_identity() {
        let c = Lab::from_rgb(10, 120, 240);
        assert_eq!(c.distance(&c), 0.0);
    }
}
