//! Perceptual distance between a rendered canvas and the target image.

use std::collections::HashMap;

use image::RgbaImage;

use super::{Canvas, DiffMap, Lab, PixelRect, Rect, Rgba};

/// Memoizes Lab conversions of candidate colors within one pass.
#[derive(Default)]
struct LabMemo {
    cache: HashMap<u32, Lab>,
}

impl LabMemo {
    #[inline]
    fn lab(&mut self, [r, g, b]: [u8; 3]) -> Lab {
        *self
            .cache
            .entry(Rgba::rgb_key(r, g, b))
            .or_insert_with(|| Lab::from_rgb(r, g, b))
    }
}

/// Scores canvases against a fixed target.
pub struct Ranker {
    width: u32,
    height: u32,
    target: Vec<Lab>,
}

impl Ranker {
    /// Precompute Lab colors of the target once.
    pub fn new(target: &RgbaImage) -> Self {
        let (width, height) = target.dimensions();
        let mut memo = LabMemo::default();
        let target = target
            .pixels()
            .map(|p| memo.lab([p.0[0], p.0[1], p.0[2]]))
            .collect();
        Self {
            width,
            height,
            target,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Mean Lab distance between two equally sized images.
    pub fn distance(a: &RgbaImage, b: &RgbaImage) -> Result<f32, RankerError> {
        if a.dimensions() != b.dimensions() {
            return Err(RankerError::SizeMismatch {
                expected: a.dimensions(),
                actual: b.dimensions(),
            });
        }
        let count = a.width() as f64 * a.height() as f64;
        if count == 0.0 {
            return Ok(0.0);
        }
        let mut memo = LabMemo::default();
        let total: f64 = a
            .pixels()
            .zip(b.pixels())
            .map(|(pa, pb)| {
                let la = memo.lab([pa.0[0], pa.0[1], pa.0[2]]);
                let lb = memo.lab([pb.0[0], pb.0[1], pb.0[2]]);
                la.distance(&lb) as f64
            })
            .sum();
        Ok((total / count) as f32)
    }

    /// Score a full-frame canvas, filling every cell of `diff_map`.
    pub fn distance_from_precalculated(
        &self,
        canvas: &Canvas,
        diff_map: &mut DiffMap,
    ) -> Result<f32, RankerError> {
        let full = PixelRect::full(self.width, self.height);
        if canvas.region() != full {
            return Err(RankerError::SizeMismatch {
                expected: (self.width, self.height),
                actual: (canvas.region().width(), canvas.region().height()),
            });
        }
        self.distance_from_precalculated_bounds(canvas, &[full.to_rect()], diff_map)
    }

    /// Re-rank only the pixels of `bounds` that `canvas` covers, overwriting
    /// those cells of `diff_map`, and return the map's new average.
    pub fn distance_from_precalculated_bounds(
        &self,
        canvas: &Canvas,
        bounds: &[Rect],
        diff_map: &mut DiffMap,
    ) -> Result<f32, RankerError> {
        if (diff_map.width(), diff_map.height()) != (self.width, self.height) {
            return Err(RankerError::SizeMismatch {
                expected: (self.width, self.height),
                actual: (diff_map.width(), diff_map.height()),
            });
        }
        let covered = canvas.region();
        let mut memo = LabMemo::default();
        for rect in bounds {
            let Some(pixels) = rect.to_pixels(self.width, self.height) else {
                continue;
            };
            let x0 = pixels.x0.max(covered.x0);
            let y0 = pixels.y0.max(covered.y0);
            let x1 = pixels.x1.min(covered.x1);
            let y1 = pixels.y1.min(covered.y1);
            for y in y0..y1 {
                let row = y as usize * self.width as usize;
                for x in x0..x1 {
                    let lab = memo.lab(canvas.rgb(x, y));
                    diff_map.set(x, y, lab.distance(&self.target[row + x as usize]));
                }
            }
        }
        Ok(diff_map.average())
    }
}

/// Ranking errors.
#[derive(Debug, thiserror::Error)]
pub enum RankerError {
    #[error("Image size mismatch: expected {expected:?}, got {actual:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}
