//! CPU rasterization of instruction lists with tiny-skia.
//!
//! Canvases always start opaque black. A region render draws only the
//! instructions whose bounds intersect the region, translated into a
//! region-sized pixmap, so its pixels match the same pixels of a full render.

use tiny_skia as sk;

use super::{Instruction, PixelRect};

/// A rendered area of the canvas.
pub struct Canvas {
    pixmap: sk::Pixmap,
    region: PixelRect,
}

impl Canvas {
    /// Canvas area covered by this render.
    pub fn region(&self) -> PixelRect {
        self.region
    }

    /// RGB at absolute canvas coordinates. The caller keeps `(x, y)` inside
    /// [`Canvas::region`].
    #[inline]
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let lx = (x - self.region.x0) as usize;
        let ly = (y - self.region.y0) as usize;
        let idx = (ly * self.pixmap.width() as usize + lx) * 4;
        // Background is opaque, so premultiplied bytes equal straight RGB.
        let data = self.pixmap.data();
        [data[idx], data[idx + 1], data[idx + 2]]
    }

    /// Encode as PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>, RenderError> {
        self.pixmap
            .encode_png()
            .map_err(|e| RenderError::Encode(e.to_string()))
    }

    /// Copy out as an `image` buffer.
    pub fn to_image(&self) -> image::RgbaImage {
        let (w, h) = (self.region.width(), self.region.height());
        image::RgbaImage::from_fn(w, h, |x, y| {
            let [r, g, b] = self.rgb(x + self.region.x0, y + self.region.y0);
            image::Rgba([r, g, b, 255])
        })
    }
}

/// Renders instruction lists at a fixed canvas size.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    width: u32,
    height: u32,
}

impl Renderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Full-frame render.
    pub fn render(&self, instructions: &[Instruction]) -> Result<Canvas, RenderError> {
        self.render_region(instructions, PixelRect::full(self.width, self.height))
    }

    /// Render only `region` of the canvas.
    pub fn render_region(
        &self,
        instructions: &[Instruction],
        region: PixelRect,
    ) -> Result<Canvas, RenderError> {
        let mut pixmap =
            sk::Pixmap::new(region.width(), region.height()).ok_or(RenderError::EmptyCanvas)?;
        pixmap.fill(sk::Color::BLACK);

        let area = region.to_rect();
        let transform = sk::Transform::from_translate(-(region.x0 as f32), -(region.y0 as f32));
        for instruction in instructions {
            if instruction.bounds().intersects(&area) {
                draw(&mut pixmap, instruction, transform);
            }
        }
        Ok(Canvas { pixmap, region })
    }
}

fn draw(pixmap: &mut sk::Pixmap, instruction: &Instruction, transform: sk::Transform) {
    let color = instruction.color();
    let mut paint = sk::Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, color.a);
    paint.anti_alias = true;

    match instruction {
        Instruction::Line(line) => {
            let mut pb = sk::PathBuilder::new();
            pb.move_to(line.start_x, line.start_y);
            pb.line_to(line.end_x, line.end_y);
            let Some(path) = pb.finish() else {
                return;
            };
            let stroke = sk::Stroke {
                width: line.width.max(0.0),
                ..Default::default()
            };
            pixmap.stroke_path(&path, &paint, &stroke, transform, None);
        }
        Instruction::Circle(circle) => {
            if let Some(path) = sk::PathBuilder::from_circle(circle.x, circle.y, circle.radius) {
                pixmap.fill_path(&path, &paint, sk::FillRule::Winding, transform, None);
            }
        }
        Instruction::Polygon(polygon) => {
            let mut vertices = polygon.vertices();
            let Some((x, y)) = vertices.next() else {
                return;
            };
            let mut pb = sk::PathBuilder::new();
            pb.move_to(x, y);
            for (x, y) in vertices {
                pb.line_to(x, y);
            }
            pb.close();
            if let Some(path) = pb.finish() {
                pixmap.fill_path(&path, &paint, sk::FillRule::Winding, transform, None);
            }
        }
    }
}

/// Rendering errors.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Canvas region is empty")]
    EmptyCanvas,
    #[error("PNG encoding failed: {0}")]
    Encode(String),
}
