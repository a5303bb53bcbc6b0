//! Flattens the image and its labels into a single raster at natural
//! resolution.

use std::io::Cursor;
use std::path::Path;

use ab_glyph::{point, Font};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgba, RgbaImage};
use tiny_skia::{
    Color, ColorU8, FillRule, FilterQuality, GradientStop, LinearGradient, Paint, PathBuilder,
    Pixmap, PixmapPaint, PremultipliedColorU8, SpreadMode, Stroke, Transform,
};

use crate::asset::ImageAsset;
use crate::error::{Error, Result};
use crate::labels::{Label, LabelCollection};
use crate::layout::{LayoutEngine, LeaderGeometry};
use crate::text::LabelFont;

const JPEG_QUALITY: u8 = 100;

/// Label text coverage, positioned relative to the start of its baseline.
struct TextRaster {
    pixmap: Pixmap,
    offset_x: f32,
    offset_y: f32,
}

pub struct Exporter {
    layout: LayoutEngine,
    font: LabelFont,
}

impl Exporter {
    pub fn new(layout: LayoutEngine, font: LabelFont) -> Self {
        Self { layout, font }
    }

    pub fn render(&self, image: &ImageAsset, labels: &LabelCollection) -> Result<RgbaImage> {
        let mut pixmap = to_pixmap(image.pixels())?;
        for label in labels.iter() {
            self.draw_label(&mut pixmap, label);
        }
        Ok(from_pixmap(&pixmap))
    }

    /// JPEG bytes of the flattened image.
    pub fn export(&self, image: &ImageAsset, labels: &LabelCollection) -> Result<Vec<u8>> {
        let flattened = DynamicImage::ImageRgba8(self.render(image, labels)?).to_rgb8();
        let mut bytes = Vec::new();
        let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), JPEG_QUALITY);
        flattened.write_with_encoder(encoder)?;
        Ok(bytes)
    }

    pub fn export_to_file(
        &self,
        image: &ImageAsset,
        labels: &LabelCollection,
        out: &Path,
    ) -> Result<()> {
        let bytes = self.export(image, labels)?;
        std::fs::write(out, bytes)?;
        log::info!("Exported {} labels to {}", labels.len(), out.display());
        Ok(())
    }

    fn draw_label(&self, pixmap: &mut Pixmap, label: &Label) {
        let placement = self.layout.place(label);
        let mut paint = Paint::default();
        paint.anti_alias = true;
        paint.set_color(Color::BLACK);

        match placement.leader {
            LeaderGeometry::Omitted => {}
            LeaderGeometry::Line { segment, width } => {
                let mut pb = PathBuilder::new();
                pb.move_to(segment.start.x, segment.start.y);
                pb.line_to(segment.end.x, segment.end.y);
                if let Some(path) = pb.finish() {
                    let stroke = Stroke {
                        width,
                        ..Default::default()
                    };
                    pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
                }
            }
            LeaderGeometry::GradientBar(bar) => {
                let corners = bar.corners();
                let mut pb = PathBuilder::new();
                pb.move_to(corners[0].x, corners[0].y);
                for c in &corners[1..] {
                    pb.line_to(c.x, c.y);
                }
                pb.close();
                let shader = LinearGradient::new(
                    tiny_skia::Point::from_xy(bar.axis.start.x, bar.axis.start.y),
                    tiny_skia::Point::from_xy(bar.axis.end.x, bar.axis.end.y),
                    vec![
                        GradientStop::new(0.0, Color::from_rgba8(0, 0, 0, 0)),
                        GradientStop::new(1.0, Color::BLACK),
                    ],
                    SpreadMode::Pad,
                    Transform::identity(),
                );
                if let (Some(path), Some(shader)) = (pb.finish(), shader) {
                    paint.shader = shader;
                    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
                }
            }
        }

        let Some(text) = self.rasterize_text(label.name()) else {
            return;
        };
        let origin = placement.text_origin;
        let transform = Transform::from_rotate_at(placement.rotation_degrees, origin.x, origin.y)
            .pre_translate(origin.x + text.offset_x, origin.y + text.offset_y);
        let text_paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..Default::default()
        };
        pixmap.draw_pixmap(0, 0, text.pixmap.as_ref(), &text_paint, transform, None);
    }

    fn rasterize_text(&self, text: &str) -> Option<TextRaster> {
        let size = self.layout.config().font_size;
        let scale = self.font.scale(size);
        let (glyphs, _) = self.font.layout_glyphs(text, size);
        let outlines: Vec<_> = glyphs
            .into_iter()
            .filter_map(|(id, x)| {
                let glyph = id.with_scale_and_position(scale, point(x, 0.0));
                self.font.font().outline_glyph(glyph)
            })
            .collect();

        if outlines.is_empty() {
            return None;
        }
        let (min_x, min_y, max_x, max_y) = outlines.iter().map(|o| o.px_bounds()).fold(
            (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
            |(x0, y0, x1, y1), b| {
                (
                    x0.min(b.min.x),
                    y0.min(b.min.y),
                    x1.max(b.max.x),
                    y1.max(b.max.y),
                )
            },
        );
        let width = (max_x - min_x).ceil().max(1.0) as u32;
        let height = (max_y - min_y).ceil().max(1.0) as u32;

        let mut coverage = vec![0.0f32; (width * height) as usize];
        for outline in &outlines {
            let bounds = outline.px_bounds();
            let left = (bounds.min.x - min_x) as u32;
            let top = (bounds.min.y - min_y) as u32;
            outline.draw(|x, y, c| {
                let (px, py) = (left + x, top + y);
                if px < width && py < height {
                    let cell = &mut coverage[(py * width + px) as usize];
                    *cell = (*cell + c).min(1.0);
                }
            });
        }

        let mut pixmap = Pixmap::new(width, height)?;
        for (pixel, c) in pixmap.pixels_mut().iter_mut().zip(coverage) {
            let alpha = (c * 255.0).round() as u8;
            *pixel = PremultipliedColorU8::from_rgba(0, 0, 0, alpha)
                .unwrap_or(PremultipliedColorU8::TRANSPARENT);
        }
        Some(TextRaster {
            pixmap,
            offset_x: min_x,
            offset_y: min_y,
        })
    }
}

fn to_pixmap(img: &RgbaImage) -> Result<Pixmap> {
    let (w, h) = img.dimensions();
    let mut pixmap =
        Pixmap::new(w, h).ok_or_else(|| Error::Raster(format!("cannot draw on {w}x{h}")))?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(img.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}

fn from_pixmap(pixmap: &Pixmap) -> RgbaImage {
    let mut img = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in img.pixels_mut().zip(pixmap.pixels()) {
        let c = src.demultiply();
        *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
    }
    img
}
