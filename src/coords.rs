//! Viewport <-> image-intrinsic coordinate mapping.
//!
//! Every stored label coordinate lives in the image's natural pixel grid so
//! that labels stay put when the window is resized or the view is zoomed.

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<egui::Pos2> for Point {
    fn from(p: egui::Pos2) -> Self {
        Self::new(p.x, p.y)
    }
}

impl From<Point> for egui::Pos2 {
    fn from(p: Point) -> Self {
        egui::pos2(p.x, p.y)
    }
}

/// Maps between on-screen pixels and the image's natural pixel grid.
///
/// `origin` is where image pixel (0, 0) lands on screen; `scale_*` is the
/// number of screen pixels per image pixel along each axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateMapper {
    origin: Point,
    scale_x: f32,
    scale_y: f32,
    natural_width: f32,
    natural_height: f32,
}

impl CoordinateMapper {
    pub fn new(origin: Point, scale_x: f32, scale_y: f32, natural_size: (f32, f32)) -> Self {
        Self {
            origin,
            scale_x,
            scale_y,
            natural_width: natural_size.0,
            natural_height: natural_size.1,
        }
    }

    /// Build the mapping from where the image is drawn on screen and how
    /// large it is there, compared with its natural size.
    pub fn from_display_rect(
        min: Point,
        display_size: (f32, f32),
        natural_size: (f32, f32),
    ) -> Self {
        let ratio = |shown: f32, natural: f32| {
            if natural > 0.0 {
                shown / natural
            } else {
                0.0
            }
        };
        Self::new(
            min,
            ratio(display_size.0, natural_size.0),
            ratio(display_size.1, natural_size.1),
            natural_size,
        )
    }

    fn usable(&self) -> bool {
        self.origin.is_finite()
            && self.scale_x.is_finite()
            && self.scale_y.is_finite()
            && self.scale_x.abs() > f32::EPSILON
            && self.scale_y.abs() > f32::EPSILON
    }

    /// Convert a viewport point to image space.
    pub fn to_image_space(&self, viewport: Point) -> Result<Point> {
        if !self.usable() || !viewport.is_finite() {
            return Err(Error::GeometryUnavailable);
        }
        Ok(Point::new(
            (viewport.x - self.origin.x) / self.scale_x,
            (viewport.y - self.origin.y) / self.scale_y,
        ))
    }

    /// Convert an image-space point back to the viewport.
    pub fn to_viewport(&self, image: Point) -> Point {
        Point::new(
            self.origin.x + image.x * self.scale_x,
            self.origin.y + image.y * self.scale_y,
        )
    }

    /// Screen pixels per image pixel, horizontally. Used to scale strokes and text.
    pub fn scale(&self) -> f32 {
        self.scale_x
    }

    pub fn contains(&self, image: Point) -> bool {
        (0.0..=self.natural_width).contains(&image.x)
            && (0.0..=self.natural_height).contains(&image.y)
    }
}
