//! Label placement: default text position, leader geometry and text hit box.
//!
//! Everything here is a pure function of a label's two points and the
//! [`LayoutConfig`] constants, so the screen overlay and the exported raster
//! agree on where things go.

use serde::{Deserialize, Serialize};

use crate::coords::Point;
use crate::labels::{Label, LabelCollection};

/// How the connector between anchor and text is drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeaderLineStyle {
    #[default]
    Line,
    GradientBar,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LayoutConfig {
    /// Vertical distance from the anchor up to a new label's text.
    pub label_offset: f32,
    /// Text rotation about its baseline start. Negative tilts the text upward.
    pub label_rotation_degrees: f32,
    pub leader_line_style: LeaderLineStyle,
    pub font_size: f32,
    pub leader_width: f32,
    /// The leader ends this far below the text baseline.
    pub baseline_drop: f32,
    /// Dragging only moves the text vertically; x stays on the anchor.
    pub constrain_horizontal_drag: bool,
    /// Draw every label's text at this y, whatever its stored position.
    pub pinned_label_y: Option<f32>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            label_offset: 300.0,
            label_rotation_degrees: -45.0,
            leader_line_style: LeaderLineStyle::Line,
            font_size: 80.0,
            leader_width: 4.0,
            baseline_drop: 10.0,
            constrain_horizontal_drag: false,
            pinned_label_y: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineSegment {
    pub start: Point,
    pub end: Point,
}

impl LineSegment {
    pub fn length(&self) -> f32 {
        self.start.distance(self.end)
    }
}

/// A bar of `width` running along `axis`, shaded from the anchor end to the
/// label end.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GradientBar {
    pub axis: LineSegment,
    pub width: f32,
}

impl GradientBar {
    /// Corners in drawing order: start-left, end-left, end-right, start-right.
    pub fn corners(&self) -> [Point; 4] {
        let LineSegment { start, end } = self.axis;
        let len = self.axis.length();
        let half = self.width * 0.5;
        let (nx, ny) = ((start.y - end.y) / len * half, (end.x - start.x) / len * half);
        [
            Point::new(start.x + nx, start.y + ny),
            Point::new(end.x + nx, end.y + ny),
            Point::new(end.x - nx, end.y - ny),
            Point::new(start.x - nx, start.y - ny),
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LeaderGeometry {
    /// Anchor and leader end coincide; only the text is drawn.
    Omitted,
    Line { segment: LineSegment, width: f32 },
    GradientBar(GradientBar),
}

/// Where and how one label is drawn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LabelPlacement {
    /// Start of the text baseline.
    pub text_origin: Point,
    pub rotation_degrees: f32,
    pub leader: LeaderGeometry,
}

/// Extent of a line of text around the start of its baseline, in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TextMetrics {
    /// Advance width of the whole line.
    pub width: f32,
    /// Distance from the baseline up to the top of the line.
    pub ascent: f32,
    /// Distance from the baseline down to the bottom of the line.
    pub descent: f32,
}

pub trait TextMeasure {
    fn measure(&self, text: &str, font_size: f32) -> TextMetrics;
}

const MIN_LEADER_LENGTH: f32 = 1e-3;
const HIT_PADDING: f32 = 4.0;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayoutEngine {
    config: LayoutConfig,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn default_label_position(&self, anchor: Point) -> Point {
        Point::new(anchor.x, anchor.y - self.config.label_offset)
    }

    /// Where a dragged label text ends up for a pointer at `pointer`.
    pub fn drag_target(&self, label: &Label, pointer: Point) -> Point {
        if self.config.constrain_horizontal_drag {
            Point::new(label.anchor().x, pointer.y)
        } else {
            pointer
        }
    }

    /// Text origin after applying the pinned baseline, if any.
    pub fn text_origin(&self, label_position: Point) -> Point {
        match self.config.pinned_label_y {
            Some(y) => Point::new(label_position.x, y),
            None => label_position,
        }
    }

    pub fn leader_line_geometry(&self, anchor: Point, label_position: Point) -> LeaderGeometry {
        let origin = self.text_origin(label_position);
        let segment = LineSegment {
            start: anchor,
            end: Point::new(origin.x, origin.y + self.config.baseline_drop),
        };
        let length = segment.length();
        if !length.is_finite() || length < MIN_LEADER_LENGTH {
            return LeaderGeometry::Omitted;
        }
        match self.config.leader_line_style {
            LeaderLineStyle::Line => LeaderGeometry::Line {
                segment,
                width: self.config.leader_width,
            },
            LeaderLineStyle::GradientBar => LeaderGeometry::GradientBar(GradientBar {
                axis: segment,
                width: self.config.leader_width,
            }),
        }
    }

    pub fn place(&self, label: &Label) -> LabelPlacement {
        LabelPlacement {
            text_origin: self.text_origin(label.label_position()),
            rotation_degrees: self.config.label_rotation_degrees,
            leader: self.leader_line_geometry(label.anchor(), label.label_position()),
        }
    }

    /// Whether `point` (image space) falls on the label's rotated text.
    pub fn text_hit(&self, label: &Label, point: Point, text: &impl TextMeasure) -> bool {
        let origin = self.text_origin(label.label_position());
        let (sin, cos) = self.config.label_rotation_degrees.to_radians().sin_cos();
        let (dx, dy) = (point.x - origin.x, point.y - origin.y);
        // Undo the text rotation so the box is axis-aligned on the baseline.
        let u = dx * cos + dy * sin;
        let v = -dx * sin + dy * cos;

        let m = text.measure(label.name(), self.config.font_size);
        (-HIT_PADDING..=m.width + HIT_PADDING).contains(&u)
            && (-m.ascent - HIT_PADDING..=m.descent + HIT_PADDING).contains(&v)
    }

    /// Topmost (last drawn) label whose text contains `point`.
    pub fn label_at(
        &self,
        labels: &LabelCollection,
        point: Point,
        text: &impl TextMeasure,
    ) -> Option<usize> {
        labels
            .iter()
            .enumerate()
            .rev()
            .find(|(_, label)| self.text_hit(label, point, text))
            .map(|(i, _)| i)
    }
}

/// Fixed-pitch metrics for tests that should not depend on a font file.
#[cfg(test)]
pub struct FixedPitch;

#[cfg(test)]
impl TextMeasure for FixedPitch {
    fn measure(&self, text: &str, font_size: f32) -> TextMetrics {
        TextMetrics {
            width: text.chars().count() as f32 * font_size * 0.6,
            ascent: font_size * 0.8,
            descent: font_size * 0.25,
        }
    }
}
