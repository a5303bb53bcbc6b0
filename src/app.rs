use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use eframe::egui;
use egui_extras::{Column, TableBuilder};

use crate::asset::{ImageAsset, ImageLoader, LoadState, PendingImage};
use crate::config::AppConfig;
use crate::controller::{AnnotationController, Interaction, PendingPrompt};
use crate::coords::{CoordinateMapper, Point};
use crate::error;
use crate::export::Exporter;
use crate::layout::{LayoutEngine, LeaderGeometry, TextMeasure};
use crate::storage::{LabelStorage, SidecarStorage};
use crate::text::{install_label_family, load_font_bytes, LabelFont};

const LABEL_COLOR: egui::Color32 = egui::Color32::BLACK;
const ANCHOR_COLOR: egui::Color32 = egui::Color32::from_rgb(0, 120, 255);

// ── Label text ──────────────────────────────────────────────────────────────

/// The label font, as measured for hit-testing and export and as registered
/// with egui for the canvas.
struct LabelText {
    font: LabelFont,
    family: egui::FontFamily,
}

fn load_label_text(ctx: &egui::Context, path: Option<&Path>) -> error::Result<LabelText> {
    let read = |path: Option<&Path>| -> error::Result<(Vec<u8>, LabelFont)> {
        let bytes = load_font_bytes(path)?;
        let font = LabelFont::from_bytes(bytes.clone())?;
        Ok((bytes, font))
    };
    let (bytes, font) = match read(path) {
        Ok(loaded) => loaded,
        Err(e) if path.is_some() => {
            log::warn!("{e}; using the built-in font");
            read(None)?
        }
        Err(e) => return Err(e),
    };
    let family = install_label_family(ctx, bytes);
    Ok(LabelText { font, family })
}

/// Baseline of the first line of `galley`, relative to its top.
fn galley_baseline(galley: &egui::Galley) -> Option<f32> {
    galley
        .rows
        .first()
        .and_then(|row| row.glyphs.first())
        .map(|glyph| glyph.pos.y)
}

/// Top-left corner for a galley rotated by `angle` about that corner so that
/// its baseline starts at `origin`.
fn text_top_left(origin: egui::Pos2, baseline: f32, angle: f32) -> egui::Pos2 {
    let (sin, cos) = angle.sin_cos();
    origin + egui::vec2(baseline * sin, -baseline * cos)
}

/// Open the rename prompt for `index`, prefilling the input only when the
/// prompt was actually raised.
fn begin_edit<S: LabelStorage>(
    controller: &mut AnnotationController<S>,
    name_buf: &mut String,
    index: usize,
) {
    if controller.request_edit(index) {
        if let Some(label) = controller.labels().get(index) {
            *name_buf = label.name().to_string();
        }
    }
}

// ── Session ─────────────────────────────────────────────────────────────────

/// Everything that exists once the image has loaded.
struct Session {
    asset: Arc<ImageAsset>,
    texture: Option<egui::TextureHandle>,
    controller: AnnotationController<SidecarStorage>,
}

// ── App ─────────────────────────────────────────────────────────────────────

pub struct LabelApp {
    config: AppConfig,
    image_path: PathBuf,
    loader: PendingImage,
    text: Result<LabelText, String>,
    session: Option<Session>,

    // name prompt input
    name_buf: String,

    // pan & zoom
    pan: egui::Vec2,
    zoom: f32,
    panning: bool,
    fitted: bool,

    status: Option<String>,
    export_rx: Option<Receiver<Result<PathBuf, String>>>,
}

impl LabelApp {
    pub fn new(ctx: &egui::Context, image_path: PathBuf, config: AppConfig) -> Self {
        let loader = ImageLoader::spawn(image_path.clone());
        let text = load_label_text(ctx, config.font_path.as_deref()).map_err(|e| {
            log::error!("{e}");
            e.to_string()
        });
        Self {
            config,
            image_path,
            loader,
            text,
            session: None,
            name_buf: String::new(),
            pan: egui::Vec2::ZERO,
            zoom: 1.0,
            panning: false,
            fitted: false,
            status: None,
            export_rx: None,
        }
    }

    /// Picks up the loaded image. Returns false while the view is not ready.
    fn ensure_session(&mut self) -> bool {
        if self.session.is_some() {
            return true;
        }
        if self.text.is_err() {
            return false;
        }
        let LoadState::Ready(asset) = self.loader.poll() else {
            return false;
        };
        let asset = Arc::clone(asset);
        let controller = AnnotationController::new(
            asset.key(),
            LayoutEngine::new(self.config.layout.clone()),
            SidecarStorage,
        );
        self.session = Some(Session {
            asset,
            texture: None,
            controller,
        });
        true
    }

    fn image_size(&self) -> egui::Vec2 {
        self.session
            .as_ref()
            .map(|s| {
                let (w, h) = s.asset.natural_size();
                egui::vec2(w, h)
            })
            .unwrap_or(egui::Vec2::ZERO)
    }

    fn image_rect_on_screen(&self, canvas_rect: egui::Rect) -> egui::Rect {
        let size = self.image_size() * self.zoom;
        egui::Rect::from_center_size(canvas_rect.center() + self.pan, size)
    }

    fn mapper(&self, canvas_rect: egui::Rect) -> CoordinateMapper {
        let rect = self.image_rect_on_screen(canvas_rect);
        let natural = self.image_size();
        CoordinateMapper::from_display_rect(
            rect.min.into(),
            (rect.width(), rect.height()),
            (natural.x, natural.y),
        )
    }

    fn fit_to(&mut self, canvas_rect: egui::Rect) {
        let size = self.image_size();
        if self.fitted || size.x <= 0.0 || size.y <= 0.0 {
            return;
        }
        self.zoom = (canvas_rect.width() / size.x)
            .min(canvas_rect.height() / size.y)
            .min(1.0);
        self.fitted = true;
    }

    fn ensure_texture(session: &mut Session, ctx: &egui::Context) {
        if session.texture.is_some() {
            return;
        }
        let rgba = session.asset.pixels();
        let size = [rgba.width() as usize, rgba.height() as usize];
        let pixels = rgba.as_flat_samples();
        let color_image = egui::ColorImage::from_rgba_unmultiplied(size, pixels.as_slice());
        session.texture =
            Some(ctx.load_texture("image", color_image, egui::TextureOptions::LINEAR));
    }

    fn start_export(&mut self) {
        let (Some(session), Ok(text)) = (&self.session, &self.text) else {
            return;
        };
        if self.export_rx.is_some() {
            return;
        }
        let mut dialog = rfd::FileDialog::new()
            .set_file_name(&self.config.export_file_name)
            .add_filter("JPEG", &["jpeg", "jpg"]);
        if let Some(dir) = self.image_path.parent() {
            dialog = dialog.set_directory(dir);
        }
        let Some(out) = dialog.save_file() else {
            return;
        };

        let asset = Arc::clone(&session.asset);
        let labels = session.controller.snapshot();
        let exporter = Exporter::new(session.controller.layout().clone(), text.font.clone());
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = exporter
                .export_to_file(&asset, &labels, &out)
                .map(|()| out)
                .map_err(|e| e.to_string());
            let _ = tx.send(result);
        });
        self.export_rx = Some(rx);
        self.status = Some("Exporting…".to_string());
    }

    fn poll_export(&mut self) {
        let Some(rx) = &self.export_rx else {
            return;
        };
        match rx.try_recv() {
            Ok(Ok(path)) => {
                self.status = Some(format!("Saved {}", path.display()));
                self.export_rx = None;
            }
            Ok(Err(e)) => {
                log::error!("Export failed: {e}");
                self.status = Some(format!("Export failed: {e}"));
                self.export_rx = None;
            }
            Err(mpsc::TryRecvError::Empty) => {}
            Err(mpsc::TryRecvError::Disconnected) => {
                self.status = Some("Export failed".to_string());
                self.export_rx = None;
            }
        }
    }

    fn label_table(&mut self, ui: &mut egui::Ui) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let labels = session.controller.snapshot();
        let mut remove = None;
        let mut edit = None;

        if labels.is_empty() {
            ui.weak("Click the image to place a label.");
        }

        TableBuilder::new(ui)
            .striped(true)
            .column(Column::remainder().at_least(80.0))
            .column(Column::auto())
            .column(Column::auto())
            .header(20.0, |mut header| {
                header.col(|ui| {
                    ui.strong("Label");
                });
                header.col(|_| {});
                header.col(|_| {});
            })
            .body(|mut body| {
                for (index, label) in labels.iter().enumerate() {
                    body.row(20.0, |mut row| {
                        row.col(|ui| {
                            ui.label(label.name());
                        });
                        row.col(|ui| {
                            if ui.small_button("Remove").clicked() {
                                remove = Some(index);
                            }
                        });
                        row.col(|ui| {
                            if ui.small_button("Edit").clicked() {
                                edit = Some(index);
                            }
                        });
                    });
                }
            });

        if let Some(index) = remove {
            session.controller.request_remove(index);
        }
        if let Some(index) = edit {
            begin_edit(&mut session.controller, &mut self.name_buf, index);
        }
    }

    fn draw_labels(
        session: &Session,
        text: &LabelText,
        painter: &egui::Painter,
        mapper: &CoordinateMapper,
    ) {
        let layout = session.controller.layout();
        let scale = mapper.scale();
        let dragged = match session.controller.interaction() {
            Interaction::Dragging { index } => Some(index),
            Interaction::Idle => None,
        };

        for (i, label) in session.controller.labels().iter().enumerate() {
            let placement = layout.place(label);
            match placement.leader {
                LeaderGeometry::Omitted => {}
                LeaderGeometry::Line { segment, width } => {
                    painter.line_segment(
                        [
                            mapper.to_viewport(segment.start).into(),
                            mapper.to_viewport(segment.end).into(),
                        ],
                        egui::Stroke::new(width * scale, LABEL_COLOR),
                    );
                }
                LeaderGeometry::GradientBar(bar) => {
                    let [a, b, c, d] =
                        bar.corners().map(|p| egui::Pos2::from(mapper.to_viewport(p)));
                    let mut mesh = egui::Mesh::default();
                    mesh.colored_vertex(a, egui::Color32::TRANSPARENT);
                    mesh.colored_vertex(b, LABEL_COLOR);
                    mesh.colored_vertex(c, LABEL_COLOR);
                    mesh.colored_vertex(d, egui::Color32::TRANSPARENT);
                    mesh.add_triangle(0, 1, 2);
                    mesh.add_triangle(0, 2, 3);
                    painter.add(egui::Shape::mesh(mesh));
                }
            }

            let font_size = layout.config().font_size * scale;
            let galley = painter.layout_no_wrap(
                label.name().to_string(),
                egui::FontId::new(font_size, text.family.clone()),
                LABEL_COLOR,
            );
            let baseline = galley_baseline(&galley).unwrap_or_else(|| {
                text.font.measure(label.name(), layout.config().font_size).ascent * scale
            });
            let angle = placement.rotation_degrees.to_radians();
            let origin = egui::Pos2::from(mapper.to_viewport(placement.text_origin));
            let top_left = text_top_left(origin, baseline, angle);
            painter.add(
                egui::epaint::TextShape::new(top_left, galley, LABEL_COLOR).with_angle(angle),
            );

            if dragged == Some(i) {
                let anchor = mapper.to_viewport(label.anchor());
                painter.circle_filled(anchor.into(), 4.0, ANCHOR_COLOR);
            }
        }
    }

    fn name_prompt(&mut self, ctx: &egui::Context) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(prompt) = session
            .controller
            .pending()
            .filter(|p| matches!(p, PendingPrompt::Name(_)))
        else {
            return;
        };
        let message = prompt.message();
        let name_buf = &mut self.name_buf;
        let mut answer: Option<Option<String>> = None;

        egui::Window::new("Label")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(message);
                let te = ui.text_edit_singleline(name_buf);
                let enter = te.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                if !te.lost_focus() {
                    te.request_focus();
                }
                ui.horizontal(|ui| {
                    if ui.button("OK").clicked() || enter {
                        answer = Some(Some(name_buf.clone()));
                    }
                    let escape = ui.input(|i| i.key_pressed(egui::Key::Escape));
                    if ui.button("Cancel").clicked() || escape {
                        answer = Some(None);
                    }
                });
            });

        if let Some(answer) = answer {
            session.controller.resolve_name(answer);
            self.name_buf.clear();
        }
    }

    fn confirm_prompt(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(prompt) = session
            .controller
            .pending()
            .filter(|p| matches!(p, PendingPrompt::ConfirmRemove { .. }))
        else {
            return;
        };
        let confirmed = rfd::MessageDialog::new()
            .set_level(rfd::MessageLevel::Warning)
            .set_title("Remove label")
            .set_description(prompt.message())
            .set_buttons(rfd::MessageButtons::YesNo)
            .show()
            == rfd::MessageDialogResult::Yes;
        session.controller.resolve_confirm(confirmed);
    }

    fn canvas(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        let (response, painter) =
            ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        let canvas_rect = response.rect;
        painter.rect_filled(canvas_rect, 0.0, egui::Color32::from_gray(40));

        self.fit_to(canvas_rect);
        let img_rect = self.image_rect_on_screen(canvas_rect);
        let mapper = self.mapper(canvas_rect);

        let (Some(session), Ok(text)) = (self.session.as_mut(), &self.text) else {
            return;
        };
        Self::ensure_texture(session, ctx);
        if let Some(ref tex) = session.texture {
            painter.image(
                tex.id(),
                img_rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE,
            );
        }
        Self::draw_labels(session, text, &painter, &mapper);

        // Handle pan (middle mouse button)
        let middle_down = ctx.input(|i| i.pointer.middle_down());
        if middle_down {
            self.pan += ctx.input(|i| i.pointer.delta());
            self.panning = true;
        } else {
            self.panning = false;
        }

        // Handle zoom (scroll wheel)
        let scroll_delta = ctx.input(|i| i.smooth_scroll_delta.y);
        if scroll_delta != 0.0 && response.hovered() {
            let zoom_factor = 1.0 + scroll_delta * 0.002;
            let new_zoom = (self.zoom * zoom_factor).clamp(0.02, 10.0);
            if let Some(cursor) = response.hover_pos() {
                let cursor_rel = cursor - canvas_rect.center() - self.pan;
                self.pan -= cursor_rel * (new_zoom / self.zoom - 1.0);
            }
            self.zoom = new_zoom;
        }

        if self.panning {
            return;
        }
        let controller = &mut session.controller;

        if response.drag_started_by(egui::PointerButton::Primary) {
            let origin = ctx
                .input(|i| i.pointer.press_origin())
                .or(response.interact_pointer_pos());
            let hit = origin.and_then(|pos| {
                controller.label_at(pos.into(), &mapper, &text.font)
            });
            if let Some(index) = hit {
                controller.pointer_down_on_label(index);
            }
        }
        if response.dragged_by(egui::PointerButton::Primary) {
            if let Some(pos) = response.interact_pointer_pos() {
                controller.pointer_move_at(pos.into(), &mapper);
            }
        }
        if response.drag_stopped_by(egui::PointerButton::Primary) {
            controller.pointer_up();
        }
        if response.clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                controller.pointer_down_at(Point::from(pos), &mapper, &text.font);
                controller.pointer_up();
            }
        }
    }
}

// ── eframe App impl ────────────────────────────────────────────────────────

impl eframe::App for LabelApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.ensure_session() {
            let notice = match (&self.text, self.loader.poll()) {
                (Err(e), _) => format!("No usable label font: {e}"),
                (_, LoadState::Failed(e)) => {
                    format!("Could not load {}: {}", self.image_path.display(), e)
                }
                _ => {
                    ctx.request_repaint_after(Duration::from_millis(50));
                    "Loading…".to_string()
                }
            };
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.centered_and_justified(|ui| ui.label(notice));
            });
            return;
        }

        self.poll_export();
        if self.export_rx.is_some() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        if ctx.input(|i| i.modifiers.command && i.key_pressed(egui::Key::S)) {
            self.start_export();
        }

        // Top toolbar
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("Download").clicked() {
                    self.start_export();
                }
                ui.separator();
                ui.label(format!("Zoom: {:.0}%", self.zoom * 100.0));
                if let Some(status) = &self.status {
                    ui.separator();
                    ui.label(status);
                }
            });
        });

        egui::SidePanel::left("labels")
            .resizable(true)
            .default_width(220.0)
            .show(ctx, |ui| self.label_table(ui));

        egui::CentralPanel::default().show(ctx, |ui| self.canvas(ctx, ui));

        self.name_prompt(ctx);
        self.confirm_prompt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelCollection;
    use crate::layout::LayoutConfig;
    use crate::storage::MemoryStorage;
    use image::{Rgba, RgbaImage};

    fn controller_with(names: &[&str]) -> AnnotationController<MemoryStorage> {
        let mut c =
            AnnotationController::new("a.jpg", LayoutEngine::default(), MemoryStorage::new());
        for (i, name) in names.iter().enumerate() {
            c.pointer_down_on_image(Point::new(10.0 * i as f32, 500.0));
            c.resolve_name(Some(name.to_string()));
        }
        c
    }

    #[test]
    fn edit_prefills_the_current_name() {
        let mut c = controller_with(&["Peak"]);
        let mut name_buf = String::new();
        begin_edit(&mut c, &mut name_buf, 0);
        assert_eq!(name_buf, "Peak");
        assert!(matches!(c.pending(), Some(PendingPrompt::Name(_))));
    }

    #[test]
    fn edit_keeps_a_half_typed_name_while_another_prompt_is_open() {
        let mut c = controller_with(&["Peak"]);
        c.pointer_down_on_image(Point::new(5.0, 5.0));
        let mut name_buf = "Ai".to_string();
        begin_edit(&mut c, &mut name_buf, 0);
        assert_eq!(name_buf, "Ai");
        c.resolve_name(Some(name_buf));
        assert_eq!(c.labels().len(), 2);
        assert_eq!(c.labels().get(0).unwrap().name(), "Peak");
        assert_eq!(c.labels().get(1).unwrap().name(), "Ai");
    }

    #[test]
    fn rotated_galley_puts_baseline_start_on_origin() {
        let origin = egui::pos2(100.0, -100.0);
        let (baseline, angle) = (75.0, (-45.0f32).to_radians());
        let top_left = text_top_left(origin, baseline, angle);
        // Galley-local (0, baseline) rotated about the top-left.
        let (sin, cos) = angle.sin_cos();
        let start = top_left + egui::vec2(-baseline * sin, baseline * cos);
        assert!((start - origin).length() < 1e-3);
    }

    #[test]
    fn canvas_text_sits_on_the_exported_baseline() {
        let ctx = egui::Context::default();
        let text = load_label_text(&ctx, None).unwrap();
        let origin = egui::pos2(100.0, 200.0);
        let mut canvas_bottom = None;
        let _ = ctx.run(egui::RawInput::default(), |ctx| {
            let galley = ctx.fonts(|f| {
                f.layout_no_wrap(
                    "PEAK".to_string(),
                    egui::FontId::new(80.0, text.family.clone()),
                    LABEL_COLOR,
                )
            });
            let baseline = galley_baseline(&galley).unwrap();
            let top_left = text_top_left(origin, baseline, 0.0);
            canvas_bottom = galley
                .rows
                .iter()
                .flat_map(|row| row.visuals.mesh.vertices.iter())
                .map(|v| top_left.y + v.pos.y)
                .reduce(f32::max);
        });
        let canvas_bottom = canvas_bottom.unwrap();

        let layout = LayoutEngine::new(LayoutConfig {
            label_rotation_degrees: 0.0,
            ..Default::default()
        });
        let labels = LabelCollection::new()
            .add(Point::new(100.0, 500.0), "PEAK", &layout)
            .unwrap();
        let placement = layout.place(labels.get(0).unwrap());
        assert_eq!(placement.text_origin, Point::new(100.0, 200.0));
        let white = RgbaImage::from_pixel(400, 300, Rgba([255, 255, 255, 255]));
        let asset = ImageAsset::from_pixels("white.png", white);
        let out = Exporter::new(layout, text.font.clone())
            .render(&asset, &labels)
            .unwrap();
        // Capitals only: the lowest inked row is the baseline. Skip the leader at x = 100.
        let export_bottom = (0..240u32)
            .filter(|&y| (106..400).any(|x| out.get_pixel(x, y).0[0] < 128))
            .max()
            .unwrap() as f32
            + 1.0;

        assert!(
            (canvas_bottom - export_bottom).abs() <= 2.0,
            "canvas text ends at {canvas_bottom}, export at {export_bottom}"
        );
        assert!((export_bottom - origin.y).abs() <= 2.0);
    }
}
