//! Interaction state machine driving the label collection.
//!
//! The controller owns the only [`LabelCollection`] and swaps it wholesale on
//! every committed change, saving each new value right after the swap.
//! Name prompts and removal confirmations are raised as [`PendingPrompt`]s
//! and resumed through [`AnnotationController::resolve_name`] and
//! [`AnnotationController::resolve_confirm`]; declining either is a no-op.

use std::sync::Arc;

use crate::coords::{CoordinateMapper, Point};
use crate::error::{Error, Result};
use crate::labels::{LabelCollection, LabelId};
use crate::layout::{LayoutEngine, TextMeasure};
use crate::storage::LabelStorage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interaction {
    Idle,
    Dragging { index: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub enum NameRequest {
    Create { anchor: Point },
    Rename { id: LabelId, current: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum PendingPrompt {
    Name(NameRequest),
    ConfirmRemove { id: LabelId, name: String },
}

impl PendingPrompt {
    /// Text shown to the user for this prompt.
    pub fn message(&self) -> String {
        match self {
            PendingPrompt::Name(NameRequest::Create { .. }) => "Name".to_string(),
            PendingPrompt::Name(NameRequest::Rename { current, .. }) => {
                format!("Rename \"{current}\"")
            }
            PendingPrompt::ConfirmRemove { name, .. } => format!("Delete label \"{name}\"?"),
        }
    }
}

pub struct AnnotationController<S: LabelStorage> {
    image_key: String,
    labels: Arc<LabelCollection>,
    layout: LayoutEngine,
    storage: S,
    interaction: Interaction,
    pending: Option<PendingPrompt>,
}

impl<S: LabelStorage> AnnotationController<S> {
    pub fn new(image_key: impl Into<String>, layout: LayoutEngine, storage: S) -> Self {
        let image_key = image_key.into();
        let labels = storage.load(&image_key);
        Self {
            image_key,
            labels: Arc::new(labels),
            layout,
            storage,
            interaction: Interaction::Idle,
            pending: None,
        }
    }

    /// Read-only view of the current labels, safe to hand to other threads.
    pub fn snapshot(&self) -> Arc<LabelCollection> {
        Arc::clone(&self.labels)
    }

    pub fn labels(&self) -> &LabelCollection {
        &self.labels
    }

    pub fn layout(&self) -> &LayoutEngine {
        &self.layout
    }

    #[cfg(test)]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn interaction(&self) -> Interaction {
        self.interaction
    }

    pub fn pending(&self) -> Option<&PendingPrompt> {
        self.pending.as_ref()
    }

    fn commit(&mut self, labels: LabelCollection) {
        self.labels = Arc::new(labels);
        if let Err(e) = self.storage.save(&self.image_key, &self.labels) {
            log::warn!("Failed to save labels for {}: {}", self.image_key, e);
        }
    }

    fn apply(&mut self, result: Result<LabelCollection>) {
        match result {
            Ok(labels) => self.commit(labels),
            Err(Error::EmptyNameRejected) => log::debug!("Empty label name, nothing changed"),
            Err(e @ Error::IndexOutOfRange { .. }) => {
                log::error!("{e}");
                debug_assert!(false, "{e}");
            }
            Err(e) => log::warn!("Label update failed: {e}"),
        }
    }

    fn report_missing(&self, index: usize) {
        let e = Error::IndexOutOfRange {
            index,
            len: self.labels.len(),
        };
        log::error!("{e}");
        debug_assert!(false, "{e}");
    }

    /// Press at a viewport position: grabs the label text under the pointer,
    /// otherwise asks for a name if the press landed on the image.
    pub fn pointer_down_at(
        &mut self,
        viewport: Point,
        mapper: &CoordinateMapper,
        text: &impl TextMeasure,
    ) {
        let point = match mapper.to_image_space(viewport) {
            Ok(point) => point,
            Err(e) => {
                log::warn!("Ignoring press: {e}");
                return;
            }
        };
        if let Some(index) = self.layout.label_at(&self.labels, point, text) {
            self.pointer_down_on_label(index);
        } else if mapper.contains(point) {
            self.pointer_down_on_image(point);
        }
    }

    /// Index of the label whose text is under a viewport position.
    pub fn label_at(
        &self,
        viewport: Point,
        mapper: &CoordinateMapper,
        text: &impl TextMeasure,
    ) -> Option<usize> {
        let point = mapper.to_image_space(viewport).ok()?;
        self.layout.label_at(&self.labels, point, text)
    }

    /// Pointer moved to a viewport position.
    pub fn pointer_move_at(&mut self, viewport: Point, mapper: &CoordinateMapper) {
        if self.interaction == Interaction::Idle {
            return;
        }
        match mapper.to_image_space(viewport) {
            Ok(point) => self.pointer_move(point),
            Err(e) => log::warn!("Ignoring move: {e}"),
        }
    }

    /// Press on the image at an image-space point.
    pub fn pointer_down_on_image(&mut self, point: Point) {
        if self.interaction != Interaction::Idle || self.pending.is_some() {
            return;
        }
        self.pending = Some(PendingPrompt::Name(NameRequest::Create { anchor: point }));
    }

    pub fn pointer_down_on_label(&mut self, index: usize) {
        if self.interaction != Interaction::Idle || self.pending.is_some() {
            return;
        }
        if index < self.labels.len() {
            log::debug!("Dragging label {index}");
            self.interaction = Interaction::Dragging { index };
        } else {
            self.report_missing(index);
        }
    }

    /// Pointer moved to an image-space point.
    pub fn pointer_move(&mut self, point: Point) {
        let Interaction::Dragging { index } = self.interaction else {
            return;
        };
        let Some(label) = self.labels.get(index) else {
            self.interaction = Interaction::Idle;
            self.report_missing(index);
            return;
        };
        let target = self.layout.drag_target(label, point);
        log::trace!("Label {index} -> ({:.1}, {:.1})", target.x, target.y);
        let result = self.labels.reposition(index, target);
        self.apply(result);
    }

    pub fn pointer_up(&mut self) {
        if let Interaction::Dragging { index } = self.interaction {
            log::debug!("Dropped label {index}");
        }
        self.interaction = Interaction::Idle;
    }

    /// Ask for a new name for label `index`. Returns whether the rename
    /// prompt was raised; it is not while another prompt is open.
    pub fn request_edit(&mut self, index: usize) -> bool {
        if self.pending.is_some() {
            return false;
        }
        match self.labels.get(index) {
            Some(label) => {
                self.pending = Some(PendingPrompt::Name(NameRequest::Rename {
                    id: label.id(),
                    current: label.name().to_string(),
                }));
                true
            }
            None => {
                self.report_missing(index);
                false
            }
        }
    }

    pub fn request_remove(&mut self, index: usize) {
        if self.pending.is_some() {
            return;
        }
        match self.labels.get(index) {
            Some(label) => {
                self.pending = Some(PendingPrompt::ConfirmRemove {
                    id: label.id(),
                    name: label.name().to_string(),
                });
            }
            None => self.report_missing(index),
        }
    }

    /// Answer a pending name prompt; `None` means the user cancelled.
    pub fn resolve_name(&mut self, answer: Option<String>) {
        let request = match self.pending.take() {
            Some(PendingPrompt::Name(request)) => request,
            other => {
                log::debug!("No name prompt pending");
                self.pending = other;
                return;
            }
        };
        let Some(name) = answer else {
            log::debug!("Name prompt cancelled");
            return;
        };
        match request {
            NameRequest::Create { anchor } => {
                let result = self.labels.add(anchor, &name, &self.layout);
                if result.is_ok() {
                    log::debug!("Added label \"{}\"", name.trim());
                }
                self.apply(result);
            }
            NameRequest::Rename { id, .. } => match self.labels.index_of(id) {
                Some(index) => {
                    let result = self.labels.rename(index, &name);
                    self.apply(result);
                }
                None => log::debug!("Label to rename no longer exists"),
            },
        }
    }

    /// Answer a pending removal confirmation.
    pub fn resolve_confirm(&mut self, confirmed: bool) {
        let (id, name) = match self.pending.take() {
            Some(PendingPrompt::ConfirmRemove { id, name }) => (id, name),
            other => {
                log::debug!("No confirmation pending");
                self.pending = other;
                return;
            }
        };
        if !confirmed {
            return;
        }
        let Some(index) = self.labels.index_of(id) else {
            log::debug!("Label \"{name}\" already gone");
            return;
        };
        // The dragged index would shift under a removal.
        self.interaction = Interaction::Idle;
        let result = self.labels.remove(index);
        if result.is_ok() {
            log::debug!("Removed label \"{name}\"");
        }
        self.apply(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{FixedPitch, LayoutConfig};
    use crate::storage::MemoryStorage;

    const KEY: &str = "/images/Eldorado.jpg";

    fn controller() -> AnnotationController<MemoryStorage> {
        AnnotationController::new(KEY, LayoutEngine::default(), MemoryStorage::new())
    }

    fn mapper() -> CoordinateMapper {
        // Image shown at half size, top-left at (50, 50).
        let natural = (1000.0, 800.0);
        CoordinateMapper::from_display_rect(Point::new(50.0, 50.0), (500.0, 400.0), natural)
    }

    fn with_label(name: &str, anchor: Point) -> AnnotationController<MemoryStorage> {
        let mut c = controller();
        c.pointer_down_on_image(anchor);
        c.resolve_name(Some(name.to_string()));
        c
    }

    #[test]
    fn click_then_name_adds_label_and_saves() {
        let mut c = controller();
        c.pointer_down_at(Point::new(100.0, 150.0), &mapper(), &FixedPitch);
        assert_eq!(
            c.pending(),
            Some(&PendingPrompt::Name(NameRequest::Create {
                anchor: Point::new(100.0, 200.0)
            }))
        );
        c.resolve_name(Some("Peak".to_string()));

        assert!(c.pending().is_none());
        assert_eq!(c.interaction(), Interaction::Idle);
        assert_eq!(c.labels().len(), 1);
        let label = c.labels().get(0).unwrap();
        assert_eq!(label.anchor(), Point::new(100.0, 200.0));
        assert_eq!(label.label_position(), Point::new(100.0, -100.0));
        assert_eq!(c.storage().saved_count(KEY), Some(1));
    }

    #[test]
    fn cancelled_or_empty_name_changes_nothing() {
        let mut c = controller();
        c.pointer_down_on_image(Point::new(1.0, 1.0));
        c.resolve_name(None);
        c.pointer_down_on_image(Point::new(1.0, 1.0));
        c.resolve_name(Some(String::new()));
        assert!(c.labels().is_empty());
        assert!(c.pending().is_none());
        assert_eq!(c.storage().saved_count(KEY), None);
    }

    #[test]
    fn press_outside_image_is_ignored() {
        let mut c = controller();
        c.pointer_down_at(Point::new(10.0, 10.0), &mapper(), &FixedPitch);
        assert!(c.pending().is_none());
    }

    #[test]
    fn press_before_layout_is_ignored() {
        let mut c = controller();
        let unlaid =
            CoordinateMapper::from_display_rect(Point::default(), (0.0, 0.0), (1000.0, 800.0));
        c.pointer_down_at(Point::new(100.0, 100.0), &unlaid, &FixedPitch);
        assert!(c.pending().is_none());
    }

    #[test]
    fn drag_moves_text_and_keeps_anchor() {
        let mut c = with_label("Peak", Point::new(100.0, 500.0));
        // Text baseline starts at image (100, 200) -> viewport (100, 150).
        c.pointer_down_at(Point::new(105.0, 145.0), &mapper(), &FixedPitch);
        assert_eq!(c.interaction(), Interaction::Dragging { index: 0 });
        assert!(c.pending().is_none());

        c.pointer_move_at(Point::new(75.0, 75.0), &mapper());
        c.pointer_move_at(Point::new(300.0, 60.0), &mapper());
        let label = c.labels().get(0).unwrap();
        assert_eq!(label.label_position(), Point::new(500.0, 20.0));
        assert_eq!(label.anchor(), Point::new(100.0, 500.0));

        c.pointer_up();
        assert_eq!(c.interaction(), Interaction::Idle);
        let dropped = c.snapshot();
        c.pointer_move_at(Point::new(0.0, 0.0), &mapper());
        assert!(Arc::ptr_eq(&dropped, &c.snapshot()));
        assert_eq!(c.storage().load(KEY), *c.snapshot());
    }

    #[test]
    fn constrained_drag_is_vertical_only() {
        let layout = LayoutEngine::new(LayoutConfig {
            constrain_horizontal_drag: true,
            ..Default::default()
        });
        let mut c = AnnotationController::new(KEY, layout, MemoryStorage::new());
        c.pointer_down_on_image(Point::new(100.0, 500.0));
        c.resolve_name(Some("Peak".to_string()));
        c.pointer_down_on_label(0);
        c.pointer_move(Point::new(400.0, 50.0));
        assert_eq!(
            c.labels().get(0).unwrap().label_position(),
            Point::new(100.0, 50.0)
        );
    }

    #[test]
    fn move_while_idle_is_a_no_op() {
        let mut c = with_label("Peak", Point::new(100.0, 500.0));
        let before = c.snapshot();
        c.pointer_move(Point::new(0.0, 0.0));
        assert!(Arc::ptr_eq(&before, &c.snapshot()));
    }

    #[test]
    fn edit_renames_in_place() {
        let mut c = with_label("Peak", Point::new(100.0, 500.0));
        assert!(c.request_edit(0));
        assert_eq!(
            c.pending().map(PendingPrompt::message).as_deref(),
            Some("Rename \"Peak\"")
        );
        c.resolve_name(Some("Eldorado".to_string()));
        let label = c.labels().get(0).unwrap();
        assert_eq!(label.name(), "Eldorado");
        assert_eq!(label.anchor(), Point::new(100.0, 500.0));
    }

    #[test]
    fn remove_requires_confirmation() {
        let mut c = with_label("Peak", Point::new(100.0, 500.0));
        c.request_remove(0);
        assert_eq!(
            c.pending().map(PendingPrompt::message).as_deref(),
            Some("Delete label \"Peak\"?")
        );
        c.resolve_confirm(false);
        assert_eq!(c.labels().len(), 1);

        c.request_remove(0);
        c.resolve_confirm(true);
        assert!(c.labels().is_empty());
        assert_eq!(c.storage().saved_count(KEY), Some(0));
    }

    #[test]
    fn prompts_follow_the_label_not_the_index() {
        let mut c = with_label("First", Point::new(10.0, 500.0));
        c.pointer_down_on_image(Point::new(20.0, 500.0));
        c.resolve_name(Some("Second".to_string()));

        c.request_edit(1);
        // Simulate the first label vanishing before the prompt is answered.
        let shifted = c.labels().remove(0).unwrap();
        c.commit(shifted);
        c.resolve_name(Some("Renamed".to_string()));

        assert_eq!(c.labels().len(), 1);
        assert_eq!(c.labels().get(0).unwrap().name(), "Renamed");
    }

    #[test]
    fn one_prompt_at_a_time() {
        let mut c = with_label("Peak", Point::new(100.0, 500.0));
        c.request_remove(0);
        c.pointer_down_on_image(Point::new(1.0, 1.0));
        assert!(!c.request_edit(0));
        assert!(matches!(c.pending(), Some(PendingPrompt::ConfirmRemove { .. })));
        // A stray name answer does not consume the confirmation.
        c.resolve_name(Some("x".to_string()));
        assert!(matches!(c.pending(), Some(PendingPrompt::ConfirmRemove { .. })));
        assert_eq!(c.labels().get(0).unwrap().name(), "Peak");
        c.resolve_confirm(true);
        assert!(c.labels().is_empty());
    }

    #[test]
    fn loads_existing_labels_on_start() {
        let storage = MemoryStorage::new();
        storage.insert_raw(KEY, r#"[{"name":"Old","x":1,"y":2,"labelX":3,"labelY":4}]"#);
        let c = AnnotationController::new(KEY, LayoutEngine::default(), storage);
        assert_eq!(c.labels().get(0).unwrap().name(), "Old");
    }

    #[test]
    fn corrupt_storage_starts_empty() {
        let storage = MemoryStorage::new();
        storage.insert_raw(KEY, "garbage");
        let c = AnnotationController::new(KEY, LayoutEngine::default(), storage);
        assert!(c.labels().is_empty());
    }
}
