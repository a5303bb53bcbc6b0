//! Label records and the ordered, replace-on-write label collection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::coords::Point;
use crate::error::{Error, Result};
use crate::layout::LayoutEngine;

/// Opaque label identity. Survives index shifts caused by removals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelId(u64);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LabelRecord", into = "LabelRecord")]
pub struct Label {
    id: LabelId,
    name: String,
    anchor: Point,
    label_position: Point,
}

impl Label {
    pub fn id(&self) -> LabelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the label was placed. Never changes after creation.
    pub fn anchor(&self) -> Point {
        self.anchor
    }

    /// Where the label text is drawn.
    pub fn label_position(&self) -> Point {
        self.label_position
    }
}

// On-disk shape: one flat object per label.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct LabelRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    name: String,
    x: f32,
    y: f32,
    #[serde(rename = "labelX")]
    label_x: f32,
    #[serde(rename = "labelY")]
    label_y: f32,
}

// Records without a usable id get a placeholder that
// `LabelCollection::from_labels` replaces with a fresh one.
const MISSING_ID: LabelId = LabelId(u64::MAX);

// Stored ids above this are reassigned, so fresh ids never reach the placeholder.
const MAX_STORED_ID: u64 = u64::MAX / 2;

impl TryFrom<LabelRecord> for Label {
    type Error = Error;

    fn try_from(r: LabelRecord) -> Result<Self> {
        Ok(Self {
            id: r
                .id
                .filter(|id| *id <= MAX_STORED_ID)
                .map_or(MISSING_ID, LabelId),
            name: validate_name(&r.name)?,
            anchor: Point::new(r.x, r.y),
            label_position: Point::new(r.label_x, r.label_y),
        })
    }
}

impl From<Label> for LabelRecord {
    fn from(l: Label) -> Self {
        Self {
            id: Some(l.id.0),
            name: l.name,
            x: l.anchor.x,
            y: l.anchor.y,
            label_x: l.label_position.x,
            label_y: l.label_position.y,
        }
    }
}

/// Trim a user-entered name, rejecting it if nothing is left.
pub fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(Error::EmptyNameRejected)
    } else {
        Ok(trimmed.to_string())
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Ordered labels in insertion order. Every operation returns a new
/// collection and leaves `self` untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<LabelRecord>", into = "Vec<Label>")]
pub struct LabelCollection {
    labels: Vec<Label>,
}

// Stored records with a blank name are dropped; the rest still load.
impl From<Vec<LabelRecord>> for LabelCollection {
    fn from(records: Vec<LabelRecord>) -> Self {
        let labels = records
            .into_iter()
            .filter_map(|record| match Label::try_from(record) {
                Ok(label) => Some(label),
                Err(e) => {
                    log::warn!("Skipping stored label: {e}");
                    None
                }
            })
            .collect();
        Self::from_labels(labels)
    }
}

impl From<LabelCollection> for Vec<Label> {
    fn from(c: LabelCollection) -> Self {
        c.labels
    }
}

impl LabelCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt labels from storage, giving fresh ids to any that lack one or
    /// repeat an id already seen.
    pub fn from_labels(mut labels: Vec<Label>) -> Self {
        let mut seen = HashSet::new();
        let max = labels
            .iter()
            .map(|l| l.id)
            .filter(|id| *id != MISSING_ID)
            .max()
            .map_or(0, |id| id.0 + 1);
        NEXT_ID.fetch_max(max, Ordering::Relaxed);
        for label in &mut labels {
            if label.id == MISSING_ID || !seen.insert(label.id) {
                label.id = Self::fresh_id();
                seen.insert(label.id);
            }
        }
        Self { labels }
    }

    fn fresh_id() -> LabelId {
        LabelId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Label> {
        self.labels.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.labels.iter()
    }

    pub fn index_of(&self, id: LabelId) -> Option<usize> {
        self.labels.iter().position(|l| l.id == id)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.labels.len() {
            Ok(())
        } else {
            Err(Error::IndexOutOfRange {
                index,
                len: self.labels.len(),
            })
        }
    }

    /// Append a label at `anchor`, its text placed at the layout's default offset.
    pub fn add(&self, anchor: Point, name: &str, layout: &LayoutEngine) -> Result<Self> {
        let name = validate_name(name)?;
        let mut labels = self.labels.clone();
        labels.push(Label {
            id: Self::fresh_id(),
            name,
            anchor,
            label_position: layout.default_label_position(anchor),
        });
        Ok(Self { labels })
    }

    pub fn rename(&self, index: usize, name: &str) -> Result<Self> {
        let name = validate_name(name)?;
        self.check_index(index)?;
        let mut labels = self.labels.clone();
        labels[index].name = name;
        Ok(Self { labels })
    }

    pub fn remove(&self, index: usize) -> Result<Self> {
        self.check_index(index)?;
        let mut labels = self.labels.clone();
        labels.remove(index);
        Ok(Self { labels })
    }

    /// Move the label text. The anchor stays where it was.
    pub fn reposition(&self, index: usize, label_position: Point) -> Result<Self> {
        self.check_index(index)?;
        let mut labels = self.labels.clone();
        labels[index].label_position = label_position;
        Ok(Self { labels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutConfig;

    fn layout() -> LayoutEngine {
        LayoutEngine::new(LayoutConfig::default())
    }

    fn sample() -> LabelCollection {
        let layout = layout();
        LabelCollection::new()
            .add(Point::new(10.0, 400.0), "North", &layout)
            .unwrap()
            .add(Point::new(600.0, 420.0), "South", &layout)
            .unwrap()
    }

    #[test]
    fn peak_scenario() {
        let layout = layout();
        let c = LabelCollection::new()
            .add(Point::new(100.0, 200.0), "Peak", &layout)
            .unwrap();
        assert_eq!(c.len(), 1);
        let label = c.get(0).unwrap();
        assert_eq!(label.name(), "Peak");
        assert_eq!(label.anchor(), Point::new(100.0, 200.0));
        assert_eq!(label.label_position(), Point::new(100.0, -100.0));

        let c = c.reposition(0, Point::new(50.0, -100.0)).unwrap();
        let label = c.get(0).unwrap();
        assert_eq!(label.anchor(), Point::new(100.0, 200.0));
        assert_eq!(label.label_position(), Point::new(50.0, -100.0));

        let c = c.remove(0).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn empty_name_never_changes_length() {
        let c = sample();
        for name in ["", "   ", "\t\n"] {
            assert!(matches!(
                c.add(Point::new(1.0, 1.0), name, &layout()),
                Err(Error::EmptyNameRejected)
            ));
        }
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn names_are_trimmed() {
        let c = LabelCollection::new()
            .add(Point::new(0.0, 0.0), "  Ridge ", &layout())
            .unwrap();
        assert_eq!(c.get(0).unwrap().name(), "Ridge");
    }

    #[test]
    fn rename_is_idempotent() {
        let c = sample();
        let once = c.rename(1, "Col").unwrap();
        let twice = once.rename(1, "Col").unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.get(1).unwrap().name(), "Col");
    }

    #[test]
    fn rename_keeps_geometry_and_rejects_empty() {
        let c = sample();
        let renamed = c.rename(0, "Summit").unwrap();
        assert_eq!(renamed.get(0).unwrap().anchor(), c.get(0).unwrap().anchor());
        assert_eq!(
            renamed.get(0).unwrap().label_position(),
            c.get(0).unwrap().label_position()
        );
        assert!(matches!(c.rename(0, ""), Err(Error::EmptyNameRejected)));
    }

    #[test]
    fn anchors_survive_any_edit_sequence() {
        let original = sample();
        let anchors: Vec<Point> = original.iter().map(Label::anchor).collect();
        let edited = original
            .reposition(0, Point::new(-50.0, 9000.0))
            .and_then(|c| c.rename(1, "Other"))
            .and_then(|c| c.reposition(1, Point::new(3.0, 3.0)))
            .and_then(|c| c.rename(0, "Again"))
            .unwrap();
        let after: Vec<Point> = edited.iter().map(Label::anchor).collect();
        assert_eq!(anchors, after);
    }

    #[test]
    fn index_equal_to_len_is_out_of_range() {
        let c = sample();
        let before = c.clone();
        assert!(matches!(
            c.remove(2),
            Err(Error::IndexOutOfRange { index: 2, len: 2 })
        ));
        assert!(matches!(c.rename(2, "x"), Err(Error::IndexOutOfRange { .. })));
        assert!(matches!(
            c.reposition(2, Point::new(0.0, 0.0)),
            Err(Error::IndexOutOfRange { .. })
        ));
        assert_eq!(c, before);
    }

    #[test]
    fn operations_leave_the_source_untouched() {
        let c = sample();
        let before = c.clone();
        let _ = c.remove(0).unwrap();
        let _ = c.reposition(1, Point::new(0.0, 0.0)).unwrap();
        assert_eq!(c, before);
    }

    #[test]
    fn ids_stay_unique_and_follow_labels() {
        let c = sample().add(Point::new(5.0, 5.0), "Third", &layout()).unwrap();
        let third = c.get(2).unwrap().id();
        let c = c.remove(0).unwrap();
        assert_eq!(c.index_of(third), Some(1));
        let ids: HashSet<LabelId> = c.iter().map(Label::id).collect();
        assert_eq!(ids.len(), c.len());
    }

    #[test]
    fn parses_records_without_ids() {
        let json = r#"[
            {"name":"A","x":1,"y":2,"labelX":1,"labelY":-298},
            {"name":"B","x":3,"y":4,"labelX":3,"labelY":-296}
        ]"#;
        let c: LabelCollection = serde_json::from_str(json).unwrap();
        assert_eq!(c.len(), 2);
        assert_ne!(c.get(0).unwrap().id(), c.get(1).unwrap().id());
        assert_eq!(c.get(1).unwrap().anchor(), Point::new(3.0, 4.0));
        assert_eq!(c.get(1).unwrap().label_position(), Point::new(3.0, -296.0));
    }

    #[test]
    fn blank_stored_names_are_skipped() {
        let json = r#"[
            {"name":"","x":1,"y":2,"labelX":1,"labelY":-298},
            {"name":"  Dôme ","x":3,"y":4,"labelX":3,"labelY":-296},
            {"name":" \t","x":5,"y":6,"labelX":5,"labelY":-294}
        ]"#;
        let c: LabelCollection = serde_json::from_str(json).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(0).unwrap().name(), "Dôme");
        assert_eq!(c.get(0).unwrap().anchor(), Point::new(3.0, 4.0));

        let single: serde_json::Result<Label> =
            serde_json::from_str(r#"{"name":"","x":0,"y":0,"labelX":0,"labelY":0}"#);
        assert!(single.is_err());
    }

    #[test]
    fn huge_stored_ids_are_reassigned() {
        let json = format!(
            r#"[{{"id":{},"name":"A","x":0,"y":0,"labelX":0,"labelY":0}}]"#,
            u64::MAX - 1
        );
        let c: LabelCollection = serde_json::from_str(&json).unwrap();
        let loaded = c.get(0).unwrap().id();
        assert_ne!(loaded, LabelId(u64::MAX - 1));

        let c = c.add(Point::new(1.0, 1.0), "B", &layout()).unwrap();
        let fresh = c.get(1).unwrap().id();
        assert_ne!(fresh, loaded);
        assert_ne!(fresh, MISSING_ID);
        assert!(fresh.0 <= MAX_STORED_ID);
    }

    #[test]
    fn iterates_back_to_front() {
        let c = sample();
        let names: Vec<&str> = c.iter().rev().map(Label::name).collect();
        assert_eq!(names, ["South", "North"]);
        assert_eq!(c.iter().len(), 2);
    }

    #[test]
    fn fresh_ids_do_not_collide_with_loaded_ones() {
        let json = r#"[{"id":9000,"name":"A","x":0,"y":0,"labelX":0,"labelY":0}]"#;
        let c: LabelCollection = serde_json::from_str(json).unwrap();
        let c = c.add(Point::new(1.0, 1.0), "B", &layout()).unwrap();
        assert_ne!(c.get(0).unwrap().id(), c.get(1).unwrap().id());
    }
}
