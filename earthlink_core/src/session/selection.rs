//! Selection store: point vs. region selection plus the two-click
//! region-drawing protocol.
//!
//! At most one of `point` / `region` is set at any time. The pending
//! first corner only exists while the mode is [`SelectionMode::Region`].

use serde::{Deserialize, Serialize};

use crate::geo::{Bbox, LngLat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    Point,
    Region,
}

impl SelectionMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "point" => Some(Self::Point),
            "region" | "bbox" | "area" => Some(Self::Region),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SelectedRegion {
    Bbox { bbox: Bbox },
    FeatureId { id: String },
}

impl SelectedRegion {
    pub fn bbox(&self) -> Option<Bbox> {
        match self {
            SelectedRegion::Bbox { bbox } => Some(*bbox),
            SelectedRegion::FeatureId { .. } => None,
        }
    }
}

/// State of the two-click drawing protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawingState {
    Idle,
    CornerSet(LngLat),
}

/// What a map click did to the selection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    PointSelected(LngLat),
    CornerPlaced(LngLat),
    RegionCompleted(Bbox),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionState {
    pub mode: SelectionMode,
    pub point: Option<LngLat>,
    pub region: Option<SelectedRegion>,
    pub bbox_corner1: Option<LngLat>,
    /// Bumped on every selection write.
    #[serde(skip)]
    pub epoch: u64,
}

impl SelectionState {
    pub fn drawing_state(&self) -> DrawingState {
        match self.bbox_corner1 {
            Some(corner) => DrawingState::CornerSet(corner),
            None => DrawingState::Idle,
        }
    }

    /// Sets (or clears, with `None`) the point and drops region + corner.
    pub fn set_point(&mut self, point: Option<LngLat>) {
        self.point = point;
        self.region = None;
        self.bbox_corner1 = None;
        self.epoch += 1;
    }

    /// Sets (or clears) the region and drops point + corner. Callers
    /// normalize bbox order first; the value is stored as given.
    pub fn set_region(&mut self, region: Option<SelectedRegion>) {
        self.region = region;
        self.point = None;
        self.bbox_corner1 = None;
        self.epoch += 1;
    }

    pub fn clear(&mut self) {
        self.point = None;
        self.region = None;
        self.bbox_corner1 = None;
        self.epoch += 1;
    }

    pub fn has_selection(&self) -> bool {
        self.point.is_some() || self.region.is_some()
    }

    /// Records the first drawing corner. Ignored outside region mode.
    /// Any existing selection is cleared.
    pub fn set_bbox_corner1(&mut self, corner: Option<LngLat>) -> bool {
        if self.mode != SelectionMode::Region && corner.is_some() {
            return false;
        }
        if corner.is_some() {
            self.point = None;
            self.region = None;
            self.epoch += 1;
        }
        self.bbox_corner1 = corner;
        true
    }

    /// Switching modes always resets drawing to idle.
    pub fn set_mode(&mut self, mode: SelectionMode) {
        self.mode = mode;
        self.bbox_corner1 = None;
    }

    pub fn click(&mut self, at: LngLat) -> ClickOutcome {
        match (self.mode, self.drawing_state()) {
            (SelectionMode::Point, _) => {
                self.set_point(Some(at));
                ClickOutcome::PointSelected(at)
            }
            (SelectionMode::Region, DrawingState::Idle) => {
                self.set_bbox_corner1(Some(at));
                ClickOutcome::CornerPlaced(at)
            }
            (SelectionMode::Region, DrawingState::CornerSet(first)) => {
                let bbox = Bbox::from_corners(first, at);
                self.set_region(Some(SelectedRegion::Bbox { bbox }));
                ClickOutcome::RegionCompleted(bbox)
            }
        }
    }
}
