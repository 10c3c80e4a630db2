//! Highlight projector.
//!
//! Turns the loosely-shaped location lists an agent produces into the
//! canonical [`HighlightedLocation`] sequence, and derives a camera frame
//! that shows all of them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coerce::{bbox_field, lng_lat_fields, string_field, BboxField};
use crate::geo::{Bbox, LngLat};

/// Zoom used when a single small item is shown.
pub const SINGLE_ITEM_ZOOM: f64 = 14.0;

const ZOOM_TIERS: [(f64, f64); 2] = [(0.05, 13.0), (0.1, 12.0)];
const WIDE_ZOOM: f64 = 11.0;

const LABEL_KEYS: [&str; 3] = ["label", "name", "title"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HighlightedLocation {
    Point {
        lng: f64,
        lat: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Bbox {
        bbox: Bbox,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
}

impl HighlightedLocation {
    pub fn point(at: LngLat, label: Option<String>) -> Self {
        HighlightedLocation::Point {
            lng: at.lng,
            lat: at.lat,
            label,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            HighlightedLocation::Point { label, .. } | HighlightedLocation::Bbox { label, .. } => {
                label.as_deref()
            }
        }
    }

    pub fn bounds(&self) -> Bbox {
        match self {
            HighlightedLocation::Point { lng, lat, .. } => {
                Bbox::from_point(LngLat::new(*lng, *lat))
            }
            HighlightedLocation::Bbox { bbox, .. } => bbox.normalized(),
        }
    }
}

/// Every accepted shape of an agent-supplied location, in priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationInput {
    /// `{ bbox: [w, s, e, n] }`
    Bbox { bbox: Bbox, label: Option<String> },
    /// `{ longitude, latitude }` (or `lng`/`lat`)
    Coordinates { at: LngLat, label: Option<String> },
    /// `{ center: { longitude, latitude } }`, as returned by ranking results
    Center { at: LngLat, label: Option<String> },
    /// A four-element bbox with a non-numeric member. Rejected, not
    /// reinterpreted through the lower-priority shapes.
    InvalidBbox,
    Unrecognized,
}

impl LocationInput {
    pub fn classify(item: &Value) -> Self {
        let label = explicit_label(item);
        match bbox_field(item, "bbox") {
            BboxField::Valid(bbox) => return LocationInput::Bbox { bbox, label },
            BboxField::NonNumeric => return LocationInput::InvalidBbox,
            BboxField::Absent | BboxField::WrongShape => {}
        }
        if let Some(at) = lng_lat_fields(item) {
            return LocationInput::Coordinates { at, label };
        }
        if let Some(at) = item.get("center").and_then(lng_lat_fields) {
            return LocationInput::Center { at, label };
        }
        LocationInput::Unrecognized
    }

    /// Canonical highlight with the given fallback label, or `None` if the
    /// item contributes nothing.
    pub fn into_highlight(
        self,
        fallback_label: impl FnOnce() -> String,
    ) -> Option<HighlightedLocation> {
        match self {
            LocationInput::Bbox { bbox, label } => Some(HighlightedLocation::Bbox {
                bbox,
                label: Some(label.unwrap_or_else(fallback_label)),
            }),
            LocationInput::Coordinates { at, label } | LocationInput::Center { at, label } => {
                Some(HighlightedLocation::point(at, Some(label.unwrap_or_else(fallback_label))))
            }
            LocationInput::InvalidBbox | LocationInput::Unrecognized => None,
        }
    }
}

fn explicit_label(item: &Value) -> Option<String> {
    LABEL_KEYS
        .iter()
        .find_map(|key| string_field(item, key))
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Frame {
    pub center: LngLat,
    pub zoom: f64,
    pub bounds: Bbox,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub highlights: Vec<HighlightedLocation>,
    pub frame: Option<Frame>,
    /// Input indexes that were discarded.
    pub skipped: Vec<usize>,
}

/// Normalizes `items`. `external_labels[i]` names `items[i]` when the item
/// has no label of its own; otherwise accepted items are numbered from 1.
pub fn project(items: &[Value], external_labels: &[String]) -> Projection {
    let mut highlights = Vec::with_capacity(items.len());
    let mut skipped = Vec::new();

    for (index, item) in items.iter().enumerate() {
        let ordinal = highlights.len() + 1;
        let external = external_labels
            .get(index)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let accepted = LocationInput::classify(item)
            .into_highlight(|| external.unwrap_or_else(|| ordinal.to_string()));
        match accepted {
            Some(highlight) => highlights.push(highlight),
            None => skipped.push(index),
        }
    }

    let frame = frame_for(&highlights);
    Projection {
        highlights,
        frame,
        skipped,
    }
}

/// Single point shown by coordinates; labelled with its coordinates when
/// no label is given.
pub fn project_point(at: LngLat, label: Option<String>) -> Projection {
    let highlights = vec![HighlightedLocation::point(
        at,
        Some(label.unwrap_or_else(|| at.coordinate_label())),
    )];
    let frame = frame_for(&highlights);
    Projection {
        highlights,
        frame,
        skipped: Vec::new(),
    }
}

pub fn project_bbox(bbox: Bbox, label: Option<String>) -> Projection {
    let highlights = vec![HighlightedLocation::Bbox {
        bbox,
        label: Some(label.unwrap_or_else(|| "1".to_string())),
    }];
    let frame = frame_for(&highlights);
    Projection {
        highlights,
        frame,
        skipped: Vec::new(),
    }
}

pub fn frame_for(highlights: &[HighlightedLocation]) -> Option<Frame> {
    let bounds = highlights
        .iter()
        .map(HighlightedLocation::bounds)
        .reduce(|acc, b| acc.union(&b))?;
    Some(Frame {
        center: bounds.center(),
        zoom: zoom_for_span(bounds.span(), highlights.len()),
        bounds,
    })
}

/// Tiered zoom heuristic. Non-increasing in `span` for any fixed `count`.
pub fn zoom_for_span(span: f64, count: usize) -> f64 {
    if count == 1 && span < ZOOM_TIERS[0].0 {
        return SINGLE_ITEM_ZOOM;
    }
    ZOOM_TIERS
        .iter()
        .find(|(limit, _)| span < *limit)
        .map(|(_, zoom)| *zoom)
        .unwrap_or(WIDE_ZOOM)
}
