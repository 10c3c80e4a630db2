//! Argument resolution shared by the operations.
//!
//! An omitted location falls back to the current selection. Resolution
//! reads the session once, before any fetch, and records the selection
//! epoch so the later write can tell whether the selection moved.

use serde_json::Value;

use crate::coerce::{bbox_field, has_lng_lat_keys, lng_lat_fields, BboxField};
use crate::geo::{Bbox, LngLat};
use crate::services::insight::RegionQuery;
use crate::session::selection::SelectedRegion;
use crate::session::Session;

pub const NO_POINT_SELECTED: &str =
    "No location selected. Ask the user to click a point on the map, or pass longitude and latitude.";
pub const NO_REGION_SELECTED: &str =
    "No region or point selected. Ask the user to draw a region on the map, or pass bbox or feature_id.";
pub const INVALID_COORDINATES: &str = "longitude and latitude must both be finite numbers";
pub const INVALID_BBOX: &str =
    "bbox must be four numbers [min_lng, min_lat, max_lng, max_lat]";

/// A value plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    /// True when the value was filled in from the selection.
    pub from_selection: bool,
    /// Selection epoch observed at resolution time.
    pub epoch: u64,
}

impl<T> Resolved<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        Resolved {
            value: f(self.value),
            from_selection: self.from_selection,
            epoch: self.epoch,
        }
    }
}

/// Explicit `longitude`/`latitude` arguments, else the selected point.
pub fn resolve_point(params: &Value, session: &Session) -> Result<Resolved<LngLat>, String> {
    if has_lng_lat_keys(params) {
        return match lng_lat_fields(params) {
            Some(at) => Ok(Resolved {
                value: at,
                from_selection: false,
                epoch: session.selection_epoch(),
            }),
            None => Err(INVALID_COORDINATES.to_string()),
        };
    }
    // Point and epoch under one lock, so a click in between cannot pair
    // the old point with the new epoch.
    let (point, epoch) = session.read(|s| (s.selection.point, s.selection.epoch));
    match point {
        Some(at) => Ok(Resolved {
            value: at,
            from_selection: true,
            epoch,
        }),
        None => Err(NO_POINT_SELECTED.to_string()),
    }
}

/// Explicit `bbox` or `feature_id`, else the selected region, else a small
/// square of `half_size` degrees around the selected point.
pub fn resolve_region(
    params: &Value,
    session: &Session,
    half_size: f64,
) -> Result<Resolved<SelectedRegion>, String> {
    let explicit = |region| Resolved {
        value: region,
        from_selection: false,
        epoch: session.selection_epoch(),
    };

    match bbox_field(params, "bbox") {
        BboxField::Valid(bbox) => {
            return Ok(explicit(SelectedRegion::Bbox {
                bbox: bbox.normalized(),
            }))
        }
        BboxField::NonNumeric | BboxField::WrongShape => return Err(INVALID_BBOX.to_string()),
        BboxField::Absent => {}
    }
    if let Some(id) = feature_id_field(params) {
        return Ok(explicit(SelectedRegion::FeatureId { id }));
    }

    let (region, point, epoch) = session.read(|s| {
        (
            s.selection.region.clone(),
            s.selection.point,
            s.selection.epoch,
        )
    });
    let fallback = region.or_else(|| {
        point.map(|p| SelectedRegion::Bbox {
            bbox: Bbox::around(p, half_size),
        })
    });
    match fallback {
        Some(region) => Ok(Resolved {
            value: region,
            from_selection: true,
            epoch,
        }),
        None => Err(NO_REGION_SELECTED.to_string()),
    }
}

/// `feature_id` (or `featureId`) as a string; numeric ids are accepted.
pub fn feature_id_field(params: &Value) -> Option<String> {
    let raw = params.get("feature_id").or_else(|| params.get("featureId"))?;
    match raw {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn region_query(region: &SelectedRegion) -> RegionQuery {
    match region {
        SelectedRegion::Bbox { bbox } => RegionQuery::Bbox(*bbox),
        SelectedRegion::FeatureId { id } => RegionQuery::FeatureId(id.clone()),
    }
}
