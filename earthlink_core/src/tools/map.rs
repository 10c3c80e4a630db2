//! Camera, highlight and selection operations. None of these call out to a
//! collaborator.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::coerce::{
    bbox_field, bool_field, has_lng_lat_keys, lng_lat_fields, number_field, string_field,
    BboxField,
};
use crate::geo::LngLat;
use crate::session::highlight::{self, zoom_for_span, Projection};
use crate::session::selection::SelectedRegion;
use crate::session::viewport::FlyToOutcome;
use crate::session::Session;

use super::args::{feature_id_field, INVALID_BBOX, INVALID_COORDINATES};
use super::{Tool, ToolCategory, ToolContext, ToolOutput};

pub struct NavigateTool;

impl NavigateTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for NavigateTool {
    fn name(&self) -> &str {
        "navigate"
    }

    fn description(&self) -> &str {
        "Fly the map camera to a coordinate. Does not change the selection."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "longitude": { "type": "number", "description": "Longitude in degrees (-180 to 180)" },
                "latitude": { "type": "number", "description": "Latitude in degrees (-90 to 90)" },
                "zoom": { "type": "number", "description": "Zoom level 1-18 (default: keep current)" }
            },
            "required": ["longitude", "latitude"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        if !has_lng_lat_keys(&params) {
            return Ok(ToolOutput::Error(
                "navigate requires longitude and latitude".to_string(),
            ));
        }
        let Some(at) = lng_lat_fields(&params) else {
            return Ok(ToolOutput::Error(INVALID_COORDINATES.to_string()));
        };
        let zoom = number_field(&params, "zoom");
        Ok(fly_result(&ctx.session, at, zoom))
    }
}

fn fly_result(session: &Session, at: LngLat, zoom: Option<f64>) -> ToolOutput {
    match session.fly_to(at.lng, at.lat, zoom) {
        FlyToOutcome::Requested(viewport) => ToolOutput::Json(json!({
            "status": "success",
            "viewport": viewport,
        })),
        FlyToOutcome::Dropped => ToolOutput::Error(INVALID_COORDINATES.to_string()),
    }
}

pub struct ShowOnMapTool;

impl ShowOnMapTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for ShowOnMapTool {
    fn name(&self) -> &str {
        "show_on_map"
    }

    fn description(&self) -> &str {
        "Highlight one or more locations on the map and frame the camera on them. \
         Pass locations (results from find_extreme or find_nearby work as-is), or a single bbox, \
         or a single longitude/latitude. Replaces any previous highlights and clears the selection."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "locations": {
                    "type": "array",
                    "description": "Items with a bbox [min_lng, min_lat, max_lng, max_lat], or longitude/latitude, or center {longitude, latitude}. Optional label per item.",
                    "items": { "type": "object" }
                },
                "labels": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Labels paired with locations by index, for items without their own label"
                },
                "bbox": {
                    "type": "array",
                    "items": { "type": "number" },
                    "description": "A single area to highlight"
                },
                "longitude": { "type": "number" },
                "latitude": { "type": "number" },
                "label": { "type": "string", "description": "Label for a single bbox or point" },
                "zoom": { "type": "number", "description": "Override the computed zoom" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let label = string_field(&params, "label").map(str::to_string);

        let projection = if let Some(items) = params.get("locations").and_then(Value::as_array) {
            let labels: Vec<String> = params
                .get("labels")
                .and_then(Value::as_array)
                .map(|labels| {
                    labels
                        .iter()
                        .map(|l| match l {
                            Value::String(s) => s.clone(),
                            Value::Null => String::new(),
                            other => other.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            highlight::project(items, &labels)
        } else {
            match bbox_field(&params, "bbox") {
                BboxField::Valid(bbox) => highlight::project_bbox(bbox.normalized(), label),
                BboxField::NonNumeric | BboxField::WrongShape => {
                    return Ok(ToolOutput::Error(INVALID_BBOX.to_string()))
                }
                BboxField::Absent => match lng_lat_fields(&params) {
                    Some(at) => highlight::project_point(at, label),
                    None if has_lng_lat_keys(&params) => {
                        return Ok(ToolOutput::Error(INVALID_COORDINATES.to_string()))
                    }
                    None => {
                        return Ok(ToolOutput::Error(
                            "Provide locations, a bbox, or longitude and latitude".to_string(),
                        ))
                    }
                },
            }
        };

        Ok(apply_projection(&ctx.session, projection, number_field(&params, "zoom")))
    }
}

/// Replaces the highlights and frames them. An empty projection still
/// clears the map, but never moves the camera.
fn apply_projection(
    session: &Session,
    projection: Projection,
    zoom_override: Option<f64>,
) -> ToolOutput {
    let Projection {
        highlights,
        frame,
        skipped,
    } = projection;
    let count = highlights.len();
    session.set_highlights(highlights.clone());

    let Some(frame) = frame else {
        return ToolOutput::Error(format!(
            "None of the {} location(s) had a usable bbox or coordinates; nothing was shown",
            skipped.len()
        ));
    };

    let zoom = zoom_override.unwrap_or(frame.zoom);
    let viewport = match session.fly_to(frame.center.lng, frame.center.lat, Some(zoom)) {
        FlyToOutcome::Requested(viewport) => Some(viewport),
        FlyToOutcome::Dropped => None,
    };

    ToolOutput::Json(json!({
        "status": "success",
        "shown": count,
        "skipped": skipped,
        "labels": highlights.iter().filter_map(|h| h.label()).collect::<Vec<_>>(),
        "bounds": frame.bounds,
        "viewport": viewport,
    }))
}

pub struct SetSelectionTool;

impl SetSelectionTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for SetSelectionTool {
    fn name(&self) -> &str {
        "set_selection"
    }

    fn description(&self) -> &str {
        "Select a point (longitude/latitude) or a region (bbox or feature_id) on the user's behalf, \
         so later questions about 'here' or 'this area' refer to it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "longitude": { "type": "number" },
                "latitude": { "type": "number" },
                "bbox": {
                    "type": "array",
                    "items": { "type": "number" },
                    "description": "[min_lng, min_lat, max_lng, max_lat]; corners in any order"
                },
                "feature_id": { "type": "string", "description": "Grid cell id to select as a region" },
                "fly_to": { "type": "boolean", "description": "Move the camera to the selection (default true)" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let session = &ctx.session;
        let fly = bool_field(&params, "fly_to").unwrap_or(true);

        let selection = match bbox_field(&params, "bbox") {
            BboxField::Valid(bbox) => SelectionTarget::Region(SelectedRegion::Bbox {
                bbox: bbox.normalized(),
            }),
            BboxField::NonNumeric | BboxField::WrongShape => {
                return Ok(ToolOutput::Error(INVALID_BBOX.to_string()))
            }
            BboxField::Absent => {
                if let Some(id) = feature_id_field(&params) {
                    SelectionTarget::Region(SelectedRegion::FeatureId { id })
                } else if has_lng_lat_keys(&params) {
                    match lng_lat_fields(&params) {
                        Some(at) => SelectionTarget::Point(at),
                        None => return Ok(ToolOutput::Error(INVALID_COORDINATES.to_string())),
                    }
                } else {
                    return Ok(ToolOutput::Error(
                        "Provide longitude and latitude, a bbox, or a feature_id".to_string(),
                    ));
                }
            }
        };

        session.clear_highlights();
        let camera = match &selection {
            SelectionTarget::Point(at) => {
                session.set_selected_point(Some(*at));
                Some((*at, None))
            }
            SelectionTarget::Region(region) => {
                session.set_selected_region(Some(region.clone()));
                region
                    .bbox()
                    .map(|bbox| (bbox.center(), Some(zoom_for_span(bbox.span(), 1))))
            }
        };

        let viewport = match camera {
            Some((center, zoom)) if fly => match session.fly_to(center.lng, center.lat, zoom) {
                FlyToOutcome::Requested(viewport) => Some(viewport),
                FlyToOutcome::Dropped => None,
            },
            _ => None,
        };

        Ok(ToolOutput::Json(json!({
            "status": "success",
            "selected_point": session.selected_point(),
            "selected_region": session.selected_region(),
            "viewport": viewport,
        })))
    }
}

enum SelectionTarget {
    Point(LngLat),
    Region(SelectedRegion),
}

pub struct ClearMapTool;

impl ClearMapTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for ClearMapTool {
    fn name(&self) -> &str {
        "clear_map"
    }

    fn description(&self) -> &str {
        "Remove all highlights and the current selection from the map."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "close_panel": { "type": "boolean", "description": "Also close the side panel (default false)" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let session = &ctx.session;
        let removed = session.highlights().len();
        session.clear_highlights();
        session.clear_selection();
        if bool_field(&params, "close_panel").unwrap_or(false) {
            session.close_panel();
        }
        Ok(ToolOutput::Json(json!({
            "status": "success",
            "highlights_removed": removed,
            "panel_open": session.panel_is_open(),
        })))
    }
}

pub struct GetMapStateTool;

impl GetMapStateTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for GetMapStateTool {
    fn name(&self) -> &str {
        "get_map_state"
    }

    fn description(&self) -> &str {
        "Read the current map state: selection mode, selected point or region, a half-drawn region corner, \
         camera position, highlights and panel. Use this to resolve 'here' or 'this area'."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let snapshot = ctx.session.snapshot();
        let selection = match (&snapshot.selected_point, &snapshot.selected_region) {
            (Some(point), _) => json!({
                "type": "point",
                "longitude": point.lng,
                "latitude": point.lat,
            }),
            (None, Some(region)) => serde_json::to_value(region)?,
            (None, None) => Value::Null,
        };

        Ok(ToolOutput::Json(json!({
            "status": "success",
            "selection_mode": snapshot.selection_mode,
            "selection": selection,
            "drawing_corner": snapshot.bbox_corner1,
            "viewport": snapshot.viewport,
            "highlights": snapshot.highlights,
            "panel": {
                "open": snapshot.panel.open,
                "showing": snapshot.panel.current.as_ref().map(|e| e.content.kind()),
                "alternate": snapshot.panel.alternate.as_ref().map(|e| e.content.kind()),
            },
        })))
    }
}
