//! Place search and reverse geocoding.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::coerce::string_field;
use crate::geo::LngLat;
use crate::services::geocoder::{select_candidate, Geocoder};
use crate::session::highlight::{zoom_for_span, SINGLE_ITEM_ZOOM};
use crate::session::panel::PanelContent;
use crate::session::viewport::FlyToOutcome;

use super::args::resolve_point;
use super::{Tool, ToolCategory, ToolContext, ToolOutput};

const MAX_ALTERNATIVES: usize = 4;

pub struct ReverseGeocodeTool {
    geocoder: Arc<dyn Geocoder>,
}

impl ReverseGeocodeTool {
    pub fn new(geocoder: Arc<dyn Geocoder>) -> Self {
        Self { geocoder }
    }
}

#[async_trait]
impl Tool for ReverseGeocodeTool {
    fn name(&self) -> &str {
        "reverse_geocode"
    }

    fn description(&self) -> &str {
        "Name the place or address at a coordinate. Uses the selected point when longitude/latitude are omitted."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "longitude": { "type": "number" },
                "latitude": { "type": "number" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let at = match resolve_point(&params, &ctx.session) {
            Ok(target) => target.value,
            Err(message) => return Ok(ToolOutput::Error(message)),
        };

        let candidates = match self.geocoder.reverse(at).await {
            Ok(candidates) => candidates,
            Err(e) => return Ok(ToolOutput::Error(format!("Reverse geocoding failed: {:#}", e))),
        };
        let Some(place) = candidates.first() else {
            return Ok(ToolOutput::Error(format!(
                "No place name found near {}",
                at.coordinate_label()
            )));
        };

        Ok(ToolOutput::Json(json!({
            "status": "success",
            "location": at,
            "name": place.name,
            "kind": place.kind,
        })))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Places
    }
}

pub struct SearchPlaceTool {
    geocoder: Arc<dyn Geocoder>,
}

impl SearchPlaceTool {
    pub fn new(geocoder: Arc<dyn Geocoder>) -> Self {
        Self { geocoder }
    }
}

#[async_trait]
impl Tool for SearchPlaceTool {
    fn name(&self) -> &str {
        "search_place"
    }

    fn description(&self) -> &str {
        "Find a place by name, fly the map to it and select it. Landmarks and points of interest \
         are preferred over street addresses."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Place name or address" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let Some(query) = string_field(&params, "query").or_else(|| string_field(&params, "name"))
        else {
            return Ok(ToolOutput::Error(
                "Missing required 'query' parameter".to_string(),
            ));
        };

        let near = ctx
            .session
            .viewport()
            .map(|v| LngLat::new(v.longitude, v.latitude));
        let candidates = match self.geocoder.search(query, near).await {
            Ok(candidates) => candidates,
            Err(e) => return Ok(ToolOutput::Error(format!("Place search failed: {:#}", e))),
        };
        let Some(place) = select_candidate(&candidates, ctx.settings.poi_relevance_threshold)
        else {
            return Ok(ToolOutput::Error(format!("No place matched '{}'", query)));
        };

        let zoom = place
            .bbox
            .map(|bbox| zoom_for_span(bbox.span(), 1))
            .unwrap_or(SINGLE_ITEM_ZOOM);
        let session = &ctx.session;
        let viewport = match session.fly_to(place.location.lng, place.location.lat, Some(zoom)) {
            FlyToOutcome::Requested(viewport) => Some(viewport),
            FlyToOutcome::Dropped => None,
        };
        session.clear_highlights();
        session.set_selected_point(Some(place.location));
        session.set_panel_content(
            PanelContent::Place {
                name: place.name.clone(),
                location: place.location,
                bbox: place.bbox,
            },
            true,
        );
        session.open_panel();

        let alternatives: Vec<&str> = candidates
            .iter()
            .filter(|c| c.name != place.name)
            .take(MAX_ALTERNATIVES)
            .map(|c| c.name.as_str())
            .collect();

        Ok(ToolOutput::Json(json!({
            "status": "success",
            "name": place.name,
            "location": place.location,
            "kind": place.kind,
            "viewport": viewport,
            "alternatives": alternatives,
        })))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Places
    }
}
