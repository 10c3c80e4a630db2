//! Side-by-side comparison of several locations.
//!
//! Targets may be objects or string shorthands: `"selected"`/`"current"`,
//! `"point:lng,lat"`, `"feature:id"`, or free text that is geocoded. A
//! target that cannot be resolved is skipped and reported; it never aborts
//! the rest of the batch.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use regex_lite::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::coerce::{bbox_field, has_lng_lat_keys, lng_lat_fields, string_field, BboxField};
use crate::geo::LngLat;
use crate::services::geocoder::{select_candidate, Geocoder};
use crate::services::insight::{CompareTarget, InsightService, Metric};
use crate::session::panel::PanelContent;
use crate::session::selection::SelectedRegion;

use super::args::feature_id_field;
use super::{panel_result, Tool, ToolCategory, ToolContext, ToolOutput};

pub const MAX_COMPARE_TARGETS: usize = 6;

const FEATURE_PREFIX: &str = "feature:";

const DEFAULT_METRICS: [Metric; 4] = [
    Metric::HeatScore,
    Metric::GreenScore,
    Metric::Ndvi,
    Metric::Lst,
];

const NO_VALID_LOCATIONS: &str =
    "No valid locations to compare. Select a point on the map or name the places to compare.";

/// One requested target before any lookup.
#[derive(Debug, Clone, PartialEq)]
enum TargetSpec {
    Selected,
    Point { location: LngLat, label: Option<String> },
    Feature { id: String, label: Option<String> },
    Place { query: String, label: Option<String> },
    Invalid(String),
}

fn parse_target(item: &Value) -> TargetSpec {
    match item {
        Value::String(raw) => parse_shorthand(raw),
        Value::Object(_) => parse_object(item),
        other => TargetSpec::Invalid(format!("unsupported target {}", other)),
    }
}

fn parse_shorthand(raw: &str) -> TargetSpec {
    let text = raw.trim();
    if text.is_empty() {
        return TargetSpec::Invalid("empty target".to_string());
    }
    if text.eq_ignore_ascii_case("selected") || text.eq_ignore_ascii_case("current") {
        return TargetSpec::Selected;
    }
    if let Some(location) = point_shorthand(text) {
        return TargetSpec::Point {
            location,
            label: None,
        };
    }
    let lowered = text.to_ascii_lowercase();
    if lowered.starts_with("point:") {
        return TargetSpec::Invalid(format!("'{}' is not point:lng,lat", text));
    }
    if lowered.starts_with(FEATURE_PREFIX) {
        let id = text[FEATURE_PREFIX.len()..].trim();
        return if id.is_empty() {
            TargetSpec::Invalid("feature: needs an id".to_string())
        } else {
            TargetSpec::Feature {
                id: id.to_string(),
                label: None,
            }
        };
    }
    TargetSpec::Place {
        query: text.to_string(),
        label: None,
    }
}

fn point_shorthand(text: &str) -> Option<LngLat> {
    let re = Regex::new(r"(?i)^point:\s*(-?\d+(?:\.\d+)?)\s*,\s*(-?\d+(?:\.\d+)?)$").ok()?;
    let caps = re.captures(text)?;
    let lng = caps.get(1)?.as_str().parse().ok()?;
    let lat = caps.get(2)?.as_str().parse().ok()?;
    Some(LngLat::new(lng, lat))
}

fn parse_object(item: &Value) -> TargetSpec {
    let label = ["label", "name"]
        .iter()
        .find_map(|k| string_field(item, k))
        .map(str::to_string);

    if has_lng_lat_keys(item) {
        return match lng_lat_fields(item) {
            Some(location) => TargetSpec::Point { location, label },
            None => TargetSpec::Invalid("longitude/latitude are not numbers".to_string()),
        };
    }
    if let Some(id) = feature_id_field(item) {
        return TargetSpec::Feature { id, label };
    }
    match bbox_field(item, "bbox") {
        BboxField::Valid(bbox) => {
            return TargetSpec::Point {
                location: bbox.normalized().center(),
                label,
            }
        }
        BboxField::NonNumeric | BboxField::WrongShape => {
            return TargetSpec::Invalid("bbox must be four numbers".to_string())
        }
        BboxField::Absent => {}
    }
    if let Some(query) = ["query", "place"].iter().find_map(|k| string_field(item, k)) {
        return TargetSpec::Place {
            query: query.to_string(),
            label,
        };
    }
    if let Some(name) = label {
        return TargetSpec::Place {
            query: name.clone(),
            label: Some(name),
        };
    }
    TargetSpec::Invalid("target has no coordinates, feature_id or place name".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SkippedTarget {
    target: Value,
    reason: String,
}

pub struct CompareLocationsTool {
    service: Arc<dyn InsightService>,
    geocoder: Arc<dyn Geocoder>,
}

impl CompareLocationsTool {
    pub fn new(service: Arc<dyn InsightService>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self { service, geocoder }
    }

    async fn resolve(
        &self,
        parsed: TargetSpec,
        ctx: &ToolContext,
        selection: &SelectionAtStart,
    ) -> Result<CompareTarget, String> {
        match parsed {
            TargetSpec::Selected => selection
                .as_target()
                .ok_or_else(|| "nothing is selected on the map".to_string()),
            TargetSpec::Point { location, label } => Ok(CompareTarget::Point {
                label: label.unwrap_or_else(|| location.coordinate_label()),
                location,
            }),
            TargetSpec::Feature { id, label } => Ok(CompareTarget::Feature {
                label: label.unwrap_or_else(|| format!("Cell {}", id)),
                id,
            }),
            TargetSpec::Place { query, label } => {
                let near = ctx
                    .session
                    .viewport()
                    .map(|v| LngLat::new(v.longitude, v.latitude));
                let candidates = self
                    .geocoder
                    .search(&query, near)
                    .await
                    .map_err(|e| format!("place search failed: {:#}", e))?;
                let place = select_candidate(&candidates, ctx.settings.poi_relevance_threshold)
                    .ok_or_else(|| format!("no place matched '{}'", query))?;
                Ok(CompareTarget::Point {
                    location: place.location,
                    label: label.unwrap_or_else(|| place.name.clone()),
                })
            }
            TargetSpec::Invalid(reason) => Err(reason),
        }
    }
}

/// Selection read once, before any lookup.
struct SelectionAtStart {
    point: Option<LngLat>,
    region: Option<SelectedRegion>,
    epoch: u64,
}

impl SelectionAtStart {
    /// The selected point, else the selected region.
    fn as_target(&self) -> Option<CompareTarget> {
        if let Some(location) = self.point {
            return Some(CompareTarget::Point {
                location,
                label: "Selected location".to_string(),
            });
        }
        match self.region.as_ref()? {
            SelectedRegion::FeatureId { id } => Some(CompareTarget::Feature {
                id: id.clone(),
                label: "Selected area".to_string(),
            }),
            SelectedRegion::Bbox { bbox } => Some(CompareTarget::Point {
                location: bbox.center(),
                label: "Selected area".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Tool for CompareLocationsTool {
    fn name(&self) -> &str {
        "compare_locations"
    }

    fn description(&self) -> &str {
        "Compare metrics across up to 6 locations and show a comparison table in the side panel. \
         Targets can be objects with longitude/latitude, feature_id or a place name, or strings: \
         \"selected\", \"point:lng,lat\", \"feature:id\", or a place name to look up."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "targets": {
                    "type": "array",
                    "description": "Locations to compare (default: the selected point)",
                    "items": {
                        "anyOf": [
                            { "type": "string" },
                            {
                                "type": "object",
                                "properties": {
                                    "longitude": { "type": "number" },
                                    "latitude": { "type": "number" },
                                    "feature_id": { "type": "string" },
                                    "query": { "type": "string" },
                                    "label": { "type": "string" }
                                }
                            }
                        ]
                    }
                },
                "metrics": {
                    "type": "array",
                    "items": { "type": "string", "enum": Metric::vocabulary() },
                    "description": "Metrics to compare (default heat_score, green_score, ndvi, lst)"
                }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let selection = ctx.session.read(|s| SelectionAtStart {
            point: s.selection.point,
            region: s.selection.region.clone(),
            epoch: s.selection.epoch,
        });

        let requested: Vec<Value> = match params.get("targets") {
            Some(Value::Array(items)) if !items.is_empty() => items.clone(),
            Some(Value::String(single)) if !single.trim().is_empty() => {
                vec![Value::String(single.clone())]
            }
            _ => vec![Value::String("selected".to_string())],
        };

        let (metrics, ignored_metrics) = parse_metrics(params.get("metrics"));

        let mut targets = Vec::new();
        let mut skipped = Vec::new();
        let mut uses_selection = false;
        for item in requested {
            if targets.len() == MAX_COMPARE_TARGETS {
                skipped.push(SkippedTarget {
                    target: item,
                    reason: format!("at most {} locations can be compared", MAX_COMPARE_TARGETS),
                });
                continue;
            }
            let parsed = parse_target(&item);
            let is_selected = parsed == TargetSpec::Selected;
            match self.resolve(parsed, ctx, &selection).await {
                Ok(target) => {
                    uses_selection |= is_selected;
                    targets.push(target);
                }
                Err(reason) => {
                    tracing::debug!("Skipping comparison target {}: {}", item, reason);
                    skipped.push(SkippedTarget { target: item, reason });
                }
            }
        }

        if targets.is_empty() {
            return Ok(ToolOutput::Error(if skipped.is_empty() {
                NO_VALID_LOCATIONS.to_string()
            } else {
                format!(
                    "{} Skipped: {}",
                    NO_VALID_LOCATIONS,
                    skipped
                        .iter()
                        .map(|s| s.reason.as_str())
                        .collect::<Vec<_>>()
                        .join("; ")
                )
            }));
        }

        let entries = match self.service.compare(&targets, &metrics).await {
            Ok(entries) => entries,
            Err(e) => return Ok(ToolOutput::Error(format!("Comparison lookup failed: {:#}", e))),
        };

        let metric_names: Vec<String> = metrics.iter().map(|m| m.as_str().to_string()).collect();
        let shown = ctx.show_in_panel(
            PanelContent::Comparison {
                metrics: metric_names.clone(),
                entries: entries.clone(),
            },
            true,
            uses_selection,
            selection.epoch,
        );

        Ok(panel_result(
            json!({
                "status": "success",
                "metrics": metric_names,
                "ignored_metrics": ignored_metrics,
                "compared": entries,
                "skipped": skipped,
            }),
            shown,
        ))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Insight
    }
}

/// Known metrics in request order without duplicates, plus the names that
/// were not recognized. Falls back to the default set when none are known.
fn parse_metrics(raw: Option<&Value>) -> (Vec<Metric>, Vec<String>) {
    let mut metrics = Vec::new();
    let mut ignored = Vec::new();
    let names: Vec<&str> = match raw {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => s.split(',').collect(),
        _ => Vec::new(),
    };
    for name in names {
        match Metric::parse(name) {
            Some(metric) if !metrics.contains(&metric) => metrics.push(metric),
            Some(_) => {}
            None => ignored.push(name.trim().to_string()),
        }
    }
    if metrics.is_empty() {
        metrics = DEFAULT_METRICS.to_vec();
    }
    (metrics, ignored)
}
