//! Operations backed by the insight data service.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::coerce::{bool_field, integer_field, number_field, string_field};
use crate::geo::haversine_m;
use crate::services::insight::{
    ExtremeQuery, InsightService, Metric, NearbyQuery, RankMode, TrendPoint, TrendQuery,
    MAX_TOP_N,
};
use crate::session::panel::PanelContent;

use super::args::{region_query, resolve_point, resolve_region};
use super::{panel_result, Tool, ToolCategory, ToolContext, ToolOutput};

const DEFAULT_RADIUS_M: f64 = 500.0;
const MIN_RADIUS_M: f64 = 50.0;
const MAX_RADIUS_M: f64 = 5000.0;
const DEFAULT_NEARBY_LIMIT: i64 = 5;

const SHOW_ON_MAP_HINT: &str =
    "Pass these results to show_on_map to highlight them (each has a center and bbox).";

/// Reads a required metric, listing the vocabulary on failure.
fn metric_arg(params: &Value) -> Result<Metric, String> {
    let raw = string_field(params, "metric").ok_or_else(|| {
        format!(
            "Missing required 'metric'. Use one of: {}",
            Metric::vocabulary().join(", ")
        )
    })?;
    Metric::parse(raw).ok_or_else(|| {
        format!(
            "Unknown metric '{}'. Use one of: {}",
            raw,
            Metric::vocabulary().join(", ")
        )
    })
}

fn mode_arg(params: &Value) -> Result<RankMode, String> {
    match string_field(params, "mode") {
        None => Ok(RankMode::default()),
        Some(raw) => RankMode::parse(raw)
            .ok_or_else(|| format!("Unknown mode '{}'. Use 'max' or 'min'", raw)),
    }
}

fn metric_schema() -> Value {
    json!({
        "type": "string",
        "enum": Metric::vocabulary(),
        "description": "heat_score/green_score are 0-1 composites; lst is land surface temperature; ndvi/evi vegetation; ndbi built-up; bsi bare soil"
    })
}

pub struct PointInsightTool {
    service: Arc<dyn InsightService>,
}

impl PointInsightTool {
    pub fn new(service: Arc<dyn InsightService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for PointInsightTool {
    fn name(&self) -> &str {
        "get_point_insight"
    }

    fn description(&self) -> &str {
        "Environmental metrics for the grid cell at a point. Uses the selected point when \
         longitude/latitude are omitted. Shows the result in the side panel."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "longitude": { "type": "number", "description": "Defaults to the selected point" },
                "latitude": { "type": "number", "description": "Defaults to the selected point" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let target = match resolve_point(&params, &ctx.session) {
            Ok(target) => target,
            Err(message) => return Ok(ToolOutput::Error(message)),
        };
        let at = target.value;

        let insight = match self.service.point(at).await {
            Ok(insight) => insight,
            Err(e) => return Ok(ToolOutput::Error(format!("Point lookup failed: {:#}", e))),
        };

        let shown = ctx.show_in_panel(
            PanelContent::PointInsight {
                location: at,
                feature_id: insight.feature_id.clone(),
                properties: insight.properties.clone(),
            },
            false,
            target.from_selection,
            target.epoch,
        );
        if !target.from_selection {
            ctx.session.clear_highlights();
            ctx.session.set_selected_point(Some(at));
        }

        Ok(panel_result(
            json!({
                "status": "success",
                "location": at,
                "feature_id": insight.feature_id,
                "properties": insight.properties,
            }),
            shown,
        ))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Insight
    }
}

pub struct RegionInsightTool {
    service: Arc<dyn InsightService>,
}

impl RegionInsightTool {
    pub fn new(service: Arc<dyn InsightService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for RegionInsightTool {
    fn name(&self) -> &str {
        "get_region_insight"
    }

    fn description(&self) -> &str {
        "Aggregate metrics (mean/min/max) over an area. Uses the selected region, or a ~300 m box \
         around the selected point, when bbox and feature_id are omitted. Shows the summary in the side panel."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "bbox": {
                    "type": "array",
                    "items": { "type": "number" },
                    "description": "[min_lng, min_lat, max_lng, max_lat]"
                },
                "feature_id": { "type": "string", "description": "A single grid cell id" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let target = match resolve_region(
            &params,
            &ctx.session,
            ctx.settings.region_fallback_half_size_deg,
        ) {
            Ok(target) => target,
            Err(message) => return Ok(ToolOutput::Error(message)),
        };

        let insight = match self.service.region(&region_query(&target.value)).await {
            Ok(insight) => insight,
            Err(e) => return Ok(ToolOutput::Error(format!("Region lookup failed: {:#}", e))),
        };

        // Single-cell queries carry the cell's own properties instead.
        let aggregates = match (&insight.feature, insight.aggregates.is_empty()) {
            (Some(feature), true) => feature.clone(),
            _ => insight.aggregates.clone(),
        };

        let shown = ctx.show_in_panel(
            PanelContent::RegionSummary {
                region: target.value.clone(),
                cell_count: insight.count,
                aggregates: aggregates.clone(),
            },
            false,
            target.from_selection,
            target.epoch,
        );

        let mut payload = json!({
            "status": "success",
            "region": target.value,
            "cell_count": insight.count,
            "aggregates": aggregates,
        });
        if let Some(id) = insight.feature_id {
            payload["feature_id"] = Value::String(id);
        }
        if insight.count == Some(0) {
            payload["note"] = Value::String("No grid cells intersect this area.".to_string());
        }
        Ok(panel_result(payload, shown))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Insight
    }
}

pub struct FindExtremeTool {
    service: Arc<dyn InsightService>,
}

impl FindExtremeTool {
    pub fn new(service: Arc<dyn InsightService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for FindExtremeTool {
    fn name(&self) -> &str {
        "find_extreme"
    }

    fn description(&self) -> &str {
        "Rank grid cells by a metric to find e.g. the hottest or greenest places. \
         Returns locations only; call show_on_map to display them."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "metric": metric_schema(),
                "mode": { "type": "string", "enum": ["max", "min"], "description": "Default max" },
                "top_n": { "type": "integer", "minimum": 1, "maximum": MAX_TOP_N, "description": "Default 1" },
                "land_only": { "type": "boolean", "description": "Skip water cells (default true)" }
            },
            "required": ["metric"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let metric = match metric_arg(&params) {
            Ok(metric) => metric,
            Err(message) => return Ok(ToolOutput::Error(message)),
        };
        let mode = match mode_arg(&params) {
            Ok(mode) => mode,
            Err(message) => return Ok(ToolOutput::Error(message)),
        };
        let top_n = integer_field(&params, "top_n")
            .unwrap_or(1)
            .clamp(1, i64::from(MAX_TOP_N)) as u32;
        let land_only = bool_field(&params, "land_only").unwrap_or(true);

        let query = ExtremeQuery {
            metric,
            mode,
            top_n,
            land_only,
        };
        let results = match self.service.find_extreme(&query).await {
            Ok(results) => results,
            Err(e) => return Ok(ToolOutput::Error(format!("Ranking lookup failed: {:#}", e))),
        };

        Ok(ToolOutput::Json(json!({
            "status": "success",
            "metric": metric,
            "mode": mode,
            "top_n": top_n,
            "count": results.len(),
            "results": results,
            "hint": SHOW_ON_MAP_HINT,
        })))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Insight
    }
}

pub struct FindNearbyTool {
    service: Arc<dyn InsightService>,
}

impl FindNearbyTool {
    pub fn new(service: Arc<dyn InsightService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for FindNearbyTool {
    fn name(&self) -> &str {
        "find_nearby"
    }

    fn description(&self) -> &str {
        "Grid cells within a radius of a point, nearest first, optionally ranked by a metric. \
         Uses the selected point as the center when longitude/latitude are omitted."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "longitude": { "type": "number" },
                "latitude": { "type": "number" },
                "radius_m": {
                    "type": "number",
                    "description": format!("Search radius in metres (default {}, {}-{})", DEFAULT_RADIUS_M, MIN_RADIUS_M, MAX_RADIUS_M)
                },
                "metric": metric_schema(),
                "mode": { "type": "string", "enum": ["max", "min"] },
                "limit": { "type": "integer", "minimum": 1, "maximum": MAX_TOP_N }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let center = match resolve_point(&params, &ctx.session) {
            Ok(target) => target.value,
            Err(message) => return Ok(ToolOutput::Error(message)),
        };
        let metric = if params.get("metric").map(|v| !v.is_null()).unwrap_or(false) {
            match metric_arg(&params) {
                Ok(metric) => Some(metric),
                Err(message) => return Ok(ToolOutput::Error(message)),
            }
        } else {
            None
        };
        let mode = match mode_arg(&params) {
            Ok(mode) => mode,
            Err(message) => return Ok(ToolOutput::Error(message)),
        };
        let radius_m = number_field(&params, "radius_m")
            .or_else(|| number_field(&params, "radius"))
            .unwrap_or(DEFAULT_RADIUS_M)
            .clamp(MIN_RADIUS_M, MAX_RADIUS_M);
        let limit = integer_field(&params, "limit")
            .unwrap_or(DEFAULT_NEARBY_LIMIT)
            .clamp(1, i64::from(MAX_TOP_N)) as u32;

        let query = NearbyQuery {
            center,
            radius_m,
            metric,
            mode,
            limit,
        };
        let mut results = match self.service.nearby(&query).await {
            Ok(results) => results,
            Err(e) => return Ok(ToolOutput::Error(format!("Nearby lookup failed: {:#}", e))),
        };

        for result in &mut results {
            if result.distance_m.is_none() {
                result.distance_m = result.anchor().map(|at| haversine_m(center, at));
            }
        }
        results.sort_by(|a, b| match (a.distance_m, b.distance_m) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        results.truncate(limit as usize);

        Ok(ToolOutput::Json(json!({
            "status": "success",
            "center": center,
            "radius_m": radius_m,
            "metric": metric,
            "count": results.len(),
            "results": results,
            "hint": SHOW_ON_MAP_HINT,
        })))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Insight
    }
}

pub struct TemporalTrendTool {
    service: Arc<dyn InsightService>,
}

impl TemporalTrendTool {
    pub fn new(service: Arc<dyn InsightService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for TemporalTrendTool {
    fn name(&self) -> &str {
        "get_temporal_trend"
    }

    fn description(&self) -> &str {
        "Year-by-year series of one metric at a point, with the overall change. Uses the selected \
         point when longitude/latitude are omitted. Shows a chart in the side panel, keeping the \
         previous view one toggle away."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "metric": metric_schema(),
                "longitude": { "type": "number" },
                "latitude": { "type": "number" },
                "label": { "type": "string", "description": "Chart title for the location" }
            },
            "required": ["metric"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let metric = match metric_arg(&params) {
            Ok(metric) => metric,
            Err(message) => return Ok(ToolOutput::Error(message)),
        };
        let target = match resolve_point(&params, &ctx.session) {
            Ok(target) => target,
            Err(message) => return Ok(ToolOutput::Error(message)),
        };
        let at = target.value;
        let label = string_field(&params, "label")
            .map(str::to_string)
            .unwrap_or_else(|| at.coordinate_label());

        let mut points = match self
            .service
            .trend(&TrendQuery {
                metric,
                location: at,
            })
            .await
        {
            Ok(points) => points,
            Err(e) => return Ok(ToolOutput::Error(format!("Trend lookup failed: {:#}", e))),
        };
        points.sort_by_key(|p| p.year);

        let Some(summary) = TrendSummary::of(&points) else {
            return Ok(ToolOutput::Error(format!(
                "No {} history is available at {}",
                metric.as_str(),
                label
            )));
        };

        let shown = ctx.show_in_panel(
            PanelContent::TrendChart {
                metric: metric.as_str().to_string(),
                location: at,
                label: label.clone(),
                points: points.clone(),
            },
            true,
            target.from_selection,
            target.epoch,
        );

        Ok(panel_result(
            json!({
                "status": "success",
                "metric": metric,
                "location": at,
                "label": label,
                "series": points,
                "summary": summary.to_json(),
            }),
            shown,
        ))
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Insight
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TrendSummary {
    first: TrendPoint,
    last: TrendPoint,
}

impl TrendSummary {
    /// Expects `points` sorted by year.
    fn of(points: &[TrendPoint]) -> Option<Self> {
        Some(Self {
            first: *points.first()?,
            last: *points.last()?,
        })
    }

    fn change(&self) -> f64 {
        self.last.value - self.first.value
    }

    /// `None` when the first value is zero.
    fn percent_change(&self) -> Option<f64> {
        (self.first.value != 0.0).then(|| self.change() / self.first.value.abs() * 100.0)
    }

    fn to_json(self) -> Value {
        json!({
            "first_year": self.first.year,
            "first_value": self.first.value,
            "last_year": self.last.year,
            "last_value": self.last.value,
            "change": self.change(),
            "percent_change": self.percent_change(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaleResultPolicy;
    use crate::geo::{Bbox, LngLat};
    use crate::services::insight::{
        CenterPoint, PointInsight, RankedLocation, RegionInsight, RegionQuery,
    };
    use crate::session::highlight::HighlightedLocation;
    use crate::session::selection::SelectedRegion;
    use crate::session::Session;
    use crate::test_support::{ctx_with_session, test_ctx, FakeInsight, RecordedCall};
    use serde_json::Map;

    fn props(pairs: &[(&str, f64)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    fn ranked(lng: f64, lat: f64, distance_m: Option<f64>) -> RankedLocation {
        RankedLocation {
            feature_id: Some(format!("{lng},{lat}")),
            value: Some(1.0),
            center: Some(CenterPoint {
                longitude: lng,
                latitude: lat,
            }),
            bbox: None,
            distance_m,
            properties: Map::new(),
        }
    }

    #[tokio::test]
    async fn point_insight_uses_selection_and_opens_panel() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_point(Ok(PointInsight {
            feature_id: Some("c7".to_string()),
            properties: props(&[("ndvi", 0.42)]),
        }));
        let ctx = test_ctx();
        ctx.session.set_selected_point(Some(LngLat::new(-122.41, 37.77)));

        let out = PointInsightTool::new(fake.clone())
            .execute(json!({}), &ctx)
            .await
            .unwrap();
        assert!(out.is_success());
        assert_eq!(fake.calls(), vec![RecordedCall::Point(LngLat::new(-122.41, 37.77))]);
        assert!(ctx.session.panel_is_open());
        assert_eq!(
            ctx.session.panel_current().map(|e| e.content.kind()),
            Some("point_insight")
        );
        assert!(out.to_json().get("stale").is_none());
    }

    #[tokio::test]
    async fn point_insight_explicit_coordinates_become_selection() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_point(Ok(PointInsight {
            feature_id: None,
            properties: Map::new(),
        }));
        let ctx = test_ctx();
        PointInsightTool::new(fake)
            .execute(json!({"longitude": 1.0, "latitude": 2.0}), &ctx)
            .await
            .unwrap();
        assert_eq!(ctx.session.selected_point(), Some(LngLat::new(1.0, 2.0)));
    }

    #[tokio::test]
    async fn point_insight_explicit_coordinates_replace_highlights() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_point(Ok(PointInsight {
            feature_id: None,
            properties: Map::new(),
        }));
        let ctx = test_ctx();
        ctx.session.set_highlights(vec![HighlightedLocation::point(
            LngLat::new(-122.44, 37.75),
            Some("Hotspot".to_string()),
        )]);

        PointInsightTool::new(fake)
            .execute(json!({"longitude": 5.0, "latitude": 6.0}), &ctx)
            .await
            .unwrap();
        assert!(ctx.session.highlights().is_empty());
        assert_eq!(ctx.session.selected_point(), Some(LngLat::new(5.0, 6.0)));
    }

    #[tokio::test]
    async fn point_insight_without_selection_is_soft_error() {
        let fake = Arc::new(FakeInsight::new());
        let out = PointInsightTool::new(fake.clone())
            .execute(json!({}), &test_ctx())
            .await
            .unwrap();
        assert!(!out.is_success());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn point_insight_failure_leaves_panel_alone() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_point(Err("not_found".to_string()));
        let ctx = test_ctx();
        let out = PointInsightTool::new(fake)
            .execute(json!({"longitude": 1.0, "latitude": 2.0}), &ctx)
            .await
            .unwrap();
        assert!(out.error_message().unwrap_or_default().contains("not_found"));
        assert!(ctx.session.panel_current().is_none());
        assert!(!ctx.session.panel_is_open());
    }

    #[tokio::test]
    async fn stale_point_result_is_discarded_by_default() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_point(Ok(PointInsight {
            feature_id: None,
            properties: Map::new(),
        }));
        let ctx = test_ctx();
        ctx.session.set_selected_point(Some(LngLat::new(1.0, 1.0)));
        let session = ctx.session.clone();
        fake.during_fetch(move || {
            session.handle_map_click(LngLat::new(9.0, 9.0));
        });

        let out = PointInsightTool::new(fake)
            .execute(json!({}), &ctx)
            .await
            .unwrap();
        let json = out.to_json();
        assert_eq!(json["stale"], true);
        assert_eq!(json["status"], "success");
        assert!(ctx.session.panel_current().is_none());
        assert_eq!(ctx.session.selected_point(), Some(LngLat::new(9.0, 9.0)));
    }

    #[tokio::test]
    async fn stale_point_result_applies_under_last_write_wins() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_point(Ok(PointInsight {
            feature_id: None,
            properties: Map::new(),
        }));
        let mut ctx = test_ctx();
        ctx.settings.stale_results = StaleResultPolicy::LastWriteWins;
        ctx.session.set_selected_point(Some(LngLat::new(1.0, 1.0)));
        let session = ctx.session.clone();
        fake.during_fetch(move || {
            session.handle_map_click(LngLat::new(9.0, 9.0));
        });

        PointInsightTool::new(fake)
            .execute(json!({}), &ctx)
            .await
            .unwrap();
        assert!(ctx.session.panel_current().is_some());
    }

    #[tokio::test]
    async fn region_insight_missing_context_is_soft_error() {
        let fake = Arc::new(FakeInsight::new());
        let out = RegionInsightTool::new(fake.clone())
            .execute(json!({}), &test_ctx())
            .await
            .unwrap();
        assert!(matches!(out, ToolOutput::Error(_)));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn region_insight_synthesizes_box_around_point() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_region(Ok(RegionInsight {
            feature_id: None,
            count: Some(4),
            aggregates: props(&[("ndvi_mean", 0.3)]),
            feature: None,
        }));
        let ctx = test_ctx();
        ctx.session.set_selected_point(Some(LngLat::new(-122.0, 37.0)));

        let out = RegionInsightTool::new(fake.clone())
            .execute(json!({}), &ctx)
            .await
            .unwrap();
        assert!(out.is_success());
        let expected = Bbox::around(LngLat::new(-122.0, 37.0), 0.003);
        assert_eq!(fake.calls(), vec![RecordedCall::Region(RegionQuery::Bbox(expected))]);
        match ctx.session.panel_current().map(|e| e.content) {
            Some(PanelContent::RegionSummary { cell_count, region, .. }) => {
                assert_eq!(cell_count, Some(4));
                assert_eq!(region, SelectedRegion::Bbox { bbox: expected });
            }
            other => panic!("unexpected panel content {other:?}"),
        }
    }

    #[tokio::test]
    async fn region_insight_feature_query_shows_cell_properties() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_region(Ok(RegionInsight {
            feature_id: Some("f1".to_string()),
            count: None,
            aggregates: Map::new(),
            feature: Some(props(&[("lst", 31.0)])),
        }));
        let ctx = test_ctx();
        let out = RegionInsightTool::new(fake)
            .execute(json!({"feature_id": "f1"}), &ctx)
            .await
            .unwrap()
            .to_json();
        assert_eq!(out["aggregates"]["lst"], 31.0);
        assert_eq!(out["feature_id"], "f1");
    }

    #[tokio::test]
    async fn region_insight_rejects_malformed_bbox() {
        let fake = Arc::new(FakeInsight::new());
        let out = RegionInsightTool::new(fake)
            .execute(json!({"bbox": [1, 2, 3]}), &test_ctx())
            .await
            .unwrap();
        assert!(!out.is_success());
    }

    #[tokio::test]
    async fn find_extreme_accepts_top_n_bounds() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_ranked(Ok(vec![ranked(-122.4, 37.7, None)]));
        let tool = FindExtremeTool::new(fake.clone());
        let ctx = test_ctx();

        for top_n in [1, 20] {
            let out = tool
                .execute(json!({"metric": "heat_score", "top_n": top_n}), &ctx)
                .await
                .unwrap();
            assert!(out.is_success(), "top_n {top_n} rejected");
            assert_eq!(out.to_json()["top_n"], top_n);
        }

        tool.execute(json!({"metric": "lst", "top_n": 99, "mode": "min"}), &ctx)
            .await
            .unwrap();
        assert_eq!(
            fake.calls().last(),
            Some(&RecordedCall::Extreme(ExtremeQuery {
                metric: Metric::Lst,
                mode: RankMode::Min,
                top_n: 20,
                land_only: true,
            }))
        );
    }

    #[tokio::test]
    async fn find_extreme_rejects_unknown_metric_and_mode() {
        let fake = Arc::new(FakeInsight::new());
        let tool = FindExtremeTool::new(fake.clone());
        let out = tool.execute(json!({"metric": "humidity"}), &test_ctx()).await.unwrap();
        assert!(out.error_message().unwrap_or_default().contains("green_score"));
        let out = tool
            .execute(json!({"metric": "ndvi", "mode": "median"}), &test_ctx())
            .await
            .unwrap();
        assert!(!out.is_success());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn find_extreme_does_not_touch_map() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_ranked(Ok(vec![ranked(-122.4, 37.7, None)]));
        let ctx = test_ctx();
        FindExtremeTool::new(fake)
            .execute(json!({"metric": "green_score"}), &ctx)
            .await
            .unwrap();
        assert!(ctx.session.highlights().is_empty());
        assert!(ctx.session.fly_to_request().is_none());
    }

    #[tokio::test]
    async fn find_nearby_fills_distance_and_sorts() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_ranked(Ok(vec![
            ranked(0.01, 0.0, None),
            ranked(0.001, 0.0, None),
            ranked(0.005, 0.0, Some(10.0)),
        ]));
        let ctx = ctx_with_session(Session::default());
        let out = FindNearbyTool::new(fake.clone())
            .execute(json!({"longitude": 0.0, "latitude": 0.0, "radius_m": 10}), &ctx)
            .await
            .unwrap()
            .to_json();

        let distances: Vec<f64> = out["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["distance_m"].as_f64().unwrap())
            .collect();
        assert_eq!(distances.len(), 3);
        assert_eq!(distances[0], 10.0);
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(out["radius_m"], 50.0);

        match fake.calls().first() {
            Some(RecordedCall::Nearby(query)) => {
                assert_eq!(query.limit, 5);
                assert_eq!(query.metric, None);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn find_nearby_needs_a_center() {
        let fake = Arc::new(FakeInsight::new());
        let out = FindNearbyTool::new(fake)
            .execute(json!({"metric": "ndvi"}), &test_ctx())
            .await
            .unwrap();
        assert!(!out.is_success());
    }

    #[tokio::test]
    async fn trend_summarizes_sorted_series_and_keeps_previous_panel() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_point(Ok(PointInsight {
            feature_id: None,
            properties: Map::new(),
        }));
        fake.set_trend(Ok(vec![
            TrendPoint { year: 2022, value: 0.5 },
            TrendPoint { year: 2018, value: 0.4 },
        ]));
        let ctx = test_ctx();
        ctx.session.set_selected_point(Some(LngLat::new(1.0, 2.0)));
        PointInsightTool::new(fake.clone())
            .execute(json!({}), &ctx)
            .await
            .unwrap();

        let out = TemporalTrendTool::new(fake)
            .execute(json!({"metric": "ndvi", "label": "Mission"}), &ctx)
            .await
            .unwrap()
            .to_json();
        assert_eq!(out["series"][0]["year"], 2018);
        assert_eq!(out["summary"]["first_year"], 2018);
        assert_eq!(out["summary"]["last_year"], 2022);
        let pct = out["summary"]["percent_change"].as_f64().unwrap();
        assert!((pct - 25.0).abs() < 1e-9);

        assert_eq!(
            ctx.session.panel_current().map(|e| e.content.kind()),
            Some("trend_chart")
        );
        assert_eq!(
            ctx.session.panel_alternate().map(|e| e.content.kind()),
            Some("point_insight")
        );
    }

    #[tokio::test]
    async fn trend_without_location_is_soft_error() {
        let fake = Arc::new(FakeInsight::new());
        let out = TemporalTrendTool::new(fake)
            .execute(json!({"metric": "lst"}), &test_ctx())
            .await
            .unwrap();
        assert!(!out.is_success());
    }

    #[tokio::test]
    async fn empty_trend_is_soft_error() {
        let fake = Arc::new(FakeInsight::new());
        fake.set_trend(Ok(Vec::new()));
        let ctx = test_ctx();
        let out = TemporalTrendTool::new(fake)
            .execute(json!({"metric": "lst", "longitude": 1, "latitude": 1}), &ctx)
            .await
            .unwrap();
        assert!(!out.is_success());
        assert!(ctx.session.panel_current().is_none());
    }

    #[test]
    fn percent_change_is_undefined_from_zero() {
        let summary = TrendSummary {
            first: TrendPoint { year: 2019, value: 0.0 },
            last: TrendPoint { year: 2020, value: 1.0 },
        };
        assert_eq!(summary.percent_change(), None);
        assert_eq!(summary.change(), 1.0);
    }
}
