//! Insight data service client.
//!
//! The service answers point/region/ranking/proximity/comparison/trend
//! queries over the gridded city dataset. Every response carries a
//! `status` discriminator; anything other than `"success"` (and any
//! transport or HTTP failure) comes back as an `Err`, which operations
//! surface to the agent as a soft error.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::geo::{Bbox, LngLat};
use crate::http_client::build_http_client_with_timeout;

pub const MAX_TOP_N: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HeatScore,
    GreenScore,
    Lst,
    Ndvi,
    Evi,
    Ndbi,
    Bsi,
    FogScore,
    Elevation,
    Slope,
    NightLights,
}

impl Metric {
    pub const ALL: [Metric; 11] = [
        Metric::HeatScore,
        Metric::GreenScore,
        Metric::Lst,
        Metric::Ndvi,
        Metric::Evi,
        Metric::Ndbi,
        Metric::Bsi,
        Metric::FogScore,
        Metric::Elevation,
        Metric::Slope,
        Metric::NightLights,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::HeatScore => "heat_score",
            Metric::GreenScore => "green_score",
            Metric::Lst => "lst",
            Metric::Ndvi => "ndvi",
            Metric::Evi => "evi",
            Metric::Ndbi => "ndbi",
            Metric::Bsi => "bsi",
            Metric::FogScore => "fog_score",
            Metric::Elevation => "elevation",
            Metric::Slope => "slope",
            Metric::NightLights => "night_lights",
        }
    }

    /// Case-insensitive; `-` and spaces are treated as `_`.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|m| m.as_str() == normalized)
    }

    pub fn vocabulary() -> Vec<&'static str> {
        Self::ALL.iter().map(Metric::as_str).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMode {
    #[default]
    Max,
    Min,
}

impl RankMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "max" | "highest" | "top" => Some(Self::Max),
            "min" | "lowest" | "bottom" => Some(Self::Min),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RankMode::Max => "max",
            RankMode::Min => "min",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointInsight {
    #[serde(default, deserialize_with = "id_as_string")]
    pub feature_id: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegionQuery {
    Bbox(Bbox),
    FeatureId(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInsight {
    #[serde(default, deserialize_with = "id_as_string")]
    pub feature_id: Option<String>,
    /// Number of grid cells intersecting a bbox query.
    #[serde(default)]
    pub count: Option<u64>,
    /// `<metric>_mean|_min|_max` for bbox queries.
    #[serde(default)]
    pub aggregates: Map<String, Value>,
    /// Properties of the single cell for feature-id queries.
    #[serde(default)]
    pub feature: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtremeQuery {
    pub metric: Metric,
    pub mode: RankMode,
    pub top_n: u32,
    pub land_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CenterPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl From<CenterPoint> for LngLat {
    fn from(c: CenterPoint) -> Self {
        LngLat::new(c.longitude, c.latitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedLocation {
    #[serde(default, deserialize_with = "id_as_string")]
    pub feature_id: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub center: Option<CenterPoint>,
    #[serde(default)]
    pub bbox: Option<Bbox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl RankedLocation {
    /// Best single coordinate for this result.
    pub fn anchor(&self) -> Option<LngLat> {
        self.center
            .map(LngLat::from)
            .or_else(|| self.bbox.map(|b| b.center()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearbyQuery {
    pub center: LngLat,
    pub radius_m: f64,
    pub metric: Option<Metric>,
    pub mode: RankMode,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompareTarget {
    Point { location: LngLat, label: String },
    Feature { id: String, label: String },
}

impl CompareTarget {
    pub fn label(&self) -> &str {
        match self {
            CompareTarget::Point { label, .. } | CompareTarget::Feature { label, .. } => label,
        }
    }

    fn to_request(&self) -> Value {
        match self {
            CompareTarget::Point { location, label } => json!({
                "longitude": location.lng,
                "latitude": location.lat,
                "label": label,
            }),
            CompareTarget::Feature { id, label } => json!({
                "feature_id": id,
                "label": label,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    #[serde(default)]
    pub label: String,
    #[serde(default, deserialize_with = "id_as_string")]
    pub feature_id: Option<String>,
    #[serde(default)]
    pub location: Option<LngLat>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendQuery {
    pub metric: Metric,
    pub location: LngLat,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub year: i32,
    pub value: f64,
}

#[async_trait]
pub trait InsightService: Send + Sync {
    async fn point(&self, at: LngLat) -> Result<PointInsight>;

    async fn region(&self, query: &RegionQuery) -> Result<RegionInsight>;

    async fn find_extreme(&self, query: &ExtremeQuery) -> Result<Vec<RankedLocation>>;

    async fn nearby(&self, query: &NearbyQuery) -> Result<Vec<RankedLocation>>;

    async fn compare(
        &self,
        targets: &[CompareTarget],
        metrics: &[Metric],
    ) -> Result<Vec<ComparisonEntry>>;

    /// Year-ordered series for one metric at one location.
    async fn trend(&self, query: &TrendQuery) -> Result<Vec<TrendPoint>>;
}

pub struct HttpInsightService {
    api_url: String,
    client: reqwest::Client,
}

impl HttpInsightService {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            client: build_http_client_with_timeout(Some(timeout))?,
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{}", self.api_url, path);
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Insight request to {} failed", path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Insight service error {}: {}", status, error_detail(&body));
        }

        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse insight response from {}", path))?;
        ensure_success(payload)
    }
}

#[async_trait]
impl InsightService for HttpInsightService {
    async fn point(&self, at: LngLat) -> Result<PointInsight> {
        let payload = self
            .post(
                "/insight/point",
                json!({ "longitude": at.lng, "latitude": at.lat }),
            )
            .await?;
        serde_json::from_value(payload).context("Malformed point insight response")
    }

    async fn region(&self, query: &RegionQuery) -> Result<RegionInsight> {
        let body = match query {
            RegionQuery::Bbox(bbox) => json!({ "bbox": bbox }),
            RegionQuery::FeatureId(id) => json!({ "feature_id": id }),
        };
        let payload = self.post("/insight/region", body).await?;
        serde_json::from_value(payload).context("Malformed region insight response")
    }

    async fn find_extreme(&self, query: &ExtremeQuery) -> Result<Vec<RankedLocation>> {
        let payload = self
            .post(
                "/insight/find",
                json!({
                    "metric": query.metric.as_str(),
                    "mode": query.mode.as_str(),
                    "top_n": query.top_n.clamp(1, MAX_TOP_N),
                    "land_only": query.land_only,
                }),
            )
            .await?;
        parse_results(payload)
    }

    async fn nearby(&self, query: &NearbyQuery) -> Result<Vec<RankedLocation>> {
        let payload = self
            .post(
                "/insight/nearby",
                json!({
                    "longitude": query.center.lng,
                    "latitude": query.center.lat,
                    "radius_m": query.radius_m,
                    "metric": query.metric.map(|m| m.as_str()),
                    "mode": query.mode.as_str(),
                    "limit": query.limit,
                }),
            )
            .await?;
        parse_results(payload)
    }

    async fn compare(
        &self,
        targets: &[CompareTarget],
        metrics: &[Metric],
    ) -> Result<Vec<ComparisonEntry>> {
        let payload = self
            .post(
                "/insight/compare",
                json!({
                    "locations": targets.iter().map(CompareTarget::to_request).collect::<Vec<_>>(),
                    "metrics": metrics.iter().map(Metric::as_str).collect::<Vec<_>>(),
                }),
            )
            .await?;
        parse_comparisons(payload, targets)
    }

    async fn trend(&self, query: &TrendQuery) -> Result<Vec<TrendPoint>> {
        let payload = self
            .post(
                "/insight/trend",
                json!({
                    "metric": query.metric.as_str(),
                    "longitude": query.location.lng,
                    "latitude": query.location.lat,
                }),
            )
            .await?;
        parse_trend_series(&payload)
    }
}

/// Returns the payload if `status == "success"`, else an error carrying
/// the service's message.
pub fn ensure_success(payload: Value) -> Result<Value> {
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("missing");
    if status == "success" {
        return Ok(payload);
    }
    let message = payload
        .get("message")
        .or_else(|| payload.get("detail"))
        .and_then(Value::as_str)
        .unwrap_or("no details");
    Err(anyhow!("Insight service returned '{}': {}", status, message))
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").map(|d| match d {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
        .unwrap_or_else(|| body.chars().take(300).collect())
}

pub fn parse_results(payload: Value) -> Result<Vec<RankedLocation>> {
    let results = payload.get("results").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(results).context("Malformed ranked results")
}

/// Entries come back in request order; missing labels and locations are
/// filled from the matching target.
pub fn parse_comparisons(
    payload: Value,
    targets: &[CompareTarget],
) -> Result<Vec<ComparisonEntry>> {
    let raw = payload
        .get("comparisons")
        .cloned()
        .unwrap_or(Value::Array(Vec::new()));
    let mut entries: Vec<ComparisonEntry> =
        serde_json::from_value(raw).context("Malformed comparison response")?;
    for (entry, target) in entries.iter_mut().zip(targets) {
        if entry.label.trim().is_empty() {
            entry.label = target.label().to_string();
        }
        match target {
            CompareTarget::Point { location, .. } if entry.location.is_none() => {
                entry.location = Some(*location);
            }
            CompareTarget::Feature { id, .. } if entry.feature_id.is_none() => {
                entry.feature_id = Some(id.clone());
            }
            _ => {}
        }
    }
    Ok(entries)
}

/// Accepts `series` either as `{ "2019": 0.4, ... }` or as
/// `[{ "year": 2019, "value": 0.4 }, ...]`. Null values are dropped and
/// the result is sorted by year.
pub fn parse_trend_series(payload: &Value) -> Result<Vec<TrendPoint>> {
    let series = payload
        .get("series")
        .ok_or_else(|| anyhow!("Trend response has no 'series'"))?;
    let mut points = match series {
        Value::Object(map) => map
            .iter()
            .filter_map(|(year, value)| {
                Some(TrendPoint {
                    year: year.trim().parse().ok()?,
                    value: value.as_f64()?,
                })
            })
            .collect::<Vec<_>>(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                Some(TrendPoint {
                    year: i32::try_from(item.get("year")?.as_i64()?).ok()?,
                    value: item.get("value")?.as_f64()?,
                })
            })
            .collect::<Vec<_>>(),
        _ => bail!("Trend 'series' must be an object or array"),
    };
    points.sort_by_key(|p| p.year);
    Ok(points)
}

fn id_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
