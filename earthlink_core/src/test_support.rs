//! Fakes for the collaborator traits, shared by the operation tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Map;

use crate::geo::LngLat;
use crate::services::geocoder::{Geocoder, PlaceCandidate, PlaceKind};
use crate::services::insight::{
    CompareTarget, ComparisonEntry, ExtremeQuery, InsightService, Metric, NearbyQuery,
    PointInsight, RankedLocation, RegionInsight, RegionQuery, TrendPoint, TrendQuery,
};
use crate::session::Session;
use crate::tools::{OperationSettings, ToolContext};

pub fn test_ctx() -> ToolContext {
    ctx_with_session(Session::default())
}

pub fn ctx_with_session(session: Session) -> ToolContext {
    ToolContext::new(session, OperationSettings::default())
}

pub fn place(name: &str, lng: f64, lat: f64, kind: PlaceKind, relevance: f64) -> PlaceCandidate {
    PlaceCandidate {
        name: name.to_string(),
        location: LngLat::new(lng, lat),
        kind,
        relevance,
        bbox: None,
        id: None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Point(LngLat),
    Region(RegionQuery),
    Extreme(ExtremeQuery),
    Nearby(NearbyQuery),
    Compare(Vec<CompareTarget>, Vec<Metric>),
    Trend(TrendQuery),
}

type Canned<T> = Mutex<Result<T, String>>;

fn unset<T>() -> Canned<T> {
    Mutex::new(Err("no canned response".to_string()))
}

fn reply<T: Clone>(canned: &Canned<T>) -> Result<T> {
    canned.lock().unwrap().clone().map_err(|e| anyhow!(e))
}

/// Insight service with canned replies. Comparisons echo the targets unless
/// set explicitly.
pub struct FakeInsight {
    point: Canned<PointInsight>,
    region: Canned<RegionInsight>,
    ranked: Canned<Vec<RankedLocation>>,
    comparisons: Mutex<Option<Result<Vec<ComparisonEntry>, String>>>,
    trend: Canned<Vec<TrendPoint>>,
    calls: Mutex<Vec<RecordedCall>>,
    during_fetch: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl FakeInsight {
    pub fn new() -> Self {
        Self {
            point: unset(),
            region: unset(),
            ranked: unset(),
            comparisons: Mutex::new(None),
            trend: unset(),
            calls: Mutex::new(Vec::new()),
            during_fetch: Mutex::new(None),
        }
    }

    pub fn set_point(&self, reply: Result<PointInsight, String>) {
        *self.point.lock().unwrap() = reply;
    }

    pub fn set_region(&self, reply: Result<RegionInsight, String>) {
        *self.region.lock().unwrap() = reply;
    }

    pub fn set_ranked(&self, reply: Result<Vec<RankedLocation>, String>) {
        *self.ranked.lock().unwrap() = reply;
    }

    pub fn set_comparisons(&self, reply: Result<Vec<ComparisonEntry>, String>) {
        *self.comparisons.lock().unwrap() = Some(reply);
    }

    pub fn set_trend(&self, reply: Result<Vec<TrendPoint>, String>) {
        *self.trend.lock().unwrap() = reply;
    }

    /// Runs `f` while a request is "in flight", to simulate the user
    /// interacting with the map before the reply lands.
    pub fn during_fetch(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.during_fetch.lock().unwrap() = Some(Box::new(f));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: RecordedCall) {
        self.calls.lock().unwrap().push(call);
        if let Some(f) = self.during_fetch.lock().unwrap().as_ref() {
            f();
        }
    }
}

#[async_trait]
impl InsightService for FakeInsight {
    async fn point(&self, at: LngLat) -> Result<PointInsight> {
        self.record(RecordedCall::Point(at));
        tokio::task::yield_now().await;
        reply(&self.point)
    }

    async fn region(&self, query: &RegionQuery) -> Result<RegionInsight> {
        self.record(RecordedCall::Region(query.clone()));
        reply(&self.region)
    }

    async fn find_extreme(&self, query: &ExtremeQuery) -> Result<Vec<RankedLocation>> {
        self.record(RecordedCall::Extreme(query.clone()));
        reply(&self.ranked)
    }

    async fn nearby(&self, query: &NearbyQuery) -> Result<Vec<RankedLocation>> {
        self.record(RecordedCall::Nearby(query.clone()));
        reply(&self.ranked)
    }

    async fn compare(
        &self,
        targets: &[CompareTarget],
        metrics: &[Metric],
    ) -> Result<Vec<ComparisonEntry>> {
        self.record(RecordedCall::Compare(targets.to_vec(), metrics.to_vec()));
        if let Some(canned) = self.comparisons.lock().unwrap().clone() {
            return canned.map_err(|e| anyhow!(e));
        }
        Ok(targets
            .iter()
            .map(|target| ComparisonEntry {
                label: target.label().to_string(),
                feature_id: match target {
                    CompareTarget::Feature { id, .. } => Some(id.clone()),
                    CompareTarget::Point { .. } => None,
                },
                location: match target {
                    CompareTarget::Point { location, .. } => Some(*location),
                    CompareTarget::Feature { .. } => None,
                },
                properties: Map::new(),
            })
            .collect())
    }

    async fn trend(&self, query: &TrendQuery) -> Result<Vec<TrendPoint>> {
        self.record(RecordedCall::Trend(query.clone()));
        reply(&self.trend)
    }
}

/// Geocoder keyed by lower-cased query. Unknown queries return no matches.
pub struct FakeGeocoder {
    places: Mutex<HashMap<String, Vec<PlaceCandidate>>>,
    reverse: Canned<Vec<PlaceCandidate>>,
    searches: Mutex<Vec<String>>,
}

impl FakeGeocoder {
    pub fn new() -> Self {
        Self {
            places: Mutex::new(HashMap::new()),
            reverse: Mutex::new(Ok(Vec::new())),
            searches: Mutex::new(Vec::new()),
        }
    }

    pub fn add_place(&self, query: &str, candidates: Vec<PlaceCandidate>) {
        self.places
            .lock()
            .unwrap()
            .insert(query.to_lowercase(), candidates);
    }

    pub fn set_reverse(&self, reply: Result<Vec<PlaceCandidate>, String>) {
        *self.reverse.lock().unwrap() = reply;
    }

    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn search(&self, query: &str, _near: Option<LngLat>) -> Result<Vec<PlaceCandidate>> {
        self.searches.lock().unwrap().push(query.to_string());
        Ok(self
            .places
            .lock()
            .unwrap()
            .get(&query.trim().to_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn reverse(&self, _at: LngLat) -> Result<Vec<PlaceCandidate>> {
        reply(&self.reverse)
    }
}
