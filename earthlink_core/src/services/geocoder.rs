//! Place search and reverse geocoding.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::geo::{Bbox, LngLat};
use crate::http_client::build_http_client_with_timeout;

const SEARCH_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceKind {
    Poi,
    Landmark,
    Address,
    Neighborhood,
    Locality,
    Place,
    Region,
    Other,
}

impl PlaceKind {
    pub fn from_type(raw: &str) -> Self {
        match raw {
            "poi" => PlaceKind::Poi,
            "poi.landmark" | "landmark" => PlaceKind::Landmark,
            "address" => PlaceKind::Address,
            "neighborhood" => PlaceKind::Neighborhood,
            "locality" => PlaceKind::Locality,
            "place" => PlaceKind::Place,
            "region" | "district" | "country" => PlaceKind::Region,
            _ => PlaceKind::Other,
        }
    }

    pub fn is_point_of_interest(&self) -> bool {
        matches!(self, PlaceKind::Poi | PlaceKind::Landmark)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceCandidate {
    pub name: String,
    pub location: LngLat,
    pub kind: PlaceKind,
    pub relevance: f64,
    pub bbox: Option<Bbox>,
    /// Provider id. Never surfaced to the agent.
    #[serde(skip_serializing)]
    pub id: Option<String>,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Free-text search, optionally biased towards `near`.
    async fn search(&self, query: &str, near: Option<LngLat>) -> Result<Vec<PlaceCandidate>>;

    async fn reverse(&self, at: LngLat) -> Result<Vec<PlaceCandidate>>;
}

/// First point-of-interest/landmark at or above `poi_threshold`
/// relevance, else the first candidate.
pub fn select_candidate(
    candidates: &[PlaceCandidate],
    poi_threshold: f64,
) -> Option<&PlaceCandidate> {
    candidates
        .iter()
        .find(|c| c.kind.is_point_of_interest() && c.relevance >= poi_threshold)
        .or_else(|| candidates.first())
}

/// Mapbox Geocoding v5 (`mapbox.places`) client.
pub struct MapboxGeocoder {
    api_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl MapboxGeocoder {
    pub fn new(
        api_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            client: build_http_client_with_timeout(Some(timeout))?,
        })
    }

    fn endpoint(&self, query: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/geocoding/v5/mapbox.places/", self.api_url))
            .context("Invalid geocoder base URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Geocoder base URL cannot have path segments"))?
            .pop_if_empty()
            .push(&format!("{}.json", query));
        url.query_pairs_mut()
            .append_pair("access_token", &self.access_token);
        Ok(url)
    }

    async fn fetch(&self, url: Url) -> Result<Vec<PlaceCandidate>> {
        if self.access_token.is_empty() {
            bail!("Geocoder access token is not configured");
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Geocoding request failed")?;
        if !response.status().is_success() {
            bail!("Geocoder error {}", response.status());
        }
        let payload: Value = response
            .json()
            .await
            .context("Failed to parse geocoder response")?;
        Ok(parse_feature_collection(&payload))
    }
}

#[async_trait]
impl Geocoder for MapboxGeocoder {
    async fn search(&self, query: &str, near: Option<LngLat>) -> Result<Vec<PlaceCandidate>> {
        let mut url = self.endpoint(query)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("limit", &SEARCH_LIMIT.to_string());
            if let Some(near) = near {
                pairs.append_pair("proximity", &format!("{},{}", near.lng, near.lat));
            }
        }
        self.fetch(url).await
    }

    async fn reverse(&self, at: LngLat) -> Result<Vec<PlaceCandidate>> {
        let mut url = self.endpoint(&format!("{},{}", at.lng, at.lat))?;
        url.query_pairs_mut().append_pair("limit", "1");
        self.fetch(url).await
    }
}

/// Reads a Mapbox-style feature collection. Features without a usable
/// center are skipped.
pub fn parse_feature_collection(payload: &Value) -> Vec<PlaceCandidate> {
    let Some(features) = payload.get("features").and_then(Value::as_array) else {
        return Vec::new();
    };
    features.iter().filter_map(parse_feature).collect()
}

fn parse_feature(feature: &Value) -> Option<PlaceCandidate> {
    let center = feature.get("center")?.as_array()?;
    let lng = center.first()?.as_f64()?;
    let lat = center.get(1)?.as_f64()?;
    let name = feature
        .get("place_name")
        .or_else(|| feature.get("text"))
        .and_then(Value::as_str)?
        .to_string();

    let is_landmark = feature
        .get("properties")
        .and_then(|p| p.get("landmark"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let kind = match feature
        .get("place_type")
        .and_then(Value::as_array)
        .and_then(|types| types.first())
        .and_then(Value::as_str)
        .map(PlaceKind::from_type)
        .unwrap_or(PlaceKind::Other)
    {
        PlaceKind::Poi if is_landmark => PlaceKind::Landmark,
        other => other,
    };

    let bbox = feature.get("bbox").and_then(Value::as_array).and_then(|b| {
        if b.len() != 4 {
            return None;
        }
        let mut out = [0.0; 4];
        for (slot, v) in out.iter_mut().zip(b) {
            *slot = v.as_f64()?;
        }
        Some(Bbox(out))
    });

    Some(PlaceCandidate {
        name,
        location: LngLat::new(lng, lat),
        kind,
        relevance: feature.get("relevance").and_then(Value::as_f64).unwrap_or(0.0),
        bbox,
        id: feature.get("id").and_then(Value::as_str).map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(name: &str, kind: PlaceKind, relevance: f64) -> PlaceCandidate {
        PlaceCandidate {
            name: name.to_string(),
            location: LngLat::new(0.0, 0.0),
            kind,
            relevance,
            bbox: None,
            id: None,
        }
    }

    #[test]
    fn select_prefers_relevant_poi() {
        let candidates = vec![
            candidate("Golden Gate Park Ave", PlaceKind::Address, 1.0),
            candidate("Golden Gate Park", PlaceKind::Poi, 0.9),
        ];
        assert_eq!(
            select_candidate(&candidates, 0.8).map(|c| c.name.as_str()),
            Some("Golden Gate Park")
        );
    }

    #[test]
    fn select_falls_back_to_first_result() {
        let candidates = vec![
            candidate("Market St", PlaceKind::Address, 0.7),
            candidate("Market Cafe", PlaceKind::Poi, 0.5),
        ];
        assert_eq!(select_candidate(&candidates, 0.8).map(|c| c.name.as_str()), Some("Market St"));
        assert!(select_candidate(&[], 0.8).is_none());
    }

    #[test]
    fn parses_mapbox_features() {
        let payload = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "id": "poi.123",
                    "place_type": ["poi"],
                    "relevance": 0.95,
                    "place_name": "Coit Tower, San Francisco",
                    "center": [-122.4058, 37.8024],
                    "properties": {"landmark": true}
                },
                {
                    "id": "place.1",
                    "place_type": ["place"],
                    "place_name": "San Francisco, California",
                    "center": [-122.4194, 37.7749],
                    "bbox": [-122.5, 37.7, -122.3, 37.8]
                },
                {"place_name": "no center"}
            ]
        });
        let places = parse_feature_collection(&payload);
        assert_eq!(places.len(), 2);
        assert_eq!(places[0].kind, PlaceKind::Landmark);
        assert_eq!(places[0].id.as_deref(), Some("poi.123"));
        assert_eq!(places[1].bbox, Some(Bbox([-122.5, 37.7, -122.3, 37.8])));
        assert_eq!(places[1].relevance, 0.0);
    }

    #[test]
    fn serialized_candidate_hides_provider_id() {
        let mut c = candidate("X", PlaceKind::Poi, 1.0);
        c.id = Some("poi.secret".to_string());
        let json = serde_json::to_value(&c).unwrap();
        assert!(json.get("id").is_none());
    }

    #[test]
    fn endpoint_escapes_query_text() {
        let geocoder =
            MapboxGeocoder::new("https://api.mapbox.com/", "tok", Duration::from_secs(5)).unwrap();
        let url = geocoder.endpoint("Dolores Park").unwrap();
        assert!(url
            .as_str()
            .starts_with("https://api.mapbox.com/geocoding/v5/mapbox.places/Dolores%20Park.json?"));
        assert!(url.as_str().contains("access_token=tok"));
    }
}
