//! Clients for the external collaborators the operations call into.
//!
//! Both collaborators sit behind traits so a session can be wired to the
//! HTTP implementations in production and to in-memory fakes in tests.

pub mod geocoder;
pub mod insight;

pub use geocoder::{select_candidate, Geocoder, MapboxGeocoder, PlaceCandidate, PlaceKind};
pub use insight::{HttpInsightService, InsightService, Metric, RankMode};
