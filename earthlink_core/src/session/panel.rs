//! Side panel content router: one current view plus one alternate view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{Bbox, LngLat};
use crate::services::insight::{ComparisonEntry, TrendPoint};

use super::selection::SelectedRegion;

/// Two-slot holder. Content type is opaque to the router.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelRouter<C> {
    current: Option<C>,
    alternate: Option<C>,
    open: bool,
}

impl<C> Default for PanelRouter<C> {
    fn default() -> Self {
        Self {
            current: None,
            alternate: None,
            open: false,
        }
    }
}

impl<C> PanelRouter<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current content. With `keep_previous`, an existing
    /// current view becomes the alternate; otherwise the alternate is
    /// cleared. Does not open the panel.
    pub fn set_content(&mut self, content: C, keep_previous: bool) {
        if keep_previous {
            if let Some(previous) = self.current.take() {
                self.alternate = Some(previous);
            }
        } else {
            self.alternate = None;
        }
        self.current = Some(content);
    }

    /// Swaps current and alternate. Returns false (and changes nothing)
    /// when there is no alternate.
    pub fn toggle(&mut self) -> bool {
        if self.alternate.is_none() {
            return false;
        }
        std::mem::swap(&mut self.current, &mut self.alternate);
        true
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn current(&self) -> Option<&C> {
        self.current.as_ref()
    }

    pub fn alternate(&self) -> Option<&C> {
        self.alternate.as_ref()
    }

    pub fn has_alternate(&self) -> bool {
        self.alternate.is_some()
    }
}

/// A renderable analysis view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelContent {
    PointInsight {
        location: LngLat,
        feature_id: Option<String>,
        properties: serde_json::Map<String, serde_json::Value>,
    },
    RegionSummary {
        region: SelectedRegion,
        cell_count: Option<u64>,
        aggregates: serde_json::Map<String, serde_json::Value>,
    },
    Comparison {
        metrics: Vec<String>,
        entries: Vec<ComparisonEntry>,
    },
    TrendChart {
        metric: String,
        location: LngLat,
        label: String,
        points: Vec<TrendPoint>,
    },
    Place {
        name: String,
        location: LngLat,
        bbox: Option<Bbox>,
    },
}

impl PanelContent {
    pub fn kind(&self) -> &'static str {
        match self {
            PanelContent::PointInsight { .. } => "point_insight",
            PanelContent::RegionSummary { .. } => "region_summary",
            PanelContent::Comparison { .. } => "comparison",
            PanelContent::TrendChart { .. } => "trend_chart",
            PanelContent::Place { .. } => "place",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub content: PanelContent,
}

impl PanelEntry {
    pub fn new(content: PanelContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_previous_moves_current_to_alternate_and_toggle_swaps() {
        let mut router = PanelRouter::new();
        router.set_content("A", false);
        router.set_content("B", true);
        assert_eq!(router.current(), Some(&"B"));
        assert_eq!(router.alternate(), Some(&"A"));

        assert!(router.toggle());
        assert_eq!(router.current(), Some(&"A"));
        assert_eq!(router.alternate(), Some(&"B"));

        assert!(router.toggle());
        assert_eq!(router.current(), Some(&"B"));
        assert_eq!(router.alternate(), Some(&"A"));
    }

    #[test]
    fn replacing_without_keep_clears_alternate() {
        let mut router = PanelRouter::new();
        router.set_content(1, false);
        router.set_content(2, true);
        router.set_content(3, false);
        assert_eq!(router.current(), Some(&3));
        assert!(!router.has_alternate());
    }

    #[test]
    fn keep_previous_with_empty_current_leaves_alternate() {
        let mut router: PanelRouter<u8> = PanelRouter::new();
        router.set_content(1, true);
        assert_eq!(router.current(), Some(&1));
        assert!(router.alternate().is_none());
    }

    #[test]
    fn toggle_without_alternate_is_noop() {
        let mut router = PanelRouter::new();
        assert!(!router.toggle());
        router.set_content("only", false);
        let before = router.clone();
        assert!(!router.toggle());
        assert!(!router.toggle());
        assert_eq!(router, before);
    }

    #[test]
    fn content_can_be_set_while_closed() {
        let mut router = PanelRouter::new();
        router.set_content("x", false);
        assert!(!router.is_open());
        router.open();
        assert!(router.is_open());
        router.close();
        assert!(!router.is_open());
        assert_eq!(router.current(), Some(&"x"));
    }
}
