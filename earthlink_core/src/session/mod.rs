//! Shared map/chat session state.
//!
//! A [`Session`] is a cloneable handle onto one set of stores. It is handed
//! explicitly to every consumer: operations get it through their
//! [`ToolContext`](crate::tools::ToolContext), the server keeps it in its
//! state, and renderers subscribe to its change events. Locks are held only
//! for the duration of a setter and never across an await.

pub mod highlight;
pub mod panel;
pub mod selection;
pub mod viewport;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use uuid::Uuid;

use crate::geo::LngLat;

use highlight::HighlightedLocation;
use panel::{PanelContent, PanelEntry, PanelRouter};
use selection::{ClickOutcome, SelectedRegion, SelectionMode, SelectionState};
use viewport::{FlyToOutcome, Viewport, ViewportState};

/// Change notification delivered to subscribers after a store write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SelectionChanged {
        point: Option<LngLat>,
        region: Option<SelectedRegion>,
    },
    SelectionModeChanged {
        mode: SelectionMode,
    },
    BboxCornerChanged {
        corner: Option<LngLat>,
    },
    ViewportChanged {
        viewport: Viewport,
    },
    FlyToRequested {
        target: Viewport,
    },
    FlyToCleared,
    HighlightsChanged {
        highlights: Vec<HighlightedLocation>,
    },
    PanelChanged {
        open: bool,
        current: Option<Uuid>,
        current_kind: Option<&'static str>,
        has_alternate: bool,
    },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SelectionChanged { .. } => "selection_changed",
            SessionEvent::SelectionModeChanged { .. } => "selection_mode_changed",
            SessionEvent::BboxCornerChanged { .. } => "bbox_corner_changed",
            SessionEvent::ViewportChanged { .. } => "viewport_changed",
            SessionEvent::FlyToRequested { .. } => "fly_to_requested",
            SessionEvent::FlyToCleared => "fly_to_cleared",
            SessionEvent::HighlightsChanged { .. } => "highlights_changed",
            SessionEvent::PanelChanged { .. } => "panel_changed",
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub selection: SelectionState,
    pub viewport: ViewportState,
    pub highlights: Vec<HighlightedLocation>,
    pub panel: PanelRouter<PanelEntry>,
}

impl SessionState {
    fn selection_event(&self) -> SessionEvent {
        SessionEvent::SelectionChanged {
            point: self.selection.point,
            region: self.selection.region.clone(),
        }
    }

    fn panel_event(&self) -> SessionEvent {
        SessionEvent::PanelChanged {
            open: self.panel.is_open(),
            current: self.panel.current().map(|e| e.id),
            current_kind: self.panel.current().map(|e| e.content.kind()),
            has_alternate: self.panel.has_alternate(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PanelSnapshot {
    pub open: bool,
    pub current: Option<PanelEntry>,
    pub alternate: Option<PanelEntry>,
}

/// Read-only copy of all session state, for renderers and the agent.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub selection_mode: SelectionMode,
    pub selected_point: Option<LngLat>,
    pub selected_region: Option<SelectedRegion>,
    pub bbox_corner1: Option<LngLat>,
    pub viewport: Option<Viewport>,
    pub fly_to_request: Option<Viewport>,
    pub highlights: Vec<HighlightedLocation>,
    pub panel: PanelSnapshot,
}

#[derive(Clone)]
pub struct Session {
    id: Uuid,
    state: Arc<Mutex<SessionState>>,
    subscribers: Arc<Mutex<Vec<flume::Sender<SessionEvent>>>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Session {
    pub fn new(initial_view: Option<Viewport>) -> Self {
        let state = SessionState {
            viewport: ViewportState::new(initial_view),
            ..SessionState::default()
        };
        Self {
            id: Uuid::new_v4(),
            state: Arc::new(Mutex::new(state)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// New change-event stream. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> flume::Receiver<SessionEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` under the lock, then publishes the events it produced.
    fn update<R>(&self, f: impl FnOnce(&mut SessionState, &mut Vec<SessionEvent>) -> R) -> R {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock();
            f(&mut state, &mut events)
        };
        self.publish(events);
        result
    }

    fn publish(&self, events: Vec<SessionEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
    }

    pub fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&self.lock())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read(|state| SessionSnapshot {
            session_id: self.id,
            selection_mode: state.selection.mode,
            selected_point: state.selection.point,
            selected_region: state.selection.region.clone(),
            bbox_corner1: state.selection.bbox_corner1,
            viewport: state.viewport.viewport,
            fly_to_request: state.viewport.fly_to_request,
            highlights: state.highlights.clone(),
            panel: PanelSnapshot {
                open: state.panel.is_open(),
                current: state.panel.current().cloned(),
                alternate: state.panel.alternate().cloned(),
            },
        })
    }

    // --- selection -------------------------------------------------------

    pub fn selected_point(&self) -> Option<LngLat> {
        self.read(|s| s.selection.point)
    }

    pub fn selected_region(&self) -> Option<SelectedRegion> {
        self.read(|s| s.selection.region.clone())
    }

    pub fn selection_mode(&self) -> SelectionMode {
        self.read(|s| s.selection.mode)
    }

    pub fn bbox_corner1(&self) -> Option<LngLat> {
        self.read(|s| s.selection.bbox_corner1)
    }

    pub fn selection_epoch(&self) -> u64 {
        self.read(|s| s.selection.epoch)
    }

    pub fn set_selected_point(&self, point: Option<LngLat>) {
        self.update(|state, events| {
            state.selection.set_point(point);
            events.push(state.selection_event());
        });
    }

    /// The caller normalizes bbox order; the region is stored as given.
    pub fn set_selected_region(&self, region: Option<SelectedRegion>) {
        self.update(|state, events| {
            state.selection.set_region(region);
            events.push(state.selection_event());
        });
    }

    pub fn clear_selection(&self) {
        self.update(|state, events| {
            state.selection.clear();
            events.push(state.selection_event());
        });
    }

    /// Returns false if the mode is not region (the corner is not set).
    pub fn set_bbox_corner1(&self, corner: Option<LngLat>) -> bool {
        self.update(|state, events| {
            let had_selection = state.selection.has_selection();
            let accepted = state.selection.set_bbox_corner1(corner);
            if accepted {
                if had_selection && corner.is_some() {
                    events.push(state.selection_event());
                }
                events.push(SessionEvent::BboxCornerChanged { corner });
            }
            accepted
        })
    }

    pub fn set_selection_mode(&self, mode: SelectionMode) {
        self.update(|state, events| {
            let had_corner = state.selection.bbox_corner1.is_some();
            state.selection.set_mode(mode);
            events.push(SessionEvent::SelectionModeChanged { mode });
            if had_corner {
                events.push(SessionEvent::BboxCornerChanged { corner: None });
            }
        });
    }

    /// Direct user click on the map. Always clears highlights first.
    pub fn handle_map_click(&self, at: LngLat) -> ClickOutcome {
        self.update(|state, events| {
            if !state.highlights.is_empty() {
                state.highlights.clear();
                events.push(SessionEvent::HighlightsChanged {
                    highlights: Vec::new(),
                });
            }
            let had_selection = state.selection.has_selection();
            let outcome = state.selection.click(at);
            match &outcome {
                ClickOutcome::PointSelected(_) => events.push(state.selection_event()),
                ClickOutcome::CornerPlaced(corner) => {
                    if had_selection {
                        events.push(state.selection_event());
                    }
                    events.push(SessionEvent::BboxCornerChanged {
                        corner: Some(*corner),
                    });
                }
                ClickOutcome::RegionCompleted(_) => {
                    events.push(state.selection_event());
                    events.push(SessionEvent::BboxCornerChanged { corner: None });
                }
            }
            tracing::debug!("Map click at ({}, {}): {:?}", at.lng, at.lat, outcome);
            outcome
        })
    }

    // --- viewport --------------------------------------------------------

    pub fn viewport(&self) -> Option<Viewport> {
        self.read(|s| s.viewport.viewport)
    }

    pub fn fly_to_request(&self) -> Option<Viewport> {
        self.read(|s| s.viewport.fly_to_request)
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.update(|state, events| {
            state.viewport.set_viewport(viewport);
            events.push(SessionEvent::ViewportChanged { viewport });
        });
    }

    pub fn fly_to(&self, longitude: f64, latitude: f64, zoom: Option<f64>) -> FlyToOutcome {
        self.update(|state, events| {
            let had_request = state.viewport.fly_to_request.is_some();
            let outcome = state.viewport.fly_to(longitude, latitude, zoom);
            match outcome {
                FlyToOutcome::Requested(target) => {
                    events.push(SessionEvent::ViewportChanged { viewport: target });
                    events.push(SessionEvent::FlyToRequested { target });
                }
                FlyToOutcome::Dropped => {
                    tracing::debug!(
                        "Dropped fly-to with non-finite coordinates ({}, {})",
                        longitude,
                        latitude
                    );
                    if had_request {
                        events.push(SessionEvent::FlyToCleared);
                    }
                }
            }
            outcome
        })
    }

    /// Called by the renderer once it has applied a fly-to. Idempotent.
    pub fn clear_fly_to_request(&self) {
        self.update(|state, events| {
            if state.viewport.clear_fly_to_request() {
                events.push(SessionEvent::FlyToCleared);
            }
        });
    }

    /// Consume-and-clear in one step, for renderers.
    pub fn take_fly_to_request(&self) -> Option<Viewport> {
        self.update(|state, events| {
            let taken = state.viewport.take_fly_to_request();
            if taken.is_some() {
                events.push(SessionEvent::FlyToCleared);
            }
            taken
        })
    }

    // --- highlights ------------------------------------------------------

    pub fn highlights(&self) -> Vec<HighlightedLocation> {
        self.read(|s| s.highlights.clone())
    }

    /// Replaces the highlight sequence. Highlights and the single
    /// selection are exclusive, so the selection is cleared as well.
    pub fn set_highlights(&self, highlights: Vec<HighlightedLocation>) {
        self.update(|state, events| {
            let had_selection =
                state.selection.has_selection() || state.selection.bbox_corner1.is_some();
            state.selection.clear();
            if had_selection {
                events.push(state.selection_event());
            }
            state.highlights = highlights.clone();
            events.push(SessionEvent::HighlightsChanged { highlights });
        });
    }

    pub fn clear_highlights(&self) {
        self.update(|state, events| {
            if !state.highlights.is_empty() {
                state.highlights.clear();
                events.push(SessionEvent::HighlightsChanged {
                    highlights: Vec::new(),
                });
            }
        });
    }

    // --- panel -----------------------------------------------------------

    pub fn panel_current(&self) -> Option<PanelEntry> {
        self.read(|s| s.panel.current().cloned())
    }

    pub fn panel_alternate(&self) -> Option<PanelEntry> {
        self.read(|s| s.panel.alternate().cloned())
    }

    pub fn panel_is_open(&self) -> bool {
        self.read(|s| s.panel.is_open())
    }

    pub fn set_panel_content(&self, content: PanelContent, keep_previous: bool) -> Uuid {
        self.update(|state, events| {
            let entry = PanelEntry::new(content);
            let id = entry.id;
            state.panel.set_content(entry, keep_previous);
            events.push(state.panel_event());
            id
        })
    }

    /// Like [`set_panel_content`](Self::set_panel_content), but only if the
    /// selection epoch still equals `expected_epoch` (when given). The check
    /// and the write happen under one lock.
    pub fn set_panel_content_if_current(
        &self,
        content: PanelContent,
        keep_previous: bool,
        expected_epoch: Option<u64>,
    ) -> Option<Uuid> {
        self.update(|state, events| {
            if let Some(expected) = expected_epoch {
                if state.selection.epoch != expected {
                    return None;
                }
            }
            let entry = PanelEntry::new(content);
            let id = entry.id;
            state.panel.set_content(entry, keep_previous);
            events.push(state.panel_event());
            Some(id)
        })
    }

    pub fn toggle_panel(&self) -> bool {
        self.update(|state, events| {
            let swapped = state.panel.toggle();
            if swapped {
                events.push(state.panel_event());
            }
            swapped
        })
    }

    pub fn open_panel(&self) {
        self.update(|state, events| {
            if !state.panel.is_open() {
                state.panel.open();
                events.push(state.panel_event());
            }
        });
    }

    pub fn close_panel(&self) {
        self.update(|state, events| {
            if state.panel.is_open() {
                state.panel.close();
                events.push(state.panel_event());
            }
        });
    }
}
