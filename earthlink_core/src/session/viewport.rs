//! Viewport controller: the live camera and the one-shot fly-to request.

use serde::{Deserialize, Serialize};

use crate::geo::{clamp_latitude, clamp_longitude};

pub const MIN_ZOOM: f64 = 1.0;
pub const MAX_ZOOM: f64 = 18.0;
pub const DEFAULT_ZOOM: f64 = 11.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub longitude: f64,
    pub latitude: f64,
    pub zoom: f64,
}

impl Viewport {
    pub fn new(longitude: f64, latitude: f64, zoom: f64) -> Self {
        Self {
            longitude,
            latitude,
            zoom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlyToOutcome {
    Requested(Viewport),
    /// Non-finite coordinates; any pending request was cleared.
    Dropped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewportState {
    pub viewport: Option<Viewport>,
    pub fly_to_request: Option<Viewport>,
}

impl ViewportState {
    pub fn new(initial: Option<Viewport>) -> Self {
        Self {
            viewport: initial,
            fly_to_request: None,
        }
    }

    /// Mirrors live camera movement from the renderer.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    pub fn fly_to(&mut self, longitude: f64, latitude: f64, zoom: Option<f64>) -> FlyToOutcome {
        if !longitude.is_finite() || !latitude.is_finite() {
            self.fly_to_request = None;
            return FlyToOutcome::Dropped;
        }

        let previous_zoom = self.viewport.map(|v| v.zoom).unwrap_or(DEFAULT_ZOOM);
        let zoom = zoom.filter(|z| z.is_finite()).unwrap_or(previous_zoom);
        let target = Viewport::new(
            clamp_longitude(longitude),
            clamp_latitude(latitude),
            zoom.clamp(MIN_ZOOM, MAX_ZOOM),
        );

        // Overwrites any unconsumed request; requests are never queued.
        self.fly_to_request = Some(target);
        self.viewport = Some(target);
        FlyToOutcome::Requested(target)
    }

    /// Idempotent. Returns whether a request was pending.
    pub fn clear_fly_to_request(&mut self) -> bool {
        self.fly_to_request.take().is_some()
    }

    pub fn take_fly_to_request(&mut self) -> Option<Viewport> {
        self.fly_to_request.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fly_to_sets_request_and_viewport() {
        let mut state = ViewportState::default();
        let outcome = state.fly_to(-122.4194, 37.7749, Some(14.0));
        let expected = Viewport::new(-122.4194, 37.7749, 14.0);
        assert_eq!(outcome, FlyToOutcome::Requested(expected));
        assert_eq!(state.viewport, Some(expected));
        assert_eq!(state.fly_to_request, Some(expected));

        assert!(state.clear_fly_to_request());
        assert_eq!(state.fly_to_request, None);
        assert_eq!(state.viewport, Some(expected));
        assert!(!state.clear_fly_to_request());
    }

    #[test]
    fn fly_to_clamps_all_axes() {
        let mut state = ViewportState::default();
        state.fly_to(200.0, -95.0, Some(30.0));
        assert_eq!(state.viewport, Some(Viewport::new(180.0, -90.0, 18.0)));

        state.fly_to(-500.0, 120.0, Some(0.0));
        assert_eq!(state.viewport, Some(Viewport::new(-180.0, 90.0, 1.0)));
    }

    #[test]
    fn fly_to_zoom_defaults_to_previous_or_eleven() {
        let mut state = ViewportState::default();
        state.fly_to(0.0, 0.0, None);
        assert_eq!(state.viewport.map(|v| v.zoom), Some(DEFAULT_ZOOM));

        state.set_viewport(Viewport::new(1.0, 1.0, 15.5));
        state.fly_to(2.0, 2.0, None);
        assert_eq!(state.viewport.map(|v| v.zoom), Some(15.5));

        state.fly_to(2.0, 2.0, Some(f64::NAN));
        assert_eq!(state.viewport.map(|v| v.zoom), Some(15.5));
    }

    #[test]
    fn non_finite_coordinates_drop_the_request() {
        let initial = Viewport::new(-122.0, 37.0, 12.0);
        let mut state = ViewportState::new(Some(initial));
        state.fly_to(1.0, 1.0, Some(5.0));
        assert!(state.fly_to_request.is_some());
        let before = state.viewport;

        assert_eq!(state.fly_to(f64::NAN, 1.0, None), FlyToOutcome::Dropped);
        assert_eq!(state.fly_to(1.0, f64::INFINITY, None), FlyToOutcome::Dropped);
        assert!(state.fly_to_request.is_none());
        assert_eq!(state.viewport, before);
    }

    #[test]
    fn unconsumed_request_is_overwritten() {
        let mut state = ViewportState::default();
        state.fly_to(1.0, 1.0, Some(3.0));
        state.fly_to(2.0, 2.0, Some(4.0));
        assert_eq!(state.take_fly_to_request(), Some(Viewport::new(2.0, 2.0, 4.0)));
        assert_eq!(state.take_fly_to_request(), None);
    }
}
