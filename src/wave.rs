//! Wave propagation playback.
//!
//! Two fronts expand from the epicenter at constant speeds: a faster
//! primary (P) wave and a slower secondary (S) wave. This is a coarse
//! visual model, not a travel-time table.
//!
//! [`WaveAnimator`] runs the per-frame loop as a task that stops when its
//! [`CancellationToken`] fires; the engine holds that token alongside the
//! alert state so the two cannot drift apart.

use std::f64::consts::PI;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::WaveConfig;
use crate::models::Coordinate;

/// Earth radius in kilometers for haversine calculations.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Calculate the great-circle distance between two points using the haversine formula.
///
/// Returns distance in kilometers.
#[must_use]
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat1_rad = a.lat * PI / 180.0;
    let lat2_rad = b.lat * PI / 180.0;
    let delta_lat = (b.lat - a.lat) * PI / 180.0;
    let delta_lon = (b.lon - a.lon) * PI / 180.0;

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Which front a circle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveKind {
    Primary,
    Secondary,
}

/// A circle on the globe for the renderer to draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoCircle {
    pub kind: WaveKind,
    pub center: Coordinate,
    pub radius_km: f64,
    pub radius_deg: f64,
}

/// Front radii at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaveRadii {
    /// Seconds since origin, never negative
    pub elapsed_secs: f64,
    pub p_km: f64,
    pub s_km: f64,
}

/// Time left until each front reaches an observer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Arrival {
    pub distance_km: f64,
    pub p_in_secs: f64,
    pub s_in_secs: f64,
}

/// What the observer location has left before shaking arrives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Countdown {
    pub distance_km: f64,
    /// Zero once the front has passed
    pub p_remaining_secs: f64,
    pub s_remaining_secs: f64,
}

/// One animation frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveFrame {
    pub event_id: String,
    pub radii: WaveRadii,
    pub circles: Vec<GeoCircle>,
    pub countdown: Option<Countdown>,
}

/// Constant-velocity front model.
#[derive(Debug, Clone, Copy)]
pub struct WaveFront {
    config: WaveConfig,
}

impl WaveFront {
    #[must_use]
    pub const fn new(config: WaveConfig) -> Self {
        Self { config }
    }

    /// Radii `elapsed_secs` after origin. Negative input counts as zero.
    #[must_use]
    pub fn radii(&self, elapsed_secs: f64) -> WaveRadii {
        let elapsed_secs = if elapsed_secs.is_finite() {
            elapsed_secs.max(0.0)
        } else {
            0.0
        };
        WaveRadii {
            elapsed_secs,
            p_km: elapsed_secs * self.config.p_velocity,
            s_km: elapsed_secs * self.config.s_velocity,
        }
    }

    /// Radii at wall-clock `now` for an event that began at `origin_time`.
    #[must_use]
    pub fn radii_at(&self, origin_time: DateTime<FixedOffset>, now: DateTime<Utc>) -> WaveRadii {
        let delta = now.signed_duration_since(origin_time);
        #[allow(clippy::cast_precision_loss)]
        let secs = delta.num_milliseconds() as f64 / 1000.0;
        self.radii(secs)
    }

    /// Circles to draw; empty until time has started moving.
    #[must_use]
    pub fn circles(&self, center: Coordinate, radii: &WaveRadii) -> Vec<GeoCircle> {
        if radii.elapsed_secs <= 0.0 {
            return Vec::new();
        }
        [
            (WaveKind::Primary, radii.p_km),
            (WaveKind::Secondary, radii.s_km),
        ]
        .into_iter()
        .map(|(kind, radius_km)| GeoCircle {
            kind,
            center,
            radius_km,
            radius_deg: radius_km / self.config.km_per_degree,
        })
        .collect()
    }

    /// Travel times from the epicenter to a point `distance_km` away.
    #[must_use]
    pub fn arrival(&self, distance_km: f64) -> Arrival {
        Arrival {
            distance_km,
            p_in_secs: distance_km / self.config.p_velocity,
            s_in_secs: distance_km / self.config.s_velocity,
        }
    }

    /// Build the frame for `playback` at `now`.
    #[must_use]
    pub fn frame(&self, playback: &Playback, now: DateTime<Utc>) -> WaveFrame {
        let radii = self.radii_at(playback.origin_time, now);
        let countdown = playback.observer.map(|observer| {
            let arrival = self.arrival(haversine_km(playback.origin, observer));
            Countdown {
                distance_km: arrival.distance_km,
                p_remaining_secs: (arrival.p_in_secs - radii.elapsed_secs).max(0.0),
                s_remaining_secs: (arrival.s_in_secs - radii.elapsed_secs).max(0.0),
            }
        });

        WaveFrame {
            event_id: playback.event_id.clone(),
            circles: self.circles(playback.origin, &radii),
            radii,
            countdown,
        }
    }
}

/// What to animate.
#[derive(Debug, Clone, PartialEq)]
pub struct Playback {
    pub event_id: String,
    pub origin: Coordinate,
    pub origin_time: DateTime<FixedOffset>,
    /// Location to report S-wave countdown for
    pub observer: Option<Coordinate>,
}

/// A running playback loop.
///
/// Dropping the animator cancels it.
#[derive(Debug)]
pub struct WaveAnimator {
    cancel: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl WaveAnimator {
    /// Spawn the frame loop. `emit` receives every frame with visible rings.
    pub fn spawn<F>(playback: Playback, config: WaveConfig, cancel: CancellationToken, emit: F) -> Self
    where
        F: Fn(WaveFrame) + Send + 'static,
    {
        let front = WaveFront::new(config);
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut frames = 0u64;

            debug!(event_id = %playback.event_id, "wave playback started");
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let frame = front.frame(&playback, Utc::now());
                        // Origin still in the future (clock skew): idle
                        if frame.circles.is_empty() {
                            continue;
                        }
                        emit(frame);
                        frames += 1;
                    }
                }
            }
            debug!(event_id = %playback.event_id, frames, "wave playback stopped");
            frames
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel and wait for the loop to exit. Returns the frames drawn.
    pub async fn stop(&mut self) -> u64 {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for WaveAnimator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
