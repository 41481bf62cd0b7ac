//! Viewport fitting.
//!
//! Geographic points go through a fixed Mercator projection into base
//! pixel space; a [`ViewportTransform`] (zoom `k`, pan `tx`/`ty`) then maps
//! base pixels to the screen. Fitting picks the transform that frames a
//! set of points, and the change is handed to the renderer as a timed
//! [`ViewportTransition`].

use std::f64::consts::FRAC_PI_4;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::config::ViewportConfig;
use crate::gazetteer::Gazetteer;
use crate::models::{Coordinate, SeismicReport};
use crate::reconcile::EewState;

/// A position in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

/// Spherical Mercator fixed on the configured centre and scale.
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    scale: f64,
    center_x: f64,
    center_y: f64,
    half_width: f64,
    half_height: f64,
}

fn mercator_y(lat: f64) -> f64 {
    (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln()
}

impl Projection {
    #[must_use]
    pub fn new(config: &ViewportConfig) -> Self {
        Self {
            scale: config.base_scale,
            center_x: config.center_lon.to_radians(),
            center_y: mercator_y(config.center_lat),
            half_width: config.width / 2.0,
            half_height: config.height / 2.0,
        }
    }

    #[must_use]
    pub fn project(&self, c: Coordinate) -> ScreenPoint {
        ScreenPoint {
            x: self.scale * (c.lon.to_radians() - self.center_x) + self.half_width,
            y: -self.scale * (mercator_y(c.lat) - self.center_y) + self.half_height,
        }
    }

    #[must_use]
    pub fn invert(&self, p: ScreenPoint) -> Coordinate {
        let lon = (p.x - self.half_width) / self.scale + self.center_x;
        let my = -(p.y - self.half_height) / self.scale + self.center_y;
        let lat = 2.0 * my.exp().atan() - std::f64::consts::FRAC_PI_2;
        Coordinate::new(lat.to_degrees(), lon.to_degrees())
    }
}

/// Zoom and pan applied on top of the projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewportTransform {
    pub k: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for ViewportTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ViewportTransform {
    pub const IDENTITY: Self = Self {
        k: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Screen pixel back to base pixel space.
    #[must_use]
    pub fn invert(&self, p: ScreenPoint) -> ScreenPoint {
        ScreenPoint {
            x: (p.x - self.tx) / self.k,
            y: (p.y - self.ty) / self.k,
        }
    }

    fn lerp(&self, to: &Self, t: f64) -> Self {
        Self {
            k: self.k + (to.k - self.k) * t,
            tx: self.tx + (to.tx - self.tx) * t,
            ty: self.ty + (to.ty - self.ty) * t,
        }
    }
}

/// Geographic extent of the screen.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    #[must_use]
    pub fn contains(&self, c: Coordinate) -> bool {
        (self.south..=self.north).contains(&c.lat) && (self.west..=self.east).contains(&c.lon)
    }
}

/// A smoothed move from one transform to another.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewportTransition {
    pub from: ViewportTransform,
    pub to: ViewportTransform,
    #[serde(rename = "duration_ms", serialize_with = "duration_ms")]
    pub duration: Duration,
}

fn duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

/// Cubic ease-in-out on `[0, 1]`.
fn ease_cubic_in_out(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

impl ViewportTransition {
    /// Transform to show `elapsed` into the transition.
    #[must_use]
    pub fn at(&self, elapsed: Duration) -> ViewportTransform {
        if self.duration.is_zero() || elapsed >= self.duration {
            return self.to;
        }
        let t = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        self.from.lerp(&self.to, ease_cubic_in_out(t))
    }
}

/// Bounding boxes narrower than this (at zoom 1) fit like a single point.
const MIN_EXTENT_PX: f64 = 1.0;

/// Compute the transform that frames `points`.
///
/// Returns `None` when no point is usable.
#[must_use]
pub fn fit(
    projection: &Projection,
    config: &ViewportConfig,
    points: &[Coordinate],
) -> Option<ViewportTransform> {
    let projected: Vec<ScreenPoint> = points
        .iter()
        .filter(|c| c.is_valid())
        .map(|c| projection.project(*c))
        .collect();
    let first = projected.first()?;

    let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
    for p in &projected[1..] {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }

    let (dx, dy) = (x1 - x0, y1 - y0);
    let (cx, cy) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);

    // A box under one pixel is a single effective point
    let k = if dx < MIN_EXTENT_PX && dy < MIN_EXTENT_PX {
        config.single_point_zoom
    } else {
        let fill = (dx / config.width).max(dy / config.height);
        (1.0 - config.padding) / fill
    }
    .clamp(config.min_zoom, config.max_zoom);

    Some(ViewportTransform {
        k,
        tx: config.width / 2.0 - k * cx,
        ty: config.height / 2.0 - k * cy,
    })
}

/// Holds the current viewport and turns point sets into transitions.
#[derive(Debug, Clone)]
pub struct ViewportController {
    config: ViewportConfig,
    projection: Projection,
    gazetteer: Gazetteer,
    current: ViewportTransform,
    /// Last transition and when it started
    in_flight: Option<(ViewportTransition, Instant)>,
}

impl ViewportController {
    #[must_use]
    pub fn new(config: ViewportConfig, gazetteer: Gazetteer) -> Self {
        Self {
            projection: Projection::new(&config),
            config,
            gazetteer,
            current: ViewportTransform::IDENTITY,
            in_flight: None,
        }
    }

    /// The transform the viewport is at, or heading to.
    #[must_use]
    pub fn transform(&self) -> ViewportTransform {
        self.current
    }

    /// The transform on screen at `now`, part way through any transition.
    #[must_use]
    pub fn displayed(&self, now: Instant) -> ViewportTransform {
        match self.in_flight {
            Some((transition, started)) => transition.at(now.saturating_duration_since(started)),
            None => self.current,
        }
    }

    /// What the target transform shows.
    #[must_use]
    pub fn bounds(&self) -> GeoBounds {
        let corner = |x: f64, y: f64| {
            self.projection
                .invert(self.current.invert(ScreenPoint { x, y }))
        };
        let north_west = corner(0.0, 0.0);
        let south_east = corner(self.config.width, self.config.height);
        GeoBounds {
            south: south_east.lat,
            west: north_west.lon,
            north: north_west.lat,
            east: south_east.lon,
        }
    }

    /// Fit explicit coordinates. The viewport is left as-is when none is usable.
    ///
    /// An interrupted transition hands over from wherever it had got to.
    pub fn fit_points(&mut self, points: &[Coordinate], now: Instant) -> Option<ViewportTransition> {
        let Some(to) = fit(&self.projection, &self.config, points) else {
            debug!("no usable points to fit, keeping viewport");
            return None;
        };
        let transition = ViewportTransition {
            from: self.displayed(now),
            to,
            duration: self.config.transition,
        };
        self.current = to;
        self.in_flight = Some((transition, now));
        Some(transition)
    }

    /// Geocode an epicenter name plus area names and fit what resolves.
    pub fn fit_names<'a, I>(&mut self, epicenter: &'a str, areas: I, now: Instant) -> Option<ViewportTransition>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let points = self
            .gazetteer
            .resolve_all(std::iter::once(epicenter).chain(areas));
        self.fit_points(&points, now)
    }

    /// Frame a live alert: its epicenter and forecast areas.
    pub fn fit_eew(&mut self, state: &EewState, now: Instant) -> Option<ViewportTransition> {
        let areas = state.areas.iter().map(String::as_str);
        match state.epicenter {
            Some(epicenter) => {
                let mut points = vec![epicenter];
                points.extend(self.gazetteer.resolve_all(areas));
                self.fit_points(&points, now)
            }
            None => self.fit_names(&state.hypocenter, areas, now),
        }
    }

    /// Frame a finalized report: hypocenter plus every prefecture that
    /// recorded shaking.
    pub fn fit_report(&mut self, report: &SeismicReport, now: Instant) -> Option<ViewportTransition> {
        let mut points: Vec<Coordinate> = report.hypocenter.coordinate.into_iter().collect();
        if points.is_empty() {
            points.extend(self.gazetteer.resolve(&report.hypocenter.name));
        }

        let mut prefectures: Vec<&str> = Vec::new();
        for p in &report.points {
            if !prefectures.contains(&p.prefecture.as_str()) {
                prefectures.push(&p.prefecture);
            }
        }
        points.extend(self.gazetteer.resolve_all(prefectures));
        self.fit_points(&points, now)
    }
}
