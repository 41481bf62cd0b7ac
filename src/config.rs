//! Runtime configuration.
//!
//! Every value has a built-in default; the CLI may override a subset.

use std::time::Duration;

use crate::models::Coordinate;

/// Default finalized-report websocket endpoint.
pub const DEFAULT_REPORT_URL: &str = "wss://api.p2pquake.net/v2/ws";

/// Default early-warning websocket endpoint.
pub const DEFAULT_EEW_URL: &str = "wss://ws-api.wolfx.jp/jma_eew";

/// Feed connection settings.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub report_url: String,
    pub eew_url: String,
    /// Fixed delay before each reconnection attempt
    pub reconnect_delay: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            report_url: DEFAULT_REPORT_URL.to_string(),
            eew_url: DEFAULT_EEW_URL.to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Early-warning lifecycle timing.
#[derive(Debug, Clone, Copy)]
pub struct EewConfig {
    /// Silence tolerated before a non-final alert is dropped
    pub inactivity_window: Duration,
    /// How long a final alert stays displayed after its last update
    pub final_hold: Duration,
    /// Cadence of the staleness check
    pub check_interval: Duration,
}

impl Default for EewConfig {
    fn default() -> Self {
        Self {
            inactivity_window: Duration::from_secs(20),
            final_hold: Duration::from_secs(180),
            check_interval: Duration::from_secs(1),
        }
    }
}

/// Map projection and fitting parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportConfig {
    pub width: f64,
    pub height: f64,
    /// Mercator scale in pixels per radian at zoom 1
    pub base_scale: f64,
    /// Projection centre (longitude, latitude)
    pub center_lon: f64,
    pub center_lat: f64,
    pub min_zoom: f64,
    /// Upper clamp for multi-point fits; kept at or below the single-point
    /// zoom so clusters never zoom in past a lone epicenter
    pub max_zoom: f64,
    /// Zoom used when every point projects to the same pixel
    pub single_point_zoom: f64,
    /// Fraction of the viewport left empty around a fitted box
    pub padding: f64,
    pub transition: Duration,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 960.0,
            height: 720.0,
            base_scale: 1200.0,
            center_lon: 137.0,
            center_lat: 38.0,
            min_zoom: 1.0,
            max_zoom: 5.0,
            single_point_zoom: 5.0,
            padding: 0.1,
            transition: Duration::from_millis(750),
        }
    }
}

/// Wave playback parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveConfig {
    /// Primary (P) wave speed in km/s
    pub p_velocity: f64,
    /// Secondary (S) wave speed in km/s
    pub s_velocity: f64,
    pub km_per_degree: f64,
    /// Animation frame cadence
    pub frame_interval: Duration,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            p_velocity: 7.0,
            s_velocity: 4.0,
            km_per_degree: 111.0,
            frame_interval: Duration::from_millis(16),
        }
    }
}

/// Everything the engine needs.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub feeds: FeedConfig,
    pub eew: EewConfig,
    pub viewport: ViewportConfig,
    pub wave: WaveConfig,
    /// Location to count down S-wave arrival for
    pub observer: Option<Coordinate>,
}
