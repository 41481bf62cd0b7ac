//! Data models for the two seismic feeds.
//!
//! Wire structures match the JSON frames pushed by the finalized-report
//! feed (P2P地震情報, `code` 551) and the early-warning feed (`jma_eew`).
//! Both are decoded at the ingestion boundary into [`SeismicReport`] and
//! [`EewAlert`]; nothing downstream sees raw JSON.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::QuakewatchError;

/// P2P code for an earthquake report.
pub const REPORT_CODE: i64 = 551;

/// Type tag for Japanese early-warning frames.
pub const EEW_TYPE: &str = "jma_eew";

/// Title marker for a cancellation (取消).
const CANCEL_MARKER: &str = "取消";

/// Title marker for a warning (警報).
const WARNING_MARKER: &str = "警報";

/// Offset of Japan Standard Time from UTC, in seconds.
const JST_OFFSET_SECS: i32 = 9 * 3600;

// ============================================================================
// Shared domain types
// ============================================================================

/// A geographic point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check the point lies on the globe.
    ///
    /// The report feed uses `-200` as an "unknown" sentinel, which fails here.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

impl std::str::FromStr for Coordinate {
    type Err = String;

    /// Parse `lat,lon`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [lat, lon] = parts.as_slice() else {
            return Err(format!("expected lat,lon, got: {s}"));
        };
        let lat: f64 = lat.parse().map_err(|_| format!("invalid latitude: {lat}"))?;
        let lon: f64 = lon.parse().map_err(|_| format!("invalid longitude: {lon}"))?;

        let coordinate = Self::new(lat, lon);
        if !coordinate.is_valid() {
            return Err(format!("coordinate out of range: {s}"));
        }
        Ok(coordinate)
    }
}

/// JMA seismic intensity (震度): ten ordinal grades plus unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Intensity {
    #[default]
    Unknown,
    Zero,
    One,
    Two,
    Three,
    Four,
    FiveLower,
    FiveUpper,
    SixLower,
    SixUpper,
    Seven,
}

impl Intensity {
    /// Map a P2P scale value (10, 20, ... 70).
    #[must_use]
    pub const fn from_scale(scale: i64) -> Self {
        match scale {
            0 => Self::Zero,
            10 => Self::One,
            20 => Self::Two,
            30 => Self::Three,
            40 => Self::Four,
            // 46 is "5弱以上と推定" (estimated 5-lower or above)
            45 | 46 => Self::FiveLower,
            50 => Self::FiveUpper,
            55 => Self::SixLower,
            60 => Self::SixUpper,
            70 => Self::Seven,
            _ => Self::Unknown,
        }
    }

    /// Parse an early-warning intensity label such as `"5-"` or `"6強"`.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        match text.trim() {
            "0" => Self::Zero,
            "1" => Self::One,
            "2" => Self::Two,
            "3" => Self::Three,
            "4" => Self::Four,
            "5-" | "5弱" => Self::FiveLower,
            "5+" | "5強" => Self::FiveUpper,
            "6-" | "6弱" => Self::SixLower,
            "6+" | "6強" => Self::SixUpper,
            "7" => Self::Seven,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "不明",
            Self::Zero => "0",
            Self::One => "1",
            Self::Two => "2",
            Self::Three => "3",
            Self::Four => "4",
            Self::FiveLower => "5弱",
            Self::FiveUpper => "5強",
            Self::SixLower => "6弱",
            Self::SixUpper => "6強",
            Self::Seven => "7",
        }
    }

    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Intensity {
    fn from(s: String) -> Self {
        Self::from_text(&s)
    }
}

impl From<Intensity> for String {
    fn from(i: Intensity) -> Self {
        i.as_str().to_string()
    }
}

/// Domestic tsunami advisory attached to a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TsunamiLevel {
    /// No tsunami expected
    None,
    #[default]
    Unknown,
    /// Assessment in progress
    Checking,
    /// Slight sea-level change, no damage expected
    NonEffective,
    Watch,
    Warning,
}

impl TsunamiLevel {
    /// Parse the feed's `domesticTsunami` string.
    #[must_use]
    pub fn from_wire(s: &str) -> Self {
        match s {
            "None" => Self::None,
            "Checking" => Self::Checking,
            "NonEffective" => Self::NonEffective,
            "Watch" => Self::Watch,
            "Warning" => Self::Warning,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Unknown => "unknown",
            Self::Checking => "checking",
            Self::NonEffective => "non-effective",
            Self::Watch => "watch",
            Self::Warning => "warning",
        }
    }
}

// ============================================================================
// Finalized reports
// ============================================================================

/// Hypocenter of a finalized report. `None` fields are "unknown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypocenter {
    pub name: String,
    pub coordinate: Option<Coordinate>,
    pub depth_km: Option<f64>,
    pub magnitude: Option<f64>,
}

/// Observed intensity at one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationIntensity {
    pub name: String,
    pub prefecture: String,
    pub intensity: Intensity,
}

/// A finalized earthquake report. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeismicReport {
    /// Unique report ID
    pub id: String,
    /// When the earthquake occurred
    pub time: Option<DateTime<FixedOffset>>,
    pub hypocenter: Hypocenter,
    pub max_intensity: Intensity,
    pub tsunami: TsunamiLevel,
    /// Per-station observations in feed order
    pub points: Vec<StationIntensity>,
}

/// Report frame from the P2P feed.
#[derive(Debug, Deserialize)]
struct P2pReport {
    #[serde(alias = "_id", deserialize_with = "text_or_number")]
    id: String,
    earthquake: P2pEarthquake,
    #[serde(default)]
    points: Vec<P2pPoint>,
}

#[derive(Debug, Deserialize)]
struct P2pEarthquake {
    #[serde(default)]
    time: String,
    hypocenter: P2pHypocenter,
    #[serde(rename = "maxScale", default)]
    max_scale: Option<i64>,
    #[serde(rename = "domesticTsunami", default)]
    domestic_tsunami: Option<String>,
}

#[derive(Debug, Deserialize)]
struct P2pHypocenter {
    #[serde(default)]
    name: String,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    depth: Option<f64>,
    #[serde(default)]
    magnitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct P2pPoint {
    #[serde(default)]
    pref: String,
    #[serde(default)]
    addr: String,
    #[serde(default)]
    scale: i64,
}

impl From<P2pReport> for SeismicReport {
    fn from(r: P2pReport) -> Self {
        let hypo = r.earthquake.hypocenter;
        let coordinate = match (hypo.latitude, hypo.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)).filter(Coordinate::is_valid),
            _ => None,
        };
        // The feed uses negative values to mean "unknown"
        let known = |v: Option<f64>| v.filter(|x| *x >= 0.0);

        Self {
            id: r.id,
            time: parse_jst(&r.earthquake.time),
            hypocenter: Hypocenter {
                name: hypo.name,
                coordinate,
                depth_km: known(hypo.depth),
                magnitude: known(hypo.magnitude),
            },
            max_intensity: r
                .earthquake
                .max_scale
                .map_or(Intensity::Unknown, Intensity::from_scale),
            tsunami: r
                .earthquake
                .domestic_tsunami
                .as_deref()
                .map_or(TsunamiLevel::Unknown, TsunamiLevel::from_wire),
            points: r
                .points
                .into_iter()
                .map(|p| StationIntensity {
                    name: p.addr,
                    prefecture: p.pref,
                    intensity: Intensity::from_scale(p.scale),
                })
                .collect(),
        }
    }
}

/// Decode one frame from the report feed.
///
/// Returns `Ok(None)` for frames that are not earthquake reports.
///
/// # Errors
///
/// Returns an error if the payload is not JSON or a report frame has an
/// unusable body.
pub fn decode_report_frame(text: &str) -> Result<Option<SeismicReport>, QuakewatchError> {
    let value: Value = serde_json::from_str(text)?;
    match value.get("code").and_then(Value::as_i64) {
        Some(REPORT_CODE) => {
            let report: P2pReport = serde_json::from_value(value)?;
            if report.id.is_empty() {
                return Err(QuakewatchError::Decode("report without id".into()));
            }
            Ok(Some(report.into()))
        }
        code => {
            debug!(?code, "dropping non-report frame");
            Ok(None)
        }
    }
}

// ============================================================================
// Early-warning alerts
// ============================================================================

/// One inbound early-warning frame, normalized.
///
/// Numeric fields are kept as the feed's text; the reconciler decides
/// what counts as a usable value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EewAlert {
    pub title: String,
    /// Correlation key across refinements of one event
    pub event_id: String,
    pub hypocenter: String,
    pub magnitude: String,
    pub depth: String,
    pub max_intensity: String,
    pub announced_time: String,
    pub origin_time: String,
    pub coordinate: Option<Coordinate>,
    pub warning: Option<bool>,
    pub final_report: Option<bool>,
    pub cancel: Option<bool>,
    /// Forecast area names, when the frame carries them
    pub areas: Vec<String>,
}

impl EewAlert {
    /// Whether this frame cancels its event (flag or 取消 in the title).
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.cancel.unwrap_or(false) || self.title.contains(CANCEL_MARKER)
    }

    /// Whether this frame is a warning (警報) rather than a forecast (予報).
    #[must_use]
    pub fn is_warning(&self) -> bool {
        self.warning
            .unwrap_or_else(|| self.title.contains(WARNING_MARKER))
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.final_report.unwrap_or(false)
    }
}

/// Early-warning frame from the Wolfx feed.
#[derive(Debug, Deserialize)]
struct WolfxEew {
    #[serde(rename = "Title", default)]
    title: String,
    #[serde(rename = "EventID", deserialize_with = "text_or_number")]
    event_id: String,
    #[serde(rename = "Hypocenter", default)]
    hypocenter: String,
    #[serde(rename = "Magunitude", alias = "Magnitude", default, deserialize_with = "text_or_number")]
    magnitude: String,
    #[serde(rename = "Depth", default, deserialize_with = "text_or_number")]
    depth: String,
    #[serde(rename = "MaxIntensity", default, deserialize_with = "text_or_number")]
    max_intensity: String,
    #[serde(rename = "AnnouncedTime", default)]
    announced_time: String,
    #[serde(rename = "OriginTime", default)]
    origin_time: String,
    #[serde(rename = "Latitude", default, deserialize_with = "number_or_text")]
    latitude: Option<f64>,
    #[serde(rename = "Longitude", default, deserialize_with = "number_or_text")]
    longitude: Option<f64>,
    #[serde(rename = "isWarn", default)]
    is_warn: Option<bool>,
    #[serde(rename = "isFinal", default)]
    is_final: Option<bool>,
    #[serde(rename = "isCancel", default)]
    is_cancel: Option<bool>,
    #[serde(rename = "WarnArea", default)]
    warn_area: Vec<WolfxArea>,
}

#[derive(Debug, Deserialize)]
struct WolfxArea {
    #[serde(rename = "Chiiki", default)]
    chiiki: String,
}

impl From<WolfxEew> for EewAlert {
    fn from(f: WolfxEew) -> Self {
        let coordinate = match (f.latitude, f.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)).filter(Coordinate::is_valid),
            _ => None,
        };

        Self {
            title: f.title,
            event_id: f.event_id,
            hypocenter: f.hypocenter,
            magnitude: f.magnitude,
            depth: f.depth,
            max_intensity: f.max_intensity,
            announced_time: f.announced_time,
            origin_time: f.origin_time,
            coordinate,
            warning: f.is_warn,
            final_report: f.is_final,
            cancel: f.is_cancel,
            areas: f
                .warn_area
                .into_iter()
                .map(|a| a.chiiki)
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }
}

/// Decode one frame from the early-warning feed.
///
/// Returns `Ok(None)` for heartbeats and any other non-EEW tag.
///
/// # Errors
///
/// Returns an error if the payload is not JSON or an EEW frame has an
/// unusable body.
pub fn decode_eew_frame(text: &str) -> Result<Option<EewAlert>, QuakewatchError> {
    let value: Value = serde_json::from_str(text)?;
    match value.get("type").and_then(Value::as_str) {
        Some(EEW_TYPE) => {
            let frame: WolfxEew = serde_json::from_value(value)?;
            if frame.event_id.is_empty() {
                return Err(QuakewatchError::Decode("early warning without EventID".into()));
            }
            Ok(Some(frame.into()))
        }
        tag => {
            debug!(?tag, "dropping non-EEW frame");
            Ok(None)
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Express a UTC instant in JST, the zone every feed timestamp uses.
#[must_use]
pub fn to_jst(t: DateTime<Utc>) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(JST_OFFSET_SECS).map_or_else(|| t.fixed_offset(), |jst| t.with_timezone(&jst))
}

/// Parse a feed timestamp (`YYYY/MM/DD HH:MM:SS[.fff]`, JST).
#[must_use]
pub fn parse_jst(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    let naive = NaiveDateTime::parse_from_str(text, "%Y/%m/%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y/%m/%d %H:%M:%S"))
        .ok()?;
    FixedOffset::east_opt(JST_OFFSET_SECS)?
        .from_local_datetime(&naive)
        .single()
}

/// Parse a numeric field that the feed may send as text.
///
/// Empty, non-numeric, and negative ("unknown" sentinel) values yield `None`.
#[must_use]
pub fn parse_measure(text: &str) -> Option<f64> {
    let text = text.trim().trim_start_matches('M').trim_end_matches("km");
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Accept a JSON string or number as text; anything else is empty.
fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

/// Accept a JSON number or numeric string.
fn number_or_text<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT_FRAME: &str = r#"{
        "code": 551,
        "id": "65927a3b0b0d0a0001",
        "time": "2024/01/01 16:10:30.123",
        "earthquake": {
            "time": "2024/01/01 16:10:00",
            "hypocenter": {"name": "石川県能登地方", "latitude": 37.5, "longitude": 137.2, "depth": 10, "magnitude": 7.6},
            "maxScale": 70,
            "domesticTsunami": "Warning"
        },
        "points": [
            {"pref": "石川県", "addr": "志賀町香能", "isArea": false, "scale": 70},
            {"pref": "新潟県", "addr": "長岡市", "isArea": false, "scale": 55}
        ]
    }"#;

    const EEW_FRAME: &str = r#"{
        "type": "jma_eew",
        "Title": "緊急地震速報（警報）",
        "EventID": "20240101161010",
        "Serial": 4,
        "AnnouncedTime": "2024/01/01 16:10:20",
        "OriginTime": "2024/01/01 16:10:09",
        "Hypocenter": "石川県能登地方",
        "Latitude": 37.6,
        "Longitude": 137.2,
        "Magunitude": 7.4,
        "Depth": 10,
        "MaxIntensity": "6+",
        "WarnArea": [{"Chiiki": "石川県能登", "Shindo1": "6+", "Type": "警報"}],
        "isWarn": true,
        "isFinal": false,
        "isCancel": false
    }"#;

    #[test]
    fn test_decode_report() {
        let report = decode_report_frame(REPORT_FRAME)
            .expect("decode failed")
            .expect("report dropped");

        assert_eq!(report.id, "65927a3b0b0d0a0001");
        assert_eq!(report.max_intensity, Intensity::Seven);
        assert_eq!(report.tsunami, TsunamiLevel::Warning);
        assert_eq!(report.hypocenter.depth_km, Some(10.0));
        assert_eq!(report.points.len(), 2);
        assert_eq!(report.points[1].intensity, Intensity::SixLower);
        assert_eq!(report.points[0].prefecture, "石川県");
        assert!(report.time.is_some());
    }

    #[test]
    fn test_report_unknown_sentinels() {
        let frame = r#"{"code":551,"id":"x1","earthquake":{"time":"2024/01/02 03:04:05",
            "hypocenter":{"name":"","latitude":-200,"longitude":-200,"depth":-1,"magnitude":-1},
            "maxScale":-1,"domesticTsunami":"Checking"}}"#;
        let report = decode_report_frame(frame).unwrap().unwrap();

        assert!(report.hypocenter.coordinate.is_none());
        assert!(report.hypocenter.depth_km.is_none());
        assert!(report.hypocenter.magnitude.is_none());
        assert_eq!(report.max_intensity, Intensity::Unknown);
        assert_eq!(report.tsunami, TsunamiLevel::Checking);
        assert!(report.points.is_empty());
    }

    #[test]
    fn test_other_report_codes_dropped() {
        assert!(decode_report_frame(r#"{"code":555,"id":"a"}"#).unwrap().is_none());
        assert!(decode_report_frame(r#"{"hello":1}"#).unwrap().is_none());
    }

    #[test]
    fn test_malformed_frames_fail() {
        assert!(decode_report_frame("not json").is_err());
        assert!(decode_report_frame(r#"{"code":551,"id":"a"}"#).is_err());
        assert!(decode_eew_frame(r#"{"type":"jma_eew"}"#).is_err());
    }

    #[test]
    fn test_decode_eew() {
        let alert = decode_eew_frame(EEW_FRAME).unwrap().unwrap();

        assert_eq!(alert.event_id, "20240101161010");
        assert_eq!(alert.magnitude, "7.4");
        assert_eq!(alert.depth, "10");
        assert_eq!(alert.max_intensity, "6+");
        assert_eq!(alert.areas, vec!["石川県能登".to_string()]);
        assert!(alert.is_warning());
        assert!(!alert.is_final());
        assert!(!alert.is_cancellation());
        assert_eq!(alert.coordinate, Some(Coordinate::new(37.6, 137.2)));
    }

    #[test]
    fn test_heartbeat_dropped() {
        assert!(decode_eew_frame(r#"{"type":"heartbeat","ver":1}"#).unwrap().is_none());
        assert!(decode_eew_frame(r#"{"type":"sc_eew","EventID":"1"}"#).unwrap().is_none());
    }

    #[test]
    fn test_title_markers() {
        let alert = EewAlert {
            title: "緊急地震速報（警報）取消".into(),
            ..Default::default()
        };
        assert!(alert.is_cancellation());
        assert!(alert.is_warning());

        let alert = EewAlert {
            title: "緊急地震速報（予報）".into(),
            ..Default::default()
        };
        assert!(!alert.is_warning());

        // Explicit flag wins over the title
        let alert = EewAlert {
            title: "緊急地震速報（警報）".into(),
            warning: Some(false),
            ..Default::default()
        };
        assert!(!alert.is_warning());
    }

    #[test]
    fn test_intensity_parsing() {
        assert_eq!(Intensity::from_text("5-"), Intensity::FiveLower);
        assert_eq!(Intensity::from_text("6強"), Intensity::SixUpper);
        assert_eq!(Intensity::from_text("不明"), Intensity::Unknown);
        assert_eq!(Intensity::from_scale(46), Intensity::FiveLower);
        assert!(Intensity::Seven > Intensity::SixUpper);
        assert!(Intensity::One > Intensity::Zero);
    }

    #[test]
    fn test_parse_measure() {
        assert_eq!(parse_measure("5.9"), Some(5.9));
        assert_eq!(parse_measure("M6.1"), Some(6.1));
        assert_eq!(parse_measure("10km"), Some(10.0));
        assert_eq!(parse_measure("-1"), None);
        assert_eq!(parse_measure("不明"), None);
        assert_eq!(parse_measure(""), None);
    }

    #[test]
    fn test_parse_jst() {
        let t = parse_jst("2024/01/01 16:10:09").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-01-01T16:10:09+09:00");
        assert_eq!(to_jst(t.with_timezone(&Utc)), t);
        assert!(parse_jst("2024/01/01 16:10:09.500").is_some());
        assert!(parse_jst("yesterday").is_none());
    }

    #[test]
    fn test_coordinate_parse() {
        let c: Coordinate = "35.68, 139.77".parse().unwrap();
        assert_eq!(c, Coordinate::new(35.68, 139.77));
        assert!("35.68".parse::<Coordinate>().is_err());
        assert!("north,139".parse::<Coordinate>().is_err());
        assert!("95,139".parse::<Coordinate>().is_err());
    }
}
