//! Output formatters for display snapshots and render frames.
//!
//! Supports human-readable (with colors), JSON, and NDJSON formats.

use std::io::{self, Write};

use serde::Serialize;

use crate::engine::{DisplaySnapshot, RenderFrame};
use crate::gazetteer::Resolved;
use crate::ingest::ConnectionStatus;
use crate::models::{Intensity, SeismicReport, TsunamiLevel};
use crate::reconcile::{EewPhase, EewState};
use crate::wave::WaveFrame;

// ANSI color codes
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

// Seismic intensity colors
const RED: &str = "\x1b[91m"; // 6- and above
const YELLOW: &str = "\x1b[93m"; // 5- / 5+
const CYAN: &str = "\x1b[96m"; // 4
const GREEN: &str = "\x1b[92m"; // 1 to 3
const WHITE: &str = "\x1b[97m";

// Alert phase badges
const BADGE_WARNING: &str = "\x1b[41;97m";
const BADGE_FORECAST: &str = "\x1b[43;30m";
const BADGE_FINAL: &str = "\x1b[48;5;208;30m";

const ICON_QUAKE: &str = "🌍";
const ICON_TSUNAMI: &str = "🌊";
const ICON_ALERT: &str = "⚠️";

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Human-readable terminal output (default)
    #[default]
    Human,
    /// Pretty-printed JSON, one document per record
    Json,
    /// Newline-delimited JSON (one object per line)
    Ndjson,
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            "ndjson" => Ok(Self::Ndjson),
            _ => Err(format!("unknown format: {s} (expected: human, json, ndjson)")),
        }
    }
}

fn intensity_color(intensity: Intensity) -> &'static str {
    match intensity {
        Intensity::SixLower | Intensity::SixUpper | Intensity::Seven => RED,
        Intensity::FiveLower | Intensity::FiveUpper => YELLOW,
        Intensity::Four => CYAN,
        Intensity::One | Intensity::Two | Intensity::Three => GREEN,
        Intensity::Zero | Intensity::Unknown => WHITE,
    }
}

fn phase_badge(phase: EewPhase) -> String {
    match phase {
        EewPhase::Warning => format!("{BADGE_WARNING} WARNING {RESET}"),
        EewPhase::Forecasting => format!("{BADGE_FORECAST} FORECAST {RESET}"),
        EewPhase::Final => format!("{BADGE_FINAL} FINAL {RESET}"),
        EewPhase::Idle => format!("{DIM}idle{RESET}"),
    }
}

fn status_dot(status: ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Connected => format!("{GREEN}●{RESET}"),
        ConnectionStatus::Disconnected => format!("{RED}○{RESET}"),
    }
}

fn measure(value: Option<f64>, prefix: &str, suffix: &str) -> String {
    value.map_or_else(|| "?".to_string(), |v| format!("{prefix}{v:.1}{suffix}"))
}

/// Write the live alert as one or two lines.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_eew_human<W: Write>(writer: &mut W, eew: &EewState) -> io::Result<()> {
    let phase = eew.phase();
    if phase == EewPhase::Idle {
        return writeln!(writer, "{ICON_ALERT} EEW {}", phase_badge(phase));
    }

    let intensity = eew.max_intensity.unwrap_or_default();
    let color = intensity_color(intensity);
    let origin = eew
        .origin_time
        .map_or_else(|| "unknown".into(), |t| t.format("%H:%M:%S").to_string());

    writeln!(
        writer,
        "{ICON_ALERT} EEW {} {BOLD}{}{RESET} │ \
         {BOLD}{}{RESET} │ \
         {DIM}{}{RESET} │ \
         {color}{BOLD}max {intensity}{RESET} │ \
         origin {origin} JST │ \
         {DIM}#{} ({} updates){RESET}",
        phase_badge(phase),
        eew.hypocenter,
        measure(eew.magnitude, "M", ""),
        measure(eew.depth_km, "", "km"),
        eew.event_id,
        eew.updates,
    )?;

    if !eew.areas.is_empty() {
        let areas: Vec<&str> = eew.areas.iter().map(String::as_str).collect();
        writeln!(writer, "   {DIM}areas:{RESET} {}", areas.join("、"))?;
    }
    Ok(())
}

/// Write a finalized report as one line.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_report_human<W: Write>(writer: &mut W, report: &SeismicReport) -> io::Result<()> {
    let time = report
        .time
        .map_or_else(|| "unknown".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
    let color = intensity_color(report.max_intensity);

    let tsunami = match report.tsunami {
        TsunamiLevel::None | TsunamiLevel::Unknown => String::new(),
        level => format!(" {ICON_TSUNAMI} {}", level.as_str()),
    };

    writeln!(
        writer,
        "{ICON_QUAKE} {BOLD}{}{RESET} {DIM}{}{RESET} │ \
         {color}{BOLD}max {}{RESET} │ \
         {time} JST │ \
         {}{tsunami}",
        measure(report.hypocenter.magnitude, "M", ""),
        measure(report.hypocenter.depth_km, "", "km"),
        report.max_intensity,
        report.hypocenter.name,
    )
}

/// Write a full display snapshot.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_snapshot_human<W: Write>(writer: &mut W, snapshot: &DisplaySnapshot) -> io::Result<()> {
    writeln!(
        writer,
        "{DIM}[{}] report {} eew {} │ zoom {:.2} ({:.1}–{:.1}N {:.1}–{:.1}E){}{RESET}",
        snapshot.mode.as_str(),
        status_dot(snapshot.feeds.report),
        status_dot(snapshot.feeds.eew),
        snapshot.viewport.k,
        snapshot.bounds.south,
        snapshot.bounds.north,
        snapshot.bounds.west,
        snapshot.bounds.east,
        if snapshot.playing { " │ waves" } else { "" },
    )?;
    write_eew_human(writer, &snapshot.eew)?;
    match &snapshot.report {
        Some(report) => write_report_human(writer, report),
        None => writeln!(writer, "{ICON_QUAKE} {DIM}no report yet{RESET}"),
    }
}

/// One-line S-wave countdown, if the frame carries one.
fn write_countdown_human<W: Write>(writer: &mut W, frame: &WaveFrame) -> io::Result<()> {
    let Some(countdown) = frame.countdown else {
        return Ok(());
    };
    if countdown.s_remaining_secs > 0.0 {
        writeln!(
            writer,
            "{YELLOW}{BOLD}S-wave in {:.0}s{RESET} {DIM}({:.0} km){RESET}",
            countdown.s_remaining_secs.ceil(),
            countdown.distance_km
        )
    } else {
        writeln!(writer, "{RED}{BOLD}S-wave arrived{RESET} {DIM}({:.0} km){RESET}", countdown.distance_km)
    }
}

fn write_serialized<W: Write, T: Serialize>(writer: &mut W, value: &T, pretty: bool) -> io::Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{json}")
}

/// Write one render frame in the specified format.
///
/// Human output shows display changes and the countdown; viewport
/// transitions and bare wave geometry are only emitted as JSON.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_frame<W: Write>(writer: &mut W, frame: &RenderFrame, format: Format) -> io::Result<()> {
    match format {
        Format::Human => match frame {
            RenderFrame::Display(snapshot) => write_snapshot_human(writer, snapshot),
            RenderFrame::Waves(waves) => write_countdown_human(writer, waves),
            RenderFrame::Viewport(_) => Ok(()),
        },
        Format::Json => write_serialized(writer, frame, true),
        Format::Ndjson => write_serialized(writer, frame, false),
    }
}

/// A gazetteer lookup result, for `locate`.
#[derive(Debug, Serialize)]
pub struct Located<'a> {
    pub query: &'a str,
    pub key: Option<&'static str>,
    #[serde(rename = "match")]
    pub kind: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl<'a> Located<'a> {
    #[must_use]
    pub fn new(query: &'a str, resolved: Option<Resolved>) -> Self {
        Self {
            query,
            key: resolved.map(|r| r.key),
            kind: resolved.map(|r| r.kind.to_string()),
            lat: resolved.map(|r| r.coordinate.lat),
            lon: resolved.map(|r| r.coordinate.lon),
        }
    }
}

/// Write gazetteer lookups in the specified format.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_located<W: Write>(writer: &mut W, results: &[Located<'_>], format: Format) -> io::Result<()> {
    match format {
        Format::Human => {
            for r in results {
                match (r.key, &r.kind, r.lat, r.lon) {
                    (Some(key), Some(kind), Some(lat), Some(lon)) => writeln!(
                        writer,
                        "{BOLD}{}{RESET} → {key} {DIM}({kind}){RESET} │ {lat:.3}, {lon:.3}",
                        r.query
                    )?,
                    _ => writeln!(writer, "{BOLD}{}{RESET} → {RED}unresolved{RESET}", r.query)?,
                }
            }
            Ok(())
        }
        Format::Json => write_serialized(writer, &results, true),
        Format::Ndjson => {
            for r in results {
                write_serialized(writer, r, false)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gazetteer::Gazetteer;
    use crate::models::{Coordinate, Hypocenter};

    fn render(frame: &RenderFrame, format: Format) -> String {
        let mut buf = Vec::new();
        write_frame(&mut buf, frame, format).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn report() -> SeismicReport {
        SeismicReport {
            id: "r1".into(),
            time: None,
            hypocenter: Hypocenter {
                name: "石川県能登地方".into(),
                coordinate: Some(Coordinate::new(37.5, 137.2)),
                depth_km: Some(10.0),
                magnitude: Some(7.6),
            },
            max_intensity: Intensity::Seven,
            tsunami: TsunamiLevel::Warning,
            points: Vec::new(),
        }
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("human".parse::<Format>().unwrap(), Format::Human);
        assert_eq!("JSON".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("ndjson".parse::<Format>().unwrap(), Format::Ndjson);
        assert!("invalid".parse::<Format>().is_err());
    }

    #[test]
    fn test_human_snapshot() {
        let snapshot = DisplaySnapshot {
            report: Some(report()),
            ..Default::default()
        };
        let out = render(&RenderFrame::Display(snapshot), Format::Human);
        assert!(out.contains("[live]"));
        assert!(out.contains("idle"));
        assert!(out.contains("M7.6"));
        assert!(out.contains("max 7"));
        assert!(out.contains("石川県能登地方"));
        assert!(out.contains(ICON_TSUNAMI));
    }

    #[test]
    fn test_human_active_alert() {
        let mut eew = EewState {
            active: true,
            warning: true,
            event_id: "E1".into(),
            hypocenter: "千葉県東方沖".into(),
            magnitude: Some(5.2),
            max_intensity: Some(Intensity::FiveLower),
            updates: 3,
            ..Default::default()
        };
        eew.areas.insert("千葉県".into());

        let mut buf = Vec::new();
        write_eew_human(&mut buf, &eew).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("WARNING"));
        assert!(out.contains("M5.2"));
        assert!(out.contains("max 5弱"));
        assert!(out.contains("areas:"));
        assert!(out.contains("3 updates"));
    }

    #[test]
    fn test_ndjson_frame_is_tagged_single_line() {
        let frame = RenderFrame::Display(DisplaySnapshot::default());
        let out = render(&frame, Format::Ndjson);
        assert_eq!(out.lines().count(), 1);

        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["kind"], "display");
        assert_eq!(value["mode"], "live");
        assert_eq!(value["phase"], "idle");
    }

    #[test]
    fn test_located_output() {
        let gazetteer = Gazetteer::builtin();
        let results = [
            Located::new("東京都", gazetteer.lookup("東京都")),
            Located::new("どこか", gazetteer.lookup("どこか")),
        ];

        let mut buf = Vec::new();
        write_located(&mut buf, &results, Format::Human).unwrap();
        let out = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(&format!("{BOLD}東京都{RESET} → 東京都 ")));
        assert!(lines[0].contains("(exact)"));
        assert!(lines[1].contains("どこか"));
        assert!(lines[1].contains("unresolved"));

        let mut buf = Vec::new();
        write_located(&mut buf, &results, Format::Ndjson).unwrap();
        let out = String::from_utf8(buf).unwrap();
        let first: serde_json::Value = serde_json::from_str(out.lines().next().unwrap()).unwrap();
        assert_eq!(first["match"], "exact");
    }
}
