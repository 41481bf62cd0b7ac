//! Early-warning reconciliation.
//!
//! The EEW feed never says "this supersedes that"; it just keeps sending
//! refined frames keyed by event ID. [`EewReconciler`] folds those frames
//! into one authoritative [`EewState`], detects cancellation and finality,
//! and expires alerts that go quiet.
//!
//! Lifecycle:
//!
//! ```text
//! Idle ──alert──▶ Forecasting ──warning──▶ Warning
//!   ▲                  │                      │
//!   │                  └──────final───────────┴──▶ Final
//!   └──── cancel / inactivity timeout / final hold expiry / reset
//! ```

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::EewConfig;
use crate::gazetteer::Gazetteer;
use crate::models::{Coordinate, EewAlert, Intensity, parse_jst, parse_measure};

/// Where the live alert sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EewPhase {
    #[default]
    Idle,
    Forecasting,
    Warning,
    Final,
}

impl EewPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Forecasting => "forecasting",
            Self::Warning => "warning",
            Self::Final => "final",
        }
    }
}

/// The single live early-warning state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EewState {
    pub active: bool,
    /// Alarm (警報) rather than advisory (予報)
    pub warning: bool,
    /// No further updates expected
    pub final_report: bool,
    /// Correlation key of the live event
    pub event_id: String,
    pub hypocenter: String,
    pub magnitude: Option<f64>,
    pub depth_km: Option<f64>,
    pub max_intensity: Option<Intensity>,
    pub areas: BTreeSet<String>,
    pub origin_time: Option<DateTime<FixedOffset>>,
    pub announced_time: String,
    /// Explicit or geocoded epicenter
    pub epicenter: Option<Coordinate>,
    /// Frames merged into this event so far
    pub updates: u32,
    /// Monotonic time of the last transition
    #[serde(skip)]
    pub updated_at: Option<Instant>,
}

impl EewState {
    #[must_use]
    pub fn phase(&self) -> EewPhase {
        match (self.active, self.final_report, self.warning) {
            (false, _, _) => EewPhase::Idle,
            (true, true, _) => EewPhase::Final,
            (true, false, true) => EewPhase::Warning,
            (true, false, false) => EewPhase::Forecasting,
        }
    }

    /// Time since the last transition, if any happened.
    #[must_use]
    pub fn age(&self, now: Instant) -> Option<std::time::Duration> {
        self.updated_at
            .map(|at| now.saturating_duration_since(at))
    }
}

/// Outcome of feeding one frame or one clock tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed
    Ignored,
    /// First alert from idle
    Started { event_id: String },
    /// Same event refined
    Updated {
        escalated: bool,
        finalized: bool,
        /// Epicenter or origin time moved
        origin_changed: bool,
        /// New target areas arrived
        areas_changed: bool,
    },
    /// A different event took over
    Replaced { previous: String, event_id: String },
    Cancelled { event_id: String },
    /// Timed out (inactivity, or final hold elapsed)
    Expired { event_id: String, was_final: bool },
    /// Cleared by an operator
    Reset { event_id: String },
}

impl Transition {
    /// The alert became (or stayed) active with a new origin.
    #[must_use]
    pub fn starts_playback(&self) -> bool {
        match self {
            Self::Started { .. } | Self::Replaced { .. } => true,
            Self::Updated { origin_changed, .. } => *origin_changed,
            _ => false,
        }
    }

    /// The alert's framing (epicenter or target areas) changed.
    #[must_use]
    pub fn reframes(&self) -> bool {
        match self {
            Self::Updated {
                origin_changed,
                areas_changed,
                ..
            } => *origin_changed || *areas_changed,
            other => other.starts_playback(),
        }
    }

    #[must_use]
    pub fn deactivates(&self) -> bool {
        matches!(
            self,
            Self::Cancelled { .. } | Self::Expired { .. } | Self::Reset { .. }
        )
    }

    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// Owner of the live [`EewState`].
#[derive(Debug, Clone)]
pub struct EewReconciler {
    state: EewState,
    config: EewConfig,
    gazetteer: Gazetteer,
}

impl EewReconciler {
    #[must_use]
    pub fn new(config: EewConfig, gazetteer: Gazetteer) -> Self {
        Self {
            state: EewState::default(),
            config,
            gazetteer,
        }
    }

    #[must_use]
    pub fn state(&self) -> &EewState {
        &self.state
    }

    #[must_use]
    pub fn phase(&self) -> EewPhase {
        self.state.phase()
    }

    /// Fold one inbound frame into the live state.
    pub fn apply(&mut self, alert: &EewAlert, now: Instant) -> Transition {
        if alert.is_cancellation() {
            if !self.state.active {
                debug!(event_id = %alert.event_id, "cancel with no live alert");
                return Transition::Ignored;
            }
            let event_id = self.clear(now);
            info!(%event_id, "early warning cancelled");
            return Transition::Cancelled { event_id };
        }

        if !self.state.active {
            self.replace(alert, now);
            info!(
                event_id = %alert.event_id,
                phase = self.phase().as_str(),
                hypocenter = %self.state.hypocenter,
                "early warning started"
            );
            return Transition::Started {
                event_id: alert.event_id.clone(),
            };
        }

        if self.state.event_id != alert.event_id {
            let previous = std::mem::take(&mut self.state.event_id);
            self.replace(alert, now);
            info!(%previous, event_id = %alert.event_id, "early warning superseded by new event");
            return Transition::Replaced {
                previous,
                event_id: alert.event_id.clone(),
            };
        }

        self.merge(alert, now)
    }

    /// Expire the live alert if it has been quiet too long.
    ///
    /// Non-final alerts expire after the inactivity window; final alerts
    /// are held for the longer final-hold window instead.
    pub fn check_staleness(&mut self, now: Instant) -> Transition {
        if !self.state.active {
            return Transition::Ignored;
        }
        let Some(age) = self.state.age(now) else {
            return Transition::Ignored;
        };

        let was_final = self.state.final_report;
        let limit = if was_final {
            self.config.final_hold
        } else {
            self.config.inactivity_window
        };
        if age < limit {
            return Transition::Ignored;
        }

        let event_id = self.clear(now);
        info!(%event_id, was_final, silent_secs = age.as_secs(), "early warning expired");
        Transition::Expired {
            event_id,
            was_final,
        }
    }

    /// Drop the live alert on operator request.
    pub fn reset(&mut self, now: Instant) -> Transition {
        if !self.state.active {
            return Transition::Ignored;
        }
        let event_id = self.clear(now);
        info!(%event_id, "early warning reset");
        Transition::Reset { event_id }
    }

    /// Start a fresh state for `alert`, discarding whatever was live.
    fn replace(&mut self, alert: &EewAlert, now: Instant) {
        self.state = EewState {
            active: true,
            event_id: alert.event_id.clone(),
            ..EewState::default()
        };
        self.overwrite(alert, now);
    }

    fn merge(&mut self, alert: &EewAlert, now: Instant) -> Transition {
        let was_warning = self.state.warning;
        let was_final = self.state.final_report;
        let origin_before = (self.state.epicenter, self.state.origin_time);
        let areas_before = self.state.areas.len();

        self.overwrite(alert, now);

        let escalated = !was_warning && self.state.warning;
        let finalized = !was_final && self.state.final_report;
        let origin_changed = origin_before != (self.state.epicenter, self.state.origin_time);
        let areas_changed = self.state.areas.len() != areas_before;

        if escalated {
            info!(event_id = %self.state.event_id, "forecast escalated to warning");
        }
        if finalized {
            info!(event_id = %self.state.event_id, "early warning final report");
        }
        debug!(
            event_id = %self.state.event_id,
            updates = self.state.updates,
            magnitude = ?self.state.magnitude,
            "early warning refined"
        );

        Transition::Updated {
            escalated,
            finalized,
            origin_changed,
            areas_changed,
        }
    }

    /// Copy every field the frame actually carries; unknowns keep the
    /// prior estimate. Finality only ever turns on. A renamed hypocenter
    /// that neither resolves nor comes with a coordinate drops the old
    /// epicenter rather than keeping a location the name no longer
    /// describes.
    fn overwrite(&mut self, alert: &EewAlert, now: Instant) {
        let s = &mut self.state;

        s.warning = alert.is_warning();
        s.final_report |= alert.is_final();

        if let Some(m) = parse_measure(&alert.magnitude) {
            s.magnitude = Some(m);
        }
        if let Some(d) = parse_measure(&alert.depth) {
            s.depth_km = Some(d);
        }
        let intensity = Intensity::from_text(&alert.max_intensity);
        if intensity.is_known() {
            s.max_intensity = Some(intensity);
        }
        if !alert.hypocenter.is_empty() && alert.hypocenter != s.hypocenter {
            s.hypocenter.clone_from(&alert.hypocenter);
            if alert.coordinate.is_none() {
                s.epicenter = self.gazetteer.resolve(&s.hypocenter);
            }
        }
        if let Some(c) = alert.coordinate {
            s.epicenter = Some(c);
        }
        if let Some(t) = parse_jst(&alert.origin_time) {
            s.origin_time = Some(t);
        }
        if !alert.announced_time.is_empty() {
            s.announced_time.clone_from(&alert.announced_time);
        }
        s.areas.extend(alert.areas.iter().cloned());

        s.updates += 1;
        s.updated_at = Some(now);
    }

    /// Reset to idle, stamping the transition time. Returns the old event ID.
    fn clear(&mut self, now: Instant) -> String {
        let event_id = std::mem::take(&mut self.state.event_id);
        self.state = EewState {
            updated_at: Some(now),
            ..EewState::default()
        };
        event_id
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn reconciler() -> EewReconciler {
        EewReconciler::new(EewConfig::default(), Gazetteer::builtin())
    }

    fn alert(id: &str, title: &str, warning: bool) -> EewAlert {
        EewAlert {
            title: title.to_string(),
            event_id: id.to_string(),
            hypocenter: "石川県能登地方".to_string(),
            magnitude: "5.9".to_string(),
            depth: "10".to_string(),
            max_intensity: "4".to_string(),
            origin_time: "2024/01/01 16:10:09".to_string(),
            warning: Some(warning),
            ..Default::default()
        }
    }

    fn cancel(id: &str) -> EewAlert {
        EewAlert {
            title: "緊急地震速報 取消".to_string(),
            event_id: id.to_string(),
            cancel: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn test_forecast_escalates_then_cancels() {
        let mut r = reconciler();
        let t0 = Instant::now();

        let t = r.apply(&alert("E1", "予報", false), t0);
        assert_eq!(t, Transition::Started { event_id: "E1".into() });
        assert_eq!(r.phase(), EewPhase::Forecasting);

        let t = r.apply(&alert("E1", "警報", true), t0 + Duration::from_secs(6));
        assert!(matches!(t, Transition::Updated { escalated: true, .. }));
        assert!(r.state().warning);
        assert!(r.state().active);
        assert_eq!(r.phase(), EewPhase::Warning);

        let t = r.apply(&cancel("E1"), t0 + Duration::from_secs(8));
        assert_eq!(t, Transition::Cancelled { event_id: "E1".into() });
        assert!(!r.state().active);
        assert!(r.state().areas.is_empty());
        assert_eq!(r.phase(), EewPhase::Idle);
    }

    #[test]
    fn test_final_is_monotonic() {
        let mut r = reconciler();
        let t0 = Instant::now();

        let flags = [false, true, false, false];
        let mut seen_final = false;
        for (i, is_final) in flags.into_iter().enumerate() {
            let mut a = alert("E2", "予報", false);
            a.final_report = Some(is_final);
            r.apply(&a, t0 + Duration::from_secs(i as u64));
            seen_final |= is_final;
            assert_eq!(r.state().final_report, seen_final);
        }
        assert_eq!(r.phase(), EewPhase::Final);
    }

    #[test]
    fn test_never_final_without_final_frame() {
        let mut r = reconciler();
        let t0 = Instant::now();
        for i in 0..5 {
            r.apply(&alert("E3", "予報", i % 2 == 0), t0 + Duration::from_secs(i));
        }
        assert!(!r.state().final_report);
    }

    #[test]
    fn test_cancel_overrides_final_and_warning() {
        let mut r = reconciler();
        let t0 = Instant::now();
        let mut a = alert("E4", "警報", true);
        a.final_report = Some(true);
        r.apply(&a, t0);
        assert_eq!(r.phase(), EewPhase::Final);

        let t = r.apply(&cancel("E4"), t0 + Duration::from_secs(1));
        assert!(t.deactivates());
        assert!(!r.state().active);
    }

    #[test]
    fn test_cancel_while_idle_is_ignored() {
        let mut r = reconciler();
        assert_eq!(r.apply(&cancel("E5"), Instant::now()), Transition::Ignored);
        assert!(!r.state().active);
    }

    #[test]
    fn test_different_event_replaces() {
        let mut r = reconciler();
        let t0 = Instant::now();
        let mut first = alert("E6", "警報", true);
        first.areas = vec!["石川県能登".into()];
        first.final_report = Some(true);
        r.apply(&first, t0);

        let mut second = alert("E7", "予報", false);
        second.hypocenter = "千葉県東方沖".into();
        second.magnitude = String::new();
        let t = r.apply(&second, t0 + Duration::from_secs(1));

        assert_eq!(
            t,
            Transition::Replaced {
                previous: "E6".into(),
                event_id: "E7".into()
            }
        );
        let s = r.state();
        assert_eq!(s.event_id, "E7");
        assert!(!s.final_report);
        assert!(!s.warning);
        assert!(s.areas.is_empty());
        // Nothing carried over from E6
        assert!(s.magnitude.is_none());
        assert_eq!(s.hypocenter, "千葉県東方沖");
        assert_eq!(s.updates, 1);
    }

    #[test]
    fn test_partial_update_keeps_estimates() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.apply(&alert("E8", "予報", false), t0);

        let partial = EewAlert {
            title: "予報".into(),
            event_id: "E8".into(),
            magnitude: "6.2".into(),
            depth: "不明".into(),
            areas: vec!["石川県加賀".into()],
            ..Default::default()
        };
        let t = r.apply(&partial, t0 + Duration::from_secs(2));
        assert!(matches!(
            t,
            Transition::Updated {
                origin_changed: false,
                areas_changed: true,
                ..
            }
        ));
        assert!(t.reframes());
        assert!(!t.starts_playback());

        let s = r.state();
        assert_eq!(s.magnitude, Some(6.2));
        assert_eq!(s.depth_km, Some(10.0));
        assert_eq!(s.max_intensity, Some(Intensity::Four));
        assert_eq!(s.hypocenter, "石川県能登地方");
        assert!(s.areas.contains("石川県加賀"));
        assert_eq!(s.updates, 2);
    }

    #[test]
    fn test_areas_accumulate() {
        let mut r = reconciler();
        let t0 = Instant::now();
        let mut a = alert("E9", "警報", true);
        a.areas = vec!["石川県能登".into(), "富山県東部".into()];
        r.apply(&a, t0);
        a.areas = vec!["石川県能登".into(), "新潟県上越".into()];
        let t = r.apply(&a, t0 + Duration::from_secs(1));
        assert!(t.reframes());

        let areas: Vec<&str> = r.state().areas.iter().map(String::as_str).collect();
        assert_eq!(areas.len(), 3);
        assert!(areas.contains(&"新潟県上越"));

        // Repeating known areas changes nothing about the framing
        let t = r.apply(&a, t0 + Duration::from_secs(2));
        assert!(matches!(t, Transition::Updated { areas_changed: false, .. }));
        assert!(!t.reframes());
    }

    #[test]
    fn test_epicenter_geocoded_without_coordinates() {
        let mut r = reconciler();
        r.apply(&alert("E10", "予報", false), Instant::now());
        assert!(r.state().epicenter.is_some());

        let mut r = reconciler();
        let mut a = alert("E11", "予報", false);
        a.coordinate = Some(Coordinate::new(35.0, 140.0));
        r.apply(&a, Instant::now());
        assert_eq!(r.state().epicenter, Some(Coordinate::new(35.0, 140.0)));
    }

    #[test]
    fn test_unresolved_rename_drops_old_epicenter() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.apply(&alert("E14", "予報", false), t0);
        assert!(r.state().epicenter.is_some());

        let mut renamed = alert("E14", "予報", false);
        renamed.hypocenter = "架空の震源地".into();
        let t = r.apply(&renamed, t0 + Duration::from_secs(1));

        assert!(matches!(t, Transition::Updated { origin_changed: true, .. }));
        assert_eq!(r.state().hypocenter, "架空の震源地");
        assert!(r.state().epicenter.is_none());
    }

    #[test]
    fn test_staleness_expires_non_final() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.apply(&alert("E12", "予報", false), t0);

        assert_eq!(r.check_staleness(t0 + Duration::from_secs(19)), Transition::Ignored);
        assert!(r.state().active);

        let t = r.check_staleness(t0 + Duration::from_secs(21));
        assert_eq!(
            t,
            Transition::Expired {
                event_id: "E12".into(),
                was_final: false
            }
        );
        assert!(!r.state().active);
    }

    #[test]
    fn test_update_refreshes_staleness_clock() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.apply(&alert("E13", "予報", false), t0);
        r.apply(&alert("E13", "予報", false), t0 + Duration::from_secs(15));

        assert_eq!(r.check_staleness(t0 + Duration::from_secs(30)), Transition::Ignored);
        assert!(r.check_staleness(t0 + Duration::from_secs(36)).deactivates());
    }

    #[test]
    fn test_final_alert_held_past_inactivity_window() {
        let mut r = reconciler();
        let t0 = Instant::now();
        let mut a = alert("E14", "警報", true);
        a.final_report = Some(true);
        r.apply(&a, t0);

        assert_eq!(r.check_staleness(t0 + Duration::from_secs(60)), Transition::Ignored);
        assert_eq!(r.phase(), EewPhase::Final);

        let t = r.check_staleness(t0 + Duration::from_secs(181));
        assert_eq!(
            t,
            Transition::Expired {
                event_id: "E14".into(),
                was_final: true
            }
        );
    }

    #[test]
    fn test_reset() {
        let mut r = reconciler();
        let t0 = Instant::now();
        assert_eq!(r.reset(t0), Transition::Ignored);

        r.apply(&alert("E15", "予報", false), t0);
        assert_eq!(r.reset(t0), Transition::Reset { event_id: "E15".into() });
        assert_eq!(r.phase(), EewPhase::Idle);
        assert_eq!(r.state().updated_at, Some(t0));
    }

    #[test]
    fn test_restart_after_cancel() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.apply(&alert("E16", "予報", false), t0);
        r.apply(&cancel("E16"), t0);
        let t = r.apply(&alert("E17", "予報", false), t0 + Duration::from_secs(1));
        assert!(t.starts_playback());
        assert_eq!(r.state().updates, 1);
    }
}
