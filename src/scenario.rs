//! Early-warning scenarios for simulation mode.

use chrono::{DateTime, FixedOffset};

use crate::errors::QuakewatchError;
use crate::models::{Coordinate, EewAlert, decode_eew_frame};

const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// A forecast that escalates to a warning, widens, and finalizes.
///
/// `origin` becomes the origin time of every frame.
#[must_use]
pub fn builtin(origin: DateTime<FixedOffset>) -> Vec<EewAlert> {
    let origin_time = origin.format(TIME_FORMAT).to_string();
    let base = EewAlert {
        event_id: "SIM-0001".into(),
        hypocenter: "石川県能登地方".into(),
        coordinate: Some(Coordinate::new(37.5, 137.2)),
        origin_time,
        ..Default::default()
    };

    let at = |secs: i64| {
        (origin + chrono::TimeDelta::seconds(secs))
            .format(TIME_FORMAT)
            .to_string()
    };

    vec![
        EewAlert {
            title: "緊急地震速報（予報）".into(),
            magnitude: "5.8".into(),
            depth: "10".into(),
            max_intensity: "4".into(),
            announced_time: at(5),
            warning: Some(false),
            ..base.clone()
        },
        EewAlert {
            title: "緊急地震速報（警報）".into(),
            magnitude: "6.9".into(),
            max_intensity: "6+".into(),
            announced_time: at(9),
            warning: Some(true),
            areas: vec!["石川県能登".into(), "富山県".into(), "新潟県上越".into()],
            ..base.clone()
        },
        EewAlert {
            title: "緊急地震速報（警報）".into(),
            magnitude: "7.4".into(),
            max_intensity: "7".into(),
            announced_time: at(15),
            warning: Some(true),
            areas: vec!["福井県".into(), "岐阜県".into()],
            ..base.clone()
        },
        EewAlert {
            title: "緊急地震速報（警報）".into(),
            magnitude: "7.6".into(),
            depth: "16".into(),
            max_intensity: "7".into(),
            announced_time: at(40),
            warning: Some(true),
            final_report: Some(true),
            ..base
        },
    ]
}

/// Read newline-delimited early-warning frames.
///
/// Blank lines and frames of other types are skipped.
///
/// # Errors
///
/// Returns an error on the first malformed line.
pub fn load(text: &str) -> Result<Vec<EewAlert>, QuakewatchError> {
    let mut alerts = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(alert) = decode_eew_frame(line)? {
            alerts.push(alert);
        }
    }
    Ok(alerts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EewConfig;
    use crate::gazetteer::Gazetteer;
    use crate::models::parse_jst;
    use crate::reconcile::{EewPhase, EewReconciler};

    #[test]
    fn test_builtin_runs_to_final() {
        let origin = parse_jst("2024/01/01 16:10:00").unwrap();
        let alerts = builtin(origin);
        assert_eq!(alerts.len(), 4);
        assert!(alerts.iter().all(|a| a.origin_time == "2024/01/01 16:10:00"));

        let mut reconciler = EewReconciler::new(EewConfig::default(), Gazetteer::builtin());
        let now = std::time::Instant::now();
        let phases: Vec<EewPhase> = alerts
            .iter()
            .map(|a| {
                reconciler.apply(a, now);
                reconciler.phase()
            })
            .collect();

        assert_eq!(
            phases,
            [EewPhase::Forecasting, EewPhase::Warning, EewPhase::Warning, EewPhase::Final]
        );
        assert_eq!(reconciler.state().areas.len(), 5);
        assert_eq!(reconciler.state().magnitude, Some(7.6));
    }

    #[test]
    fn test_load_skips_blank_and_foreign_lines() {
        let text = r#"
{"type":"jma_eew","Title":"緊急地震速報（予報）","EventID":"E1","Hypocenter":"千葉県東方沖"}

{"type":"heartbeat"}
{"type":"jma_eew","Title":"緊急地震速報（予報）","EventID":"E1","isFinal":true}
"#;
        let alerts = load(text).unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[1].final_report, Some(true));
    }

    #[test]
    fn test_load_rejects_malformed_lines() {
        assert!(load("{not json").is_err());
    }
}
