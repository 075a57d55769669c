//! Session normalisation: raw textual rows into typed, power-annotated sessions.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::duration::try_parse_duration_minutes;
use crate::input::RawSession;

/// A cleaned charging session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub station: String,
    /// Port index as reported by the charger, when parseable.
    pub port: Option<u32>,
    pub start: NaiveDateTime,
    /// Plug-out time.
    pub end: NaiveDateTime,
    pub energy_kwh: f64,
    /// Effective charging time used for the power estimate.
    pub charging_minutes: f64,
    pub avg_power_kw: f64,
    /// `start + charging_minutes`.
    pub charging_end: NaiveDateTime,
}

/// Row-level outcome of normalisation.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub raw_rows: usize,
    /// Rows with a blank station name; they belong to no station.
    pub dropped_missing_station: usize,
    pub dropped_missing_energy: usize,
    pub dropped_bad_timestamp: usize,
    /// Duration cells that were present but unparseable; zero-filled.
    pub malformed_durations: usize,
    /// Sessions whose both durations were zero, so the fixed fallback was used.
    pub fallback_sessions: usize,
}

impl NormalizeReport {
    pub fn dropped(&self) -> usize {
        self.dropped_missing_station + self.dropped_missing_energy + self.dropped_bad_timestamp
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Parses a wall-clock timestamp in any of the accepted export formats.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            ["%Y-%m-%d", "%m/%d/%Y"]
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_energy(value: Option<&str>) -> Option<f64> {
    value?.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_port(value: Option<&str>) -> Option<u32> {
    let port = value?.parse::<f64>().ok()?;
    (port.is_finite() && port >= 0.0 && port <= f64::from(u32::MAX)).then(|| port as u32)
}

/// Converts minutes into a [`TimeDelta`] at nanosecond resolution.
pub(crate) fn minutes_to_delta(minutes: f64) -> Option<TimeDelta> {
    let nanos = (minutes * 60.0 * 1e9).round();
    (nanos.is_finite() && nanos.abs() < i64::MAX as f64).then(|| TimeDelta::nanoseconds(nanos as i64))
}

/// Cleans the raw table into sessions with average power and charging end.
///
/// Rows lacking a station name or energy, or with either timestamp
/// unparseable, are dropped and counted; they never fail the run.
#[tracing::instrument(skip_all, fields(rows = raw.len()))]
pub fn normalize(raw: &[RawSession], config: &PipelineConfig) -> (Vec<Session>, NormalizeReport) {
    let mut report = NormalizeReport {
        raw_rows: raw.len(),
        ..Default::default()
    };
    let mut sessions = Vec::with_capacity(raw.len());

    for row in raw {
        if row.station.trim().is_empty() {
            report.dropped_missing_station += 1;
            continue;
        }

        let Some(energy_kwh) = parse_energy(row.energy_kwh.as_deref()) else {
            report.dropped_missing_energy += 1;
            continue;
        };

        let start = row.start.as_deref().and_then(parse_timestamp);
        let end = row.end.as_deref().and_then(parse_timestamp);
        let (Some(start), Some(end)) = (start, end) else {
            report.dropped_bad_timestamp += 1;
            continue;
        };

        let mut duration = |cell: Option<&str>| {
            try_parse_duration_minutes(cell).unwrap_or_else(|| {
                report.malformed_durations += 1;
                0.0
            })
        };
        let charging = duration(row.charging_time.as_deref());
        let total = duration(row.total_duration.as_deref());

        let charging_minutes = if charging != 0.0 {
            charging
        } else if total != 0.0 {
            total
        } else {
            report.fallback_sessions += 1;
            config.fallback_charge_minutes
        };

        let Some(charging_end) =
            minutes_to_delta(charging_minutes).and_then(|d| start.checked_add_signed(d))
        else {
            report.dropped_bad_timestamp += 1;
            continue;
        };

        sessions.push(Session {
            station: row.station.clone(),
            port: parse_port(row.port.as_deref()),
            start,
            end,
            energy_kwh,
            charging_minutes,
            avg_power_kw: energy_kwh / (charging_minutes / 60.0),
            charging_end,
        });
    }

    if report.dropped() > 0 || report.malformed_durations > 0 {
        warn!(
            missing_station = report.dropped_missing_station,
            missing_energy = report.dropped_missing_energy,
            bad_timestamp = report.dropped_bad_timestamp,
            malformed_durations = report.malformed_durations,
            "Row-level defects in raw sessions"
        );
    }
    info!(
        kept = sessions.len(),
        dropped = report.dropped(),
        fallback = report.fallback_sessions,
        "Sessions normalized"
    );

    (sessions, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn raw(start: &str, end: &str, charging: &str, total: &str, energy: &str) -> RawSession {
        let cell = |s: &str| (!s.is_empty()).then(|| s.to_string());
        RawSession {
            station: "A".to_string(),
            port: Some("1".to_string()),
            start: cell(start),
            end: cell(end),
            energy_kwh: cell(energy),
            charging_time: cell(charging),
            total_duration: cell(total),
        }
    }

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2011, 7, 29)
            .unwrap()
            .and_hms_opt(20, 17, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2011-07-29 20:17:00"), Some(expected));
        assert_eq!(parse_timestamp("2011-07-29 20:17"), Some(expected));
        assert_eq!(parse_timestamp("2011-07-29T20:17:00"), Some(expected));
        assert_eq!(parse_timestamp("7/29/2011 20:17"), Some(expected));
        assert_eq!(parse_timestamp("07/29/2011 20:17:00"), Some(expected));
        assert!(parse_timestamp("not a date").is_none());
        assert!(parse_timestamp("2011-13-40 25:00").is_none());
    }

    #[test]
    fn test_average_power_from_charging_time() {
        let rows = vec![raw("2020-01-01 10:00", "2020-01-01 11:00", "0:30:00", "1:00:00", "3")];
        let (sessions, report) = normalize(&rows, &PipelineConfig::default());

        assert_eq!(report.dropped(), 0);
        let s = &sessions[0];
        assert_relative_eq!(s.avg_power_kw, 6.0);
        assert_eq!(s.charging_end, ts("2020-01-01 10:30"));
    }

    #[test]
    fn test_zero_charging_time_falls_back_to_total() {
        let rows = vec![raw("2020-01-01 10:00", "2020-01-01 11:00", "0:00:00", "1:00:00", "3")];
        let (sessions, report) = normalize(&rows, &PipelineConfig::default());

        assert_eq!(report.fallback_sessions, 0);
        assert_relative_eq!(sessions[0].avg_power_kw, 3.0);
        assert_eq!(sessions[0].charging_end, ts("2020-01-01 11:00"));
    }

    #[test]
    fn test_blank_station_is_dropped_and_counted() {
        let mut blank = raw("2020-01-01 10:00", "2020-01-01 11:00", "1:00:00", "1:00:00", "3");
        blank.station = "  ".to_string();
        let rows = vec![raw("2020-01-01 10:00", "2020-01-01 11:00", "1:00:00", "1:00:00", "3"), blank];
        let (sessions, report) = normalize(&rows, &PipelineConfig::default());

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].station, "A");
        assert_eq!(report.dropped_missing_station, 1);
        assert_eq!(report.dropped(), 1);
    }

    #[test]
    fn test_zero_durations_use_fixed_fallback() {
        let rows = vec![raw("2020-01-01 10:00", "2020-01-01 10:00", "0:00:00", "0:00:00", "2")];
        let (sessions, report) = normalize(&rows, &PipelineConfig::default());

        assert_eq!(report.fallback_sessions, 1);
        let s = &sessions[0];
        assert!(s.avg_power_kw.is_finite());
        assert_relative_eq!(s.avg_power_kw, 8.0);
        assert_eq!(s.charging_end, ts("2020-01-01 10:15"));
    }

    #[test]
    fn test_malformed_durations_are_counted_and_zero_filled() {
        let rows = vec![raw("2020-01-01 10:00", "2020-01-01 11:00", "bogus", "1:00:00", "3")];
        let (sessions, report) = normalize(&rows, &PipelineConfig::default());

        assert_eq!(report.malformed_durations, 1);
        assert_relative_eq!(sessions[0].charging_minutes, 60.0);
    }

    #[test]
    fn test_drops_missing_energy_and_bad_timestamps() {
        let rows = vec![
            raw("2020-01-01 10:00", "2020-01-01 11:00", "0:30:00", "", ""),
            raw("2020-01-01 10:00", "2020-01-01 11:00", "0:30:00", "", "n/a"),
            raw("yesterday", "2020-01-01 11:00", "0:30:00", "", "1"),
            raw("2020-01-01 10:00", "", "0:30:00", "", "1"),
            raw("2020-01-01 10:00", "2020-01-01 11:00", "0:30:00", "", "1"),
        ];
        let (sessions, report) = normalize(&rows, &PipelineConfig::default());

        assert_eq!(report.raw_rows, 5);
        assert_eq!(report.dropped_missing_energy, 2);
        assert_eq!(report.dropped_bad_timestamp, 2);
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_unparseable_port_keeps_row() {
        let mut row = raw("2020-01-01 10:00", "2020-01-01 11:00", "0:30:00", "", "1");
        row.port = Some("north".to_string());
        let (sessions, _) = normalize(&[row], &PipelineConfig::default());

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].port, None);
    }

    #[test]
    fn test_parse_port_accepts_float_notation() {
        assert_eq!(parse_port(Some("2.0")), Some(2));
        assert_eq!(parse_port(Some("-1")), None);
        assert_eq!(parse_port(None), None);
    }
}
