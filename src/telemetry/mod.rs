// Session and lap data model built from a telemetry log

pub mod parser;
pub mod record;

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

pub use parser::{
    LogParser, ParseIssue, ParseReport, ParserState, load_telemetry_log, read_log_lines,
    sanitize_lines,
};
pub use record::{Dialect, FieldError, Record, RecordKind, match_line};

/// Timestamp layouts written by the capture mod, tried in order.
pub const TIMESTAMP_FORMATS: [&str; 2] = ["%d/%m/%Y %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub(crate) fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw.trim(), format).ok())
}

/// Composite key of a session: the date and time of its start marker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct SessionKey {
    pub date: String,
    pub time: String,
}

impl SessionKey {
    pub fn new(date: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            time: time.into(),
        }
    }

    /// Start of the session, when the marker uses a known timestamp layout.
    pub fn started_at(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&format!("{} {}", self.date, self.time))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Scalar telemetry channels carried by a lap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Speed,
    Brake,
    Rpm,
    Clutch,
    Throttle,
    WheelSpeed,
    Turbo,
    SteeringAngle,
    EngineTemperature,
    DirtLevel,
}

impl Channel {
    pub const ALL: [Channel; 10] = [
        Channel::Speed,
        Channel::Brake,
        Channel::Rpm,
        Channel::Clutch,
        Channel::Throttle,
        Channel::WheelSpeed,
        Channel::Turbo,
        Channel::SteeringAngle,
        Channel::EngineTemperature,
        Channel::DirtLevel,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Channel::Speed => "Speed (km/h)",
            Channel::Brake => "Brake (%)",
            Channel::Rpm => "RPM",
            Channel::Clutch => "Clutch",
            Channel::Throttle => "Throttle",
            Channel::WheelSpeed => "Wheel speed",
            Channel::Turbo => "Turbo",
            Channel::SteeringAngle => "Steering angle",
            Channel::EngineTemperature => "Engine temperature",
            Channel::DirtLevel => "Dirt level",
        }
    }
}

/// One loop of the track. Every channel is its own series and a channel the
/// log never mentions simply stays empty.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Lap {
    pub number: u32,
    /// One entry per speed sample, taken from the last timestamp seen
    pub timestamps: Vec<NaiveDateTime>,
    /// Seconds since the first sample, filled by `analysis::compute_durations`
    pub durations: Vec<f64>,
    /// km/h
    pub speed: Vec<f64>,
    /// Percent of pedal travel
    pub brake: Vec<f64>,
    pub rpm: Vec<f64>,
    pub gear: Vec<i32>,
    pub clutch: Vec<f64>,
    pub throttle: Vec<f64>,
    pub wheel_speed: Vec<f64>,
    pub turbo: Vec<f64>,
    pub steering_angle: Vec<f64>,
    pub engine_temperature: Vec<f64>,
    pub dirt_level: Vec<f64>,
    pub weather: Vec<String>,
    /// In-game clock formatted as `HH:MM:SS.ffff`
    pub game_clock: Vec<String>,
    pub positions: Vec<Position>,
}

impl Lap {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    pub fn sample_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn channel(&self, channel: Channel) -> &[f64] {
        match channel {
            Channel::Speed => &self.speed,
            Channel::Brake => &self.brake,
            Channel::Rpm => &self.rpm,
            Channel::Clutch => &self.clutch,
            Channel::Throttle => &self.throttle,
            Channel::WheelSpeed => &self.wheel_speed,
            Channel::Turbo => &self.turbo,
            Channel::SteeringAngle => &self.steering_angle,
            Channel::EngineTemperature => &self.engine_temperature,
            Channel::DirtLevel => &self.dirt_level,
        }
    }

    pub(crate) fn channel_mut(&mut self, channel: Channel) -> &mut Vec<f64> {
        match channel {
            Channel::Speed => &mut self.speed,
            Channel::Brake => &mut self.brake,
            Channel::Rpm => &mut self.rpm,
            Channel::Clutch => &mut self.clutch,
            Channel::Throttle => &mut self.throttle,
            Channel::WheelSpeed => &mut self.wheel_speed,
            Channel::Turbo => &mut self.turbo,
            Channel::SteeringAngle => &mut self.steering_angle,
            Channel::EngineTemperature => &mut self.engine_temperature,
            Channel::DirtLevel => &mut self.dirt_level,
        }
    }

    pub fn gear_series(&self) -> Vec<f64> {
        self.gear.iter().map(|g| *g as f64).collect()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Session {
    pub key: SessionKey,
    /// Last track name stated for the session
    pub track: String,
    /// Laps in the order they were first seen
    pub laps: Vec<Lap>,
}

impl Session {
    pub fn new(key: SessionKey, track: impl Into<String>) -> Self {
        Self {
            key,
            track: track.into(),
            laps: Vec::new(),
        }
    }

    pub fn lap(&self, number: u32) -> Option<&Lap> {
        self.laps.iter().find(|l| l.number == number)
    }

    pub(crate) fn lap_mut(&mut self, number: u32) -> Option<&mut Lap> {
        self.laps.iter_mut().find(|l| l.number == number)
    }

    /// Creates the lap on its first marker. Returns true when it was new.
    pub(crate) fn ensure_lap(&mut self, number: u32) -> bool {
        if self.lap(number).is_some() {
            return false;
        }
        self.laps.push(Lap::new(number));
        true
    }

    pub fn lap_numbers(&self) -> Vec<u32> {
        self.laps.iter().map(|l| l.number).collect()
    }

    /// Laps matching `selected`, in session order. Unknown numbers are ignored.
    pub fn selected_laps<'a>(&'a self, selected: &'a [u32]) -> impl Iterator<Item = &'a Lap> + 'a {
        self.laps.iter().filter(move |l| selected.contains(&l.number))
    }
}

/// Every session found in one telemetry log.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TelemetryLog {
    pub sessions: Vec<Session>,
}

impl TelemetryLog {
    pub fn session(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.key == key)
    }

    pub(crate) fn session_mut(&mut self, key: &SessionKey) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| &s.key == key)
    }

    /// Looks a session up by its displayed key, e.g. `"01/01/2024 10:00:00"`.
    pub fn session_by_label(&self, label: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.key.to_string() == label.trim())
    }

    pub fn track_of(&self, key: &SessionKey) -> Option<&str> {
        self.session(key).map(|s| s.track.as_str())
    }

    pub fn lap_count(&self) -> usize {
        self.sessions.iter().map(|s| s.laps.len()).sum()
    }

    /// Sessions with the most recent start first. Keys that don't parse as a
    /// timestamp sort after the ones that do, by their text.
    pub fn sessions_newest_first(&self) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self.sessions.iter().collect();
        sessions.sort_by(|a, b| match (a.key.started_at(), b.key.started_at()) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.key.to_string().cmp(&a.key.to_string()),
        });
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_accepts_both_layouts() {
        let dmy = parse_timestamp("01/02/2024 10:00:01.250").unwrap();
        let ymd = parse_timestamp("2024-02-01 10:00:01.250").unwrap();
        assert_eq!(dmy, ymd);
        assert!(parse_timestamp("2024/02/01 10:00").is_none());
    }

    #[test]
    fn test_ensure_lap_keeps_first_seen_order() {
        let mut session = Session::new(SessionKey::new("01/01/2024", "10:00:00"), "TrackX");
        assert!(session.ensure_lap(3));
        assert!(session.ensure_lap(1));
        assert!(!session.ensure_lap(3));
        assert_eq!(session.lap_numbers(), vec![3, 1]);
    }

    #[test]
    fn test_sessions_newest_first() {
        let log = TelemetryLog {
            sessions: vec![
                Session::new(SessionKey::new("01/01/2024", "10:00:00"), "A"),
                Session::new(SessionKey::new("02/01/2024", "09:00:00"), "B"),
                Session::new(SessionKey::new("2023-12-31", "23:59:59"), "C"),
            ],
        };
        let tracks: Vec<&str> = log
            .sessions_newest_first()
            .iter()
            .map(|s| s.track.as_str())
            .collect();
        assert_eq!(tracks, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_missing_channel_is_empty() {
        let lap = Lap::new(1);
        for channel in Channel::ALL {
            assert!(lap.channel(channel).is_empty());
        }
        assert!(lap.gear_series().is_empty());
    }

    #[test]
    fn test_session_by_label() {
        let log = TelemetryLog {
            sessions: vec![Session::new(SessionKey::new("01/01/2024", "10:00:00"), "A")],
        };
        assert!(log.session_by_label(" 01/01/2024 10:00:00 ").is_some());
        assert!(log.session_by_label("01/01/2024").is_none());
        assert_eq!(log.track_of(&SessionKey::new("01/01/2024", "10:00:00")), Some("A"));
    }
}
