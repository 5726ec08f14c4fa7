// Record kinds recognized in a telemetry log line, and how to extract them

use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::{Channel, Position, SessionKey, parse_timestamp};

pub const UNKNOWN_TRACK: &str = "Unknown Track";

/// Language the capture mod wrote its keywords in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Dialect {
    #[default]
    English,
    Spanish,
}

impl Dialect {
    pub const ALL: [Dialect; 2] = [Dialect::English, Dialect::Spanish];

    /// Prefix of the session start marker, also used to spot an interrupted
    /// marker at the end of the file.
    pub fn session_marker(&self) -> &'static str {
        match self {
            Dialect::English => "=== Telemetry started",
            Dialect::Spanish => "=== Telemetría iniciada",
        }
    }

    fn keywords(&self) -> Keywords {
        match self {
            Dialect::English => Keywords {
                track: "Track",
                lap: "Lap",
                date: "Date",
                speed: "Speed",
                brake: "Brake",
                gear: "Gear",
                clutch: "Clutch",
                throttle: "Throttle",
                wheel_speed: "Wheel speed",
                steering_angle: "Steering angle",
                engine_temperature: "Engine temp",
                dirt_level: "Dirt level",
                weather: "Weather",
                game_clock: "Game time",
                position: "Position",
            },
            Dialect::Spanish => Keywords {
                track: "Circuito",
                lap: "Vuelta",
                date: "Fecha",
                speed: "Velocidad",
                brake: "Freno",
                gear: "Marcha",
                clutch: "Embrague",
                throttle: "Acelerador",
                wheel_speed: "Velocidad rueda",
                steering_angle: "Ángulo de dirección",
                engine_temperature: "Temperatura motor",
                dirt_level: "Nivel de suciedad",
                weather: "Clima",
                game_clock: "Hora del juego",
                position: "Posición",
            },
        }
    }

    /// Guesses the dialect from the first line that carries a session marker
    /// or a timestamp keyword. Falls back to English.
    pub fn detect<S: AsRef<str>>(lines: &[S]) -> Dialect {
        for line in lines {
            let line = line.as_ref();
            for dialect in Dialect::ALL {
                let keywords = dialect.keywords();
                if line.contains(dialect.session_marker())
                    || line.contains(&format!("{}: ", keywords.date))
                {
                    return dialect;
                }
            }
        }
        Dialect::default()
    }

    pub(crate) fn patterns(&self) -> &'static RecordPatterns {
        match self {
            Dialect::English => &ENGLISH_PATTERNS,
            Dialect::Spanish => &SPANISH_PATTERNS,
        }
    }
}

struct Keywords {
    track: &'static str,
    lap: &'static str,
    date: &'static str,
    speed: &'static str,
    brake: &'static str,
    gear: &'static str,
    clutch: &'static str,
    throttle: &'static str,
    wheel_speed: &'static str,
    steering_angle: &'static str,
    engine_temperature: &'static str,
    dirt_level: &'static str,
    weather: &'static str,
    game_clock: &'static str,
    position: &'static str,
}

/// Every kind of record a line can carry. A line may match several kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum RecordKind {
    SessionStart,
    Track,
    Timestamp,
    Lap,
    Speed,
    Brake,
    Rpm,
    Gear,
    Clutch,
    Throttle,
    WheelSpeed,
    Turbo,
    SteeringAngle,
    EngineTemperature,
    DirtLevel,
    Position,
    Weather,
    GameClock,
}

impl RecordKind {
    /// Kinds in the order they are applied to a line: context first (session,
    /// track, timestamp, lap) and values after.
    pub const ALL: [RecordKind; 18] = [
        RecordKind::SessionStart,
        RecordKind::Track,
        RecordKind::Timestamp,
        RecordKind::Lap,
        RecordKind::Speed,
        RecordKind::Brake,
        RecordKind::Rpm,
        RecordKind::Gear,
        RecordKind::Clutch,
        RecordKind::Throttle,
        RecordKind::WheelSpeed,
        RecordKind::Turbo,
        RecordKind::SteeringAngle,
        RecordKind::EngineTemperature,
        RecordKind::DirtLevel,
        RecordKind::Position,
        RecordKind::Weather,
        RecordKind::GameClock,
    ];

    fn scalar_channel(&self) -> Option<Channel> {
        match self {
            RecordKind::Speed => Some(Channel::Speed),
            RecordKind::Brake => Some(Channel::Brake),
            RecordKind::Rpm => Some(Channel::Rpm),
            RecordKind::Clutch => Some(Channel::Clutch),
            RecordKind::Throttle => Some(Channel::Throttle),
            RecordKind::WheelSpeed => Some(Channel::WheelSpeed),
            RecordKind::Turbo => Some(Channel::Turbo),
            RecordKind::SteeringAngle => Some(Channel::SteeringAngle),
            RecordKind::EngineTemperature => Some(Channel::EngineTemperature),
            RecordKind::DirtLevel => Some(Channel::DirtLevel),
            _ => None,
        }
    }
}

/// A value extracted from a line.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    SessionStart { key: SessionKey, track: String },
    Track(String),
    Timestamp(NaiveDateTime),
    Lap(u32),
    Scalar(Channel, f64),
    Gear(i32),
    Position(Position),
    Weather(String),
    GameClock(String),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::SessionStart { .. } => RecordKind::SessionStart,
            Record::Track(_) => RecordKind::Track,
            Record::Timestamp(_) => RecordKind::Timestamp,
            Record::Lap(_) => RecordKind::Lap,
            Record::Scalar(channel, _) => match channel {
                Channel::Speed => RecordKind::Speed,
                Channel::Brake => RecordKind::Brake,
                Channel::Rpm => RecordKind::Rpm,
                Channel::Clutch => RecordKind::Clutch,
                Channel::Throttle => RecordKind::Throttle,
                Channel::WheelSpeed => RecordKind::WheelSpeed,
                Channel::Turbo => RecordKind::Turbo,
                Channel::SteeringAngle => RecordKind::SteeringAngle,
                Channel::EngineTemperature => RecordKind::EngineTemperature,
                Channel::DirtLevel => RecordKind::DirtLevel,
            },
            Record::Gear(_) => RecordKind::Gear,
            Record::Position(_) => RecordKind::Position,
            Record::Weather(_) => RecordKind::Weather,
            Record::GameClock(_) => RecordKind::GameClock,
        }
    }
}

/// A pattern matched but its value could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub kind: RecordKind,
    pub raw: String,
    pub reason: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed {:?} value {:?}: {}", self.kind, self.raw, self.reason)
    }
}

impl std::error::Error for FieldError {}

// Loose on purpose: anything number-like is captured so that a malformed
// value is reported instead of silently not matching.
const NUM: &str = r"([-+]?[\d.,]+)";

pub(crate) struct RecordPatterns {
    patterns: Vec<(RecordKind, Regex)>,
}

static ENGLISH_PATTERNS: LazyLock<RecordPatterns> =
    LazyLock::new(|| RecordPatterns::for_dialect(Dialect::English));
static SPANISH_PATTERNS: LazyLock<RecordPatterns> =
    LazyLock::new(|| RecordPatterns::for_dialect(Dialect::Spanish));

impl RecordPatterns {
    fn for_dialect(dialect: Dialect) -> Self {
        let k = dialect.keywords();
        let ts = r"(\d{2}/\d{2}/\d{4} \d{2}:\d{2}:\d{2}(?:\.\d+)?|\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:\.\d+)?)";
        let patterns = RecordKind::ALL
            .iter()
            .map(|kind| {
                let source = match kind {
                    RecordKind::SessionStart => format!(
                        r"{} (\S+)\s+(\S+)\s*(.*?)\s*===",
                        regex::escape(dialect.session_marker())
                    ),
                    RecordKind::Track => format!(r"{}: (.+?) \| {}:", k.track, k.lap),
                    RecordKind::Timestamp => format!(r"{}: {}", k.date, ts),
                    RecordKind::Lap => format!(r"\b{}: ([-+]?\d+)", k.lap),
                    RecordKind::Speed => format!(r"\b{}: {} km/h", k.speed, NUM),
                    RecordKind::Brake => format!(r"\b{}: {}\s*%", k.brake, NUM),
                    RecordKind::Rpm => format!(r"\bRPM: {}", NUM),
                    RecordKind::Gear => format!(r"\b{}: ([-+]?\d+)", k.gear),
                    RecordKind::Clutch => format!(r"\b{}: {}", k.clutch, NUM),
                    RecordKind::Throttle => format!(r"\b{}: {}", k.throttle, NUM),
                    RecordKind::WheelSpeed => format!(r"\b{}: {}", k.wheel_speed, NUM),
                    RecordKind::Turbo => format!(r"\bTurbo: {}", NUM),
                    RecordKind::SteeringAngle => format!(r"{}: {}", k.steering_angle, NUM),
                    RecordKind::EngineTemperature => {
                        format!(r"\b{}: {}", k.engine_temperature, NUM)
                    }
                    RecordKind::DirtLevel => format!(r"\b{}: {}", k.dirt_level, NUM),
                    RecordKind::Position => format!(
                        r"{}: \(([^()]*?), ([^()]*?), ([^()]*?)\)",
                        k.position
                    ),
                    RecordKind::Weather => format!(r"\b{}: ([^|]+)", k.weather),
                    RecordKind::GameClock => format!(
                        r"\b{}: (\d{{1,2}}):(\d{{1,2}}):(\d{{1,2}})(?:[.,](\d+))?",
                        k.game_clock
                    ),
                };
                // The sources above are fixed at compile time.
                let regex = Regex::new(&source).unwrap_or_else(|e| {
                    panic!("invalid {:?} pattern {:?}: {}", kind, source, e)
                });
                (*kind, regex)
            })
            .collect();
        Self { patterns }
    }
}

/// Reads a locale formatted number, accepting `,` as decimal separator.
pub fn parse_number(kind: RecordKind, raw: &str) -> Result<f64, FieldError> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|e| FieldError {
            kind,
            raw: raw.to_string(),
            reason: e.to_string(),
        })
}

fn parse_integer<T: std::str::FromStr>(kind: RecordKind, raw: &str) -> Result<T, FieldError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| FieldError {
        kind,
        raw: raw.to_string(),
        reason: e.to_string(),
    })
}

fn group<'h>(caps: &Captures<'h>, i: usize) -> &'h str {
    caps.get(i).map(|m| m.as_str()).unwrap_or("")
}

/// Normalizes an in-game clock to `HH:MM:SS.ffff`.
pub fn format_game_clock(
    hours: &str,
    minutes: &str,
    seconds: &str,
    fraction: Option<&str>,
) -> Result<String, FieldError> {
    let raw = match fraction {
        Some(f) => format!("{}:{}:{}.{}", hours, minutes, seconds, f),
        None => format!("{}:{}:{}", hours, minutes, seconds),
    };
    let h: u32 = parse_integer(RecordKind::GameClock, hours)?;
    let m: u32 = parse_integer(RecordKind::GameClock, minutes)?;
    let s: u32 = parse_integer(RecordKind::GameClock, seconds)?;
    if h > 23 || m > 59 || s > 59 {
        return Err(FieldError {
            kind: RecordKind::GameClock,
            raw,
            reason: "clock component out of range".to_string(),
        });
    }
    let mut digits: String = fraction.unwrap_or("").chars().take(4).collect();
    while digits.len() < 4 {
        digits.push('0');
    }
    Ok(format!("{:02}:{:02}:{:02}.{}", h, m, s, digits))
}

fn extract(kind: RecordKind, caps: &Captures<'_>) -> Result<Record, FieldError> {
    if let Some(channel) = kind.scalar_channel() {
        return parse_number(kind, group(caps, 1)).map(|v| Record::Scalar(channel, v));
    }
    match kind {
        RecordKind::SessionStart => {
            let track = group(caps, 3)
                .trim_start_matches(|c: char| c == '-' || c.is_whitespace())
                .trim();
            Ok(Record::SessionStart {
                key: SessionKey::new(group(caps, 1).trim(), group(caps, 2).trim()),
                track: if track.is_empty() {
                    UNKNOWN_TRACK.to_string()
                } else {
                    track.to_string()
                },
            })
        }
        RecordKind::Track => Ok(Record::Track(group(caps, 1).trim().to_string())),
        RecordKind::Timestamp => {
            let raw = group(caps, 1);
            parse_timestamp(raw)
                .map(Record::Timestamp)
                .ok_or_else(|| FieldError {
                    kind,
                    raw: raw.to_string(),
                    reason: "not a valid date and time".to_string(),
                })
        }
        RecordKind::Lap => parse_integer(kind, group(caps, 1)).map(Record::Lap),
        RecordKind::Gear => parse_integer(kind, group(caps, 1)).map(Record::Gear),
        RecordKind::Position => Ok(Record::Position(Position {
            x: parse_number(kind, group(caps, 1))?,
            y: parse_number(kind, group(caps, 2))?,
            z: parse_number(kind, group(caps, 3))?,
        })),
        RecordKind::Weather => Ok(Record::Weather(group(caps, 1).trim().to_string())),
        RecordKind::GameClock => format_game_clock(
            group(caps, 1),
            group(caps, 2),
            group(caps, 3),
            caps.get(4).map(|m| m.as_str()),
        )
        .map(Record::GameClock),
        _ => unreachable!("scalar kinds are handled above"),
    }
}

/// Every record found on `line`, in `RecordKind::ALL` order.
pub fn match_line(dialect: Dialect, line: &str) -> Vec<Result<Record, FieldError>> {
    dialect
        .patterns()
        .patterns
        .iter()
        .filter_map(|(kind, regex)| regex.captures(line).map(|caps| extract(*kind, &caps)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(dialect: Dialect, line: &str) -> Vec<Record> {
        match_line(dialect, line)
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_every_kind_has_a_pattern() {
        for dialect in Dialect::ALL {
            let kinds: Vec<RecordKind> = dialect.patterns().patterns.iter().map(|p| p.0).collect();
            assert_eq!(kinds, RecordKind::ALL.to_vec());
        }
    }

    #[test]
    fn test_session_start_strips_separator() {
        let out = records(
            Dialect::English,
            "=== Telemetry started 01/01/2024 10:00:00 - TrackX ===",
        );
        assert_eq!(
            out,
            vec![Record::SessionStart {
                key: SessionKey::new("01/01/2024", "10:00:00"),
                track: "TrackX".to_string(),
            }]
        );
    }

    #[test]
    fn test_session_start_without_track() {
        let out = records(Dialect::Spanish, "=== Telemetría iniciada 2024-01-01 10:00:00 ===");
        assert_eq!(
            out,
            vec![Record::SessionStart {
                key: SessionKey::new("2024-01-01", "10:00:00"),
                track: UNKNOWN_TRACK.to_string(),
            }]
        );
    }

    #[test]
    fn test_header_line_matches_several_kinds() {
        let out = records(
            Dialect::English,
            "Telemetry | Date: 01/01/2024 10:00:01.500 | Track: Vinewood Loop | Lap: 2",
        );
        let kinds: Vec<RecordKind> = out.iter().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            vec![RecordKind::Track, RecordKind::Timestamp, RecordKind::Lap]
        );
        assert_eq!(out[0], Record::Track("Vinewood Loop".to_string()));
        assert_eq!(out[2], Record::Lap(2));
    }

    #[test]
    fn test_comma_decimal_speed() {
        let out = records(Dialect::English, "  Speed: 123,5 km/h");
        assert_eq!(out, vec![Record::Scalar(Channel::Speed, 123.5)]);
    }

    #[test]
    fn test_spanish_values() {
        assert_eq!(
            records(Dialect::Spanish, "  Velocidad: 88,25 km/h"),
            vec![Record::Scalar(Channel::Speed, 88.25)]
        );
        assert_eq!(
            records(Dialect::Spanish, "  Freno: 40%"),
            vec![Record::Scalar(Channel::Brake, 40.0)]
        );
        assert_eq!(records(Dialect::Spanish, "  Marcha: 4"), vec![Record::Gear(4)]);
        assert_eq!(
            records(Dialect::Spanish, "  Posición: (1,5, -2,25, 30)"),
            vec![Record::Position(Position {
                x: 1.5,
                y: -2.25,
                z: 30.0
            })]
        );
    }

    #[test]
    fn test_wheel_speed_does_not_match_speed() {
        assert_eq!(
            records(Dialect::English, "  Wheel speed: 31.2"),
            vec![Record::Scalar(Channel::WheelSpeed, 31.2)]
        );
        assert_eq!(
            records(Dialect::Spanish, "  Velocidad rueda: 31,2"),
            vec![Record::Scalar(Channel::WheelSpeed, 31.2)]
        );
    }

    #[test]
    fn test_extended_fields() {
        assert_eq!(
            records(Dialect::English, "  Weather: Clear | Game time: 9:5:3.25"),
            vec![
                Record::Weather("Clear".to_string()),
                Record::GameClock("09:05:03.2500".to_string())
            ]
        );
        assert_eq!(
            records(Dialect::English, "  Steering angle: -12,5"),
            vec![Record::Scalar(Channel::SteeringAngle, -12.5)]
        );
        assert_eq!(
            records(Dialect::English, "  Engine temp: 91.0"),
            vec![Record::Scalar(Channel::EngineTemperature, 91.0)]
        );
    }

    #[test]
    fn test_malformed_value_is_reported() {
        let out = match_line(Dialect::English, "  Speed: 1.2.3 km/h");
        assert_eq!(out.len(), 1);
        let err = out[0].clone().unwrap_err();
        assert_eq!(err.kind, RecordKind::Speed);
        assert_eq!(err.raw, "1.2.3");
    }

    #[test]
    fn test_invalid_clock_is_reported() {
        let out = match_line(Dialect::English, "  Game time: 25:00:00");
        assert!(matches!(&out[0], Err(e) if e.kind == RecordKind::GameClock));
    }

    #[test]
    fn test_unrecognized_line() {
        assert!(match_line(Dialect::English, "").is_empty());
        assert!(match_line(Dialect::English, "[INFO] ScriptHookV loaded").is_empty());
    }

    #[test]
    fn test_detect_dialect() {
        assert_eq!(
            Dialect::detect(&["", "=== Telemetría iniciada 2024-01-01 10:00:00 X ==="]),
            Dialect::Spanish
        );
        assert_eq!(
            Dialect::detect(&["Telemetry | Date: 01/01/2024 10:00:00.000"]),
            Dialect::English
        );
        assert_eq!(Dialect::detect::<&str>(&[]), Dialect::English);
    }
}
