// Builds the session/lap model from telemetry log lines

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use serde::Serialize;

use super::record::{Dialect, Record, RecordKind, match_line};
use super::{Channel, SessionKey, Session, TelemetryLog};
use crate::{LapchartError, analysis};

/// Context carried from one line to the next.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParserState {
    pub current_session: Option<SessionKey>,
    pub current_lap: Option<u32>,
    pub current_timestamp: Option<NaiveDateTime>,
}

/// A field that matched its pattern but was skipped.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParseIssue {
    /// 1-based line number in the sanitized input
    pub line_no: usize,
    pub kind: RecordKind,
    pub raw: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ParseReport {
    pub lines_read: usize,
    /// Lines where at least one record kind matched
    pub lines_matched: usize,
    /// Lines before the first session start marker
    pub lines_before_session: usize,
    /// Values seen without the lap or timestamp context they need
    pub samples_dropped: usize,
    /// Trailing lines removed by `sanitize_lines`
    pub lines_sanitized: usize,
    /// Lines that were not valid UTF-8 and had bytes replaced
    pub lines_not_utf8: usize,
    pub issues: Vec<ParseIssue>,
}

impl ParseReport {
    pub fn lines_ignored(&self) -> usize {
        self.lines_read - self.lines_matched
    }
}

/// Drops an interrupted session start marker at the end of the log, plus the
/// blank line written before it. Returns how many lines were removed.
pub fn sanitize_lines(lines: &mut Vec<String>) -> usize {
    let trailing_marker = lines.last().is_some_and(|last| is_interrupted_marker(last));
    if !trailing_marker {
        return 0;
    }
    lines.pop();
    let mut removed = 1;
    if lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
        removed += 1;
    }
    debug!("Removed {} trailing line(s) of an interrupted session", removed);
    removed
}

// A full marker, or a marker cut short (possibly inside a multibyte
// character, which decodes to U+FFFD).
fn is_interrupted_marker(line: &str) -> bool {
    let cut = line.trim_end_matches(char::REPLACEMENT_CHARACTER).trim_end();
    Dialect::ALL.iter().any(|d| {
        let marker = d.session_marker();
        line.starts_with(marker) || (cut.len() >= 3 && marker.starts_with(cut))
    })
}

pub struct LogParser {
    dialect: Dialect,
    state: ParserState,
    log: TelemetryLog,
    report: ParseReport,
}

impl LogParser {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: ParserState::default(),
            log: TelemetryLog::default(),
            report: ParseReport::default(),
        }
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// Parses already sanitized lines in one go.
    pub fn parse_lines<I, S>(dialect: Dialect, lines: I) -> (TelemetryLog, ParseReport)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parser = Self::new(dialect);
        for (idx, line) in lines.into_iter().enumerate() {
            parser.feed_line(idx + 1, line.as_ref());
        }
        parser.finish()
    }

    pub fn feed_line(&mut self, line_no: usize, line: &str) {
        self.report.lines_read += 1;
        let matches = match_line(self.dialect, line);
        if matches.is_empty() {
            return;
        }
        self.report.lines_matched += 1;

        let mut state = std::mem::take(&mut self.state);
        for result in matches {
            match result {
                Ok(Record::SessionStart { key, track }) => {
                    // the rest of a marker line is never telemetry
                    state = start_session(&mut self.log, key, track);
                    break;
                }
                Ok(record) => {
                    if state.current_session.is_none() {
                        self.report.lines_before_session += 1;
                        break;
                    }
                    state = apply_record(state, record, &mut self.log, &mut self.report);
                }
                Err(e) => {
                    if state.current_session.is_none() {
                        self.report.lines_before_session += 1;
                        break;
                    }
                    warn!("Line {}: {}, skipping field", line_no, e);
                    self.report.issues.push(ParseIssue {
                        line_no,
                        kind: e.kind,
                        raw: e.raw,
                        reason: e.reason,
                    });
                }
            }
        }
        self.state = state;
    }

    pub fn finish(self) -> (TelemetryLog, ParseReport) {
        (self.log, self.report)
    }
}

fn start_session(log: &mut TelemetryLog, key: SessionKey, track: String) -> ParserState {
    if log.session(&key).is_none() {
        debug!("New session {} on {}", key, track);
        log.sessions.push(Session::new(key.clone(), track));
    } else {
        debug!("Continuing session {}", key);
    }
    ParserState {
        current_session: Some(key),
        current_lap: None,
        current_timestamp: None,
    }
}

fn apply_record(
    mut state: ParserState,
    record: Record,
    log: &mut TelemetryLog,
    report: &mut ParseReport,
) -> ParserState {
    let Some(session) = state
        .current_session
        .as_ref()
        .and_then(|key| log.session_mut(key))
    else {
        return state;
    };

    match record {
        Record::SessionStart { .. } => {}
        Record::Track(track) => session.track = track,
        Record::Timestamp(ts) => state.current_timestamp = Some(ts),
        Record::Lap(number) => {
            if session.ensure_lap(number) {
                debug!("Session {}: lap {} started", session.key, number);
            }
            state.current_lap = Some(number);
        }
        record => {
            let lap = state.current_lap.and_then(|n| session.lap_mut(n));
            let Some(lap) = lap else {
                report.samples_dropped += 1;
                return state;
            };
            match record {
                Record::Scalar(Channel::Speed, speed) => match state.current_timestamp {
                    Some(ts) => {
                        lap.timestamps.push(ts);
                        lap.speed.push(speed);
                    }
                    None => report.samples_dropped += 1,
                },
                Record::Scalar(channel, value) => lap.channel_mut(channel).push(value),
                Record::Gear(gear) => lap.gear.push(gear),
                Record::Position(position) => lap.positions.push(position),
                Record::Weather(weather) => lap.weather.push(weather),
                Record::GameClock(clock) => lap.game_clock.push(clock),
                Record::SessionStart { .. }
                | Record::Track(_)
                | Record::Timestamp(_)
                | Record::Lap(_) => {}
            }
        }
    }
    state
}

/// Splits a log into lines. Bytes that are not valid UTF-8 are replaced so a
/// single damaged line doesn't lose the rest of the file. Returns the lines
/// and how many of them needed replacing.
pub fn read_log_lines<R: BufRead>(mut reader: R) -> io::Result<(Vec<String>, usize)> {
    let mut lines = Vec::new();
    let mut not_utf8 = 0;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        let line = String::from_utf8_lossy(&buf);
        if matches!(line, Cow::Owned(_)) {
            warn!("Line {}: not valid UTF-8, replacing invalid bytes", lines.len() + 1);
            not_utf8 += 1;
        }
        lines.push(line.into_owned());
    }
    Ok((lines, not_utf8))
}

/// Reads, sanitizes and parses a telemetry log, then computes lap durations.
/// The dialect is detected from the content when not given.
pub fn load_telemetry_log(
    source_file: &Path,
    dialect: Option<Dialect>,
) -> Result<(TelemetryLog, ParseReport), LapchartError> {
    let path = source_file.display().to_string();
    let file = File::open(source_file).map_err(|e| LapchartError::TelemetryLoaderError {
        path: path.clone(),
        source: e,
    })?;
    let (mut lines, lines_not_utf8) =
        read_log_lines(BufReader::new(file)).map_err(|e| LapchartError::TelemetryLoaderError {
            path: path.clone(),
            source: e,
        })?;

    let lines_sanitized = sanitize_lines(&mut lines);
    let dialect = dialect.unwrap_or_else(|| Dialect::detect(&lines));
    let (mut log, mut report) = LogParser::parse_lines(dialect, &lines);
    report.lines_sanitized = lines_sanitized;
    report.lines_not_utf8 = lines_not_utf8;
    analysis::compute_durations(&mut log);

    info!(
        "Loaded {} ({:?}), found {} sessions with a total of {} laps",
        path,
        dialect,
        log.sessions.len(),
        log.lap_count()
    );
    if !report.issues.is_empty() {
        warn!("{} malformed field(s) skipped in {}", report.issues.len(), path);
    }
    Ok((log, report))
}
