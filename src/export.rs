// Writes the laps of a session, with their derived series, as JSON lines

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::info;
use serde::Serialize;

use crate::LapchartError;
use crate::analysis::{self, GForceSeries, LapSummary};
use crate::telemetry::{Lap, Session};

/// `<track>_<DD-MM-YYYY_HH-MM-SS>.<extension>`, with characters that are not
/// allowed in file names replaced by `_`.
pub fn export_file_name(track: &str, at: NaiveDateTime, extension: &str) -> String {
    let track: String = track
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    format!("{}_{}.{}", track, at.format("%d-%m-%Y_%H-%M-%S"), extension)
}

#[derive(Serialize)]
struct LapExport<'a> {
    session: String,
    track: &'a str,
    summary: &'a LapSummary,
    g_force: GForceSeries,
    lap: &'a Lap,
}

/// Exports every lap of `session` to `dir`, one JSON line per lap. Returns the
/// path written.
pub fn export_session(
    session: &Session,
    dir: &Path,
    at: NaiveDateTime,
) -> Result<PathBuf, LapchartError> {
    std::fs::create_dir_all(dir).map_err(|e| LapchartError::ExportError {
        path: dir.display().to_string(),
        source: e,
    })?;
    let path = dir.join(export_file_name(&session.track, at, "jsonl"));

    let summaries = analysis::lap_summaries(session, &session.lap_numbers());
    let session_label = session.key.to_string();
    let rows = session
        .laps
        .iter()
        .zip(summaries.iter())
        .map(|(lap, summary)| LapExport {
            session: session_label.clone(),
            track: &session.track,
            summary,
            g_force: analysis::g_force_series(lap),
            lap,
        });
    serde_jsonlines::write_json_lines(&path, rows).map_err(|e| LapchartError::ExportError {
        path: path.display().to_string(),
        source: e,
    })?;

    info!(
        "Exported {} laps of session {} to {:?}",
        session.laps.len(),
        session.key,
        path
    );
    Ok(path)
}
