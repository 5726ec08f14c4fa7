// Error types for lapchart

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum LapchartError {
    // Errors while reading the telemetry log
    #[snafu(display("Error loading telemetry file {path}"))]
    TelemetryLoaderError { path: String, source: io::Error },
    #[snafu(display("No telemetry sessions found in log"))]
    NoSessions,
    #[snafu(display("Unknown session: {key}"))]
    UnknownSession { key: String },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },
    #[snafu(display("Error parsing config file {path}"))]
    ConfigParseError {
        path: String,
        source: serde_json::Error,
    },

    // Errors for the lap exporter
    #[snafu(display("Error writing export file {path}"))]
    ExportError { path: String, source: io::Error },
}
