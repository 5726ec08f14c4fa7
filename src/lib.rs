// Library interface for lapchart
// This allows integration tests and benches to access internal modules

pub mod analysis;
pub mod config;
pub mod errors;
pub mod export;
pub mod telemetry;

// Re-export commonly used types
pub use errors::LapchartError;
pub use telemetry::{
    Channel, Dialect, Lap, LogParser, ParseReport, Position, Session, SessionKey, TelemetryLog,
    load_telemetry_log,
};
