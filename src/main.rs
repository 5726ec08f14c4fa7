mod ui;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::{info, warn};

use lapchart::{
    Dialect, LapchartError, Session, TelemetryLog,
    analysis::{format_lap_time, lap_summaries},
    config::AppConfig,
    export, load_telemetry_log,
};
use ui::analysis::TelemetryChartsApp;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Opens the lap charts for a telemetry log
    View {
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(short, long, value_enum)]
        dialect: Option<Dialect>,
    },
    /// Prints the laps of every session, or of a single one
    Summary {
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(short, long, value_enum)]
        dialect: Option<Dialect>,

        /// Session as "<date> <time>", like it appears in the log
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Writes the laps of a session as JSON lines
    Export {
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(short, long, value_enum)]
        dialect: Option<Dialect>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Session as "<date> <time>"; the most recent one when omitted
        #[arg(short, long)]
        session: Option<String>,
    },
}

// a missing or unreadable file is reported by the loader, with its cause
fn resolve_input(input: Option<&PathBuf>, config: &AppConfig) -> PathBuf {
    input.cloned().unwrap_or_else(|| config.log_path.clone())
}

fn pick_session<'a>(
    log: &'a TelemetryLog,
    label: Option<&str>,
) -> Result<&'a Session, LapchartError> {
    match label {
        Some(label) => log
            .session_by_label(label)
            .ok_or_else(|| LapchartError::UnknownSession {
                key: label.to_string(),
            }),
        None => log
            .sessions_newest_first()
            .first()
            .copied()
            .ok_or(LapchartError::NoSessions),
    }
}

fn print_session(session: &Session) {
    println!("{} | {}", session.key, session.track);
    for summary in lap_summaries(session, &session.lap_numbers()) {
        let time = summary
            .total_time
            .map(format_lap_time)
            .unwrap_or_else(|| "--:--".to_string());
        let speed = summary
            .average_speed
            .map(|v| format!("{:.1} km/h", v))
            .unwrap_or_else(|| "-".to_string());
        let delta = summary
            .delta
            .map(|d| format!("+{:.3}s", d))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  Lap {:>3}  {}  {:>12}  {:>10}  ({} samples)",
            summary.lap, time, speed, delta, summary.samples
        );
    }
}

fn summary(input: &Path, dialect: Option<Dialect>, session: Option<&str>) -> Result<(), LapchartError> {
    let (log, report) = load_telemetry_log(input, dialect)?;
    match session {
        Some(_) => print_session(pick_session(&log, session)?),
        None => {
            if log.sessions.is_empty() {
                return Err(LapchartError::NoSessions);
            }
            for s in log.sessions_newest_first() {
                print_session(s);
            }
        }
    }
    if report.lines_ignored() > 0 {
        info!("{} lines did not match any record", report.lines_ignored());
    }
    Ok(())
}

fn export_laps(
    input: &Path,
    dialect: Option<Dialect>,
    output: &Path,
    session: Option<&str>,
) -> Result<(), LapchartError> {
    let (log, _) = load_telemetry_log(input, dialect)?;
    let session = pick_session(&log, session)?;
    let path = export::export_session(session, output, chrono::Local::now().naive_local())?;
    println!("{}", path.display());
    Ok(())
}

fn view(input: PathBuf, config: AppConfig) -> Result<(), LapchartError> {
    eframe::run_native(
        "Lapchart",
        eframe::NativeOptions::default(),
        Box::new(move |cc| Ok(Box::new(TelemetryChartsApp::from_file(input, config, cc)))),
    )
    .expect("could not start app");
    Ok(())
}

fn main() {
    #[cfg(debug_assertions)]
    colog::init();

    let cli = Args::parse();
    ctrlc::set_handler(move || {
        println!("Exiting...");
        std::process::exit(0);
    })
    .expect("Could not set Ctrl-C handler");

    let mut config = match AppConfig::from_local_file() {
        Ok(Some(config)) => config,
        Ok(None) => AppConfig::default(),
        Err(e) => {
            warn!("Ignoring config file: {}", e);
            AppConfig::default()
        }
    };

    let result = match &cli.command {
        Commands::View { input, dialect } => {
            config.dialect = dialect.or(config.dialect);
            let input = resolve_input(input.as_ref(), &config);
            view(input, config)
        }
        Commands::Summary {
            input,
            dialect,
            session,
        } => summary(
            &resolve_input(input.as_ref(), &config),
            dialect.or(config.dialect),
            session.as_deref(),
        ),
        Commands::Export {
            input,
            dialect,
            output,
            session,
        } => {
            let output = output.clone().unwrap_or_else(|| config.export_dir.clone());
            export_laps(
                &resolve_input(input.as_ref(), &config),
                dialect.or(config.dialect),
                &output,
                session.as_deref(),
            )
        }
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
