use std::path::PathBuf;

use egui::{Align, Color32, Frame, Layout, Margin, RichText, Ui};
use egui_plot::{Bar, BarChart, Legend, Line, MarkerShape, Plot, PlotPoints, Points};
use log::{error, warn};

use lapchart::{
    Lap, Session, SessionKey, TelemetryLog,
    analysis::{
        aligned_gears, aligned_series, format_lap_time, g_force_series, lap_summaries,
        time_range, trajectory_bounds,
    },
    config::AppConfig,
    export, load_telemetry_log,
    telemetry::Channel,
};

use super::{PALETTE_ORANGE, default_visuals, lap_color};

mod data_types;

use data_types::{LapChoice, LapTrace, UiState};

const CHART_HEIGHT: f32 = 160.;
const MAP_HEIGHT: f32 = 480.;

pub(crate) struct TelemetryChartsApp {
    source_file: PathBuf,
    config: AppConfig,
    ui_state: UiState,
    data: Option<TelemetryLog>,
    /// Session keys, most recent first
    session_order: Vec<SessionKey>,
    selected_session: Option<SessionKey>,
    lap_choices: Vec<LapChoice>,
    status_message: Option<String>,
}

impl TelemetryChartsApp {
    pub(crate) fn from_file(
        input: PathBuf,
        config: AppConfig,
        cc: &eframe::CreationContext<'_>,
    ) -> Self {
        cc.egui_ctx.set_visuals(default_visuals());
        Self {
            source_file: input,
            config,
            ui_state: UiState::Loading,
            data: None,
            session_order: Vec::new(),
            selected_session: None,
            lap_choices: Vec::new(),
            status_message: None,
        }
    }

    fn load(&mut self) {
        match load_telemetry_log(&self.source_file, self.config.dialect) {
            Ok((log, report)) => {
                if self.config.remember_log(&self.source_file) {
                    if let Err(e) = self.config.save() {
                        warn!("Could not save config: {}", e);
                    }
                }
                if !report.issues.is_empty() {
                    self.status_message =
                        Some(format!("{} malformed field(s) skipped", report.issues.len()));
                }
                self.session_order = log
                    .sessions_newest_first()
                    .iter()
                    .map(|s| s.key.clone())
                    .collect();
                self.data = Some(log);
                // newest session with every lap ticked
                if let Some(first) = self.session_order.first().cloned() {
                    self.select_session(first);
                }
                self.ui_state = UiState::Display;
            }
            Err(e) => {
                self.ui_state = UiState::Error {
                    message: format!("Could not load telemetry: {}", e),
                };
            }
        }
    }

    fn select_session(&mut self, key: SessionKey) {
        // first-seen order, as in the log
        let laps = self
            .data
            .as_ref()
            .and_then(|d| d.session(&key))
            .map(|s| s.lap_numbers())
            .unwrap_or_default();
        self.lap_choices = laps
            .into_iter()
            .enumerate()
            .map(|(idx, number)| LapChoice {
                number,
                selected: true,
                color: lap_color(idx),
            })
            .collect();
        self.selected_session = Some(key);
    }

    fn current_session(&self) -> Option<&Session> {
        self.data.as_ref()?.session(self.selected_session.as_ref()?)
    }

    fn export_current_session(&mut self) {
        let Some(session) = self.current_session() else {
            return;
        };
        let now = chrono::Local::now().naive_local();
        let message = match export::export_session(session, &self.config.export_dir, now) {
            Ok(path) => format!("Exported to {}", path.display()),
            Err(e) => {
                error!("Export failed: {}", e);
                format!("Export failed: {}", e)
            }
        };
        self.status_message = Some(message);
    }

    fn show_selectors(&mut self, ui: &mut Ui) {
        let labels: Vec<(SessionKey, String)> = self
            .session_order
            .iter()
            .map(|key| {
                let track = self
                    .data
                    .as_ref()
                    .and_then(|d| d.track_of(key))
                    .unwrap_or_default();
                (key.clone(), format!("{} - {}", key, track))
            })
            .collect();
        let current = self.selected_session.clone();
        let selected_text = labels
            .iter()
            .find(|(key, _)| Some(key) == current.as_ref())
            .map(|(_, label)| label.clone())
            .unwrap_or_default();

        let mut new_session = None;
        let mut export_requested = false;
        ui.with_layout(Layout::left_to_right(Align::Center), |ui| {
            ui.label(RichText::new("Session: ").color(Color32::WHITE));
            egui::ComboBox::from_id_salt("session_combo")
                .selected_text(selected_text)
                .width(320.)
                .show_ui(ui, |ui| {
                    for (key, label) in &labels {
                        let is_selected = current.as_ref() == Some(key);
                        if ui.selectable_label(is_selected, label.as_str()).clicked() && !is_selected {
                            new_session = Some(key.clone());
                        }
                    }
                });
            ui.separator();
            ui.label(RichText::new("Laps: ").color(Color32::WHITE));
            for choice in self.lap_choices.iter_mut() {
                ui.checkbox(
                    &mut choice.selected,
                    RichText::new(format!("Lap {}", choice.number)).color(choice.color),
                );
            }
            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                if ui.button("Export").clicked() {
                    export_requested = true;
                }
                if let Some(message) = &self.status_message {
                    ui.label(message.as_str());
                }
            });
        });

        if let Some(key) = new_session {
            self.select_session(key);
        }
        if export_requested {
            self.export_current_session();
        }
    }
}

fn traces(
    session: &Session,
    choices: &[LapChoice],
    series: impl Fn(&Lap) -> Vec<[f64; 2]>,
) -> Vec<LapTrace> {
    choices
        .iter()
        .filter(|c| c.selected)
        .filter_map(|c| {
            session.lap(c.number).map(|lap| LapTrace {
                number: c.number,
                color: c.color,
                points: series(lap),
            })
        })
        .collect()
}

fn chart_title(ui: &mut Ui, title: &str) {
    ui.label(RichText::new(title).color(Color32::WHITE).strong());
}

fn line_chart(ui: &mut Ui, id: &str, title: &str, traces: &[LapTrace], range: (f64, f64)) {
    chart_title(ui, title);
    Plot::new(id)
        .height(CHART_HEIGHT)
        .legend(Legend::default())
        .allow_scroll(false)
        .include_x(range.0)
        .include_x(range.1)
        .x_axis_formatter(|mark, _range| format_lap_time(mark.value))
        .show(ui, |plot_ui| {
            for trace in traces {
                plot_ui.line(
                    Line::new(
                        format!("Lap {}", trace.number),
                        PlotPoints::new(trace.points.clone()),
                    )
                    .color(trace.color),
                );
            }
        });
}

fn lap_bar_chart(ui: &mut Ui, id: &str, title: &str, bars: Vec<Bar>) {
    chart_title(ui, title);
    Plot::new(id)
        .height(CHART_HEIGHT)
        .allow_scroll(false)
        .include_y(0.)
        .show(ui, |plot_ui| {
            plot_ui.bar_chart(BarChart::new(title, bars));
        });
}

fn show_lap_charts(ui: &mut Ui, session: &Session, choices: &[LapChoice]) {
    let selected: Vec<u32> = choices
        .iter()
        .filter(|c| c.selected)
        .map(|c| c.number)
        .collect();
    if selected.is_empty() {
        ui.centered_and_justified(|ui| {
            ui.label(RichText::new("No laps selected").color(Color32::WHITE).strong());
        });
        return;
    }
    let color_of = |lap: u32| {
        choices
            .iter()
            .find(|c| c.number == lap)
            .map(|c| c.color)
            .unwrap_or(PALETTE_ORANGE)
    };
    let summaries = lap_summaries(session, &selected);

    let lap_times: Vec<[f64; 2]> = summaries
        .iter()
        .filter_map(|s| s.total_time.map(|t| [s.lap as f64, t]))
        .collect();
    chart_title(ui, "Lap time");
    Plot::new("lap_times")
        .height(CHART_HEIGHT)
        .allow_scroll(false)
        .y_axis_formatter(|mark, _range| format_lap_time(mark.value))
        .show(ui, |plot_ui| {
            plot_ui.line(
                Line::new("Lap time", PlotPoints::new(lap_times.clone())).color(PALETTE_ORANGE),
            );
            plot_ui.points(
                Points::new("", PlotPoints::new(lap_times.clone()))
                    .color(PALETTE_ORANGE)
                    .radius(4.),
            );
        });

    let delta_bars = summaries
        .iter()
        .filter_map(|s| s.delta.map(|d| Bar::new(s.lap as f64, d).fill(color_of(s.lap))))
        .collect();
    lap_bar_chart(ui, "deltas", "Delta (s)", delta_bars);

    let speed_bars = summaries
        .iter()
        .filter_map(|s| {
            s.average_speed
                .map(|v| Bar::new(s.lap as f64, v).fill(color_of(s.lap)))
        })
        .collect();
    lap_bar_chart(ui, "average_speed", "Average speed (km/h)", speed_bars);

    let range = time_range(session, &selected);
    for channel in [Channel::Speed, Channel::Brake, Channel::Rpm] {
        let lines = traces(session, choices, |lap| aligned_series(lap, channel));
        line_chart(ui, channel.label(), channel.label(), &lines, range);
    }
    line_chart(
        ui,
        "gear",
        "Gear",
        &traces(session, choices, aligned_gears),
        range,
    );
    line_chart(
        ui,
        "g_force",
        "G-force",
        &traces(session, choices, |lap| g_force_series(lap).points()),
        range,
    );

    // channels only the richer logs carry
    for channel in Channel::ALL.into_iter().skip(3) {
        let lines = traces(session, choices, |lap| aligned_series(lap, channel));
        if lines.iter().any(|t| !t.points.is_empty()) {
            line_chart(ui, channel.label(), channel.label(), &lines, range);
        }
    }

    show_trajectories(ui, session, choices, &selected);
}

fn show_trajectories(ui: &mut Ui, session: &Session, choices: &[LapChoice], selected: &[u32]) {
    let paths = traces(session, choices, |lap| {
        lap.positions.iter().map(|p| [p.x, p.y]).collect()
    });
    if paths.iter().all(|t| t.points.is_empty()) {
        return;
    }
    chart_title(ui, "Trajectories");
    let mut plot = Plot::new("trajectories")
        .height(MAP_HEIGHT)
        .legend(Legend::default())
        .allow_scroll(false)
        .data_aspect(1.)
        .show_axes(false)
        .show_grid(false);
    if let Some(bounds) = trajectory_bounds(session, selected) {
        plot = plot
            .include_x(bounds.min_x)
            .include_x(bounds.max_x)
            .include_y(bounds.min_y)
            .include_y(bounds.max_y);
    }
    plot.show(ui, |plot_ui| {
        for path in &paths {
            let (Some(first), Some(last)) = (path.points.first(), path.points.last()) else {
                continue;
            };
            plot_ui.line(
                Line::new(
                    format!("Lap {}", path.number),
                    PlotPoints::new(path.points.clone()),
                )
                .color(path.color)
                .width(2.),
            );
            plot_ui.points(
                Points::new("", PlotPoints::new(vec![*first]))
                    .shape(MarkerShape::Circle)
                    .color(path.color)
                    .radius(5.),
            );
            plot_ui.points(
                Points::new("", PlotPoints::new(vec![*last]))
                    .shape(MarkerShape::Square)
                    .color(path.color)
                    .radius(5.),
            );
        }
    });

    let elevation = traces(session, choices, |lap| {
        lap.positions
            .iter()
            .enumerate()
            .map(|(idx, p)| [idx as f64, p.z])
            .collect()
    });
    chart_title(ui, "Elevation");
    Plot::new("elevation")
        .height(CHART_HEIGHT)
        .legend(Legend::default())
        .allow_scroll(false)
        .show(ui, |plot_ui| {
            for trace in &elevation {
                plot_ui.line(
                    Line::new(
                        format!("Lap {}", trace.number),
                        PlotPoints::new(trace.points.clone()),
                    )
                    .color(trace.color),
                );
            }
        });
}

impl eframe::App for TelemetryChartsApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let cur_ui_state = self.ui_state.clone();
        match cur_ui_state {
            UiState::Loading => {
                self.load();
                ctx.request_repaint();
            }
            UiState::Display => {
                egui::TopBottomPanel::top("SessionSelector")
                    .frame(
                        Frame::default()
                            .fill(Color32::TRANSPARENT)
                            .inner_margin(Margin::same(5)),
                    )
                    .show(ctx, |local_ui| {
                        self.show_selectors(local_ui);
                    });
                egui::CentralPanel::default()
                    .frame(
                        Frame::default()
                            .fill(Color32::TRANSPARENT)
                            .inner_margin(Margin::same(5)),
                    )
                    .show(ctx, |local_ui| match self.current_session() {
                        Some(session) => {
                            local_ui.heading(
                                RichText::new(format!(
                                    "Session: {} | Track: {}",
                                    session.key, session.track
                                ))
                                .color(Color32::WHITE)
                                .strong(),
                            );
                            egui::ScrollArea::vertical().show(local_ui, |ui| {
                                show_lap_charts(ui, session, &self.lap_choices);
                            });
                        }
                        None => {
                            local_ui.centered_and_justified(|ui| {
                                ui.label(
                                    RichText::new("No telemetry sessions in this log")
                                        .color(Color32::WHITE)
                                        .strong(),
                                );
                            });
                        }
                    });
            }
            UiState::Error { message } => {
                egui::CentralPanel::default().show(ctx, |ui| {
                    ui.heading(RichText::new(message).color(Color32::RED).strong());
                });
            }
        }
    }
}
