// Derived per-lap series: durations, lap times, deltas and G-force

use std::borrow::Cow;

use chrono::NaiveDateTime;
use itertools::{Itertools, MinMaxResult};
use log::{debug, warn};
use serde::Serialize;
use uom::si::acceleration::meter_per_second_squared;
use uom::si::f64::{Acceleration, Time, Velocity};
use uom::si::time::second;
use uom::si::velocity::kilometer_per_hour;

use crate::telemetry::{Channel, Lap, Session, TelemetryLog};

/// Standard gravity used to express acceleration in g.
pub const GRAVITY_MPS2: f64 = 9.81;

/// Relative margin added around trajectory extents.
const TRAJECTORY_MARGIN: f64 = 0.01;

fn durations_from(timestamps: &[NaiveDateTime]) -> Vec<f64> {
    let Some(t0) = timestamps.first() else {
        return Vec::new();
    };
    timestamps
        .iter()
        .map(|t| {
            let delta = *t - *t0;
            delta
                .num_nanoseconds()
                .map(|ns| ns as f64 / 1e9)
                .unwrap_or_else(|| delta.num_milliseconds() as f64 / 1e3)
        })
        .collect()
}

/// Memoizes the duration series of every lap. Running it again recomputes
/// the same values.
pub fn compute_durations(log: &mut TelemetryLog) {
    for session in log.sessions.iter_mut() {
        for lap in session.laps.iter_mut() {
            lap.durations = durations_from(&lap.timestamps);
            if lap.durations.iter().tuple_windows().any(|(a, b)| b < a) {
                warn!(
                    "Session {} lap {}: timestamps go backwards",
                    session.key, lap.number
                );
            }
            for (what, len) in misaligned_channels(lap) {
                warn!(
                    "Session {} lap {}: {} has {} values for {} samples, charts truncate it",
                    session.key,
                    lap.number,
                    what,
                    len,
                    lap.timestamps.len()
                );
            }
        }
    }
}

/// Non-empty channels whose length differs from the number of timestamps,
/// with their length.
pub fn misaligned_channels(lap: &Lap) -> Vec<(&'static str, usize)> {
    let samples = lap.timestamps.len();
    let mut misaligned = Channel::ALL
        .iter()
        .map(|c| (c.label(), lap.channel(*c).len()))
        .collect_vec();
    misaligned.push(("Gear", lap.gear.len()));
    misaligned.retain(|(_, len)| *len != 0 && *len != samples);
    misaligned
}

/// Seconds since the first sample, one entry per timestamp. Uses the
/// memoized series when it is up to date.
pub fn duration_series(lap: &Lap) -> Cow<'_, [f64]> {
    if lap.durations.len() == lap.timestamps.len() {
        Cow::Borrowed(&lap.durations)
    } else {
        Cow::Owned(durations_from(&lap.timestamps))
    }
}

pub fn total_time(lap: &Lap) -> Option<f64> {
    duration_series(lap).last().copied()
}

pub fn average_speed(lap: &Lap) -> Option<f64> {
    if lap.speed.is_empty() {
        return None;
    }
    Some(lap.speed.iter().sum::<f64>() / lap.speed.len() as f64)
}

/// Fastest total time among `laps`, ignoring laps without samples.
pub fn best_time<'a>(laps: impl IntoIterator<Item = &'a Lap>) -> Option<f64> {
    laps.into_iter().filter_map(total_time).reduce(f64::min)
}

/// `lap`'s total time minus the fastest total time of `selected`.
pub fn delta<'a>(lap: &Lap, selected: impl IntoIterator<Item = &'a Lap>) -> Option<f64> {
    let best = best_time(selected)?;
    Some(total_time(lap)? - best)
}

/// Longitudinal G-force between consecutive samples, placed at the middle
/// of each pair.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GForceSeries {
    pub mid_times: Vec<f64>,
    pub g_force: Vec<f64>,
}

impl GForceSeries {
    pub fn len(&self) -> usize {
        self.g_force.len()
    }

    pub fn is_empty(&self) -> bool {
        self.g_force.is_empty()
    }

    pub fn points(&self) -> Vec<[f64; 2]> {
        self.mid_times
            .iter()
            .zip(self.g_force.iter())
            .map(|(t, g)| [*t, *g])
            .collect()
    }
}

/// Finite-difference acceleration from the speed series, in g. Laps with
/// fewer than two samples give an empty series. Pairs without elapsed time
/// are skipped.
pub fn g_force_series(lap: &Lap) -> GForceSeries {
    let durations = duration_series(lap);
    let n = lap.speed.len().min(durations.len());
    let mut series = GForceSeries::default();
    if n < 2 {
        return series;
    }
    for ((s0, d0), (s1, d1)) in lap.speed[..n]
        .iter()
        .zip(durations[..n].iter())
        .tuple_windows()
    {
        if d1 <= d0 {
            debug!("Lap {}: no time between samples at {}s", lap.number, d0);
            continue;
        }
        let dv = Velocity::new::<kilometer_per_hour>(s1 - s0);
        let dt = Time::new::<second>(d1 - d0);
        let acceleration: Acceleration = dv / dt;
        series.mid_times.push((d0 + d1) / 2.);
        series
            .g_force
            .push(acceleration.get::<meter_per_second_squared>() / GRAVITY_MPS2);
    }
    series
}

fn zip_capped<T: Copy>(lap: &Lap, what: &str, values: &[T], to_f64: impl Fn(T) -> f64) -> Vec<[f64; 2]> {
    let durations = duration_series(lap);
    let n = values.len().min(durations.len());
    if values.len() != durations.len() && !values.is_empty() {
        debug!(
            "Lap {}: {} has {} values for {} samples, truncating to {}",
            lap.number,
            what,
            values.len(),
            durations.len(),
            n
        );
    }
    durations[..n]
        .iter()
        .zip(values[..n].iter())
        .map(|(d, v)| [*d, to_f64(*v)])
        .collect()
}

/// `[duration, value]` pairs of a channel, cut to the shorter of the two
/// series.
pub fn aligned_series(lap: &Lap, channel: Channel) -> Vec<[f64; 2]> {
    zip_capped(lap, channel.label(), lap.channel(channel), |v| v)
}

pub fn aligned_gears(lap: &Lap) -> Vec<[f64; 2]> {
    zip_capped(lap, "gear", &lap.gear, |g| g as f64)
}

/// Figures shown per lap in the lap time, delta and average speed charts.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LapSummary {
    pub lap: u32,
    pub samples: usize,
    pub total_time: Option<f64>,
    pub average_speed: Option<f64>,
    pub delta: Option<f64>,
}

pub fn lap_summaries(session: &Session, selected: &[u32]) -> Vec<LapSummary> {
    let best = best_time(session.selected_laps(selected));
    session
        .selected_laps(selected)
        .map(|lap| {
            let total = total_time(lap);
            LapSummary {
                lap: lap.number,
                samples: lap.sample_count(),
                total_time: total,
                average_speed: average_speed(lap),
                delta: total.zip(best).map(|(t, b)| t - b),
            }
        })
        .collect()
}

/// Common time axis across the selected laps; `(0, 1)` when none has samples.
pub fn time_range(session: &Session, selected: &[u32]) -> (f64, f64) {
    let laps = session.selected_laps(selected).collect_vec();
    let start = laps
        .iter()
        .filter_map(|l| duration_series(l).first().copied())
        .reduce(f64::min)
        .unwrap_or(0.);
    let end = laps
        .iter()
        .filter_map(|l| total_time(l))
        .reduce(f64::max)
        .unwrap_or(1.);
    (start, end)
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TrajectoryBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// Horizontal extents of the selected laps' positions with a 1% margin.
pub fn trajectory_bounds(session: &Session, selected: &[u32]) -> Option<TrajectoryBounds> {
    let positions = session
        .selected_laps(selected)
        .flat_map(|l| l.positions.iter())
        .collect_vec();
    let (min_x, max_x) = match positions.iter().map(|p| p.x).minmax_by(f64::total_cmp) {
        MinMaxResult::NoElements => return None,
        MinMaxResult::OneElement(x) => (x, x),
        MinMaxResult::MinMax(a, b) => (a, b),
    };
    let (min_y, max_y) = match positions.iter().map(|p| p.y).minmax_by(f64::total_cmp) {
        MinMaxResult::NoElements => return None,
        MinMaxResult::OneElement(y) => (y, y),
        MinMaxResult::MinMax(a, b) => (a, b),
    };
    let margin_x = (max_x - min_x) * TRAJECTORY_MARGIN;
    let margin_y = (max_y - min_y) * TRAJECTORY_MARGIN;
    Some(TrajectoryBounds {
        min_x: min_x - margin_x,
        max_x: max_x + margin_x,
        min_y: min_y - margin_y,
        max_y: max_y + margin_y,
    })
}

/// `MM:SS` label for a number of seconds.
pub fn format_lap_time(seconds: f64) -> String {
    let seconds = seconds.max(0.);
    let minutes = (seconds / 60.).floor() as u64;
    let rest = (seconds % 60.).floor() as u64;
    format!("{:02}:{:02}", minutes, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Position, SessionKey};
    use chrono::{NaiveDate, TimeDelta};
    use proptest::prelude::*;

    fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn lap_with(number: u32, offsets_ms: &[i64], speeds: &[f64]) -> Lap {
        let mut lap = Lap::new(number);
        lap.timestamps = offsets_ms
            .iter()
            .map(|ms| base_time() + TimeDelta::milliseconds(*ms))
            .collect();
        lap.speed = speeds.to_vec();
        lap
    }

    fn two_lap_session() -> Session {
        let mut session = Session::new(SessionKey::new("01/01/2024", "10:00:00"), "TrackX");
        session
            .laps
            .push(lap_with(1, &[0, 1000, 2000], &[100., 110., 120.]));
        session.laps.push(lap_with(2, &[0, 1000], &[90., 95.]));
        session
    }

    #[test]
    fn test_two_lap_totals_and_deltas() {
        let session = two_lap_session();
        let lap1 = session.lap(1).unwrap();
        let lap2 = session.lap(2).unwrap();
        assert_eq!(total_time(lap1), Some(2.0));
        assert_eq!(total_time(lap2), Some(1.0));
        assert_eq!(delta(lap1, &session.laps), Some(1.0));
        assert_eq!(delta(lap2, &session.laps), Some(0.0));
        assert_eq!(average_speed(lap1), Some(110.0));
    }

    #[test]
    fn test_lap_summaries() {
        let session = two_lap_session();
        let summaries = lap_summaries(&session, &[2, 1]);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].lap, 1);
        assert_eq!(summaries[0].delta, Some(1.0));
        assert_eq!(summaries[1].delta, Some(0.0));
        assert_eq!(summaries[1].average_speed, Some(92.5));
        assert!(lap_summaries(&session, &[]).is_empty());
    }

    #[test]
    fn test_empty_lap_has_no_figures() {
        let lap = Lap::new(7);
        assert_eq!(total_time(&lap), None);
        assert_eq!(average_speed(&lap), None);
        assert_eq!(delta(&lap, [&lap]), None);
        assert!(g_force_series(&lap).is_empty());
    }

    #[test]
    fn test_single_sample_has_no_g_force() {
        let lap = lap_with(1, &[0], &[100.]);
        assert!(g_force_series(&lap).is_empty());
        assert_eq!(total_time(&lap), Some(0.0));
    }

    #[test]
    fn test_g_force_values() {
        // 0 to 36 km/h in one second is 10 m/s^2
        let lap = lap_with(1, &[0, 1000, 3000], &[0., 36., 36.]);
        let series = g_force_series(&lap);
        assert_eq!(series.mid_times, vec![0.5, 2.0]);
        assert!((series.g_force[0] - 10. / GRAVITY_MPS2).abs() < 1e-9);
        assert!(series.g_force[1].abs() < 1e-12);
    }

    #[test]
    fn test_g_force_skips_zero_time_steps() {
        let lap = lap_with(1, &[0, 0, 1000], &[0., 10., 46.]);
        let series = g_force_series(&lap);
        assert_eq!(series.len(), 1);
        assert_eq!(series.mid_times, vec![0.5]);
    }

    #[test]
    fn test_aligned_series_truncates_to_shorter() {
        let mut lap = lap_with(1, &[0, 1000, 2000], &[10., 20., 30.]);
        lap.brake = vec![5., 6., 7., 8.];
        lap.gear = vec![1, 2];
        assert_eq!(
            aligned_series(&lap, Channel::Brake),
            vec![[0., 5.], [1., 6.], [2., 7.]]
        );
        assert_eq!(aligned_gears(&lap), vec![[0., 1.], [1., 2.]]);
        assert!(aligned_series(&lap, Channel::Turbo).is_empty());
    }

    #[test]
    fn test_misaligned_channels() {
        let mut lap = lap_with(1, &[0, 1000, 2000], &[10., 20., 30.]);
        assert!(misaligned_channels(&lap).is_empty());

        lap.brake = vec![5., 6., 7., 8.];
        lap.gear = vec![1, 2];
        lap.rpm = vec![1000., 2000., 3000.];
        assert_eq!(
            misaligned_channels(&lap),
            vec![(Channel::Brake.label(), 4), ("Gear", 2)]
        );
    }

    #[test]
    fn test_compute_durations_memoizes() {
        let mut log = TelemetryLog {
            sessions: vec![two_lap_session()],
        };
        compute_durations(&mut log);
        assert_eq!(log.sessions[0].laps[0].durations, vec![0., 1., 2.]);
        assert!(matches!(
            duration_series(&log.sessions[0].laps[0]),
            Cow::Borrowed(_)
        ));
        let before = log.sessions[0].laps[1].durations.clone();
        compute_durations(&mut log);
        assert_eq!(log.sessions[0].laps[1].durations, before);
    }

    #[test]
    fn test_time_range() {
        let session = two_lap_session();
        assert_eq!(time_range(&session, &[1, 2]), (0., 2.));
        assert_eq!(time_range(&session, &[]), (0., 1.));
    }

    #[test]
    fn test_trajectory_bounds() {
        let mut session = two_lap_session();
        session.laps[0].positions = vec![
            Position { x: 0., y: 10., z: 1. },
            Position { x: 100., y: 60., z: 2. },
        ];
        let bounds = trajectory_bounds(&session, &[1]).unwrap();
        assert_eq!(bounds.min_x, -1.);
        assert_eq!(bounds.max_x, 101.);
        assert_eq!(bounds.min_y, 9.5);
        assert_eq!(bounds.max_y, 60.5);
        assert!(trajectory_bounds(&session, &[2]).is_none());
    }

    #[test]
    fn test_format_lap_time() {
        assert_eq!(format_lap_time(0.), "00:00");
        assert_eq!(format_lap_time(83.9), "01:23");
        assert_eq!(format_lap_time(600.), "10:00");
    }

    fn increasing_offsets(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
        prop::collection::vec(1i64..5_000, 0..max_len).prop_map(|steps| {
            let mut t = 0;
            let mut out = vec![0];
            for s in steps {
                t += s;
                out.push(t);
            }
            out
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_durations_start_at_zero_and_never_decrease(offsets in increasing_offsets(60)) {
            let speeds = vec![50.; offsets.len()];
            let lap = lap_with(1, &offsets, &speeds);
            let durations = duration_series(&lap);
            prop_assert_eq!(durations.len(), offsets.len());
            prop_assert_eq!(durations[0], 0.0);
            for w in durations.windows(2) {
                prop_assert!(w[1] >= w[0]);
            }
        }

        #[test]
        fn prop_g_force_has_one_point_per_pair(
            offsets in increasing_offsets(60),
            seed in prop::collection::vec(0f64..300., 61),
        ) {
            let speeds = seed[..offsets.len()].to_vec();
            let lap = lap_with(1, &offsets, &speeds);
            let durations = duration_series(&lap);
            let series = g_force_series(&lap);
            prop_assert_eq!(series.len(), offsets.len() - 1);
            prop_assert_eq!(series.mid_times.len(), series.g_force.len());
            for (i, t) in series.mid_times.iter().enumerate() {
                prop_assert!(*t > durations[i] && *t < durations[i + 1]);
            }
        }

        #[test]
        fn prop_fastest_lap_has_zero_delta(
            laps in prop::collection::vec(increasing_offsets(20), 1..8),
        ) {
            let laps: Vec<Lap> = laps
                .iter()
                .enumerate()
                .map(|(i, offsets)| lap_with(i as u32 + 1, offsets, &vec![80.; offsets.len()]))
                .collect();
            let deltas: Vec<f64> = laps.iter().filter_map(|l| delta(l, &laps)).collect();
            prop_assert_eq!(deltas.len(), laps.len());
            let min = deltas.iter().copied().reduce(f64::min).unwrap();
            prop_assert_eq!(min, 0.0);
            prop_assert!(deltas.iter().all(|d| *d >= 0.0));
            let best = best_time(&laps).unwrap();
            for (lap, d) in laps.iter().zip(deltas.iter()) {
                prop_assert_eq!(*d == 0.0, total_time(lap) == Some(best));
            }
        }

        #[test]
        fn prop_aggregation_is_repeatable(
            offsets in increasing_offsets(40),
            seed in prop::collection::vec(0f64..300., 41),
        ) {
            let speeds = seed[..offsets.len()].to_vec();
            let lap = lap_with(1, &offsets, &speeds);
            prop_assert_eq!(
                average_speed(&lap).map(f64::to_bits),
                average_speed(&lap).map(f64::to_bits)
            );
            prop_assert_eq!(duration_series(&lap).to_vec(), duration_series(&lap).to_vec());
            prop_assert_eq!(g_force_series(&lap), g_force_series(&lap));
        }
    }
}
