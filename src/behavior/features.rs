//! Feature extraction over session telemetry and context signals.
//!
//! Everything here is pure: callers load the rows, these functions fold
//! them into profile parameters. All outputs respect the clamp table in
//! `models::profile::clamps`.

use std::collections::HashMap;

use chrono::Duration;

use crate::models::profile::clamps;
use crate::models::{ContextSignal, PeakWindow, SessionEvent};
use crate::scheduler::timegrid;

/// Weight of the newest observation in the per-slot moving average.
pub const EMA_ALPHA: f64 = 0.3;

/// Minimum efficiency for an hour to join a peak window.
pub const PEAK_THRESHOLD: f64 = 0.7;

const RUN_GAP_MINUTES: i64 = 30;
const DURATION_BIN_MINUTES: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionParameters {
    pub max_continuous_minutes: i64,
    pub ideal_break_minutes: i64,
    pub efficiency_decay_rate: f64,
}

impl Default for SessionParameters {
    fn default() -> Self {
        Self {
            max_continuous_minutes: clamps::MAX_CONTINUOUS_MINUTES_DEFAULT,
            ideal_break_minutes: clamps::IDEAL_BREAK_MINUTES_DEFAULT,
            efficiency_decay_rate: clamps::EFFICIENCY_DECAY_RATE_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FatigueRecovery {
    pub fatigue_factor: f64,
    pub recovery_factor: f64,
}

impl Default for FatigueRecovery {
    fn default() -> Self {
        Self {
            fatigue_factor: clamps::FATIGUE_FACTOR_DEFAULT,
            recovery_factor: clamps::RECOVERY_FACTOR_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentFactors {
    pub day_multipliers: HashMap<String, f64>,
    pub soft_obligation_buffer: f64,
}

impl Default for AdjustmentFactors {
    fn default() -> Self {
        Self {
            day_multipliers: timegrid::WEEKDAY_NAMES
                .iter()
                .map(|d| (d.to_string(), clamps::DAY_MULTIPLIER_DEFAULT))
                .collect(),
            soft_obligation_buffer: clamps::SOFT_OBLIGATION_BUFFER_DEFAULT,
        }
    }
}

fn raw_efficiency(session: &SessionEvent) -> Option<f64> {
    let estimated = session.estimated_duration?;
    let actual = session.actual_duration?;
    if actual <= 0.0 {
        return None;
    }
    let mut eff = (estimated / actual).min(1.0);
    if let Some(rating) = session.self_rating {
        eff *= rating as f64 / 5.0;
    }
    Some(eff)
}

/// Per-slot efficiencies as an exponential moving average, newest last.
/// A session contributes to every "Weekday-Hour" slot it spans.
/// `sessions` must be completed rows in chronological order.
pub fn slot_efficiencies(sessions: &[SessionEvent]) -> HashMap<String, f64> {
    let mut series: HashMap<String, Vec<f64>> = HashMap::new();

    for session in sessions {
        if session.end_time.is_none() {
            continue;
        }
        let Some(eff) = raw_efficiency(session) else {
            continue;
        };
        let spanned_hours = (session.actual_duration.unwrap_or(0.0) / 60.0) as i64;
        for offset in 0..=spanned_hours {
            let instant = session.start_time + Duration::hours(offset);
            series
                .entry(timegrid::slot_key_for(instant))
                .or_default()
                .push(eff);
        }
    }

    series
        .into_iter()
        .map(|(slot, values)| {
            let mut ema = values[0];
            for value in &values[1..] {
                ema = EMA_ALPHA * value + (1.0 - EMA_ALPHA) * ema;
            }
            (slot, clamps::clamp(ema, clamps::SLOT_EFFICIENCY))
        })
        .collect()
}

/// Maximal contiguous same-day runs of hours at or above `threshold`,
/// at least two hours long; `end_hour` is exclusive and `efficiency` is
/// the mean over the run.
pub fn peak_windows(slot_effs: &HashMap<String, f64>, threshold: f64) -> Vec<PeakWindow> {
    let mut by_day: HashMap<&str, Vec<(u32, f64)>> = HashMap::new();
    for (slot, eff) in slot_effs {
        if *eff < threshold {
            continue;
        }
        let Some((day, hour)) = slot.rsplit_once('-') else {
            continue;
        };
        let Ok(hour) = hour.parse::<u32>() else {
            continue;
        };
        if let Some(day) = timegrid::WEEKDAY_NAMES.iter().find(|d| **d == day) {
            by_day.entry(day).or_default().push((hour, *eff));
        }
    }

    let mut windows = Vec::new();
    for day in timegrid::WEEKDAY_NAMES {
        let Some(mut hours) = by_day.remove(day) else {
            continue;
        };
        hours.sort_by_key(|(hour, _)| *hour);

        let mut run: Vec<(u32, f64)> = Vec::new();
        for (hour, eff) in hours {
            if run.last().is_some_and(|(last, _)| hour != last + 1) {
                push_run(&mut windows, day, &run);
                run.clear();
            }
            run.push((hour, eff));
        }
        push_run(&mut windows, day, &run);
    }
    windows
}

fn push_run(windows: &mut Vec<PeakWindow>, day: &str, run: &[(u32, f64)]) {
    if run.len() < 2 {
        return;
    }
    let efficiency = run.iter().map(|(_, e)| e).sum::<f64>() / run.len() as f64;
    windows.push(PeakWindow {
        day: day.to_string(),
        start_hour: run[0].0,
        end_hour: run[run.len() - 1].0 + 1,
        efficiency,
    });
}

/// Ideal session shape, from duration/rating telemetry (the caller passes
/// the most recent rated sessions, at most 50).
pub fn session_parameters(sessions: &[SessionEvent]) -> SessionParameters {
    let samples: Vec<(f64, f64)> = sessions
        .iter()
        .filter_map(|s| Some((s.actual_duration?, s.self_rating? as f64)))
        .collect();
    if samples.is_empty() {
        return SessionParameters::default();
    }

    // Mean rating per 15-minute duration bin over (0, 240].
    let mut bins: Vec<Vec<f64>> = vec![Vec::new(); 16];
    for (duration, rating) in &samples {
        if *duration <= 0.0 || *duration > 240.0 {
            continue;
        }
        let bin = ((duration / DURATION_BIN_MINUTES).ceil() as usize).clamp(1, 16) - 1;
        bins[bin].push(*rating);
    }

    let mut params = SessionParameters::default();
    let best = bins
        .iter()
        .enumerate()
        .filter(|(_, ratings)| !ratings.is_empty())
        .map(|(i, ratings)| (i, ratings.iter().sum::<f64>() / ratings.len() as f64))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(b.0.cmp(&a.0)));
    if let Some((bin, _)) = best {
        let upper = (bin as i64 + 1) * DURATION_BIN_MINUTES as i64;
        params.max_continuous_minutes = upper.clamp(
            clamps::MAX_CONTINUOUS_MINUTES.0,
            clamps::MAX_CONTINUOUS_MINUTES.1,
        );
        params.ideal_break_minutes = (params.max_continuous_minutes / 5)
            .max(5)
            .clamp(clamps::IDEAL_BREAK_MINUTES.0, clamps::IDEAL_BREAK_MINUTES.1);
    }

    if samples.len() > 10 {
        if let Some(rate) = decay_rate(&samples, params.max_continuous_minutes as f64) {
            params.efficiency_decay_rate = rate;
        }
    }
    params
}

/// Mean rating regressed over 15-minute bins of time spent beyond the
/// ideal continuous stretch; the slope magnitude becomes a per-minute
/// decay rate.
fn decay_rate(samples: &[(f64, f64)], optimal: f64) -> Option<f64> {
    let mut bins: Vec<Vec<f64>> = vec![Vec::new(); 8];
    for (duration, rating) in samples {
        let beyond = (duration - optimal).max(0.0);
        if beyond <= 0.0 || beyond > 120.0 {
            continue;
        }
        let bin = ((beyond / DURATION_BIN_MINUTES).ceil() as usize).clamp(1, 8) - 1;
        bins[bin].push(*rating);
    }

    let means: Vec<Option<f64>> = bins
        .iter()
        .map(|ratings| {
            (!ratings.is_empty()).then(|| ratings.iter().sum::<f64>() / ratings.len() as f64)
        })
        .collect();
    if means.iter().flatten().count() < 2 {
        return None;
    }

    // Forward- then backward-fill empty bins before fitting.
    let mut filled: Vec<f64> = Vec::with_capacity(means.len());
    let mut last = None;
    for mean in &means {
        if let Some(value) = mean {
            last = Some(*value);
        }
        filled.push(last.unwrap_or(f64::NAN));
    }
    let first_known = *filled.iter().find(|v| !v.is_nan())?;
    for value in filled.iter_mut() {
        if value.is_nan() {
            *value = first_known;
        }
    }

    let n = filled.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = filled.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in filled.iter().enumerate() {
        num += (i as f64 - mean_x) * (y - mean_y);
        den += (i as f64 - mean_x).powi(2);
    }
    if den == 0.0 {
        return None;
    }
    let slope = num / den;
    Some(clamps::clamp(
        slope.abs() / DURATION_BIN_MINUTES,
        clamps::EFFICIENCY_DECAY_RATE,
    ))
}

/// Fatigue within back-to-back runs and recovery across the gaps.
/// `sessions` must be completed rated rows in chronological order.
pub fn fatigue_recovery(sessions: &[SessionEvent]) -> FatigueRecovery {
    let mut params = FatigueRecovery::default();
    if sessions.len() < 10 {
        return params;
    }

    // Sessions separated by less than 30 minutes form one run.
    let mut runs: Vec<Vec<&SessionEvent>> = Vec::new();
    for session in sessions {
        let extends_run = runs.last().and_then(|run| run.last()).is_some_and(|prev| {
            prev.end_time
                .is_some_and(|end| (session.start_time - end) < Duration::minutes(RUN_GAP_MINUTES))
        });
        match runs.last_mut() {
            Some(run) if extends_run => run.push(session),
            _ => runs.push(vec![session]),
        }
    }

    let mut drops = Vec::new();
    for run in &runs {
        let ratings: Vec<f64> = run.iter().filter_map(|s| s.self_rating).map(|r| r as f64).collect();
        if ratings.len() < 2 {
            continue;
        }
        let smoothed = smooth2(&ratings);
        let first = smoothed[0];
        let last = smoothed[smoothed.len() - 1];
        if first > 0.0 {
            drops.push(((first - last) / first).max(0.0));
        }
    }
    if !drops.is_empty() {
        params.fatigue_factor = clamps::clamp(mean(&drops), clamps::FATIGUE_FACTOR);
    }

    let mut recoveries = Vec::new();
    for pair in runs.windows(2) {
        let (Some(prev_last), Some(curr_first)) = (pair[0].last(), pair[1].first()) else {
            continue;
        };
        let (Some(prev_rating), Some(curr_rating)) = (prev_last.self_rating, curr_first.self_rating)
        else {
            continue;
        };
        let Some(prev_end) = prev_last.end_time else {
            continue;
        };
        let gap_hours = (curr_first.start_time - prev_end).num_minutes() as f64 / 60.0;
        if prev_rating > 0 && gap_hours > 0.0 {
            let improvement = (curr_rating - prev_rating).max(0) as f64 / prev_rating as f64;
            recoveries.push(improvement / gap_hours);
        }
    }
    if !recoveries.is_empty() {
        params.recovery_factor = clamps::clamp(mean(&recoveries), clamps::RECOVERY_FACTOR);
    }

    params
}

/// Day-of-week multipliers and the soft-obligation buffer.
pub fn adjustment_factors(
    sessions: &[SessionEvent],
    signals: &[ContextSignal],
) -> AdjustmentFactors {
    let mut factors = AdjustmentFactors::default();
    factors.soft_obligation_buffer = soft_obligation_buffer(sessions, signals);

    if sessions.len() < 7 {
        return factors;
    }

    // Day score: completion, estimate accuracy, self-rating.
    let mut day_scores: HashMap<&str, Vec<f64>> = HashMap::new();
    for session in sessions {
        let mut score = if session.completed { 0.5 } else { 0.0 };
        if let (Some(est), Some(act)) = (session.estimated_duration, session.actual_duration) {
            if act > 0.0 {
                score += 0.3 * (est / act).min(1.0);
            }
        }
        if let Some(rating) = session.self_rating {
            score += 0.2 * rating as f64 / 5.0;
        }
        day_scores
            .entry(timegrid::weekday_name(session.start_time))
            .or_default()
            .push(score);
    }
    if day_scores.len() < 3 {
        return factors;
    }

    let day_means: HashMap<&str, f64> = day_scores
        .iter()
        .map(|(day, scores)| (*day, mean(scores)))
        .collect();
    let overall = mean(&day_means.values().copied().collect::<Vec<_>>());
    if overall <= 0.0 {
        return factors;
    }

    let mut multipliers: HashMap<String, f64> = timegrid::WEEKDAY_NAMES
        .iter()
        .map(|day| {
            let multiplier = day_means
                .get(day)
                .map(|score| clamps::clamp(score / overall, clamps::DAY_MULTIPLIER))
                .unwrap_or(clamps::DAY_MULTIPLIER_DEFAULT);
            (day.to_string(), multiplier)
        })
        .collect();

    // Renormalize so the week's mean is exactly 1.
    let week_mean = multipliers.values().sum::<f64>() / 7.0;
    if week_mean > 0.0 {
        for value in multipliers.values_mut() {
            *value /= week_mean;
        }
    }
    factors.day_multipliers = multipliers;
    factors
}

/// Median positive gap (minutes) between a session's end and the next
/// class/meeting/exam start, clamped to [10, 60].
fn soft_obligation_buffer(sessions: &[SessionEvent], signals: &[ContextSignal]) -> f64 {
    let mut obligation_starts: Vec<_> = signals
        .iter()
        .filter(|s| matches!(s.event_type.as_str(), "class" | "meeting" | "exam"))
        .map(|s| s.start_time)
        .collect();
    obligation_starts.sort();

    let mut gaps = Vec::new();
    for session in sessions {
        let Some(end) = session.end_time else {
            continue;
        };
        if let Some(next) = obligation_starts.iter().find(|start| **start >= end) {
            let gap = (*next - end).num_minutes() as f64;
            if gap > 0.0 {
                gaps.push(gap);
            }
        }
    }
    if gaps.is_empty() {
        return clamps::SOFT_OBLIGATION_BUFFER_DEFAULT;
    }
    clamps::clamp(median(&mut gaps), clamps::SOFT_OBLIGATION_BUFFER)
}

/// Retention heuristic in the absence of quiz data: efficiency scaled
/// down, with a morning (8-11) and evening (19-22) uplift.
pub fn retention_indicators(slot_effs: &HashMap<String, f64>) -> HashMap<String, f64> {
    slot_effs
        .iter()
        .map(|(slot, eff)| {
            let hour: u32 = slot
                .rsplit_once('-')
                .and_then(|(_, h)| h.parse().ok())
                .unwrap_or(0);
            let uplift = match hour {
                8..=11 => 0.10,
                19..=22 => 0.05,
                _ => 0.0,
            };
            (slot.clone(), (0.8 * eff + uplift).clamp(0.3, 0.95))
        })
        .collect()
}

fn smooth2(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| if i == 0 { *v } else { (values[i - 1] + v) / 2.0 })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn session(
        start: DateTime<Utc>,
        minutes: i64,
        estimated: f64,
        rating: Option<i64>,
    ) -> SessionEvent {
        SessionEvent {
            event_id: 0,
            student_id: 1,
            task_id: None,
            start_time: start,
            end_time: Some(start + Duration::minutes(minutes)),
            estimated_duration: Some(estimated),
            actual_duration: Some(minutes as f64),
            completed: true,
            self_rating: rating,
            difficulty: None,
            notes: None,
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn slot_efficiency_spans_session_hours() {
        // Monday 09:00, 90 actual vs 60 estimated, rating 4:
        // eff = (60/90) * (4/5) and lands on hours 9 and 10.
        let sessions = vec![session(at(3, 9, 0), 90, 60.0, Some(4))];
        let effs = slot_efficiencies(&sessions);
        let expected = (60.0 / 90.0) * 0.8;
        assert!((effs["Monday-9"] - expected).abs() < 1e-9);
        assert!((effs["Monday-10"] - expected).abs() < 1e-9);
        assert_eq!(effs.len(), 2);
    }

    #[test]
    fn slot_efficiency_ema_weighs_recent_sessions() {
        let sessions = vec![
            session(at(3, 9, 0), 30, 30.0, Some(5)),  // eff 1.0
            session(at(10, 9, 0), 30, 30.0, Some(1)), // eff 0.2, newer
        ];
        let effs = slot_efficiencies(&sessions);
        let expected = 0.3 * 0.2 + 0.7 * 1.0;
        assert!((effs["Monday-9"] - expected).abs() < 1e-9);
    }

    #[test]
    fn peak_windows_require_two_contiguous_hours() {
        let mut effs = HashMap::new();
        effs.insert("Monday-9".to_string(), 0.9);
        effs.insert("Monday-10".to_string(), 0.8);
        effs.insert("Monday-14".to_string(), 0.95); // isolated
        effs.insert("Tuesday-9".to_string(), 0.5); // below threshold

        let windows = peak_windows(&effs, PEAK_THRESHOLD);
        assert_eq!(windows.len(), 1);
        let w = &windows[0];
        assert_eq!((w.day.as_str(), w.start_hour, w.end_hour), ("Monday", 9, 11));
        assert!((w.efficiency - 0.85).abs() < 1e-9);
    }

    #[test]
    fn tail_run_is_not_dropped() {
        let mut effs = HashMap::new();
        effs.insert("Friday-20".to_string(), 0.8);
        effs.insert("Friday-21".to_string(), 0.9);
        let windows = peak_windows(&effs, PEAK_THRESHOLD);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].end_hour, 22);
    }

    #[test]
    fn session_parameters_default_without_data() {
        assert_eq!(session_parameters(&[]), SessionParameters::default());
    }

    #[test]
    fn session_parameters_pick_best_rated_bin() {
        // 60-minute sessions rated 5, 120-minute sessions rated 2.
        let mut sessions = Vec::new();
        for day in 3..9 {
            sessions.push(session(at(day, 9, 0), 60, 60.0, Some(5)));
            sessions.push(session(at(day, 15, 0), 120, 120.0, Some(2)));
        }
        let params = session_parameters(&sessions);
        assert_eq!(params.max_continuous_minutes, 60);
        assert_eq!(params.ideal_break_minutes, 12);
        let range = clamps::EFFICIENCY_DECAY_RATE;
        assert!(params.efficiency_decay_rate >= range.0);
        assert!(params.efficiency_decay_rate <= range.1);
    }

    #[test]
    fn max_continuous_minutes_respects_clamp() {
        let sessions: Vec<_> = (3..10)
            .map(|day| session(at(day, 9, 0), 230, 230.0, Some(5)))
            .collect();
        let params = session_parameters(&sessions);
        assert_eq!(params.max_continuous_minutes, clamps::MAX_CONTINUOUS_MINUTES.1);
    }

    #[test]
    fn fatigue_recovery_defaults_below_ten_sessions() {
        let sessions = vec![session(at(3, 9, 0), 60, 60.0, Some(4))];
        assert_eq!(fatigue_recovery(&sessions), FatigueRecovery::default());
    }

    #[test]
    fn fatigue_detects_rating_drop_within_runs() {
        // Two back-to-back runs per day: ratings fall 5 -> 1 inside each run.
        let mut sessions = Vec::new();
        for day in 3..9 {
            sessions.push(session(at(day, 9, 0), 30, 30.0, Some(5)));
            sessions.push(session(at(day, 9, 45), 30, 30.0, Some(3)));
            sessions.push(session(at(day, 10, 30), 30, 30.0, Some(1)));
        }
        let params = fatigue_recovery(&sessions);
        assert!(params.fatigue_factor > clamps::FATIGUE_FACTOR.0);
        assert!(params.fatigue_factor <= clamps::FATIGUE_FACTOR.1);
    }

    #[test]
    fn day_multipliers_normalize_to_mean_one() {
        let mut sessions = Vec::new();
        // Good Mondays, mediocre Wednesdays, weak Fridays, two weeks.
        for week in 0..2 {
            let base = 3 + week * 7;
            sessions.push(session(at(base, 9, 0), 60, 60.0, Some(5)));
            sessions.push(session(at(base, 14, 0), 60, 60.0, Some(5)));
            sessions.push(session(at(base + 2, 9, 0), 60, 80.0, Some(3)));
            sessions.push(session(at(base + 4, 9, 0), 90, 30.0, Some(1)));
        }
        let factors = adjustment_factors(&sessions, &[]);
        let mean_mult = factors.day_multipliers.values().sum::<f64>() / 7.0;
        assert!((mean_mult - 1.0).abs() < 1e-6);
        assert!(factors.day_multipliers["Monday"] > factors.day_multipliers["Friday"]);
    }

    #[test]
    fn buffer_is_median_gap_to_next_obligation() {
        let sessions = vec![
            session(at(3, 9, 0), 60, 60.0, Some(4)),  // ends 10:00
            session(at(4, 9, 0), 60, 60.0, Some(4)),  // ends 10:00
        ];
        let signals = vec![
            ContextSignal {
                signal_id: 1,
                student_id: 1,
                event_type: "class".into(),
                start_time: at(3, 10, 20),
                end_time: at(3, 11, 20),
                signal_type: "academic".into(),
                signal_value: None,
            },
            ContextSignal {
                signal_id: 2,
                student_id: 1,
                event_type: "meeting".into(),
                start_time: at(4, 10, 40),
                end_time: at(4, 11, 0),
                signal_type: "academic".into(),
                signal_value: None,
            },
        ];
        let factors = adjustment_factors(&sessions, &signals);
        assert_eq!(factors.soft_obligation_buffer, 30.0);
    }

    #[test]
    fn buffer_defaults_without_context() {
        let factors = adjustment_factors(&[], &[]);
        assert_eq!(
            factors.soft_obligation_buffer,
            clamps::SOFT_OBLIGATION_BUFFER_DEFAULT
        );
    }

    #[test]
    fn retention_tracks_efficiency_with_uplift() {
        let mut effs = HashMap::new();
        effs.insert("Monday-9".to_string(), 0.5);
        effs.insert("Monday-15".to_string(), 0.5);
        effs.insert("Monday-20".to_string(), 0.5);
        let retention = retention_indicators(&effs);
        assert!((retention["Monday-9"] - 0.5).abs() < 1e-9);
        assert!((retention["Monday-15"] - 0.4).abs() < 1e-9);
        assert!((retention["Monday-20"] - 0.45).abs() < 1e-9);
        assert!(retention.values().all(|r| (0.3..=0.95).contains(r)));
    }
}
