use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use crate::behavior::features;
use crate::clock::Clock;
use crate::db::store::behavior as store;
use crate::error::ApiError;
use crate::models::profile::clamps;
use crate::models::{PreferredStudyTime, ProductivityProfile, StudentPreferences};
use crate::scheduler::timegrid;

const SLOT_LOOKBACK_DAYS: i64 = 30;
const RECENT_RATED_LIMIT: i64 = 50;
const COLD_START_TOP_SLOTS: usize = 15;
const PREFERENCE_BOOST: f64 = 0.15;
const PREFERENCE_CAP: f64 = 0.95;

/// Hours a recommendation may occupy: [07:00, 22:00).
const RECOMMEND_FROM_HOUR: u32 = 7;
const RECOMMEND_UNTIL_HOUR: u32 = 22;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SessionPrediction {
    pub predicted_efficiency: f64,
    pub completion_probability: f64,
    pub expected_overrun_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotRecommendation {
    pub day: String,
    pub date: NaiveDate,
    pub start_hour: u32,
    pub end_hour: u32,
    pub efficiency: f64,
}

/// Returns the stored profile, creating a default row on first contact.
pub async fn get_or_create(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
) -> Result<ProductivityProfile, ApiError> {
    if let Some(profile) = store::get_profile(pool, student_id).await? {
        return Ok(profile);
    }
    let profile = ProductivityProfile::defaults(student_id, clock.now());
    Ok(store::upsert_profile(pool, &profile).await?)
}

/// Re-derives every profile field from telemetry and persists the result.
pub async fn update(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
) -> Result<ProductivityProfile, ApiError> {
    let mut profile = get_or_create(pool, clock, student_id).await?;
    let now = clock.now();

    let lookback = now - Duration::days(SLOT_LOOKBACK_DAYS);
    let recent_completed = store::list_completed_since(pool, student_id, lookback).await?;
    let rated = store::list_completed_rated(pool, student_id).await?;
    let mut recent_rated =
        store::list_completed_rated_recent(pool, student_id, RECENT_RATED_LIMIT).await?;
    recent_rated.reverse();
    let signals = store::list_context_signals(pool, student_id).await?;

    let slot_weights = features::slot_efficiencies(&recent_completed);
    let session_params = features::session_parameters(&recent_rated);
    let fatigue = features::fatigue_recovery(&rated);
    let adjustments = features::adjustment_factors(&rated, &signals);

    // No observed slots yet (e.g. right after a cold start): keep the
    // seeded weights instead of wiping them.
    if !slot_weights.is_empty() {
        profile.peak_windows = features::peak_windows(&slot_weights, features::PEAK_THRESHOLD);
        profile.retention_rates = features::retention_indicators(&slot_weights);
        profile.slot_weights = slot_weights;
    }
    profile.max_continuous_minutes = session_params.max_continuous_minutes;
    profile.ideal_break_minutes = session_params.ideal_break_minutes;
    profile.efficiency_decay_rate = session_params.efficiency_decay_rate;
    profile.fatigue_factor = fatigue.fatigue_factor;
    profile.recovery_factor = fatigue.recovery_factor;
    profile.day_multipliers = adjustments.day_multipliers;
    profile.soft_obligation_buffer = adjustments.soft_obligation_buffer;
    profile.last_updated = now;

    log::info!(
        "updated productivity profile for student {} ({} slots, {} peak windows)",
        student_id,
        profile.slot_weights.len(),
        profile.peak_windows.len()
    );
    Ok(store::upsert_profile(pool, &profile).await?)
}

/// Seeds a new student's slot weights from a built-in prior plus their
/// stated preference, so recommendations work before any telemetry.
pub async fn initialize_cold_start(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
    preferences: &StudentPreferences,
) -> Result<ProductivityProfile, ApiError> {
    let mut profile = get_or_create(pool, clock, student_id).await?;

    let mut slot_weights = cold_start_prior();
    apply_preference_boost(&mut slot_weights, preferences.preferred_study_time);

    // Peak windows come from the top of the prior.
    let mut ranked: Vec<(&String, &f64)> = slot_weights.iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(b.0))
    });
    let top: HashMap<String, f64> = ranked
        .into_iter()
        .take(COLD_START_TOP_SLOTS)
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    let peak_windows = features::peak_windows(&top, 0.0);

    profile.slot_weights = slot_weights;
    profile.peak_windows = peak_windows;
    profile.retention_rates = features::retention_indicators(&profile.slot_weights);
    profile.last_updated = clock.now();

    Ok(store::upsert_profile(pool, &profile).await?)
}

/// Built-in prior: weekday mornings strong, early afternoons weak,
/// evenings decent, weekend mornings best, everything else moderate.
fn cold_start_prior() -> HashMap<String, f64> {
    let mut weights = HashMap::new();
    for day in &timegrid::WEEKDAY_NAMES[..5] {
        for hour in 9..12 {
            weights.insert(timegrid::slot_key(day, hour), 0.8);
        }
        for hour in 14..16 {
            weights.insert(timegrid::slot_key(day, hour), 0.6);
        }
        for hour in 19..22 {
            weights.insert(timegrid::slot_key(day, hour), 0.75);
        }
    }
    for day in &timegrid::WEEKDAY_NAMES[5..] {
        for hour in 10..13 {
            weights.insert(timegrid::slot_key(day, hour), 0.85);
        }
    }
    for day in timegrid::WEEKDAY_NAMES {
        for hour in 7..23 {
            weights.entry(timegrid::slot_key(day, hour)).or_insert(0.65);
        }
    }
    weights
}

fn apply_preference_boost(weights: &mut HashMap<String, f64>, preference: PreferredStudyTime) {
    let hours: std::ops::Range<u32> = match preference {
        PreferredStudyTime::Morning => 7..12,
        PreferredStudyTime::Afternoon => 12..18,
        PreferredStudyTime::Evening => 18..23,
        PreferredStudyTime::None => return,
    };
    for day in timegrid::WEEKDAY_NAMES {
        for hour in hours.clone() {
            let slot = weights.entry(timegrid::slot_key(day, hour)).or_insert(0.0);
            *slot = (*slot + PREFERENCE_BOOST).min(PREFERENCE_CAP);
        }
    }
}

/// Predicted efficiency, completion probability and expected overrun for
/// a hypothetical session.
pub async fn predict_session_success(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
    start_time: DateTime<Utc>,
    duration_minutes: i64,
) -> Result<SessionPrediction, ApiError> {
    let profile = get_or_create(pool, clock, student_id).await?;
    Ok(predict_with_profile(&profile, start_time, duration_minutes))
}

fn predict_with_profile(
    profile: &ProductivityProfile,
    start_time: DateTime<Utc>,
    duration_minutes: i64,
) -> SessionPrediction {
    let day = timegrid::weekday_name(start_time);
    let slot = timegrid::slot_key_for(start_time);

    let base = profile
        .slot_weights
        .get(&slot)
        .copied()
        .unwrap_or(clamps::SLOT_EFFICIENCY_DEFAULT);
    let day_multiplier = profile
        .day_multipliers
        .get(day)
        .copied()
        .unwrap_or(clamps::DAY_MULTIPLIER_DEFAULT);

    let decay = if duration_minutes <= profile.max_continuous_minutes {
        1.0
    } else {
        let minutes_over = (duration_minutes - profile.max_continuous_minutes) as f64;
        (1.0 - minutes_over * profile.efficiency_decay_rate).max(0.4)
    };

    let efficiency = base * day_multiplier * decay;
    let completion_probability = (0.5 + 0.5 * efficiency).min(0.95);

    let expected_overrun_minutes = if efficiency >= 0.7 {
        0
    } else if efficiency > 0.0 {
        let overrun = ((1.0 / efficiency - 1.0) * duration_minutes as f64 * 0.5).floor() as i64;
        overrun.clamp(0, duration_minutes)
    } else {
        duration_minutes
    };

    SessionPrediction {
        predicted_efficiency: round2(efficiency),
        completion_probability: round2(completion_probability),
        expected_overrun_minutes,
    }
}

/// Top five hourly candidate slots over the lookahead, best first.
pub async fn recommend_slots(
    pool: &Pool<Sqlite>,
    clock: &dyn Clock,
    student_id: i64,
    task_duration_minutes: i64,
    lookahead_days: i64,
) -> Result<Vec<SlotRecommendation>, ApiError> {
    let profile = get_or_create(pool, clock, student_id).await?;
    Ok(recommend_with_profile(
        &profile,
        clock.now(),
        task_duration_minutes,
        lookahead_days,
    ))
}

fn recommend_with_profile(
    profile: &ProductivityProfile,
    now: DateTime<Utc>,
    task_duration_minutes: i64,
    lookahead_days: i64,
) -> Vec<SlotRecommendation> {
    let today = now.date_naive();
    let mut slots = Vec::new();

    for day_offset in 0..lookahead_days {
        let date = today + Duration::days(day_offset);
        let day = timegrid::WEEKDAY_NAMES[date.weekday().num_days_from_monday() as usize];
        let multiplier = profile
            .day_multipliers
            .get(day)
            .copied()
            .unwrap_or(clamps::DAY_MULTIPLIER_DEFAULT);

        for hour in RECOMMEND_FROM_HOUR..RECOMMEND_UNTIL_HOUR {
            let fits = hour as f64 + task_duration_minutes as f64 / 60.0
                <= RECOMMEND_UNTIL_HOUR as f64;
            if !fits {
                continue;
            }
            let base = profile
                .slot_weights
                .get(&timegrid::slot_key(day, hour))
                .copied()
                .unwrap_or(clamps::SLOT_EFFICIENCY_DEFAULT);
            slots.push(SlotRecommendation {
                day: day.to_string(),
                date,
                start_hour: hour,
                end_hour: hour + 1,
                efficiency: round2(base * multiplier),
            });
        }
    }

    slots.sort_by(|a, b| {
        b.efficiency
            .partial_cmp(&a.efficiency)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.date.cmp(&b.date))
            .then(a.start_hour.cmp(&b.start_hour))
    });
    slots.truncate(5);
    slots
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn profile() -> ProductivityProfile {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let mut p = ProductivityProfile::defaults(1, now);
        p.slot_weights.insert("Monday-9".into(), 0.9);
        p.slot_weights.insert("Monday-14".into(), 0.4);
        p.day_multipliers.insert("Monday".into(), 1.1);
        p
    }

    #[test]
    fn prediction_uses_slot_weight_and_day_multiplier() {
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let prediction = predict_with_profile(&profile(), start, 45);
        assert_eq!(prediction.predicted_efficiency, round2(0.9 * 1.1));
        assert_eq!(prediction.completion_probability, 0.95);
        assert_eq!(prediction.expected_overrun_minutes, 0);
    }

    #[test]
    fn long_sessions_decay_and_overrun() {
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap();
        // 120 min vs max 45: decay = max(0.4, 1 - 75*0.05) = 0.4.
        let prediction = predict_with_profile(&profile(), start, 120);
        let eff = 0.4 * 1.1 * 0.4;
        assert_eq!(prediction.predicted_efficiency, round2(eff));
        assert!(prediction.expected_overrun_minutes > 0);
        assert!(prediction.expected_overrun_minutes <= 120);
    }

    #[test]
    fn no_overrun_at_or_above_point_seven() {
        let mut p = profile();
        p.slot_weights.insert("Monday-9".into(), 0.7);
        p.day_multipliers.insert("Monday".into(), 1.0);
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let prediction = predict_with_profile(&p, start, 30);
        assert_eq!(prediction.expected_overrun_minutes, 0);
    }

    #[test]
    fn unknown_slot_defaults_to_half() {
        let start = Utc.with_ymd_and_hms(2024, 6, 4, 11, 0, 0).unwrap();
        let prediction = predict_with_profile(&profile(), start, 30);
        assert_eq!(prediction.predicted_efficiency, 0.5);
    }

    #[test]
    fn recommendations_filter_by_fit_and_sort_by_efficiency() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let recs = recommend_with_profile(&profile(), now, 60, 7);
        assert_eq!(recs.len(), 5);
        assert_eq!((recs[0].day.as_str(), recs[0].start_hour), ("Monday", 9));
        for pair in recs.windows(2) {
            assert!(pair[0].efficiency >= pair[1].efficiency);
        }
        for rec in &recs {
            assert!(rec.start_hour >= RECOMMEND_FROM_HOUR);
            assert!(rec.start_hour + 1 <= RECOMMEND_UNTIL_HOUR);
        }
    }

    #[test]
    fn long_tasks_cannot_start_late() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let recs = recommend_with_profile(&profile(), now, 180, 2);
        for rec in &recs {
            assert!(rec.start_hour <= 19, "start {} leaves no room", rec.start_hour);
        }
    }

    #[test]
    fn cold_start_prior_matches_documented_table() {
        let prior = cold_start_prior();
        assert_eq!(prior["Monday-9"], 0.8);
        assert_eq!(prior["Monday-14"], 0.6);
        assert_eq!(prior["Monday-19"], 0.75);
        assert_eq!(prior["Saturday-10"], 0.85);
        assert_eq!(prior["Monday-7"], 0.65);
        // Every day covers 7..23.
        for day in timegrid::WEEKDAY_NAMES {
            for hour in 7..23 {
                assert!(prior.contains_key(&timegrid::slot_key(day, hour)));
            }
        }
    }

    #[test]
    fn evening_preference_boosts_and_caps() {
        let mut weights = cold_start_prior();
        apply_preference_boost(&mut weights, PreferredStudyTime::Evening);
        assert_eq!(weights["Monday-19"], 0.9); // 0.75 + 0.15
        assert_eq!(weights["Monday-18"], 0.8); // 0.65 + 0.15
        assert!(weights.values().all(|w| *w <= PREFERENCE_CAP));
        // Mornings untouched.
        assert_eq!(weights["Monday-9"], 0.8);
    }
}
