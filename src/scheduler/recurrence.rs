use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use sqlx::SqliteConnection;

use crate::db::store::events::{self, NewCalendarEvent};
use crate::error::ApiError;
use crate::models::{Course, EventKind, EventStatus, FixedObligation, Recurrence};
use crate::scheduler::timegrid;

/// Expansion caps: about six months of material either way.
const WEEKLY_PERIODS: i64 = 26;
const MONTHLY_PERIODS: i64 = 6;
const MONTH_STEP_DAYS: i64 = 30;

/// Materialized occurrences of a fixed obligation, ordered by start.
///
/// Times-of-day are wall-clock in the student's (implicit, single)
/// timezone and are combined with occurrence dates into UTC instants;
/// every instant the crate stores or compares is UTC-aware.
pub fn occurrences(
    obligation: &FixedObligation,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, ApiError> {
    let mut out = std::collections::BTreeSet::new();

    for day_name in &obligation.days_of_week {
        let target = timegrid::weekday_from_name(day_name)
            .ok_or_else(|| ApiError::validation(format!("unknown weekday name: {}", day_name)))?;

        let base = obligation.start_date;
        let days_until = (target as i64 - base.weekday().num_days_from_monday() as i64 + 7) % 7;
        let first = base + Duration::days(days_until);

        let dates: Vec<NaiveDate> = match obligation.recurrence {
            Recurrence::Weekly => (0..WEEKLY_PERIODS)
                .map(|i| first + Duration::days(i * 7))
                .collect(),
            Recurrence::Biweekly => (0..WEEKLY_PERIODS)
                .step_by(2)
                .map(|i| first + Duration::days(i * 7))
                .collect(),
            Recurrence::Monthly => (0..MONTHLY_PERIODS)
                .map(|i| first + Duration::days(i * MONTH_STEP_DAYS))
                .collect(),
        };

        for date in dates {
            if let Some(end_date) = obligation.end_date {
                if date > end_date {
                    break;
                }
            }
            let start = date.and_time(obligation.start_time).and_utc();
            let end = date.and_time(obligation.end_time).and_utc();
            out.insert((start, end));
        }
    }

    Ok(out.into_iter().collect())
}

/// Deletes the obligation's future events and re-materializes them from
/// the template. Runs on the caller's transaction; regenerating an
/// unchanged template reproduces the same (start, end) set modulo ids.
pub async fn regenerate_fixed_events(
    conn: &mut SqliteConnection,
    obligation: &FixedObligation,
    now: DateTime<Utc>,
) -> Result<u64, ApiError> {
    let expanded = occurrences(obligation)?;

    let deleted =
        events::delete_future_for_fixed_obligation(&mut *conn, obligation.obligation_id, now)
            .await?;

    let mut inserted = 0u64;
    for (start, end) in expanded {
        if start < now {
            continue;
        }
        events::insert(
            &mut *conn,
            NewCalendarEvent {
                student_id: obligation.student_id,
                kind: EventKind::FixedObligation {
                    obligation_id: obligation.obligation_id,
                },
                date: start.date_naive(),
                start_time: start,
                end_time: end,
                priority: obligation.priority,
                status: EventStatus::Scheduled,
            },
        )
        .await?;
        inserted += 1;
    }

    log::info!(
        "regenerated events for fixed obligation {}: {} deleted, {} inserted",
        obligation.obligation_id,
        deleted,
        inserted
    );
    Ok(inserted)
}

/// Materializes weekly `course_lecture` events from a course timetable,
/// starting at the registration date. Day patterns use the catalog's
/// letter encoding.
pub async fn materialize_course_lectures(
    conn: &mut SqliteConnection,
    student_id: i64,
    course: &Course,
    from: NaiveDate,
) -> Result<u64, ApiError> {
    let mut inserted = 0u64;

    for entry in &course.timetable {
        let weekdays = timegrid::expand_day_letters(&entry.days).map_err(|letter| {
            ApiError::validation(format!(
                "course {} timetable has unknown day letter {:?}",
                course.course_crn, letter
            ))
        })?;

        for target in weekdays {
            let days_until = (target as i64 - from.weekday().num_days_from_monday() as i64 + 7) % 7;
            let first = from + Duration::days(days_until);
            for i in 0..WEEKLY_PERIODS {
                let date = first + Duration::days(i * 7);
                events::insert(
                    &mut *conn,
                    NewCalendarEvent {
                        student_id,
                        kind: EventKind::CourseLecture {
                            course_id: course.course_id,
                        },
                        date,
                        start_time: date.and_time(entry.start_time).and_utc(),
                        end_time: date.and_time(entry.end_time).and_utc(),
                        priority: 3,
                        status: EventStatus::Scheduled,
                    },
                )
                .await?;
                inserted += 1;
            }
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn obligation(days: &[&str], recurrence: Recurrence) -> FixedObligation {
        FixedObligation {
            obligation_id: 1,
            student_id: 1,
            name: "Algorithms lecture".into(),
            description: None,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            days_of_week: days.iter().map(|d| d.to_string()).collect(),
            start_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(), // a Monday
            end_date: Some(NaiveDate::from_ymd_opt(2024, 8, 30).unwrap()),
            recurrence,
            priority: 4,
            course_id: None,
        }
    }

    #[test]
    fn weekly_occurrences_land_on_requested_days() {
        let expanded = occurrences(&obligation(&["Monday", "Wednesday", "Friday"], Recurrence::Weekly))
            .unwrap();
        assert!(!expanded.is_empty());
        for (start, end) in &expanded {
            let day = timegrid::weekday_index(*start);
            assert!(matches!(day, 0 | 2 | 4));
            assert_eq!((*end - *start).num_minutes(), 60);
            assert!(start.date_naive() <= NaiveDate::from_ymd_opt(2024, 8, 30).unwrap());
        }
        // 13 full weeks in Jun 3 .. Aug 30 for each of the three days.
        assert_eq!(expanded.len(), 39);
    }

    #[test]
    fn biweekly_halves_the_cadence() {
        let weekly = occurrences(&obligation(&["Monday"], Recurrence::Weekly)).unwrap();
        let biweekly = occurrences(&obligation(&["Monday"], Recurrence::Biweekly)).unwrap();
        assert_eq!(biweekly.len(), (weekly.len() + 1) / 2);
        assert_eq!(
            (biweekly[1].0 - biweekly[0].0),
            Duration::days(14)
        );
    }

    #[test]
    fn monthly_caps_at_six_periods() {
        let mut ob = obligation(&["Monday"], Recurrence::Monthly);
        ob.end_date = None;
        let expanded = occurrences(&ob).unwrap();
        assert_eq!(expanded.len(), 6);
        assert_eq!((expanded[1].0 - expanded[0].0), Duration::days(30));
    }

    #[test]
    fn expansion_is_idempotent() {
        let ob = obligation(&["Tuesday", "Thursday"], Recurrence::Weekly);
        assert_eq!(occurrences(&ob).unwrap(), occurrences(&ob).unwrap());
    }

    #[test]
    fn unknown_weekday_is_rejected() {
        let err = occurrences(&obligation(&["Mon"], Recurrence::Weekly)).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Validation);
    }

    #[test]
    fn first_occurrence_respects_start_date() {
        // Start date is a Monday; a Sunday obligation begins six days later.
        let expanded = occurrences(&obligation(&["Sunday"], Recurrence::Weekly)).unwrap();
        assert_eq!(
            expanded[0].0.date_naive(),
            NaiveDate::from_ymd_opt(2024, 6, 9).unwrap()
        );
    }
}
