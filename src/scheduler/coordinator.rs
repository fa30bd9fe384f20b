use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::Config;
use crate::db::store::{events, obligations, students, tasks};
use crate::db::store::events::NewCalendarEvent;
use crate::error::ApiError;
use crate::models::{
    CalendarEvent, EventKind, EventStatus, FlexibleObligation, TaskStatus,
};
use crate::scheduler::normalize::{self, FlexInput, TaskKind};
use crate::scheduler::solver::{self, ScheduledSession, SolverOptions, SolverStatus};

/// One reschedule per student at a time; concurrent requests for
/// different students proceed in parallel.
static STUDENT_LOCKS: Lazy<parking_lot::Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>> =
    Lazy::new(Default::default);

fn lock_for(student_id: i64) -> Arc<tokio::sync::Mutex<()>> {
    STUDENT_LOCKS
        .lock()
        .entry(student_id)
        .or_default()
        .clone()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RescheduleRequest {
    pub student_id: i64,
    /// When this names a flexible obligation, only that obligation's
    /// events are cleared; everything else keeps its regrouped placement.
    pub newly_created_obligation_id: Option<i64>,
    pub week_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RescheduleOutcome {
    pub applied_event_count: usize,
    pub solver_status: SolverStatus,
}

/// End-to-end reschedule: load -> normalize -> solve -> apply-diff.
/// Any failure before or during APPLYING leaves the calendar untouched.
pub async fn reschedule(
    pool: &Pool<Sqlite>,
    config: &Config,
    clock: &dyn Clock,
    request: RescheduleRequest,
    cancel: &CancellationToken,
) -> Result<RescheduleOutcome, ApiError> {
    let lock = lock_for(request.student_id);
    let _guard = lock.lock().await;

    let now = clock.now();
    let week_start = request.week_start.unwrap_or(now);
    log::info!(
        "rescheduling student {} (week_start {})",
        request.student_id,
        week_start
    );

    // LOADING
    if cancel.is_cancelled() {
        return Err(ApiError::solver_aborted("reschedule cancelled"));
    }
    let student = students::get(pool, request.student_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;
    let all_events = events::list_for_student(pool, request.student_id).await?;
    let flex_rows = obligations::list_flexible(pool, request.student_id).await?;

    let (fixed_events, flex_events): (Vec<_>, Vec<_>) = all_events.into_iter().partition(|e| {
        matches!(
            e.kind,
            EventKind::FixedObligation { .. } | EventKind::CourseLecture { .. }
        )
    });

    // NORMALIZING
    let selective_obligation = request.newly_created_obligation_id.filter(|id| {
        flex_rows.iter().any(|row| row.obligation_id == *id)
    });
    let survivors: Vec<&CalendarEvent> = match selective_obligation {
        Some(new_id) => flex_events
            .iter()
            .filter(|e| !matches!(e.kind, EventKind::FlexibleObligation { obligation_id } if obligation_id == new_id))
            .filter(|e| matches!(e.kind, EventKind::FlexibleObligation { .. }))
            .collect(),
        None => Vec::new(),
    };

    let base_rows: HashMap<i64, &FlexibleObligation> =
        flex_rows.iter().map(|row| (row.obligation_id, row)).collect();
    let mut flex_tasks = regroup_scheduled(&survivors, &base_rows, now)?;

    let scheduled_ids: HashSet<i64> = flex_tasks.iter().map(|t| t.id).collect();
    for row in &flex_rows {
        if scheduled_ids.contains(&row.obligation_id) {
            continue;
        }
        if let Some(task) = normalize::flexible_to_task(row, now)? {
            flex_tasks.push(task);
        }
    }

    // Academic tasks of registered courses become study sessions.
    tasks::mark_overdue(pool, request.student_id, now).await?;
    for task in tasks::list_for_student(pool, request.student_id).await? {
        if matches!(task.status, TaskStatus::Completed | TaskStatus::Overdue) {
            continue;
        }
        let session = tasks::get_or_create_study_session(pool, request.student_id, &task).await?;
        if let Some(input) =
            normalize::academic_to_task(&task, session.session_id, session.priority, now)?
        {
            flex_tasks.push(input);
        }
    }

    if flex_tasks.is_empty() {
        log::info!("student {} has nothing to place", request.student_id);
        return Ok(RescheduleOutcome {
            applied_event_count: 0,
            solver_status: SolverStatus::Feasible,
        });
    }

    let fixed_inputs = normalize::fixed_from_events(&fixed_events);
    let options = SolverOptions {
        wall_clock_seconds: config.solver_wall_clock_seconds,
        night_start_hour: config.night_start_hour,
        night_end_hour: config.night_end_hour,
        max_hours_per_day: student
            .preferences
            .max_hours_per_day
            .unwrap_or(config.max_hours_per_day),
        min_gap_slots: student
            .preferences
            .min_gap_between_sessions
            .unwrap_or(config.min_gap_slots),
    };

    // BUILDING + SOLVING (bounded wall-clock, off the async executor)
    let solve_cancel = cancel.clone();
    let solve_tasks = flex_tasks.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        solver::solve(week_start, &fixed_inputs, &solve_tasks, &options, &solve_cancel)
    })
    .await
    .map_err(|e| ApiError::internal(format!("solver task panicked: {}", e)))??;

    if cancel.is_cancelled() {
        return Err(ApiError::solver_aborted("reschedule cancelled before apply"));
    }

    // APPLYING: one transaction for the delete + insert diff.
    let mut tx = pool.begin().await?;
    match selective_obligation {
        Some(obligation_id) => {
            events::delete_for_flexible_obligation(&mut *tx, obligation_id).await?;
            // Regrouped placements are re-inserted below; study sessions
            // are always re-solved.
            for survivor in &survivors {
                sqlx::query("DELETE FROM calendar_events WHERE event_id = ?")
                    .bind(survivor.event_id)
                    .execute(&mut *tx)
                    .await?;
            }
            events::delete_study_events(&mut *tx, request.student_id).await?;
        }
        None => {
            events::delete_flexible_and_study(&mut *tx, request.student_id).await?;
        }
    }

    let mut applied = 0usize;
    for session in &outcome.sessions {
        events::insert(&mut *tx, event_for_session(request.student_id, session)?).await?;
        applied += 1;
    }
    tx.commit().await?;

    log::info!(
        "applied {} sessions for student {} ({:?})",
        applied,
        request.student_id,
        outcome.status
    );
    Ok(RescheduleOutcome {
        applied_event_count: applied,
        solver_status: outcome.status,
    })
}

fn event_for_session(
    student_id: i64,
    session: &ScheduledSession,
) -> Result<NewCalendarEvent, ApiError> {
    let kind = match session.kind {
        TaskKind::Flexible => EventKind::FlexibleObligation {
            obligation_id: session.task_id,
        },
        TaskKind::Academic => EventKind::StudySession {
            session_id: session.session_ref.ok_or_else(|| {
                ApiError::internal("academic session lost its study_session reference")
            })?,
        },
    };
    Ok(NewCalendarEvent {
        student_id,
        kind,
        date: session.start.date_naive(),
        start_time: session.start,
        end_time: session.end,
        priority: session.priority.clamp(1, 5),
        status: EventStatus::Scheduled,
    })
}

/// Rebuilds solver tasks for obligations that still have scheduled
/// sessions: summed durations become the hour budget, window and
/// priority come from the base row.
fn regroup_scheduled(
    survivors: &[&CalendarEvent],
    base_rows: &HashMap<i64, &FlexibleObligation>,
    now: DateTime<Utc>,
) -> Result<Vec<FlexInput>, ApiError> {
    let mut grouped: BTreeMap<i64, f64> = BTreeMap::new();
    for event in survivors {
        if let EventKind::FlexibleObligation { obligation_id } = event.kind {
            *grouped.entry(obligation_id).or_insert(0.0) +=
                event.duration_minutes() as f64 / 60.0;
        }
    }

    let mut out = Vec::with_capacity(grouped.len());
    for (obligation_id, hours) in grouped {
        let Some(base) = base_rows.get(&obligation_id) else {
            log::warn!(
                "scheduled events reference missing flexible obligation {}",
                obligation_id
            );
            continue;
        };
        if let Some(mut task) = normalize::flexible_to_task(base, now)? {
            let floored = (hours * 2.0).floor() / 2.0;
            if floored > 0.0 {
                task.total_hours = floored;
            }
            out.push(task);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlexibleConstraints;
    use chrono::TimeZone;

    fn event(obligation_id: i64, start_h: u32, hours: i64) -> CalendarEvent {
        let start = Utc.with_ymd_and_hms(2024, 6, 3, start_h, 0, 0).unwrap();
        CalendarEvent {
            event_id: obligation_id * 100 + start_h as i64,
            student_id: 1,
            kind: EventKind::FlexibleObligation { obligation_id },
            date: start.date_naive(),
            start_time: start,
            end_time: start + chrono::Duration::hours(hours),
            priority: 3,
            status: EventStatus::Scheduled,
        }
    }

    fn base(obligation_id: i64) -> FlexibleObligation {
        FlexibleObligation {
            obligation_id,
            student_id: 1,
            name: None,
            description: None,
            weekly_target_hours: 5.0,
            constraints: FlexibleConstraints::default(),
            start_date: None,
            end_date: None,
            priority: 2,
        }
    }

    #[test]
    fn regroup_sums_scheduled_durations() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let row = base(7);
        let rows: HashMap<i64, &FlexibleObligation> = [(7, &row)].into();
        let e1 = event(7, 9, 1);
        let e2 = event(7, 14, 2);
        let survivors = vec![&e1, &e2];

        let tasks = regroup_scheduled(&survivors, &rows, now).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, 7);
        // 3 scheduled hours outweigh the 5-hour weekly target.
        assert_eq!(tasks[0].total_hours, 3.0);
        assert_eq!(tasks[0].priority, 2);
    }

    #[test]
    fn regroup_skips_orphaned_events() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let rows = HashMap::new();
        let e1 = event(9, 9, 1);
        let survivors = vec![&e1];
        let tasks = regroup_scheduled(&survivors, &rows, now).unwrap();
        assert!(tasks.is_empty());
    }

    #[test]
    fn study_sessions_map_back_to_their_row() {
        let session = ScheduledSession {
            task_id: 3,
            kind: TaskKind::Academic,
            session_ref: Some(55),
            session_index: 0,
            start: Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap(),
            priority: 8,
        };
        let event = event_for_session(1, &session).unwrap();
        assert_eq!(event.kind, EventKind::StudySession { session_id: 55 });
        // Solver weight 8 clamps back into the persisted 1..5 range.
        assert_eq!(event.priority, 5);
    }
}
