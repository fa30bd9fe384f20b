use chrono::{DateTime, Utc};

use crate::error::ApiError;
use crate::models::{AcademicTask, CalendarEvent, FlexibleObligation};
use crate::scheduler::timegrid;

/// An immovable interval the solver must schedule around.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedInput {
    pub id: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub priority: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Flexible,
    Academic,
}

/// A placeable task, already coerced to grid granularity.
#[derive(Debug, Clone, PartialEq)]
pub struct FlexInput {
    /// Obligation id for flexible tasks, academic task id otherwise.
    pub id: i64,
    pub kind: TaskKind,
    /// Study-session row the produced events must reference
    /// (academic tasks only).
    pub session_ref: Option<i64>,
    pub total_hours: f64,
    pub session_hours: f64,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Persisted event priority, 1..5.
    pub priority: i64,
    /// Objective weight; higher schedules earlier.
    pub weight: i64,
    pub dependencies: Vec<i64>,
    /// Weekday indices (Mon = 0) the task may be placed on.
    pub allowed_weekdays: Option<Vec<u32>>,
}

impl FlexInput {
    pub fn session_count(&self) -> usize {
        ((self.total_hours / self.session_hours).ceil() as usize).max(1)
    }
}

/// Floors to the half-hour granularity of the solver grid.
fn floor_to_grid(hours: f64) -> f64 {
    (hours * 2.0).floor() / 2.0
}

fn coerce_session_hours(raw: Option<f64>) -> f64 {
    match raw {
        Some(h) if h.is_finite() && h > 0.0 => floor_to_grid(h).max(0.5),
        _ => 1.0,
    }
}

/// Existing calendar events, reinterpreted as immovable intervals.
pub fn fixed_from_events(events: &[CalendarEvent]) -> Vec<FixedInput> {
    events
        .iter()
        .map(|event| FixedInput {
            id: event.event_id,
            start: event.start_time,
            end: event.end_time,
            priority: if event.priority >= 1 { event.priority } else { 1 },
        })
        .collect()
}

/// Turns a flexible obligation row into a solver task. Obligations whose
/// window already closed are dropped with a warning.
pub fn flexible_to_task(
    obligation: &FlexibleObligation,
    now: DateTime<Utc>,
) -> Result<Option<FlexInput>, ApiError> {
    if !(obligation.weekly_target_hours.is_finite() && obligation.weekly_target_hours > 0.0) {
        return Err(ApiError::validation(format!(
            "flexible obligation {} has no usable weekly_target_hours",
            obligation.obligation_id
        )));
    }
    if let Some(end) = obligation.end_date {
        if end < now {
            log::warn!(
                "dropping flexible obligation {}: window ended {}",
                obligation.obligation_id,
                end
            );
            return Ok(None);
        }
    }

    let total_hours = floor_to_grid(obligation.weekly_target_hours).max(0.5);
    let session_hours = coerce_session_hours(obligation.constraints.session_hours);
    let allowed_weekdays = match &obligation.constraints.days_of_week {
        Some(names) => Some(weekdays_from_names(names)?),
        None => None,
    };

    Ok(Some(FlexInput {
        id: obligation.obligation_id,
        kind: TaskKind::Flexible,
        session_ref: None,
        total_hours,
        session_hours,
        start_date: obligation.start_date,
        end_date: obligation.end_date,
        priority: obligation.priority.clamp(1, 5),
        weight: obligation.priority.clamp(1, 5),
        dependencies: obligation.constraints.dependencies.clone(),
        allowed_weekdays,
    }))
}

/// Objective weight for academic work; deadlines outrank any flexible
/// obligation priority.
pub const ACADEMIC_WEIGHT: i64 = 8;

const ACADEMIC_DEFAULT_HOURS: f64 = 2.0;

/// Turns an academic task into a solver task seeded with study sessions
/// until its deadline. `session_ref` is the study_sessions row the
/// emitted events will point at.
pub fn academic_to_task(
    task: &AcademicTask,
    session_ref: i64,
    priority: i64,
    now: DateTime<Utc>,
) -> Result<Option<FlexInput>, ApiError> {
    if task.deadline < now {
        log::warn!("dropping academic task {}: deadline passed", task.task_id);
        return Ok(None);
    }

    let total_hours = match task.estimated_hours {
        Some(h) if !h.is_finite() => ACADEMIC_DEFAULT_HOURS,
        Some(h) => floor_to_grid(h),
        None => ACADEMIC_DEFAULT_HOURS,
    };
    if total_hours <= 0.0 {
        return Err(ApiError::validation(format!(
            "academic task {} expands to zero study sessions",
            task.task_id
        )));
    }

    Ok(Some(FlexInput {
        id: task.task_id,
        kind: TaskKind::Academic,
        session_ref: Some(session_ref),
        total_hours,
        session_hours: 1.0,
        start_date: None,
        end_date: Some(task.deadline),
        priority: priority.clamp(1, 5),
        weight: ACADEMIC_WEIGHT,
        dependencies: Vec::new(),
        allowed_weekdays: None,
    }))
}

fn weekdays_from_names(names: &[String]) -> Result<Vec<u32>, ApiError> {
    names
        .iter()
        .map(|name| {
            timegrid::weekday_from_name(name)
                .ok_or_else(|| ApiError::validation(format!("unknown weekday name: {}", name)))
        })
        .collect()
}

/// Rejects dependency graphs with cycles; the solver only ever sees DAGs.
pub fn validate_dependency_dag(tasks: &[FlexInput]) -> Result<(), ApiError> {
    use std::collections::{HashMap, HashSet};

    let edges: HashMap<i64, &[i64]> = tasks
        .iter()
        .filter(|t| t.kind == TaskKind::Flexible)
        .map(|t| (t.id, t.dependencies.as_slice()))
        .collect();

    fn visit(
        node: i64,
        edges: &HashMap<i64, &[i64]>,
        done: &mut HashSet<i64>,
        path: &mut HashSet<i64>,
    ) -> bool {
        if done.contains(&node) {
            return true;
        }
        if !path.insert(node) {
            return false;
        }
        for dep in edges.get(&node).copied().unwrap_or(&[]) {
            if !visit(*dep, edges, done, path) {
                return false;
            }
        }
        path.remove(&node);
        done.insert(node);
        true
    }

    let mut done = HashSet::new();
    for id in edges.keys() {
        let mut path = HashSet::new();
        if !visit(*id, &edges, &mut done, &mut path) {
            return Err(ApiError::validation(format!(
                "dependency cycle involving obligation {}",
                id
            )));
        }
    }
    Ok(())
}
