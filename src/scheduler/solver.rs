use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Timelike, Utc};
use good_lp::{constraint, default_solver, Expression, ProblemVariables, Solution, SolverModel, Variable};
use good_lp::variable;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::scheduler::normalize::{validate_dependency_dag, FixedInput, FlexInput, TaskKind};
use crate::scheduler::timegrid::{self, DEFAULT_HORIZON_DAYS, SLOT_MINUTES};

/// Fixed seed so two runs over identical inputs agree (HiGHS is also
/// pinned to one thread).
const SOLVER_SEED: i32 = 1234;

/// Weight of one slot of daily overload relative to one slot of lateness.
const OVERLOAD_WEIGHT: f64 = 100.0;

/// Scale of the priority term in the objective.
const PRIORITY_ALPHA: f64 = 0.01;

/// Strictly increasing per-session perturbation; breaks ties by
/// (deadline, task id, session index) without disturbing real preferences.
const TIEBREAK_EPSILON: f64 = 1e-4;

#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    pub wall_clock_seconds: f64,
    pub night_start_hour: u32,
    pub night_end_hour: u32,
    pub max_hours_per_day: u32,
    pub min_gap_slots: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Feasible,
    FeasibleRelaxed,
    Infeasible,
    Timeout,
    Aborted,
}

/// One placed session.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSession {
    pub task_id: i64,
    pub kind: TaskKind,
    pub session_ref: Option<i64>,
    pub session_index: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub priority: i64,
}

#[derive(Debug)]
pub struct SolveOutcome {
    pub sessions: Vec<ScheduledSession>,
    pub status: SolverStatus,
}

struct Grid {
    start: DateTime<Utc>,
    n_slots: i64,
}

impl Grid {
    fn time_of(&self, slot: i64) -> DateTime<Utc> {
        self.start + Duration::minutes(slot * SLOT_MINUTES)
    }

    fn idx_floor(&self, instant: DateTime<Utc>) -> i64 {
        timegrid::slot_index(self.start, instant, SLOT_MINUTES)
    }

    fn idx_ceil(&self, instant: DateTime<Utc>) -> i64 {
        (instant - self.start)
            .num_minutes()
            .div_euclid(SLOT_MINUTES)
            + if (instant - self.start).num_minutes() % SLOT_MINUTES == 0 {
                0
            } else {
                1
            }
    }
}

enum PassError {
    NoWindow(i64),
    /// A session's window is non-empty but every start collides with a
    /// blocked slot; relaxing the night ban may recover it.
    NoCandidates(i64),
    Infeasible,
    Timeout,
    Internal(String),
}

/// Places every session of `tasks` on the grid without overlap.
///
/// Night slots are forbidden in the primary pass; if that pass comes back
/// infeasible (or unknown within the time budget) one relaxed pass allows
/// them. Windows are never relaxed. Nothing is written here; the caller
/// owns persistence.
pub fn solve(
    week_start: DateTime<Utc>,
    fixed: &[FixedInput],
    tasks: &[FlexInput],
    options: &SolverOptions,
    cancel: &CancellationToken,
) -> Result<SolveOutcome, ApiError> {
    if tasks.is_empty() {
        return Ok(SolveOutcome {
            sessions: Vec::new(),
            status: SolverStatus::Feasible,
        });
    }

    validate_dependency_dag(tasks)?;

    let grid = build_grid(week_start, fixed, tasks)?;
    let blocked = rasterize_fixed(&grid, fixed);

    // Deterministic task order: deadline (undated last), then id;
    // sessions inherit it.
    let ordered: Vec<&FlexInput> = tasks
        .iter()
        .sorted_by_key(|t| (t.end_date.unwrap_or(DateTime::<Utc>::MAX_UTC), t.id))
        .collect();

    for block_night in [true, false] {
        if cancel.is_cancelled() {
            return Err(ApiError::solver_aborted("reschedule cancelled mid-solve"));
        }

        match run_pass(&grid, &blocked, &ordered, week_start, options, block_night) {
            Ok(sessions) => {
                let status = if block_night {
                    SolverStatus::Feasible
                } else {
                    SolverStatus::FeasibleRelaxed
                };
                return Ok(SolveOutcome { sessions, status });
            }
            Err(PassError::NoWindow(task_id)) => return Err(ApiError::no_window(task_id)),
            Err(PassError::Internal(message)) => return Err(ApiError::internal(message)),
            Err(PassError::NoCandidates(task_id)) if block_night => {
                log::warn!(
                    "task {} has no night-free placement; retrying with night allowed",
                    task_id
                );
            }
            Err(PassError::Infeasible) | Err(PassError::Timeout) if block_night => {
                log::warn!("primary pass failed; retrying with night allowed");
            }
            Err(PassError::NoCandidates(_)) | Err(PassError::Infeasible) => {
                return Err(ApiError::infeasible(
                    "no conflict-free schedule exists, even with night hours allowed",
                ))
            }
            Err(PassError::Timeout) => {
                return Err(ApiError::solver_timeout(
                    "solver hit its wall-clock bound without a feasible schedule",
                ))
            }
        }
    }
    unreachable!("both solver passes returned");
}

fn build_grid(
    week_start: DateTime<Utc>,
    fixed: &[FixedInput],
    tasks: &[FlexInput],
) -> Result<Grid, ApiError> {
    let mut earliest = week_start;
    let mut latest = week_start + Duration::days(DEFAULT_HORIZON_DAYS);
    for f in fixed {
        earliest = earliest.min(f.start);
        latest = latest.max(f.end);
    }
    for t in tasks {
        if let Some(start) = t.start_date {
            earliest = earliest.min(start);
        }
        if let Some(end) = t.end_date {
            latest = latest.max(end);
        }
    }

    let start = earliest
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc();
    let end = (latest.date_naive() + Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc();

    let n_slots = (end - start).num_minutes() / SLOT_MINUTES;
    if n_slots <= 0 {
        return Err(ApiError::validation("empty scheduling horizon"));
    }
    Ok(Grid { start, n_slots })
}

fn rasterize_fixed(grid: &Grid, fixed: &[FixedInput]) -> BTreeSet<i64> {
    let mut blocked = BTreeSet::new();
    for f in fixed {
        let from = grid.idx_floor(f.start).max(0);
        let to = grid.idx_ceil(f.end).min(grid.n_slots);
        for slot in from..to {
            blocked.insert(slot);
        }
    }
    blocked
}

fn is_night(hour: u32, options: &SolverOptions) -> bool {
    if options.night_start_hour > options.night_end_hour {
        hour >= options.night_start_hour || hour < options.night_end_hour
    } else {
        hour >= options.night_start_hour && hour < options.night_end_hour
    }
}

struct SessionPlan<'a> {
    task: &'a FlexInput,
    session_index: usize,
    dur_slots: i64,
    candidates: Vec<(i64, Variable)>,
}

impl SessionPlan<'_> {
    fn start_expr(&self) -> Expression {
        self.candidates
            .iter()
            .map(|(slot, var)| (*slot as f64) * *var)
            .sum()
    }
}

fn run_pass(
    grid: &Grid,
    blocked: &BTreeSet<i64>,
    ordered: &[&FlexInput],
    week_start: DateTime<Utc>,
    options: &SolverOptions,
    block_night: bool,
) -> Result<Vec<ScheduledSession>, PassError> {
    let mut problem = ProblemVariables::new();
    let mut sessions: Vec<SessionPlan> = Vec::new();
    let default_end = week_start + Duration::days(DEFAULT_HORIZON_DAYS);

    for &task in ordered {
        let dur_slots = (task.session_hours * 60.0 / SLOT_MINUTES as f64).ceil() as i64;
        // A window opening in the past clamps to the horizon start.
        let window_start = task.start_date.unwrap_or(week_start).max(week_start);
        let window_end = task.end_date.unwrap_or(default_end);

        let lo = grid.idx_ceil(window_start).max(0);
        let hi = (grid.idx_floor(window_end) - dur_slots).min(grid.n_slots - dur_slots);
        if hi < lo {
            return Err(PassError::NoWindow(task.id));
        }

        let candidates: Vec<i64> = (lo..=hi)
            .filter(|slot| candidate_fits(grid, blocked, options, task, *slot, dur_slots, block_night))
            .collect();
        if candidates.is_empty() {
            return Err(PassError::NoCandidates(task.id));
        }

        for session_index in 0..task.session_count() {
            let vars = problem.add_vector(variable().binary(), candidates.len());
            sessions.push(SessionPlan {
                task,
                session_index,
                dur_slots,
                candidates: candidates.iter().copied().zip(vars).collect(),
            });
        }
    }

    // Objective: early placement, weighted by task priority, with daily
    // overload dominating and a small deterministic tie-break series.
    let mut objective = Expression::from(0.0);
    for (j, session) in sessions.iter().enumerate() {
        let weight =
            1.0 + PRIORITY_ALPHA * session.task.weight as f64 + TIEBREAK_EPSILON * (j + 1) as f64;
        objective += weight * session.start_expr();
    }

    // Daily soft cap, in slots of load per calendar day.
    let slots_per_day = 24 * 60 / SLOT_MINUTES;
    let cap_slots = (options.max_hours_per_day as i64 * 60 / SLOT_MINUTES) as f64;
    let mut day_loads: HashMap<i64, Expression> = HashMap::new();
    for session in &sessions {
        for (slot, var) in &session.candidates {
            let day = slot / slots_per_day;
            let load = day_loads.entry(day).or_insert_with(|| Expression::from(0.0));
            *load += (session.dur_slots as f64) * *var;
        }
    }
    let mut excess_vars: Vec<(Variable, Expression)> = Vec::new();
    for (_, load) in day_loads.into_iter().sorted_by_key(|(day, _)| *day) {
        let excess = problem.add(variable().min(0.0));
        objective += OVERLOAD_WEIGHT * excess;
        excess_vars.push((excess, load));
    }

    let mut model = problem
        .minimise(objective)
        .using(default_solver)
        .set_option("output_flag", false)
        .set_option("threads", 1)
        .set_option("random_seed", SOLVER_SEED)
        .set_option("time_limit", options.wall_clock_seconds);

    // Exactly one start per session.
    for session in &sessions {
        let chosen: Expression = session.candidates.iter().map(|(_, var)| *var).sum();
        model.add_constraint(constraint!(chosen == 1));
    }

    // No two sessions may cover the same slot (fixed intervals are already
    // carved out of the candidate sets).
    let mut occupancy: HashMap<i64, Vec<Variable>> = HashMap::new();
    for session in &sessions {
        for (slot, var) in &session.candidates {
            for covered in *slot..*slot + session.dur_slots {
                occupancy.entry(covered).or_default().push(*var);
            }
        }
    }
    for (_, vars) in occupancy.into_iter().sorted_by_key(|(slot, _)| *slot) {
        if vars.len() >= 2 {
            let used: Expression = vars.into_iter().sum();
            model.add_constraint(constraint!(used <= 1));
        }
    }

    // Ordered spacing between sessions of the same task.
    let min_gap = options.min_gap_slots as f64;
    for (prev, next) in sessions.iter().tuple_windows() {
        if prev.task.id == next.task.id && prev.task.kind == next.task.kind {
            let spacing = next.start_expr() - prev.start_expr() - prev.dur_slots as f64 - min_gap;
            model.add_constraint(constraint!(spacing >= 0));
        }
    }

    // Dependencies: every session of the dependent task starts strictly
    // after every session of its prerequisite.
    for dependent in &sessions {
        for dep_id in &dependent.task.dependencies {
            for prerequisite in &sessions {
                if prerequisite.task.kind == TaskKind::Flexible && prerequisite.task.id == *dep_id {
                    let ordering = dependent.start_expr() - prerequisite.start_expr() - 1.0;
                    model.add_constraint(constraint!(ordering >= 0));
                }
            }
        }
    }

    for (excess, load) in &excess_vars {
        let slack = Expression::from(*excess) - load.clone() + cap_slots;
        model.add_constraint(constraint!(slack >= 0));
    }

    let solution = model.solve().map_err(|err| match err {
        good_lp::ResolutionError::Infeasible => PassError::Infeasible,
        other => {
            let message = other.to_string();
            if message.to_lowercase().contains("time") {
                PassError::Timeout
            } else {
                PassError::Internal(message)
            }
        }
    })?;

    let mut placed = Vec::with_capacity(sessions.len());
    for session in &sessions {
        let slot = session
            .candidates
            .iter()
            .find(|(_, var)| solution.value(*var) > 0.5)
            .map(|(slot, _)| *slot)
            .ok_or_else(|| PassError::Internal("solution left a session unplaced".into()))?;
        let start = grid.time_of(slot);
        placed.push(ScheduledSession {
            task_id: session.task.id,
            kind: session.task.kind,
            session_ref: session.task.session_ref,
            session_index: session.session_index,
            start,
            end: start + Duration::minutes(session.dur_slots * SLOT_MINUTES),
            priority: session.task.priority,
        });
    }
    placed.sort_by_key(|s| (s.start, s.task_id, s.session_index));
    Ok(placed)
}

fn candidate_fits(
    grid: &Grid,
    blocked: &BTreeSet<i64>,
    options: &SolverOptions,
    task: &FlexInput,
    slot: i64,
    dur_slots: i64,
    block_night: bool,
) -> bool {
    if let Some(allowed) = &task.allowed_weekdays {
        let weekday = timegrid::weekday_index(grid.time_of(slot));
        if !allowed.contains(&weekday) {
            return false;
        }
    }
    for covered in slot..slot + dur_slots {
        if blocked.contains(&covered) {
            return false;
        }
        if block_night && is_night(grid.time_of(covered).hour(), options) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn options() -> SolverOptions {
        SolverOptions {
            wall_clock_seconds: 10.0,
            night_start_hour: 23,
            night_end_hour: 8,
            max_hours_per_day: 6,
            min_gap_slots: 2,
        }
    }

    fn monday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
    }

    fn flex(id: i64, total_hours: f64, priority: i64) -> FlexInput {
        FlexInput {
            id,
            kind: TaskKind::Flexible,
            session_ref: None,
            total_hours,
            session_hours: 1.0,
            start_date: Some(monday()),
            end_date: Some(monday() + Duration::days(7)),
            priority,
            weight: priority,
            dependencies: Vec::new(),
            allowed_weekdays: None,
        }
    }

    fn assert_no_overlap(sessions: &[ScheduledSession], fixed: &[FixedInput]) {
        for (i, a) in sessions.iter().enumerate() {
            for b in &sessions[i + 1..] {
                assert!(
                    a.end <= b.start || b.end <= a.start,
                    "sessions overlap: {:?} vs {:?}",
                    a,
                    b
                );
            }
            for f in fixed {
                assert!(
                    a.end <= f.start || f.end <= a.start,
                    "session {:?} overlaps fixed {:?}",
                    a,
                    f
                );
            }
        }
    }

    #[test]
    fn empty_task_set_returns_empty_schedule() {
        let outcome = solve(monday(), &[], &[], &options(), &CancellationToken::new()).unwrap();
        assert!(outcome.sessions.is_empty());
        assert_eq!(outcome.status, SolverStatus::Feasible);
    }

    #[test]
    fn single_flexible_task_gets_spaced_daytime_sessions() {
        let tasks = vec![flex(1, 3.0, 3)];
        let outcome = solve(monday(), &[], &tasks, &options(), &CancellationToken::new()).unwrap();
        assert_eq!(outcome.status, SolverStatus::Feasible);
        assert_eq!(outcome.sessions.len(), 3);
        assert_no_overlap(&outcome.sessions, &[]);

        let mut starts: Vec<_> = outcome.sessions.iter().map(|s| s.start).collect();
        starts.sort();
        for s in &outcome.sessions {
            let hour = s.start.hour();
            assert!((8..=22).contains(&hour), "night start at {}", s.start);
            assert!(s.start >= monday());
            assert!(s.end <= monday() + Duration::days(7));
        }
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::hours(2));
        }
    }

    #[test]
    fn sessions_avoid_fixed_lecture() {
        let fixed = vec![FixedInput {
            id: 100,
            start: Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, 3, 11, 15, 0).unwrap(),
            priority: 1,
        }];
        let mut task = flex(1, 1.0, 3);
        task.end_date = Some(monday() + Duration::days(1));
        let outcome = solve(
            monday(),
            &fixed,
            &[task],
            &options(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(outcome.sessions.len(), 1);
        assert_no_overlap(&outcome.sessions, &fixed);
        // Full-slot rasterization: 10:00..11:30 is off limits.
        let s = &outcome.sessions[0];
        assert!(
            s.end <= fixed[0].start || s.start >= Utc.with_ymd_and_hms(2024, 6, 3, 11, 30, 0).unwrap()
        );
    }

    #[test]
    fn night_ban_relaxes_when_day_is_fully_booked() {
        let fixed = vec![FixedInput {
            id: 100,
            start: Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, 3, 23, 0, 0).unwrap(),
            priority: 1,
        }];
        let mut task = flex(1, 1.0, 3);
        task.end_date = Some(monday() + Duration::days(1));
        let outcome = solve(
            monday(),
            &fixed,
            &[task],
            &options(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(outcome.status, SolverStatus::FeasibleRelaxed);
        assert_eq!(outcome.sessions.len(), 1);
        let hour = outcome.sessions[0].start.hour();
        assert!(hour >= 23 || hour < 8, "expected a night slot, got {}", hour);
        assert_no_overlap(&outcome.sessions, &fixed);
    }

    #[test]
    fn empty_window_fails_fast_with_no_window() {
        let mut task = flex(1, 1.0, 3);
        task.start_date = Some(monday() + Duration::days(3));
        task.end_date = Some(monday() + Duration::days(2));
        let err = solve(
            monday(),
            &[],
            &[task],
            &options(),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::NoWindow);
    }

    #[test]
    fn dependencies_schedule_strictly_after() {
        let mut a = flex(1, 1.0, 3);
        a.end_date = Some(monday() + Duration::days(7));
        let mut b = flex(2, 2.0, 3);
        b.dependencies = vec![1];
        let outcome = solve(
            monday(),
            &[],
            &[a, b],
            &options(),
            &CancellationToken::new(),
        )
        .unwrap();
        let a_latest = outcome
            .sessions
            .iter()
            .filter(|s| s.task_id == 1)
            .map(|s| s.start)
            .max()
            .unwrap();
        for s in outcome.sessions.iter().filter(|s| s.task_id == 2) {
            assert!(s.start > a_latest);
        }
    }

    #[test]
    fn higher_weight_task_starts_no_later() {
        let mut academic = flex(10, 2.0, 3);
        academic.kind = TaskKind::Academic;
        academic.session_ref = Some(1);
        academic.weight = 8;
        let low = flex(20, 2.0, 3);
        let outcome = solve(
            monday(),
            &[],
            &[low.clone(), academic.clone()],
            &options(),
            &CancellationToken::new(),
        )
        .unwrap();
        let first = |task_id: i64| {
            outcome
                .sessions
                .iter()
                .filter(|s| s.task_id == task_id)
                .map(|s| s.start)
                .min()
                .unwrap()
        };
        assert!(first(10) <= first(20));
    }

    #[test]
    fn identical_inputs_solve_identically() {
        let fixed = vec![FixedInput {
            id: 100,
            start: Utc.with_ymd_and_hms(2024, 6, 4, 9, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, 4, 12, 0, 0).unwrap(),
            priority: 1,
        }];
        let tasks = vec![flex(1, 3.0, 3), flex(2, 2.0, 4)];
        let a = solve(monday(), &fixed, &tasks, &options(), &CancellationToken::new()).unwrap();
        let b = solve(monday(), &fixed, &tasks, &options(), &CancellationToken::new()).unwrap();
        assert_eq!(a.sessions, b.sessions);
    }

    #[test]
    fn cancellation_aborts_before_solving() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = solve(monday(), &[], &[flex(1, 1.0, 3)], &options(), &cancel).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::SolverAborted);
    }

    #[test]
    fn allowed_weekdays_restrict_placement() {
        let mut task = flex(1, 2.0, 3);
        task.allowed_weekdays = Some(vec![2]); // Wednesdays only
        let outcome = solve(monday(), &[], &[task], &options(), &CancellationToken::new()).unwrap();
        for s in &outcome.sessions {
            assert_eq!(timegrid::weekday_index(s.start), 2);
        }
    }
}
