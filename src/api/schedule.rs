pub use crate::scheduler::coordinator::{reschedule, RescheduleOutcome, RescheduleRequest};
pub use crate::scheduler::solver::SolverStatus;
