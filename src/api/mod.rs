//! Programmatic operations, one module per domain. These are the
//! entry points an HTTP facade or chat tool layer would forward to; the
//! core itself never speaks a wire protocol.

pub mod behavior;
pub mod courses;
pub mod events;
pub mod obligations;
pub mod schedule;
pub mod students;
pub mod tasks;
