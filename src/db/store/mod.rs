//! Typed persistence operations, one module per entity family.
//!
//! Every function borrows a sqlx executor, so callers decide whether an
//! operation runs on the pool directly or inside a transaction they own.

pub mod behavior;
pub mod courses;
pub mod events;
pub mod obligations;
pub mod students;
pub mod tasks;
