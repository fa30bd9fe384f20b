pub mod coordinator;
pub mod normalize;
pub mod recurrence;
pub mod solver;
pub mod timegrid;
