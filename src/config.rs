use std::env;

/// Runtime configuration, read once from the environment at startup.
///
/// `dotenvy` is consulted first so a local `.env` file works in
/// development; every knob has a default matching the documented contract.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Solver wall-clock budget in seconds.
    pub solver_wall_clock_seconds: f64,
    /// First night hour (inclusive), e.g. 23 blocks [23:00, 24:00).
    pub night_start_hour: u32,
    /// Hour the night ends (exclusive), e.g. 8 blocks [00:00, 08:00).
    pub night_end_hour: u32,
    /// Soft cap on scheduled hours per day.
    pub max_hours_per_day: u32,
    /// Minimum gap between sessions of the same task, in grid slots.
    pub min_gap_slots: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            solver_wall_clock_seconds: 10.0,
            night_start_hour: 23,
            night_end_hour: 8,
            max_hours_per_day: 6,
            min_gap_slots: 1,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Config::default();
        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            solver_wall_clock_seconds: parse_var(
                "SOLVER_WALL_CLOCK_SECONDS",
                defaults.solver_wall_clock_seconds,
            ),
            night_start_hour: parse_var("NIGHT_START_HOUR", defaults.night_start_hour),
            night_end_hour: parse_var("NIGHT_END_HOUR", defaults.night_end_hour),
            max_hours_per_day: parse_var("MAX_HOURS_PER_DAY", defaults.max_hours_per_day),
            min_gap_slots: parse_var("MIN_GAP_SLOTS", defaults.min_gap_slots),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("ignoring unparseable {}={:?}", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.solver_wall_clock_seconds, 10.0);
        assert_eq!(cfg.night_start_hour, 23);
        assert_eq!(cfg.night_end_hour, 8);
        assert_eq!(cfg.max_hours_per_day, 6);
        assert_eq!(cfg.min_gap_slots, 1);
    }
}
