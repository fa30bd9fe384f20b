use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// Width of one scheduling slot.
pub const SLOT_MINUTES: i64 = 30;

/// Horizon used when a task carries no end date of its own.
pub const DEFAULT_HORIZON_DAYS: i64 = 14;

/// Full weekday names, Monday first. Slot keys and day multipliers are
/// keyed by these names everywhere.
pub const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Catalog day-letter encoding, index-aligned with [`WEEKDAY_NAMES`].
pub const DAY_LETTERS: [char; 7] = ['M', 'T', 'W', 'R', 'F', 'S', 'U'];

/// Uniform slot grid: `count` instants starting at `start`, stepping
/// `slot_minutes`.
pub fn slots(start: DateTime<Utc>, horizon_hours: i64, slot_minutes: i64) -> Vec<DateTime<Utc>> {
    let count = (horizon_hours * 60) / slot_minutes;
    (0..count)
        .map(|i| start + Duration::minutes(i * slot_minutes))
        .collect()
}

/// Index of `instant` on a grid anchored at `grid_start` (floor division;
/// instants inside a slot map to that slot).
pub fn slot_index(grid_start: DateTime<Utc>, instant: DateTime<Utc>, slot_minutes: i64) -> i64 {
    (instant - grid_start).num_minutes().div_euclid(slot_minutes)
}

/// Weekday index with Monday = 0.
pub fn weekday_index(instant: DateTime<Utc>) -> u32 {
    instant.weekday().num_days_from_monday()
}

pub fn weekday_name(instant: DateTime<Utc>) -> &'static str {
    WEEKDAY_NAMES[weekday_index(instant) as usize]
}

/// "Weekday-Hour" key used by slot weights and retention maps.
pub fn slot_key(day: &str, hour: u32) -> String {
    format!("{}-{}", day, hour)
}

pub fn slot_key_for(instant: DateTime<Utc>) -> String {
    slot_key(weekday_name(instant), instant.hour())
}

/// Weekday index for a full weekday name.
pub fn weekday_from_name(name: &str) -> Option<u32> {
    WEEKDAY_NAMES
        .iter()
        .position(|candidate| *candidate == name)
        .map(|i| i as u32)
}

/// Expands a compact day pattern ("MWF") into weekday indices. Unknown
/// letters are reported back to the caller.
pub fn expand_day_letters(pattern: &str) -> Result<Vec<u32>, char> {
    pattern
        .chars()
        .map(|letter| {
            DAY_LETTERS
                .iter()
                .position(|candidate| *candidate == letter)
                .map(|i| i as u32)
                .ok_or(letter)
        })
        .collect()
}

/// Compact letter for a weekday index.
pub fn day_letter(weekday: u32) -> char {
    DAY_LETTERS[weekday as usize % 7]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slot_index_inverts_slots() {
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let grid = slots(start, 24 * DEFAULT_HORIZON_DAYS, SLOT_MINUTES);
        assert_eq!(grid.len(), (24 * 14 * 60 / SLOT_MINUTES) as usize);
        for (i, instant) in grid.iter().enumerate().step_by(37) {
            assert_eq!(slot_index(start, *instant, SLOT_MINUTES), i as i64);
        }
    }

    #[test]
    fn instants_inside_a_slot_map_to_it() {
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let inside = Utc.with_ymd_and_hms(2024, 6, 3, 0, 29, 59).unwrap();
        assert_eq!(slot_index(start, inside, SLOT_MINUTES), 0);
        let next = Utc.with_ymd_and_hms(2024, 6, 3, 0, 30, 0).unwrap();
        assert_eq!(slot_index(start, next, SLOT_MINUTES), 1);
    }

    #[test]
    fn monday_is_weekday_zero() {
        // 2024-06-03 is a Monday.
        let monday = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        assert_eq!(weekday_index(monday), 0);
        assert_eq!(weekday_name(monday), "Monday");
        assert_eq!(slot_key_for(monday), "Monday-12");
    }

    #[test]
    fn day_letters_expand_and_reverse() {
        assert_eq!(expand_day_letters("MWF").unwrap(), vec![0, 2, 4]);
        assert_eq!(expand_day_letters("TRU").unwrap(), vec![1, 3, 6]);
        assert_eq!(expand_day_letters("MXF").unwrap_err(), 'X');
        for i in 0..7 {
            let letter = day_letter(i);
            assert_eq!(expand_day_letters(&letter.to_string()).unwrap(), vec![i]);
        }
    }

    #[test]
    fn weekday_names_map_back_to_indices() {
        for (i, name) in WEEKDAY_NAMES.iter().enumerate() {
            assert_eq!(weekday_from_name(name), Some(i as u32));
        }
        assert_eq!(weekday_from_name("Funday"), None);
    }
}
