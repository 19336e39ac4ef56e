use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::Streak;

/// How a `record_activity` call moved the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakChange {
    /// First recorded activity for this user.
    Started,
    /// Activity on the day after the previous one.
    Extended,
    /// Already counted today.
    Unchanged,
    /// A day was missed (or the date went backwards); counting restarts at 1.
    Reset,
}

/// Applies one day of activity to `streak`.
///
/// Idempotent within a calendar day. There is no inverse: undoing an
/// activity never shortens a streak.
pub fn record_activity(streak: Streak, today: NaiveDate) -> (Streak, StreakChange) {
    let Some(last) = streak.last_activity_date else {
        let next = Streak {
            current_streak: 1,
            longest_streak: streak.longest_streak.max(1),
            last_activity_date: Some(today),
        };
        return (next, StreakChange::Started);
    };

    if last == today {
        return (streak, StreakChange::Unchanged);
    }

    let (current_streak, change) = if last + Duration::days(1) == today {
        (streak.current_streak + 1, StreakChange::Extended)
    } else {
        (1, StreakChange::Reset)
    };

    let next = Streak {
        current_streak,
        longest_streak: streak.longest_streak.max(current_streak),
        last_activity_date: Some(today),
    };
    (next, change)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn first_activity_starts_at_one() {
        let (streak, change) = record_activity(Streak::default(), day(1));
        assert_eq!(change, StreakChange::Started);
        assert_eq!(streak.current_streak, 1);
        assert_eq!(streak.longest_streak, 1);
        assert_eq!(streak.last_activity_date, Some(day(1)));
    }

    #[test]
    fn consecutive_days_count_up() {
        let mut streak = Streak::default();
        for d in 1..=3 {
            streak = record_activity(streak, day(d)).0;
        }
        assert_eq!(streak.current_streak, 3);
        assert_eq!(streak.longest_streak, 3);
    }

    #[test]
    fn same_day_is_a_no_op() {
        let (first, _) = record_activity(Streak::default(), day(4));
        let (second, change) = record_activity(first, day(4));
        assert_eq!(change, StreakChange::Unchanged);
        assert_eq!(first, second);
    }

    #[test]
    fn gap_resets_but_keeps_longest() {
        let mut streak = Streak::default();
        for d in 1..=3 {
            streak = record_activity(streak, day(d)).0;
        }
        let (after_gap, change) = record_activity(streak, day(6));
        assert_eq!(change, StreakChange::Reset);
        assert_eq!(after_gap.current_streak, 1);
        assert_eq!(after_gap.longest_streak, 3);
        assert_eq!(after_gap.last_activity_date, Some(day(6)));
    }

    #[test]
    fn backwards_clock_resets() {
        let (streak, _) = record_activity(Streak::default(), day(10));
        let (streak, _) = record_activity(streak, day(11));
        let (rewound, change) = record_activity(streak, day(9));
        assert_eq!(change, StreakChange::Reset);
        assert_eq!(rewound.current_streak, 1);
        assert_eq!(rewound.longest_streak, 2);
    }

    #[test]
    fn restart_after_history_keeps_longest() {
        // A row with history but no date (e.g. migrated data) still starts at 1.
        let seeded = Streak {
            current_streak: 0,
            longest_streak: 12,
            last_activity_date: None,
        };
        let (streak, change) = record_activity(seeded, day(1));
        assert_eq!(change, StreakChange::Started);
        assert_eq!(streak.longest_streak, 12);
    }

    #[test]
    fn longest_never_decreases() {
        let days = [1, 2, 3, 5, 5, 6, 9, 10, 11, 12, 20, 21];
        let mut streak = Streak::default();
        let mut previous_longest = 0;
        for d in days {
            streak = record_activity(streak, day(d)).0;
            assert!(streak.longest_streak >= previous_longest);
            assert!(streak.longest_streak >= streak.current_streak);
            previous_longest = streak.longest_streak;
        }
        assert_eq!(streak.longest_streak, 4);
        assert_eq!(streak.current_streak, 2);
    }
}
