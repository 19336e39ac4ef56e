use anyhow::Result;

use crate::error::DomainError;
use crate::models::{EntityRef, ExpSource, NewExpLog, UserProgress};

/// EXP needed inside `level` before the next level-up.
pub fn exp_to_next_level(level: i64) -> i64 {
    level * 100
}

/// Where an EXP change came from; copied onto the ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpProvenance {
    pub user_id: String,
    pub source: ExpSource,
    pub description: Option<String>,
    pub entity: EntityRef,
}

impl ExpProvenance {
    pub fn new(user_id: &str, source: ExpSource, entity: EntityRef) -> Self {
        Self {
            user_id: user_id.to_string(),
            source,
            description: None,
            entity,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Outcome of one award or deduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpChange {
    pub progress: UserProgress,
    /// Levels crossed; negative when a deduction rolled a level back.
    pub levels_gained: i64,
    pub entry: NewExpLog,
}

/// Adds `amount` EXP, rolling over as many level boundaries as it covers.
pub fn award(progress: UserProgress, amount: i64, provenance: ExpProvenance) -> Result<ExpChange> {
    ensure_positive(amount)?;

    let mut next = progress;
    next.total_exp += amount;
    next.current_exp += amount;

    while next.current_exp >= exp_to_next_level(next.level) {
        next.current_exp -= exp_to_next_level(next.level);
        next.level += 1;
    }

    Ok(ExpChange {
        levels_gained: next.level - progress.level,
        progress: next,
        entry: ledger_entry(amount, provenance),
    })
}

/// Removes `amount` EXP.
///
/// `total_exp` and `current_exp` are each clamped at zero on their own, so
/// they can drift apart once the total hits its floor. When the deduction
/// runs past the start of the current level, exactly one level is given
/// back and the shortfall is borrowed from that level's capacity; larger
/// deductions do not cascade further.
pub fn deduct(progress: UserProgress, amount: i64, provenance: ExpProvenance) -> Result<ExpChange> {
    ensure_positive(amount)?;

    let mut next = progress;
    let unclamped_current = progress.current_exp - amount;
    next.total_exp = (progress.total_exp - amount).max(0);
    next.current_exp = unclamped_current.max(0);

    if unclamped_current < 0 && next.level > 1 {
        next.level -= 1;
        next.current_exp = (exp_to_next_level(next.level) + unclamped_current).max(0);
    }

    Ok(ExpChange {
        levels_gained: next.level - progress.level,
        progress: next,
        entry: ledger_entry(-amount, provenance),
    })
}

fn ensure_positive(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(DomainError::NonPositiveAmount { amount }.into());
    }
    Ok(())
}

fn ledger_entry(amount: i64, provenance: ExpProvenance) -> NewExpLog {
    NewExpLog {
        user_id: provenance.user_id,
        amount,
        source: provenance.source,
        description: provenance.description,
        entity: provenance.entity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::domain_error;

    fn provenance(source: ExpSource) -> ExpProvenance {
        ExpProvenance::new("user-1", source, EntityRef::new("task", "task-1"))
    }

    fn state(level: i64, current_exp: i64, total_exp: i64) -> UserProgress {
        UserProgress {
            level,
            current_exp,
            total_exp,
        }
    }

    #[test]
    fn award_crosses_several_levels_in_one_call() {
        let change = award(state(1, 90, 90), 250, provenance(ExpSource::Task)).unwrap();
        assert_eq!(change.progress, state(4, 40, 340));
        assert_eq!(change.levels_gained, 3);
        assert_eq!(change.entry.amount, 250);
        assert_eq!(change.entry.source, ExpSource::Task);
    }

    #[test]
    fn award_keeps_current_below_threshold_and_adds_to_total() {
        let starts = [
            state(1, 0, 0),
            state(1, 99, 99),
            state(3, 250, 550),
            state(7, 0, 2100),
        ];
        for start in starts {
            for amount in [1, 7, 99, 100, 101, 299, 1000] {
                let after = award(start, amount, provenance(ExpSource::Bonus))
                    .unwrap()
                    .progress;
                assert!(
                    after.current_exp < after.level * 100,
                    "{:?} + {} -> {:?}",
                    start,
                    amount,
                    after
                );
                assert_eq!(after.total_exp, start.total_exp + amount);
                assert!(after.level >= start.level);
            }
        }
    }

    #[test]
    fn award_exactly_at_threshold_levels_up_with_zero_remainder() {
        let change = award(state(2, 150, 250), 50, provenance(ExpSource::Pomodoro)).unwrap();
        assert_eq!(change.progress, state(3, 0, 300));
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        for amount in [0, -5] {
            let error = award(state(1, 0, 0), amount, provenance(ExpSource::Task)).unwrap_err();
            assert_eq!(
                domain_error(&error),
                Some(&DomainError::NonPositiveAmount { amount })
            );
            assert!(deduct(state(1, 0, 0), amount, provenance(ExpSource::TaskUncomplete)).is_err());
        }
    }

    #[test]
    fn deduct_within_level_only_subtracts() {
        let change = deduct(state(2, 60, 160), 15, provenance(ExpSource::TaskUncomplete)).unwrap();
        assert_eq!(change.progress, state(2, 45, 145));
        assert_eq!(change.levels_gained, 0);
        assert_eq!(change.entry.amount, -15);
        assert_eq!(change.entry.source, ExpSource::TaskUncomplete);
    }

    #[test]
    fn deduct_after_award_restores_total() {
        for (start, amount) in [
            (state(1, 90, 90), 20),
            (state(1, 90, 90), 250),
            (state(4, 10, 610), 5),
            (state(2, 0, 100), 100),
        ] {
            let awarded = award(start, amount, provenance(ExpSource::Task)).unwrap().progress;
            let restored = deduct(awarded, amount, provenance(ExpSource::TaskUncomplete))
                .unwrap()
                .progress;
            assert_eq!(restored.total_exp, start.total_exp);
        }
    }

    #[test]
    fn deduct_across_one_boundary_borrows_from_previous_level() {
        // Level 1 with 90 EXP, +20 -> level 2 with 10. Taking the 20 back
        // returns to level 1 with 90.
        let awarded = award(state(1, 90, 90), 20, provenance(ExpSource::Task)).unwrap().progress;
        assert_eq!(awarded, state(2, 10, 110));
        let change = deduct(awarded, 20, provenance(ExpSource::TaskUncomplete)).unwrap();
        assert_eq!(change.progress, state(1, 90, 90));
        assert_eq!(change.levels_gained, -1);
    }

    #[test]
    fn deduct_rolls_back_at_most_one_level() {
        // 240 below the start of level 4 would cross two boundaries; only one is undone.
        let change = deduct(state(4, 40, 640), 280, provenance(ExpSource::ScheduleUncomplete)).unwrap();
        assert_eq!(change.progress.level, 3);
        assert_eq!(change.progress.current_exp, 60);
        assert_eq!(change.progress.total_exp, 360);

        let deep = deduct(state(3, 10, 310), 500, provenance(ExpSource::TaskUncomplete)).unwrap();
        assert_eq!(deep.progress, state(2, 0, 0));
    }

    #[test]
    fn deduct_at_level_one_clamps_both_counters_independently() {
        let change = deduct(state(1, 30, 20), 25, provenance(ExpSource::TaskUncomplete)).unwrap();
        assert_eq!(change.progress, state(1, 5, 0));

        let floor = deduct(state(1, 10, 10), 50, provenance(ExpSource::TaskUncomplete)).unwrap();
        assert_eq!(floor.progress, state(1, 0, 0));
    }

    #[test]
    fn provenance_description_lands_on_entry() {
        let prov = provenance(ExpSource::Schedule).with_description("Completed schedule: Stretch");
        let change = award(UserProgress::default(), 5, prov).unwrap();
        assert_eq!(
            change.entry.description.as_deref(),
            Some("Completed schedule: Stretch")
        );
        assert_eq!(change.entry.entity, EntityRef::new("task", "task-1"));
        assert_eq!(change.entry.user_id, "user-1");
    }
}
