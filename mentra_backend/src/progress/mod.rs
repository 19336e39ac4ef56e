//! EXP, levels and day streaks.
//!
//! The pure rules live in [`leveling`] and [`streak`]; [`ProgressService`]
//! runs them against the database and announces the results.

pub mod leveling;
pub mod streak;

use anyhow::Result;
use std::sync::Arc;

use crate::clock::Clock;
use crate::database::MentraDatabase;
use crate::events::{publish, AppEvent, EventSender};
use crate::models::{ExpLogEntry, Streak, UserProgress};

use leveling::{ExpChange, ExpProvenance};
use streak::StreakChange;

pub const DEFAULT_EXP_HISTORY_LIMIT: usize = 20;

#[derive(Clone)]
pub struct ProgressService {
    db: Arc<MentraDatabase>,
    clock: Arc<dyn Clock>,
    events: EventSender,
}

impl ProgressService {
    pub fn new(db: Arc<MentraDatabase>, clock: Arc<dyn Clock>, events: EventSender) -> Self {
        Self { db, clock, events }
    }

    pub fn award_exp(
        &self,
        amount: i64,
        provenance: ExpProvenance,
    ) -> Result<(UserProgress, ExpLogEntry)> {
        let user_id = provenance.user_id.clone();
        let (change, entry) = self
            .db
            .apply_exp_change(&user_id, |progress| leveling::award(progress, amount, provenance))?;
        self.announce(&user_id, &change, &entry);
        Ok((change.progress, entry))
    }

    pub fn deduct_exp(
        &self,
        amount: i64,
        provenance: ExpProvenance,
    ) -> Result<(UserProgress, ExpLogEntry)> {
        let user_id = provenance.user_id.clone();
        let (change, entry) = self
            .db
            .apply_exp_change(&user_id, |progress| leveling::deduct(progress, amount, provenance))?;
        self.announce(&user_id, &change, &entry);
        Ok((change.progress, entry))
    }

    /// Counts today (per the injected clock) as an active day.
    pub fn record_activity(&self, user_id: &str) -> Result<Streak> {
        let today = self.clock.today();
        let (streak, change) = self
            .db
            .update_streak(user_id, |current| streak::record_activity(current, today))?;

        if change != StreakChange::Unchanged {
            tracing::debug!(
                "Streak for {} {:?}: current={} longest={}",
                user_id,
                change,
                streak.current_streak,
                streak.longest_streak
            );
            publish(
                &self.events,
                AppEvent::StreakChanged {
                    user_id: user_id.to_string(),
                    change,
                    streak,
                },
            );
        }
        Ok(streak)
    }

    pub fn streak(&self, user_id: &str) -> Result<Streak> {
        Ok(self.db.get_streak(user_id)?.unwrap_or_default())
    }

    pub fn exp_history(&self, user_id: &str, limit: usize) -> Result<Vec<ExpLogEntry>> {
        self.db.list_exp_logs(user_id, limit)
    }

    fn announce(&self, user_id: &str, change: &ExpChange, entry: &ExpLogEntry) {
        tracing::debug!(
            "EXP {:+} ({}) for {}: level {} ({}/{}), total {}",
            entry.amount,
            entry.source.as_db_str(),
            user_id,
            change.progress.level,
            change.progress.current_exp,
            change.progress.exp_to_next_level(),
            change.progress.total_exp
        );
        if change.levels_gained > 0 {
            tracing::info!("User {} reached level {}", user_id, change.progress.level);
        }
        publish(
            &self.events,
            AppEvent::ExpChanged {
                user_id: user_id.to_string(),
                amount: entry.amount,
                source: entry.source,
                progress: change.progress,
                levels_gained: change.levels_gained,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{EntityRef, ExpSource};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        clock: Arc<FixedClock>,
        events: flume::Receiver<AppEvent>,
        service: ProgressService,
        user_id: String,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(MentraDatabase::new(dir.path().join("mentra.db")).expect("db"));
        let user_id = db.create_user("Ana").expect("user").id;
        let clock = Arc::new(FixedClock::at_date(
            NaiveDate::from_ymd_opt(2026, 4, 6).unwrap(),
        ));
        let (tx, rx) = flume::unbounded();
        let service = ProgressService::new(db, clock.clone(), tx);
        Harness {
            _dir: dir,
            clock,
            events: rx,
            service,
            user_id,
        }
    }

    fn provenance(user_id: &str, source: ExpSource) -> ExpProvenance {
        ExpProvenance::new(user_id, source, EntityRef::new("task", "t1"))
    }

    #[test]
    fn award_then_deduct_persists_and_logs_both_entries() {
        let h = harness();
        let (after_award, _) = h
            .service
            .award_exp(250, provenance(&h.user_id, ExpSource::Task))
            .expect("award");
        assert_eq!(after_award.level, 3);
        assert_eq!(after_award.current_exp, 50);

        let (after_deduct, entry) = h
            .service
            .deduct_exp(250, provenance(&h.user_id, ExpSource::TaskUncomplete))
            .expect("deduct");
        assert_eq!(entry.amount, -250);
        assert_eq!(after_deduct.total_exp, 0);

        let history = h
            .service
            .exp_history(&h.user_id, DEFAULT_EXP_HISTORY_LIMIT)
            .expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].source, ExpSource::TaskUncomplete);
        assert_eq!(history[1].amount, 250);
    }

    #[test]
    fn award_publishes_exp_changed() {
        let h = harness();
        h.service
            .award_exp(120, provenance(&h.user_id, ExpSource::Pomodoro))
            .expect("award");

        match h.events.try_recv().expect("event") {
            AppEvent::ExpChanged {
                amount,
                levels_gained,
                progress,
                ..
            } => {
                assert_eq!(amount, 120);
                assert_eq!(levels_gained, 1);
                assert_eq!(progress.level, 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn rejected_amount_publishes_nothing() {
        let h = harness();
        assert!(h
            .service
            .award_exp(0, provenance(&h.user_id, ExpSource::Bonus))
            .is_err());
        assert!(h.events.try_recv().is_err());
    }

    #[test]
    fn streak_follows_the_injected_clock() {
        let h = harness();
        assert_eq!(h.service.streak(&h.user_id).expect("streak"), Streak::default());

        h.service.record_activity(&h.user_id).expect("day one");
        h.service.record_activity(&h.user_id).expect("same day");
        h.clock.advance_days(1);
        let streak = h.service.record_activity(&h.user_id).expect("day two");
        assert_eq!(streak.current_streak, 2);

        h.clock.advance_days(3);
        let streak = h.service.record_activity(&h.user_id).expect("after gap");
        assert_eq!(streak.current_streak, 1);
        assert_eq!(streak.longest_streak, 2);

        // Started, Extended, Reset; the same-day call is silent.
        let changes: Vec<StreakChange> = h
            .events
            .try_iter()
            .filter_map(|event| match event {
                AppEvent::StreakChanged { change, .. } => Some(change),
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![StreakChange::Started, StreakChange::Extended, StreakChange::Reset]
        );
    }
}
