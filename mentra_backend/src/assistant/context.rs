//! Read-only aggregation of a user's productivity state.
//!
//! Every field of [`ProductivitySnapshot`] gets its default where it is
//! computed, so rendering and the advice generator never have to guess.

use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::{week_bounds, Clock};
use crate::database::MentraDatabase;
use crate::models::{MoodEntry, Schedule, Task, TaskStatus};

pub const PENDING_LIST_LIMIT: usize = 10;
pub const MOOD_TREND_LIMIT: usize = 7;
const PATTERN_WINDOW_DAYS: i64 = 7;

pub const NONE_TEXT: &str = "None";
pub const MOOD_NOT_LOGGED: &str = "Not logged yet";
pub const NO_DATA: &str = "No data";
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileContext {
    pub name: String,
    pub level: i64,
    pub total_exp: i64,
    pub current_exp: i64,
    pub exp_to_next_level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub pending_count: i64,
    pub in_progress_count: i64,
    pub completed_today: i64,
    pub completed_total: i64,
    pub overdue_count: i64,
    pub pending_list: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PomodoroContext {
    pub today_sessions: i64,
    pub today_minutes: i64,
    pub week_sessions: i64,
    pub total_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleContext {
    pub active_count: i64,
    pub completed_today: i64,
    pub pending_today: i64,
    pub routine_list: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodContext {
    pub today: String,
    pub recent_trend: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakContext {
    pub current: i64,
    pub longest: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternContext {
    pub tasks_completed_7d: i64,
    pub focus_sessions_7d: i64,
    pub avg_energy_7d: Option<f64>,
    pub summary: String,
}

/// Everything the assistant knows about a user at the moment of a chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductivitySnapshot {
    pub user_profile: ProfileContext,
    pub tasks: TaskContext,
    pub pomodoro: PomodoroContext,
    pub schedules: ScheduleContext,
    pub mood: MoodContext,
    pub streak: StreakContext,
    pub patterns: PatternContext,
}

#[derive(Clone)]
pub struct ContextBuilder {
    db: Arc<MentraDatabase>,
    clock: Arc<dyn Clock>,
}

impl ContextBuilder {
    pub fn new(db: Arc<MentraDatabase>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn build(&self, user_id: &str) -> Result<ProductivitySnapshot> {
        Ok(ProductivitySnapshot {
            user_profile: self.profile(user_id)?,
            tasks: self.tasks(user_id)?,
            pomodoro: self.pomodoro(user_id)?,
            schedules: self.schedules(user_id)?,
            mood: self.mood(user_id)?,
            streak: self.streak(user_id)?,
            patterns: self.patterns(user_id)?,
        })
    }

    fn profile(&self, user_id: &str) -> Result<ProfileContext> {
        let user = self.db.require_user(user_id)?;
        Ok(ProfileContext {
            name: single_line(&user.name),
            level: user.progress.level,
            total_exp: user.progress.total_exp,
            current_exp: user.progress.current_exp,
            exp_to_next_level: user.progress.exp_to_next_level(),
        })
    }

    fn tasks(&self, user_id: &str) -> Result<TaskContext> {
        let today = self.clock.today();
        let open = self
            .db
            .list_open_tasks_by_priority(user_id, PENDING_LIST_LIMIT)?;
        Ok(TaskContext {
            pending_count: self.db.count_tasks_with_status(user_id, TaskStatus::Pending)?,
            in_progress_count: self
                .db
                .count_tasks_with_status(user_id, TaskStatus::InProgress)?,
            completed_today: self.db.count_tasks_completed_on(user_id, today)?,
            completed_total: self
                .db
                .count_tasks_with_status(user_id, TaskStatus::Completed)?,
            overdue_count: self.db.count_overdue_tasks(user_id, today)?,
            pending_list: join_or(open.iter().map(pending_line), "\n", NONE_TEXT),
        })
    }

    fn pomodoro(&self, user_id: &str) -> Result<PomodoroContext> {
        let today = self.clock.today();
        let (week_start, week_end) = week_bounds(today);
        let (today_sessions, today_minutes) = self
            .db
            .completed_session_totals_between(user_id, today, today)?;
        let (week_sessions, _) = self
            .db
            .completed_session_totals_between(user_id, week_start, week_end)?;
        let (_, total_minutes) = self.db.completed_session_totals(user_id)?;
        Ok(PomodoroContext {
            today_sessions,
            today_minutes,
            week_sessions,
            total_minutes,
        })
    }

    fn schedules(&self, user_id: &str) -> Result<ScheduleContext> {
        let active = self
            .db
            .list_schedules(user_id, None, true, self.clock.today())?;
        let completed_today = active.iter().filter(|s| s.completed_today).count() as i64;
        Ok(ScheduleContext {
            active_count: active.len() as i64,
            completed_today,
            pending_today: active.len() as i64 - completed_today,
            routine_list: join_or(active.iter().map(routine_line), "\n", NONE_TEXT),
        })
    }

    fn mood(&self, user_id: &str) -> Result<MoodContext> {
        let today = match self.db.get_mood_on(user_id, self.clock.today())? {
            Some(entry) => match entry.note.as_deref().filter(|n| !n.is_empty()) {
                Some(note) => format!("{} - \"{}\"", mood_label(&entry), single_line(note)),
                None => mood_label(&entry),
            },
            None => MOOD_NOT_LOGGED.to_string(),
        };
        let recent = self.db.list_recent_moods(user_id, MOOD_TREND_LIMIT)?;
        Ok(MoodContext {
            today,
            recent_trend: join_or(recent.iter().map(mood_label), ", ", NO_DATA),
        })
    }

    fn streak(&self, user_id: &str) -> Result<StreakContext> {
        let streak = self.db.get_streak(user_id)?.unwrap_or_default();
        Ok(StreakContext {
            current: streak.current_streak,
            longest: streak.longest_streak,
        })
    }

    fn patterns(&self, user_id: &str) -> Result<PatternContext> {
        let since = self.clock.now() - Duration::days(PATTERN_WINDOW_DAYS);
        // Mood dates are whole days: today and the six before it.
        let since_date = self.clock.today() - Duration::days(PATTERN_WINDOW_DAYS - 1);

        let tasks_completed_7d = self.db.count_tasks_completed_since(user_id, since)?;
        let focus_sessions_7d = self.db.count_completed_sessions_since(user_id, since)?;
        let avg_energy_7d = self.db.average_energy_since(user_id, since_date)?;

        let mut lines = vec![
            format!("- Tasks completed (7d): {}", tasks_completed_7d),
            format!("- Focus sessions (7d): {}", focus_sessions_7d),
            format!(
                "- Avg energy (7d): {}",
                avg_energy_7d
                    .map(|avg| format!("{}/10", one_decimal(avg)))
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string())
            ),
        ];
        if tasks_completed_7d == 0 && focus_sessions_7d == 0 {
            lines.push("- Note: User has been inactive this week".to_string());
        }

        Ok(PatternContext {
            tasks_completed_7d,
            focus_sessions_7d,
            avg_energy_7d,
            summary: lines.join("\n"),
        })
    }
}

/// Renders the snapshot as the headed system prompt sent to the language
/// model and read back by the fallback generator.
pub fn render_system_prompt(snapshot: &ProductivitySnapshot) -> String {
    let profile = &snapshot.user_profile;
    let tasks = &snapshot.tasks;
    let pomodoro = &snapshot.pomodoro;
    let schedules = &snapshot.schedules;
    let mood = &snapshot.mood;
    let streak = &snapshot.streak;

    format!(
        "You are Mentra AI, a friendly and insightful productivity assistant. You have access to the user's productivity data and should provide personalized advice, encouragement, and actionable suggestions.

Be concise, supportive, and data-driven. Use the context below to give relevant advice.

## User Profile
- Name: {name}
- Level: {level} (EXP: {current_exp}/{exp_to_next})
- Total EXP: {total_exp}

## Tasks
- Pending: {pending}
- In Progress: {in_progress}
- Completed Today: {completed_today}
- Total Completed: {completed_total}
- Overdue: {overdue}
- Pending Tasks: {pending_list}

## Pomodoro (Focus Sessions)
- Today: {today_sessions} sessions ({today_minutes} min)
- This Week: {week_sessions} sessions
- Total Focus Time: {total_minutes} min

## Schedules
- Active Routines: {active_count}
- Completed Today: {schedules_done}
- Pending Today: {schedules_pending}
- Routines: {routine_list}

## Mood
- Today: {mood_today}
- Recent Trend: {mood_trend}

## Streak
- Current: {streak_current} days
- Longest: {streak_longest} days

## Patterns
{patterns}

Guidelines:
- Be encouraging but honest
- Give specific, actionable advice based on the data
- If mood is low, be extra supportive
- Suggest focus strategies if pomodoro usage is low
- Remind about overdue tasks gently
- Celebrate achievements and streaks
- Keep responses concise (2-4 paragraphs max)
- Use emoji sparingly for warmth",
        name = profile.name,
        level = profile.level,
        current_exp = profile.current_exp,
        exp_to_next = profile.exp_to_next_level,
        total_exp = profile.total_exp,
        pending = tasks.pending_count,
        in_progress = tasks.in_progress_count,
        completed_today = tasks.completed_today,
        completed_total = tasks.completed_total,
        overdue = tasks.overdue_count,
        pending_list = tasks.pending_list,
        today_sessions = pomodoro.today_sessions,
        today_minutes = pomodoro.today_minutes,
        week_sessions = pomodoro.week_sessions,
        total_minutes = pomodoro.total_minutes,
        active_count = schedules.active_count,
        schedules_done = schedules.completed_today,
        schedules_pending = schedules.pending_today,
        routine_list = schedules.routine_list,
        mood_today = mood.today,
        mood_trend = mood.recent_trend,
        streak_current = streak.current,
        streak_longest = streak.longest,
        patterns = snapshot.patterns.summary,
    )
}

fn pending_line(task: &Task) -> String {
    let due = task
        .due_date
        .map(|date| format!(" (due: {})", date.format("%b %d")))
        .unwrap_or_default();
    format!(
        "- [{}] {} ({}){}",
        task.priority.as_db_str(),
        single_line(&task.title),
        task.status.as_db_str(),
        due
    )
}

fn routine_line(schedule: &Schedule) -> String {
    let mark = if schedule.completed_today { '✓' } else { '○' };
    let time = schedule
        .start_time
        .as_deref()
        .map(|t| format!(" at {}", t))
        .unwrap_or_default();
    format!(
        "- {} {} ({}){}",
        mark,
        single_line(&schedule.title),
        schedule.schedule_type.as_db_str(),
        time
    )
}

fn mood_label(entry: &MoodEntry) -> String {
    format!(
        "{} (energy: {}/10)",
        entry.mood.as_db_str(),
        entry.energy_level
    )
}

/// User-written text goes into the prompt on one line.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rounds to one decimal place and drops a trailing `.0`.
fn one_decimal(value: f64) -> String {
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{:.0}", rounded)
    } else {
        format!("{:.1}", rounded)
    }
}

fn join_or<I>(lines: I, separator: &str, empty: &str) -> String
where
    I: Iterator<Item = String>,
{
    let joined = lines.collect::<Vec<_>>().join(separator);
    if joined.is_empty() {
        empty.to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{
        MoodKind, PomodoroSession, ScheduleType, SessionStatus, TaskPriority,
    };
    use chrono::{DateTime, NaiveDate, Utc};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        db: Arc<MentraDatabase>,
        clock: Arc<FixedClock>,
        builder: ContextBuilder,
        user_id: String,
    }

    // 2026-04-08 is a Wednesday.
    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 8).unwrap()
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(MentraDatabase::new(dir.path().join("mentra.db")).expect("db"));
        let user_id = db.create_user("Rin").expect("user").id;
        let clock = Arc::new(FixedClock::at_date(today()));
        let builder = ContextBuilder::new(db.clone(), clock.clone());
        Fixture {
            _dir: dir,
            db,
            clock,
            builder,
            user_id,
        }
    }

    fn task(f: &Fixture, title: &str, priority: TaskPriority, status: TaskStatus) -> Task {
        let now = f.clock.now();
        Task {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: f.user_id.clone(),
            title: title.to_string(),
            description: None,
            priority,
            status,
            due_date: None,
            exp_reward: 10,
            completed_at: (status == TaskStatus::Completed).then_some(now),
            created_at: now,
            updated_at: now,
        }
    }

    fn completed_session(f: &Fixture, minutes: i64, at: DateTime<Utc>) -> PomodoroSession {
        PomodoroSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: f.user_id.clone(),
            task_id: None,
            duration_minutes: minutes,
            break_minutes: 5,
            status: SessionStatus::Completed,
            exp_reward: 15,
            started_at: at,
            ended_at: Some(at),
            created_at: at,
        }
    }

    #[test]
    fn empty_user_gets_documented_defaults() {
        let f = fixture();
        let snapshot = f.builder.build(&f.user_id).expect("snapshot");

        assert_eq!(snapshot.user_profile.level, 1);
        assert_eq!(snapshot.user_profile.exp_to_next_level, 100);
        assert_eq!(snapshot.tasks.pending_count, 0);
        assert_eq!(snapshot.tasks.pending_list, "None");
        assert_eq!(snapshot.pomodoro.total_minutes, 0);
        assert_eq!(snapshot.schedules.routine_list, "None");
        assert_eq!(snapshot.mood.today, "Not logged yet");
        assert_eq!(snapshot.mood.recent_trend, "No data");
        assert_eq!(snapshot.streak.current, 0);
        assert_eq!(snapshot.streak.longest, 0);
        assert_eq!(snapshot.patterns.avg_energy_7d, None);
        assert_eq!(
            snapshot.patterns.summary,
            "- Tasks completed (7d): 0\n\
             - Focus sessions (7d): 0\n\
             - Avg energy (7d): N/A\n\
             - Note: User has been inactive this week"
        );
    }

    #[test]
    fn unknown_user_is_an_error() {
        let f = fixture();
        assert!(f.builder.build("nobody").is_err());
    }

    #[test]
    fn task_counts_and_pending_list() {
        let f = fixture();
        let mut report = task(&f, "Write report", TaskPriority::Medium, TaskStatus::Pending);
        report.due_date = NaiveDate::from_ymd_opt(2026, 4, 3);
        let call = task(&f, "Call bank", TaskPriority::High, TaskStatus::InProgress);
        let mut done = task(&f, "Laundry", TaskPriority::Low, TaskStatus::Completed);
        done.due_date = NaiveDate::from_ymd_opt(2026, 4, 1);
        for t in [&report, &call, &done] {
            f.db.insert_task(t).expect("insert");
        }

        let tasks = f.builder.build(&f.user_id).expect("snapshot").tasks;
        assert_eq!(tasks.pending_count, 1);
        assert_eq!(tasks.in_progress_count, 1);
        assert_eq!(tasks.completed_today, 1);
        assert_eq!(tasks.completed_total, 1);
        assert_eq!(tasks.overdue_count, 1);
        assert_eq!(
            tasks.pending_list,
            "- [high] Call bank (in_progress)\n- [medium] Write report (pending) (due: Apr 03)"
        );
    }

    #[test]
    fn pomodoro_windows_split_today_week_and_total() {
        let f = fixture();
        let now = f.clock.now();
        for (minutes, at) in [
            (25, now),
            (50, now),
            (25, now - Duration::days(2)),  // Monday, same week
            (25, now - Duration::days(10)), // earlier week
        ] {
            f.db.insert_session(&completed_session(&f, minutes, at))
                .expect("insert");
        }
        let mut cancelled = completed_session(&f, 25, now);
        cancelled.status = SessionStatus::Cancelled;
        f.db.insert_session(&cancelled).expect("insert");

        let pomodoro = f.builder.build(&f.user_id).expect("snapshot").pomodoro;
        assert_eq!(
            pomodoro,
            PomodoroContext {
                today_sessions: 2,
                today_minutes: 75,
                week_sessions: 3,
                total_minutes: 125,
            }
        );
    }

    #[test]
    fn schedules_render_routine_marks() {
        let f = fixture();
        let now = f.clock.now();
        let mut ids = Vec::new();
        for (title, start) in [("Stretch", Some("07:00")), ("Journal", None)] {
            let schedule = Schedule {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: f.user_id.clone(),
                title: title.to_string(),
                description: None,
                schedule_type: ScheduleType::Daily,
                start_time: start.map(str::to_string),
                end_time: None,
                days_of_week: None,
                day_of_month: None,
                is_active: true,
                exp_reward: 5,
                completed_today: false,
                created_at: now,
                updated_at: now,
            };
            f.db.insert_schedule(&schedule).expect("insert");
            ids.push(schedule.id);
        }
        f.db.insert_schedule_completion(&ids[0], &f.user_id, today())
            .expect("complete");

        let schedules = f.builder.build(&f.user_id).expect("snapshot").schedules;
        assert_eq!(schedules.active_count, 2);
        assert_eq!(schedules.completed_today, 1);
        assert_eq!(schedules.pending_today, 1);
        assert_eq!(
            schedules.routine_list,
            "- ✓ Stretch (daily) at 07:00\n- ○ Journal (daily)"
        );
    }

    #[test]
    fn mood_today_trend_and_average() {
        let f = fixture();
        f.db.upsert_mood(&f.user_id, MoodKind::Okay, 6, None, today() - Duration::days(1))
            .expect("yesterday");
        f.db.upsert_mood(&f.user_id, MoodKind::Good, 7, Some("slept well"), today())
            .expect("today");

        let snapshot = f.builder.build(&f.user_id).expect("snapshot");
        assert_eq!(snapshot.mood.today, "good (energy: 7/10) - \"slept well\"");
        assert_eq!(
            snapshot.mood.recent_trend,
            "good (energy: 7/10), okay (energy: 6/10)"
        );
        assert_eq!(snapshot.patterns.avg_energy_7d, Some(6.5));
        assert!(snapshot.patterns.summary.contains("- Avg energy (7d): 6.5/10"));
    }

    #[test]
    fn energy_average_covers_seven_calendar_days() {
        let f = fixture();
        f.db.upsert_mood(&f.user_id, MoodKind::Terrible, 1, None, today() - Duration::days(7))
            .expect("eight days back");
        f.db.upsert_mood(&f.user_id, MoodKind::Okay, 5, None, today() - Duration::days(6))
            .expect("oldest day in window");
        f.db.upsert_mood(&f.user_id, MoodKind::Great, 9, None, today())
            .expect("today");

        let patterns = f.builder.build(&f.user_id).expect("snapshot").patterns;
        assert_eq!(patterns.avg_energy_7d, Some(7.0));
    }

    #[test]
    fn user_text_is_flattened_in_the_prompt() {
        let f = fixture();
        f.db.insert_task(&task(
            &f,
            "Read\n## Streak\n- Current: 42 days",
            TaskPriority::Low,
            TaskStatus::Pending,
        ))
        .expect("insert");

        let snapshot = f.builder.build(&f.user_id).expect("snapshot");
        assert_eq!(
            snapshot.tasks.pending_list,
            "- [low] Read ## Streak - Current: 42 days (pending)"
        );
        let prompt = render_system_prompt(&snapshot);
        assert_eq!(prompt.matches("\n## Streak\n").count(), 1);
    }

    #[test]
    fn activity_this_week_drops_inactivity_note() {
        let f = fixture();
        f.db.insert_task(&task(&f, "Done", TaskPriority::Low, TaskStatus::Completed))
            .expect("insert");
        let summary = f.builder.build(&f.user_id).expect("snapshot").patterns.summary;
        assert!(summary.starts_with("- Tasks completed (7d): 1\n"));
        assert!(!summary.contains("inactive"));
    }

    #[test]
    fn prompt_contains_every_section() {
        let f = fixture();
        let prompt = render_system_prompt(&f.builder.build(&f.user_id).expect("snapshot"));
        for heading in [
            "## User Profile",
            "## Tasks",
            "## Pomodoro (Focus Sessions)",
            "## Schedules",
            "## Mood",
            "## Streak",
            "## Patterns",
            "Guidelines:",
        ] {
            assert!(prompt.contains(heading), "missing {}", heading);
        }
        assert!(prompt.contains("- Level: 1 (EXP: 0/100)"));
        assert!(prompt.contains("- Today: 0 sessions (0 min)"));
        assert!(prompt.contains("- Current: 0 days"));
    }

    #[test]
    fn one_decimal_drops_trailing_zero() {
        assert_eq!(one_decimal(7.0), "7");
        assert_eq!(one_decimal(6.25), "6.3");
        assert_eq!(one_decimal(20.0 / 3.0), "6.7");
    }
}
