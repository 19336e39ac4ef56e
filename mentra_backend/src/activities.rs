//! Tasks, focus sessions, routines and moods, and the completion flows that
//! feed EXP and streaks.

use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::{week_bounds, Clock};
use crate::config::RewardConfig;
use crate::database::{MentraDatabase, TaskFilter};
use crate::error::DomainError;
use crate::models::{
    EntityRef, ExpLogEntry, ExpSource, MoodEntry, MoodKind, PomodoroSession, Schedule,
    ScheduleType, SessionStatus, Streak, Task, TaskPriority, TaskStatus, UserProgress,
};
use crate::progress::leveling::ExpProvenance;
use crate::progress::ProgressService;

const MAX_TITLE_CHARS: usize = 255;
const MAX_NOTE_CHARS: usize = 500;
const STALE_SESSION_HOURS: i64 = 24;
const DASHBOARD_RECENT_EXP: usize = 5;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub exp_reward: Option<i64>,
}

/// Absent fields stay unchanged; an empty `due_date` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartSession {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub break_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSchedule {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub schedule_type: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub days_of_week: Option<Vec<i64>>,
    #[serde(default)]
    pub day_of_month: Option<i64>,
    #[serde(default)]
    pub exp_reward: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub schedule_type: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub days_of_week: Option<Vec<i64>>,
    #[serde(default)]
    pub day_of_month: Option<i64>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MoodLog {
    pub mood: String,
    #[serde(default)]
    pub energy_level: Option<i64>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// Result of a completion or its undo.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityOutcome<T> {
    pub item: T,
    pub progress: UserProgress,
    pub exp_entry: ExpLogEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streak: Option<Streak>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PomodoroStats {
    pub today_sessions: i64,
    pub total_focus_minutes: i64,
    pub week_sessions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardUser {
    pub name: String,
    pub level: i64,
    pub current_exp: i64,
    pub exp_to_next_level: i64,
    pub total_exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardTasks {
    pub total: i64,
    pub completed: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub today_completed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardPomodoro {
    pub today_sessions: i64,
    pub today_minutes: i64,
    pub total_sessions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub user: DashboardUser,
    pub tasks: DashboardTasks,
    pub pomodoro: DashboardPomodoro,
    pub streak: Streak,
    pub today_mood: Option<MoodEntry>,
    pub recent_exp: Vec<ExpLogEntry>,
    pub today_schedules: Vec<Schedule>,
}

#[derive(Clone)]
pub struct ActivityService {
    db: Arc<MentraDatabase>,
    clock: Arc<dyn Clock>,
    progress: ProgressService,
    rewards: RewardConfig,
}

impl ActivityService {
    pub fn new(
        db: Arc<MentraDatabase>,
        clock: Arc<dyn Clock>,
        progress: ProgressService,
        rewards: RewardConfig,
    ) -> Self {
        Self {
            db,
            clock,
            progress,
            rewards,
        }
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    pub fn create_task(&self, user_id: &str, input: NewTask) -> Result<Task> {
        let title = validate_title(&input.title)?;
        let priority = match input.priority.as_deref() {
            Some(raw) => parse_priority(raw)?,
            None => TaskPriority::Medium,
        };
        let due_date = parse_optional_date("due_date", input.due_date.as_deref())?;
        let exp_reward = match input.exp_reward {
            Some(reward) => validate_range("exp_reward", reward, 1, 100)?,
            None => self.rewards.task,
        };

        let now = self.clock.now();
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title,
            description: clean_optional(input.description),
            priority,
            status: TaskStatus::Pending,
            due_date,
            exp_reward,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_task(&task)?;
        tracing::debug!("Created task {} for {}", task.id, user_id);
        Ok(task)
    }

    pub fn list_tasks(&self, user_id: &str, query: &TaskQuery) -> Result<Vec<Task>> {
        let filter = TaskFilter {
            status: query.status.as_deref().map(parse_status).transpose()?,
            priority: query.priority.as_deref().map(parse_priority).transpose()?,
        };
        let limit = query.limit.unwrap_or(100).clamp(1, 1000);
        self.db.list_tasks(user_id, filter, limit)
    }

    pub fn get_task(&self, user_id: &str, task_id: &str) -> Result<Task> {
        self.db
            .get_task(user_id, task_id)?
            .ok_or_else(|| DomainError::not_found("task", task_id).into())
    }

    /// Edits a task. Completion goes through [`Self::complete_task`] so that
    /// EXP stays in step with status.
    pub fn update_task(&self, user_id: &str, task_id: &str, update: TaskUpdate) -> Result<Task> {
        let mut task = self.get_task(user_id, task_id)?;

        if let Some(title) = update.title.as_deref() {
            task.title = validate_title(title)?;
        }
        if let Some(priority) = update.priority.as_deref() {
            task.priority = parse_priority(priority)?;
        }
        if let Some(status) = update.status.as_deref() {
            let status = parse_status(status)?;
            if status != task.status
                && (status == TaskStatus::Completed || task.status == TaskStatus::Completed)
            {
                return Err(DomainError::invalid(
                    "status",
                    "use the complete/uncomplete actions to change completion",
                )
                .into());
            }
            task.status = status;
        }
        if let Some(due) = update.due_date.as_deref() {
            task.due_date = parse_optional_date("due_date", Some(due))?;
        }
        if update.description.is_some() {
            task.description = clean_optional(update.description);
        }

        task.updated_at = self.clock.now();
        self.db.update_task(&task)?;
        Ok(task)
    }

    pub fn delete_task(&self, user_id: &str, task_id: &str) -> Result<()> {
        if !self.db.delete_task(user_id, task_id)? {
            return Err(DomainError::not_found("task", task_id).into());
        }
        Ok(())
    }

    pub fn complete_task(&self, user_id: &str, task_id: &str) -> Result<ActivityOutcome<Task>> {
        let mut task = self.get_task(user_id, task_id)?;
        if task.status == TaskStatus::Completed {
            return Err(DomainError::conflict("Task already completed.").into());
        }

        let now = self.clock.now();
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.updated_at = now;
        self.db.update_task(&task)?;

        let provenance = ExpProvenance::new(user_id, ExpSource::Task, EntityRef::new("task", &task.id))
            .with_description(format!("Completed task: {}", task.title));
        let (progress, exp_entry) = self.progress.award_exp(task.exp_reward, provenance)?;
        let streak = self.progress.record_activity(user_id)?;

        let message = format!("Task completed! +{} EXP", task.exp_reward);
        Ok(ActivityOutcome {
            item: task,
            progress,
            exp_entry,
            streak: Some(streak),
            message,
        })
    }

    /// Reverts a completion and its EXP. The streak is left alone.
    pub fn uncomplete_task(&self, user_id: &str, task_id: &str) -> Result<ActivityOutcome<Task>> {
        let mut task = self.get_task(user_id, task_id)?;
        if task.status != TaskStatus::Completed {
            return Err(DomainError::conflict("Task is not completed.").into());
        }

        task.status = TaskStatus::Pending;
        task.completed_at = None;
        task.updated_at = self.clock.now();
        self.db.update_task(&task)?;

        let provenance = ExpProvenance::new(
            user_id,
            ExpSource::TaskUncomplete,
            EntityRef::new("task", &task.id),
        )
        .with_description(format!("Uncompleted task: {}", task.title));
        let (progress, exp_entry) = self.progress.deduct_exp(task.exp_reward, provenance)?;

        let message = format!("Task uncompleted. -{} EXP", task.exp_reward);
        Ok(ActivityOutcome {
            item: task,
            progress,
            exp_entry,
            streak: None,
            message,
        })
    }

    // ========================================================================
    // Pomodoro
    // ========================================================================

    pub fn start_session(&self, user_id: &str, input: StartSession) -> Result<PomodoroSession> {
        let duration_minutes = match input.duration_minutes {
            Some(minutes) => validate_range("duration_minutes", minutes, 1, 120)?,
            None => 25,
        };
        let break_minutes = match input.break_minutes {
            Some(minutes) => validate_range("break_minutes", minutes, 1, 30)?,
            None => 5,
        };
        let task_id = clean_optional(input.task_id);
        if let Some(task_id) = task_id.as_deref() {
            self.get_task(user_id, task_id)?;
        }

        let now = self.clock.now();
        let cutoff = now - Duration::hours(STALE_SESSION_HOURS);
        let cancelled = self.db.cancel_stale_sessions(user_id, cutoff, now)?;
        if cancelled > 0 {
            tracing::info!("Auto-cancelled {} stale session(s) for {}", cancelled, user_id);
        }
        if self.db.find_active_session_since(user_id, cutoff)?.is_some() {
            return Err(DomainError::conflict(
                "Please complete or cancel your current session first.",
            )
            .into());
        }

        let session = PomodoroSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            task_id,
            duration_minutes,
            break_minutes,
            status: SessionStatus::Running,
            exp_reward: self.rewards.pomodoro,
            started_at: now,
            ended_at: None,
            created_at: now,
        };
        self.db.insert_session(&session)?;
        Ok(session)
    }

    pub fn get_session(&self, user_id: &str, session_id: &str) -> Result<PomodoroSession> {
        self.db
            .get_session(user_id, session_id)?
            .ok_or_else(|| DomainError::not_found("pomodoro session", session_id).into())
    }

    pub fn list_sessions(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<PomodoroSession>> {
        self.db
            .list_sessions(user_id, limit.unwrap_or(15).clamp(1, 1000))
    }

    pub fn pause_session(&self, user_id: &str, session_id: &str) -> Result<PomodoroSession> {
        self.transition_session(user_id, session_id, SessionStatus::Running, SessionStatus::Paused)
    }

    pub fn resume_session(&self, user_id: &str, session_id: &str) -> Result<PomodoroSession> {
        self.transition_session(user_id, session_id, SessionStatus::Paused, SessionStatus::Running)
    }

    fn transition_session(
        &self,
        user_id: &str,
        session_id: &str,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<PomodoroSession> {
        let mut session = self.get_session(user_id, session_id)?;
        if session.status != from {
            return Err(DomainError::conflict(format!("Session is not {}.", from.as_db_str())).into());
        }
        self.db.update_session_status(&session.id, to, None)?;
        session.status = to;
        Ok(session)
    }

    pub fn complete_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<ActivityOutcome<PomodoroSession>> {
        let mut session = self.get_session(user_id, session_id)?;
        if session.status == SessionStatus::Completed {
            return Err(DomainError::conflict("Session already completed.").into());
        }

        let now = self.clock.now();
        self.db
            .update_session_status(&session.id, SessionStatus::Completed, Some(now))?;
        session.status = SessionStatus::Completed;
        session.ended_at = Some(now);

        let provenance = ExpProvenance::new(
            user_id,
            ExpSource::Pomodoro,
            EntityRef::new("pomodoro_session", &session.id),
        )
        .with_description(format!(
            "Completed {}min focus session",
            session.duration_minutes
        ));
        let (progress, exp_entry) = self.progress.award_exp(session.exp_reward, provenance)?;
        let streak = self.progress.record_activity(user_id)?;

        let message = format!("Focus session completed! +{} EXP", session.exp_reward);
        Ok(ActivityOutcome {
            item: session,
            progress,
            exp_entry,
            streak: Some(streak),
            message,
        })
    }

    pub fn cancel_session(&self, user_id: &str, session_id: &str) -> Result<PomodoroSession> {
        let mut session = self.get_session(user_id, session_id)?;
        if !session.status.is_active() {
            return Err(DomainError::conflict("Session cannot be cancelled.").into());
        }
        let now = self.clock.now();
        self.db
            .update_session_status(&session.id, SessionStatus::Cancelled, Some(now))?;
        session.status = SessionStatus::Cancelled;
        session.ended_at = Some(now);
        Ok(session)
    }

    pub fn pomodoro_stats(&self, user_id: &str) -> Result<PomodoroStats> {
        let today = self.clock.today();
        let (week_start, week_end) = week_bounds(today);
        let (today_sessions, _) = self
            .db
            .completed_session_totals_between(user_id, today, today)?;
        let (week_sessions, _) = self
            .db
            .completed_session_totals_between(user_id, week_start, week_end)?;
        let (_, total_focus_minutes) = self.db.completed_session_totals(user_id)?;
        Ok(PomodoroStats {
            today_sessions,
            total_focus_minutes,
            week_sessions,
        })
    }

    // ========================================================================
    // Schedules
    // ========================================================================

    pub fn create_schedule(&self, user_id: &str, input: NewSchedule) -> Result<Schedule> {
        let title = validate_title(&input.title)?;
        let schedule_type = parse_schedule_type(&input.schedule_type)?;
        let start_time = parse_optional_time("start_time", input.start_time.as_deref())?;
        let end_time = parse_optional_time("end_time", input.end_time.as_deref())?;
        let days_of_week = input.days_of_week.map(validate_weekdays).transpose()?;
        let day_of_month = input
            .day_of_month
            .map(|day| validate_range("day_of_month", day, 1, 31).map(|d| d as u8))
            .transpose()?;
        let exp_reward = match input.exp_reward {
            Some(reward) => validate_range("exp_reward", reward, 1, 50)?,
            None => self.rewards.schedule,
        };

        let now = self.clock.now();
        let schedule = Schedule {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title,
            description: clean_optional(input.description),
            schedule_type,
            start_time,
            end_time,
            days_of_week,
            day_of_month,
            is_active: true,
            exp_reward,
            completed_today: false,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_schedule(&schedule)?;
        Ok(schedule)
    }

    pub fn list_schedules(&self, user_id: &str, schedule_type: Option<&str>) -> Result<Vec<Schedule>> {
        let schedule_type = schedule_type.map(parse_schedule_type).transpose()?;
        self.db
            .list_schedules(user_id, schedule_type, false, self.clock.today())
    }

    pub fn get_schedule(&self, user_id: &str, schedule_id: &str) -> Result<Schedule> {
        self.db
            .get_schedule(user_id, schedule_id, self.clock.today())?
            .ok_or_else(|| DomainError::not_found("schedule", schedule_id).into())
    }

    pub fn update_schedule(
        &self,
        user_id: &str,
        schedule_id: &str,
        update: ScheduleUpdate,
    ) -> Result<Schedule> {
        let mut schedule = self.get_schedule(user_id, schedule_id)?;

        if let Some(title) = update.title.as_deref() {
            schedule.title = validate_title(title)?;
        }
        if let Some(kind) = update.schedule_type.as_deref() {
            schedule.schedule_type = parse_schedule_type(kind)?;
        }
        if let Some(start) = update.start_time.as_deref() {
            schedule.start_time = parse_optional_time("start_time", Some(start))?;
        }
        if let Some(end) = update.end_time.as_deref() {
            schedule.end_time = parse_optional_time("end_time", Some(end))?;
        }
        if let Some(days) = update.days_of_week {
            schedule.days_of_week = Some(validate_weekdays(days)?).filter(|d| !d.is_empty());
        }
        if let Some(day) = update.day_of_month {
            schedule.day_of_month = Some(validate_range("day_of_month", day, 1, 31)? as u8);
        }
        if let Some(active) = update.is_active {
            schedule.is_active = active;
        }
        if update.description.is_some() {
            schedule.description = clean_optional(update.description);
        }

        schedule.updated_at = self.clock.now();
        self.db.update_schedule(&schedule)?;
        Ok(schedule)
    }

    pub fn delete_schedule(&self, user_id: &str, schedule_id: &str) -> Result<()> {
        if !self.db.delete_schedule(user_id, schedule_id)? {
            return Err(DomainError::not_found("schedule", schedule_id).into());
        }
        Ok(())
    }

    pub fn complete_schedule(
        &self,
        user_id: &str,
        schedule_id: &str,
    ) -> Result<ActivityOutcome<Schedule>> {
        let mut schedule = self.get_schedule(user_id, schedule_id)?;
        let today = self.clock.today();
        if !self
            .db
            .insert_schedule_completion(&schedule.id, user_id, today)?
        {
            return Err(DomainError::conflict("Already completed today.").into());
        }
        schedule.completed_today = true;

        let provenance = ExpProvenance::new(
            user_id,
            ExpSource::Schedule,
            EntityRef::new("schedule", &schedule.id),
        )
        .with_description(format!("Completed schedule: {}", schedule.title));
        let (progress, exp_entry) = self.progress.award_exp(schedule.exp_reward, provenance)?;
        let streak = self.progress.record_activity(user_id)?;

        let message = format!("Schedule completed! +{} EXP", schedule.exp_reward);
        Ok(ActivityOutcome {
            item: schedule,
            progress,
            exp_entry,
            streak: Some(streak),
            message,
        })
    }

    pub fn uncomplete_schedule(
        &self,
        user_id: &str,
        schedule_id: &str,
    ) -> Result<ActivityOutcome<Schedule>> {
        let mut schedule = self.get_schedule(user_id, schedule_id)?;
        if !self
            .db
            .delete_schedule_completion(&schedule.id, self.clock.today())?
        {
            return Err(DomainError::conflict("Not completed today.").into());
        }
        schedule.completed_today = false;

        let provenance = ExpProvenance::new(
            user_id,
            ExpSource::ScheduleUncomplete,
            EntityRef::new("schedule", &schedule.id),
        )
        .with_description(format!("Uncompleted schedule: {}", schedule.title));
        let (progress, exp_entry) = self.progress.deduct_exp(schedule.exp_reward, provenance)?;

        let message = format!("Schedule uncompleted. -{} EXP", schedule.exp_reward);
        Ok(ActivityOutcome {
            item: schedule,
            progress,
            exp_entry,
            streak: None,
            message,
        })
    }

    // ========================================================================
    // Moods
    // ========================================================================

    /// One entry per day; logging again for the same date replaces it.
    pub fn log_mood(&self, user_id: &str, input: MoodLog) -> Result<MoodEntry> {
        let mood = MoodKind::parse(&input.mood).ok_or_else(|| {
            DomainError::invalid("mood", "expected one of great, good, okay, bad, terrible")
        })?;
        let energy = match input.energy_level {
            Some(level) => validate_range("energy_level", level, 1, 10)?,
            None => 5,
        };
        let note = clean_optional(input.note);
        if note.as_deref().map(|n| n.chars().count()).unwrap_or(0) > MAX_NOTE_CHARS {
            return Err(DomainError::invalid(
                "note",
                format!("must be at most {} characters", MAX_NOTE_CHARS),
            )
            .into());
        }
        let date = parse_optional_date("date", input.date.as_deref())?
            .unwrap_or_else(|| self.clock.today());

        self.db
            .upsert_mood(user_id, mood, energy, note.as_deref(), date)
    }

    pub fn list_moods(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<MoodEntry>> {
        self.db
            .list_recent_moods(user_id, limit.unwrap_or(30).clamp(1, 365))
    }

    pub fn get_mood(&self, user_id: &str, mood_id: &str) -> Result<MoodEntry> {
        self.db
            .get_mood(user_id, mood_id)?
            .ok_or_else(|| DomainError::not_found("mood", mood_id).into())
    }

    pub fn today_mood(&self, user_id: &str) -> Result<Option<MoodEntry>> {
        self.db.get_mood_on(user_id, self.clock.today())
    }

    /// Moods for the current Monday-Sunday week, oldest first.
    pub fn weekly_moods(&self, user_id: &str) -> Result<Vec<MoodEntry>> {
        let (start, end) = week_bounds(self.clock.today());
        self.db.list_moods_between(user_id, start, end)
    }

    // ========================================================================
    // Dashboard
    // ========================================================================

    pub fn dashboard(&self, user_id: &str) -> Result<Dashboard> {
        let user = self.db.require_user(user_id)?;
        let today = self.clock.today();

        let completed = self.db.count_tasks_with_status(user_id, TaskStatus::Completed)?;
        let pending = self.db.count_tasks_with_status(user_id, TaskStatus::Pending)?;
        let in_progress = self
            .db
            .count_tasks_with_status(user_id, TaskStatus::InProgress)?;
        let (today_sessions, today_minutes) = self
            .db
            .completed_session_totals_between(user_id, today, today)?;
        let (total_sessions, _) = self.db.completed_session_totals(user_id)?;

        Ok(Dashboard {
            user: DashboardUser {
                name: user.name,
                level: user.progress.level,
                current_exp: user.progress.current_exp,
                exp_to_next_level: user.progress.exp_to_next_level(),
                total_exp: user.progress.total_exp,
            },
            tasks: DashboardTasks {
                total: completed + pending + in_progress,
                completed,
                pending,
                in_progress,
                today_completed: self.db.count_tasks_completed_on(user_id, today)?,
            },
            pomodoro: DashboardPomodoro {
                today_sessions,
                today_minutes,
                total_sessions,
            },
            streak: self.progress.streak(user_id)?,
            today_mood: self.db.get_mood_on(user_id, today)?,
            recent_exp: self.progress.exp_history(user_id, DASHBOARD_RECENT_EXP)?,
            today_schedules: self.db.list_schedules(user_id, None, true, today)?,
        })
    }
}

fn validate_title(raw: &str) -> Result<String, DomainError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(DomainError::invalid("title", "must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(DomainError::invalid(
            "title",
            format!("must be at most {} characters", MAX_TITLE_CHARS),
        ));
    }
    Ok(title.to_string())
}

fn validate_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<i64, DomainError> {
    if value < min || value > max {
        return Err(DomainError::invalid(
            field,
            format!("must be between {} and {}", min, max),
        ));
    }
    Ok(value)
}

fn validate_weekdays(days: Vec<i64>) -> Result<Vec<u8>, DomainError> {
    days.into_iter()
        .map(|day| validate_range("days_of_week", day, 0, 6).map(|d| d as u8))
        .collect()
}

fn parse_priority(raw: &str) -> Result<TaskPriority, DomainError> {
    TaskPriority::parse(raw)
        .ok_or_else(|| DomainError::invalid("priority", "expected low, medium or high"))
}

fn parse_status(raw: &str) -> Result<TaskStatus, DomainError> {
    TaskStatus::parse(raw).ok_or_else(|| {
        DomainError::invalid("status", "expected pending, in_progress or completed")
    })
}

fn parse_schedule_type(raw: &str) -> Result<ScheduleType, DomainError> {
    ScheduleType::parse(raw)
        .ok_or_else(|| DomainError::invalid("type", "expected daily, weekly or monthly"))
}

/// `None` or an empty string means no date.
fn parse_optional_date(field: &'static str, raw: Option<&str>) -> Result<Option<NaiveDate>, DomainError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(text) => {
            // Accept full timestamps too; only the date part matters.
            let date_part = text.get(..10).unwrap_or(text);
            NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| DomainError::invalid(field, "expected YYYY-MM-DD"))
        }
    }
}

/// Normalises `H:MM`/`HH:MM` to `HH:MM`.
fn parse_optional_time(field: &'static str, raw: Option<&str>) -> Result<Option<String>, DomainError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(text) => NaiveTime::parse_from_str(text, "%H:%M")
            .map(|time| Some(time.format("%H:%M").to_string()))
            .map_err(|_| DomainError::invalid(field, "expected HH:MM")),
    }
}

fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::domain_error;
    use crate::events::AppEvent;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        db: Arc<MentraDatabase>,
        clock: Arc<FixedClock>,
        service: ActivityService,
        _events: flume::Receiver<AppEvent>,
        user_id: String,
    }

    // 2026-04-08 is a Wednesday.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(FixedClock::at_date(
            NaiveDate::from_ymd_opt(2026, 4, 8).unwrap(),
        ));
        let db = Arc::new(
            MentraDatabase::new(dir.path().join("mentra.db"))
                .expect("db")
                .with_clock(clock.clone()),
        );
        let user_id = db.create_user("Rin").expect("user").id;
        let (tx, rx) = flume::unbounded();
        let progress = ProgressService::new(db.clone(), clock.clone(), tx);
        let service =
            ActivityService::new(db.clone(), clock.clone(), progress, RewardConfig::default());
        Fixture {
            _dir: dir,
            db,
            clock,
            service,
            _events: rx,
            user_id,
        }
    }

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            ..NewTask::default()
        }
    }

    fn is_conflict(error: &anyhow::Error) -> bool {
        matches!(domain_error(error), Some(DomainError::Conflict(_)))
    }

    fn is_validation(error: &anyhow::Error) -> bool {
        domain_error(error).map(DomainError::is_validation).unwrap_or(false)
    }

    #[test]
    fn task_completion_awards_and_uncompletion_deducts() {
        let f = fixture();
        let task = f
            .service
            .create_task(
                &f.user_id,
                NewTask {
                    exp_reward: Some(40),
                    ..new_task("Write report")
                },
            )
            .expect("create");
        assert_eq!(task.priority, TaskPriority::Medium);

        let done = f.service.complete_task(&f.user_id, &task.id).expect("complete");
        assert_eq!(done.item.status, TaskStatus::Completed);
        assert_eq!(done.progress.total_exp, 40);
        assert_eq!(done.exp_entry.description.as_deref(), Some("Completed task: Write report"));
        assert_eq!(done.streak.map(|s| s.current_streak), Some(1));
        assert_eq!(done.message, "Task completed! +40 EXP");

        let again = f.service.complete_task(&f.user_id, &task.id).unwrap_err();
        assert!(is_conflict(&again));

        let undone = f
            .service
            .uncomplete_task(&f.user_id, &task.id)
            .expect("uncomplete");
        assert_eq!(undone.item.status, TaskStatus::Pending);
        assert!(undone.item.completed_at.is_none());
        assert_eq!(undone.progress.total_exp, 0);
        assert_eq!(undone.exp_entry.source, ExpSource::TaskUncomplete);
        assert!(undone.streak.is_none());

        // Streak survives the undo.
        let dashboard = f.service.dashboard(&f.user_id).expect("dashboard");
        assert_eq!(dashboard.streak.current_streak, 1);
        assert_eq!(dashboard.recent_exp.len(), 2);
        assert!(is_conflict(
            &f.service.uncomplete_task(&f.user_id, &task.id).unwrap_err()
        ));
    }

    #[test]
    fn task_validation_rejects_bad_input_before_writing() {
        let f = fixture();
        for input in [
            new_task("   "),
            NewTask {
                priority: Some("urgent".to_string()),
                ..new_task("x")
            },
            NewTask {
                due_date: Some("next tuesday".to_string()),
                ..new_task("x")
            },
            NewTask {
                exp_reward: Some(0),
                ..new_task("x")
            },
        ] {
            assert!(is_validation(&f.service.create_task(&f.user_id, input).unwrap_err()));
        }
        assert!(f
            .service
            .list_tasks(&f.user_id, &TaskQuery::default())
            .expect("list")
            .is_empty());
    }

    #[test]
    fn task_update_cannot_bypass_completion() {
        let f = fixture();
        let task = f.service.create_task(&f.user_id, new_task("Plan")).expect("create");
        let error = f
            .service
            .update_task(
                &f.user_id,
                &task.id,
                TaskUpdate {
                    status: Some("completed".to_string()),
                    ..TaskUpdate::default()
                },
            )
            .unwrap_err();
        assert!(is_validation(&error));

        let updated = f
            .service
            .update_task(
                &f.user_id,
                &task.id,
                TaskUpdate {
                    status: Some("in_progress".to_string()),
                    due_date: Some("2026-04-10".to_string()),
                    priority: Some("high".to_string()),
                    ..TaskUpdate::default()
                },
            )
            .expect("update");
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert_eq!(updated.priority, TaskPriority::High);
        assert_eq!(updated.due_date, NaiveDate::from_ymd_opt(2026, 4, 10));

        let filtered = f
            .service
            .list_tasks(
                &f.user_id,
                &TaskQuery {
                    status: Some("in_progress".to_string()),
                    ..TaskQuery::default()
                },
            )
            .expect("list");
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn missing_task_is_not_found() {
        let f = fixture();
        let error = f.service.complete_task(&f.user_id, "nope").unwrap_err();
        assert!(matches!(domain_error(&error), Some(DomainError::NotFound { .. })));
        assert!(f.service.delete_task(&f.user_id, "nope").is_err());
    }

    #[test]
    fn pomodoro_lifecycle() {
        let f = fixture();
        let session = f
            .service
            .start_session(&f.user_id, StartSession::default())
            .expect("start");
        assert_eq!(session.duration_minutes, 25);
        assert_eq!(session.exp_reward, 15);

        let busy = f
            .service
            .start_session(&f.user_id, StartSession::default())
            .unwrap_err();
        assert!(is_conflict(&busy));

        let paused = f.service.pause_session(&f.user_id, &session.id).expect("pause");
        assert_eq!(paused.status, SessionStatus::Paused);
        assert!(is_conflict(
            &f.service.pause_session(&f.user_id, &session.id).unwrap_err()
        ));
        f.service.resume_session(&f.user_id, &session.id).expect("resume");

        let done = f
            .service
            .complete_session(&f.user_id, &session.id)
            .expect("complete");
        assert_eq!(done.progress.total_exp, 15);
        assert_eq!(
            done.exp_entry.description.as_deref(),
            Some("Completed 25min focus session")
        );
        assert!(is_conflict(
            &f.service.cancel_session(&f.user_id, &session.id).unwrap_err()
        ));

        let stats = f.service.pomodoro_stats(&f.user_id).expect("stats");
        assert_eq!(
            stats,
            PomodoroStats {
                today_sessions: 1,
                total_focus_minutes: 25,
                week_sessions: 1,
            }
        );
    }

    #[test]
    fn stale_sessions_are_cancelled_on_start() {
        let f = fixture();
        let old = f
            .service
            .start_session(&f.user_id, StartSession::default())
            .expect("start");
        f.clock.advance_days(2);

        let fresh = f
            .service
            .start_session(&f.user_id, StartSession::default())
            .expect("start after a day");
        assert_ne!(fresh.id, old.id);
        assert_eq!(
            f.service.get_session(&f.user_id, &old.id).expect("old").status,
            SessionStatus::Cancelled
        );
    }

    #[test]
    fn session_bounds_and_task_link_are_checked() {
        let f = fixture();
        let too_long = StartSession {
            duration_minutes: Some(121),
            ..StartSession::default()
        };
        assert!(is_validation(
            &f.service.start_session(&f.user_id, too_long).unwrap_err()
        ));

        let dangling = StartSession {
            task_id: Some("missing".to_string()),
            ..StartSession::default()
        };
        assert!(f.service.start_session(&f.user_id, dangling).is_err());
    }

    #[test]
    fn schedule_completes_once_per_day() {
        let f = fixture();
        let schedule = f
            .service
            .create_schedule(
                &f.user_id,
                NewSchedule {
                    title: "Stretch".to_string(),
                    schedule_type: "daily".to_string(),
                    start_time: Some("7:05".to_string()),
                    days_of_week: Some(vec![1, 3]),
                    ..NewSchedule::default()
                },
            )
            .expect("create");
        assert_eq!(schedule.start_time.as_deref(), Some("07:05"));
        assert_eq!(schedule.exp_reward, 5);

        let done = f
            .service
            .complete_schedule(&f.user_id, &schedule.id)
            .expect("complete");
        assert!(done.item.completed_today);
        assert!(is_conflict(
            &f.service
                .complete_schedule(&f.user_id, &schedule.id)
                .unwrap_err()
        ));

        f.clock.advance_days(1);
        let next_day = f
            .service
            .complete_schedule(&f.user_id, &schedule.id)
            .expect("complete next day");
        assert_eq!(next_day.streak.map(|s| s.current_streak), Some(2));

        let undone = f
            .service
            .uncomplete_schedule(&f.user_id, &schedule.id)
            .expect("uncomplete");
        assert_eq!(undone.progress.total_exp, 5);
        assert!(is_conflict(
            &f.service
                .uncomplete_schedule(&f.user_id, &schedule.id)
                .unwrap_err()
        ));
    }

    #[test]
    fn schedule_validation() {
        let f = fixture();
        let base = NewSchedule {
            title: "Gym".to_string(),
            schedule_type: "weekly".to_string(),
            ..NewSchedule::default()
        };
        for bad in [
            NewSchedule {
                schedule_type: "yearly".to_string(),
                ..base.clone()
            },
            NewSchedule {
                start_time: Some("25:00".to_string()),
                ..base.clone()
            },
            NewSchedule {
                days_of_week: Some(vec![7]),
                ..base.clone()
            },
            NewSchedule {
                day_of_month: Some(0),
                ..base.clone()
            },
        ] {
            assert!(is_validation(
                &f.service.create_schedule(&f.user_id, bad).unwrap_err()
            ));
        }

        let paused = f.service.create_schedule(&f.user_id, base).expect("create");
        f.service
            .update_schedule(
                &f.user_id,
                &paused.id,
                ScheduleUpdate {
                    is_active: Some(false),
                    ..ScheduleUpdate::default()
                },
            )
            .expect("pause");
        let dashboard = f.service.dashboard(&f.user_id).expect("dashboard");
        assert!(dashboard.today_schedules.is_empty());
        assert_eq!(
            f.service.list_schedules(&f.user_id, Some("weekly")).expect("list").len(),
            1
        );
    }

    #[test]
    fn mood_lookup_is_scoped_to_its_owner() {
        let f = fixture();
        let entry = f
            .service
            .log_mood(
                &f.user_id,
                MoodLog {
                    mood: "great".to_string(),
                    energy_level: Some(8),
                    ..MoodLog::default()
                },
            )
            .expect("log");

        let found = f.service.get_mood(&f.user_id, &entry.id).expect("get");
        assert_eq!(found.id, entry.id);
        assert_eq!(found.mood, MoodKind::Great);
        assert_eq!(found.energy_level, 8);

        let stranger = f.db.create_user("Other").expect("user").id;
        let error = f.service.get_mood(&stranger, &entry.id).unwrap_err();
        assert!(matches!(
            crate::error::domain_error(&error),
            Some(DomainError::NotFound { .. })
        ));
        assert!(f.service.get_mood(&f.user_id, "missing").is_err());
    }

    #[test]
    fn mood_logging_defaults_and_weekly_view() {
        let f = fixture();
        let entry = f
            .service
            .log_mood(
                &f.user_id,
                MoodLog {
                    mood: "Good".to_string(),
                    ..MoodLog::default()
                },
            )
            .expect("log");
        assert_eq!(entry.energy_level, 5);
        assert_eq!(entry.date, f.clock.today());

        f.service
            .log_mood(
                &f.user_id,
                MoodLog {
                    mood: "okay".to_string(),
                    energy_level: Some(4),
                    date: Some("2026-04-06".to_string()),
                    ..MoodLog::default()
                },
            )
            .expect("log monday");
        f.service
            .log_mood(
                &f.user_id,
                MoodLog {
                    mood: "bad".to_string(),
                    date: Some("2026-04-05".to_string()),
                    ..MoodLog::default()
                },
            )
            .expect("log last sunday");

        let week: Vec<NaiveDate> = f
            .service
            .weekly_moods(&f.user_id)
            .expect("weekly")
            .into_iter()
            .map(|m| m.date)
            .collect();
        assert_eq!(
            week,
            vec![
                NaiveDate::from_ymd_opt(2026, 4, 6).unwrap(),
                NaiveDate::from_ymd_opt(2026, 4, 8).unwrap(),
            ]
        );
        assert_eq!(
            f.service.today_mood(&f.user_id).expect("today").map(|m| m.mood),
            Some(MoodKind::Good)
        );
        assert_eq!(f.service.list_moods(&f.user_id, None).expect("list").len(), 3);

        for bad in [
            MoodLog {
                mood: "meh".to_string(),
                ..MoodLog::default()
            },
            MoodLog {
                mood: "good".to_string(),
                energy_level: Some(11),
                ..MoodLog::default()
            },
        ] {
            assert!(is_validation(&f.service.log_mood(&f.user_id, bad).unwrap_err()));
        }
    }

    #[test]
    fn time_and_date_parsing() {
        assert_eq!(
            parse_optional_time("start_time", Some("9:30")).unwrap(),
            Some("09:30".to_string())
        );
        assert_eq!(parse_optional_time("start_time", Some("")).unwrap(), None);
        assert_eq!(
            parse_optional_date("date", Some("2026-04-06T10:00:00Z")).unwrap(),
            NaiveDate::from_ymd_opt(2026, 4, 6)
        );
        assert!(parse_optional_date("date", Some("06/04/2026")).is_err());
    }
}
