use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::clock::{format_date, format_timestamp, Clock, SystemClock};
use crate::error::DomainError;
use crate::models::{
    ChatMessage, ChatRole, EntityRef, ExpLogEntry, ExpSource, MoodEntry, MoodKind, NewExpLog,
    PomodoroSession, Schedule, ScheduleType, SessionStatus, Streak, Task, TaskPriority,
    TaskStatus, User, UserProgress,
};
use crate::progress::leveling::ExpChange;
use crate::progress::streak::StreakChange;

pub const LOCAL_USER_ID: &str = "local";

const USER_COLUMNS: &str = "id, name, api_token, level, current_exp, total_exp, created_at";
const TASK_COLUMNS: &str = "id, user_id, title, description, priority, status, due_date, \
                            exp_reward, completed_at, created_at, updated_at";
const SESSION_COLUMNS: &str = "id, user_id, task_id, duration_minutes, break_minutes, status, \
                               exp_reward, started_at, ended_at, created_at";
const MOOD_COLUMNS: &str =
    "id, user_id, mood, energy_level, note, date, created_at, updated_at";
const EXP_LOG_COLUMNS: &str =
    "id, user_id, amount, source, description, entity_type, entity_id, created_at";
const CHAT_COLUMNS: &str = "id, user_id, role, content, context_snapshot, created_at";

/// Optional filters for task listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
}

pub struct MentraDatabase {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl MentraDatabase {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;
        let db = Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    /// Stamps rows with `clock` instead of the system time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                api_token TEXT NOT NULL UNIQUE,
                level INTEGER NOT NULL DEFAULT 1,
                current_exp INTEGER NOT NULL DEFAULT 0,
                total_exp INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT,
                priority TEXT NOT NULL DEFAULT 'medium',
                status TEXT NOT NULL DEFAULT 'pending',
                due_date TEXT,
                exp_reward INTEGER NOT NULL DEFAULT 10,
                completed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_user_status ON tasks(user_id, status);
            CREATE INDEX IF NOT EXISTS idx_tasks_user_due ON tasks(user_id, due_date);

            CREATE TABLE IF NOT EXISTS pomodoro_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                task_id TEXT REFERENCES tasks(id) ON DELETE SET NULL,
                duration_minutes INTEGER NOT NULL DEFAULT 25,
                break_minutes INTEGER NOT NULL DEFAULT 5,
                status TEXT NOT NULL DEFAULT 'running',
                exp_reward INTEGER NOT NULL DEFAULT 15,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_status ON pomodoro_sessions(user_id, status);
            CREATE INDEX IF NOT EXISTS idx_sessions_user_created ON pomodoro_sessions(user_id, created_at);

            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT,
                schedule_type TEXT NOT NULL DEFAULT 'daily',
                start_time TEXT,
                end_time TEXT,
                days_of_week TEXT,
                day_of_month INTEGER,
                is_active INTEGER NOT NULL DEFAULT 1,
                exp_reward INTEGER NOT NULL DEFAULT 5,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_schedules_user_active ON schedules(user_id, is_active);

            CREATE TABLE IF NOT EXISTS schedule_completions (
                id TEXT PRIMARY KEY,
                schedule_id TEXT NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                completed_date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(schedule_id, completed_date)
            );
            CREATE INDEX IF NOT EXISTS idx_completions_user_date ON schedule_completions(user_id, completed_date);

            CREATE TABLE IF NOT EXISTS moods (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                mood TEXT NOT NULL,
                energy_level INTEGER NOT NULL DEFAULT 5,
                note TEXT,
                date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, date)
            );

            CREATE TABLE IF NOT EXISTS exp_logs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                amount INTEGER NOT NULL,
                source TEXT NOT NULL,
                description TEXT,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_exp_logs_user_created ON exp_logs(user_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS streaks (
                user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                current_streak INTEGER NOT NULL DEFAULT 0,
                longest_streak INTEGER NOT NULL DEFAULT 0,
                last_activity_date TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                context_snapshot TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chat_messages_user_created ON chat_messages(user_id, created_at DESC);
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(())
    }

    // ========================================================================
    // Users and progress
    // ========================================================================

    pub fn create_user(&self, name: &str) -> Result<User> {
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            api_token: uuid::Uuid::new_v4().simple().to_string(),
            progress: UserProgress::default(),
            created_at: self.now(),
        };
        self.insert_user(&user)?;
        Ok(user)
    }

    /// The single user that owns all data when authentication is disabled.
    pub fn ensure_local_user(&self) -> Result<User> {
        if let Some(user) = self.get_user(LOCAL_USER_ID)? {
            return Ok(user);
        }
        let user = User {
            id: LOCAL_USER_ID.to_string(),
            name: "Local user".to_string(),
            api_token: uuid::Uuid::new_v4().simple().to_string(),
            progress: UserProgress::default(),
            created_at: self.now(),
        };
        self.insert_user(&user)?;
        Ok(user)
    }

    fn insert_user(&self, user: &User) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO users (id, name, api_token, level, current_exp, total_exp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                user.name,
                user.api_token,
                user.progress.level,
                user.progress.current_exp,
                user.progress.total_exp,
                format_timestamp(user.created_at),
            ],
        )
        .context("Failed to insert user")?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.lock_conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                [user_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_token(&self, token: &str) -> Result<Option<User>> {
        let conn = self.lock_conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE api_token = ?1", USER_COLUMNS),
                [token],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn require_user(&self, user_id: &str) -> Result<User> {
        self.get_user(user_id)?
            .ok_or_else(|| DomainError::not_found("user", user_id).into())
    }

    /// Runs one EXP change as a single transaction: read progress, apply
    /// `change`, write progress back and append the ledger entry.
    pub fn apply_exp_change<F>(
        &self,
        user_id: &str,
        change: F,
    ) -> Result<(ExpChange, ExpLogEntry)>
    where
        F: FnOnce(UserProgress) -> Result<ExpChange>,
    {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let current = tx
            .query_row(
                "SELECT level, current_exp, total_exp FROM users WHERE id = ?1",
                [user_id],
                |row| {
                    Ok(UserProgress {
                        level: row.get(0)?,
                        current_exp: row.get(1)?,
                        total_exp: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| DomainError::not_found("user", user_id))?;

        let outcome = change(current)?;

        tx.execute(
            "UPDATE users SET level = ?2, current_exp = ?3, total_exp = ?4 WHERE id = ?1",
            params![
                user_id,
                outcome.progress.level,
                outcome.progress.current_exp,
                outcome.progress.total_exp,
            ],
        )?;
        let entry = insert_exp_log(&tx, &outcome.entry, self.now())?;

        tx.commit().context("Failed to commit EXP change")?;
        Ok((outcome, entry))
    }

    pub fn list_exp_logs(&self, user_id: &str, limit: usize) -> Result<Vec<ExpLogEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM exp_logs WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
            EXP_LOG_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![user_id, limit], exp_log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ========================================================================
    // Streaks
    // ========================================================================

    pub fn get_streak(&self, user_id: &str) -> Result<Option<Streak>> {
        let conn = self.lock_conn()?;
        let streak = conn
            .query_row(
                "SELECT current_streak, longest_streak, last_activity_date
                 FROM streaks WHERE user_id = ?1",
                [user_id],
                streak_from_row,
            )
            .optional()?;
        Ok(streak)
    }

    /// Read-modify-write of a user's streak row, creating it on first use.
    pub fn update_streak<F>(&self, user_id: &str, update: F) -> Result<(Streak, StreakChange)>
    where
        F: FnOnce(Streak) -> (Streak, StreakChange),
    {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            [user_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(DomainError::not_found("user", user_id).into());
        }

        let current = tx
            .query_row(
                "SELECT current_streak, longest_streak, last_activity_date
                 FROM streaks WHERE user_id = ?1",
                [user_id],
                streak_from_row,
            )
            .optional()?
            .unwrap_or_default();

        let (next, change) = update(current);

        if change != StreakChange::Unchanged {
            tx.execute(
                "INSERT INTO streaks (user_id, current_streak, longest_streak, last_activity_date, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                    current_streak = excluded.current_streak,
                    longest_streak = excluded.longest_streak,
                    last_activity_date = excluded.last_activity_date,
                    updated_at = excluded.updated_at",
                params![
                    user_id,
                    next.current_streak,
                    next.longest_streak,
                    next.last_activity_date.map(format_date),
                    format_timestamp(self.now()),
                ],
            )?;
        }

        tx.commit().context("Failed to commit streak update")?;
        Ok((next, change))
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    pub fn insert_task(&self, task: &Task) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                TASK_COLUMNS
            ),
            params![
                task.id,
                task.user_id,
                task.title,
                task.description,
                task.priority.as_db_str(),
                task.status.as_db_str(),
                task.due_date.map(format_date),
                task.exp_reward,
                task.completed_at.map(format_timestamp),
                format_timestamp(task.created_at),
                format_timestamp(task.updated_at),
            ],
        )
        .context("Failed to insert task")?;
        Ok(())
    }

    pub fn update_task(&self, task: &Task) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE tasks
             SET title = ?3, description = ?4, priority = ?5, status = ?6, due_date = ?7,
                 exp_reward = ?8, completed_at = ?9, updated_at = ?10
             WHERE id = ?1 AND user_id = ?2",
            params![
                task.id,
                task.user_id,
                task.title,
                task.description,
                task.priority.as_db_str(),
                task.status.as_db_str(),
                task.due_date.map(format_date),
                task.exp_reward,
                task.completed_at.map(format_timestamp),
                format_timestamp(task.updated_at),
            ],
        )
        .context("Failed to update task")?;
        Ok(())
    }

    pub fn get_task(&self, user_id: &str, task_id: &str) -> Result<Option<Task>> {
        let conn = self.lock_conn()?;
        let task = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tasks WHERE id = ?1 AND user_id = ?2",
                    TASK_COLUMNS
                ),
                params![task_id, user_id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn list_tasks(&self, user_id: &str, filter: TaskFilter, limit: usize) -> Result<Vec<Task>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks
             WHERE user_id = ?1
               AND (?2 IS NULL OR status = ?2)
               AND (?3 IS NULL OR priority = ?3)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?4",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(
                params![
                    user_id,
                    filter.status.map(TaskStatus::as_db_str),
                    filter.priority.map(TaskPriority::as_db_str),
                    limit,
                ],
                task_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn delete_task(&self, user_id: &str, task_id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let removed = conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![task_id, user_id],
        )?;
        Ok(removed > 0)
    }

    pub fn count_tasks_with_status(&self, user_id: &str, status: TaskStatus) -> Result<i64> {
        let conn = self.lock_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE user_id = ?1 AND status = ?2",
            params![user_id, status.as_db_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_tasks_completed_on(&self, user_id: &str, date: NaiveDate) -> Result<i64> {
        let conn = self.lock_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM tasks
             WHERE user_id = ?1 AND status = 'completed' AND substr(completed_at, 1, 10) = ?2",
            params![user_id, format_date(date)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_tasks_completed_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<i64> {
        let conn = self.lock_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM tasks
             WHERE user_id = ?1 AND status = 'completed' AND completed_at >= ?2",
            params![user_id, format_timestamp(since)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Open (pending or in-progress) tasks due strictly before `today`.
    pub fn count_overdue_tasks(&self, user_id: &str, today: NaiveDate) -> Result<i64> {
        let conn = self.lock_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM tasks
             WHERE user_id = ?1
               AND status IN ('pending', 'in_progress')
               AND due_date IS NOT NULL
               AND due_date < ?2",
            params![user_id, format_date(today)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Open tasks, highest priority first, oldest first within a priority.
    pub fn list_open_tasks_by_priority(&self, user_id: &str, limit: usize) -> Result<Vec<Task>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks
             WHERE user_id = ?1 AND status IN ('pending', 'in_progress')
             ORDER BY CASE priority WHEN 'high' THEN 3 WHEN 'medium' THEN 2 ELSE 1 END DESC,
                      created_at ASC, rowid ASC
             LIMIT ?2",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![user_id, limit], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    // ========================================================================
    // Pomodoro sessions
    // ========================================================================

    pub fn insert_session(&self, session: &PomodoroSession) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO pomodoro_sessions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                SESSION_COLUMNS
            ),
            params![
                session.id,
                session.user_id,
                session.task_id,
                session.duration_minutes,
                session.break_minutes,
                session.status.as_db_str(),
                session.exp_reward,
                format_timestamp(session.started_at),
                session.ended_at.map(format_timestamp),
                format_timestamp(session.created_at),
            ],
        )
        .context("Failed to insert pomodoro session")?;
        Ok(())
    }

    pub fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE pomodoro_sessions SET status = ?2, ended_at = COALESCE(?3, ended_at) WHERE id = ?1",
            params![session_id, status.as_db_str(), ended_at.map(format_timestamp)],
        )?;
        Ok(())
    }

    pub fn get_session(&self, user_id: &str, session_id: &str) -> Result<Option<PomodoroSession>> {
        let conn = self.lock_conn()?;
        let session = conn
            .query_row(
                &format!(
                    "SELECT {} FROM pomodoro_sessions WHERE id = ?1 AND user_id = ?2",
                    SESSION_COLUMNS
                ),
                params![session_id, user_id],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    pub fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<PomodoroSession>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pomodoro_sessions WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
            SESSION_COLUMNS
        ))?;
        let sessions = stmt
            .query_map(params![user_id, limit], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Cancels running/paused sessions created before `cutoff`. Returns how many.
    pub fn cancel_stale_sessions(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.lock_conn()?;
        let cancelled = conn.execute(
            "UPDATE pomodoro_sessions SET status = 'cancelled', ended_at = ?3
             WHERE user_id = ?1 AND status IN ('running', 'paused') AND created_at < ?2",
            params![user_id, format_timestamp(cutoff), format_timestamp(now)],
        )?;
        Ok(cancelled)
    }

    pub fn find_active_session_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<PomodoroSession>> {
        let conn = self.lock_conn()?;
        let session = conn
            .query_row(
                &format!(
                    "SELECT {} FROM pomodoro_sessions
                     WHERE user_id = ?1 AND status IN ('running', 'paused') AND created_at >= ?2
                     ORDER BY created_at DESC LIMIT 1",
                    SESSION_COLUMNS
                ),
                params![user_id, format_timestamp(since)],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    /// `(count, minutes)` of completed sessions created between the two dates, inclusive.
    pub fn completed_session_totals_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<(i64, i64)> {
        let conn = self.lock_conn()?;
        let totals = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(duration_minutes), 0) FROM pomodoro_sessions
             WHERE user_id = ?1 AND status = 'completed'
               AND substr(created_at, 1, 10) BETWEEN ?2 AND ?3",
            params![user_id, format_date(from), format_date(to)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(totals)
    }

    pub fn count_completed_sessions_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<i64> {
        let conn = self.lock_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM pomodoro_sessions
             WHERE user_id = ?1 AND status = 'completed' AND created_at >= ?2",
            params![user_id, format_timestamp(since)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// `(count, minutes)` over every completed session.
    pub fn completed_session_totals(&self, user_id: &str) -> Result<(i64, i64)> {
        let conn = self.lock_conn()?;
        let totals = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(duration_minutes), 0) FROM pomodoro_sessions
             WHERE user_id = ?1 AND status = 'completed'",
            [user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(totals)
    }

    // ========================================================================
    // Schedules
    // ========================================================================

    pub fn insert_schedule(&self, schedule: &Schedule) -> Result<()> {
        let days = encode_days(schedule.days_of_week.as_deref())?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO schedules (id, user_id, title, description, schedule_type, start_time,
                                    end_time, days_of_week, day_of_month, is_active, exp_reward,
                                    created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                schedule.id,
                schedule.user_id,
                schedule.title,
                schedule.description,
                schedule.schedule_type.as_db_str(),
                schedule.start_time,
                schedule.end_time,
                days,
                schedule.day_of_month,
                schedule.is_active,
                schedule.exp_reward,
                format_timestamp(schedule.created_at),
                format_timestamp(schedule.updated_at),
            ],
        )
        .context("Failed to insert schedule")?;
        Ok(())
    }

    pub fn update_schedule(&self, schedule: &Schedule) -> Result<()> {
        let days = encode_days(schedule.days_of_week.as_deref())?;
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE schedules
             SET title = ?3, description = ?4, schedule_type = ?5, start_time = ?6, end_time = ?7,
                 days_of_week = ?8, day_of_month = ?9, is_active = ?10, updated_at = ?11
             WHERE id = ?1 AND user_id = ?2",
            params![
                schedule.id,
                schedule.user_id,
                schedule.title,
                schedule.description,
                schedule.schedule_type.as_db_str(),
                schedule.start_time,
                schedule.end_time,
                days,
                schedule.day_of_month,
                schedule.is_active,
                format_timestamp(schedule.updated_at),
            ],
        )
        .context("Failed to update schedule")?;
        Ok(())
    }

    /// Loads one schedule; `completed_today` reflects a completion on `today`.
    pub fn get_schedule(
        &self,
        user_id: &str,
        schedule_id: &str,
        today: NaiveDate,
    ) -> Result<Option<Schedule>> {
        let conn = self.lock_conn()?;
        let schedule = conn
            .query_row(
                &schedule_select("s.id = ?1 AND s.user_id = ?2", ""),
                params![schedule_id, user_id, format_date(today)],
                schedule_from_row,
            )
            .optional()?;
        Ok(schedule)
    }

    /// Schedules ordered by start time; `active_only` drops paused routines.
    pub fn list_schedules(
        &self,
        user_id: &str,
        schedule_type: Option<ScheduleType>,
        active_only: bool,
        today: NaiveDate,
    ) -> Result<Vec<Schedule>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&schedule_select(
            "s.user_id = ?1 AND (?2 IS NULL OR s.schedule_type = ?2) AND (?4 = 0 OR s.is_active = 1)",
            "ORDER BY s.start_time IS NULL, s.start_time ASC, s.created_at ASC",
        ))?;
        let schedules = stmt
            .query_map(
                params![
                    user_id,
                    schedule_type.map(ScheduleType::as_db_str),
                    format_date(today),
                    active_only,
                ],
                schedule_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(schedules)
    }

    pub fn delete_schedule(&self, user_id: &str, schedule_id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let removed = conn.execute(
            "DELETE FROM schedules WHERE id = ?1 AND user_id = ?2",
            params![schedule_id, user_id],
        )?;
        Ok(removed > 0)
    }

    /// Records a completion; returns `false` if one already exists for `date`.
    pub fn insert_schedule_completion(
        &self,
        schedule_id: &str,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<bool> {
        let conn = self.lock_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO schedule_completions (id, schedule_id, user_id, completed_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                uuid::Uuid::new_v4().to_string(),
                schedule_id,
                user_id,
                format_date(date),
                format_timestamp(self.now()),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Removes the completion for `date`; returns `false` if there was none.
    pub fn delete_schedule_completion(&self, schedule_id: &str, date: NaiveDate) -> Result<bool> {
        let conn = self.lock_conn()?;
        let removed = conn.execute(
            "DELETE FROM schedule_completions WHERE schedule_id = ?1 AND completed_date = ?2",
            params![schedule_id, format_date(date)],
        )?;
        Ok(removed > 0)
    }

    // ========================================================================
    // Moods
    // ========================================================================

    /// One mood per user per day; a second log for the same date overwrites it.
    pub fn upsert_mood(
        &self,
        user_id: &str,
        mood: MoodKind,
        energy_level: i64,
        note: Option<&str>,
        date: NaiveDate,
    ) -> Result<MoodEntry> {
        let now = format_timestamp(self.now());
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO moods (id, user_id, mood, energy_level, note, date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(user_id, date) DO UPDATE SET
                mood = excluded.mood,
                energy_level = excluded.energy_level,
                note = excluded.note,
                updated_at = excluded.updated_at",
            params![
                uuid::Uuid::new_v4().to_string(),
                user_id,
                mood.as_db_str(),
                energy_level,
                note,
                format_date(date),
                now,
            ],
        )
        .context("Failed to save mood")?;

        let entry = conn.query_row(
            &format!(
                "SELECT {} FROM moods WHERE user_id = ?1 AND date = ?2",
                MOOD_COLUMNS
            ),
            params![user_id, format_date(date)],
            mood_from_row,
        )?;
        Ok(entry)
    }

    pub fn get_mood_on(&self, user_id: &str, date: NaiveDate) -> Result<Option<MoodEntry>> {
        let conn = self.lock_conn()?;
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {} FROM moods WHERE user_id = ?1 AND date = ?2",
                    MOOD_COLUMNS
                ),
                params![user_id, format_date(date)],
                mood_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn get_mood(&self, user_id: &str, mood_id: &str) -> Result<Option<MoodEntry>> {
        let conn = self.lock_conn()?;
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {} FROM moods WHERE user_id = ?1 AND id = ?2",
                    MOOD_COLUMNS
                ),
                params![user_id, mood_id],
                mood_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Most recent moods first.
    pub fn list_recent_moods(&self, user_id: &str, limit: usize) -> Result<Vec<MoodEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM moods WHERE user_id = ?1 ORDER BY date DESC LIMIT ?2",
            MOOD_COLUMNS
        ))?;
        let moods = stmt
            .query_map(params![user_id, limit], mood_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(moods)
    }

    /// Moods between two dates inclusive, oldest first.
    pub fn list_moods_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MoodEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM moods WHERE user_id = ?1 AND date BETWEEN ?2 AND ?3 ORDER BY date ASC",
            MOOD_COLUMNS
        ))?;
        let moods = stmt
            .query_map(
                params![user_id, format_date(from), format_date(to)],
                mood_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(moods)
    }

    pub fn average_energy_since(&self, user_id: &str, since: NaiveDate) -> Result<Option<f64>> {
        let conn = self.lock_conn()?;
        let average = conn.query_row(
            "SELECT AVG(energy_level) FROM moods WHERE user_id = ?1 AND date >= ?2",
            params![user_id, format_date(since)],
            |row| row.get::<_, Option<f64>>(0),
        )?;
        Ok(average)
    }

    // ========================================================================
    // Assistant chat
    // ========================================================================

    pub fn add_chat_message(
        &self,
        user_id: &str,
        role: ChatRole,
        content: &str,
        context_snapshot: Option<&serde_json::Value>,
    ) -> Result<ChatMessage> {
        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            role,
            content: content.to_string(),
            context_snapshot: context_snapshot.cloned(),
            created_at: self.now(),
        };
        let snapshot_json = context_snapshot
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize context snapshot")?;

        let conn = self.lock_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO chat_messages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                CHAT_COLUMNS
            ),
            params![
                message.id,
                message.user_id,
                role.as_db_str(),
                message.content,
                snapshot_json,
                format_timestamp(message.created_at),
            ],
        )
        .context("Failed to insert chat message")?;
        Ok(message)
    }

    /// Most recent `limit` messages in chronological order.
    pub fn get_chat_history(&self, user_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chat_messages WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
            CHAT_COLUMNS
        ))?;
        let messages = stmt
            .query_map(params![user_id, limit], chat_message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        // Reverse to get chronological order
        Ok(messages.into_iter().rev().collect())
    }

    pub fn count_chat_messages(&self, user_id: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chat_messages WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn clear_chat_history(&self, user_id: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        let removed = conn.execute("DELETE FROM chat_messages WHERE user_id = ?1", [user_id])?;
        Ok(removed)
    }
}

fn insert_exp_log(
    conn: &Connection,
    entry: &NewExpLog,
    created_at: DateTime<Utc>,
) -> Result<ExpLogEntry> {
    let stored = ExpLogEntry {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: entry.user_id.clone(),
        amount: entry.amount,
        source: entry.source,
        description: entry.description.clone(),
        entity: entry.entity.clone(),
        created_at,
    };
    conn.execute(
        &format!(
            "INSERT INTO exp_logs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            EXP_LOG_COLUMNS
        ),
        params![
            stored.id,
            stored.user_id,
            stored.amount,
            stored.source.as_db_str(),
            stored.description,
            stored.entity.kind,
            stored.entity.id,
            format_timestamp(stored.created_at),
        ],
    )
    .context("Failed to append EXP log entry")?;
    Ok(stored)
}

fn schedule_select(condition: &str, order: &str) -> String {
    format!(
        "SELECT s.id, s.user_id, s.title, s.description, s.schedule_type, s.start_time,
                s.end_time, s.days_of_week, s.day_of_month, s.is_active, s.exp_reward,
                EXISTS(SELECT 1 FROM schedule_completions c
                       WHERE c.schedule_id = s.id AND c.completed_date = ?3),
                s.created_at, s.updated_at
         FROM schedules s
         WHERE {}
         {}",
        condition, order
    )
}

fn encode_days(days: Option<&[u8]>) -> Result<Option<String>> {
    days.map(serde_json::to_string)
        .transpose()
        .context("Failed to encode days_of_week")
}

fn conversion_error<E>(idx: usize, error: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(error))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| raw.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn optional_date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| raw.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        api_token: row.get(2)?,
        progress: UserProgress {
            level: row.get(3)?,
            current_exp: row.get(4)?,
            total_exp: row.get(5)?,
        },
        created_at: timestamp_at(row, 6)?,
    })
}

fn streak_from_row(row: &Row<'_>) -> rusqlite::Result<Streak> {
    Ok(Streak {
        current_streak: row.get(0)?,
        longest_streak: row.get(1)?,
        last_activity_date: optional_date_at(row, 2)?,
    })
}

fn exp_log_from_row(row: &Row<'_>) -> rusqlite::Result<ExpLogEntry> {
    Ok(ExpLogEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        source: ExpSource::from_db(&row.get::<_, String>(3)?),
        description: row.get(4)?,
        entity: EntityRef {
            kind: row.get(5)?,
            id: row.get(6)?,
        },
        created_at: timestamp_at(row, 7)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        priority: TaskPriority::from_db(&row.get::<_, String>(4)?),
        status: TaskStatus::from_db(&row.get::<_, String>(5)?),
        due_date: optional_date_at(row, 6)?,
        exp_reward: row.get(7)?,
        completed_at: optional_timestamp_at(row, 8)?,
        created_at: timestamp_at(row, 9)?,
        updated_at: timestamp_at(row, 10)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<PomodoroSession> {
    Ok(PomodoroSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        task_id: row.get(2)?,
        duration_minutes: row.get(3)?,
        break_minutes: row.get(4)?,
        status: SessionStatus::from_db(&row.get::<_, String>(5)?),
        exp_reward: row.get(6)?,
        started_at: timestamp_at(row, 7)?,
        ended_at: optional_timestamp_at(row, 8)?,
        created_at: timestamp_at(row, 9)?,
    })
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    let days_of_week = row
        .get::<_, Option<String>>(7)?
        .map(|raw| serde_json::from_str::<Vec<u8>>(&raw).map_err(|e| conversion_error(7, e)))
        .transpose()?;
    Ok(Schedule {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        schedule_type: ScheduleType::from_db(&row.get::<_, String>(4)?),
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        days_of_week,
        day_of_month: row.get(8)?,
        is_active: row.get(9)?,
        exp_reward: row.get(10)?,
        completed_today: row.get(11)?,
        created_at: timestamp_at(row, 12)?,
        updated_at: timestamp_at(row, 13)?,
    })
}

fn mood_from_row(row: &Row<'_>) -> rusqlite::Result<MoodEntry> {
    let date = row
        .get::<_, String>(5)?
        .parse()
        .map_err(|e| conversion_error(5, e))?;
    Ok(MoodEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        mood: MoodKind::from_db(&row.get::<_, String>(2)?),
        energy_level: row.get(3)?,
        note: row.get(4)?,
        date,
        created_at: timestamp_at(row, 6)?,
        updated_at: timestamp_at(row, 7)?,
    })
}

fn chat_message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let context_snapshot = row
        .get::<_, Option<String>>(4)?
        .map(|raw| serde_json::from_str(&raw).map_err(|e| conversion_error(4, e)))
        .transpose()?;
    Ok(ChatMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        role: ChatRole::from_db(&row.get::<_, String>(2)?),
        content: row.get(3)?,
        context_snapshot,
        created_at: timestamp_at(row, 5)?,
    })
}
