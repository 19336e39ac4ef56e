use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::progress::leveling::exp_to_next_level;

/// EXP/level state of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgress {
    pub level: i64,
    pub current_exp: i64,
    pub total_exp: i64,
}

impl Default for UserProgress {
    fn default() -> Self {
        Self {
            level: 1,
            current_exp: 0,
            total_exp: 0,
        }
    }
}

impl UserProgress {
    pub fn exp_to_next_level(&self) -> i64 {
        exp_to_next_level(self.level)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub api_token: String,
    #[serde(flatten)]
    pub progress: UserProgress,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpSource {
    Task,
    Pomodoro,
    Schedule,
    Streak,
    Bonus,
    TaskUncomplete,
    ScheduleUncomplete,
}

impl ExpSource {
    pub fn as_db_str(self) -> &'static str {
        match self {
            ExpSource::Task => "task",
            ExpSource::Pomodoro => "pomodoro",
            ExpSource::Schedule => "schedule",
            ExpSource::Streak => "streak",
            ExpSource::Bonus => "bonus",
            ExpSource::TaskUncomplete => "task_uncomplete",
            ExpSource::ScheduleUncomplete => "schedule_uncomplete",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "task" => ExpSource::Task,
            "pomodoro" => ExpSource::Pomodoro,
            "schedule" => ExpSource::Schedule,
            "streak" => ExpSource::Streak,
            "task_uncomplete" => ExpSource::TaskUncomplete,
            "schedule_uncomplete" => ExpSource::ScheduleUncomplete,
            _ => ExpSource::Bonus,
        }
    }
}

/// The entity an EXP change is linked to, e.g. `("task", <id>)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: &str, id: &str) -> Self {
        Self {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

/// Append-only ledger row. `amount` is negative for deductions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpLogEntry {
    pub id: String,
    pub user_id: String,
    pub amount: i64,
    pub source: ExpSource,
    pub description: Option<String>,
    pub entity: EntityRef,
    pub created_at: DateTime<Utc>,
}

/// A ledger entry before the store has assigned it an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExpLog {
    pub user_id: String,
    pub amount: i64,
    pub source: ExpSource,
    pub description: Option<String>,
    pub entity: EntityRef,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak {
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_activity_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_db_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(TaskPriority::Low),
            "medium" => Some(TaskPriority::Medium),
            "high" => Some(TaskPriority::High),
            _ => None,
        }
    }

    pub fn from_db(raw: &str) -> Self {
        Self::parse(raw).unwrap_or(TaskPriority::Medium)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }

    pub fn from_db(raw: &str) -> Self {
        Self::parse(raw).unwrap_or(TaskStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub due_date: Option<NaiveDate>,
    pub exp_reward: i64,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paused" => SessionStatus::Paused,
            "completed" => SessionStatus::Completed,
            "cancelled" => SessionStatus::Cancelled,
            _ => SessionStatus::Running,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Paused)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PomodoroSession {
    pub id: String,
    pub user_id: String,
    pub task_id: Option<String>,
    pub duration_minutes: i64,
    pub break_minutes: i64,
    pub status: SessionStatus,
    pub exp_reward: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Daily,
    Weekly,
    Monthly,
}

impl ScheduleType {
    pub fn as_db_str(self) -> &'static str {
        match self {
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Monthly => "monthly",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(ScheduleType::Daily),
            "weekly" => Some(ScheduleType::Weekly),
            "monthly" => Some(ScheduleType::Monthly),
            _ => None,
        }
    }

    pub fn from_db(raw: &str) -> Self {
        Self::parse(raw).unwrap_or(ScheduleType::Daily)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub schedule_type: ScheduleType,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub days_of_week: Option<Vec<u8>>,
    pub day_of_month: Option<u8>,
    pub is_active: bool,
    pub exp_reward: i64,
    /// Whether a completion exists for the date the schedule was loaded for.
    pub completed_today: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoodKind {
    Great,
    Good,
    Okay,
    Bad,
    Terrible,
}

impl MoodKind {
    pub fn as_db_str(self) -> &'static str {
        match self {
            MoodKind::Great => "great",
            MoodKind::Good => "good",
            MoodKind::Okay => "okay",
            MoodKind::Bad => "bad",
            MoodKind::Terrible => "terrible",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "great" => Some(MoodKind::Great),
            "good" => Some(MoodKind::Good),
            "okay" => Some(MoodKind::Okay),
            "bad" => Some(MoodKind::Bad),
            "terrible" => Some(MoodKind::Terrible),
            _ => None,
        }
    }

    pub fn from_db(raw: &str) -> Self {
        Self::parse(raw).unwrap_or(MoodKind::Okay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodEntry {
    pub id: String,
    pub user_id: String,
    pub mood: MoodKind,
    pub energy_level: i64,
    pub note: Option<String>,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_db_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "assistant" => ChatRole::Assistant,
            _ => ChatRole::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_snapshot: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
