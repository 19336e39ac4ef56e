use serde::Serialize;

use crate::models::{ExpSource, Streak, UserProgress};
use crate::progress::streak::StreakChange;

/// Things worth telling a connected client about.
#[derive(Debug, Clone, Serialize)]
pub enum AppEvent {
    ExpChanged {
        user_id: String,
        amount: i64,
        source: ExpSource,
        progress: UserProgress,
        levels_gained: i64,
    },
    StreakChanged {
        user_id: String,
        change: StreakChange,
        streak: Streak,
    },
    ChatReplied {
        user_id: String,
        message_id: String,
        used_fallback: bool,
    },
}

impl AppEvent {
    pub fn user_id(&self) -> &str {
        match self {
            AppEvent::ExpChanged { user_id, .. }
            | AppEvent::StreakChanged { user_id, .. }
            | AppEvent::ChatReplied { user_id, .. } => user_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            AppEvent::ExpChanged { .. } => "exp_changed",
            AppEvent::StreakChanged { .. } => "streak_changed",
            AppEvent::ChatReplied { .. } => "chat_replied",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            AppEvent::ExpChanged {
                amount,
                source,
                progress,
                levels_gained,
                ..
            } => serde_json::json!({
                "amount": amount,
                "source": source,
                "progress": progress,
                "levels_gained": levels_gained,
            }),
            AppEvent::StreakChanged { change, streak, .. } => serde_json::json!({
                "change": change,
                "streak": streak,
            }),
            AppEvent::ChatReplied {
                message_id,
                used_fallback,
                ..
            } => serde_json::json!({
                "message_id": message_id,
                "used_fallback": used_fallback,
            }),
        }
    }
}

pub type EventSender = flume::Sender<AppEvent>;

/// Sends without caring whether anyone is listening.
pub fn publish(sender: &EventSender, event: AppEvent) {
    if sender.send(event).is_err() {
        tracing::trace!("No event listeners attached; dropping event");
    }
}
