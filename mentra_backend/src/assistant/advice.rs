//! Deterministic replies used when no language model answers.

use regex_lite::Regex;

use super::context::{ProductivitySnapshot, MOOD_NOT_LOGGED};

pub const DEFAULT_REPLY: &str = "I'm your Mentra productivity assistant! I can help you with:\n\n\
- 📋 **Tasks** — Ask about your pending/completed tasks\n\
- ⏱️ **Focus** — Check your Pomodoro stats\n\
- 📅 **Schedules** — Review your routines\n\
- 😊 **Mood** — Discuss your mood patterns\n\
- 🔥 **Streaks** — Check your consistency\n\
- 💡 **Advice** — Get productivity tips\n\n\
Just ask me anything!";

/// The numbers a reply can mention, with defaults already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdviceInputs {
    pub pending: i64,
    pub completed_today: i64,
    pub overdue: i64,
    pub streak: i64,
    pub level: i64,
    pub today_sessions: i64,
    pub today_minutes: i64,
    pub mood_today: String,
}

impl Default for AdviceInputs {
    fn default() -> Self {
        Self {
            pending: 0,
            completed_today: 0,
            overdue: 0,
            streak: 0,
            level: 1,
            today_sessions: 0,
            today_minutes: 0,
            mood_today: MOOD_NOT_LOGGED.to_string(),
        }
    }
}

impl AdviceInputs {
    pub fn from_snapshot(snapshot: &ProductivitySnapshot) -> Self {
        Self {
            pending: snapshot.tasks.pending_count,
            completed_today: snapshot.tasks.completed_today,
            overdue: snapshot.tasks.overdue_count,
            streak: snapshot.streak.current,
            level: snapshot.user_profile.level,
            today_sessions: snapshot.pomodoro.today_sessions,
            today_minutes: snapshot.pomodoro.today_minutes,
            mood_today: snapshot.mood.today.clone(),
        }
    }

    /// Reads the fields back out of a rendered system prompt. Each field is
    /// looked up only inside its own `## Section`, on a line of its own, so
    /// task titles and names in the lists cannot stand in for the numbers.
    /// Anything that cannot be found keeps its default.
    pub fn from_prompt(prompt: &str) -> Self {
        let defaults = Self::default();
        let profile = section(prompt, "User Profile");
        let tasks = section(prompt, "Tasks");
        let pomodoro = section(prompt, "Pomodoro (Focus Sessions)");
        let mood = section(prompt, "Mood");
        let streak = section(prompt, "Streak");

        let (today_sessions, today_minutes) = pomodoro
            .and_then(|body| capture_pair(body, r"(?m)^- Today: (\d+) sessions \((\d+) min\)$"))
            .unwrap_or((defaults.today_sessions, defaults.today_minutes));
        Self {
            pending: field_number(tasks, "Pending").unwrap_or(defaults.pending),
            completed_today: field_number(tasks, "Completed Today")
                .unwrap_or(defaults.completed_today),
            overdue: field_number(tasks, "Overdue").unwrap_or(defaults.overdue),
            streak: streak
                .and_then(|body| capture_number(body, r"(?m)^- Current: (\d+) days$"))
                .unwrap_or(defaults.streak),
            level: profile
                .and_then(|body| capture_number(body, r"(?m)^- Level: (\d+) \(EXP: "))
                .unwrap_or(defaults.level),
            today_sessions,
            today_minutes,
            mood_today: mood
                .and_then(|body| capture_text(body, r"(?m)^- Today: (.+)$"))
                .unwrap_or(defaults.mood_today),
        }
    }
}

/// Body of the `## heading` section, up to the next heading or the closing
/// guidelines block.
fn section<'a>(prompt: &'a str, heading: &str) -> Option<&'a str> {
    let marker = format!("\n## {}\n", heading);
    let start = prompt.find(&marker)? + marker.len();
    let rest = &prompt[start..];
    let end = ["\n## ", "\n\nGuidelines:"]
        .iter()
        .filter_map(|stop| rest.find(stop))
        .min()
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

fn field_number(body: Option<&str>, label: &str) -> Option<i64> {
    let pattern = format!(r"(?m)^- {}: (\d+)$", regex_lite::escape(label));
    capture_number(body?, &pattern)
}

fn captures<'a>(text: &'a str, pattern: &str) -> Option<regex_lite::Captures<'a>> {
    Regex::new(pattern).ok()?.captures(text)
}

fn capture_number(text: &str, pattern: &str) -> Option<i64> {
    captures(text, pattern)?.get(1)?.as_str().parse().ok()
}

fn capture_pair(text: &str, pattern: &str) -> Option<(i64, i64)> {
    let caps = captures(text, pattern)?;
    let first = caps.get(1)?.as_str().parse().ok()?;
    let second = caps.get(2)?.as_str().parse().ok()?;
    Some((first, second))
}

fn capture_text(text: &str, pattern: &str) -> Option<String> {
    captures(text, pattern)?
        .get(1)
        .map(|m| m.as_str().trim().to_string())
}

/// Reply topics in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Tasks,
    Focus,
    Mood,
    Streak,
    Level,
    Greeting,
    Advice,
}

const TOPICS: &[(Topic, &[&str])] = &[
    (Topic::Tasks, &["task", "tugas", "todo"]),
    (Topic::Focus, &["focus", "pomodoro", "timer", "fokus"]),
    (Topic::Mood, &["mood", "feel", "perasaan", "rasa"]),
    (Topic::Streak, &["streak", "konsisten"]),
    (Topic::Level, &["level", "exp", "progress"]),
    (Topic::Greeting, &["hi", "hello", "halo", "hey"]),
    (Topic::Advice, &["advice", "tip", "saran", "suggest"]),
];

/// First topic with a keyword contained in the lower-cased message.
pub fn classify(message: &str) -> Option<Topic> {
    let lower = message.to_lowercase();
    TOPICS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(topic, _)| *topic)
}

pub fn generate(inputs: &AdviceInputs, message: &str) -> String {
    match classify(message) {
        Some(topic) => topic.respond(inputs),
        None => DEFAULT_REPLY.to_string(),
    }
}

impl Topic {
    pub fn respond(self, inputs: &AdviceInputs) -> String {
        match self {
            Topic::Tasks => tasks_reply(inputs),
            Topic::Focus => focus_reply(inputs),
            Topic::Mood => mood_reply(inputs),
            Topic::Streak => streak_reply(inputs),
            Topic::Level => format!(
                "You're at **Level {}**. Every task you complete, every focus session you finish, and every schedule you check off earns you EXP. Keep grinding! 📈",
                inputs.level
            ),
            Topic::Greeting => greeting_reply(inputs),
            Topic::Advice => advice_reply(inputs),
        }
    }
}

fn tasks_reply(inputs: &AdviceInputs) -> String {
    let mut parts = Vec::new();
    if inputs.completed_today > 0 {
        parts.push(format!(
            "Great job! You've completed **{} task(s)** today. 🎉",
            inputs.completed_today
        ));
    }
    if inputs.pending > 0 {
        parts.push(format!(
            "You have **{} pending task(s)** waiting. Try tackling the high-priority ones first.",
            inputs.pending
        ));
    }
    if inputs.overdue > 0 {
        parts.push(format!(
            "⚠️ You have **{} overdue task(s)**. Consider reviewing and updating their deadlines.",
            inputs.overdue
        ));
    }
    if parts.is_empty() {
        parts.push(
            "You're all caught up on tasks! Consider planning ahead for tomorrow.".to_string(),
        );
    }
    parts.join("\n\n")
}

fn focus_reply(inputs: &AdviceInputs) -> String {
    if inputs.today_sessions == 0 {
        return "You haven't started any focus sessions today. A 25-minute Pomodoro is a great way to build momentum! Start with your most important task. 🎯".to_string();
    }
    let follow_up = if inputs.today_sessions >= 4 {
        "That's excellent deep work! Remember to take proper breaks. 💪"
    } else {
        "Keep going! Try to aim for at least 4 sessions today for optimal productivity."
    };
    format!(
        "You've completed **{} focus session(s)** today ({} minutes). {}",
        inputs.today_sessions, inputs.today_minutes, follow_up
    )
}

fn mood_reply(inputs: &AdviceInputs) -> String {
    let mood = inputs.mood_today.as_str();
    if mood.contains("Not logged") {
        return "You haven't logged your mood today. Taking a moment to check in with yourself is important for self-awareness. Head to the Mood page to log how you're feeling! 😊".to_string();
    }
    if mood.contains("great") || mood.contains("good") {
        return format!(
            "You're feeling **{}** today — that's wonderful! Ride this positive energy and tackle something challenging. 🌟",
            mood
        );
    }
    if mood.contains("bad") || mood.contains("terrible") {
        return format!(
            "I see you're not feeling your best today ({}). That's okay — be gentle with yourself. Focus on small wins and don't hesitate to take breaks. Tomorrow is a new day. 💙",
            mood
        );
    }
    format!(
        "Your mood today: **{}**. Staying aware of your emotional state helps you work smarter. Keep tracking! 📊",
        mood
    )
}

fn streak_reply(inputs: &AdviceInputs) -> String {
    if inputs.streak > 0 {
        format!(
            "🔥 You're on a **{}-day streak**! Consistency is the key to growth. Keep showing up every day and your streak will keep climbing!",
            inputs.streak
        )
    } else {
        "Your streak is at 0. Complete a task, finish a focus session, or check off a schedule item to start building your streak today! 🚀".to_string()
    }
}

fn greeting_reply(inputs: &AdviceInputs) -> String {
    let overdue = if inputs.overdue > 0 {
        format!(" ({} overdue)", inputs.overdue)
    } else {
        String::new()
    };
    [
        "Hey there! 👋 Here's your quick summary:".to_string(),
        format!("- **{}** pending tasks{}", inputs.pending, overdue),
        format!(
            "- **{}** focus sessions today ({} min)",
            inputs.today_sessions, inputs.today_minutes
        ),
        format!("- **{}-day** streak", inputs.streak),
        format!("- Level **{}**", inputs.level),
        "\nAsk me about your tasks, focus sessions, mood, streaks, or anything productivity-related!"
            .to_string(),
    ]
    .join("\n")
}

fn advice_reply(inputs: &AdviceInputs) -> String {
    let mut tips = Vec::new();
    if inputs.overdue > 0 {
        tips.push(format!(
            "Review your **{} overdue task(s)** — reschedule or break them into smaller pieces.",
            inputs.overdue
        ));
    }
    if inputs.today_sessions == 0 {
        tips.push("Start a **Pomodoro session** to build focus momentum.".to_string());
    }
    if inputs.pending > 3 {
        tips.push(format!(
            "You have {} pending tasks. Prioritize the top 3 and focus on those first.",
            inputs.pending
        ));
    }
    if inputs.streak > 3 {
        tips.push(format!(
            "Your {}-day streak is impressive — keep it going!",
            inputs.streak
        ));
    }
    if tips.is_empty() {
        tips.push("You're doing well! Stay consistent and keep building good habits.".to_string());
    }
    format!("Here are my suggestions:\n\n{}", tips.join("\n\n"))
}
