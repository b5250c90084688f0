use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{bank::Question, registry::Difficulty};

/// Selected option indices per question index. A missing entry is an empty selection.
pub type Answers = BTreeMap<usize, BTreeSet<usize>>;

pub const NOT_SPECIFIED: &str = "not specified";

const TAG_LEN: usize = 8;

/// At most one active session exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: i64,
    pub specialization: String,
}

impl SessionKey {
    pub fn new(user_id: i64, specialization: impl Into<String>) -> Self {
        Self {
            user_id,
            specialization: specialization.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.specialization)
    }
}

/// Where the question message lives, so it can be edited in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    User,
    Timeout,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FinishReason::User => "user",
            FinishReason::Timeout => "timeout",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub key: SessionKey,
    pub difficulty: Difficulty,
    pub questions: Vec<Question>,
    pub answers: Answers,
    pub current_index: usize,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub message_ref: Option<MessageRef>,
    pub status: SessionStatus,
}

impl Session {
    pub fn selections(&self, question_index: usize) -> BTreeSet<usize> {
        self.answers
            .get(&question_index)
            .cloned()
            .unwrap_or_default()
    }

    /// Adds the option when absent and removes it when present.
    pub fn toggle(&mut self, question_index: usize, option_index: usize) {
        let selected = self.answers.entry(question_index).or_default();
        if !selected.remove(&option_index) {
            selected.insert(option_index);
        }
        if selected.is_empty() {
            self.answers.remove(&question_index);
        }
    }

    /// Short prefix of the id carried by the session's inline buttons, so a
    /// press on an older session's message never lands on this one.
    pub fn tag(&self) -> String {
        let mut tag = self.id.simple().to_string();
        tag.truncate(TAG_LEN);
        tag
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    pub fn is_last_question(&self) -> bool {
        self.current_index + 1 >= self.questions.len()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline_at
    }

    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline_at - now).to_std().unwrap_or_default()
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or_default()
    }
}

/// Append-only record of one finished attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub session_id: Uuid,
    pub user_id: i64,
    pub specialization: String,
    pub difficulty: Difficulty,
    pub score: u32,
    pub total: u32,
    pub time_taken_secs: i64,
    pub reason: FinishReason,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub full_name: String,
    pub position: String,
    pub department: String,
}

impl UserProfile {
    pub fn placeholder(user_id: i64) -> Self {
        Self {
            user_id,
            full_name: NOT_SPECIFIED.to_owned(),
            position: NOT_SPECIFIED.to_owned(),
            department: NOT_SPECIFIED.to_owned(),
        }
    }
}

/// Aggregates recomputed from result rows on every query.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Stats {
    pub attempts: u32,
    pub passed: u32,
    pub best_percentage: f64,
    pub average_percentage: f64,
}

impl Stats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        f64::from(self.passed) * 100.0 / f64::from(self.attempts)
    }
}
