use std::{collections::BTreeSet, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{
    bank::Question,
    registry::Difficulty,
    scoring::{Grade, Score},
    session::{FinishReason, MessageRef, SessionKey, UserProfile},
};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),
}

/// What the user needs to see for one question.
#[derive(Debug, Clone)]
pub struct QuestionView {
    /// [`Session::tag`](crate::session::Session::tag) of the session shown.
    pub session_tag: String,
    pub index: usize,
    pub total: usize,
    pub question: Question,
    pub selections: BTreeSet<usize>,
    pub time_remaining: Duration,
    pub is_last: bool,
}

/// Final outcome of an attempt, as handed to the render and notification
/// collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub key: SessionKey,
    pub specialization_title: String,
    pub difficulty: Difficulty,
    pub score: Score,
    pub grade: Grade,
    pub time_taken: Duration,
    pub reason: FinishReason,
    pub completed_at: DateTime<Utc>,
    pub profile: UserProfile,
}

impl ResultSummary {
    pub fn passed(&self) -> bool {
        self.score.passed()
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Shows a question, editing `target` in place when given. Returns the
    /// message now holding the question.
    async fn render_question(
        &self,
        key: &SessionKey,
        view: &QuestionView,
        target: Option<MessageRef>,
    ) -> Result<MessageRef, RenderError>;

    async fn render_result(
        &self,
        key: &SessionKey,
        summary: &ResultSummary,
        target: Option<MessageRef>,
    ) -> Result<(), RenderError>;
}

/// Fire-and-forget consumer of finished attempts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, summary: &ResultSummary) -> Result<(), RenderError>;
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
