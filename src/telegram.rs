//! Telegram implementations of the render and notification collaborators.

use async_trait::async_trait;
use teloxide::{
    payloads::{EditMessageTextSetters, SendDocumentSetters, SendMessageSetters},
    prelude::Requester,
    types::{ChatId, InlineKeyboardMarkup, InputFile, MessageId},
    ApiError, Bot, RequestError,
};

use crate::{
    certificate::{certificate_file_name, certificate_text},
    keyboard::{answers_keyboard, result_keyboard},
    render::{format_duration, Notifier, QuestionView, RenderError, Renderer, ResultSummary},
    session::{FinishReason, MessageRef, SessionKey},
};

pub fn question_text(view: &QuestionView) -> String {
    let hint = if view.question.is_multi_choice() {
        "\n\nSeveral answers may be correct."
    } else {
        ""
    };

    format!(
        "Question {} of {}\n\n{}{}\n\nTime left: {}",
        view.index + 1,
        view.total,
        view.question.prompt(),
        hint,
        format_duration(view.time_remaining)
    )
}

pub fn result_text(summary: &ResultSummary) -> String {
    let header = match summary.reason {
        FinishReason::User => "Test finished!",
        FinishReason::Timeout => "Time is up! The test was finished automatically.",
    };
    let verdict = if summary.passed() { "passed✅" } else { "not passed❌" };

    format!(
        "{header}\n\n{}, {}\nCorrect answers: {} of {}\nPercentage: {:.1}%\nGrade: {}\nTime taken: {}\nResult: {verdict}",
        summary.specialization_title,
        summary.difficulty.label(),
        summary.score.correct,
        summary.score.total,
        summary.score.percentage,
        summary.grade,
        format_duration(summary.time_taken),
    )
}

/// Sends the plain-text certificate for `summary` as a document.
pub async fn send_certificate(bot: &Bot, chat_id: ChatId, summary: &ResultSummary) -> Result<(), RenderError> {
    let document = InputFile::memory(certificate_text(summary).into_bytes())
        .file_name(certificate_file_name(summary));

    bot.send_document(chat_id, document)
        .caption(format!("Certificate: {}", summary.specialization_title))
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct TelegramRenderer {
    bot: Bot,
}

impl TelegramRenderer {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Edits `target` in place, falling back to a fresh message when the old
    /// one can no longer be edited. Private chats share the user's id.
    async fn show(
        &self,
        key: &SessionKey,
        text: String,
        markup: InlineKeyboardMarkup,
        target: Option<MessageRef>,
    ) -> Result<MessageRef, RenderError> {
        if let Some(target) = target {
            let edited = self
                .bot
                .edit_message_text(ChatId(target.chat_id), MessageId(target.message_id), text.clone())
                .reply_markup(markup.clone())
                .await;

            match edited {
                Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => return Ok(target),
                Err(e) => {
                    tracing::warn!(session = %key, error = %e, "Failed to edit message, sending a new one");
                }
            }
        }

        let chat_id = target.map_or(ChatId(key.user_id), |t| ChatId(t.chat_id));
        let sent = self.bot.send_message(chat_id, text).reply_markup(markup).await?;

        Ok(MessageRef {
            chat_id: sent.chat.id.0,
            message_id: sent.id.0,
        })
    }
}

#[async_trait]
impl Renderer for TelegramRenderer {
    async fn render_question(
        &self,
        key: &SessionKey,
        view: &QuestionView,
        target: Option<MessageRef>,
    ) -> Result<MessageRef, RenderError> {
        let markup = answers_keyboard(&key.specialization, view);
        self.show(key, question_text(view), markup, target).await
    }

    async fn render_result(
        &self,
        key: &SessionKey,
        summary: &ResultSummary,
        target: Option<MessageRef>,
    ) -> Result<(), RenderError> {
        self.show(key, result_text(summary), result_keyboard(&key.specialization), target)
            .await?;
        Ok(())
    }
}

pub struct TelegramNotifier {
    bot: Bot,
    auto_certificate: bool,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, auto_certificate: bool) -> Self {
        Self {
            bot,
            auto_certificate,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, summary: &ResultSummary) -> Result<(), RenderError> {
        if !(self.auto_certificate && summary.passed()) {
            return Ok(());
        }

        tracing::info!(session = %summary.key, "Sending certificate automatically");
        send_certificate(&self.bot, ChatId(summary.key.user_id), summary).await
    }
}
