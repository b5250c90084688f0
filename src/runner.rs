use std::sync::Arc;

use teloxide::{
    dispatching::dialogue::GetChatId,
    payloads::{AnswerCallbackQuerySetters, SendMessageSetters},
    prelude::Requester,
    types::{CallbackQuery, ChatId, Message, ReplyMarkup},
    Bot,
};
use tracing::instrument;

use crate::{
    callback::CallbackAction,
    commands,
    controller::{ControllerError, Outcome, SessionController},
    keyboard::{difficulty_keyboard, specializations_keyboard, PROFILE_BUTTON, STATS_BUTTON},
    registry::Difficulty,
    session::MessageRef,
    state::QuizState,
    telegram::send_certificate,
    HandlerResult, UserDialogue,
};

/// Sends the tier menu of one specialization, or says why it is unavailable.
pub(crate) async fn send_difficulty_menu(
    bot: &Bot,
    chat_id: ChatId,
    controller: &SessionController,
    specialization: &str,
) -> HandlerResult {
    let registry = controller.registry();
    let Some(found) = registry.get(specialization) else {
        bot.send_message(chat_id, "Unknown test.").await?;
        return Ok(());
    };

    let bank = match registry.bank(specialization) {
        Ok(bank) => bank,
        Err(e) => {
            tracing::warn!(specialization, error = %e, "Offering an unavailable test");
            bot.send_message(chat_id, "Sorry, this test is temporarily unavailable.")
                .await?;
            return Ok(());
        }
    };

    let tiers: Vec<_> = Difficulty::ALL
        .into_iter()
        .map(|d| (d, found.policy(d)))
        .collect();

    bot.send_message(
        chat_id,
        format!("{}\nChoose the difficulty level:", found.title()),
    )
    .reply_markup(difficulty_keyboard(specialization, &tiers, bank.count()))
    .await?;
    Ok(())
}

#[instrument(level = "info", skip(bot, dialogue, controller))]
pub(crate) async fn choose_specialization(
    bot: Bot,
    dialogue: UserDialogue,
    msg: Message,
    controller: Arc<SessionController>,
) -> HandlerResult {
    match msg.text() {
        Some(PROFILE_BUTTON) => commands::profile(bot, msg, dialogue).await?,
        Some(STATS_BUTTON) => commands::stats(bot, msg, controller).await?,
        Some(title) => {
            let Some(specialization) = controller.registry().find_by_title(title) else {
                bot.send_message(msg.chat.id, "Please, choose a test from the menu.")
                    .reply_markup(specializations_keyboard(&controller.registry().specializations()))
                    .await?;
                return Ok(());
            };
            let Some(user) = msg.from.as_ref() else {
                return Ok(());
            };

            tracing::info!(user = user.id.0, specialization = specialization.id(), "Test chosen");
            if controller.profile(user.id.0 as i64).await?.is_none() {
                bot.send_message(
                    msg.chat.id,
                    "Before the test, please introduce yourself. What is your full name?",
                )
                .reply_markup(ReplyMarkup::kb_remove())
                .await?;
                dialogue
                    .update(QuizState::ReceiveFullName {
                        specialization: Some(specialization.id().to_owned()),
                    })
                    .await?;
            } else {
                send_difficulty_menu(&bot, msg.chat.id, &controller, specialization.id()).await?;
            }
        }
        None => {
            bot.send_message(msg.chat.id, "Please, choose a test from the menu.")
                .await?;
        }
    }
    Ok(())
}

/// Routes an inline button press to the session controller. The query is
/// always answered so the client stops its progress indicator.
#[instrument(level = "debug", skip(bot, q, controller), fields(user = q.from.id.0, data = ?q.data))]
pub(crate) async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    controller: Arc<SessionController>,
) -> HandlerResult {
    let action = match q.data.as_deref().map(str::parse::<CallbackAction>) {
        Some(Ok(action)) => action,
        other => {
            tracing::debug!(?other, "Unrecognised callback data");
            bot.answer_callback_query(&q.id).text("This button is outdated.").await?;
            return Ok(());
        }
    };

    let user_id = q.from.id.0 as i64;
    let chat_id = q.chat_id().unwrap_or(ChatId(user_id));
    let origin = q.message.as_ref().map(|message| MessageRef {
        chat_id: chat_id.0,
        message_id: message.id().0,
    });

    let outcome = match action {
        CallbackAction::Difficulty {
            specialization,
            difficulty,
        } => {
            match controller.start(user_id, &specialization, difficulty, origin).await {
                Ok(_) => bot.answer_callback_query(&q.id).await?,
                Err(ControllerError::QuestionBankUnavailable { reason, .. }) => {
                    tracing::warn!(%specialization, %reason, "Cannot start test");
                    bot.answer_callback_query(&q.id)
                        .text("Sorry, this test is temporarily unavailable.")
                        .show_alert(true)
                        .await?
                }
                Err(e) => {
                    bot.answer_callback_query(&q.id).text("Something went wrong, try again.").await?;
                    return Err(e.into());
                }
            };
            return Ok(());
        }
        CallbackAction::Toggle {
            specialization,
            session,
            question,
            option,
        } => {
            controller
                .toggle_answer(user_id, &specialization, &session, question, option)
                .await
        }
        CallbackAction::Next {
            specialization,
            session,
            question,
        } => controller.advance(user_id, &specialization, &session, question).await,
        CallbackAction::Finish {
            specialization,
            session,
        } => controller.finish_shown(user_id, &specialization, &session).await,
        CallbackAction::Certificate { specialization } => {
            bot.answer_callback_query(&q.id).await?;
            match controller.latest_summary(user_id, &specialization).await? {
                Some(summary) => send_certificate(&bot, chat_id, &summary).await?,
                None => {
                    bot.send_message(chat_id, "No results to issue a certificate for.")
                        .await?;
                }
            }
            return Ok(());
        }
        CallbackAction::Retake { specialization } => {
            bot.answer_callback_query(&q.id).await?;
            send_difficulty_menu(&bot, chat_id, &controller, &specialization).await?;
            return Ok(());
        }
        CallbackAction::Menu => {
            bot.answer_callback_query(&q.id).await?;
            bot.send_message(chat_id, "Please choose a test:")
                .reply_markup(specializations_keyboard(&controller.registry().specializations()))
                .await?;
            return Ok(());
        }
    };

    match outcome {
        Ok(Outcome::Updated | Outcome::Finished(_)) => {
            bot.answer_callback_query(&q.id).await?;
        }
        Ok(Outcome::Ignored | Outcome::NoActiveSession) => {
            bot.answer_callback_query(&q.id).text("Nothing to do here.").await?;
        }
        Err(e) => {
            bot.answer_callback_query(&q.id).text("Something went wrong, try again.").await?;
            return Err(e.into());
        }
    }
    Ok(())
}
