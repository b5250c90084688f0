use std::{fmt::Write, sync::Arc};

use teloxide::{
    payloads::SendMessageSetters,
    prelude::Requester,
    types::{Message, ReplyMarkup},
    utils::command::BotCommands,
    Bot,
};
use tracing::instrument;

use crate::{
    config::Config,
    controller::SessionController,
    keyboard::specializations_keyboard,
    state::QuizState,
    HandlerResult, UserDialogue,
};

#[derive(Debug, Clone, BotCommands)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "display help.")]
    Help,
    #[command(description = "start the bot")]
    Start,
    #[command(description = "cancel the current dialogue")]
    Cancel,
    #[command(description = "fill in your profile again")]
    Profile,
    #[command(description = "show your results")]
    Stats,
    #[command(description = "reload a question bank (admin only)")]
    Reload(String),
}

pub(crate) async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

pub(crate) async fn cancel(
    bot: Bot,
    dialogue: UserDialogue,
    msg: Message,
    controller: Arc<SessionController>,
) -> HandlerResult {
    bot.send_message(msg.chat.id, "Cancelling dialogue")
        .reply_markup(specializations_keyboard(&controller.registry().specializations()))
        .await?;
    dialogue.update(QuizState::Start).await?;
    Ok(())
}

pub(crate) async fn start(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    controller: Arc<SessionController>,
) -> HandlerResult {
    bot.send_message(msg.chat.id, "Please choose a test:")
        .reply_markup(specializations_keyboard(&controller.registry().specializations()))
        .await?;
    dialogue.update(QuizState::Start).await?;
    Ok(())
}

pub(crate) async fn profile(bot: Bot, msg: Message, dialogue: UserDialogue) -> HandlerResult {
    bot.send_message(msg.chat.id, "Let's update your profile. What is your full name?")
        .reply_markup(ReplyMarkup::kb_remove())
        .await?;
    dialogue
        .update(QuizState::ReceiveFullName {
            specialization: None,
        })
        .await?;
    Ok(())
}

#[instrument(level = "info", skip(bot, controller))]
pub(crate) async fn stats(bot: Bot, msg: Message, controller: Arc<SessionController>) -> HandlerResult {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;

    let mut text = String::from("Your results:\n");
    let mut any = false;
    for specialization in controller.registry().specializations() {
        let stats = controller.stats(user_id, Some(specialization.id())).await?;
        if stats.attempts == 0 {
            continue;
        }
        any = true;
        let _ = write!(
            text,
            "\n{}\nAttempts: {}, passed: {}\nBest: {:.1}%, average: {:.1}%\nSuccess rate: {:.0}%\n",
            specialization.title(),
            stats.attempts,
            stats.passed,
            stats.best_percentage,
            stats.average_percentage,
            stats.success_rate()
        );
    }

    if !any {
        text = "You have not finished any tests yet.".to_owned();
    }
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

#[instrument(level = "info", skip(bot, controller, config))]
pub(crate) async fn reload(
    bot: Bot,
    msg: Message,
    specialization: String,
    controller: Arc<SessionController>,
    config: Arc<Config>,
) -> HandlerResult {
    let username = msg.from.as_ref().and_then(|u| u.username.as_deref());
    if !config.is_admin(username) {
        tracing::info!(?username, "Reload refused: not an admin");
        bot.send_message(msg.chat.id, "Only the administrator can reload questions.")
            .await?;
        return Ok(());
    }

    let specialization = specialization.trim();
    let reply = match controller.registry().reload(specialization) {
        Ok(count) => {
            tracing::info!(specialization, count, "Question bank reloaded");
            format!("Reloaded '{specialization}': {count} questions.")
        }
        Err(e) => {
            tracing::warn!(specialization, error = %e, "Question bank reload failed");
            format!("Reload failed: {e}")
        }
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}
