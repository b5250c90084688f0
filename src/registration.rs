use std::sync::Arc;

use teloxide::{payloads::SendMessageSetters, prelude::Requester, types::Message, Bot};
use tracing::instrument;

use crate::{
    controller::SessionController,
    keyboard::specializations_keyboard,
    runner::send_difficulty_menu,
    session::UserProfile,
    state::QuizState,
    HandlerResult, UserDialogue,
};

fn answer(msg: &Message) -> Option<String> {
    msg.text()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

#[instrument(level = "info", skip(bot, dialogue, msg))]
pub(crate) async fn receive_full_name(
    bot: Bot,
    dialogue: UserDialogue,
    msg: Message,
    specialization: Option<String>,
) -> HandlerResult {
    match answer(&msg) {
        Some(full_name) => {
            bot.send_message(msg.chat.id, "What is your position?").await?;
            dialogue
                .update(QuizState::ReceivePosition {
                    specialization,
                    full_name,
                })
                .await?;
        }
        None => {
            bot.send_message(msg.chat.id, "Please, send your full name.")
                .await?;
        }
    }
    Ok(())
}

#[instrument(level = "info", skip(bot, dialogue, msg))]
pub(crate) async fn receive_position(
    bot: Bot,
    dialogue: UserDialogue,
    msg: Message,
    (specialization, full_name): (Option<String>, String),
) -> HandlerResult {
    match answer(&msg) {
        Some(position) => {
            bot.send_message(msg.chat.id, "Which department do you work in?")
                .await?;
            dialogue
                .update(QuizState::ReceiveDepartment {
                    specialization,
                    full_name,
                    position,
                })
                .await?;
        }
        None => {
            bot.send_message(msg.chat.id, "Please, send your position.")
                .await?;
        }
    }
    Ok(())
}

#[instrument(level = "info", skip(bot, dialogue, msg, controller))]
pub(crate) async fn receive_department(
    bot: Bot,
    dialogue: UserDialogue,
    msg: Message,
    (specialization, full_name, position): (Option<String>, String, String),
    controller: Arc<SessionController>,
) -> HandlerResult {
    let Some(department) = answer(&msg) else {
        bot.send_message(msg.chat.id, "Please, send your department.")
            .await?;
        return Ok(());
    };
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };

    let profile = UserProfile {
        user_id: user.id.0 as i64,
        full_name,
        position,
        department,
    };
    controller.save_profile(&profile).await?;
    dialogue.update(QuizState::Start).await?;

    bot.send_message(msg.chat.id, "Profile saved✔️")
        .reply_markup(specializations_keyboard(&controller.registry().specializations()))
        .await?;

    if let Some(specialization) = specialization {
        send_difficulty_menu(&bot, msg.chat.id, &controller, &specialization).await?;
    }
    Ok(())
}
