use std::error::Error;

use teloxide::{
    dispatching::{
        dialogue::{self, InMemStorage},
        DpHandlerDescription, UpdateFilterExt, UpdateHandler,
    },
    dptree::{self, Handler},
    prelude::{DependencyMap, Requester},
    types::{Message, Update},
    Bot,
};
use tracing::instrument;

use crate::{
    commands::{self, Command},
    registration, runner,
    state::QuizState,
    HandlerResult,
};

/// Dispatch tree. Dependencies: `Arc<SessionController>`, `Arc<Config>` and
/// `InMemStorage<QuizState>`.
pub fn schema() -> UpdateHandler<Box<dyn Error + Send + Sync + 'static>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Help].endpoint(commands::help))
        .branch(case![Command::Start].endpoint(commands::start))
        .branch(case![Command::Cancel].endpoint(commands::cancel))
        .branch(case![Command::Profile].endpoint(commands::profile))
        .branch(case![Command::Stats].endpoint(commands::stats))
        .branch(case![Command::Reload(specialization)].endpoint(commands::reload));

    let handler = Update::filter_message()
        .branch(command_handler)
        .branch(case![QuizState::Start].endpoint(runner::choose_specialization))
        .branch(registration_scheme())
        .endpoint(invalid_state);

    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(runner::handle_callback))
        .branch(dialogue::enter::<Update, InMemStorage<QuizState>, QuizState, _>().branch(handler))
}

#[instrument(level = "debug")]
fn registration_scheme() -> Handler<'static, DependencyMap, HandlerResult, DpHandlerDescription> {
    use dptree::case;
    Update::filter_message()
        .branch(
            case![QuizState::ReceiveFullName { specialization }]
                .endpoint(registration::receive_full_name),
        )
        .branch(
            case![QuizState::ReceivePosition {
                specialization,
                full_name
            }]
            .endpoint(registration::receive_position),
        )
        .branch(
            case![QuizState::ReceiveDepartment {
                specialization,
                full_name,
                position
            }]
            .endpoint(registration::receive_department),
        )
}

#[instrument(level = "info")]
async fn invalid_state(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        "Unable to handle the message. Enter /help to see usages.",
    )
    .await?;
    Ok(())
}
