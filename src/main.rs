use std::{error::Error, sync::Arc};

use proftestbot::{
    config::Config,
    controller::SessionController,
    database::connection::{Connection, Storage},
    registry::Registry,
    schema::schema,
    state::QuizState,
    telegram::{TelegramNotifier, TelegramRenderer},
};
use teloxide::{
    dispatching::dialogue::InMemStorage,
    error_handlers::IgnoringErrorHandlerSafe,
    prelude::*,
    update_listeners::webhooks::{self, Options},
};
use tracing::level_filters::LevelFilter;
use tracing_log::LogTracer;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = Arc::new(Config::from_env()?);

    LogTracer::init()?;
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from_level(config.log_level))
        .json()
        .with_span_events(FmtSpan::ENTER)
        .log_internal_errors(true)
        .with_line_number(true)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let connection = Connection::connect(&config.database_url).await?;
    connection.perform_migrations().await?;

    let registry = Arc::new(Registry::builtin(&config.questions_dir));
    let bot = Bot::new(config.teloxide_token.clone());

    let controller = SessionController::new(
        registry,
        Storage::sqlite(connection),
        Arc::new(TelegramRenderer::new(bot.clone())),
        Arc::new(TelegramNotifier::new(bot.clone(), config.auto_certificate)),
    );
    controller.resume().await?;

    tracing::info!("Starting bot...");
    let mut dispatcher = Dispatcher::builder(bot.clone(), schema())
        .dependencies(dptree::deps![
            InMemStorage::<QuizState>::new(),
            controller.clone(),
            config.clone()
        ])
        .enable_ctrlc_handler()
        .build();

    if let Some(webhook) = config.webhook.clone() {
        let listener = webhooks::axum(bot, Options::new(webhook.addr, webhook.url)).await?;
        dispatcher
            .dispatch_with_listener(listener, Arc::new(IgnoringErrorHandlerSafe))
            .await
    } else {
        dispatcher.dispatch().await
    }

    controller.shutdown();
    tracing::info!("Bot stopped");
    Ok(())
}
