use state::QuizState;
use teloxide::{dispatching::dialogue::InMemStorage, prelude::Dialogue};

pub mod bank;
pub mod callback;
pub mod certificate;
pub mod commands;
pub mod config;
pub mod controller;
pub mod database;
pub mod keyboard;
pub mod locks;
pub mod registration;
pub mod registry;
pub mod render;
pub mod runner;
pub mod schema;
pub mod scoring;
pub mod session;
pub mod state;
pub mod telegram;
pub mod timeout;

type UserDialogue = Dialogue<QuizState, InMemStorage<QuizState>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;
