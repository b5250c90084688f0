//! Payloads carried by inline keyboard buttons.
//!
//! Telegram limits callback data to 64 bytes, so every action is a short
//! `|`-separated tag followed by its arguments, e.g. `tog|aliment|0a1b2c3d|3|1`.
//! Buttons that act on a running session carry its
//! [`tag`](crate::session::Session::tag).

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::registry::Difficulty;

const SEPARATOR: char = '|';

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed callback data '{0}'")]
pub struct ParseCallbackError(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Start a test at the given difficulty.
    Difficulty {
        specialization: String,
        difficulty: Difficulty,
    },
    Toggle {
        specialization: String,
        session: String,
        question: usize,
        option: usize,
    },
    /// Move on from the question at `question`.
    Next {
        specialization: String,
        session: String,
        question: usize,
    },
    Finish {
        specialization: String,
        session: String,
    },
    Certificate {
        specialization: String,
    },
    /// Reopen the difficulty menu after a finished attempt.
    Retake {
        specialization: String,
    },
    Menu,
}

impl CallbackAction {
    pub fn specialization(&self) -> Option<&str> {
        match self {
            CallbackAction::Difficulty { specialization, .. }
            | CallbackAction::Toggle { specialization, .. }
            | CallbackAction::Next { specialization, .. }
            | CallbackAction::Finish { specialization, .. }
            | CallbackAction::Certificate { specialization }
            | CallbackAction::Retake { specialization } => Some(specialization),
            CallbackAction::Menu => None,
        }
    }
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackAction::Difficulty {
                specialization,
                difficulty,
            } => write!(f, "diff|{specialization}|{}", difficulty.key()),
            CallbackAction::Toggle {
                specialization,
                session,
                question,
                option,
            } => write!(f, "tog|{specialization}|{session}|{question}|{option}"),
            CallbackAction::Next {
                specialization,
                session,
                question,
            } => write!(f, "next|{specialization}|{session}|{question}"),
            CallbackAction::Finish {
                specialization,
                session,
            } => write!(f, "fin|{specialization}|{session}"),
            CallbackAction::Certificate { specialization } => write!(f, "cert|{specialization}"),
            CallbackAction::Retake { specialization } => write!(f, "retry|{specialization}"),
            CallbackAction::Menu => f.write_str("menu"),
        }
    }
}

impl FromStr for CallbackAction {
    type Err = ParseCallbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseCallbackError(s.to_owned());
        let parts: Vec<&str> = s.split(SEPARATOR).collect();

        let field = |i: usize| -> Result<String, ParseCallbackError> {
            parts
                .get(i)
                .filter(|p| !p.is_empty())
                .map(|p| p.to_string())
                .ok_or_else(malformed)
        };
        let index = |i: usize| -> Result<usize, ParseCallbackError> {
            parts
                .get(i)
                .and_then(|p| p.parse().ok())
                .ok_or_else(malformed)
        };

        let action = match (parts[0], parts.len()) {
            ("diff", 3) => CallbackAction::Difficulty {
                specialization: field(1)?,
                difficulty: parts[2].parse().map_err(|_| malformed())?,
            },
            ("tog", 5) => CallbackAction::Toggle {
                specialization: field(1)?,
                session: field(2)?,
                question: index(3)?,
                option: index(4)?,
            },
            ("next", 4) => CallbackAction::Next {
                specialization: field(1)?,
                session: field(2)?,
                question: index(3)?,
            },
            ("fin", 3) => CallbackAction::Finish {
                specialization: field(1)?,
                session: field(2)?,
            },
            ("cert", 2) => CallbackAction::Certificate {
                specialization: field(1)?,
            },
            ("retry", 2) => CallbackAction::Retake {
                specialization: field(1)?,
            },
            ("menu", 1) => CallbackAction::Menu,
            _ => return Err(malformed()),
        };

        Ok(action)
    }
}
