use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{bank::Question, session::Answers};

/// Lowest percentage that still passes.
pub const PASS_THRESHOLD: f64 = 60.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScoringError {
    #[error("cannot score a session without questions")]
    EmptySession,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub correct: u32,
    pub total: u32,
    pub percentage: f64,
}

impl Score {
    pub fn from_counts(correct: u32, total: u32) -> Result<Self, ScoringError> {
        if total == 0 {
            return Err(ScoringError::EmptySession);
        }
        Ok(Self {
            correct,
            total,
            percentage: f64::from(correct) * 100.0 / f64::from(total),
        })
    }

    pub fn grade(&self) -> Grade {
        grade(self.percentage)
    }

    pub fn passed(&self) -> bool {
        self.percentage >= PASS_THRESHOLD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    Excellent,
    Good,
    Satisfactory,
    Fail,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Grade::Excellent => "excellent",
            Grade::Good => "good",
            Grade::Satisfactory => "satisfactory",
            Grade::Fail => "fail",
        })
    }
}

/// A question counts only when the selected set equals the correct set.
pub fn score(questions: &[Question], answers: &Answers) -> Result<Score, ScoringError> {
    let correct = questions
        .iter()
        .enumerate()
        .filter(|(i, question)| {
            answers
                .get(i)
                .is_some_and(|selected| selected == question.correct())
        })
        .count();

    Score::from_counts(correct as u32, questions.len() as u32)
}

pub fn grade(percentage: f64) -> Grade {
    if percentage >= 90.0 {
        Grade::Excellent
    } else if percentage >= 75.0 {
        Grade::Good
    } else if percentage >= PASS_THRESHOLD {
        Grade::Satisfactory
    } else {
        Grade::Fail
    }
}
