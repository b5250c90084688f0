use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BankError {
    #[error("question bank {0} not found")]
    NotFound(PathBuf),

    #[error("question bank is not well-formed: {0}")]
    Format(String),

    #[error("question bank has no usable questions ({dropped} entries dropped)")]
    Validation { dropped: usize },

    #[error("requested {requested} questions but the bank holds {available}")]
    InsufficientQuestions { requested: usize, available: usize },

    #[error("failed to read question bank: {0}")]
    Io(#[from] std::io::Error),
}

/// One multiple-choice question. `correct` is never empty and every index in
/// it points into `options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    prompt: String,
    options: Vec<String>,
    correct: BTreeSet<usize>,
}

/// Shape of an entry as written in bank files.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(alias = "question")]
    prompt: String,
    options: Vec<String>,
    correct: Vec<usize>,
}

impl Question {
    /// Builds a question, returning `None` when it would break the bank
    /// invariants (fewer than two options, no correct index, index out of range).
    pub fn new(
        prompt: impl Into<String>,
        options: Vec<String>,
        correct: impl IntoIterator<Item = usize>,
    ) -> Option<Self> {
        let correct: BTreeSet<usize> = correct.into_iter().collect();
        if options.len() < 2 || correct.is_empty() || correct.iter().any(|&i| i >= options.len()) {
            return None;
        }
        Some(Self {
            prompt: prompt.into(),
            options,
            correct,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn correct(&self) -> &BTreeSet<usize> {
        &self.correct
    }

    pub fn is_multi_choice(&self) -> bool {
        self.correct.len() > 1
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut options = String::new();
        for (i, option) in self.options().iter().enumerate() {
            options.push_str(&format!("{}) {}\n", i + 1, option));
        }

        write!(f, "{}\n\n{}", self.prompt(), options)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BankStats {
    pub total: usize,
    pub multi_choice: usize,
    pub single_choice: usize,
    pub avg_options: f64,
}

/// Immutable, validated question set of one specialization.
#[derive(Debug, Clone)]
pub struct QuestionBank {
    source: Option<PathBuf>,
    questions: Vec<Question>,
}

impl QuestionBank {
    /// Loads a JSON array of `{question|prompt, options, correct}` entries.
    ///
    /// Entries that are missing fields or violate the question invariants are
    /// dropped with a warning; the load only fails when nothing usable is left.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BankError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BankError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let mut bank = Self::from_json_str(&content)?;
        bank.source = Some(path.to_path_buf());

        let stats = bank.stats();
        tracing::info!(
            path = %path.display(),
            total = stats.total,
            multi_choice = stats.multi_choice,
            avg_options = stats.avg_options,
            "Loaded question bank"
        );

        Ok(bank)
    }

    pub fn from_json_str(content: &str) -> Result<Self, BankError> {
        let entries: Vec<serde_json::Value> =
            serde_json::from_str(content).map_err(|e| BankError::Format(e.to_string()))?;

        let mut questions = Vec::with_capacity(entries.len());
        let mut dropped = 0;

        for (i, entry) in entries.into_iter().enumerate() {
            let question = serde_json::from_value::<RawQuestion>(entry)
                .map_err(|e| e.to_string())
                .and_then(|raw| {
                    Question::new(raw.prompt, raw.options, raw.correct)
                        .ok_or_else(|| "invalid options or correct indices".to_owned())
                });

            match question {
                Ok(question) => questions.push(question),
                Err(reason) => {
                    dropped += 1;
                    tracing::warn!(entry = i + 1, %reason, "Dropping question bank entry");
                }
            }
        }

        if questions.is_empty() {
            return Err(BankError::Validation { dropped });
        }

        Ok(Self {
            source: None,
            questions,
        })
    }

    pub fn from_questions(questions: Vec<Question>) -> Result<Self, BankError> {
        if questions.is_empty() {
            return Err(BankError::Validation { dropped: 0 });
        }
        Ok(Self {
            source: None,
            questions,
        })
    }

    /// Draws `n` distinct questions uniformly at random. Every call is an
    /// independent draw.
    pub fn sample(&self, n: usize) -> Result<Vec<Question>, BankError> {
        if n > self.count() {
            return Err(BankError::InsufficientQuestions {
                requested: n,
                available: self.count(),
            });
        }

        let mut rng = rand::rng();
        Ok(rand::seq::index::sample(&mut rng, self.count(), n)
            .into_iter()
            .map(|i| self.questions[i].clone())
            .collect())
    }

    pub fn count(&self) -> usize {
        self.questions.len()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn stats(&self) -> BankStats {
        let total = self.count();
        let multi_choice = self.questions.iter().filter(|q| q.is_multi_choice()).count();
        let options: usize = self.questions.iter().map(|q| q.options().len()).sum();

        BankStats {
            total,
            multi_choice,
            single_choice: total - multi_choice,
            avg_options: options as f64 / total as f64,
        }
    }
}
