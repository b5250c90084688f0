use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bank::{BankError, QuestionBank};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown specialization '{0}'")]
    UnknownSpecialization(String),

    #[error("question bank for '{specialization}' is unavailable: {reason}")]
    Unavailable {
        specialization: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Reserve,
    Basic,
    Standard,
    Expert,
}

impl Difficulty {
    pub const ALL: [Difficulty; 4] = [
        Difficulty::Reserve,
        Difficulty::Basic,
        Difficulty::Standard,
        Difficulty::Expert,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Difficulty::Reserve => "reserve",
            Difficulty::Basic => "basic",
            Difficulty::Standard => "standard",
            Difficulty::Expert => "expert",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Reserve => "Reserve",
            Difficulty::Basic => "Basic",
            Difficulty::Standard => "Standard",
            Difficulty::Expert => "Expert",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Difficulty::ALL
            .into_iter()
            .find(|d| d.key() == s)
            .ok_or_else(|| format!("unknown difficulty '{s}'"))
    }
}

/// Question count and time budget of one difficulty tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    pub question_count: usize,
    pub time_limit: Duration,
}

impl TierPolicy {
    pub const fn minutes(question_count: usize, minutes: u64) -> Self {
        Self {
            question_count,
            time_limit: Duration::from_secs(minutes * 60),
        }
    }
}

/// A test specialization known to the bot.
pub trait Specialization: Send + Sync {
    fn id(&self) -> &str;

    fn title(&self) -> &str;

    fn policy(&self, difficulty: Difficulty) -> TierPolicy;

    fn load_bank(&self) -> Result<QuestionBank, BankError>;
}

/// Specialization whose questions live in a JSON file.
#[derive(Debug, Clone)]
pub struct JsonSpecialization {
    id: String,
    title: String,
    path: PathBuf,
    tiers: BTreeMap<Difficulty, TierPolicy>,
}

impl JsonSpecialization {
    pub fn new(id: impl Into<String>, title: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let tiers = Difficulty::ALL
            .into_iter()
            .zip(STANDARD_TIERS)
            .collect();
        Self {
            id: id.into(),
            title: title.into(),
            path: path.into(),
            tiers,
        }
    }

    pub fn with_tier(mut self, difficulty: Difficulty, policy: TierPolicy) -> Self {
        self.tiers.insert(difficulty, policy);
        self
    }
}

impl Specialization for JsonSpecialization {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn policy(&self, difficulty: Difficulty) -> TierPolicy {
        self.tiers[&difficulty]
    }

    fn load_bank(&self) -> Result<QuestionBank, BankError> {
        QuestionBank::load(&self.path)
    }
}

const STANDARD_TIERS: [TierPolicy; 4] = [
    TierPolicy::minutes(20, 35),
    TierPolicy::minutes(30, 25),
    TierPolicy::minutes(40, 20),
    TierPolicy::minutes(50, 20),
];

struct Entry {
    specialization: Arc<dyn Specialization>,
    bank: RwLock<Result<Arc<QuestionBank>, String>>,
}

impl Entry {
    fn load(specialization: Arc<dyn Specialization>) -> Self {
        let bank = load_logged(specialization.as_ref());
        Self {
            specialization,
            bank: RwLock::new(bank),
        }
    }
}

fn load_logged(specialization: &dyn Specialization) -> Result<Arc<QuestionBank>, String> {
    specialization
        .load_bank()
        .map(Arc::new)
        .map_err(|e| {
            tracing::error!(
                specialization = specialization.id(),
                error = %e,
                "Question bank unavailable"
            );
            e.to_string()
        })
}

/// Specialization id → specialization and its currently loaded bank.
///
/// A bank that fails to load only disables its own specialization.
pub struct Registry {
    entries: BTreeMap<String, Entry>,
}

impl Registry {
    pub fn load(specializations: Vec<Arc<dyn Specialization>>) -> Self {
        let entries = specializations
            .into_iter()
            .map(|s| (s.id().to_owned(), Entry::load(s)))
            .collect();
        Self { entries }
    }

    /// The specializations shipped with the bot, banks resolved under `questions_dir`.
    pub fn builtin(questions_dir: &Path) -> Self {
        let specializations: Vec<Arc<dyn Specialization>> = vec![
            Arc::new(
                JsonSpecialization::new(
                    "aliment",
                    "Alimony enforcement",
                    questions_dir.join("Aliment_test_bot_questions.json"),
                )
                .with_tier(Difficulty::Reserve, TierPolicy::minutes(20, 35))
                .with_tier(Difficulty::Basic, TierPolicy::minutes(25, 40))
                .with_tier(Difficulty::Standard, TierPolicy::minutes(30, 45))
                .with_tier(Difficulty::Expert, TierPolicy::minutes(50, 90)),
            ),
            Arc::new(JsonSpecialization::new(
                "informatizaciya",
                "Informatization",
                questions_dir.join("Informatizaciya_questions.json"),
            )),
            Arc::new(JsonSpecialization::new(
                "ispolniteli",
                "Enforcement officers",
                questions_dir.join("Ispolniteli_questions.json"),
            )),
        ];
        Self::load(specializations)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Specialization>> {
        self.entries.get(id).map(|e| e.specialization.clone())
    }

    pub fn find_by_title(&self, title: &str) -> Option<Arc<dyn Specialization>> {
        self.entries
            .values()
            .find(|e| e.specialization.title() == title)
            .map(|e| e.specialization.clone())
    }

    pub fn specializations(&self) -> Vec<Arc<dyn Specialization>> {
        self.entries
            .values()
            .map(|e| e.specialization.clone())
            .collect()
    }

    /// Current bank snapshot. Sessions keep the questions they sampled, so a
    /// later reload never reaches them.
    pub fn bank(&self, id: &str) -> Result<Arc<QuestionBank>, RegistryError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| RegistryError::UnknownSpecialization(id.to_owned()))?;

        let bank = entry.bank.read().unwrap_or_else(PoisonError::into_inner);
        bank.clone().map_err(|reason| RegistryError::Unavailable {
            specialization: id.to_owned(),
            reason,
        })
    }

    pub fn policy(&self, id: &str, difficulty: Difficulty) -> Result<TierPolicy, RegistryError> {
        self.entries
            .get(id)
            .map(|e| e.specialization.policy(difficulty))
            .ok_or_else(|| RegistryError::UnknownSpecialization(id.to_owned()))
    }

    /// Re-reads the bank from its source and returns the new question count.
    /// A failed reload marks the specialization unavailable.
    pub fn reload(&self, id: &str) -> Result<usize, RegistryError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| RegistryError::UnknownSpecialization(id.to_owned()))?;

        let fresh = load_logged(entry.specialization.as_ref());
        let count = fresh.as_ref().map(|b| b.count()).map_err(|reason| {
            RegistryError::Unavailable {
                specialization: id.to_owned(),
                reason: reason.clone(),
            }
        });

        *entry.bank.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        count
    }
}
