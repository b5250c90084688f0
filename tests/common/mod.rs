#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use proftestbot::{
    bank::{BankError, Question, QuestionBank},
    controller::SessionController,
    database::connection::{Connection, Storage},
    registry::{Difficulty, Registry, Specialization, TierPolicy},
    render::{Notifier, QuestionView, RenderError, Renderer, ResultSummary},
    session::{MessageRef, SessionKey},
};

pub const SPEC: &str = "aliment";
pub const USER: i64 = 1001;

/// In-memory specialization with the same policy for every tier.
pub struct TestSpecialization {
    pub questions: Vec<Question>,
    pub policy: TierPolicy,
}

impl Specialization for TestSpecialization {
    fn id(&self) -> &str {
        SPEC
    }

    fn title(&self) -> &str {
        "Alimony enforcement"
    }

    fn policy(&self, _difficulty: Difficulty) -> TierPolicy {
        self.policy
    }

    fn load_bank(&self) -> Result<QuestionBank, BankError> {
        QuestionBank::from_questions(self.questions.clone())
    }
}

pub struct BrokenSpecialization;

impl Specialization for BrokenSpecialization {
    fn id(&self) -> &str {
        SPEC
    }

    fn title(&self) -> &str {
        "Alimony enforcement"
    }

    fn policy(&self, _difficulty: Difficulty) -> TierPolicy {
        TierPolicy::minutes(3, 1)
    }

    fn load_bank(&self) -> Result<QuestionBank, BankError> {
        Err(BankError::NotFound("missing.json".into()))
    }
}

/// `count` single-choice questions with four options; option 0 is correct.
pub fn questions(count: usize) -> Vec<Question> {
    (0..count)
        .map(|i| {
            Question::new(
                format!("Question {i}"),
                vec!["a".into(), "b".into(), "c".into(), "d".into()],
                [0],
            )
            .unwrap()
        })
        .collect()
}

#[derive(Default)]
pub struct RecordingRenderer {
    pub questions: Mutex<Vec<(QuestionView, Option<MessageRef>)>>,
    pub results: Mutex<Vec<(ResultSummary, Option<MessageRef>)>>,
    next_message: AtomicI32,
}

#[async_trait]
impl Renderer for RecordingRenderer {
    async fn render_question(
        &self,
        key: &SessionKey,
        view: &QuestionView,
        target: Option<MessageRef>,
    ) -> Result<MessageRef, RenderError> {
        self.questions.lock().unwrap().push((view.clone(), target));
        Ok(target.unwrap_or_else(|| MessageRef {
            chat_id: key.user_id,
            message_id: self.next_message.fetch_add(1, Ordering::SeqCst) + 1,
        }))
    }

    async fn render_result(
        &self,
        _key: &SessionKey,
        summary: &ResultSummary,
        target: Option<MessageRef>,
    ) -> Result<(), RenderError> {
        self.results.lock().unwrap().push((summary.clone(), target));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notified: Mutex<Vec<ResultSummary>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, summary: &ResultSummary) -> Result<(), RenderError> {
        self.notified.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

pub struct Harness {
    pub controller: Arc<SessionController>,
    pub connection: Connection,
    pub renderer: Arc<RecordingRenderer>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub async fn new(specialization: Arc<dyn Specialization>) -> Self {
        let connection = Connection::in_memory().await.expect("in-memory store");
        Self::with_storage(specialization, connection.clone(), Storage::sqlite(connection)).await
    }

    pub async fn with_storage(
        specialization: Arc<dyn Specialization>,
        connection: Connection,
        storage: Storage,
    ) -> Self {
        let renderer = Arc::new(RecordingRenderer::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = SessionController::new(
            Arc::new(Registry::load(vec![specialization])),
            storage,
            renderer.clone(),
            notifier.clone(),
        );

        Self {
            controller,
            connection,
            renderer,
            notifier,
        }
    }

    pub async fn standard(question_count: usize, time_limit: Duration) -> Self {
        Self::new(Arc::new(TestSpecialization {
            questions: questions(question_count),
            policy: TierPolicy {
                question_count,
                time_limit,
            },
        }))
        .await
    }

    pub fn results_rendered(&self) -> usize {
        self.renderer.results.lock().unwrap().len()
    }

    /// Waits for the fire-and-forget notification task.
    pub async fn wait_for_notifications(&self, expected: usize) -> usize {
        for _ in 0..100 {
            let seen = self.notifier.notified.lock().unwrap().len();
            if seen >= expected {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.notifier.notified.lock().unwrap().len()
    }
}
