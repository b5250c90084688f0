mod common;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use common::{BrokenSpecialization, Harness, TestSpecialization, SPEC, USER};
use proftestbot::{
    bank::Question,
    controller::{ControllerError, Outcome},
    database::connection::{Completion, Connection, ResultLog, SessionStore, Storage, StoreError},
    registry::{Difficulty, TierPolicy},
    scoring::Grade,
    session::{FinishReason, MessageRef, Session, SessionKey, UserProfile},
    timeout::Expiry,
};
use uuid::Uuid;

const LONG: Duration = Duration::from_secs(600);

fn finished(outcome: Outcome) -> Box<proftestbot::render::ResultSummary> {
    match outcome {
        Outcome::Finished(summary) => summary,
        other => panic!("expected a finished session, got {other:?}"),
    }
}

fn wrong_option(question: &Question) -> usize {
    (0..question.options().len())
        .find(|o| !question.correct().contains(o))
        .unwrap()
}

#[tokio::test]
async fn finishing_early_scores_one_of_three_as_a_fail() {
    let h = Harness::standard(3, LONG).await;
    let session = h
        .controller
        .start(USER, SPEC, Difficulty::Reserve, None)
        .await
        .unwrap();
    let tag = &session.tag();
    assert_eq!(session.questions.len(), 3);

    let first_correct = *session.questions[0].correct().first().unwrap();
    h.controller.toggle_answer(USER, SPEC, tag, 0, first_correct).await.unwrap();
    h.controller.advance(USER, SPEC, tag, 0).await.unwrap();
    h.controller
        .toggle_answer(USER, SPEC, tag, 1, wrong_option(&session.questions[1]))
        .await
        .unwrap();

    // Question 3 is never shown.
    let summary = finished(h.controller.finish_shown(USER, SPEC, tag).await.unwrap());
    assert_eq!(summary.score.correct, 1);
    assert_eq!(summary.score.total, 3);
    assert!((summary.score.percentage - 33.333).abs() < 0.01);
    assert_eq!(summary.grade, Grade::Fail);
    assert!(!summary.passed());
    assert_eq!(summary.reason, FinishReason::User);

    let history = h.connection.history(USER, SPEC).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].total, 3);
    assert_eq!(history[0].session_id, session.id);
    assert_eq!(h.renderer.questions.lock().unwrap().len(), 4);

    assert!(h.controller.session(USER, SPEC).await.unwrap().is_none());
    assert!(h.controller.armed_timer(USER, SPEC).is_none());
    assert_eq!(h.results_rendered(), 1);
    assert_eq!(h.wait_for_notifications(1).await, 1);
}

#[tokio::test]
async fn finishing_twice_records_once() {
    let h = Harness::standard(3, LONG).await;
    h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap();

    finished(h.controller.finish(USER, SPEC, FinishReason::User).await.unwrap());
    let again = h.controller.finish(USER, SPEC, FinishReason::User).await.unwrap();
    assert!(matches!(again, Outcome::NoActiveSession));

    assert_eq!(h.connection.history(USER, SPEC).await.unwrap().len(), 1);
    assert_eq!(h.results_rendered(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn user_finish_racing_the_timer_records_once() {
    let h = Harness::standard(3, LONG).await;
    let session = h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap();
    let expiry = Expiry {
        key: SessionKey::new(USER, SPEC),
        session_id: session.id,
    };

    let by_user = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.finish(USER, SPEC, FinishReason::User).await })
    };
    let by_timer = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.finish_expired(&expiry).await })
    };

    let outcomes = [by_user.await.unwrap().unwrap(), by_timer.await.unwrap().unwrap()];
    let finishes = outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::Finished(_)))
        .count();
    assert_eq!(finishes, 1);

    assert_eq!(h.connection.history(USER, SPEC).await.unwrap().len(), 1);
    assert_eq!(h.results_rendered(), 1);
}

#[tokio::test]
async fn timer_finishes_an_abandoned_session() {
    let h = Harness::standard(3, Duration::from_secs(1)).await;
    let session = h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap();
    assert_eq!(h.controller.armed_timer(USER, SPEC), Some(session.id));

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(h.controller.session(USER, SPEC).await.unwrap().is_none());
    let history = h.connection.history(USER, SPEC).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, FinishReason::Timeout);
    assert_eq!(history[0].score, 0);
    assert_eq!(h.results_rendered(), 1);
    assert!(h.controller.armed_timer(USER, SPEC).is_none());
}

#[tokio::test]
async fn toggling_twice_restores_the_selection() {
    let h = Harness::standard(3, LONG).await;
    let tag = &h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap().tag();

    for _ in 0..2 {
        let outcome = h.controller.toggle_answer(USER, SPEC, tag, 0, 2).await.unwrap();
        assert!(matches!(outcome, Outcome::Updated));
    }

    let session = h.controller.session(USER, SPEC).await.unwrap().unwrap();
    assert!(session.selections(0).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_toggles_all_apply() {
    let h = Harness::standard(3, LONG).await;
    let tag = h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap().tag();

    let tasks: Vec<_> = (0..4)
        .map(|option| {
            let controller = h.controller.clone();
            let tag = tag.clone();
            tokio::spawn(async move { controller.toggle_answer(USER, SPEC, &tag, 0, option).await })
        })
        .collect();
    for task in tasks {
        assert!(matches!(task.await.unwrap().unwrap(), Outcome::Updated));
    }

    let session = h.controller.session(USER, SPEC).await.unwrap().unwrap();
    assert_eq!(session.selections(0).len(), 4);

    // Renders follow commit order, so the last edit shows every selection.
    let rendered = h.renderer.questions.lock().unwrap();
    assert_eq!(rendered.len(), 5);
    assert_eq!(rendered.last().unwrap().0.selections, session.selections(0));
}

#[tokio::test]
async fn stale_presses_change_nothing() {
    let h = Harness::standard(3, LONG).await;

    let outcome = h.controller.toggle_answer(USER, SPEC, "0a1b2c3d", 0, 0).await.unwrap();
    assert!(matches!(outcome, Outcome::NoActiveSession));
    let outcome = h.controller.advance(USER, SPEC, "0a1b2c3d", 0).await.unwrap();
    assert!(matches!(outcome, Outcome::NoActiveSession));

    let tag = &h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap().tag();
    for (question, option) in [(3, 0), (0, 4), (usize::MAX, 0)] {
        let outcome = h
            .controller
            .toggle_answer(USER, SPEC, tag, question, option)
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Ignored));
    }
    let session = h.controller.session(USER, SPEC).await.unwrap().unwrap();
    assert!(session.answers.is_empty());
}

#[tokio::test]
async fn timer_of_a_superseded_session_is_a_no_op() {
    let h = Harness::standard(3, LONG).await;
    let old = h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap();
    let new = h.controller.start(USER, SPEC, Difficulty::Expert, None).await.unwrap();
    assert_eq!(h.controller.armed_timer(USER, SPEC), Some(new.id));

    let outcome = h
        .controller
        .finish_expired(&Expiry {
            key: SessionKey::new(USER, SPEC),
            session_id: old.id,
        })
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::NoActiveSession));

    let active = h.controller.session(USER, SPEC).await.unwrap().unwrap();
    assert_eq!(active.id, new.id);
    assert_eq!(active.difficulty, Difficulty::Expert);
    assert!(h.connection.history(USER, SPEC).await.unwrap().is_empty());
}

#[tokio::test]
async fn unavailable_bank_blocks_start() {
    let h = Harness::new(Arc::new(BrokenSpecialization)).await;

    let err = h
        .controller
        .start(USER, SPEC, Difficulty::Basic, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::QuestionBankUnavailable { .. }));
    assert!(h.controller.session(USER, SPEC).await.unwrap().is_none());
    assert!(h.controller.armed_timer(USER, SPEC).is_none());
}

#[tokio::test]
async fn unknown_specialization_blocks_start() {
    let h = Harness::standard(3, LONG).await;
    let err = h
        .controller
        .start(USER, "astronomy", Difficulty::Basic, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::QuestionBankUnavailable { .. }));
}

#[tokio::test]
async fn question_count_is_clamped_to_the_bank() {
    let h = Harness::new(Arc::new(TestSpecialization {
        questions: common::questions(3),
        policy: TierPolicy::minutes(10, 5),
    }))
    .await;

    let session = h.controller.start(USER, SPEC, Difficulty::Expert, None).await.unwrap();
    assert_eq!(session.questions.len(), 3);
}

#[tokio::test]
async fn question_message_is_edited_in_place() {
    let h = Harness::standard(3, LONG).await;
    let origin = MessageRef {
        chat_id: USER,
        message_id: 500,
    };
    let tag = &h
        .controller
        .start(USER, SPEC, Difficulty::Basic, Some(origin))
        .await
        .unwrap()
        .tag();
    h.controller.toggle_answer(USER, SPEC, tag, 0, 1).await.unwrap();
    h.controller.advance(USER, SPEC, tag, 0).await.unwrap();

    let session = h.controller.session(USER, SPEC).await.unwrap().unwrap();
    assert_eq!(session.message_ref, Some(origin));

    let rendered = h.renderer.questions.lock().unwrap().clone();
    assert_eq!(rendered.len(), 3);
    assert!(rendered.iter().all(|(_, target)| *target == Some(origin)));
    assert_eq!(rendered[1].0.selections.len(), 1);
    assert_eq!(rendered[2].0.index, 1);

    finished(h.controller.finish(USER, SPEC, FinishReason::User).await.unwrap());
    let results = h.renderer.results.lock().unwrap();
    assert_eq!(results[0].1, Some(origin));
}

#[tokio::test]
async fn first_question_without_origin_gets_a_message() {
    let h = Harness::standard(3, LONG).await;
    h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap();

    let session = h.controller.session(USER, SPEC).await.unwrap().unwrap();
    assert_eq!(
        session.message_ref,
        Some(MessageRef {
            chat_id: USER,
            message_id: 1
        })
    );
}

#[tokio::test]
async fn summary_uses_the_saved_profile() {
    let h = Harness::standard(3, LONG).await;

    h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap();
    let anonymous = finished(h.controller.finish(USER, SPEC, FinishReason::User).await.unwrap());
    assert_eq!(anonymous.profile, UserProfile::placeholder(USER));

    let profile = UserProfile {
        user_id: USER,
        full_name: "Olga Ivanova".to_owned(),
        position: "Bailiff".to_owned(),
        department: "East".to_owned(),
    };
    h.controller.save_profile(&profile).await.unwrap();
    h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap();
    let named = finished(h.controller.finish(USER, SPEC, FinishReason::User).await.unwrap());
    assert_eq!(named.profile, profile);
    assert_eq!(named.specialization_title, "Alimony enforcement");

    let latest = h.controller.latest_summary(USER, SPEC).await.unwrap().unwrap();
    assert_eq!(latest.profile.full_name, "Olga Ivanova");
    assert_eq!(h.controller.stats(USER, Some(SPEC)).await.unwrap().attempts, 2);
}

async fn insert_session(connection: &Connection, deadline_in: TimeDelta) -> Session {
    let now = Utc::now();
    connection
        .create(
            &SessionKey::new(USER, SPEC),
            Difficulty::Basic,
            common::questions(3),
            now - TimeDelta::minutes(1),
            now + deadline_in,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn late_press_finishes_with_timeout() {
    let h = Harness::standard(3, LONG).await;
    let tag = &insert_session(&h.connection, TimeDelta::seconds(-5)).await.tag();

    let summary = finished(h.controller.toggle_answer(USER, SPEC, tag, 0, 0).await.unwrap());
    assert_eq!(summary.reason, FinishReason::Timeout);
    assert_eq!(summary.score.correct, 0);
    assert!(h.controller.session(USER, SPEC).await.unwrap().is_none());
}

#[tokio::test]
async fn resume_rearms_live_sessions_and_finishes_overdue_ones() {
    let h = Harness::standard(3, LONG).await;
    let live = insert_session(&h.connection, TimeDelta::minutes(5)).await;
    let overdue_key = SessionKey::new(USER + 1, SPEC);
    let now = Utc::now();
    h.connection
        .create(
            &overdue_key,
            Difficulty::Basic,
            common::questions(3),
            now - TimeDelta::minutes(10),
            now - TimeDelta::seconds(1),
        )
        .await
        .unwrap();

    assert_eq!(h.controller.resume().await.unwrap(), 1);

    assert_eq!(h.controller.armed_timer(USER, SPEC), Some(live.id));
    assert!(h.controller.session(USER + 1, SPEC).await.unwrap().is_none());
    let history = h.connection.history(USER + 1, SPEC).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, FinishReason::Timeout);
}

/// Which store calls keep failing.
#[derive(Clone, Copy, PartialEq)]
enum Fault {
    /// `complete`: the result row is never written.
    Complete,
    /// `mutate_answers` and `advance_cursor`.
    Updates,
}

/// SQLite store with one class of calls failing with contention every time.
struct FaultyStore {
    inner: Connection,
    fault: Fault,
}

impl FaultyStore {
    fn contention(&self, key: &SessionKey) -> StoreError {
        StoreError::Contention(key.to_string())
    }
}

#[async_trait]
impl SessionStore for FaultyStore {
    async fn create(
        &self,
        key: &SessionKey,
        difficulty: Difficulty,
        questions: Vec<Question>,
        started_at: DateTime<Utc>,
        deadline_at: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        self.inner
            .create(key, difficulty, questions, started_at, deadline_at)
            .await
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, StoreError> {
        self.inner.get(key).await
    }

    async fn list_active(&self) -> Result<Vec<Session>, StoreError> {
        self.inner.list_active().await
    }

    async fn mutate_answers(
        &self,
        key: &SessionKey,
        question_index: usize,
        option_index: usize,
    ) -> Result<Option<Session>, StoreError> {
        if self.fault == Fault::Updates {
            return Err(self.contention(key));
        }
        self.inner.mutate_answers(key, question_index, option_index).await
    }

    async fn advance_cursor(&self, key: &SessionKey, new_index: usize) -> Result<Option<Session>, StoreError> {
        if self.fault == Fault::Updates {
            return Err(self.contention(key));
        }
        self.inner.advance_cursor(key, new_index).await
    }

    async fn set_message_ref(
        &self,
        key: &SessionKey,
        session_id: Uuid,
        message_ref: MessageRef,
    ) -> Result<bool, StoreError> {
        self.inner.set_message_ref(key, session_id, message_ref).await
    }

    async fn remove(&self, key: &SessionKey) -> Result<Option<Session>, StoreError> {
        self.inner.remove(key).await
    }

    async fn complete(
        &self,
        key: &SessionKey,
        session_id: Option<Uuid>,
        reason: FinishReason,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<Completion>, StoreError> {
        if self.fault == Fault::Complete {
            return Err(self.contention(key));
        }
        self.inner.complete(key, session_id, reason, finished_at).await
    }
}

async fn faulty_harness(fault: Fault) -> Harness {
    let connection = Connection::in_memory().await.unwrap();
    let mut storage = Storage::sqlite(connection.clone());
    storage.sessions = Arc::new(FaultyStore {
        inner: connection.clone(),
        fault,
    });
    Harness::with_storage(
        Arc::new(TestSpecialization {
            questions: common::questions(3),
            policy: TierPolicy::minutes(3, 10),
        }),
        connection,
        storage,
    )
    .await
}

#[tokio::test]
async fn lost_result_is_still_shown_to_the_user() {
    let h = faulty_harness(Fault::Complete).await;

    let tag = &h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap().tag();
    h.controller.toggle_answer(USER, SPEC, tag, 0, 0).await.unwrap();

    let summary = finished(h.controller.finish(USER, SPEC, FinishReason::User).await.unwrap());
    assert_eq!(summary.score.correct, 1);
    assert_eq!(h.results_rendered(), 1);

    assert!(h.controller.session(USER, SPEC).await.unwrap().is_none());
    assert!(h.connection.history(USER, SPEC).await.unwrap().is_empty());
    assert!(h.controller.armed_timer(USER, SPEC).is_none());
}

#[tokio::test]
async fn failed_writes_report_persistence_and_skip_the_render() {
    let h = faulty_harness(Fault::Updates).await;
    let tag = &h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap().tag();
    let rendered = h.renderer.questions.lock().unwrap().len();

    let err = h.controller.toggle_answer(USER, SPEC, tag, 0, 1).await.unwrap_err();
    assert!(matches!(err, ControllerError::Persistence(StoreError::Contention(_))));
    let err = h.controller.advance(USER, SPEC, tag, 0).await.unwrap_err();
    assert!(matches!(err, ControllerError::Persistence(StoreError::Contention(_))));

    assert_eq!(h.renderer.questions.lock().unwrap().len(), rendered);
    let session = h.controller.session(USER, SPEC).await.unwrap().unwrap();
    assert!(session.answers.is_empty());
    assert_eq!(session.current_index, 0);
}

#[tokio::test]
async fn press_on_a_superseded_session_changes_nothing() {
    let h = Harness::standard(3, LONG).await;
    let old = h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap();
    let new = h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap();
    let old_tag = &old.tag();

    let outcome = h.controller.toggle_answer(USER, SPEC, old_tag, 0, 1).await.unwrap();
    assert!(matches!(outcome, Outcome::NoActiveSession));
    let outcome = h.controller.advance(USER, SPEC, old_tag, 0).await.unwrap();
    assert!(matches!(outcome, Outcome::NoActiveSession));
    let outcome = h.controller.finish_shown(USER, SPEC, old_tag).await.unwrap();
    assert!(matches!(outcome, Outcome::NoActiveSession));

    let active = h.controller.session(USER, SPEC).await.unwrap().unwrap();
    assert_eq!(active.id, new.id);
    assert!(active.answers.is_empty());
    assert_eq!(active.current_index, 0);
    assert!(h.connection.history(USER, SPEC).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn double_tap_on_next_advances_once() {
    let h = Harness::standard(3, LONG).await;
    let tag = h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap().tag();
    h.controller.advance(USER, SPEC, &tag, 0).await.unwrap();

    let taps: Vec<_> = (0..2)
        .map(|_| {
            let controller = h.controller.clone();
            let tag = tag.clone();
            tokio::spawn(async move { controller.advance(USER, SPEC, &tag, 1).await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for tap in taps {
        outcomes.push(tap.await.unwrap().unwrap());
    }
    assert_eq!(outcomes.iter().filter(|o| matches!(o, Outcome::Updated)).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| matches!(o, Outcome::Ignored)).count(), 1);

    let session = h.controller.session(USER, SPEC).await.unwrap().unwrap();
    assert_eq!(session.current_index, 2);

    let summary = finished(h.controller.advance(USER, SPEC, &tag, 2).await.unwrap());
    assert_eq!(summary.reason, FinishReason::User);
}

#[tokio::test]
async fn expiry_for_a_pruned_session_disarms_its_timer() {
    let h = Harness::standard(3, LONG).await;
    let session = h.controller.start(USER, SPEC, Difficulty::Basic, None).await.unwrap();
    let key = SessionKey::new(USER, SPEC);
    h.connection.remove(&key).await.unwrap();
    assert_eq!(h.controller.armed_timer(USER, SPEC), Some(session.id));

    let outcome = h
        .controller
        .finish_expired(&Expiry {
            key,
            session_id: session.id,
        })
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::NoActiveSession));
    assert!(h.controller.armed_timer(USER, SPEC).is_none());
    assert_eq!(h.results_rendered(), 0);
}
