//! Persistence collaborators used by the attempt core.
//!
//! The core only talks to these traits. `postgres` backs them with sqlx, `memory`
//! keeps everything in process for tests and database-less local runs.

pub mod memory;
pub mod pool;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::models::exam::Exam;
use crate::models::exam_attempt::{AnswerMap, ExamAttempt, FinishOutcome, NewAttempt};
use crate::models::question::Question;
use crate::services::grading_service::AnswerKey;

/// Read-only access to exams and their questions.
#[async_trait]
pub trait QuestionBank: Send + Sync {
    async fn find_exam(&self, exam_id: Uuid) -> Result<Option<Exam>>;

    /// Questions currently attached to the exam, in exam order, answers included.
    async fn exam_questions(&self, exam_id: Uuid) -> Result<Vec<Question>>;

    /// Questions by id; unknown ids are skipped.
    async fn questions_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Question>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct Enrollment {
    pub student_id: Uuid,
    pub class_id: Option<Uuid>,
}

/// Department / class / course membership.
#[async_trait]
pub trait Roster: Send + Sync {
    async fn department_classes(&self, department_id: Uuid) -> Result<Vec<Uuid>>;

    async fn class_students(&self, class_id: Uuid) -> Result<Vec<Uuid>>;

    /// Enrollments in enrollment order.
    async fn course_enrollments(&self, course_id: Uuid) -> Result<Vec<Enrollment>>;

    /// `None` when the student is unknown, `Some(None)` when they have no class.
    async fn student_class(&self, student_id: Uuid) -> Result<Option<Option<Uuid>>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    async fn create_attempt(&self, attempt: NewAttempt) -> Result<ExamAttempt>;

    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<ExamAttempt>>;

    /// Stamps `started_at` only if it is still null and returns the current row.
    async fn mark_started(&self, attempt_id: Uuid, now: DateTime<Utc>) -> Result<ExamAttempt>;

    async fn attempt_answers(&self, attempt_id: Uuid) -> Result<AnswerMap>;

    /// Upserts one selection. Returns `false` without writing when the attempt is finished.
    async fn save_answer(
        &self,
        attempt_id: Uuid,
        question_id: Uuid,
        answer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Finish-once transition. Scores the answers visible under the row lock and
    /// writes `finished_at` and `score` only while `finished_at` is null.
    async fn finish_attempt(
        &self,
        attempt_id: Uuid,
        finished_at: DateTime<Utc>,
        key: &AnswerKey,
    ) -> Result<FinishOutcome>;

    async fn list_attempts_for_exam(&self, exam_id: Uuid) -> Result<Vec<ExamAttempt>>;

    async fn list_attempts_for_student(&self, student_id: Uuid) -> Result<Vec<ExamAttempt>>;

    /// Started, unfinished attempts whose time budget ended at or before `now`.
    async fn list_expired_unfinished(&self, now: DateTime<Utc>) -> Result<Vec<ExamAttempt>>;

    /// Deletes the attempt only while it has not been started. Returns whether a row went away.
    async fn delete_unstarted_attempt(&self, attempt_id: Uuid) -> Result<bool>;
}

/// The three collaborators bundled together, as handed to the services.
#[derive(Clone)]
pub struct Store {
    pub questions: Arc<dyn QuestionBank>,
    pub roster: Arc<dyn Roster>,
    pub attempts: Arc<dyn AttemptRepository>,
}

impl Store {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(postgres::PgStore::new(pool));
        Self {
            questions: store.clone(),
            roster: store.clone(),
            attempts: store,
        }
    }

    pub fn memory(store: memory::MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            questions: store.clone(),
            roster: store.clone(),
            attempts: store,
        }
    }
}
