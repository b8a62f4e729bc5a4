use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{AttemptRepository, Enrollment, QuestionBank, Roster};
use crate::error::{Error, Result};
use crate::models::exam::Exam;
use crate::models::exam_attempt::{AnswerMap, ExamAttempt, FinishOutcome, NewAttempt};
use crate::models::question::Question;
use crate::services::grading_service::AnswerKey;

#[derive(Debug, Default)]
struct Inner {
    exams: HashMap<Uuid, Exam>,
    exam_questions: HashMap<Uuid, Vec<Uuid>>,
    questions: HashMap<Uuid, Question>,
    department_classes: HashMap<Uuid, Vec<Uuid>>,
    class_students: HashMap<Uuid, Vec<Uuid>>,
    student_classes: HashMap<Uuid, Option<Uuid>>,
    course_enrollments: HashMap<Uuid, Vec<Uuid>>,
    attempts: HashMap<Uuid, ExamAttempt>,
    attempt_order: Vec<Uuid>,
    answers: HashMap<Uuid, AnswerMap>,
}

/// Process-local store. Every operation runs under one lock, which makes the
/// conditional updates trivially atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

/// Catalog and roster data loaded into a fresh in-memory store.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub questions: Vec<Question>,
    pub exams: Vec<SeedExam>,
    pub classes: Vec<SeedClass>,
    pub students: Vec<SeedStudent>,
    pub enrollments: Vec<SeedEnrollment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedExam {
    pub id: Uuid,
    pub name: String,
    pub question_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedClass {
    pub id: Uuid,
    pub department_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedStudent {
    pub id: Uuid,
    pub class_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedEnrollment {
    pub course_id: Uuid,
    pub student_id: Uuid,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Result<Self> {
        let store = Self::new();
        for question in seed.questions {
            store.insert_question(question)?;
        }
        for exam in seed.exams {
            store.insert_exam(
                Exam {
                    id: exam.id,
                    name: exam.name,
                    created_at: Some(Utc::now()),
                },
                exam.question_ids,
            )?;
        }
        for class in seed.classes {
            store.insert_class(class.department_id, class.id)?;
        }
        for student in seed.students {
            store.insert_student(student.id, student.class_id)?;
        }
        for enrollment in seed.enrollments {
            store.enroll(enrollment.course_id, enrollment.student_id)?;
        }
        Ok(store)
    }

    pub async fn from_seed_file(path: &str) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("Cannot read seed file {}: {}", path, e)))?;
        let seed: Seed = serde_json::from_str(&raw)?;
        Self::from_seed(seed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Internal("in-memory store lock poisoned".to_string()))
    }

    pub fn insert_question(&self, question: Question) -> Result<()> {
        self.lock()?.questions.insert(question.id, question);
        Ok(())
    }

    pub fn insert_exam(&self, exam: Exam, question_ids: Vec<Uuid>) -> Result<()> {
        let mut inner = self.lock()?;
        inner.exam_questions.insert(exam.id, question_ids);
        inner.exams.insert(exam.id, exam);
        Ok(())
    }

    /// Replaces the exam's question list, as the authoring screens would.
    pub fn set_exam_questions(&self, exam_id: Uuid, question_ids: Vec<Uuid>) -> Result<()> {
        self.lock()?.exam_questions.insert(exam_id, question_ids);
        Ok(())
    }

    pub fn insert_class(&self, department_id: Option<Uuid>, class_id: Uuid) -> Result<()> {
        let mut inner = self.lock()?;
        inner.class_students.entry(class_id).or_default();
        if let Some(department_id) = department_id {
            inner
                .department_classes
                .entry(department_id)
                .or_default()
                .push(class_id);
        }
        Ok(())
    }

    pub fn insert_student(&self, student_id: Uuid, class_id: Option<Uuid>) -> Result<()> {
        let mut inner = self.lock()?;
        inner.student_classes.insert(student_id, class_id);
        if let Some(class_id) = class_id {
            inner.class_students.entry(class_id).or_default().push(student_id);
        }
        Ok(())
    }

    pub fn enroll(&self, course_id: Uuid, student_id: Uuid) -> Result<()> {
        self.lock()?
            .course_enrollments
            .entry(course_id)
            .or_default()
            .push(student_id);
        Ok(())
    }

    fn attempts_where<F>(&self, keep: F) -> Result<Vec<ExamAttempt>>
    where
        F: Fn(&ExamAttempt) -> bool,
    {
        let inner = self.lock()?;
        Ok(inner
            .attempt_order
            .iter()
            .filter_map(|id| inner.attempts.get(id))
            .filter(|a| keep(a))
            .cloned()
            .collect())
    }
}

fn attempt_not_found(attempt_id: Uuid) -> Error {
    Error::NotFound(format!("Attempt {} not found", attempt_id))
}

#[async_trait]
impl QuestionBank for MemoryStore {
    async fn find_exam(&self, exam_id: Uuid) -> Result<Option<Exam>> {
        Ok(self.lock()?.exams.get(&exam_id).cloned())
    }

    async fn exam_questions(&self, exam_id: Uuid) -> Result<Vec<Question>> {
        let inner = self.lock()?;
        Ok(inner
            .exam_questions
            .get(&exam_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.questions.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn questions_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Question>> {
        let inner = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.questions.get(id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Roster for MemoryStore {
    async fn department_classes(&self, department_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .lock()?
            .department_classes
            .get(&department_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn class_students(&self, class_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .lock()?
            .class_students
            .get(&class_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn course_enrollments(&self, course_id: Uuid) -> Result<Vec<Enrollment>> {
        let inner = self.lock()?;
        Ok(inner
            .course_enrollments
            .get(&course_id)
            .map(|students| {
                students
                    .iter()
                    .map(|student_id| Enrollment {
                        student_id: *student_id,
                        class_id: inner.student_classes.get(student_id).copied().flatten(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn student_class(&self, student_id: Uuid) -> Result<Option<Option<Uuid>>> {
        Ok(self.lock()?.student_classes.get(&student_id).copied())
    }
}

#[async_trait]
impl AttemptRepository for MemoryStore {
    async fn create_attempt(&self, attempt: NewAttempt) -> Result<ExamAttempt> {
        let row = ExamAttempt {
            id: Uuid::new_v4(),
            exam_id: attempt.exam_id,
            student_id: attempt.student_id,
            name: attempt.name,
            course_id: attempt.course_id,
            class_id: attempt.class_id,
            created_by: attempt.created_by,
            question_ids: attempt.question_ids,
            stratified: attempt.stratified,
            duration_minutes: attempt.duration_minutes,
            show_correct_after: attempt.show_correct_after,
            deadline: attempt.deadline,
            started_at: None,
            finished_at: None,
            score: None,
            created_at: Utc::now(),
        };
        let mut inner = self.lock()?;
        inner.attempt_order.push(row.id);
        inner.attempts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<ExamAttempt>> {
        Ok(self.lock()?.attempts.get(&attempt_id).cloned())
    }

    async fn mark_started(&self, attempt_id: Uuid, now: DateTime<Utc>) -> Result<ExamAttempt> {
        let mut inner = self.lock()?;
        let attempt = inner
            .attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| attempt_not_found(attempt_id))?;
        if attempt.started_at.is_none() {
            attempt.started_at = Some(now);
        }
        Ok(attempt.clone())
    }

    async fn attempt_answers(&self, attempt_id: Uuid) -> Result<AnswerMap> {
        Ok(self
            .lock()?
            .answers
            .get(&attempt_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_answer(
        &self,
        attempt_id: Uuid,
        question_id: Uuid,
        answer_id: Uuid,
        _now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        let attempt = inner
            .attempts
            .get(&attempt_id)
            .ok_or_else(|| attempt_not_found(attempt_id))?;
        if attempt.is_finished() {
            return Ok(false);
        }
        inner
            .answers
            .entry(attempt_id)
            .or_default()
            .insert(question_id, answer_id);
        Ok(true)
    }

    async fn finish_attempt(
        &self,
        attempt_id: Uuid,
        finished_at: DateTime<Utc>,
        key: &AnswerKey,
    ) -> Result<FinishOutcome> {
        let mut inner = self.lock()?;
        let score = inner
            .answers
            .get(&attempt_id)
            .map(|answers| key.score(answers))
            .unwrap_or_default();
        let attempt = inner
            .attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| attempt_not_found(attempt_id))?;
        if attempt.is_finished() {
            return Ok(FinishOutcome::AlreadyFinished(attempt.clone()));
        }
        attempt.finished_at = Some(finished_at);
        attempt.score = Some(score);
        Ok(FinishOutcome::Finished(attempt.clone()))
    }

    async fn list_attempts_for_exam(&self, exam_id: Uuid) -> Result<Vec<ExamAttempt>> {
        self.attempts_where(|a| a.exam_id == exam_id)
    }

    async fn list_attempts_for_student(&self, student_id: Uuid) -> Result<Vec<ExamAttempt>> {
        self.attempts_where(|a| a.student_id == student_id)
    }

    async fn list_expired_unfinished(&self, now: DateTime<Utc>) -> Result<Vec<ExamAttempt>> {
        self.attempts_where(|a| !a.is_finished() && a.time_budget_end().is_some_and(|end| end <= now))
    }

    async fn delete_unstarted_attempt(&self, attempt_id: Uuid) -> Result<bool> {
        let mut inner = self.lock()?;
        let unstarted = inner
            .attempts
            .get(&attempt_id)
            .is_some_and(|a| a.started_at.is_none() && !a.is_finished());
        if !unstarted {
            return Ok(false);
        }
        inner.attempts.remove(&attempt_id);
        inner.attempt_order.retain(|id| *id != attempt_id);
        inner.answers.remove(&attempt_id);
        Ok(true)
    }
}
