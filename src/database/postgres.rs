use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::{AttemptRepository, Enrollment, QuestionBank, Roster};
use crate::error::{Error, Result};
use crate::models::exam::Exam;
use crate::models::exam_attempt::{
    AnswerMap, AttemptAnswerRow, ExamAttempt, FinishOutcome, NewAttempt,
};
use crate::models::question::{Answer, Question, QuestionRow};
use crate::services::grading_service::AnswerKey;

const ATTEMPT_COLUMNS: &str = r#"
    id, exam_id, student_id, name, course_id, class_id, created_by,
    question_ids, stratified, duration_minutes, show_correct_after, deadline,
    started_at, finished_at, score, created_at
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn attach_answers(&self, rows: Vec<QuestionRow>) -> Result<Vec<Question>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let answers = sqlx::query_as::<_, Answer>(
            r#"
            SELECT id, question_id, content, is_correct
            FROM answers
            WHERE question_id = ANY($1)
            ORDER BY position, id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_question: HashMap<Uuid, Vec<Answer>> = HashMap::new();
        for answer in answers {
            by_question.entry(answer.question_id).or_default().push(answer);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let answers = by_question.remove(&row.id).unwrap_or_default();
                row.with_answers(answers)
            })
            .collect())
    }

    async fn attempts_query(&self, filter: &str, id: Uuid) -> Result<Vec<ExamAttempt>> {
        let sql = format!(
            "SELECT {} FROM exam_attempts WHERE {} = $1 ORDER BY created_at, id",
            ATTEMPT_COLUMNS, filter
        );
        let rows = sqlx::query_as::<_, ExamAttempt>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

fn attempt_not_found(attempt_id: Uuid) -> Error {
    Error::NotFound(format!("Attempt {} not found", attempt_id))
}

#[async_trait]
impl QuestionBank for PgStore {
    async fn find_exam(&self, exam_id: Uuid) -> Result<Option<Exam>> {
        let exam = sqlx::query_as::<_, Exam>(r#"SELECT id, name, created_at FROM exams WHERE id = $1"#)
            .bind(exam_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(exam)
    }

    async fn exam_questions(&self, exam_id: Uuid) -> Result<Vec<Question>> {
        let rows = sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT q.id, q.content, q.points, q.difficulty
            FROM exam_questions eq
            JOIN questions q ON q.id = eq.question_id
            WHERE eq.exam_id = $1
            ORDER BY eq.position, q.id
            "#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;
        self.attach_answers(rows).await
    }

    async fn questions_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Question>> {
        let rows = sqlx::query_as::<_, QuestionRow>(
            r#"SELECT id, content, points, difficulty FROM questions WHERE id = ANY($1)"#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut questions = self.attach_answers(rows).await?;
        let order: HashMap<Uuid, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        questions.sort_by_key(|q| order.get(&q.id).copied().unwrap_or(usize::MAX));
        Ok(questions)
    }
}

#[async_trait]
impl Roster for PgStore {
    async fn department_classes(&self, department_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT id FROM classes WHERE department_id = $1 ORDER BY created_at, id"#,
        )
        .bind(department_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn class_students(&self, class_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT id FROM students WHERE class_id = $1 ORDER BY created_at, id"#,
        )
        .bind(class_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn course_enrollments(&self, course_id: Uuid) -> Result<Vec<Enrollment>> {
        let rows = sqlx::query_as::<_, Enrollment>(
            r#"
            SELECT e.student_id, s.class_id
            FROM enrollments e
            JOIN students s ON s.id = e.student_id
            WHERE e.course_id = $1
            ORDER BY e.enrolled_at, e.student_id
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn student_class(&self, student_id: Uuid) -> Result<Option<Option<Uuid>>> {
        let class_id = sqlx::query_scalar::<_, Option<Uuid>>(
            r#"SELECT class_id FROM students WHERE id = $1"#,
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(class_id)
    }
}

#[async_trait]
impl AttemptRepository for PgStore {
    async fn create_attempt(&self, attempt: NewAttempt) -> Result<ExamAttempt> {
        let sql = format!(
            r#"
            INSERT INTO exam_attempts (
                exam_id, student_id, name, course_id, class_id, created_by,
                question_ids, stratified, duration_minutes, show_correct_after, deadline
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        );
        let row = sqlx::query_as::<_, ExamAttempt>(&sql)
            .bind(attempt.exam_id)
            .bind(attempt.student_id)
            .bind(attempt.name)
            .bind(attempt.course_id)
            .bind(attempt.class_id)
            .bind(attempt.created_by)
            .bind(attempt.question_ids)
            .bind(attempt.stratified)
            .bind(attempt.duration_minutes)
            .bind(attempt.show_correct_after)
            .bind(attempt.deadline)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<ExamAttempt>> {
        let sql = format!("SELECT {} FROM exam_attempts WHERE id = $1", ATTEMPT_COLUMNS);
        let row = sqlx::query_as::<_, ExamAttempt>(&sql)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn mark_started(&self, attempt_id: Uuid, now: DateTime<Utc>) -> Result<ExamAttempt> {
        let sql = format!(
            r#"
            UPDATE exam_attempts
            SET started_at = COALESCE(started_at, $2), updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        );
        sqlx::query_as::<_, ExamAttempt>(&sql)
            .bind(attempt_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| attempt_not_found(attempt_id))
    }

    async fn attempt_answers(&self, attempt_id: Uuid) -> Result<AnswerMap> {
        let rows = sqlx::query_as::<_, AttemptAnswerRow>(
            r#"SELECT question_id, answer_id FROM attempt_answers WHERE attempt_id = $1"#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.question_id, r.answer_id)).collect())
    }

    async fn save_answer(
        &self,
        attempt_id: Uuid,
        question_id: Uuid,
        answer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // FOR SHARE blocks while a finish holds the row, so a save never lands after scoring.
        let finished_at = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            r#"SELECT finished_at FROM exam_attempts WHERE id = $1 FOR SHARE"#,
        )
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| attempt_not_found(attempt_id))?;

        if finished_at.is_some() {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO attempt_answers (attempt_id, question_id, answer_id, answered_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (attempt_id, question_id)
            DO UPDATE SET answer_id = EXCLUDED.answer_id, answered_at = EXCLUDED.answered_at
            "#,
        )
        .bind(attempt_id)
        .bind(question_id)
        .bind(answer_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn finish_attempt(
        &self,
        attempt_id: Uuid,
        finished_at: DateTime<Utc>,
        key: &AnswerKey,
    ) -> Result<FinishOutcome> {
        let mut tx = self.pool.begin().await?;

        let lock_sql = format!(
            "SELECT {} FROM exam_attempts WHERE id = $1 FOR UPDATE",
            ATTEMPT_COLUMNS
        );
        let current = sqlx::query_as::<_, ExamAttempt>(&lock_sql)
            .bind(attempt_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| attempt_not_found(attempt_id))?;

        if current.is_finished() {
            tx.commit().await?;
            return Ok(FinishOutcome::AlreadyFinished(current));
        }

        let answers: AnswerMap = sqlx::query_as::<_, AttemptAnswerRow>(
            r#"SELECT question_id, answer_id FROM attempt_answers WHERE attempt_id = $1"#,
        )
        .bind(attempt_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|r| (r.question_id, r.answer_id))
        .collect();
        let score = key.score(&answers);

        let update_sql = format!(
            r#"
            UPDATE exam_attempts
            SET finished_at = $2, score = $3, updated_at = NOW()
            WHERE id = $1 AND finished_at IS NULL
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        );
        let updated = sqlx::query_as::<_, ExamAttempt>(&update_sql)
            .bind(attempt_id)
            .bind(finished_at)
            .bind(score)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(FinishOutcome::Finished(updated))
    }

    async fn list_attempts_for_exam(&self, exam_id: Uuid) -> Result<Vec<ExamAttempt>> {
        self.attempts_query("exam_id", exam_id).await
    }

    async fn list_attempts_for_student(&self, student_id: Uuid) -> Result<Vec<ExamAttempt>> {
        self.attempts_query("student_id", student_id).await
    }

    async fn list_expired_unfinished(&self, now: DateTime<Utc>) -> Result<Vec<ExamAttempt>> {
        let sql = format!(
            r#"
            SELECT {} FROM exam_attempts
            WHERE finished_at IS NULL
              AND started_at IS NOT NULL
              AND started_at + make_interval(mins => duration_minutes) <= $1
            ORDER BY started_at
            "#,
            ATTEMPT_COLUMNS
        );
        let rows = sqlx::query_as::<_, ExamAttempt>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn delete_unstarted_attempt(&self, attempt_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"DELETE FROM exam_attempts WHERE id = $1 AND started_at IS NULL AND finished_at IS NULL"#,
        )
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
