use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::exam_attempt::{AnswerMap, AttemptState, ExamAttempt};
use crate::models::question::{Difficulty, Question};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    pub question_id: Uuid,
    pub answer_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SaveAnswerResponse {
    pub saved: bool,
    pub question_id: Uuid,
    pub answer_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub remaining_seconds: i64,
}

/// An answer option as shown while taking: no correctness flag.
#[derive(Debug, Serialize)]
pub struct TakingAnswer {
    pub id: Uuid,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct TakingQuestion {
    pub id: Uuid,
    pub content: String,
    pub points: Decimal,
    pub difficulty: Difficulty,
    pub answers: Vec<TakingAnswer>,
}

impl From<&Question> for TakingQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            content: q.content.clone(),
            points: q.points,
            difficulty: q.difficulty,
            answers: q
                .answers
                .iter()
                .map(|a| TakingAnswer {
                    id: a.id,
                    content: a.content.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AttemptForTakingResponse {
    pub attempt_id: Uuid,
    pub exam_id: Uuid,
    pub name: Option<String>,
    pub state: AttemptState,
    pub started_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub deadline: DateTime<Utc>,
    pub remaining_seconds: i64,
    pub questions: Vec<TakingQuestion>,
    pub selected: AnswerMap,
}

#[derive(Debug, Serialize)]
pub struct AttemptStatusResponse {
    pub attempt_id: Uuid,
    pub state: AttemptState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub deadline: DateTime<Utc>,
    pub remaining_seconds: Option<i64>,
    pub questions_answered: usize,
    pub total_questions: usize,
}

#[derive(Debug, Serialize)]
pub struct FinishAttemptResponse {
    pub attempt_id: Uuid,
    pub score: Decimal,
    pub total_possible: Decimal,
    pub normalized_score: Decimal,
    pub finished_at: DateTime<Utc>,
    pub already_finished: bool,
}

#[derive(Debug, Serialize)]
pub struct ResultAnswer {
    pub id: Uuid,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ResultQuestion {
    pub id: Uuid,
    pub content: String,
    pub points: Decimal,
    pub selected_answer_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_earned: Option<Decimal>,
    pub answers: Vec<ResultAnswer>,
}

#[derive(Debug, Serialize)]
pub struct AttemptResultResponse {
    pub attempt_id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub score: Decimal,
    pub total_possible: Decimal,
    pub normalized_score: Decimal,
    pub correct_answers_revealed: bool,
    pub questions: Vec<ResultQuestion>,
}

#[derive(Debug, Serialize)]
pub struct AttemptSummary {
    pub attempt_id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub name: Option<String>,
    pub class_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
    pub state: AttemptState,
    pub deadline: DateTime<Utc>,
    pub duration_minutes: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_questions: usize,
    pub score: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_score: Option<Decimal>,
}

impl From<&ExamAttempt> for AttemptSummary {
    fn from(a: &ExamAttempt) -> Self {
        Self {
            attempt_id: a.id,
            exam_id: a.exam_id,
            student_id: a.student_id,
            name: a.name.clone(),
            class_id: a.class_id,
            course_id: a.course_id,
            state: a.state(),
            deadline: a.deadline,
            duration_minutes: a.duration_minutes,
            started_at: a.started_at,
            finished_at: a.finished_at,
            total_questions: a.question_ids.len(),
            score: a.score,
            normalized_score: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AttemptListResponse {
    pub attempts: Vec<AttemptSummary>,
    pub total: usize,
}
