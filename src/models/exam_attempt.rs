use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::utils::time;

/// Student selections keyed by question id. One entry per question, last write wins.
pub type AnswerMap = BTreeMap<Uuid, Uuid>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    NotStarted,
    InProgress,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExamAttempt {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub name: Option<String>,
    pub course_id: Option<Uuid>,
    pub class_id: Option<Uuid>,
    pub created_by: Uuid,
    /// Frozen at creation. Never re-read from the exam afterwards.
    pub question_ids: Vec<Uuid>,
    /// Whether the snapshot came from a difficulty-stratified draw.
    pub stratified: bool,
    pub duration_minutes: i32,
    pub show_correct_after: bool,
    pub deadline: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub score: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl ExamAttempt {
    pub fn state(&self) -> AttemptState {
        match (self.started_at, self.finished_at) {
            (_, Some(_)) => AttemptState::Finished,
            (Some(_), None) => AttemptState::InProgress,
            (None, None) => AttemptState::NotStarted,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Seconds left in the time budget, derived from `started_at` on every call.
    /// `None` while the attempt has not been opened.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.started_at
            .map(|started| time::remaining_seconds(started, self.duration_minutes, now))
    }

    /// Moment the time budget runs out, if the attempt has been started.
    pub fn time_budget_end(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .map(|started| time::budget_end(started, self.duration_minutes))
    }

    pub fn is_time_up(&self, now: DateTime<Utc>) -> bool {
        self.time_budget_end().is_some_and(|end| end <= now)
    }

    pub fn contains_question(&self, question_id: Uuid) -> bool {
        self.question_ids.contains(&question_id)
    }
}

/// Everything the attempt factory decides for one student.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub name: Option<String>,
    pub course_id: Option<Uuid>,
    pub class_id: Option<Uuid>,
    pub created_by: Uuid,
    pub question_ids: Vec<Uuid>,
    pub stratified: bool,
    pub duration_minutes: i32,
    pub show_correct_after: bool,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AttemptAnswerRow {
    pub question_id: Uuid,
    pub answer_id: Uuid,
}

/// Outcome of the finish-once conditional update.
#[derive(Debug, Clone)]
pub enum FinishOutcome {
    Finished(ExamAttempt),
    AlreadyFinished(ExamAttempt),
}

impl FinishOutcome {
    pub fn into_attempt(self) -> ExamAttempt {
        match self {
            FinishOutcome::Finished(a) | FinishOutcome::AlreadyFinished(a) => a,
        }
    }
}
