use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Reusable exam template. Its question list lives in `exam_questions`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Exam {
    pub id: Uuid,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}
