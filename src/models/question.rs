use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "difficulty", rename_all = "UPPERCASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];
}

/// Catalog entry owned by the question bank. Read-only for the attempt core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub content: String,
    pub points: Decimal,
    pub difficulty: Difficulty,
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Answer {
    pub id: Uuid,
    pub question_id: Uuid,
    pub content: String,
    pub is_correct: bool,
}

impl Question {
    pub fn answer(&self, answer_id: Uuid) -> Option<&Answer> {
        self.answers.iter().find(|a| a.id == answer_id)
    }

    pub fn correct_answer_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.answers.iter().filter(|a| a.is_correct).map(|a| a.id)
    }
}

/// Row shape of the `questions` table; answers are attached afterwards.
#[derive(Debug, Clone, FromRow)]
pub struct QuestionRow {
    pub id: Uuid,
    pub content: String,
    pub points: Decimal,
    pub difficulty: Difficulty,
}

impl QuestionRow {
    pub fn with_answers(self, answers: Vec<Answer>) -> Question {
        Question {
            id: self.id,
            content: self.content,
            points: self.points,
            difficulty: self.difficulty,
            answers,
        }
    }
}
