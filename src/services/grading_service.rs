use crate::models::exam_attempt::AnswerMap;
use crate::models::question::Question;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Official answers for an attempt's frozen question set.
#[derive(Debug, Clone, Default)]
pub struct AnswerKey {
    entries: Vec<KeyEntry>,
}

#[derive(Debug, Clone)]
struct KeyEntry {
    question_id: Uuid,
    points: Decimal,
    correct: HashSet<Uuid>,
}

impl AnswerKey {
    /// Builds the key in snapshot order. Snapshot ids the bank no longer knows are
    /// left out, so they award nothing and add nothing to the possible total.
    pub fn new(snapshot: &[Uuid], questions: &[Question]) -> Self {
        let by_id: HashMap<Uuid, &Question> = questions.iter().map(|q| (q.id, q)).collect();
        let entries = snapshot
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|q| KeyEntry {
                question_id: q.id,
                points: q.points,
                correct: q.correct_answer_ids().collect(),
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_possible(&self) -> Decimal {
        self.entries.iter().map(|e| e.points).sum()
    }

    /// Sum of points for questions whose selected answer is marked correct.
    /// Unanswered and wrong both count zero.
    pub fn score(&self, answers: &AnswerMap) -> Decimal {
        self.entries
            .iter()
            .filter(|e| Self::is_correct(e, answers))
            .map(|e| e.points)
            .sum()
    }

    fn is_correct(entry: &KeyEntry, answers: &AnswerMap) -> bool {
        answers
            .get(&entry.question_id)
            .is_some_and(|selected| entry.correct.contains(selected))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GradedQuestion {
    pub question_id: Uuid,
    pub max_points: Decimal,
    pub points_earned: Decimal,
    pub selected_answer_id: Option<Uuid>,
    pub is_correct: bool,
}

pub struct GradingService;

impl GradingService {
    pub fn grade(key: &AnswerKey, answers: &AnswerMap) -> Vec<GradedQuestion> {
        key.entries
            .iter()
            .map(|entry| {
                let is_correct = AnswerKey::is_correct(entry, answers);
                GradedQuestion {
                    question_id: entry.question_id,
                    max_points: entry.points,
                    points_earned: if is_correct { entry.points } else { Decimal::ZERO },
                    selected_answer_id: answers.get(&entry.question_id).copied(),
                    is_correct,
                }
            })
            .collect()
    }

    /// Presentation-only score out of 10, rounded to two places.
    pub fn normalized_score(score: Decimal, total_possible: Decimal) -> Decimal {
        if total_possible <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (score / total_possible * Decimal::TEN).round_dp(2)
    }
}
