use crate::database::Store;
use crate::dto::attempt_dto::{
    AttemptForTakingResponse, AttemptListResponse, AttemptResultResponse, AttemptStatusResponse,
    AttemptSummary, FinishAttemptResponse, ResultAnswer, ResultQuestion, SaveAnswerResponse,
    TakingQuestion,
};
use crate::error::{Error, Result};
use crate::models::exam_attempt::{AttemptState, ExamAttempt, FinishOutcome};
use crate::models::question::Question;
use crate::models::user::Identity;
use crate::services::grading_service::{AnswerKey, GradingService};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct AttemptPolicy {
    /// Finalise a timed-out attempt as soon as anything touches it.
    pub auto_finalize_expired: bool,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self {
            auto_finalize_expired: true,
        }
    }
}

/// Runtime of a single student's attempt: open, save, finish, result.
///
/// Every operation takes the caller and the current time explicitly. Remaining
/// time is always recomputed from `started_at` and never stored.
#[derive(Clone)]
pub struct AttemptService {
    store: Store,
    policy: AttemptPolicy,
}

impl AttemptService {
    pub fn new(store: Store, policy: AttemptPolicy) -> Self {
        Self { store, policy }
    }

    async fn load(&self, attempt_id: Uuid) -> Result<ExamAttempt> {
        self.store
            .attempts
            .find_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
    }

    fn ensure_owner(caller: &Identity, attempt: &ExamAttempt) -> Result<()> {
        if attempt.student_id != caller.user_id {
            return Err(Error::Forbidden(
                "This attempt belongs to another student".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_owner_or_staff(caller: &Identity, attempt: &ExamAttempt) -> Result<()> {
        if caller.is_staff() {
            return Ok(());
        }
        Self::ensure_owner(caller, attempt)
    }

    fn ensure_staff(caller: &Identity) -> Result<()> {
        if !caller.is_staff() {
            return Err(Error::Forbidden(
                "Only teachers and admins can do this".to_string(),
            ));
        }
        Ok(())
    }

    /// Snapshot questions in snapshot order, with the key built from them.
    async fn snapshot(&self, attempt: &ExamAttempt) -> Result<(Vec<Question>, AnswerKey)> {
        let questions = self
            .store
            .questions
            .questions_by_ids(&attempt.question_ids)
            .await?;
        let key = AnswerKey::new(&attempt.question_ids, &questions);
        Ok((questions, key))
    }

    async fn finalize(
        &self,
        attempt: &ExamAttempt,
        finished_at: DateTime<Utc>,
    ) -> Result<FinishOutcome> {
        let (_, key) = self.snapshot(attempt).await?;
        let outcome = self
            .store
            .attempts
            .finish_attempt(attempt.id, finished_at, &key)
            .await?;
        if let FinishOutcome::Finished(done) = &outcome {
            tracing::info!(
                attempt_id = %done.id,
                student_id = %done.student_id,
                score = %done.score.unwrap_or_default(),
                total_possible = %key.total_possible(),
                "attempt finished"
            );
        }
        Ok(outcome)
    }

    /// Lazily closes an attempt whose budget is spent. The finish time is the
    /// budget end, not the moment somebody happened to look at it.
    async fn settle(&self, attempt: ExamAttempt, now: DateTime<Utc>) -> Result<ExamAttempt> {
        if !self.policy.auto_finalize_expired || attempt.is_finished() || !attempt.is_time_up(now) {
            return Ok(attempt);
        }
        let finished_at = attempt.time_budget_end().map_or(now, |end| end.min(now));
        let outcome = self.finalize(&attempt, finished_at).await?;
        tracing::info!(attempt_id = %attempt.id, "expired attempt finalised on access");
        Ok(outcome.into_attempt())
    }

    /// Fetch for taking. Stamps `started_at` on first access.
    pub async fn open(
        &self,
        caller: &Identity,
        attempt_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AttemptForTakingResponse> {
        let attempt = self.load(attempt_id).await?;
        Self::ensure_owner(caller, &attempt)?;
        let attempt = self.settle(attempt, now).await?;
        if attempt.is_finished() {
            return Err(Error::Forbidden("Attempt already completed".to_string()));
        }

        let attempt = if attempt.started_at.is_none() {
            if now > attempt.deadline {
                return Err(Error::Forbidden(
                    "The deadline for this attempt has passed".to_string(),
                ));
            }
            let started = self.store.attempts.mark_started(attempt.id, now).await?;
            tracing::info!(attempt_id = %started.id, student_id = %started.student_id, "attempt started");
            started
        } else {
            attempt
        };

        let (questions, _) = self.snapshot(&attempt).await?;
        let selected = self.store.attempts.attempt_answers(attempt.id).await?;
        let started_at = attempt.started_at.unwrap_or(now);

        Ok(AttemptForTakingResponse {
            attempt_id: attempt.id,
            exam_id: attempt.exam_id,
            name: attempt.name.clone(),
            state: attempt.state(),
            started_at,
            duration_minutes: attempt.duration_minutes,
            deadline: attempt.deadline,
            remaining_seconds: attempt.remaining_seconds(now).unwrap_or(0),
            questions: questions.iter().map(TakingQuestion::from).collect(),
            selected,
        })
    }

    /// Countdown poll. Never starts the attempt.
    pub async fn status(
        &self,
        caller: &Identity,
        attempt_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AttemptStatusResponse> {
        let attempt = self.load(attempt_id).await?;
        Self::ensure_owner(caller, &attempt)?;
        let attempt = self.settle(attempt, now).await?;
        let answers = self.store.attempts.attempt_answers(attempt.id).await?;

        Ok(AttemptStatusResponse {
            attempt_id: attempt.id,
            state: attempt.state(),
            started_at: attempt.started_at,
            finished_at: attempt.finished_at,
            deadline: attempt.deadline,
            remaining_seconds: match attempt.state() {
                AttemptState::Finished => Some(0),
                _ => attempt.remaining_seconds(now),
            },
            questions_answered: answers
                .keys()
                .filter(|q| attempt.contains_question(**q))
                .count(),
            total_questions: attempt.question_ids.len(),
        })
    }

    pub async fn save_answer(
        &self,
        caller: &Identity,
        attempt_id: Uuid,
        question_id: Uuid,
        answer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SaveAnswerResponse> {
        let attempt = self.load(attempt_id).await?;
        Self::ensure_owner(caller, &attempt)?;
        let attempt = self.settle(attempt, now).await?;

        if attempt.is_finished() {
            return Err(Error::Forbidden("Attempt already completed".to_string()));
        }
        let Some(remaining) = attempt.remaining_seconds(now) else {
            return Err(Error::Forbidden("Attempt has not been started".to_string()));
        };
        if remaining == 0 {
            tracing::info!(%attempt_id, %question_id, "answer rejected, time is up");
            return Err(Error::Forbidden("Time is up for this attempt".to_string()));
        }
        if !attempt.contains_question(question_id) {
            return Err(Error::Validation(format!(
                "Question {} is not part of this attempt",
                question_id
            )));
        }

        let question = self
            .store
            .questions
            .questions_by_ids(&[question_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("Question {} not found", question_id)))?;
        if question.answer(answer_id).is_none() {
            return Err(Error::Validation(format!(
                "Answer {} does not belong to question {}",
                answer_id, question_id
            )));
        }

        let saved = self
            .store
            .attempts
            .save_answer(attempt.id, question_id, answer_id, now)
            .await?;
        if !saved {
            tracing::info!(%attempt_id, %question_id, "answer rejected, attempt finished concurrently");
            return Err(Error::Forbidden("Attempt already completed".to_string()));
        }

        Ok(SaveAnswerResponse {
            saved,
            question_id,
            answer_id,
            timestamp: now,
            remaining_seconds: remaining,
        })
    }

    /// Finish-once. A repeated call returns the stored score untouched.
    pub async fn finish(
        &self,
        caller: &Identity,
        attempt_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<FinishAttemptResponse> {
        let attempt = self.load(attempt_id).await?;
        Self::ensure_owner(caller, &attempt)?;

        let outcome = if attempt.is_finished() {
            FinishOutcome::AlreadyFinished(attempt)
        } else {
            if attempt.started_at.is_none() {
                return Err(Error::Forbidden("Attempt has not been started".to_string()));
            }
            // A client submitting after its timer ran out still only gets credit up to the budget end.
            let finished_at = match attempt.time_budget_end() {
                Some(end) if end < now => end,
                _ => now,
            };
            self.finalize(&attempt, finished_at).await?
        };

        let already_finished = matches!(outcome, FinishOutcome::AlreadyFinished(_));
        let attempt = outcome.into_attempt();
        let (_, key) = self.snapshot(&attempt).await?;
        let score = attempt.score.unwrap_or_default();
        let total_possible = key.total_possible();

        Ok(FinishAttemptResponse {
            attempt_id: attempt.id,
            score,
            total_possible,
            normalized_score: GradingService::normalized_score(score, total_possible),
            finished_at: attempt.finished_at.unwrap_or(now),
            already_finished,
        })
    }

    /// Read-only scored view. Correctness flags follow `show_correct_after` for
    /// students; staff always see them. The numeric score is always present.
    pub async fn result(
        &self,
        caller: &Identity,
        attempt_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AttemptResultResponse> {
        let attempt = self.load(attempt_id).await?;
        Self::ensure_owner_or_staff(caller, &attempt)?;
        let attempt = self.settle(attempt, now).await?;
        let Some(finished_at) = attempt.finished_at else {
            return Err(Error::Forbidden("Attempt is not finished yet".to_string()));
        };

        let (questions, key) = self.snapshot(&attempt).await?;
        let answers = self.store.attempts.attempt_answers(attempt.id).await?;
        let reveal = attempt.show_correct_after || caller.is_staff();
        let graded: HashMap<Uuid, _> = GradingService::grade(&key, &answers)
            .into_iter()
            .map(|g| (g.question_id, g))
            .collect();

        let questions = questions
            .iter()
            .map(|q| {
                let grade = graded.get(&q.id);
                ResultQuestion {
                    id: q.id,
                    content: q.content.clone(),
                    points: q.points,
                    selected_answer_id: answers.get(&q.id).copied(),
                    is_correct: grade.filter(|_| reveal).map(|g| g.is_correct),
                    points_earned: grade.filter(|_| reveal).map(|g| g.points_earned),
                    answers: q
                        .answers
                        .iter()
                        .map(|a| ResultAnswer {
                            id: a.id,
                            content: a.content.clone(),
                            is_correct: reveal.then_some(a.is_correct),
                        })
                        .collect(),
                }
            })
            .collect();

        let score = attempt.score.unwrap_or_default();
        let total_possible = key.total_possible();
        Ok(AttemptResultResponse {
            attempt_id: attempt.id,
            exam_id: attempt.exam_id,
            student_id: attempt.student_id,
            name: attempt.name.clone(),
            started_at: attempt.started_at,
            finished_at,
            score,
            total_possible,
            normalized_score: GradingService::normalized_score(score, total_possible),
            correct_answers_revealed: reveal,
            questions,
        })
    }

    pub async fn list_for_exam(
        &self,
        caller: &Identity,
        exam_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AttemptListResponse> {
        Self::ensure_staff(caller)?;
        self.store
            .questions
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Exam {} not found", exam_id)))?;
        let attempts = self.store.attempts.list_attempts_for_exam(exam_id).await?;
        self.summarize(attempts, now).await
    }

    pub async fn list_for_student(
        &self,
        caller: &Identity,
        now: DateTime<Utc>,
    ) -> Result<AttemptListResponse> {
        let attempts = self
            .store
            .attempts
            .list_attempts_for_student(caller.user_id)
            .await?;
        self.summarize(attempts, now).await
    }

    async fn summarize(
        &self,
        attempts: Vec<ExamAttempt>,
        now: DateTime<Utc>,
    ) -> Result<AttemptListResponse> {
        let mut settled = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            settled.push(self.settle(attempt, now).await?);
        }

        let ids: Vec<Uuid> = settled
            .iter()
            .filter(|a| a.is_finished())
            .flat_map(|a| a.question_ids.iter().copied())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let questions = if ids.is_empty() {
            Vec::new()
        } else {
            self.store.questions.questions_by_ids(&ids).await?
        };

        let summaries: Vec<AttemptSummary> = settled
            .iter()
            .map(|attempt| {
                let mut summary = AttemptSummary::from(attempt);
                if let Some(score) = attempt.score {
                    let total = AnswerKey::new(&attempt.question_ids, &questions).total_possible();
                    summary.normalized_score = Some(GradingService::normalized_score(score, total));
                }
                summary
            })
            .collect();

        Ok(AttemptListResponse {
            total: summaries.len(),
            attempts: summaries,
        })
    }

    /// Removes an assignment nobody has opened yet.
    pub async fn revoke(&self, caller: &Identity, attempt_id: Uuid) -> Result<()> {
        Self::ensure_staff(caller)?;
        let attempt = self.load(attempt_id).await?;
        if attempt.state() != AttemptState::NotStarted {
            return Err(Error::Validation(
                "Only attempts that have not been started can be removed".to_string(),
            ));
        }
        if !self.store.attempts.delete_unstarted_attempt(attempt_id).await? {
            return Err(Error::Validation(
                "Attempt was started before it could be removed".to_string(),
            ));
        }
        tracing::info!(%attempt_id, revoked_by = %caller.user_id, "attempt revoked");
        Ok(())
    }

    /// Background sweep: closes every started attempt whose budget ran out.
    /// Returns how many were finalised by this call.
    pub async fn finalize_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.store.attempts.list_expired_unfinished(now).await?;
        let mut finalized = 0;
        for attempt in expired {
            let finished_at = attempt.time_budget_end().unwrap_or(now);
            match self.finalize(&attempt, finished_at).await {
                Ok(FinishOutcome::Finished(_)) => finalized += 1,
                Ok(FinishOutcome::AlreadyFinished(_)) => {}
                Err(e) => {
                    tracing::error!(attempt_id = %attempt.id, error = %e, "failed to finalise expired attempt")
                }
            }
        }
        if finalized > 0 {
            tracing::info!(finalized, "expired attempts finalised");
        }
        Ok(finalized)
    }
}
