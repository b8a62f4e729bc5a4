use crate::database::Store;
use crate::error::{Error, Result};
use crate::models::exam_attempt::NewAttempt;
use crate::models::user::Identity;
use crate::services::selection_service::{select_questions, DifficultyConfig, QuestionPool};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Who an exam is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssignmentTarget {
    Department { department_id: Uuid },
    Class { class_id: Uuid },
    Course { course_id: Uuid },
    Students { student_ids: Vec<Uuid> },
}

impl AssignmentTarget {
    fn label(&self) -> &'static str {
        match self {
            AssignmentTarget::Department { .. } => "department",
            AssignmentTarget::Class { .. } => "class",
            AssignmentTarget::Course { .. } => "course",
            AssignmentTarget::Students { .. } => "students",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignmentConfig {
    pub difficulty: DifficultyConfig,
    pub duration_minutes: i32,
    pub show_correct_answers: bool,
    pub deadline: DateTime<Utc>,
    pub name: String,
    pub course_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedAssignment {
    pub student_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentSummary {
    pub exam_id: Uuid,
    pub created: usize,
    pub attempt_ids: Vec<Uuid>,
    pub failed: Vec<FailedAssignment>,
    /// The snapshot every attempt in this batch received.
    pub question_ids: Vec<Uuid>,
    pub stratified: bool,
}

/// Resolved students plus the class id stamped on their attempts.
struct Recipients {
    groups: Vec<(Option<Uuid>, Vec<Uuid>)>,
}

/// Creates one unstarted attempt per targeted student.
///
/// The question draw happens once per call and is shared by the whole batch.
/// Creation is not transactional across students: a failure for one student is
/// recorded in the summary and the fan-out carries on.
#[derive(Clone)]
pub struct AssignmentService {
    store: Store,
    rng: Arc<Mutex<StdRng>>,
}

impl AssignmentService {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    pub fn with_seed(store: Store, seed: u64) -> Self {
        Self {
            store,
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub async fn create_attempts(
        &self,
        caller: &Identity,
        exam_id: Uuid,
        target: AssignmentTarget,
        config: AssignmentConfig,
    ) -> Result<AssignmentSummary> {
        if !caller.is_staff() {
            return Err(Error::Forbidden(
                "Only teachers and admins can assign exams".to_string(),
            ));
        }
        validate_config(&config)?;

        self.store
            .questions
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Exam {} not found", exam_id)))?;

        let recipients = self.resolve_recipients(&target).await?;
        let (question_ids, stratified) = self.draw_snapshot(exam_id, &config.difficulty).await?;

        let mut summary = AssignmentSummary {
            exam_id,
            created: 0,
            attempt_ids: Vec::new(),
            failed: Vec::new(),
            question_ids: question_ids.clone(),
            stratified,
        };

        let course_id = match &target {
            AssignmentTarget::Course { course_id } => config.course_id.or(Some(*course_id)),
            _ => config.course_id,
        };

        for (class_id, students) in recipients.groups {
            for student_id in students {
                let new_attempt = NewAttempt {
                    exam_id,
                    student_id,
                    name: Some(config.name.clone()),
                    course_id,
                    class_id,
                    created_by: caller.user_id,
                    question_ids: question_ids.clone(),
                    stratified,
                    duration_minutes: config.duration_minutes,
                    show_correct_after: config.show_correct_answers,
                    deadline: config.deadline,
                };
                match self.store.attempts.create_attempt(new_attempt).await {
                    Ok(attempt) => {
                        summary.created += 1;
                        summary.attempt_ids.push(attempt.id);
                    }
                    Err(e) => {
                        tracing::warn!(%exam_id, %student_id, error = %e, "failed to create attempt");
                        summary.failed.push(FailedAssignment {
                            student_id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        tracing::info!(
            %exam_id,
            target = target.label(),
            created = summary.created,
            failed = summary.failed.len(),
            questions = summary.question_ids.len(),
            stratified,
            "exam assigned"
        );
        Ok(summary)
    }

    async fn resolve_recipients(&self, target: &AssignmentTarget) -> Result<Recipients> {
        let roster = &self.store.roster;
        match target {
            AssignmentTarget::Department { department_id } => {
                let classes = roster.department_classes(*department_id).await?;
                if classes.is_empty() {
                    return Err(Error::NotFound(format!(
                        "Department {} has no classes",
                        department_id
                    )));
                }
                let mut groups = Vec::with_capacity(classes.len());
                for class_id in classes {
                    groups.push((Some(class_id), roster.class_students(class_id).await?));
                }
                Ok(Recipients { groups })
            }
            AssignmentTarget::Class { class_id } => {
                let students = roster.class_students(*class_id).await?;
                Ok(Recipients {
                    groups: vec![(Some(*class_id), students)],
                })
            }
            AssignmentTarget::Course { course_id } => {
                let enrollments = roster.course_enrollments(*course_id).await?;
                let first = enrollments.first().ok_or_else(|| {
                    Error::Validation(format!("Course {} has no enrolled students", course_id))
                })?;
                // Known oddity kept as-is: every attempt in a course assignment carries the
                // first enrolled student's class, not each student's own class.
                let class_id = first.class_id.ok_or_else(|| {
                    Error::Validation("First enrolled student has no class".to_string())
                })?;
                let students = enrollments.iter().map(|e| e.student_id).collect();
                Ok(Recipients {
                    groups: vec![(Some(class_id), students)],
                })
            }
            AssignmentTarget::Students { student_ids } => {
                let first = student_ids.first().ok_or_else(|| {
                    Error::Validation("Student list must not be empty".to_string())
                })?;
                // Same oddity as course targeting: the first listed student's class is used for all.
                let class_id = roster
                    .student_class(*first)
                    .await?
                    .flatten()
                    .ok_or_else(|| {
                        Error::Validation("First listed student has no class".to_string())
                    })?;
                Ok(Recipients {
                    groups: vec![(Some(class_id), student_ids.clone())],
                })
            }
        }
    }

    /// Returns the snapshot and whether it came from a stratified draw. With no
    /// tier requested, or when every requested tier is empty in this exam, the
    /// snapshot is every question on the exam right now.
    async fn draw_snapshot(
        &self,
        exam_id: Uuid,
        difficulty: &DifficultyConfig,
    ) -> Result<(Vec<Uuid>, bool)> {
        let questions = self.store.questions.exam_questions(exam_id).await?;
        if questions.is_empty() {
            return Err(Error::Validation(format!("Exam {} has no questions", exam_id)));
        }

        if difficulty.is_empty() {
            return Ok((questions.iter().map(|q| q.id).collect(), false));
        }

        let pool = QuestionPool::from_questions(&questions);
        let selected = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| Error::Internal("question selector lock poisoned".to_string()))?;
            select_questions(&pool, difficulty, &mut *rng)
        };
        if selected.is_empty() {
            tracing::debug!(%exam_id, "requested tiers are empty, falling back to every exam question");
            return Ok((questions.iter().map(|q| q.id).collect(), false));
        }
        Ok((selected, true))
    }
}

fn validate_config(config: &AssignmentConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(Error::Validation("name is required".to_string()));
    }
    if config.duration_minutes <= 0 {
        return Err(Error::Validation("duration must be positive".to_string()));
    }
    Ok(())
}
