use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::services::assignment_service::{AssignmentConfig, AssignmentTarget};
use crate::services::selection_service::DifficultyConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AssignExamRequest {
    pub target: AssignmentTarget,
    #[validate(
        required(message = "name is required"),
        length(min = 1, max = 200, message = "name must be 1-200 characters")
    )]
    pub name: Option<String>,
    #[validate(required(message = "deadline is required"))]
    pub deadline: Option<DateTime<Utc>>,
    #[validate(range(min = 1, max = 1440, message = "duration must be 1-1440 minutes"))]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub show_correct_answers: bool,
    #[serde(default)]
    pub difficulty: DifficultyConfig,
    pub course_id: Option<Uuid>,
}

impl AssignExamRequest {
    /// Call after `validate()`; missing required fields still surface as validation errors.
    pub fn into_parts(
        self,
        default_duration_minutes: i32,
    ) -> crate::error::Result<(AssignmentTarget, AssignmentConfig)> {
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| crate::error::Error::Validation("name is required".to_string()))?;
        let deadline = self
            .deadline
            .ok_or_else(|| crate::error::Error::Validation("deadline is required".to_string()))?;

        Ok((
            self.target,
            AssignmentConfig {
                difficulty: self.difficulty,
                duration_minutes: self.duration_minutes.unwrap_or(default_duration_minutes),
                show_correct_answers: self.show_correct_answers,
                deadline,
                name,
                course_id: self.course_id,
            },
        ))
    }
}
