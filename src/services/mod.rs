pub mod assignment_service;
pub mod attempt_service;
pub mod grading_service;
pub mod selection_service;
