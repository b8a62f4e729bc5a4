pub mod assignment_dto;
pub mod attempt_dto;
