pub mod exam;
pub mod exam_attempt;
pub mod question;
pub mod user;
