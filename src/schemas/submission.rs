use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitAssignmentRequest {
    #[validate(length(min = 1, message = "assignmentId must not be empty"))]
    pub(crate) assignment_id: String,
    #[validate(length(min = 1, message = "studentId must not be empty"))]
    pub(crate) student_id: String,
    pub(crate) solved_questions: Vec<String>,
    pub(crate) is_final_submission: bool,
}

#[derive(Debug, Clone, Serialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitMcqRequest {
    #[validate(length(min = 1, message = "mcqId must not be empty"))]
    pub(crate) mcq_id: String,
    #[validate(length(min = 1, message = "studentId must not be empty"))]
    pub(crate) student_id: String,
    #[validate(nested)]
    pub(crate) answers: Vec<McqAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct McqAnswer {
    #[validate(length(min = 1, message = "questionId must not be empty"))]
    pub(crate) question_id: String,
    #[validate(length(min = 1, message = "selectedOption must not be empty"))]
    pub(crate) selected_option: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SubmitAssignmentResponse {
    #[serde(default)]
    pub(crate) ok: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SubmitMcqResponse {
    pub(crate) submission: McqSubmission,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct McqSubmission {
    #[serde(default)]
    pub(crate) score: Option<f64>,
}

/// What the backend acknowledged for a final submission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmissionReceipt {
    pub(crate) score: Option<f64>,
}
