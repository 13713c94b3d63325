use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ExamKind {
    Assignment,
    Mcq,
}

impl ExamKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Assignment => "assignment",
            Self::Mcq => "mcq",
        }
    }

    /// Collection segment used by the REST backend.
    pub(crate) fn collection(self) -> &'static str {
        match self {
            Self::Assignment => "assignments",
            Self::Mcq => "mcqs",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "assignment" | "assignments" => Some(Self::Assignment),
            "mcq" | "mcqs" => Some(Self::Mcq),
            _ => None,
        }
    }
}

/// Attempt identity. Every persisted record of an attempt is namespaced by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct AttemptKey {
    pub(crate) kind: ExamKind,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Record {
    TimerStart,
    CompletedQuestions,
    McqAnswers,
}

impl Record {
    fn as_str(self) -> &'static str {
        match self {
            Self::TimerStart => "timer_start",
            Self::CompletedQuestions => "completed_questions",
            Self::McqAnswers => "mcq_answers",
        }
    }
}

impl AttemptKey {
    pub(crate) fn new(
        kind: ExamKind,
        exam_id: impl Into<String>,
        student_id: impl Into<String>,
    ) -> Self {
        Self { kind, exam_id: exam_id.into(), student_id: student_id.into() }
    }

    pub(crate) fn storage_key(&self, record: Record) -> String {
        format!(
            "examguard:{}:{}:{}:{}",
            self.kind.as_str(),
            self.exam_id,
            self.student_id,
            record.as_str()
        )
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.kind.as_str(), self.exam_id, self.student_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_are_namespaced_by_identity() {
        let first = AttemptKey::new(ExamKind::Assignment, "a-1", "s-1");
        let other_exam = AttemptKey::new(ExamKind::Assignment, "a-2", "s-1");
        let other_student = AttemptKey::new(ExamKind::Assignment, "a-1", "s-2");
        let other_kind = AttemptKey::new(ExamKind::Mcq, "a-1", "s-1");

        let key = first.storage_key(Record::TimerStart);
        assert_eq!(key, "examguard:assignment:a-1:s-1:timer_start");
        assert_ne!(key, other_exam.storage_key(Record::TimerStart));
        assert_ne!(key, other_student.storage_key(Record::TimerStart));
        assert_ne!(key, other_kind.storage_key(Record::TimerStart));
        assert_ne!(key, first.storage_key(Record::CompletedQuestions));
    }

    #[test]
    fn exam_kind_parse_accepts_collection_names() {
        assert_eq!(ExamKind::parse("Assignments"), Some(ExamKind::Assignment));
        assert_eq!(ExamKind::parse(" mcq "), Some(ExamKind::Mcq));
        assert_eq!(ExamKind::parse("survey"), None);
    }
}
