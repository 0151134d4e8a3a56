use serde::{Deserialize, Serialize};

/// A scored and reviewed student essay, as stored.
///
/// `id` and `created_at` are assigned by the store at insertion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Store-assigned, monotonically increasing key.
    pub id: u64,
    /// Student's full name.
    pub student_name: String,
    /// Class or group the student belongs to.
    pub student_class: String,
    /// The essay prompt the student answered.
    pub statement: String,
    /// Full essay text.
    pub essay_text: String,
    /// Score returned by the grading model.
    pub score: f64,
    /// Free-form review returned by the grading model.
    pub review: String,
    /// ISO-8601 creation time, stamped by the store.
    pub created_at: String,
}

/// An evaluation before insertion. Carries no `id` and no `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvaluation {
    /// Student's full name.
    pub student_name: String,
    /// Class or group the student belongs to.
    pub student_class: String,
    /// The essay prompt the student answered.
    pub statement: String,
    /// Full essay text.
    pub essay_text: String,
    /// Score returned by the grading model.
    pub score: f64,
    /// Free-form review returned by the grading model.
    pub review: String,
}

impl NewEvaluation {
    /// Rejects a score JSON cannot represent.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending score.
    pub fn validate(&self) -> Result<(), String> {
        if self.score.is_finite() {
            Ok(())
        } else {
            Err(format!("score must be a finite number, got {}", self.score))
        }
    }
}

/// A named credential for the grading model, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Caller-chosen identity. Writing the same id again replaces the record.
    pub id: String,
    /// Display name.
    pub name: String,
    /// The secret itself.
    pub key: String,
    /// ISO-8601 time of the last write, stamped by the store.
    pub created_at: String,
}

/// An API key before it is written. Carries no `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApiKey {
    /// Caller-chosen identity.
    pub id: String,
    /// Display name.
    pub name: String,
    /// The secret itself.
    pub key: String,
}
