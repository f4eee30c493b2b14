use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Who is giving feedback relative to the person being reviewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewerCategory {
    #[serde(rename = "SELF")]
    Self_,
    Manager,
    Peer,
    DirectReport,
    External,
}

impl ReviewerCategory {
    pub const ALL: [ReviewerCategory; 5] = [
        ReviewerCategory::Self_,
        ReviewerCategory::Manager,
        ReviewerCategory::Peer,
        ReviewerCategory::DirectReport,
        ReviewerCategory::External,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewerCategory::Self_ => "SELF",
            ReviewerCategory::Manager => "MANAGER",
            ReviewerCategory::Peer => "PEER",
            ReviewerCategory::DirectReport => "DIRECT_REPORT",
            ReviewerCategory::External => "EXTERNAL",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReviewerCategory::Self_ => "Self",
            ReviewerCategory::Manager => "Manager",
            ReviewerCategory::Peer => "Peers",
            ReviewerCategory::DirectReport => "Direct reports",
            ReviewerCategory::External => "External",
        }
    }

    /// Self and manager reviews are identifiable by nature, so a single
    /// response is always enough for them.
    pub fn effective_threshold(self, configured: AnonymityThreshold) -> AnonymityThreshold {
        match self {
            ReviewerCategory::Self_ | ReviewerCategory::Manager => AnonymityThreshold::ONE,
            _ => configured,
        }
    }
}

impl fmt::Display for ReviewerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown reviewer category: {0:?}")]
pub struct ParseCategoryError(pub String);

impl FromStr for ReviewerCategory {
    type Err = ParseCategoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SELF" => Ok(ReviewerCategory::Self_),
            "MANAGER" => Ok(ReviewerCategory::Manager),
            "PEER" => Ok(ReviewerCategory::Peer),
            "DIRECT_REPORT" => Ok(ReviewerCategory::DirectReport),
            "EXTERNAL" => Ok(ReviewerCategory::External),
            _ => Err(ParseCategoryError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("anonymity threshold must be at least 1, got {0}")]
pub struct ThresholdError(pub i64);

/// Minimum number of completed responses a category needs before it is disclosed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AnonymityThreshold(u32);

impl AnonymityThreshold {
    pub const ONE: AnonymityThreshold = AnonymityThreshold(1);

    pub fn new(value: i64) -> Result<Self, ThresholdError> {
        match u32::try_from(value) {
            Ok(v) if v >= 1 => Ok(AnonymityThreshold(v)),
            _ => Err(ThresholdError(value)),
        }
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for AnonymityThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingResponse {
    pub rating_value: Option<i32>,
    pub reviewer_category: ReviewerCategory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextResponse {
    pub text_value: Option<String>,
    pub reviewer_category: ReviewerCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRating {
    pub average: f64,
    pub count: usize,
    pub distribution: BTreeMap<i32, usize>,
}

/// Why a category's feedback was withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum HiddenReason {
    NoResponses,
    BelowThreshold { count: usize, required: usize },
}

impl HiddenReason {
    pub fn message(&self) -> String {
        match self {
            HiddenReason::NoResponses => "No responses received".to_string(),
            HiddenReason::BelowThreshold { count, required } => format!(
                "Not enough responses to preserve anonymity ({count} of {required} required)"
            ),
        }
    }
}

/// Visibility outcome of an aggregation. A hidden outcome never carries
/// any individual value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "visibility", content = "data", rename_all = "snake_case")]
pub enum Disclosure<T> {
    Visible(T),
    Hidden(HiddenReason),
}

impl<T> Disclosure<T> {
    pub fn is_visible(&self) -> bool {
        matches!(self, Disclosure::Visible(_))
    }

    pub fn visible(&self) -> Option<&T> {
        match self {
            Disclosure::Visible(value) => Some(value),
            Disclosure::Hidden(_) => None,
        }
    }

    pub fn hidden_reason(&self) -> Option<HiddenReason> {
        match self {
            Disclosure::Visible(_) => None,
            Disclosure::Hidden(reason) => Some(*reason),
        }
    }

    pub fn message(&self) -> Option<String> {
        self.hidden_reason().map(|reason| reason.message())
    }
}

pub type RatingAggregate = Disclosure<AggregatedRating>;
pub type TextAggregate = Disclosure<Vec<String>>;

/// Rating and free-text outcome for one reviewer category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryResult {
    pub category: ReviewerCategory,
    pub rating: Option<RatingAggregate>,
    pub text: Option<TextAggregate>,
}

impl CategoryResult {
    pub fn is_visible(&self) -> bool {
        self.rating.as_ref().is_some_and(Disclosure::is_visible)
            || self.text.as_ref().is_some_and(Disclosure::is_visible)
    }

    pub fn message(&self) -> Option<String> {
        if self.is_visible() {
            return None;
        }
        self.rating
            .as_ref()
            .and_then(Disclosure::message)
            .or_else(|| self.text.as_ref().and_then(Disclosure::message))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverallScore {
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Rating,
    Text,
}

impl QuestionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKind::Rating => "rating",
            QuestionKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown question kind: {0:?}")]
pub struct ParseQuestionKindError(pub String);

impl FromStr for QuestionKind {
    type Err = ParseQuestionKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rating" => Ok(QuestionKind::Rating),
            "text" => Ok(QuestionKind::Text),
            _ => Err(ParseQuestionKindError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cycle {
    pub id: Uuid,
    pub name: String,
    pub anonymity_threshold: AnonymityThreshold,
}

#[derive(Debug, Clone)]
pub struct Reviewee {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub id: Uuid,
    pub position: i32,
    pub prompt: String,
    pub kind: QuestionKind,
}

/// One completed answer to a question about a reviewee.
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub question_id: Uuid,
    pub reviewer_category: ReviewerCategory,
    pub rating_value: Option<i32>,
    pub text_value: Option<String>,
}
