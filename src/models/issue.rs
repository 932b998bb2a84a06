use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::UserSummary;
use crate::severity::Severity;

/// A citizen-submitted report of a civic problem.
///
/// `severity` is recomputed from `title` and `description` whenever the
/// issue is created or its text is edited. `upvotes` holds the ids of users
/// who upvoted, each at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    pub user: UserSummary,
    pub title: String,
    pub description: String,
    /// Public path of the uploaded photo, e.g. `/uploads/1718-ab12cd34.jpg`.
    pub image: Option<String>,
    pub location: String,
    pub severity: Severity,
    pub status: IssueStatus,
    pub upvotes: Vec<Uuid>,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where an issue is in the resolution workflow.
///
/// - `Open`: Reported, nobody is working on it yet
/// - `InProgress`: Acknowledged by an administrator
/// - `Resolved`: Fixed
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum IssueStatus {
    #[default]
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    Resolved,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "In Progress",
            Self::Resolved => "Resolved",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Open" => Some(Self::Open),
            "In Progress" => Some(Self::InProgress),
            "Resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: Uuid,
    pub user: UserSummary,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Input for reporting a new issue. Severity is not part of the input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateIssueInput {
    pub title: String,
    pub description: String,
    pub location: String,
    /// Public path of a photo stored by the upload handler. Never read from
    /// a request body.
    #[serde(default, skip_deserializing)]
    pub image: Option<String>,
}

/// Input for editing an issue's text. All fields are optional for partial updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateIssueInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusInput {
    pub status: IssueStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCommentInput {
    pub message: String,
}

/// Filters for listing issues. Results are always newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueFilter {
    pub severity: Option<Severity>,
    pub status: Option<IssueStatus>,
    /// Only issues reported by this user.
    pub user_id: Option<Uuid>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
