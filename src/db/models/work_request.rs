//! Work request models and the status lifecycle.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};

use super::common::ParseEnumError;

/// Lifecycle of a work request: pending → assigned → in_progress → completed,
/// with cancellation possible before work starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkRequestStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

/// Who is asking for a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionActor {
    /// The client who posted the request
    Owner,
    /// The professional the request is assigned to
    Assignee,
    /// Administrative override
    Admin,
}

impl WorkRequestStatus {
    pub const ALL: [WorkRequestStatus; 5] = [
        WorkRequestStatus::Pending,
        WorkRequestStatus::Assigned,
        WorkRequestStatus::InProgress,
        WorkRequestStatus::Completed,
        WorkRequestStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkRequestStatus::Pending => "pending",
            WorkRequestStatus::Assigned => "assigned",
            WorkRequestStatus::InProgress => "in_progress",
            WorkRequestStatus::Completed => "completed",
            WorkRequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkRequestStatus::Completed | WorkRequestStatus::Cancelled)
    }

    /// Successors in the fixed lifecycle order
    pub fn successors(&self) -> &'static [WorkRequestStatus] {
        match self {
            WorkRequestStatus::Pending => &[WorkRequestStatus::Assigned, WorkRequestStatus::Cancelled],
            WorkRequestStatus::Assigned => {
                &[WorkRequestStatus::InProgress, WorkRequestStatus::Cancelled]
            }
            WorkRequestStatus::InProgress => &[WorkRequestStatus::Completed],
            WorkRequestStatus::Completed | WorkRequestStatus::Cancelled => &[],
        }
    }

    /// Check whether `actor` may move a request from `self` to `target`.
    ///
    /// Accepting (pending → assigned) goes through its own endpoint and is not
    /// available here to owners or assignees.
    pub fn can_transition(&self, target: WorkRequestStatus, actor: TransitionActor) -> bool {
        if *self == target {
            return false;
        }
        match actor {
            TransitionActor::Admin => true,
            TransitionActor::Owner => {
                target == WorkRequestStatus::Cancelled && self.successors().contains(&target)
            }
            TransitionActor::Assignee => matches!(
                (self, target),
                (WorkRequestStatus::Assigned, WorkRequestStatus::InProgress)
                    | (WorkRequestStatus::InProgress, WorkRequestStatus::Completed)
            ),
        }
    }
}

impl std::fmt::Display for WorkRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkRequestStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkRequestStatus::Pending),
            "assigned" => Ok(WorkRequestStatus::Assigned),
            "in_progress" => Ok(WorkRequestStatus::InProgress),
            "completed" => Ok(WorkRequestStatus::Completed),
            "cancelled" => Ok(WorkRequestStatus::Cancelled),
            _ => Err(ParseEnumError::new("status", s)),
        }
    }
}

/// Professional-side list tabs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkRequestTab {
    /// Open requests nobody has taken and the caller has not refused
    #[default]
    Available,
    /// Requests assigned to the caller that are not finished
    Accepted,
    /// Requests the caller has completed
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkRequest {
    pub id: String,
    pub client_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub desired_date: Option<String>,
    pub status: String,
    pub assigned_professional_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl WorkRequest {
    pub fn status_enum(&self) -> WorkRequestStatus {
        self.status.parse().unwrap_or(WorkRequestStatus::Pending)
    }

    pub fn is_assigned_to(&self, user_id: &str) -> bool {
        self.assigned_professional_id.as_deref() == Some(user_id)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    /// Desired start date (YYYY-MM-DD)
    pub desired_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkRequestQuery {
    #[serde(default)]
    pub tab: WorkRequestTab,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminWorkRequestQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefuseWorkRequest {
    pub reason: Option<String>,
}

pub async fn get_work_request<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: &str,
) -> Result<Option<WorkRequest>, sqlx::Error> {
    sqlx::query_as::<_, WorkRequest>("SELECT * FROM work_requests WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
}
