use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::record_id;

pub type Timestamp = DateTime<Utc>;

/// Implements `as_str`, `Display` and `FromStr` for a closed set of wire values
macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($wire => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        value: other.to_string(),
                        expected: vec![$($wire),+],
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Error)]
#[error("must be one of: {}", .expected.join(", "))]
pub struct UnknownVariant {
    pub value: String,
    pub expected: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Resolved,
}

wire_enum!(IssueStatus {
    Open => "open",
    InProgress => "in_progress",
    Resolved => "resolved",
});

impl IssueStatus {
    pub fn display_name(&self) -> &'static str {
        match self {
            IssueStatus::Open => "Open",
            IssueStatus::InProgress => "In Progress",
            IssueStatus::Resolved => "Resolved",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IssueStatus::Resolved)
    }

    /// Forward edges of the lifecycle graph. A non-terminal status may also be
    /// restated, which records another history entry.
    pub fn can_transition_to(&self, next: IssueStatus) -> bool {
        matches!(
            (self, next),
            (IssueStatus::Open, IssueStatus::Open)
                | (IssueStatus::InProgress, IssueStatus::InProgress)
                | (IssueStatus::Open, IssueStatus::InProgress)
                | (IssueStatus::Open, IssueStatus::Resolved)
                | (IssueStatus::InProgress, IssueStatus::Resolved)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Electrical,
    Water,
    Internet,
    Infrastructure,
}

wire_enum!(IssueCategory {
    Electrical => "electrical",
    Water => "water",
    Internet => "internet",
    Infrastructure => "infrastructure",
});

impl IssueCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            IssueCategory::Electrical => "Electrical",
            IssueCategory::Water => "Water",
            IssueCategory::Internet => "Internet",
            IssueCategory::Infrastructure => "Infrastructure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuePriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

wire_enum!(IssuePriority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

impl IssuePriority {
    pub fn display_name(&self) -> &'static str {
        match self {
            IssuePriority::Low => "Low",
            IssuePriority::Medium => "Medium",
            IssuePriority::High => "High",
            IssuePriority::Critical => "Critical",
        }
    }

    /// Urgency rank used when sorting by priority
    pub fn rank(&self) -> u8 {
        match self {
            IssuePriority::Low => 0,
            IssuePriority::Medium => 1,
            IssuePriority::High => 2,
            IssuePriority::Critical => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Student,
    Admin,
}

wire_enum!(Role {
    Student => "student",
    Admin => "admin",
});

/// Reference to an image held by the external image host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub url: String,
    /// Handle used to delete the image from the host
    pub public_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: IssueStatus,
    /// Id of the user responsible for the change
    pub changed_by: String,
    pub changed_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

/// Audit trail of an issue. Entries can only be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusHistory(Vec<StatusChange>);

impl StatusHistory {
    fn created(reporter: &str, at: Timestamp) -> StatusHistory {
        StatusHistory(vec![StatusChange {
            status: IssueStatus::Open,
            changed_by: reporter.to_string(),
            changed_at: at,
            remarks: Some("Issue created".into()),
        }])
    }

    fn append(&mut self, change: StatusChange) {
        self.0.push(change);
    }
}

#[cfg(test)]
impl StatusHistory {
    pub fn entries(&self) -> &[StatusChange] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&StatusChange> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&StatusChange> {
        self.0.last()
    }
}

/// Rejected lifecycle mutation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("This issue has already been resolved")]
    AlreadyResolved,
    #[error("Cannot move an issue from {} to {}", .from.display_name(), .to.display_name())]
    NotAllowed { from: IssueStatus, to: IssueStatus },
}

/// Validated fields of a new issue
#[derive(Debug, Clone)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub category: IssueCategory,
    pub priority: IssuePriority,
    pub location: Option<String>,
}

/// Validated partial update submitted by the reporter
#[derive(Debug, Clone, Default)]
pub struct IssueEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<IssueCategory>,
    pub priority: Option<IssuePriority>,
    pub location: Option<String>,
}

impl IssueEdit {
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = vec![];
        if self.title.is_some() {
            fields.push("title");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.category.is_some() {
            fields.push("category");
        }
        if self.priority.is_some() {
            fields.push("priority");
        }
        if self.location.is_some() {
            fields.push("location");
        }
        fields
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    #[serde(deserialize_with = "record_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: IssueCategory,
    pub priority: IssuePriority,
    pub status: IssueStatus,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub image: Option<ImageRef>,
    /// Id of the reporting user, never changes after creation
    pub reported_by: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
    pub status_history: StatusHistory,
    #[serde(default)]
    pub resolved_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Bumped on every persisted write, used to reject stale writes
    pub version: u64,
}

impl Issue {
    pub fn open(
        id: String,
        fields: NewIssue,
        reporter: &str,
        image: Option<ImageRef>,
        now: Timestamp,
    ) -> Issue {
        Issue {
            id,
            title: fields.title,
            description: fields.description,
            category: fields.category,
            priority: fields.priority,
            status: IssueStatus::Open,
            location: fields.location,
            image,
            reported_by: reporter.to_string(),
            assigned_to: None,
            remarks: None,
            status_history: StatusHistory::created(reporter, now),
            resolved_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_reported_by(&self, user_id: &str) -> bool {
        self.reported_by == user_id
    }

    /// Apply reporter edits. Returns the image that was replaced, if any.
    pub fn apply_edit(
        &mut self,
        edit: IssueEdit,
        image: Option<ImageRef>,
        now: Timestamp,
    ) -> Option<ImageRef> {
        if let Some(title) = edit.title {
            self.title = title;
        }
        if let Some(description) = edit.description {
            self.description = description;
        }
        if let Some(category) = edit.category {
            self.category = category;
        }
        if let Some(priority) = edit.priority {
            self.priority = priority;
        }
        if let Some(location) = edit.location {
            self.location = Some(location);
        }
        self.updated_at = now;

        match image {
            Some(image) => self.image.replace(image),
            None => None,
        }
    }

    /// Move the issue to `next`, recording the change. Returns the previous
    /// status.
    pub fn transition(
        &mut self,
        next: IssueStatus,
        by: &str,
        remarks: Option<String>,
        now: Timestamp,
    ) -> Result<IssueStatus, TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::AlreadyResolved);
        }
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::NotAllowed {
                from: self.status,
                to: next,
            });
        }

        let previous = self.status;
        self.status = next;
        if remarks.is_some() {
            self.remarks = remarks.clone();
        }
        self.status_history.append(StatusChange {
            status: next,
            changed_by: by.to_string(),
            changed_at: now,
            remarks,
        });
        if next == IssueStatus::Resolved && self.resolved_at.is_none() {
            self.resolved_at = Some(now);
        }
        self.updated_at = now;

        Ok(previous)
    }

    /// Hand the issue to `assignee`. An open issue is picked up for processing
    /// as part of the assignment; returns whether that happened.
    pub fn assign(
        &mut self,
        assignee: &str,
        by: &str,
        now: Timestamp,
    ) -> Result<bool, TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::AlreadyResolved);
        }

        self.assigned_to = Some(assignee.to_string());
        self.updated_at = now;

        if self.status == IssueStatus::Open {
            self.transition(
                IssueStatus::InProgress,
                by,
                Some("Issue assigned and in progress".into()),
                now,
            )?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Attach remarks without changing status
    pub fn annotate(&mut self, by: &str, remarks: String, now: Timestamp) {
        self.remarks = Some(remarks.clone());
        self.status_history.append(StatusChange {
            status: self.status,
            changed_by: by.to_string(),
            changed_at: now,
            remarks: Some(remarks),
        });
        self.updated_at = now;
    }
}

/// Stored account. Holds the password hash, so it is never sent to clients;
/// see [`UserView`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(deserialize_with = "record_id")]
    pub id: String,
    pub name: String,
    /// Always stored lowercased
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    pub is_active: bool,
    /// Push notification device token
    #[serde(default)]
    pub device_token: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn view(&self) -> UserView {
        UserView::from(self)
    }
}

/// Public representation of an account
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub student_id: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        UserView {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            student_id: user.student_id.clone(),
            department: user.department.clone(),
            phone: user.phone.clone(),
            avatar: user.avatar.clone(),
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Validated registration data
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub student_id: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
}

/// Validated self-service profile update
#[derive(Debug, Clone, Default)]
pub struct ProfileEdit {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub student_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueStats {
    pub total: u64,
    pub by_status: std::collections::BTreeMap<String, u64>,
    pub by_category: std::collections::BTreeMap<String, u64>,
    pub by_priority: std::collections::BTreeMap<String, u64>,
    pub resolved_this_month: u64,
    /// Mean time from report to resolution, in whole hours
    pub average_resolution_time: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total: u64,
    pub students: u64,
    pub admins: u64,
    pub active_users: u64,
    pub inactive_users: u64,
}
