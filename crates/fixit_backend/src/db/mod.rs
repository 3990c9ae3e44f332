//! Persistence for issues and accounts.
//!
//! Services only see the [`IssueStore`] and [`UserStore`] traits. The
//! production backend is SurrealDB ([`surreal`]); [`memory`] keeps everything
//! in process and backs the tests and `--memory` runs.

pub mod memory;
pub mod surreal;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::{
    models::{Issue, IssueCategory, IssuePriority, IssueStatus, Role, Timestamp, User},
    pagination::{IssueSort, PageRequest, UserSort},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("stale write to {entity} {id}, expected version {expected}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
    },
    #[error("email already registered")]
    DuplicateEmail,
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter over the issue collection. `None` fields don't constrain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueQuery {
    pub category: Option<IssueCategory>,
    pub status: Option<IssueStatus>,
    pub priority: Option<IssuePriority>,
    pub reported_by: Option<String>,
    pub assigned_to: Option<String>,
    pub created_from: Option<Timestamp>,
    pub created_to: Option<Timestamp>,
    /// Case-insensitive substring over title, description and location
    pub text: Option<String>,
}

impl IssueQuery {
    pub fn matches(&self, issue: &Issue) -> bool {
        if self.category.map_or(false, |c| c != issue.category) {
            return false;
        }
        if self.status.map_or(false, |s| s != issue.status) {
            return false;
        }
        if self.priority.map_or(false, |p| p != issue.priority) {
            return false;
        }
        if let Some(reporter) = &self.reported_by {
            if &issue.reported_by != reporter {
                return false;
            }
        }
        if let Some(assignee) = &self.assigned_to {
            if issue.assigned_to.as_ref() != Some(assignee) {
                return false;
            }
        }
        if self.created_from.map_or(false, |from| issue.created_at < from) {
            return false;
        }
        if self.created_to.map_or(false, |to| issue.created_at > to) {
            return false;
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            let hit = issue.title.to_lowercase().contains(&needle)
                || issue.description.to_lowercase().contains(&needle)
                || issue
                    .location
                    .as_ref()
                    .map_or(false, |l| l.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserQuery {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    /// Case-insensitive substring over name, email and student id
    pub search: Option<String>,
}

impl UserQuery {
    pub fn matches(&self, user: &User) -> bool {
        if self.role.map_or(false, |r| r != user.role) {
            return false;
        }
        if self.is_active.map_or(false, |a| a != user.is_active) {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = user.name.to_lowercase().contains(&needle)
                || user.email.contains(&needle)
                || user
                    .student_id
                    .as_ref()
                    .map_or(false, |s| s.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn insert(&self, issue: &Issue) -> StoreResult<()>;

    async fn get(&self, id: &str) -> StoreResult<Option<Issue>>;

    /// Overwrite the stored issue, but only while its stored version is still
    /// `expected_version`.
    async fn replace(&self, issue: &Issue, expected_version: u64) -> StoreResult<()>;

    /// Returns whether a document was removed
    async fn remove(&self, id: &str) -> StoreResult<bool>;

    /// One page of matching issues plus the total match count
    async fn list(
        &self,
        query: &IssueQuery,
        page: &PageRequest<IssueSort>,
    ) -> StoreResult<(Vec<Issue>, u64)>;

    async fn count(&self, query: &IssueQuery) -> StoreResult<u64>;

    /// `(created_at, resolved_at)` of every resolved issue
    async fn resolution_times(&self) -> StoreResult<Vec<(Timestamp, Timestamp)>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with [`StoreError::DuplicateEmail`] when the email is taken
    async fn insert(&self, user: &User) -> StoreResult<()>;

    async fn get(&self, id: &str) -> StoreResult<Option<User>>;

    /// `email` must already be lowercased
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn update(&self, user: &User) -> StoreResult<()>;

    async fn remove(&self, id: &str) -> StoreResult<bool>;

    async fn list(
        &self,
        query: &UserQuery,
        page: &PageRequest<UserSort>,
    ) -> StoreResult<(Vec<User>, u64)>;

    async fn count(&self, query: &UserQuery) -> StoreResult<u64>;

    /// Device tokens of every active admin that registered one
    async fn admin_device_tokens(&self) -> StoreResult<Vec<String>>;
}

/// Deserialize a record id that may arrive either as a plain string or as a
/// SurrealDB record link (`issue:⟨…⟩`).
pub fn record_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Plain(String),
        Thing(::surrealdb::sql::Thing),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Plain(raw) => strip_table(&raw),
        RawId::Thing(thing) => thing.id.to_raw(),
    })
}

fn strip_table(raw: &str) -> String {
    let id = match raw.split_once(':') {
        Some((table, rest)) if !table.is_empty() && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => rest,
        _ => raw,
    };
    id.trim_start_matches(['⟨', '`'])
        .trim_end_matches(['⟩', '`'])
        .to_string()
}
