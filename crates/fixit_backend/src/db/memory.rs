//! Process-local store used by tests and `--memory` runs.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{IssueQuery, IssueStore, StoreError, StoreResult, UserQuery, UserStore};
use crate::{
    models::{Issue, IssueStatus, Timestamp, User},
    pagination::{IssueSort, PageRequest, UserSort},
};

#[derive(Default)]
struct Inner {
    issues: HashMap<String, Issue>,
    users: HashMap<String, User>,
}

/// Both collections behind one lock. Clones share the same data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> InMemoryStore {
        InMemoryStore::default()
    }
}

fn paginate<T: Clone, S>(mut rows: Vec<&T>, page: &PageRequest<S>) -> (Vec<T>, u64) {
    let total = rows.len() as u64;
    let offset = page.offset() as usize;
    let rows = if offset >= rows.len() {
        vec![]
    } else {
        rows.drain(offset..)
            .take(page.limit as usize)
            .cloned()
            .collect()
    };
    (rows, total)
}

#[async_trait]
impl IssueStore for InMemoryStore {
    async fn insert(&self, issue: &Issue) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.issues.contains_key(&issue.id) {
            return Err(anyhow::anyhow!("issue {} already exists", issue.id).into());
        }
        inner.issues.insert(issue.id.clone(), issue.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Issue>> {
        Ok(self.inner.read().await.issues.get(id).cloned())
    }

    async fn replace(&self, issue: &Issue, expected_version: u64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .issues
            .get_mut(&issue.id)
            .ok_or(StoreError::NotFound("Issue"))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "issue",
                id: issue.id.clone(),
                expected: expected_version,
            });
        }
        *stored = issue.clone();
        Ok(())
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        Ok(self.inner.write().await.issues.remove(id).is_some())
    }

    async fn list(
        &self,
        query: &IssueQuery,
        page: &PageRequest<IssueSort>,
    ) -> StoreResult<(Vec<Issue>, u64)> {
        let inner = self.inner.read().await;
        let mut rows: Vec<&Issue> = inner.issues.values().filter(|i| query.matches(i)).collect();
        rows.sort_by(|a, b| {
            page.order
                .apply(page.sort.compare(a, b))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(paginate(rows, page))
    }

    async fn count(&self, query: &IssueQuery) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner.issues.values().filter(|i| query.matches(i)).count() as u64)
    }

    async fn resolution_times(&self) -> StoreResult<Vec<(Timestamp, Timestamp)>> {
        let inner = self.inner.read().await;
        Ok(inner
            .issues
            .values()
            .filter(|i| i.status == IssueStatus::Resolved)
            .filter_map(|i| i.resolved_at.map(|resolved| (i.created_at, resolved)))
            .collect())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn insert(&self, user: &User) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn update(&self, user: &User) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        match inner.users.get_mut(&user.id) {
            Some(stored) => {
                *stored = user.clone();
                Ok(())
            },
            None => Err(StoreError::NotFound("User")),
        }
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        Ok(self.inner.write().await.users.remove(id).is_some())
    }

    async fn list(
        &self,
        query: &UserQuery,
        page: &PageRequest<UserSort>,
    ) -> StoreResult<(Vec<User>, u64)> {
        let inner = self.inner.read().await;
        let mut rows: Vec<&User> = inner.users.values().filter(|u| query.matches(u)).collect();
        rows.sort_by(|a, b| {
            page.order
                .apply(page.sort.compare(a, b))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(paginate(rows, page))
    }

    async fn count(&self, query: &UserQuery) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().filter(|u| query.matches(u)).count() as u64)
    }

    async fn admin_device_tokens(&self) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .filter(|u| u.is_admin() && u.is_active)
            .filter_map(|u| u.device_token.clone())
            .collect())
    }
}
