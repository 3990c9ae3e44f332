use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use uuid::Uuid;

use super::{require_admin, Deps};
use crate::{
    auth::AuthUser,
    config::PaginationConfig,
    db::{IssueQuery, IssueStore, UserStore},
    error::{ApiError, ApiResult, FieldError},
    images::{ImageStore, ImageUpload, ISSUE_FOLDER},
    models::{
        ImageRef, Issue, IssueCategory, IssuePriority, IssueStats, IssueStatus, Timestamp, User,
    },
    notify::Notifier,
    pagination::{IssueSort, Page, PageQuery, PageRequest, SortOrder},
    validation::{query_variant, IssueForm},
};

const NOT_OWNER: &str = "You can only modify your own issues";

/// Query string of the issue list endpoints
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueFilters {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
    pub reported_by: Option<String>,
    /// `YYYY-MM-DD` or RFC 3339
    pub start_date: Option<String>,
    /// `YYYY-MM-DD` (whole day included) or RFC 3339
    pub end_date: Option<String>,
    /// Free text for the search endpoint
    pub q: Option<String>,
}

impl IssueFilters {
    fn page_query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            limit: self.limit,
            sort_by: self.sort_by.clone(),
            sort_order: self.sort_order,
        }
    }

    fn to_query(&self) -> ApiResult<IssueQuery> {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        Ok(IssueQuery {
            category: query_variant::<IssueCategory>("category", "Category", self.category.clone())?,
            status: query_variant::<IssueStatus>("status", "Status", self.status.clone())?,
            priority: query_variant::<IssuePriority>("priority", "Priority", self.priority.clone())?,
            reported_by: non_empty(&self.reported_by),
            assigned_to: non_empty(&self.assigned_to),
            created_from: parse_date("startDate", self.start_date.as_deref(), false)?,
            created_to: parse_date("endDate", self.end_date.as_deref(), true)?,
            text: None,
        })
    }
}

fn parse_date(field: &str, value: Option<&str>, end_of_day: bool) -> ApiResult<Option<Timestamp>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        ApiError::validation(vec![FieldError::new(
            field,
            "Date must be YYYY-MM-DD or an RFC 3339 timestamp",
        )])
    })?;
    let time = if end_of_day {
        day.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        day.and_hms_opt(0, 0, 0)
    };
    Ok(time.map(|t| Utc.from_utc_datetime(&t)))
}

#[derive(Clone)]
pub struct IssueService {
    issues: Arc<dyn IssueStore>,
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
    images: Arc<dyn ImageStore>,
    pagination: PaginationConfig,
}

impl IssueService {
    pub fn new(deps: &Deps) -> IssueService {
        IssueService {
            issues: deps.issues.clone(),
            users: deps.users.clone(),
            notifier: deps.notifier.clone(),
            images: deps.images.clone(),
            pagination: deps.pagination,
        }
    }

    async fn load(&self, id: &str) -> ApiResult<Issue> {
        self.issues
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Issue not found".into()))
    }

    /// Persist a mutated issue, failing if someone else wrote it since it was
    /// loaded
    async fn save(&self, issue: &mut Issue) -> ApiResult<()> {
        let expected = issue.version;
        issue.version += 1;
        if let Err(err) = self.issues.replace(issue, expected).await {
            issue.version = expected;
            return Err(err.into());
        }
        Ok(())
    }

    async fn upload(&self, image: Option<ImageUpload>) -> ApiResult<Option<ImageRef>> {
        match image {
            Some(image) => Ok(Some(self.images.upload(image, ISSUE_FOLDER).await?)),
            None => Ok(None),
        }
    }

    fn discard(&self, image: Option<ImageRef>) {
        if let Some(image) = image {
            self.images.schedule_delete(image.public_id);
        }
    }

    pub async fn create(
        &self,
        principal: &AuthUser,
        form: IssueForm,
        image: Option<ImageUpload>,
    ) -> ApiResult<Issue> {
        let fields = form.into_new_issue()?;
        let image = self.upload(image).await?;

        let issue = Issue::open(
            Uuid::new_v4().to_string(),
            fields,
            principal.id(),
            image,
            Utc::now(),
        );
        if let Err(err) = self.issues.insert(&issue).await {
            self.discard(issue.image);
            return Err(err.into());
        }
        info!(
            "Issue {} created by {} ({}, {})",
            issue.id, principal.id(), issue.category, issue.priority
        );

        match self.users.admin_device_tokens().await {
            Ok(tokens) => self.notifier.new_issue(tokens, &issue),
            Err(err) => warn!("Could not look up admin devices for issue {}: {err}", issue.id),
        }
        self.notifier.issue_received(&principal.user, &issue);

        Ok(issue)
    }

    pub async fn get(&self, principal: &AuthUser, id: &str) -> ApiResult<Issue> {
        let issue = self.load(id).await?;
        if !principal.is_admin() && !issue.is_reported_by(principal.id()) {
            return Err(ApiError::Forbidden(
                "You can only view your own issues".into(),
            ));
        }
        Ok(issue)
    }

    async fn page(
        &self,
        query: &IssueQuery,
        request: &PageRequest<IssueSort>,
    ) -> ApiResult<Page<Issue>> {
        let (items, total) = self.issues.list(query, request).await?;
        debug!(
            "issue page {} of {total} ({} items)",
            request.page,
            items.len()
        );
        Ok(Page::new(items, total, request))
    }

    /// Students only ever see their own issues, whatever they filter on
    fn scope(principal: &AuthUser, query: &mut IssueQuery) {
        if !principal.is_admin() {
            query.reported_by = Some(principal.id().to_string());
        }
    }

    pub async fn list(&self, principal: &AuthUser, filters: &IssueFilters) -> ApiResult<Page<Issue>> {
        let request = filters
            .page_query()
            .resolve::<IssueSort>(&self.pagination, IssueSort::NAMES)?;
        let mut query = filters.to_query()?;
        Self::scope(principal, &mut query);
        self.page(&query, &request).await
    }

    /// Issues reported by the caller, for any role
    pub async fn mine(&self, principal: &AuthUser, filters: &IssueFilters) -> ApiResult<Page<Issue>> {
        let request = filters
            .page_query()
            .resolve::<IssueSort>(&self.pagination, IssueSort::NAMES)?;
        let mut query = filters.to_query()?;
        query.reported_by = Some(principal.id().to_string());
        self.page(&query, &request).await
    }

    pub async fn search(&self, principal: &AuthUser, filters: &IssueFilters) -> ApiResult<Page<Issue>> {
        let request = filters
            .page_query()
            .resolve::<IssueSort>(&self.pagination, IssueSort::NAMES)?;
        let Some(text) = filters.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) else {
            return Ok(Page::empty(&request));
        };

        let mut query = IssueQuery {
            text: Some(text.to_string()),
            ..Default::default()
        };
        Self::scope(principal, &mut query);
        self.page(&query, &request).await
    }

    pub async fn update(
        &self,
        principal: &AuthUser,
        id: &str,
        form: IssueForm,
        image: Option<ImageUpload>,
    ) -> ApiResult<Issue> {
        let mut issue = self.load(id).await?;
        if !issue.is_reported_by(principal.id()) {
            return Err(ApiError::Forbidden(NOT_OWNER.into()));
        }
        if issue.status != IssueStatus::Open {
            return Err(ApiError::InvalidState(
                "Cannot update issue once it has been picked up for processing".into(),
            ));
        }

        let edit = form.into_edit()?;
        let fields = edit.changed_fields();
        let image = self.upload(image).await?;
        let uploaded = image.as_ref().map(|i| i.public_id.clone());

        let replaced = issue.apply_edit(edit, image, Utc::now());
        if let Err(err) = self.save(&mut issue).await {
            if let Some(public_id) = uploaded {
                self.images.schedule_delete(public_id);
            }
            return Err(err);
        }
        self.discard(replaced);

        info!("Issue {id} updated by reporter ({})", fields.join(", "));
        Ok(issue)
    }

    pub async fn delete(&self, principal: &AuthUser, id: &str) -> ApiResult<()> {
        let issue = self.load(id).await?;
        if !principal.is_admin() {
            if !issue.is_reported_by(principal.id()) {
                return Err(ApiError::Forbidden(NOT_OWNER.into()));
            }
            if issue.status != IssueStatus::Open {
                return Err(ApiError::InvalidState(
                    "Cannot delete issue once it has been picked up for processing".into(),
                ));
            }
        }

        if !self.issues.remove(id).await? {
            return Err(ApiError::NotFound("Issue not found".into()));
        }
        self.discard(issue.image);
        info!("Issue {id} deleted by {}", principal.id());
        Ok(())
    }

    pub async fn update_status(
        &self,
        principal: &AuthUser,
        id: &str,
        status: IssueStatus,
        remarks: Option<String>,
    ) -> ApiResult<Issue> {
        require_admin(principal)?;
        let mut issue = self.load(id).await?;

        let previous = issue.transition(status, principal.id(), remarks, Utc::now())?;
        self.save(&mut issue).await?;
        info!("Issue {id} moved {previous} -> {status} by {}", principal.id());

        self.notify_reporter(&issue, previous).await;
        Ok(issue)
    }

    async fn notify_reporter(&self, issue: &Issue, previous: IssueStatus) {
        match self.users.get(&issue.reported_by).await {
            Ok(Some(reporter)) => self
                .notifier
                .status_changed(&reporter, issue, previous, issue.status),
            Ok(None) => warn!("Reporter of issue {} no longer exists", issue.id),
            Err(err) => warn!("Could not load reporter of issue {}: {err}", issue.id),
        }
    }

    pub async fn resolve(
        &self,
        principal: &AuthUser,
        id: &str,
        remarks: Option<String>,
    ) -> ApiResult<Issue> {
        let remarks = remarks.unwrap_or_else(|| "Issue has been resolved".into());
        self.update_status(principal, id, IssueStatus::Resolved, Some(remarks))
            .await
    }

    /// Assign to `target` (an admin id), or to the caller when `None`
    pub async fn assign(
        &self,
        principal: &AuthUser,
        id: &str,
        target: Option<&str>,
    ) -> ApiResult<Issue> {
        require_admin(principal)?;

        let assignee: User = match target {
            None => principal.user.clone(),
            Some(target) if target == principal.id() => principal.user.clone(),
            Some(target) => self
                .users
                .get(target)
                .await?
                .ok_or_else(|| ApiError::NotFound("User not found".into()))?,
        };
        if !assignee.is_admin() {
            return Err(ApiError::bad_request("Issues can only be assigned to admins"));
        }

        let mut issue = self.load(id).await?;
        let previous = issue.status;
        let advanced = issue.assign(&assignee.id, principal.id(), Utc::now())?;
        self.save(&mut issue).await?;
        info!("Issue {id} assigned to {} by {}", assignee.id, principal.id());

        self.notifier.assigned(&assignee, &issue);
        if advanced {
            self.notify_reporter(&issue, previous).await;
        }
        Ok(issue)
    }

    pub async fn add_remarks(&self, principal: &AuthUser, id: &str, remarks: String) -> ApiResult<Issue> {
        require_admin(principal)?;
        let mut issue = self.load(id).await?;
        issue.annotate(principal.id(), remarks, Utc::now());
        self.save(&mut issue).await?;
        info!("Remarks added to issue {id} by {}", principal.id());
        Ok(issue)
    }

    pub async fn stats(&self, principal: &AuthUser) -> ApiResult<IssueStats> {
        require_admin(principal)?;

        let total = self.issues.count(&IssueQuery::default()).await?;

        let mut by_status = BTreeMap::new();
        for status in IssueStatus::ALL {
            let query = IssueQuery {
                status: Some(*status),
                ..Default::default()
            };
            by_status.insert(status.to_string(), self.issues.count(&query).await?);
        }
        let mut by_category = BTreeMap::new();
        for category in IssueCategory::ALL {
            let query = IssueQuery {
                category: Some(*category),
                ..Default::default()
            };
            by_category.insert(category.to_string(), self.issues.count(&query).await?);
        }
        let mut by_priority = BTreeMap::new();
        for priority in IssuePriority::ALL {
            let query = IssueQuery {
                priority: Some(*priority),
                ..Default::default()
            };
            by_priority.insert(priority.to_string(), self.issues.count(&query).await?);
        }

        let resolved = self.issues.resolution_times().await?;
        let (resolved_this_month, average_resolution_time) = resolution_summary(&resolved, Utc::now());

        Ok(IssueStats {
            total,
            by_status,
            by_category,
            by_priority,
            resolved_this_month,
            average_resolution_time,
        })
    }
}

/// Issues resolved since the start of `now`'s month, and the mean time to
/// resolution in whole hours (rounded)
fn resolution_summary(resolved: &[(Timestamp, Timestamp)], now: Timestamp) -> (u64, u64) {
    let month_start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    let this_month = resolved
        .iter()
        .filter(|(_, resolved_at)| *resolved_at >= month_start)
        .count() as u64;

    if resolved.is_empty() {
        return (this_month, 0);
    }
    let total_ms: i64 = resolved
        .iter()
        .map(|(created, resolved_at)| (*resolved_at - *created).num_milliseconds().max(0))
        .sum();
    let mean_hours = total_ms as f64 / resolved.len() as f64 / 3_600_000.0;
    (this_month, mean_hours.round() as u64)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        models::Role,
        testing::{self, Fixture, Sent},
    };

    fn report(title: &str, category: &str) -> IssueForm {
        IssueForm {
            title: Some(title.into()),
            description: Some("Reported through the campus app".into()),
            category: Some(category.into()),
            priority: None,
            location: Some("Hall 3".into()),
        }
    }

    #[tokio::test]
    async fn create_opens_issue_and_notifies() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        fx.admin_with_device("root@campus.edu", "admin-device").await;

        let issue = fx
            .services
            .issues
            .create(&ann, report("Broken light in hall 3", "electrical"), None)
            .await
            .unwrap();

        assert_eq!(issue.status, IssueStatus::Open);
        assert_eq!(issue.reported_by, ann.id());
        assert_eq!(issue.status_history.len(), 1);
        assert_eq!(issue.status_history.first().unwrap().status, IssueStatus::Open);
        assert_eq!(issue.version, 0);

        let sent = fx.notifier.sent();
        assert!(sent.contains(&Sent::NewIssue {
            tokens: vec!["admin-device".into()],
            issue: issue.id.clone(),
        }));
        assert!(sent.contains(&Sent::IssueReceived {
            to: ann.id().into(),
            issue: issue.id.clone(),
        }));
        assert!(!sent.iter().any(|s| matches!(s, Sent::Assigned { .. })));
    }

    #[tokio::test]
    async fn create_with_image_keeps_reference() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;

        let issue = fx
            .services
            .issues
            .create(
                &ann,
                report("Cracked window in lab", "infrastructure"),
                Some(testing::jpeg()),
            )
            .await
            .unwrap();

        let image = issue.image.unwrap();
        assert_eq!(image.public_id, "campus-fixit/issues/1");
        assert_eq!(fx.images.uploaded(), 1);
    }

    #[tokio::test]
    async fn invalid_payload_uploads_nothing() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;

        let err = fx
            .services
            .issues
            .create(&ann, report("Bad", "electrical"), Some(testing::jpeg()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { .. }));
        assert_eq!(fx.images.uploaded(), 0);
    }

    #[tokio::test]
    async fn status_walk_to_resolved() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        let admin = fx.admin("root@campus.edu").await;
        let issues = &fx.services.issues;

        let issue = issues
            .create(&ann, report("Broken light in hall 3", "electrical"), None)
            .await
            .unwrap();

        let issue = issues
            .update_status(&admin, &issue.id, IssueStatus::InProgress, Some("checking wiring".into()))
            .await
            .unwrap();
        assert_eq!(issue.remarks.as_deref(), Some("checking wiring"));
        assert!(issue.resolved_at.is_none());

        let issue = issues
            .update_status(&admin, &issue.id, IssueStatus::Resolved, Some("fixed".into()))
            .await
            .unwrap();
        assert_eq!(issue.status_history.len(), 3);
        let resolved_at = issue.resolved_at.unwrap();
        assert_eq!(issue.version, 2);

        let err = issues
            .update_status(&admin, &issue.id, IssueStatus::InProgress, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));
        assert!(matches!(
            issues.resolve(&admin, &issue.id, None).await,
            Err(ApiError::InvalidState(_))
        ));
        assert!(matches!(
            issues.assign(&admin, &issue.id, None).await,
            Err(ApiError::InvalidState(_))
        ));

        let stored = issues.get(&admin, &issue.id).await.unwrap();
        assert_eq!(stored.resolved_at, Some(resolved_at));
        assert_eq!(stored.status_history.len(), 3);
        assert_eq!(stored.status_history.first().unwrap().status, IssueStatus::Open);

        let changes: Vec<_> = fx
            .notifier
            .sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::StatusChanged { to, previous, current, .. } => Some((to, previous, current)),
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            [
                (ann.id().to_string(), IssueStatus::Open, IssueStatus::InProgress),
                (ann.id().to_string(), IssueStatus::InProgress, IssueStatus::Resolved),
            ]
        );
    }

    #[tokio::test]
    async fn restating_status_records_and_notifies() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        let admin = fx.admin("root@campus.edu").await;
        let issues = &fx.services.issues;

        let issue = issues
            .create(&ann, report("Broken light in hall 3", "electrical"), None)
            .await
            .unwrap();
        let issue = issues
            .update_status(&admin, &issue.id, IssueStatus::Open, Some("triaged".into()))
            .await
            .unwrap();
        assert_eq!(issue.status, IssueStatus::Open);

        issues
            .update_status(&admin, &issue.id, IssueStatus::InProgress, None)
            .await
            .unwrap();
        let issue = issues
            .update_status(&admin, &issue.id, IssueStatus::InProgress, Some("parts ordered".into()))
            .await
            .unwrap();
        assert_eq!(issue.status_history.len(), 4);
        assert_eq!(issue.remarks.as_deref(), Some("parts ordered"));

        assert!(matches!(
            issues.update_status(&admin, &issue.id, IssueStatus::Open, None).await,
            Err(ApiError::InvalidState(_))
        ));

        let restated = fx
            .notifier
            .sent()
            .into_iter()
            .filter(|s| {
                matches!(
                    s,
                    Sent::StatusChanged { previous, current, .. } if previous == current
                )
            })
            .count();
        assert_eq!(restated, 2);
    }

    #[tokio::test]
    async fn status_changes_are_admin_only() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        let issue = fx
            .services
            .issues
            .create(&ann, report("Broken light in hall 3", "electrical"), None)
            .await
            .unwrap();

        let issues = &fx.services.issues;
        assert!(matches!(
            issues.update_status(&ann, &issue.id, IssueStatus::Resolved, None).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            issues.assign(&ann, &issue.id, None).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            issues.add_remarks(&ann, &issue.id, "mine".into()).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(issues.stats(&ann).await, Err(ApiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn reporter_rules_for_edit_and_delete() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        let bob = fx.student("bob@campus.edu").await;
        let admin = fx.admin("root@campus.edu").await;
        let issues = &fx.services.issues;

        let issue = issues
            .create(&ann, report("Broken light in hall 3", "electrical"), None)
            .await
            .unwrap();

        // someone else's issue, in every state
        for status in [IssueStatus::Open, IssueStatus::InProgress, IssueStatus::Resolved] {
            if status != IssueStatus::Open {
                issues
                    .update_status(&admin, &issue.id, status, None)
                    .await
                    .unwrap();
            }
            assert!(matches!(
                issues.update(&bob, &issue.id, IssueForm::default(), None).await,
                Err(ApiError::Forbidden(_))
            ));
            assert!(matches!(
                issues.delete(&bob, &issue.id).await,
                Err(ApiError::Forbidden(_))
            ));
        }

        // own issue once it is picked up
        let issue = issues
            .create(&ann, report("Leaking tap in lab 2", "water"), None)
            .await
            .unwrap();
        issues
            .update_status(&admin, &issue.id, IssueStatus::InProgress, None)
            .await
            .unwrap();
        assert!(matches!(
            issues.update(&ann, &issue.id, IssueForm::default(), None).await,
            Err(ApiError::InvalidState(_))
        ));
        assert!(matches!(
            issues.delete(&ann, &issue.id).await,
            Err(ApiError::InvalidState(_))
        ));

        issues.delete(&admin, &issue.id).await.unwrap();
        assert!(matches!(
            issues.get(&admin, &issue.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn edit_replaces_image_and_cleans_up_old_one() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        let issues = &fx.services.issues;

        let issue = issues
            .create(
                &ann,
                report("Broken light in hall 3", "electrical"),
                Some(testing::jpeg()),
            )
            .await
            .unwrap();

        let edited = issues
            .update(
                &ann,
                &issue.id,
                IssueForm {
                    priority: Some("high".into()),
                    ..Default::default()
                },
                Some(testing::jpeg()),
            )
            .await
            .unwrap();

        assert_eq!(edited.priority, IssuePriority::High);
        assert_eq!(edited.title, "Broken light in hall 3");
        assert_eq!(edited.image.unwrap().public_id, "campus-fixit/issues/2");
        assert_eq!(fx.images.deleted(), ["campus-fixit/issues/1"]);
        assert_eq!(edited.version, 1);
    }

    #[tokio::test]
    async fn delete_open_issue_by_reporter_removes_image() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        let issues = &fx.services.issues;

        let issue = issues
            .create(&ann, report("Broken light in hall 3", "electrical"), Some(testing::jpeg()))
            .await
            .unwrap();
        issues.delete(&ann, &issue.id).await.unwrap();

        assert_eq!(fx.images.deleted(), ["campus-fixit/issues/1"]);
        assert!(matches!(
            issues.delete(&ann, &issue.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn assignment_rules() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        let admin = fx.admin("root@campus.edu").await;
        let other_admin = fx.admin("ops@campus.edu").await;
        let issues = &fx.services.issues;

        let issue = issues
            .create(&ann, report("Wifi down in dorm B", "internet"), None)
            .await
            .unwrap();

        assert!(matches!(
            issues.assign(&admin, &issue.id, Some("nobody")).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            issues.assign(&admin, &issue.id, Some(ann.id())).await,
            Err(ApiError::BadRequest { .. })
        ));

        let issue = issues.assign(&admin, &issue.id, None).await.unwrap();
        assert_eq!(issue.status, IssueStatus::InProgress);
        assert_eq!(issue.assigned_to.as_deref(), Some(admin.id()));
        assert_eq!(issue.status_history.len(), 2);
        let last = issue.status_history.last().unwrap();
        assert_eq!(last.changed_by, admin.id());
        assert_eq!(last.remarks.as_deref(), Some("Issue assigned and in progress"));

        let issue = issues
            .assign(&admin, &issue.id, Some(other_admin.id()))
            .await
            .unwrap();
        assert_eq!(issue.assigned_to.as_deref(), Some(other_admin.id()));
        assert_eq!(issue.status_history.len(), 2);

        let assigned: Vec<_> = fx
            .notifier
            .sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Assigned { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(assigned, [admin.id().to_string(), other_admin.id().to_string()]);
    }

    #[tokio::test]
    async fn remarks_keep_status_even_when_resolved() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        let admin = fx.admin("root@campus.edu").await;
        let issues = &fx.services.issues;

        let issue = issues
            .create(&ann, report("Broken light in hall 3", "electrical"), None)
            .await
            .unwrap();
        issues.resolve(&admin, &issue.id, None).await.unwrap();

        let issue = issues
            .add_remarks(&admin, &issue.id, "bulb type noted for stock".into())
            .await
            .unwrap();
        assert_eq!(issue.status, IssueStatus::Resolved);
        assert_eq!(issue.status_history.len(), 3);
        assert_eq!(
            issue.status_history.entries()[1].remarks.as_deref(),
            Some("Issue has been resolved")
        );
        assert_eq!(issue.remarks.as_deref(), Some("bulb type noted for stock"));
    }

    #[tokio::test]
    async fn students_only_list_their_own_issues() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        let bob = fx.student("bob@campus.edu").await;
        let admin = fx.admin("root@campus.edu").await;
        let issues = &fx.services.issues;

        for (who, title, category) in [
            (&ann, "Broken light in hall 3", "electrical"),
            (&ann, "Wifi down in dorm B", "internet"),
            (&bob, "Broken light in hall 4", "electrical"),
            (&bob, "Leaking tap in lab 2", "water"),
        ] {
            issues.create(who, report(title, category), None).await.unwrap();
        }

        let filter_sets = [
            IssueFilters::default(),
            IssueFilters {
                category: Some("electrical".into()),
                ..Default::default()
            },
            IssueFilters {
                reported_by: Some(bob.id().into()),
                ..Default::default()
            },
            IssueFilters {
                status: Some("open".into()),
                sort_by: Some("title".into()),
                ..Default::default()
            },
        ];
        for filters in &filter_sets {
            let page = issues.list(&ann, filters).await.unwrap();
            assert!(page.items.iter().all(|i| i.reported_by == ann.id()), "{filters:?}");
            let page = issues.mine(&ann, filters).await.unwrap();
            assert!(page.items.iter().all(|i| i.reported_by == ann.id()), "{filters:?}");
        }

        let found = issues
            .search(
                &ann,
                &IssueFilters {
                    q: Some("broken LIGHT".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(found.items.len(), 1);
        assert_eq!(found.items[0].reported_by, ann.id());

        let all = issues.list(&admin, &IssueFilters::default()).await.unwrap();
        assert_eq!(all.pagination.total_items, 4);
        let electrical = issues
            .list(
                &admin,
                &IssueFilters {
                    category: Some("electrical".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(electrical.items.len(), 2);
    }

    #[tokio::test]
    async fn foreign_issue_is_forbidden_to_students() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        let bob = fx.student("bob@campus.edu").await;
        let admin = fx.admin("root@campus.edu").await;

        let issue = fx
            .services
            .issues
            .create(&ann, report("Broken light in hall 3", "electrical"), None)
            .await
            .unwrap();

        assert!(matches!(
            fx.services.issues.get(&bob, &issue.id).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(fx.services.issues.get(&ann, &issue.id).await.is_ok());
        assert!(fx.services.issues.get(&admin, &issue.id).await.is_ok());
        assert!(matches!(
            fx.services.issues.get(&admin, "missing").await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_search_returns_empty_page() {
        let fx = Fixture::new().await;
        let admin = fx.admin("root@campus.edu").await;

        let page = fx
            .services
            .issues
            .search(
                &admin,
                &IssueFilters {
                    q: Some("   ".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.pagination.total_items, 0);
    }

    #[tokio::test]
    async fn bad_filters_are_validation_errors() {
        let fx = Fixture::new().await;
        let admin = fx.admin("root@campus.edu").await;
        let issues = &fx.services.issues;

        for filters in [
            IssueFilters {
                status: Some("closed".into()),
                ..Default::default()
            },
            IssueFilters {
                sort_by: Some("passwordHash".into()),
                ..Default::default()
            },
            IssueFilters {
                start_date: Some("last tuesday".into()),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                issues.list(&admin, &filters).await,
                Err(ApiError::BadRequest { .. })
            ));
        }
    }

    #[tokio::test]
    async fn stale_write_is_a_conflict() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        let admin = fx.admin("root@campus.edu").await;

        let issue = fx
            .services
            .issues
            .create(&ann, report("Broken light in hall 3", "electrical"), None)
            .await
            .unwrap();

        // a concurrent writer bumps the stored version behind our back
        let mut concurrent = issue.clone();
        concurrent.version = 1;
        fx.store.replace(&concurrent, 0).await.unwrap();

        let mut stale = issue.clone();
        let err = fx.services.issues.save(&mut stale).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(stale.version, 0);

        // the service reloads, so a fresh call still succeeds
        fx.services
            .issues
            .update_status(&admin, &issue.id, IssueStatus::InProgress, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failing_notifier_does_not_fail_operations() {
        let fx = Fixture::with_failing_notifier().await;
        let ann = fx.student("ann@campus.edu").await;
        let admin = fx.admin("root@campus.edu").await;

        let issue = fx
            .services
            .issues
            .create(&ann, report("Broken light in hall 3", "electrical"), None)
            .await
            .unwrap();
        fx.services
            .issues
            .assign(&admin, &issue.id, None)
            .await
            .unwrap();
        let issue = fx
            .services
            .issues
            .resolve(&admin, &issue.id, Some("fixed".into()))
            .await
            .unwrap();
        assert_eq!(issue.status, IssueStatus::Resolved);
    }

    #[tokio::test]
    async fn stats_count_every_bucket() {
        let fx = Fixture::new().await;
        let ann = fx.student("ann@campus.edu").await;
        let admin = fx.admin("root@campus.edu").await;
        let issues = &fx.services.issues;

        let first = issues
            .create(&ann, report("Broken light in hall 3", "electrical"), None)
            .await
            .unwrap();
        issues
            .create(&ann, report("Leaking tap in lab 2", "water"), None)
            .await
            .unwrap();
        issues.resolve(&admin, &first.id, None).await.unwrap();

        let stats = issues.stats(&admin).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status["open"], 1);
        assert_eq!(stats.by_status["resolved"], 1);
        assert_eq!(stats.by_status["in_progress"], 0);
        assert_eq!(stats.by_category["water"], 1);
        assert_eq!(stats.by_priority["medium"], 2);
        assert_eq!(stats.resolved_this_month, 1);
        assert_eq!(stats.average_resolution_time, 0);
    }

    #[test]
    fn resolution_summary_rounds_hours() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let resolved = [
            (now - Duration::hours(10), now - Duration::hours(7)),
            (now - Duration::days(40), now - Duration::days(40) + Duration::minutes(270)),
        ];
        let (this_month, hours) = resolution_summary(&resolved, now);
        assert_eq!(this_month, 1);
        // (3h + 4.5h) / 2 = 3.75h
        assert_eq!(hours, 4);
        assert_eq!(resolution_summary(&[], now), (0, 0));
    }

    #[test]
    fn end_date_covers_the_whole_day() {
        let end = parse_date("endDate", Some("2024-03-15"), true).unwrap().unwrap();
        assert_eq!(end.to_rfc3339(), "2024-03-15T23:59:59.999+00:00");
        let start = parse_date("startDate", Some("2024-03-15T08:00:00+02:00"), false)
            .unwrap()
            .unwrap();
        assert_eq!(start.to_rfc3339(), "2024-03-15T06:00:00+00:00");
        assert_eq!(parse_date("startDate", Some(""), false).unwrap(), None);
    }

    #[tokio::test]
    async fn demoted_caller_cannot_assign() {
        let fx = Fixture::new().await;
        let admin = fx.admin("root@campus.edu").await;
        let mut demoted = admin.clone();
        demoted.user.role = Role::Student;
        assert!(matches!(
            fx.services.issues.assign(&demoted, "whatever", None).await,
            Err(ApiError::Forbidden(_))
        ));
    }
}
