use std::{future::Future, time::Duration};

use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, info};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use surrealdb::{
    engine::remote::ws::{Client, Ws},
    opt::auth::Root,
    Surreal,
};

use super::{IssueQuery, IssueStore, StoreError, StoreResult, UserQuery, UserStore};
use crate::{
    config::DbConfig,
    models::{Issue, Timestamp, User},
    pagination::{IssueSort, PageRequest, UserSort},
};

pub type DBConnection = Surreal<Client>;

const ISSUE: &str = "issue";
const USER: &str = "user";

pub async fn connect(config: &DbConfig) -> anyhow::Result<DBConnection> {
    let connecting = async {
        let db = Surreal::new::<Ws>(config.url.as_str()).await?;

        db.signin(Root {
            username: &config.username,
            password: &config.password,
        })
        .await?;

        db.use_ns(&config.namespace).use_db(&config.database).await?;
        Ok::<_, surrealdb::Error>(db)
    };

    let db = tokio::time::timeout(config.timeout, connecting)
        .await
        .map_err(|_| anyhow!("Timed out connecting to database at {}", config.url))??;

    info!("Successfully connected to database");

    Ok(db)
}

/// Initialize database
pub async fn migrate(db_conn: &DBConnection) -> anyhow::Result<()> {
    db_conn
        .query(
            "DEFINE INDEX user_email ON TABLE user COLUMNS email UNIQUE;
             DEFINE INDEX issue_reporter ON TABLE issue COLUMNS reportedBy;
             DEFINE INDEX issue_status ON TABLE issue COLUMNS status;",
        )
        .await?
        .check()?;
    info!("Database schema is up to date");
    Ok(())
}

#[derive(Clone)]
pub struct SurrealStore {
    db: DBConnection,
    timeout: Duration,
}

impl SurrealStore {
    pub fn new(db: DBConnection, timeout: Duration) -> SurrealStore {
        SurrealStore { db, timeout }
    }

    async fn timed<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = Result<T, surrealdb::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(backend),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    /// Run a single statement and deserialize its result set
    async fn rows<T: DeserializeOwned>(&self, sql: String, vars: Map<String, Value>) -> StoreResult<Vec<T>> {
        debug!("surreal: {sql}");
        self.timed(async move {
            let mut response = self.db.query(sql).bind(vars).await?;
            response.take::<Vec<T>>(0)
        })
        .await
    }

    async fn count_where(&self, table: &str, filter: Filter) -> StoreResult<u64> {
        #[derive(Deserialize)]
        struct Count {
            count: u64,
        }

        let sql = format!("SELECT count() FROM {table}{} GROUP ALL", filter.clause());
        let rows: Vec<Count> = self.rows(sql, filter.vars).await?;
        Ok(rows.first().map_or(0, |c| c.count))
    }

    async fn exists(&self, table: &str, id: &str) -> StoreResult<bool> {
        #[derive(Deserialize)]
        struct Found {
            #[allow(dead_code)]
            found: bool,
        }

        let rows: Vec<Found> = self
            .rows(
                "SELECT true AS found FROM type::thing($tb, $id)".into(),
                vars([("tb", Value::from(table)), ("id", Value::from(id))]),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn select_one<T: DeserializeOwned>(&self, table: &str, id: &str) -> StoreResult<Option<T>> {
        let rows: Vec<T> = self
            .rows(
                "SELECT * FROM type::thing($tb, $id)".into(),
                vars([("tb", Value::from(table)), ("id", Value::from(id))]),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn create<T: Serialize>(&self, table: &str, id: &str, record: &T) -> StoreResult<()> {
        let _: Vec<Value> = self
            .rows(
                "CREATE type::thing($tb, $id) CONTENT $doc RETURN NONE".into(),
                vars([
                    ("tb", Value::from(table)),
                    ("id", Value::from(id)),
                    ("doc", document(record)?),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> StoreResult<bool> {
        let removed: Vec<Value> = self
            .rows(
                "DELETE type::thing($tb, $id) RETURN BEFORE".into(),
                vars([("tb", Value::from(table)), ("id", Value::from(id))]),
            )
            .await?;
        Ok(!removed.is_empty())
    }
}

/// Serialize a record for `CONTENT`, leaving the id to the record link
fn document<T: Serialize>(record: &T) -> StoreResult<Value> {
    let mut doc = serde_json::to_value(record).map_err(|e| StoreError::Backend(e.into()))?;
    if let Value::Object(fields) = &mut doc {
        fields.remove("id");
    }
    Ok(doc)
}

fn vars<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn backend(err: surrealdb::Error) -> StoreError {
    let message = err.to_string();
    if message.contains("user_email") && message.contains("already contains") {
        return StoreError::DuplicateEmail;
    }
    StoreError::Backend(err.into())
}

/// `WHERE` conditions plus their bound variables
#[derive(Debug, Default)]
struct Filter {
    conditions: Vec<&'static str>,
    vars: Map<String, Value>,
}

impl Filter {
    fn push(&mut self, condition: &'static str, name: &str, value: impl Into<Value>) {
        self.conditions.push(condition);
        self.vars.insert(name.to_string(), value.into());
    }

    fn clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }
}

fn issue_filter(query: &IssueQuery) -> Filter {
    let mut filter = Filter::default();
    if let Some(category) = query.category {
        filter.push("category = $category", "category", category.as_str());
    }
    if let Some(status) = query.status {
        filter.push("status = $status", "status", status.as_str());
    }
    if let Some(priority) = query.priority {
        filter.push("priority = $priority", "priority", priority.as_str());
    }
    if let Some(reporter) = &query.reported_by {
        filter.push("reportedBy = $reported_by", "reported_by", reporter.as_str());
    }
    if let Some(assignee) = &query.assigned_to {
        filter.push("assignedTo = $assigned_to", "assigned_to", assignee.as_str());
    }
    if let Some(from) = query.created_from {
        filter.push(
            "type::datetime(createdAt) >= type::datetime($created_from)",
            "created_from",
            from.to_rfc3339(),
        );
    }
    if let Some(to) = query.created_to {
        filter.push(
            "type::datetime(createdAt) <= type::datetime($created_to)",
            "created_to",
            to.to_rfc3339(),
        );
    }
    if let Some(text) = &query.text {
        filter.push(
            "(string::lowercase(title) CONTAINS $text \
             OR string::lowercase(description) CONTAINS $text \
             OR string::lowercase(location ?? '') CONTAINS $text)",
            "text",
            text.to_lowercase(),
        );
    }
    filter
}

fn user_filter(query: &UserQuery) -> Filter {
    let mut filter = Filter::default();
    if let Some(role) = query.role {
        filter.push("role = $role", "role", role.as_str());
    }
    if let Some(active) = query.is_active {
        filter.push("isActive = $is_active", "is_active", active);
    }
    if let Some(search) = &query.search {
        filter.push(
            "(string::lowercase(name) CONTAINS $search \
             OR email CONTAINS $search \
             OR string::lowercase(studentId ?? '') CONTAINS $search)",
            "search",
            search.to_lowercase(),
        );
    }
    filter
}

fn issue_order(sort: IssueSort) -> &'static str {
    match sort {
        IssueSort::CreatedAt => "createdAt",
        IssueSort::UpdatedAt => "updatedAt",
        IssueSort::Priority => "priority_rank",
        IssueSort::Status => "status",
        IssueSort::Category => "category",
        IssueSort::Title => "title",
    }
}

fn user_order(sort: UserSort) -> &'static str {
    match sort {
        UserSort::CreatedAt => "createdAt",
        UserSort::Name => "name",
        UserSort::Email => "email",
        UserSort::Role => "role",
    }
}

const PRIORITY_RANK: &str = "IF priority = 'critical' THEN 3 \
     ELSE IF priority = 'high' THEN 2 \
     ELSE IF priority = 'medium' THEN 1 \
     ELSE 0 END AS priority_rank";

fn page_vars<S>(mut vars: Map<String, Value>, page: &PageRequest<S>) -> Map<String, Value> {
    vars.insert("limit".into(), page.limit.into());
    vars.insert("start".into(), page.offset().into());
    vars
}

#[async_trait]
impl IssueStore for SurrealStore {
    async fn insert(&self, issue: &Issue) -> StoreResult<()> {
        self.create(ISSUE, &issue.id, issue).await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Issue>> {
        self.select_one(ISSUE, id).await
    }

    async fn replace(&self, issue: &Issue, expected_version: u64) -> StoreResult<()> {
        let updated: Vec<Value> = self
            .rows(
                "UPDATE type::thing($tb, $id) CONTENT $doc WHERE version = $expected RETURN AFTER"
                    .into(),
                vars([
                    ("tb", Value::from(ISSUE)),
                    ("id", Value::from(issue.id.as_str())),
                    ("doc", document(issue)?),
                    ("expected", Value::from(expected_version)),
                ]),
            )
            .await?;
        if !updated.is_empty() {
            return Ok(());
        }

        if self.exists(ISSUE, &issue.id).await? {
            Err(StoreError::VersionConflict {
                entity: ISSUE,
                id: issue.id.clone(),
                expected: expected_version,
            })
        } else {
            Err(StoreError::NotFound("Issue"))
        }
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        self.delete(ISSUE, id).await
    }

    async fn list(
        &self,
        query: &IssueQuery,
        page: &PageRequest<IssueSort>,
    ) -> StoreResult<(Vec<Issue>, u64)> {
        let total = self.count_where(ISSUE, issue_filter(query)).await?;

        let filter = issue_filter(query);
        let sql = format!(
            "SELECT *, {PRIORITY_RANK} FROM {ISSUE}{} ORDER BY {} {}, id ASC LIMIT $limit START $start",
            filter.clause(),
            issue_order(page.sort),
            page.order.as_sql(),
        );
        let rows = self.rows(sql, page_vars(filter.vars, page)).await?;
        Ok((rows, total))
    }

    async fn count(&self, query: &IssueQuery) -> StoreResult<u64> {
        self.count_where(ISSUE, issue_filter(query)).await
    }

    async fn resolution_times(&self) -> StoreResult<Vec<(Timestamp, Timestamp)>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Resolved {
            created_at: Timestamp,
            resolved_at: Timestamp,
        }

        let rows: Vec<Resolved> = self
            .rows(
                format!(
                    "SELECT createdAt, resolvedAt FROM {ISSUE} \
                     WHERE status = 'resolved' AND resolvedAt != NONE AND resolvedAt != NULL"
                ),
                Map::new(),
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.created_at, r.resolved_at))
            .collect())
    }
}

#[async_trait]
impl UserStore for SurrealStore {
    async fn insert(&self, user: &User) -> StoreResult<()> {
        if self.find_by_email(&user.email).await?.is_some() {
            return Err(StoreError::DuplicateEmail);
        }
        self.create(USER, &user.id, user).await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<User>> {
        self.select_one(USER, id).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let rows: Vec<User> = self
            .rows(
                format!("SELECT * FROM {USER} WHERE email = $email LIMIT 1"),
                vars([("email", Value::from(email))]),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn update(&self, user: &User) -> StoreResult<()> {
        let updated: Vec<Value> = self
            .rows(
                "UPDATE type::thing($tb, $id) CONTENT $doc WHERE createdAt != NONE RETURN AFTER"
                    .into(),
                vars([
                    ("tb", Value::from(USER)),
                    ("id", Value::from(user.id.as_str())),
                    ("doc", document(user)?),
                ]),
            )
            .await?;
        if updated.is_empty() {
            return Err(StoreError::NotFound("User"));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        self.delete(USER, id).await
    }

    async fn list(
        &self,
        query: &UserQuery,
        page: &PageRequest<UserSort>,
    ) -> StoreResult<(Vec<User>, u64)> {
        let total = self.count_where(USER, user_filter(query)).await?;

        let filter = user_filter(query);
        let sql = format!(
            "SELECT * FROM {USER}{} ORDER BY {} {}, id ASC LIMIT $limit START $start",
            filter.clause(),
            user_order(page.sort),
            page.order.as_sql(),
        );
        let rows = self.rows(sql, page_vars(filter.vars, page)).await?;
        Ok((rows, total))
    }

    async fn count(&self, query: &UserQuery) -> StoreResult<u64> {
        self.count_where(USER, user_filter(query)).await
    }

    async fn admin_device_tokens(&self) -> StoreResult<Vec<String>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Token {
            device_token: String,
        }

        let rows: Vec<Token> = self
            .rows(
                format!(
                    "SELECT deviceToken FROM {USER} \
                     WHERE role = 'admin' AND isActive = true \
                     AND deviceToken != NONE AND deviceToken != NULL"
                ),
                Map::new(),
            )
            .await?;
        Ok(rows.into_iter().map(|t| t.device_token).collect())
    }
}
