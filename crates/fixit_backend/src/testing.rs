//! Fixtures shared by the unit tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    auth::{AuthUser, Passwords, TokenKeys},
    config::{AuthConfig, PaginationConfig},
    db::{memory::InMemoryStore, UserStore},
    error::ApiResult,
    images::{ImageStore, ImageUpload},
    models::{ImageRef, Issue, IssueStatus, Role, User},
    notify::Notifier,
    services::{Deps, Services},
};

pub fn user(id: &str, email: &str, role: Role) -> User {
    let now = Utc::now();
    User {
        id: id.into(),
        name: id.into(),
        email: email.into(),
        password_hash: String::new(),
        role,
        student_id: None,
        department: None,
        phone: None,
        avatar: None,
        is_active: true,
        device_token: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn jpeg() -> ImageUpload {
    ImageUpload {
        bytes: vec![0xff, 0xd8, 0xff, 0xe0],
        content_type: "image/jpeg".into(),
        file_name: "photo.jpg".into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    NewIssue { tokens: Vec<String>, issue: String },
    IssueReceived { to: String, issue: String },
    StatusChanged {
        to: String,
        issue: String,
        previous: IssueStatus,
        current: IssueStatus,
    },
    Assigned { to: String, issue: String },
    Welcome { to: String },
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, sent: Sent) {
        self.sent.lock().unwrap().push(sent);
    }
}

impl Notifier for RecordingNotifier {
    fn new_issue(&self, admin_tokens: Vec<String>, issue: &Issue) {
        self.record(Sent::NewIssue {
            tokens: admin_tokens,
            issue: issue.id.clone(),
        });
    }

    fn issue_received(&self, reporter: &User, issue: &Issue) {
        self.record(Sent::IssueReceived {
            to: reporter.id.clone(),
            issue: issue.id.clone(),
        });
    }

    fn status_changed(&self, reporter: &User, issue: &Issue, previous: IssueStatus, current: IssueStatus) {
        self.record(Sent::StatusChanged {
            to: reporter.id.clone(),
            issue: issue.id.clone(),
            previous,
            current,
        });
    }

    fn assigned(&self, assignee: &User, issue: &Issue) {
        self.record(Sent::Assigned {
            to: assignee.id.clone(),
            issue: issue.id.clone(),
        });
    }

    fn welcome(&self, user: &User) {
        self.record(Sent::Welcome { to: user.id.clone() });
    }
}

/// Every delivery blows up inside its background task
pub struct FailingNotifier;

fn explode() {
    tokio::spawn(async { panic!("notification channel unavailable") });
}

impl Notifier for FailingNotifier {
    fn new_issue(&self, _admin_tokens: Vec<String>, _issue: &Issue) {
        explode();
    }

    fn issue_received(&self, _reporter: &User, _issue: &Issue) {
        explode();
    }

    fn status_changed(&self, _reporter: &User, _issue: &Issue, _previous: IssueStatus, _current: IssueStatus) {
        explode();
    }

    fn assigned(&self, _assignee: &User, _issue: &Issue) {
        explode();
    }

    fn welcome(&self, _user: &User) {
        explode();
    }
}

/// Hands out `<folder>/<n>` ids and remembers what was deleted
#[derive(Default)]
pub struct RecordingImages {
    uploads: AtomicUsize,
    deleted: Mutex<Vec<String>>,
}

impl RecordingImages {
    pub fn uploaded(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageStore for RecordingImages {
    async fn upload(&self, _image: ImageUpload, folder: &str) -> ApiResult<ImageRef> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ImageRef {
            url: format!("https://images.test/{folder}/{n}"),
            public_id: format!("{folder}/{n}"),
        })
    }

    fn schedule_delete(&self, public_id: String) {
        self.deleted.lock().unwrap().push(public_id);
    }
}

pub fn auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "test-access-secret".into(),
        jwt_expires_in: Duration::from_secs(3600),
        refresh_secret: "test-refresh-secret".into(),
        refresh_expires_in: Duration::from_secs(7200),
        scrypt_log_n: 4,
    }
}

/// Services wired to an in-memory store and recording side channels
pub struct Fixture {
    pub store: InMemoryStore,
    pub notifier: Arc<RecordingNotifier>,
    pub images: Arc<RecordingImages>,
    pub services: Services,
}

impl Fixture {
    pub async fn new() -> Fixture {
        let notifier = Arc::new(RecordingNotifier::default());
        Fixture::build(notifier.clone(), notifier)
    }

    pub async fn with_failing_notifier() -> Fixture {
        Fixture::build(
            Arc::new(RecordingNotifier::default()),
            Arc::new(FailingNotifier),
        )
    }

    fn build(recorder: Arc<RecordingNotifier>, notifier: Arc<dyn Notifier>) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = InMemoryStore::new();
        let images = Arc::new(RecordingImages::default());
        let config = auth_config();

        let services = Services::new(Deps {
            issues: Arc::new(store.clone()),
            users: Arc::new(store.clone()),
            notifier,
            images: images.clone(),
            passwords: Passwords::new(config.scrypt_log_n).unwrap(),
            tokens: Arc::new(TokenKeys::new(&config)),
            pagination: PaginationConfig::default(),
        });

        Fixture {
            store,
            notifier: recorder,
            images,
            services,
        }
    }

    /// Store an account whose id is the local part of `email`
    async fn account(&self, email: &str, role: Role, device: Option<&str>) -> AuthUser {
        let id = email.split('@').next().unwrap_or(email);
        let mut user = user(id, email, role);
        user.device_token = device.map(str::to_string);
        UserStore::insert(&self.store, &user).await.unwrap();
        AuthUser { user }
    }

    pub async fn student(&self, email: &str) -> AuthUser {
        self.account(email, Role::Student, None).await
    }

    pub async fn admin(&self, email: &str) -> AuthUser {
        self.account(email, Role::Admin, None).await
    }

    pub async fn admin_with_device(&self, email: &str, token: &str) -> AuthUser {
        self.account(email, Role::Admin, Some(token)).await
    }
}
