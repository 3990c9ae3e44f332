//! Email and push notifications.
//!
//! Services talk to a [`Notifier`]. Its methods return nothing: the
//! [`Dispatcher`] renders the message, spawns the delivery and logs whatever
//! goes wrong. A failed notification never fails the request that caused it.

pub mod email;
pub mod push;

use std::{collections::BTreeMap, sync::Arc};

use log::{debug, info, warn};

use self::{
    email::{EmailChannel, EmailMessage},
    push::{PushChannel, PushError},
};
use crate::{
    config::Config,
    models::{Issue, IssueStatus, User},
};

pub trait Notifier: Send + Sync {
    /// A student reported an issue; tell every admin that has a device
    fn new_issue(&self, admin_tokens: Vec<String>, issue: &Issue);

    /// Confirmation to the reporter that the issue was filed
    fn issue_received(&self, reporter: &User, issue: &Issue);

    fn status_changed(&self, reporter: &User, issue: &Issue, previous: IssueStatus, current: IssueStatus);

    fn assigned(&self, assignee: &User, issue: &Issue);

    fn welcome(&self, user: &User);
}

/// Title, body and string data of a push notification
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    fn new(title: &str, body: String, data: &[(&str, &str)]) -> PushMessage {
        PushMessage {
            title: title.to_string(),
            body,
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn new_issue(issue: &Issue) -> PushMessage {
        PushMessage::new(
            "New Issue Reported",
            format!(
                "{} ({} - {})",
                issue.title,
                issue.category.as_str(),
                issue.priority.as_str()
            ),
            &[
                ("type", "new_issue"),
                ("issueId", &issue.id),
                ("category", issue.category.as_str()),
                ("priority", issue.priority.as_str()),
            ],
        )
    }

    pub fn status_changed(issue: &Issue, current: IssueStatus) -> PushMessage {
        PushMessage::new(
            "Issue Status Updated",
            format!("\"{}\" is now {}", issue.title, current.as_str().replace('_', " ")),
            &[
                ("type", "status_update"),
                ("issueId", &issue.id),
                ("status", current.as_str()),
            ],
        )
    }

    pub fn assigned(issue: &Issue) -> PushMessage {
        PushMessage::new(
            "Issue Assigned to You",
            format!("You have been assigned: \"{}\"", issue.title),
            &[("type", "issue_assigned"), ("issueId", &issue.id)],
        )
    }
}

/// The production [`Notifier`]. A channel is `None` when its credentials are
/// not configured, and messages for it are dropped.
#[derive(Clone, Default)]
pub struct Dispatcher {
    email: Option<Arc<EmailChannel>>,
    push: Option<Arc<PushChannel>>,
}

impl Dispatcher {
    pub fn new(email: Option<EmailChannel>, push: Option<PushChannel>) -> Dispatcher {
        Dispatcher {
            email: email.map(Arc::new),
            push: push.map(Arc::new),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Dispatcher> {
        let email = match &config.email {
            Some(email) => Some(EmailChannel::new(email, config.http_timeout)?),
            None => {
                info!("Email notifications disabled, EMAIL_USER/EMAIL_PASSWORD not set");
                None
            },
        };
        let push = match &config.push {
            Some(push) => Some(PushChannel::new(push, config.http_timeout)?),
            None => {
                info!("Push notifications disabled, Firebase credentials not set");
                None
            },
        };
        Ok(Dispatcher::new(email, push))
    }

    fn send_email(&self, message: EmailMessage) {
        let Some(channel) = self.email.clone() else {
            debug!("email disabled, dropping {:?}", message.subject);
            return;
        };
        tokio::spawn(async move {
            match channel.send(&message).await {
                Ok(()) => info!("Email sent to {} ({})", message.to, message.subject),
                Err(err) => warn!("Failed to send email to {}: {err:#}", message.to),
            }
        });
    }

    fn send_push(&self, tokens: Vec<String>, message: PushMessage) {
        if tokens.is_empty() {
            return;
        }
        let Some(channel) = self.push.clone() else {
            debug!("push disabled, dropping {:?}", message.title);
            return;
        };
        tokio::spawn(async move {
            let mut delivered = 0;
            for token in &tokens {
                match channel.send(token, &message).await {
                    Ok(()) => delivered += 1,
                    Err(PushError::Unregistered) => {
                        warn!("Device token is no longer registered: {}", redact(token))
                    },
                    Err(err) => warn!("Failed to push {:?} to {}: {err}", message.title, redact(token)),
                }
            }
            debug!("push {:?}: {delivered}/{} delivered", message.title, tokens.len());
        });
    }
}

fn redact(token: &str) -> String {
    let head: String = token.chars().take(8).collect();
    format!("{head}…")
}

impl Notifier for Dispatcher {
    fn new_issue(&self, admin_tokens: Vec<String>, issue: &Issue) {
        self.send_push(admin_tokens, PushMessage::new_issue(issue));
    }

    fn issue_received(&self, reporter: &User, issue: &Issue) {
        self.send_email(EmailMessage::issue_received(reporter, issue));
    }

    fn status_changed(&self, reporter: &User, issue: &Issue, previous: IssueStatus, current: IssueStatus) {
        self.send_email(EmailMessage::status_changed(reporter, issue, previous, current));
        if let Some(token) = &reporter.device_token {
            self.send_push(vec![token.clone()], PushMessage::status_changed(issue, current));
        }
    }

    fn assigned(&self, assignee: &User, issue: &Issue) {
        if let Some(token) = &assignee.device_token {
            self.send_push(vec![token.clone()], PushMessage::assigned(issue));
        }
    }

    fn welcome(&self, user: &User) {
        self.send_email(EmailMessage::welcome(user));
    }
}
