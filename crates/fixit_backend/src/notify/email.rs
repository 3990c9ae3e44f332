use std::time::Duration;

use anyhow::Context;
use chrono::{Datelike, Utc};
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::{
    config::EmailConfig,
    models::{Issue, IssueStatus, User},
};

const BRAND: &str = "Campus FixIt";

/// Rendered email, ready to hand to a transport
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// SMTP relay with STARTTLS/TLS and login credentials
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailChannel {
    pub fn new(config: &EmailConfig, timeout: Duration) -> anyhow::Result<EmailChannel> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .with_context(|| format!("Invalid SMTP host {}", config.host))?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(timeout))
            .build();
        let from = format!("{BRAND} <{}>", config.from)
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid EMAIL_FROM address {}", config.from))?;

        Ok(EmailChannel { transport, from })
    }

    pub async fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(message.to.parse().context("Invalid recipient address")?)
            .subject(message.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                message.text.clone(),
                message.html.clone(),
            ))?;

        self.transport.send(email).await?;
        Ok(())
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn status_color(status: IssueStatus) -> &'static str {
    match status {
        IssueStatus::Open => "#f59e0b",
        IssueStatus::InProgress => "#3b82f6",
        IssueStatus::Resolved => "#10b981",
    }
}

/// Wrap `content` in the shared layout
fn layout(heading: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <div style="background: #667eea; color: white; padding: 30px; text-align: center; border-radius: 10px 10px 0 0;">
      <h1>{heading}</h1>
    </div>
    <div style="background: #f9f9f9; padding: 30px; border-radius: 0 0 10px 10px;">
{content}
    </div>
    <p style="text-align: center; color: #666; font-size: 12px;">&copy; {year} {BRAND}. All rights reserved.</p>
  </div>
</body>
</html>"#,
        year = Utc::now().year(),
    )
}

impl EmailMessage {
    pub fn welcome(user: &User) -> EmailMessage {
        let name = escape(&user.name);
        let html = layout(
            &format!("Welcome to {BRAND}!"),
            &format!(
                "      <h2>Hello {name}!</h2>
      <p>Your account is ready. You can now report facility problems around campus and follow their progress until they are fixed.</p>"
            ),
        );
        let text = format!(
            "Hello {}!\n\nYour {BRAND} account is ready. You can now report facility problems around campus and follow their progress until they are fixed.",
            user.name
        );

        EmailMessage {
            to: user.email.clone(),
            subject: format!("Welcome to {BRAND}!"),
            html,
            text,
        }
    }

    pub fn issue_received(reporter: &User, issue: &Issue) -> EmailMessage {
        let html = layout(
            "Issue Reported Successfully",
            &format!(
                "      <h2>Hello {name}!</h2>
      <p>Thank you for reporting an issue. We have received it and our team will look into it.</p>
      <h3>{title}</h3>
      <p><strong>Category:</strong> {category}<br><strong>Priority:</strong> {priority}<br><strong>Reference:</strong> {id}</p>",
                name = escape(&reporter.name),
                title = escape(&issue.title),
                category = issue.category.display_name(),
                priority = issue.priority.display_name(),
                id = escape(&issue.id),
            ),
        );
        let text = format!(
            "Hello {}!\n\nWe received your issue \"{}\" ({}, {} priority). Reference: {}",
            reporter.name,
            issue.title,
            issue.category.display_name(),
            issue.priority.display_name(),
            issue.id,
        );

        EmailMessage {
            to: reporter.email.clone(),
            subject: format!("Issue Reported: {}", issue.title),
            html,
            text,
        }
    }

    pub fn status_changed(
        reporter: &User,
        issue: &Issue,
        previous: IssueStatus,
        current: IssueStatus,
    ) -> EmailMessage {
        let remarks = issue
            .remarks
            .as_deref()
            .map(|r| {
                format!(
                    "\n      <div style=\"background: white; padding: 15px; border-left: 4px solid #667eea;\"><strong>Admin Remarks:</strong><p>{}</p></div>",
                    escape(r)
                )
            })
            .unwrap_or_default();
        let closing = if current == IssueStatus::Resolved {
            "Great news! Your issue has been resolved. Thank you for helping improve our campus!"
        } else {
            "We are working on resolving your issue. You will be notified of any further updates."
        };

        let html = layout(
            "Issue Status Updated",
            &format!(
                "      <h2>Hello {name}!</h2>
      <p>The status of your issue has been updated:</p>
      <h3>\"{title}\"</h3>
      <p><span style=\"background: {from_color}; color: white; padding: 8px 16px; border-radius: 20px;\">{from}</span> &rarr; <span style=\"background: {to_color}; color: white; padding: 8px 16px; border-radius: 20px;\">{to}</span></p>{remarks}
      <p>{closing}</p>",
                name = escape(&reporter.name),
                title = escape(&issue.title),
                from_color = status_color(previous),
                from = previous.display_name(),
                to_color = status_color(current),
                to = current.display_name(),
            ),
        );

        let mut text = format!(
            "Hello {}!\n\nYour issue \"{}\" moved from {} to {}.",
            reporter.name,
            issue.title,
            previous.display_name(),
            current.display_name(),
        );
        if let Some(r) = &issue.remarks {
            text.push_str(&format!("\n\nAdmin remarks: {r}"));
        }
        text.push_str("\n\n");
        text.push_str(closing);

        EmailMessage {
            to: reporter.email.clone(),
            subject: format!("Issue Update: {}", issue.title),
            html,
            text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{IssueCategory, IssuePriority, NewIssue, Role},
        testing,
    };

    fn issue(title: &str) -> Issue {
        Issue::open(
            "i-1".into(),
            NewIssue {
                title: title.into(),
                description: "Water on the floor near the lab".into(),
                category: IssueCategory::Water,
                priority: IssuePriority::High,
                location: None,
            },
            "s1",
            None,
            Utc::now(),
        )
    }

    #[test]
    fn user_content_is_escaped() {
        let reporter = testing::user("s1", "ann@campus.edu", Role::Student);
        let msg = EmailMessage::issue_received(&reporter, &issue("<script>alert(1)</script> leak"));

        assert!(!msg.html.contains("<script>"));
        assert!(msg.html.contains("&lt;script&gt;"));
        assert_eq!(msg.subject, "Issue Reported: <script>alert(1)</script> leak");
        assert_eq!(msg.to, "ann@campus.edu");
    }

    #[test]
    fn status_email_mentions_both_states_and_remarks() {
        let reporter = testing::user("s1", "ann@campus.edu", Role::Student);
        let mut issue = issue("Leaking tap in lab 2");
        issue
            .transition(IssueStatus::Resolved, "a1", Some("washer replaced".into()), Utc::now())
            .unwrap();

        let msg = EmailMessage::status_changed(&reporter, &issue, IssueStatus::Open, IssueStatus::Resolved);
        assert_eq!(msg.subject, "Issue Update: Leaking tap in lab 2");
        assert!(msg.html.contains("Open"));
        assert!(msg.html.contains("Resolved"));
        assert!(msg.html.contains("washer replaced"));
        assert!(msg.text.contains("Great news"));
    }

    #[test]
    fn welcome_greets_by_name() {
        let user = testing::user("s1", "ann@campus.edu", Role::Student);
        let msg = EmailMessage::welcome(&user);
        assert!(msg.text.starts_with("Hello s1!"));
        assert_eq!(msg.subject, "Welcome to Campus FixIt!");
    }
}
