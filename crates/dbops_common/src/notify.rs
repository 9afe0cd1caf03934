//! Notification dispatcher
//!
//! Delivers a completed report through zero or more configured channels:
//! Slack incoming webhook, Microsoft Teams connector card, a generic JSON
//! webhook, and email via the local sendmail. Channel selection is pure
//! configuration; each send is independent best-effort, so one broken
//! channel never blocks the rest.

use crate::config::NotifyConfig;
use crate::exec::{self, ExecStatus};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

/// HTTP timeout per webhook send
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Severity of a notification, mapped to channel-specific colors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    /// Slack attachment color
    fn slack_color(&self) -> &'static str {
        match self {
            Severity::Info => "good",
            Severity::Warning => "warning",
            Severity::Critical => "danger",
        }
    }

    /// Teams MessageCard theme color
    fn teams_color(&self) -> &'static str {
        match self {
            Severity::Info => "2EB67D",
            Severity::Warning => "ECB22E",
            Severity::Critical => "E01E5A",
        }
    }
}

/// Logical notification content, identical across channels
#[derive(Debug, Clone)]
pub struct Notification {
    pub title: String,
    pub severity: Severity,
    pub body: String,
}

/// Outcome of one channel's delivery attempt
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub channel: String,
    pub ok: bool,
    pub detail: Option<String>,
}

impl DeliveryOutcome {
    fn success(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            ok: true,
            detail: None,
        }
    }

    fn failure(channel: &str, detail: String) -> Self {
        Self {
            channel: channel.to_string(),
            ok: false,
            detail: Some(detail),
        }
    }
}

/// Dispatch to every configured channel. Returns one outcome per channel;
/// an empty vec means nothing was configured.
pub fn dispatch(config: &NotifyConfig, notification: &Notification) -> Vec<DeliveryOutcome> {
    let mut outcomes = Vec::new();

    if let Some(slack) = &config.slack {
        outcomes.push(send_slack(&slack.webhook_url, notification));
    }
    if let Some(teams) = &config.teams {
        outcomes.push(send_teams(&teams.webhook_url, notification));
    }
    if let Some(webhook) = &config.webhook {
        outcomes.push(send_generic_webhook(&webhook.url, notification));
    }
    if let Some(email) = &config.email {
        outcomes.push(send_email(
            &email.sendmail,
            &email.from,
            &email.to,
            notification,
        ));
    }

    for outcome in &outcomes {
        if outcome.ok {
            info!(channel = %outcome.channel, "notification delivered");
        } else {
            warn!(
                channel = %outcome.channel,
                detail = outcome.detail.as_deref().unwrap_or("-"),
                "notification delivery failed"
            );
        }
    }
    outcomes
}

fn post_json(channel: &str, url: &str, payload: &serde_json::Value) -> DeliveryOutcome {
    let client = match reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(err) => return DeliveryOutcome::failure(channel, err.to_string()),
    };

    match client.post(url).json(payload).send() {
        Ok(response) if response.status().is_success() => DeliveryOutcome::success(channel),
        Ok(response) => {
            DeliveryOutcome::failure(channel, format!("HTTP {}", response.status().as_u16()))
        }
        Err(err) => DeliveryOutcome::failure(channel, err.to_string()),
    }
}

fn send_slack(webhook_url: &str, notification: &Notification) -> DeliveryOutcome {
    let payload = json!({
        "text": notification.title,
        "attachments": [{
            "color": notification.severity.slack_color(),
            "title": notification.title,
            "text": notification.body,
        }]
    });
    post_json("slack", webhook_url, &payload)
}

fn send_teams(webhook_url: &str, notification: &Notification) -> DeliveryOutcome {
    let payload = json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": notification.severity.teams_color(),
        "summary": notification.title,
        "sections": [{
            "activityTitle": notification.title,
            "text": notification.body,
        }]
    });
    post_json("teams", webhook_url, &payload)
}

fn send_generic_webhook(url: &str, notification: &Notification) -> DeliveryOutcome {
    let payload = json!({
        "title": notification.title,
        "severity": notification.severity.as_str(),
        "body": notification.body,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    post_json("webhook", url, &payload)
}

/// Plain-text email through the local MTA. Grounded on the same shell-out
/// pattern as the other local channels; no SMTP client state to manage.
fn send_email(
    sendmail: &str,
    from: &str,
    recipients: &[String],
    notification: &Notification,
) -> DeliveryOutcome {
    if recipients.is_empty() {
        return DeliveryOutcome::failure("email", "no recipients configured".to_string());
    }

    let message = format!(
        "From: {}\nTo: {}\nSubject: [{}] {}\n\n{}\n",
        from,
        recipients.join(", "),
        notification.severity.as_str(),
        notification.title,
        notification.body
    );

    let out = exec::run(sendmail, &["-t"], &[], Some(&message));
    match out.status {
        ExecStatus::Success => DeliveryOutcome::success("email"),
        _ => DeliveryOutcome::failure(
            "email",
            format!("{} ({})", out.status.as_str(), out.stderr.trim()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmailConfig, NotifyConfig};

    fn note() -> Notification {
        Notification {
            title: "Configuration drift: prod01".to_string(),
            severity: Severity::Warning,
            body: "open_cursors: 300 -> 500".to_string(),
        }
    }

    #[test]
    fn test_dispatch_with_no_channels_is_empty() {
        let outcomes = dispatch(&NotifyConfig::default(), &note());
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_email_failure_does_not_panic_and_reports_channel() {
        let config = NotifyConfig {
            email: Some(EmailConfig {
                to: vec!["dba-team@example.com".to_string()],
                from: "dbops@db01".to_string(),
                sendmail: "/nonexistent/sendmail".to_string(),
            }),
            ..Default::default()
        };
        let outcomes = dispatch(&config, &note());
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].channel, "email");
        assert!(!outcomes[0].ok);
    }

    #[test]
    fn test_email_without_recipients_is_failure() {
        let outcome = send_email("/usr/sbin/sendmail", "a@b", &[], &note());
        assert!(!outcome.ok);
    }

    #[test]
    fn test_severity_colors() {
        assert_eq!(Severity::Info.slack_color(), "good");
        assert_eq!(Severity::Critical.teams_color(), "E01E5A");
    }
}
