//! Outbound notification channels
//!
//! Fire-and-forget JSON webhooks: a Slack-style text payload and a generic
//! event payload. Dispatch happens on a spawned task so a slow or dead
//! channel can never delay the ingestion path, and every failure is logged
//! and swallowed.

use crate::error::NotifyError;
use crate::events::AlertType;
use chrono::Utc;
use log::{debug, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Bound on a single webhook request
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Dispatches alert notifications to configured webhook URLs
#[derive(Debug, Clone)]
pub struct AlertNotifier {
    client: Client,
    slack_webhook_url: Option<String>,
    webhook_url: Option<String>,
}

impl AlertNotifier {
    /// Create a notifier; empty URLs disable the corresponding channel
    pub fn new(slack_webhook_url: &str, webhook_url: &str) -> Self {
        let non_empty = |s: &str| {
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        };
        Self {
            client: Client::new(),
            slack_webhook_url: non_empty(slack_webhook_url),
            webhook_url: non_empty(webhook_url),
        }
    }

    /// Notifier with no channels configured; every dispatch is a no-op
    pub fn disabled() -> Self {
        Self::new("", "")
    }

    /// Whether any channel is configured
    pub fn is_configured(&self) -> bool {
        self.slack_webhook_url.is_some() || self.webhook_url.is_some()
    }

    /// Dispatch a notification to all configured channels, fire-and-forget
    pub fn dispatch(&self, severity: AlertType, title: &str, message: &str) {
        if !self.is_configured() {
            return;
        }
        let notifier = self.clone();
        let title = title.to_string();
        let message = message.to_string();
        tokio::spawn(async move {
            notifier.dispatch_now(severity, &title, &message).await;
        });
    }

    /// Dispatch synchronously; failures are logged per channel
    pub async fn dispatch_now(&self, severity: AlertType, title: &str, message: &str) {
        if let Some(url) = &self.slack_webhook_url {
            let payload = slack_payload(severity, title, message);
            if let Err(e) = self.post_json(url, &payload).await {
                warn!("slack notification failed: {}", e);
            }
        }
        if let Some(url) = &self.webhook_url {
            let payload = webhook_payload(severity, title, message);
            if let Err(e) = self.post_json(url, &payload).await {
                warn!("webhook notification failed: {}", e);
            }
        }
    }

    async fn post_json(&self, url: &str, payload: &Value) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .timeout(DISPATCH_TIMEOUT)
            .json(payload)
            .send()
            .await?;
        debug!("notification posted to {}: {}", url, response.status());
        Ok(())
    }
}

/// Slack-style text payload
fn slack_payload(severity: AlertType, title: &str, message: &str) -> Value {
    json!({
        "text": format!(
            "[*{}*] {} - {}",
            severity.as_str().to_uppercase(),
            title,
            message
        )
    })
}

/// Generic webhook payload
fn webhook_payload(severity: AlertType, title: &str, message: &str) -> Value {
    json!({
        "event": "alert",
        "severity": severity.as_str(),
        "title": title,
        "message": message,
        "ts": Utc::now().timestamp_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_channels_are_disabled() {
        let notifier = AlertNotifier::disabled();
        assert!(!notifier.is_configured());

        let notifier = AlertNotifier::new("https://hooks.example/slack", "");
        assert!(notifier.is_configured());
    }

    #[test]
    fn test_slack_payload_format() {
        let payload = slack_payload(AlertType::Error, "Synthetic failed: checkout", "got 503");
        assert_eq!(
            payload["text"],
            "[*ERROR*] Synthetic failed: checkout - got 503"
        );
    }

    #[test]
    fn test_webhook_payload_format() {
        let payload = webhook_payload(AlertType::Warning, "Synthetic slow: checkout", "900ms");
        assert_eq!(payload["event"], "alert");
        assert_eq!(payload["severity"], "warning");
        assert_eq!(payload["title"], "Synthetic slow: checkout");
        assert!(payload["ts"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_dispatch_to_unreachable_channel_is_swallowed() {
        // Port 9 on localhost is the discard protocol and refuses connections
        let notifier = AlertNotifier::new("http://127.0.0.1:9/webhook", "");
        notifier
            .dispatch_now(AlertType::Error, "title", "message")
            .await;
    }
}
