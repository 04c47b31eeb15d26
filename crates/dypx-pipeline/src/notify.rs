//! Notifications sent when a monitored workflow ends.
//!
//! The default [`Notifier`] schedules a notification plugin instance on the
//! backend, anchored to the workflow's parent job, which mails the
//! configured recipients.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dypx_client::CubeClient;
use dypx_config::NotificationSection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Search directive that produced a workflow (`PatientID`, `StudyDate`, ...).
pub type SearchContext = BTreeMap<String, String>;

/// Why a notification is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// At least one job errored.
    Failure,
    /// Jobs disappeared from the workflow.
    Tampered,
    /// The workflow finished successfully.
    Completed,
}

impl NotificationKind {
    pub fn reason(&self) -> &'static str {
        match self {
            NotificationKind::Failure => "Pipeline failed with errors",
            NotificationKind::Tampered => "Nodes deleted in pipeline",
            NotificationKind::Completed => "Workflow complete",
        }
    }
}

/// Everything a notifier needs about one workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub kind: NotificationKind,
    pub workflow_id: i64,
    pub previous_instance_id: i64,
    pub search: SearchContext,
    /// Overrides the configured recipients.
    pub recipients: Option<String>,
    /// Overrides the configured mail server.
    pub smtp_server: Option<String>,
}

/// Sends workflow notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send the notification and return the id of whatever carried it.
    async fn notify(&self, request: &NotificationRequest) -> Result<i64>;
}

/// Settings of the notification plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSettings {
    pub plugin_name: String,
    pub plugin_version: String,
    pub sender: String,
    pub smtp_server: String,
    pub recipients: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self::from(&NotificationSection::default())
    }
}

impl From<&NotificationSection> for NotificationSettings {
    fn from(section: &NotificationSection) -> Self {
        Self {
            plugin_name: section.plugin_name.clone(),
            plugin_version: section.plugin_version.clone(),
            sender: section.sender.clone(),
            smtp_server: section.smtp_server.clone(),
            recipients: section.recipients.clone(),
        }
    }
}

/// Body of a failure or tampering notice.
pub fn failure_message(search: &SearchContext) -> String {
    let field = |key: &str| search.get(key).map(String::as_str).unwrap_or("");
    format!(
        "An error occurred while running pacs-pull pipeline on the following data: \
         \nMRN: {} \nStudyDate: {}\nModality: {}\n\n\
         Kindly login to ChRIS to access the logs for more details.",
        field("PatientID"),
        field("StudyDate"),
        field("Modality"),
    )
}

/// Body of a completion notice.
pub fn completion_message(feed_name: &str, date: &str, owner: &str) -> String {
    format!(
        "Your workflow is now complete.\nFeed Name: {feed_name}\nDate: {date}\n\n\
         Kindly login to ChRIS as *{owner}* to access the logs for more details."
    )
}

/// Notifier backed by the notification plugin.
#[derive(Clone)]
pub struct PluginNotifier {
    client: CubeClient,
    settings: NotificationSettings,
}

impl PluginNotifier {
    pub fn new(client: CubeClient, settings: NotificationSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &NotificationSettings {
        &self.settings
    }

    async fn content(&self, request: &NotificationRequest) -> Result<(String, String)> {
        match request.kind {
            NotificationKind::Failure | NotificationKind::Tampered => {
                Ok((failure_message(&request.search), "pipeline-error".to_string()))
            }
            NotificationKind::Completed => {
                let instance = self
                    .client
                    .plugins()
                    .instance(request.previous_instance_id)
                    .await?;
                let feed_id = instance.feed_id.ok_or_else(|| {
                    PipelineError::Notification(format!(
                        "plugin instance {} has no feed",
                        request.previous_instance_id
                    ))
                })?;
                let feed = self.client.feeds().get(feed_id).await?;
                Ok((
                    completion_message(&feed.name, &feed.creation_date, &feed.owner_username),
                    format!("Analysis {} is complete.", feed.name),
                ))
            }
        }
    }
}

#[async_trait]
impl Notifier for PluginNotifier {
    async fn notify(&self, request: &NotificationRequest) -> Result<i64> {
        let (content, title) = self.content(request).await?;

        let plugins = self.client.plugins();
        let plugin_id = plugins
            .search(&self.settings.plugin_name, &self.settings.plugin_version)
            .await?
            .ok_or_else(|| {
                PipelineError::NotFound(format!(
                    "plugin {} {}",
                    self.settings.plugin_name, self.settings.plugin_version
                ))
            })?;
        debug!(plugin_id, "Notification plugin found");

        let params = json!({
            "previous_id": request.previous_instance_id,
            "content": content,
            "title": title,
            "rcpt": request.recipients.as_deref().unwrap_or(&self.settings.recipients),
            "sender": self.settings.sender,
            "mail_server": request.smtp_server.as_deref().unwrap_or(&self.settings.smtp_server),
        });
        let instance_id = plugins.create_instance(plugin_id, &params).await?;

        info!(
            workflow_id = request.workflow_id,
            instance_id,
            reason = request.kind.reason(),
            "Notification scheduled"
        );
        Ok(instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTransport, records};
    use dypx_client::Method;

    fn search() -> SearchContext {
        SearchContext::from([
            ("PatientID".to_string(), "4780041".to_string()),
            ("StudyDate".to_string(), "20240102".to_string()),
            ("Modality".to_string(), "MR".to_string()),
        ])
    }

    fn request(kind: NotificationKind) -> NotificationRequest {
        NotificationRequest {
            kind,
            workflow_id: 5,
            previous_instance_id: 40,
            search: search(),
            recipients: Some("a@b.c".into()),
            smtp_server: None,
        }
    }

    #[test]
    fn test_failure_message() {
        let text = failure_message(&search());
        assert!(text.starts_with("An error occurred while running pacs-pull pipeline"));
        assert!(text.contains("\nMRN: 4780041 \n"));
        assert!(text.contains("\nStudyDate: 20240102\n"));
        assert!(text.contains("\nModality: MR\n"));
    }

    #[test]
    fn test_failure_message_missing_keys() {
        let text = failure_message(&SearchContext::new());
        assert!(text.contains("MRN:  \n"));
    }

    #[test]
    fn test_reasons() {
        assert_eq!(NotificationKind::Failure.reason(), "Pipeline failed with errors");
        assert_eq!(NotificationKind::Tampered.reason(), "Nodes deleted in pipeline");
    }

    #[tokio::test]
    async fn test_failure_notice_creates_plugin_instance() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::GET, "plugins/search/", records(vec![serde_json::json!({"id": 8})]));
        transport.reply(Method::POST, "plugins/8/instances/", records(vec![serde_json::json!({"id": 99})]));

        let settings = NotificationSettings {
            smtp_server: "mail.local".into(),
            ..Default::default()
        };
        let notifier = PluginNotifier::new(transport.client(), settings);
        let id = notifier.notify(&request(NotificationKind::Failure)).await.unwrap();
        assert_eq!(id, 99);

        let requests = transport.requests();
        let search_query = &requests[0].query;
        assert!(search_query.contains(&("name".to_string(), "pl-notification".to_string())));
        assert!(search_query.contains(&("version".to_string(), "0.1.0".to_string())));

        let body = requests[1].body.as_ref().unwrap();
        assert_eq!(body["previous_id"], 40);
        assert_eq!(body["title"], "pipeline-error");
        assert_eq!(body["rcpt"], "a@b.c");
        assert_eq!(body["sender"], "noreply@fnndsc.org");
        assert_eq!(body["mail_server"], "mail.local");
    }

    #[tokio::test]
    async fn test_missing_plugin_is_not_found() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::GET, "plugins/search/", records(Vec::new()));

        let notifier = PluginNotifier::new(transport.client(), NotificationSettings::default());
        let err = notifier.notify(&request(NotificationKind::Tampered)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_completion_notice_reads_feed() {
        let transport = ScriptedTransport::new();
        transport.reply(
            Method::GET,
            "plugins/instances/40/",
            records(vec![serde_json::json!({"id": 40, "title": "pl-dypx", "status": "started", "feed_id": 6})]),
        );
        transport.reply(
            Method::GET,
            "6/",
            records(vec![serde_json::json!({
                "name": "MRN-4780041", "creation_date": "2024-01-02", "owner_username": "chris"
            })]),
        );
        transport.reply(Method::GET, "plugins/search/", records(vec![serde_json::json!({"id": 8})]));
        transport.reply(Method::POST, "plugins/8/instances/", records(vec![serde_json::json!({"id": 100})]));

        let notifier = PluginNotifier::new(transport.client(), NotificationSettings::default());
        notifier.notify(&request(NotificationKind::Completed)).await.unwrap();

        let requests = transport.requests();
        let body = requests.last().unwrap().body.as_ref().unwrap();
        assert_eq!(body["title"], "Analysis MRN-4780041 is complete.");
        let content = body["content"].as_str().unwrap();
        assert!(content.starts_with("Your workflow is now complete."));
        assert!(content.contains("*chris*"));
    }
}
