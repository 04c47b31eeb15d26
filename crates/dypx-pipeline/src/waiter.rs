//! Blocking wait on one node of a workflow.

use std::time::Duration;

use dypx_client::{CubeClient, PluginInstanceSummary};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Default seconds between node status polls.
pub const DEFAULT_WAIT_POLL: Duration = Duration::from_secs(5);

/// Default poll budget.
pub const DEFAULT_MAX_POLLS: u32 = 100;

/// Status reported when nothing has been fetched.
const UNKNOWN_STATUS: &str = "unknown";

/// First instance whose title contains `title`, ignoring case.
pub fn find(instances: &[PluginInstanceSummary], title: &str) -> Option<i64> {
    let needle = title.to_lowercase();
    instances
        .iter()
        .find(|i| i.title.to_lowercase().contains(&needle))
        .map(|i| i.id)
}

/// Result of waiting on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitOutcome {
    /// True only for `finishedSuccessfully`, or when there was no node.
    pub finished: bool,
    pub status: String,
    pub polls: u32,
    pub plid: Option<i64>,
    /// Last fetched view of the node.
    pub plinst: Option<PluginInstanceSummary>,
}

impl WaitOutcome {
    /// Outcome when no node matched: nothing to block on.
    pub fn vacuous() -> Self {
        Self {
            finished: true,
            status: UNKNOWN_STATUS.to_string(),
            polls: 0,
            plid: None,
            plinst: None,
        }
    }
}

/// Polls one plugin instance until its status is terminal.
#[derive(Clone)]
pub struct NodeWaiter {
    client: CubeClient,
    poll_interval: Duration,
    max_polls: u32,
}

impl NodeWaiter {
    pub fn new(client: CubeClient) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_WAIT_POLL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll budget; 0 polls without bound.
    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    /// Find the node titled like `title` in `workflow` and wait on it.
    pub async fn wait_for_node(
        &self,
        workflow: &[PluginInstanceSummary],
        title: &str,
    ) -> Result<WaitOutcome> {
        match find(workflow, title) {
            Some(id) => self.wait(id).await,
            None => {
                warn!(node = title, "No node with this title in workflow; not waiting");
                Ok(WaitOutcome::vacuous())
            }
        }
    }

    /// Poll `instance_id` until it finishes, is cancelled, or the poll
    /// budget runs out. Running out of polls is not an error.
    pub async fn wait(&self, instance_id: i64) -> Result<WaitOutcome> {
        let plugins = self.client.plugins();
        let mut polls = 0u32;

        let instance = loop {
            let instance = plugins.instance(instance_id).await?;
            polls += 1;
            debug!(instance_id, poll = polls, status = %instance.status, "Node status");

            if instance.status.is_terminal() {
                break instance;
            }
            if self.max_polls > 0 && polls >= self.max_polls {
                warn!(instance_id, polls, "Poll budget exhausted");
                break instance;
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        let finished = instance.status.is_success();
        info!(instance_id, polls, status = %instance.status, finished, "Node wait ended");

        Ok(WaitOutcome {
            finished,
            status: instance.status.to_string(),
            polls,
            plid: Some(instance_id),
            plinst: Some(instance),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTransport, records};
    use dypx_client::{Method, PluginInstanceStatus};
    use serde_json::json;

    const NODE_PATH: &str = "plugins/instances/31/";

    fn summary(id: i64, title: &str) -> PluginInstanceSummary {
        PluginInstanceSummary {
            id,
            title: title.to_string(),
            status: PluginInstanceStatus::Scheduled,
            plugin_name: None,
            previous_id: None,
            feed_id: None,
        }
    }

    fn node(status: &str) -> dypx_client::ParsedResult {
        records(vec![json!({"id": 31, "title": "verify-registration", "status": status})])
    }

    #[test]
    fn test_find_first_match_ignoring_case() {
        let workflow = vec![
            summary(30, "PACS-retrieve"),
            summary(31, "Verify-Registration"),
            summary(32, "verify-registration-2"),
        ];
        assert_eq!(find(&workflow, "verify-registration"), Some(31));
        assert_eq!(find(&workflow, "PACS"), Some(30));
        assert_eq!(find(&workflow, "dicom-push"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_status_is_finished() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::GET, NODE_PATH, node("started"));
        transport.reply(Method::GET, NODE_PATH, node("finishedSuccessfully"));

        let waiter = NodeWaiter::new(transport.client());
        let outcome = waiter.wait(31).await.unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.status, "finishedSuccessfully");
        assert_eq!(outcome.polls, 2);
        assert_eq!(outcome.plid, Some(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_and_cancel_are_not_finished() {
        for status in ["finishedWithError", "cancelled"] {
            let transport = ScriptedTransport::new();
            transport.reply(Method::GET, NODE_PATH, node(status));

            let waiter = NodeWaiter::new(transport.client());
            let outcome = waiter.wait(31).await.unwrap();
            assert!(!outcome.finished, "{status}");
            assert_eq!(outcome.status, status);
            assert_eq!(outcome.polls, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_is_soft() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::GET, NODE_PATH, node("started"));

        let waiter = NodeWaiter::new(transport.client())
            .with_poll_interval(Duration::from_secs(5))
            .with_max_polls(100);
        let started = tokio::time::Instant::now();
        let outcome = waiter.wait(31).await.unwrap();

        assert!(!outcome.finished);
        assert_eq!(outcome.polls, 100);
        assert_eq!(outcome.status, "started");
        assert_eq!(transport.count(Method::GET, NODE_PATH), 100);
        assert_eq!(started.elapsed(), Duration::from_secs(5 * 99));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_polls_until_terminal() {
        let transport = ScriptedTransport::new();
        for _ in 0..150 {
            transport.reply(Method::GET, NODE_PATH, node("started"));
        }
        transport.reply(Method::GET, NODE_PATH, node("finishedSuccessfully"));

        let waiter = NodeWaiter::new(transport.client()).with_max_polls(0);
        let outcome = waiter.wait(31).await.unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.polls, 151);
    }

    #[tokio::test]
    async fn test_missing_node_is_vacuously_finished() {
        let transport = ScriptedTransport::new();
        let waiter = NodeWaiter::new(transport.client());

        let outcome = waiter
            .wait_for_node(&[summary(30, "PACS-retrieve")], "verify-registration")
            .await
            .unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.polls, 0);
        assert_eq!(outcome.plid, None);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_propagates() {
        let transport = ScriptedTransport::new();
        transport.fail(Method::GET, NODE_PATH, 502);

        let waiter = NodeWaiter::new(transport.client());
        assert!(waiter.wait(31).await.is_err());
    }
}
