//! Background polling of a launched workflow to a terminal verdict.

use std::sync::Arc;
use std::time::Duration;

use dypx_client::{CubeClient, JobCounters};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::launcher::WorkflowHandle;
use crate::notify::{NotificationKind, NotificationRequest, Notifier, SearchContext};

/// Default seconds between job-counter polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Terminal state of a monitored workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "detail", rename_all = "snake_case")]
pub enum Verdict {
    /// Every expected job finished and none errored.
    Success,
    /// At least one job errored.
    Failure,
    /// Fewer jobs exist than were launched.
    Tampered,
    /// A status fetch failed after the transport's retries.
    Unreachable(String),
    /// The monitor was cancelled before a verdict.
    Cancelled,
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success)
    }

    /// Notification owed for this verdict, if any.
    pub fn notification(&self) -> Option<NotificationKind> {
        match self {
            Verdict::Failure => Some(NotificationKind::Failure),
            Verdict::Tampered => Some(NotificationKind::Tampered),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Success => write!(f, "success"),
            Verdict::Failure => write!(f, "failure"),
            Verdict::Tampered => write!(f, "tampered"),
            Verdict::Unreachable(reason) => write!(f, "unreachable ({reason})"),
            Verdict::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Classify one snapshot; `None` means keep polling.
///
/// Checked in order: errored jobs, finished jobs, missing jobs.
pub fn classify(counters: &JobCounters, expected: u64) -> Option<Verdict> {
    if counters.errored > 0 {
        Some(Verdict::Failure)
    } else if counters.finished >= expected {
        Some(Verdict::Success)
    } else if counters.total_observed() < expected {
        Some(Verdict::Tampered)
    } else {
        None
    }
}

/// A workflow to monitor plus the context its notifications carry.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorTarget {
    pub handle: WorkflowHandle,
    pub search: SearchContext,
    pub recipients: Option<String>,
    pub smtp_server: Option<String>,
}

impl MonitorTarget {
    pub fn new(handle: WorkflowHandle) -> Self {
        Self {
            handle,
            search: SearchContext::new(),
            recipients: None,
            smtp_server: None,
        }
    }

    fn notification(&self, kind: NotificationKind) -> NotificationRequest {
        NotificationRequest {
            kind,
            workflow_id: self.handle.workflow_id,
            previous_instance_id: self.handle.previous_instance_id,
            search: self.search.clone(),
            recipients: self.recipients.clone(),
            smtp_server: self.smtp_server.clone(),
        }
    }
}

/// What a finished monitor observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorOutcome {
    pub workflow_id: i64,
    pub verdict: Verdict,
    /// Status fetches made.
    pub polls: u32,
    pub last_counters: Option<JobCounters>,
    /// Id of the notification instance, when one was sent.
    pub notification_id: Option<i64>,
}

/// Polls a workflow's job counters until a verdict fires.
///
/// There is no wall-clock limit; only a verdict or cancellation ends the
/// loop.
#[derive(Clone)]
pub struct WorkflowMonitor {
    client: CubeClient,
    notifier: Option<Arc<dyn Notifier>>,
    poll_interval: Duration,
    notify_on_success: bool,
}

impl WorkflowMonitor {
    pub fn new(client: CubeClient) -> Self {
        Self {
            client,
            notifier: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            notify_on_success: false,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn notify_on_success(mut self, enabled: bool) -> Self {
        self.notify_on_success = enabled;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poll `target` until a verdict, then send any notification it owes.
    pub async fn watch(&self, target: &MonitorTarget, cancel: &CancellationToken) -> MonitorOutcome {
        let workflow_id = target.handle.workflow_id;
        let expected = target.handle.expected_job_count;
        let workflows = self.client.workflows();

        let mut polls = 0u32;
        let mut last_counters = None;

        let verdict = loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = workflows.status(workflow_id) => Some(result),
            };
            let Some(fetched) = fetched else {
                break Verdict::Cancelled;
            };
            polls += 1;

            match fetched {
                Ok(counters) => {
                    debug!(
                        workflow_id,
                        poll = polls,
                        finished = counters.finished,
                        errored = counters.errored,
                        total = counters.total_observed(),
                        expected,
                        "Workflow status"
                    );
                    last_counters = Some(counters);
                    if let Some(verdict) = classify(&counters, expected) {
                        break verdict;
                    }
                }
                Err(err) => break Verdict::Unreachable(err.to_string()),
            }

            let cancelled = tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(self.poll_interval) => false,
            };
            if cancelled {
                break Verdict::Cancelled;
            }
        };

        match &verdict {
            Verdict::Success => info!(workflow_id, polls, "Pipeline complete"),
            Verdict::Cancelled => warn!(workflow_id, polls, "Workflow monitor cancelled"),
            other => error!(workflow_id, polls, verdict = %other, "Pipeline did not complete"),
        }

        let kind = match verdict.notification() {
            Some(kind) => Some(kind),
            None if verdict.is_success() && self.notify_on_success => {
                Some(NotificationKind::Completed)
            }
            None => None,
        };
        let notification_id = match kind {
            Some(kind) => self.send(target, kind).await,
            None => None,
        };

        MonitorOutcome {
            workflow_id,
            verdict,
            polls,
            last_counters,
            notification_id,
        }
    }

    /// Notification failures are logged and never replace the verdict.
    async fn send(&self, target: &MonitorTarget, kind: NotificationKind) -> Option<i64> {
        let notifier = self.notifier.as_ref()?;
        match notifier.notify(&target.notification(kind)).await {
            Ok(id) => Some(id),
            Err(err) => {
                error!(
                    workflow_id = target.handle.workflow_id,
                    error = %err,
                    "Error occurred while creating notification instance"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingNotifier, ScriptedTransport, records};
    use dypx_client::Method;
    use serde_json::json;

    const STATUS_PATH: &str = "pipelines/workflows/5/";

    fn counters(finished: u64, errored: u64, started: u64) -> JobCounters {
        JobCounters {
            finished,
            errored,
            started,
            ..Default::default()
        }
    }

    fn snapshot(finished: u64, errored: u64, started: u64) -> dypx_client::ParsedResult {
        records(vec![json!({
            "id": 5,
            "finished_jobs": finished,
            "errored_jobs": errored,
            "started_jobs": started,
        })])
    }

    fn target(expected: u64) -> MonitorTarget {
        MonitorTarget::new(WorkflowHandle {
            workflow_id: 5,
            previous_instance_id: 40,
            expected_job_count: expected,
        })
    }

    #[test]
    fn test_classify_precedence() {
        assert_eq!(classify(&counters(3, 1, 0), 3), Some(Verdict::Failure));
        assert_eq!(classify(&counters(3, 0, 0), 3), Some(Verdict::Success));
        assert_eq!(classify(&counters(1, 0, 0), 3), Some(Verdict::Tampered));
        assert_eq!(classify(&counters(1, 0, 2), 3), None);
        assert_eq!(classify(&counters(4, 0, 0), 3), Some(Verdict::Success));
    }

    #[test]
    fn test_notification_mapping() {
        assert_eq!(Verdict::Failure.notification(), Some(NotificationKind::Failure));
        assert_eq!(Verdict::Tampered.notification(), Some(NotificationKind::Tampered));
        assert_eq!(Verdict::Success.notification(), None);
        assert_eq!(Verdict::Unreachable("x".into()).notification(), None);
        assert_eq!(Verdict::Cancelled.notification(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_fourth_poll() {
        let transport = ScriptedTransport::new();
        for finished in 0..=3 {
            transport.reply(Method::GET, STATUS_PATH, snapshot(finished, 0, 3 - finished));
        }
        let notifier = RecordingNotifier::new();
        let monitor = WorkflowMonitor::new(transport.client()).with_notifier(notifier.clone());

        let started = tokio::time::Instant::now();
        let outcome = monitor.watch(&target(3), &CancellationToken::new()).await;

        assert_eq!(outcome.verdict, Verdict::Success);
        assert_eq!(outcome.polls, 4);
        assert_eq!(transport.count(Method::GET, STATUS_PATH), 4);
        assert_eq!(started.elapsed(), DEFAULT_POLL_INTERVAL * 3);
        assert!(notifier.sent().is_empty());
        assert_eq!(outcome.notification_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_immediately_and_notifies() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::GET, STATUS_PATH, snapshot(0, 1, 2));
        let notifier = RecordingNotifier::new();
        let monitor = WorkflowMonitor::new(transport.client()).with_notifier(notifier.clone());

        let mut target = target(3);
        target.search.insert("PatientID".into(), "123".into());
        let outcome = monitor.watch(&target, &CancellationToken::new()).await;

        assert_eq!(outcome.verdict, Verdict::Failure);
        assert_eq!(outcome.polls, 1);
        assert_eq!(transport.count(Method::GET, STATUS_PATH), 1);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Failure);
        assert_eq!(sent[0].previous_instance_id, 40);
        assert_eq!(sent[0].search.get("PatientID").map(String::as_str), Some("123"));
        assert_eq!(outcome.notification_id, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_beats_success_in_same_snapshot() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::GET, STATUS_PATH, snapshot(3, 1, 0));
        let monitor = WorkflowMonitor::new(transport.client());

        let outcome = monitor.watch(&target(3), &CancellationToken::new()).await;
        assert_eq!(outcome.verdict, Verdict::Failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tampered_notifies() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::GET, STATUS_PATH, snapshot(0, 0, 3));
        transport.reply(Method::GET, STATUS_PATH, snapshot(0, 0, 1));
        let notifier = RecordingNotifier::new();
        let monitor = WorkflowMonitor::new(transport.client()).with_notifier(notifier.clone());

        let outcome = monitor.watch(&target(3), &CancellationToken::new()).await;
        assert_eq!(outcome.verdict, Verdict::Tampered);
        assert_eq!(outcome.polls, 2);
        assert_eq!(notifier.sent()[0].kind, NotificationKind::Tampered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_ends_loop_without_notice() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::GET, STATUS_PATH, snapshot(0, 0, 3));
        transport.fail(Method::GET, STATUS_PATH, 503);
        let notifier = RecordingNotifier::new();
        let monitor = WorkflowMonitor::new(transport.client()).with_notifier(notifier.clone());

        let outcome = monitor.watch(&target(3), &CancellationToken::new()).await;
        assert!(matches!(outcome.verdict, Verdict::Unreachable(_)));
        assert_eq!(outcome.polls, 2);
        assert_eq!(outcome.last_counters, Some(counters(0, 0, 3)));
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifier_error_keeps_verdict() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::GET, STATUS_PATH, snapshot(0, 2, 1));
        let notifier = RecordingNotifier::failing();
        let monitor = WorkflowMonitor::new(transport.client()).with_notifier(notifier.clone());

        let outcome = monitor.watch(&target(3), &CancellationToken::new()).await;
        assert_eq!(outcome.verdict, Verdict::Failure);
        assert_eq!(outcome.notification_id, None);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_notice_is_opt_in() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::GET, STATUS_PATH, snapshot(3, 0, 0));
        let notifier = RecordingNotifier::new();
        let monitor = WorkflowMonitor::new(transport.client())
            .with_notifier(notifier.clone())
            .notify_on_success(true);

        let outcome = monitor.watch(&target(3), &CancellationToken::new()).await;
        assert!(outcome.verdict.is_success());
        assert_eq!(notifier.sent()[0].kind, NotificationKind::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let transport = ScriptedTransport::new();
        transport.reply(Method::GET, STATUS_PATH, snapshot(0, 0, 3));
        let notifier = RecordingNotifier::new();
        let monitor = WorkflowMonitor::new(transport.client()).with_notifier(notifier.clone());
        let cancel = CancellationToken::new();

        let task = {
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.watch(&target(3), &cancel).await })
        };
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2 + Duration::from_secs(1)).await;
        cancel.cancel();

        let outcome = task.await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Cancelled);
        assert_eq!(outcome.polls, 3);
        assert!(notifier.sent().is_empty());
    }
}
