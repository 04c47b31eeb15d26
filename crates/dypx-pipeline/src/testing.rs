//! Scripted in-process transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dypx_client::{CubeClient, Error, Method, ParsedResult, Record, Request, Result, Transport};
use serde_json::Value;

use crate::error::PipelineError;
use crate::notify::{NotificationRequest, Notifier};

/// A canned response.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Body(ParsedResult),
    Status(u16),
}

/// Transport answering from per-endpoint reply queues.
///
/// Each endpoint pops its queue in order; the last reply repeats forever.
/// Unscripted endpoints answer 404.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    log: Mutex<Vec<Request>>,
}

fn key(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn client(self: &Arc<Self>) -> CubeClient {
        CubeClient::from_transport(self.clone())
    }

    pub(crate) fn reply(&self, method: Method, path: &str, body: ParsedResult) {
        self.push(method, path, Reply::Body(body));
    }

    pub(crate) fn fail(&self, method: Method, path: &str, status: u16) {
        self.push(method, path, Reply::Status(status));
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry(key(&method, path))
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, method: Method, path: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(&self, request: &Request) -> Result<ParsedResult> {
        self.log.lock().unwrap().push(request.clone());

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            routes
                .get_mut(&key(&request.method, &request.path))
                .and_then(|queue| {
                    if queue.len() > 1 {
                        queue.pop_front()
                    } else {
                        queue.front().cloned()
                    }
                })
        };

        match reply {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Status(status)) => Err(Error::Api {
                status,
                message: "scripted failure".to_string(),
            }),
            None => Err(Error::NotFound(request.path.clone())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Build a records result from JSON objects.
pub(crate) fn records(values: Vec<Value>) -> ParsedResult {
    ParsedResult::Records(
        values
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => map,
                other => panic!("record must be an object, got {other}"),
            })
            .collect::<Vec<Record>>(),
    )
}

/// Notifier that records requests instead of sending them.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<NotificationRequest>>,
    fail: bool,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub(crate) fn sent(&self) -> Vec<NotificationRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, request: &NotificationRequest) -> crate::error::Result<i64> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(request.clone());
        if self.fail {
            return Err(PipelineError::Notification("mail server down".to_string()));
        }
        Ok(sent.len() as i64)
    }
}
