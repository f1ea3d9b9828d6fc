//! Scripted transport shared by the unit tests in this module tree.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Method;

use crate::llm::transport::{HttpReply, HttpTransport, RequestContext, TransportError};

type Reply = Result<HttpReply, TransportError>;

struct Route {
    method: Method,
    path_suffix: String,
    replies: VecDeque<Reply>,
}

/// Transport that answers from pre-recorded replies.
///
/// Replies are consumed in order; the last one repeats forever so a
/// permanently failing endpoint needs a single entry. Routes are matched by
/// method and path suffix (query string ignored), later routes taking
/// precedence; the fallback script is used when no route matches.
pub(crate) struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    fallback: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RequestContext>>,
}

impl ScriptedTransport {
    pub(crate) fn sequence(replies: Vec<Reply>) -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            fallback: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(reply: HttpReply) -> Self {
        Self::sequence(vec![Ok(reply)])
    }

    pub(crate) fn routed() -> Self {
        Self::sequence(Vec::new())
    }

    pub(crate) fn on(self, method: Method, path_suffix: &str, replies: Vec<Reply>) -> Self {
        self.routes.lock().unwrap().insert(0, Route {
            method,
            path_suffix: path_suffix.to_string(),
            replies: replies.into(),
        });
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<RequestContext> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests whose label equals `label`.
    pub(crate) fn calls_labelled(&self, label: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.label == label)
            .count()
    }

    fn next(queue: &mut VecDeque<Reply>) -> Reply {
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(TransportError("no scripted reply".to_string())))
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &RequestContext) -> Result<HttpReply, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        let path = request.url.split('?').next().unwrap_or_default();
        let mut routes = self.routes.lock().unwrap();
        if let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == request.method && path.ends_with(&r.path_suffix))
        {
            return Self::next(&mut route.replies);
        }
        drop(routes);

        Self::next(&mut self.fallback.lock().unwrap())
    }
}

/// A `200 OK` reply carrying `body` serialized as JSON.
pub(crate) fn ok_json(body: serde_json::Value) -> Reply {
    Ok(HttpReply::new(200, body.to_string()))
}
