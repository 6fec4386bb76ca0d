//! Scripted transport for exercising the push pipeline without a server

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::transport::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};

type Reply = Result<HttpResponse, TransportError>;

struct Rule {
    method: HttpMethod,
    url_suffix: String,
    replies: VecDeque<Reply>,
}

/// Replies with queued responses matched by method and URL suffix; anything
/// unmatched echoes the request body back with a 200
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    rules: Mutex<Vec<Rule>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for the next matching request
    pub(crate) fn reply(&self, method: HttpMethod, url_suffix: &str, reply: Reply) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules
            .iter_mut()
            .find(|rule| rule.method == method && rule.url_suffix == url_suffix)
        {
            rule.replies.push_back(reply);
            return;
        }
        rules.push(Rule {
            method,
            url_suffix: url_suffix.to_string(),
            replies: VecDeque::from([reply]),
        });
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        let scripted = self
            .rules
            .lock()
            .unwrap()
            .iter_mut()
            .find(|rule| {
                rule.method == request.method
                    && request.url.ends_with(&rule.url_suffix)
                    && !rule.replies.is_empty()
            })
            .and_then(|rule| rule.replies.pop_front());

        scripted.unwrap_or_else(|| {
            Ok(HttpResponse::new(
                200,
                request.body.unwrap_or_else(|| "{}".to_string()),
            ))
        })
    }
}
