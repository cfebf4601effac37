//! Transports that never touch the network

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, warn};

use super::Transport;
use crate::interaction::{Request, Response};
use crate::{Result, TapedeckError};

enum Scripted {
    Respond(Response),
    Fail(String),
}

#[derive(Default)]
struct Script {
    steps: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<Request>>,
    calls: AtomicUsize,
}

/// Answers requests from a queue of canned outcomes, in order
///
/// Clones share the queue and the call log, so a test can keep one handle
/// while the session owns another.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Script>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    /// Create a transport with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response
    #[must_use]
    pub fn respond(self, response: Response) -> Self {
        self.push(Scripted::Respond(response));
        self
    }

    /// Queue a failure that yields no response
    #[must_use]
    pub fn fail(self, reason: impl Into<String>) -> Self {
        self.push(Scripted::Fail(reason.into()));
        self
    }

    /// Sleep before answering each request
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of requests performed so far
    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// Requests performed so far, in arrival order
    pub fn requests(&self) -> Vec<Request> {
        self.script
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, step: Scripted) {
        self.script
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
    }
}

impl Transport for ScriptedTransport {
    fn perform(&self, request: Request) -> BoxFuture<'static, Result<Response>> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        debug!("Scripted transport: {} {}", request.method, request.url);

        let step = self
            .script
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        self.script
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let delay = self.delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            match step {
                Some(Scripted::Respond(response)) => Ok(response),
                Some(Scripted::Fail(reason)) => Err(TapedeckError::Transport(reason)),
                None => {
                    warn!("Scripted transport exhausted");
                    Err(TapedeckError::Transport("script exhausted".to_string()))
                }
            }
        }
        .boxed()
    }
}

/// Refuses every request; for sessions that must never reach the network
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineTransport;

impl Transport for OfflineTransport {
    fn perform(&self, request: Request) -> BoxFuture<'static, Result<Response>> {
        warn!(
            "Offline transport refused {} {}",
            request.method, request.url
        );
        let reason = format!(
            "network access disabled: {} {}",
            request.method, request.url
        );
        async move { Err(TapedeckError::Transport(reason)) }.boxed()
    }
}
