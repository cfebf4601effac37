//! Request tasks: a suspended request that resolves through its session

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use super::engine::{Resolution, Session, SessionInner};
use crate::interaction::{Interaction, Request, Response};
use crate::TaskError;

/// Invoked exactly once with the outcome of a task
pub type Completion = Box<dyn FnOnce(Result<Response, TaskError>) + Send + 'static>;

/// Lifecycle of a [`RequestTask`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Created, or resumed but not yet resolved
    Pending,
    /// Answered from the cassette
    Played,
    /// Performed live and captured
    Recorded,
    /// Terminated without a response
    Failed(TaskError),
}

impl TaskState {
    /// Whether the task has resolved
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

struct Outcome {
    state: TaskState,
    interaction: Option<Interaction>,
}

struct TaskInner {
    id: u64,
    request: Request,
    session: Weak<SessionInner>,
    runtime: Handle,
    completion: Mutex<Option<Completion>>,
    outcome: Mutex<Outcome>,
    resumed: AtomicBool,
}

/// A single request bound to the session that created it
///
/// Nothing happens until [`RequestTask::resume`] is called. The completion,
/// if any, runs on the session's callback queue, never on the caller's stack.
#[derive(Clone)]
pub struct RequestTask {
    inner: Arc<TaskInner>,
}

impl RequestTask {
    pub(crate) fn new(
        id: u64,
        request: Request,
        session: &Session,
        completion: Option<Completion>,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id,
                request,
                session: session.downgrade(),
                runtime: session.runtime().clone(),
                completion: Mutex::new(completion),
                outcome: Mutex::new(Outcome {
                    state: TaskState::Pending,
                    interaction: None,
                }),
                resumed: AtomicBool::new(false),
            }),
        }
    }

    /// Task identifier, unique within its session
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The request as it will be matched or recorded, default headers applied
    pub fn current_request(&self) -> &Request {
        &self.inner.request
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.inner.outcome().state.clone()
    }

    /// The interaction that answered this task, once resolved
    pub fn interaction(&self) -> Option<Interaction> {
        self.inner.outcome().interaction.clone()
    }

    /// The response that answered this task, once resolved
    pub fn response(&self) -> Option<Response> {
        self.inner
            .outcome()
            .interaction
            .as_ref()
            .map(|interaction| interaction.response().clone())
    }

    /// Start resolving; only the first call has any effect
    pub fn resume(&self) {
        if self.inner.resumed.swap(true, Ordering::AcqRel) {
            warn!("Task {} resumed more than once, ignoring", self.inner.id);
            return;
        }

        let task = Arc::clone(&self.inner);
        let Some(session) = Session::upgrade(&task.session) else {
            error!("Task {} outlived its session", task.id);
            task.settle(None, Resolution::Failed(TaskError::SessionClosed));
            return;
        };

        debug!(
            "Task {} resumed: {} {}",
            task.id, task.request.method, task.request.url
        );
        let tracked = session.track();
        let runtime = session.runtime().clone();
        runtime.spawn(async move {
            let resolution = session.resolve_tracked(&task.request).await;
            session.finish(tracked).await;
            task.settle(Some(&session), resolution);
        });
    }

    /// Cancellation is not supported; the task runs to completion
    pub fn cancel(&self) {
        debug!("Task {}: cancel ignored", self.inner.id);
    }
}

impl TaskInner {
    fn outcome(&self) -> std::sync::MutexGuard<'_, Outcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, session: Option<&Session>, resolution: Resolution) {
        {
            let mut outcome = self.outcome();
            outcome.interaction = resolution.interaction().cloned();
            outcome.state = match &resolution {
                Resolution::Played(_) => TaskState::Played,
                Resolution::Recorded(_) => TaskState::Recorded,
                Resolution::Failed(err) => TaskState::Failed(err.clone()),
            };
        }

        let Some(completion) = self
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let result = resolution.into_result();
        let job = Box::new(move || completion(result));
        match session {
            Some(session) => session.dispatch(job),
            None => {
                self.runtime.spawn_blocking(job);
            }
        }
    }
}

/// A response whose body was written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    /// Location of the body; the caller owns the file
    pub path: PathBuf,
    /// The response, body included
    pub response: Response,
}

impl DownloadedFile {
    pub(crate) fn store(response: Response) -> Result<Self, TaskError> {
        let failed = |err: std::io::Error| TaskError::DownloadFailed(err.to_string());

        let mut file = tempfile::Builder::new()
            .prefix("tapedeck-download-")
            .tempfile()
            .map_err(failed)?;
        file.write_all(response.body.as_deref().unwrap_or_default())
            .map_err(failed)?;
        file.flush().map_err(failed)?;

        let (_, path) = file.keep().map_err(|err| failed(err.error))?;
        Ok(Self { path, response })
    }
}
