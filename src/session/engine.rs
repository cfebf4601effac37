//! Session: owns the cassette, decides playback vs. recording, persists captures

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, error, info, warn};

use super::dispatch::{CallbackQueue, Job};
use super::task::{Completion, DownloadedFile, RequestTask};
use crate::cassette::Cassette;
use crate::config::SessionConfig;
use crate::fingerprint::MatchRules;
use crate::interaction::{Interaction, Request, Response};
use crate::storage::{open_store, CassetteStore};
use crate::transport::{HyperTransport, Transport};
use crate::{Result, TapedeckError, TaskError};

/// Called after every successful save of the captured cassette
pub type SaveObserver = Arc<dyn Fn(&CassetteSaved) + Send + Sync>;

/// Receipt for a persisted cassette
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CassetteSaved {
    /// Cassette name
    pub name: String,
    /// Number of interactions written
    pub interactions: usize,
}

/// How a single request was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Answered from the loaded cassette
    Played(Interaction),
    /// Performed live and captured
    Recorded(Interaction),
    /// No response could be produced
    Failed(TaskError),
}

impl Resolution {
    /// The interaction behind this resolution, if any
    pub fn interaction(&self) -> Option<&Interaction> {
        match self {
            Self::Played(interaction) | Self::Recorded(interaction) => Some(interaction),
            Self::Failed(_) => None,
        }
    }

    /// Collapse into what a completion receives
    ///
    /// # Errors
    ///
    /// Returns the task error for failed resolutions
    pub fn into_result(self) -> std::result::Result<Response, TaskError> {
        match self {
            Self::Played(interaction) | Self::Recorded(interaction) => {
                Ok(interaction.response().clone())
            }
            Self::Failed(err) => Err(err),
        }
    }
}

/// What the session is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// No cassette was loaded and nothing is in flight
    NoCassette,
    /// A cassette was loaded; requests are answered from it
    Playback,
    /// Live calls are in flight
    Recording,
}

/// Builder for [`Session`]
pub struct SessionBuilder {
    config: SessionConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn CassetteStore>>,
    observer: Option<SaveObserver>,
}

impl SessionBuilder {
    /// Use `transport` for live calls instead of the default hyper client
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Load and save cassettes through `store` instead of the configured directory
    #[must_use]
    pub fn store(mut self, store: impl CassetteStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Share an already boxed store
    #[must_use]
    pub fn shared_store(mut self, store: Arc<dyn CassetteStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Observe successful saves
    #[must_use]
    pub fn on_cassette_saved(
        mut self,
        observer: impl Fn(&CassetteSaved) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Validate the configuration and load the cassette, if one exists
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, no tokio runtime is
    /// running, the stored cassette cannot be read, or the callback thread
    /// cannot be started
    pub fn build(self) -> Result<Session> {
        self.config.validate()?;

        let runtime = Handle::try_current().map_err(|_| {
            TapedeckError::ConfigError("a session must be built inside a tokio runtime".to_string())
        })?;

        let store = self
            .store
            .unwrap_or_else(|| open_store(self.config.format, self.config.cassette_dir.clone()));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HyperTransport::new()));

        let name = self.config.cassette_name.clone();
        let cassette = store
            .load(&name)?
            .map(|interactions| Cassette::from_interactions(name.clone(), interactions));

        match &cassette {
            Some(cassette) => info!(
                "Session {}: playback of {} interactions",
                name,
                cassette.len()
            ),
            None if self.config.recording_enabled => {
                info!("Session {}: no cassette, recording enabled", name);
            }
            None => warn!("Session {}: no cassette and recording disabled", name),
        }

        let callbacks = CallbackQueue::spawn(&name)?;

        Ok(Session {
            inner: Arc::new(SessionInner {
                rules: self.config.match_rules(),
                config: self.config,
                transport,
                store,
                observer: self.observer,
                runtime,
                callbacks,
                state: Mutex::new(SessionState {
                    cassette,
                    captured: None,
                    recording_block: false,
                    needs_persistence: false,
                }),
                outstanding: AtomicUsize::new(0),
                idle: Notify::new(),
                next_task_id: AtomicU64::new(1),
            }),
        })
    }
}

struct SessionState {
    /// Loaded at build; the only cassette consulted for matching
    cassette: Option<Cassette>,
    /// Live captures, created on first append
    captured: Option<Cassette>,
    recording_block: bool,
    needs_persistence: bool,
}

pub(crate) struct SessionInner {
    config: SessionConfig,
    rules: MatchRules,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CassetteStore>,
    observer: Option<SaveObserver>,
    runtime: Handle,
    callbacks: CallbackQueue,
    state: Mutex<SessionState>,
    outstanding: AtomicUsize,
    idle: Notify,
    next_task_id: AtomicU64,
}

/// Counts a resumed request until it has fully resolved
///
/// Dropping the last one wakes [`Session::wait_idle`], including when the
/// resolving future is abandoned.
pub(crate) struct Outstanding {
    inner: Arc<SessionInner>,
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// A record/replay session bound to one cassette
///
/// Cheap to clone; clones share the same cassette and state. Tasks created by
/// the session hold only a weak reference to it.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start building a session for `config`
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            transport: None,
            store: None,
            observer: None,
        }
    }

    /// Build a session with the default transport and store
    ///
    /// # Errors
    ///
    /// See [`SessionBuilder::build`]
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<SessionInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Cassette name
    pub fn name(&self) -> &str {
        &self.inner.config.cassette_name
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Whether a missing cassette may be recorded
    pub fn recording_enabled(&self) -> bool {
        self.inner.config.recording_enabled
    }

    /// Whether a cassette was loaded at build
    pub async fn has_cassette(&self) -> bool {
        self.inner.state.lock().await.cassette.is_some()
    }

    /// Recorded interactions not yet played back
    pub async fn remaining(&self) -> usize {
        self.inner
            .state
            .lock()
            .await
            .cassette
            .as_ref()
            .map_or(0, Cassette::remaining)
    }

    /// Interactions captured live so far, in capture order
    pub async fn captured(&self) -> Vec<Interaction> {
        self.inner
            .state
            .lock()
            .await
            .captured
            .as_ref()
            .map(|cassette| cassette.interactions().to_vec())
            .unwrap_or_default()
    }

    /// Current mode
    pub async fn mode(&self) -> SessionMode {
        let state = self.inner.state.lock().await;
        if state.cassette.is_some() {
            SessionMode::Playback
        } else if state.recording_block || self.inner.outstanding.load(Ordering::SeqCst) > 0 {
            SessionMode::Recording
        } else {
            SessionMode::NoCassette
        }
    }

    /// Whether the session is in [`SessionMode::Recording`]
    pub async fn is_recording(&self) -> bool {
        self.mode().await == SessionMode::Recording
    }

    /// Open a recording block; captures are held until [`Session::end_recording`]
    pub async fn begin_recording(&self) {
        let mut state = self.inner.state.lock().await;
        if state.recording_block {
            debug!("Session {}: recording block already open", self.name());
        }
        state.recording_block = true;
    }

    /// Close the recording block and persist what was captured
    ///
    /// Waits for in-flight live calls first. Returns `None` when there was
    /// nothing new to save.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails to save the cassette
    pub async fn end_recording(&self) -> Result<Option<CassetteSaved>> {
        self.wait_idle().await;

        let mut state = self.inner.state.lock().await;
        state.recording_block = false;
        self.persist(&mut state)
    }

    /// Resolve once every resumed task has resolved
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Create an unstarted task for `request`
    pub fn data_task(&self, request: Request) -> RequestTask {
        self.make_task(request, None)
    }

    /// Create an unstarted task whose completion runs on the session's callback queue
    pub fn data_task_with(
        &self,
        request: Request,
        completion: impl FnOnce(std::result::Result<Response, TaskError>) + Send + 'static,
    ) -> RequestTask {
        self.make_task(request, Some(Box::new(completion)))
    }

    /// Like [`Session::data_task_with`], but the body is written to a kept temporary file
    pub fn download_task_with(
        &self,
        request: Request,
        completion: impl FnOnce(std::result::Result<DownloadedFile, TaskError>) + Send + 'static,
    ) -> RequestTask {
        self.data_task_with(request, move |result| {
            completion(result.and_then(DownloadedFile::store));
        })
    }

    /// Resolve `request` through a task and wait for its completion
    ///
    /// # Errors
    ///
    /// Returns the task error delivered to the completion
    pub async fn send(&self, request: Request) -> std::result::Result<Response, TaskError> {
        let (tx, rx) = oneshot::channel();
        let task = self.data_task_with(request, move |result| {
            let _ = tx.send(result);
        });
        task.resume();
        rx.await.unwrap_or(Err(TaskError::SessionClosed))
    }

    fn make_task(&self, request: Request, completion: Option<Completion>) -> RequestTask {
        let id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
        RequestTask::new(id, self.with_default_headers(request), self, completion)
    }

    fn with_default_headers(&self, mut request: Request) -> Request {
        for (name, value) in &self.inner.config.default_headers {
            if request.header(name).is_none() {
                request.set_header(name.clone(), value.clone());
            }
        }
        request
    }

    /// Run a completion on the callback queue
    pub(crate) fn dispatch(&self, job: Job) {
        if let Err(job) = self.inner.callbacks.submit(job) {
            warn!("Session {}: callback queue closed, completing on runtime", self.name());
            self.inner.runtime.spawn_blocking(job);
        }
    }

    pub(crate) fn track(&self) -> Outstanding {
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        Outstanding {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Decide how `request` is answered, performing a live call if needed
    ///
    /// Captures are saved before this returns when nothing else is in flight
    /// and no recording block is open.
    pub async fn resolve(&self, request: &Request) -> Resolution {
        let tracked = self.track();
        let resolution = self.resolve_tracked(request).await;
        self.finish(tracked).await;
        resolution
    }

    pub(crate) async fn resolve_tracked(&self, request: &Request) -> Resolution {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;

        if let Some(cassette) = state.cassette.as_mut() {
            return match cassette.match_request(request, &inner.rules) {
                Some(interaction) => {
                    debug!("Session {}: played {} {}", self.name(), request.method, request.url);
                    Resolution::Played(interaction)
                }
                None => {
                    warn!(
                        "Session {}: no recorded interaction for {} {}",
                        self.name(),
                        request.method,
                        request.url
                    );
                    Resolution::Failed(TaskError::RequestNotFound)
                }
            };
        }

        if !inner.config.recording_enabled {
            warn!(
                "Session {}: refusing to record {} {}",
                self.name(),
                request.method,
                request.url
            );
            return Resolution::Failed(TaskError::RecordingDisabled);
        }
        drop(state);

        let live = inner
            .config
            .request_override
            .clone()
            .unwrap_or_else(|| request.clone());
        info!("Session {}: recording {} {}", self.name(), live.method, live.url);
        let outcome = inner.transport.perform(live).await;

        match outcome {
            Ok(response) => {
                let interaction = Interaction::from_exchange(request.clone(), response);
                let mut state = inner.state.lock().await;
                state
                    .captured
                    .get_or_insert_with(|| Cassette::new(self.name()))
                    .append(interaction.clone());
                state.needs_persistence = true;
                Resolution::Recorded(interaction)
            }
            Err(err) => {
                warn!("Session {}: no response to record: {}", self.name(), err);
                Resolution::Failed(TaskError::CannotRecordNoResponse(err.to_string()))
            }
        }
    }

    /// Release a resolved request and save if the session just went idle
    pub(crate) async fn finish(&self, tracked: Outstanding) {
        let mut state = self.inner.state.lock().await;
        drop(tracked);

        if !state.recording_block && self.inner.outstanding.load(Ordering::SeqCst) == 0 {
            if let Err(err) = self.persist(&mut state) {
                error!("Session {}: failed to save cassette: {}", self.name(), err);
            }
        }
    }

    fn persist(&self, state: &mut SessionState) -> Result<Option<CassetteSaved>> {
        if !state.needs_persistence {
            return Ok(None);
        }
        let Some(captured) = state.captured.as_ref() else {
            return Ok(None);
        };

        self.inner.store.save(self.name(), captured.interactions())?;
        state.needs_persistence = false;

        let saved = CassetteSaved {
            name: self.name().to_string(),
            interactions: captured.len(),
        };
        info!(
            "Session {}: saved {} interactions",
            saved.name, saved.interactions
        );

        if let Some(observer) = &self.inner.observer {
            if std::panic::catch_unwind(AssertUnwindSafe(|| observer(&saved))).is_err() {
                error!("Session {}: save observer panicked", saved.name);
            }
        }

        Ok(Some(saved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCassetteStore;
    use crate::transport::{OfflineTransport, ScriptedTransport};
    use std::time::Duration;

    fn recorded(url: &str, body: &str) -> Interaction {
        Interaction::new(
            Request::get(url),
            Response::new(200).with_body(body),
            None,
        )
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = Session::builder(SessionConfig::new("outside"))
            .store(MemoryCassetteStore::new())
            .build();

        assert!(matches!(result, Err(TapedeckError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_name() {
        let result = Session::builder(SessionConfig::new("../escape"))
            .store(MemoryCassetteStore::new())
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_playback_resolution() {
        let store = MemoryCassetteStore::new();
        store.insert("play", vec![recorded("http://a", "A")]);
        let session = Session::builder(SessionConfig::new("play"))
            .store(store)
            .transport(OfflineTransport)
            .build()
            .unwrap();

        assert_eq!(session.mode().await, SessionMode::Playback);

        let first = session.resolve(&Request::get("http://a")).await;
        assert!(matches!(first, Resolution::Played(_)));

        let second = session.resolve(&Request::get("http://a")).await;
        assert_eq!(second, Resolution::Failed(TaskError::RequestNotFound));
        assert_eq!(session.remaining().await, 0);
    }

    #[tokio::test]
    async fn test_recording_persists_when_idle() {
        let store = MemoryCassetteStore::new();
        let transport = ScriptedTransport::new().respond(Response::new(201));
        let session = Session::builder(SessionConfig::new("rec"))
            .store(store.clone())
            .transport(transport.clone())
            .build()
            .unwrap();

        assert_eq!(session.mode().await, SessionMode::NoCassette);

        let resolution = session.resolve(&Request::get("http://a")).await;
        assert!(matches!(resolution, Resolution::Recorded(_)));
        assert_eq!(transport.calls(), 1);
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.get("rec").unwrap().len(), 1);
        assert_eq!(session.captured().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_live_call_records_nothing() {
        let store = MemoryCassetteStore::new();
        let session = Session::builder(SessionConfig::new("fail"))
            .store(store.clone())
            .transport(ScriptedTransport::new().fail("connection refused"))
            .build()
            .unwrap();

        let resolution = session.resolve(&Request::get("http://a")).await;
        assert!(matches!(
            resolution,
            Resolution::Failed(TaskError::CannotRecordNoResponse(ref reason)) if reason.contains("connection refused")
        ));
        assert_eq!(store.save_count(), 0);
        assert!(session.captured().await.is_empty());
    }

    #[tokio::test]
    async fn test_recording_block_defers_save() {
        let store = MemoryCassetteStore::new();
        let saves = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&saves);
        let session = Session::builder(SessionConfig::new("block"))
            .store(store.clone())
            .transport(
                ScriptedTransport::new()
                    .respond(Response::new(200))
                    .respond(Response::new(200)),
            )
            .on_cassette_saved(move |_| {
                observed.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        session.begin_recording().await;
        assert!(session.is_recording().await);
        session.resolve(&Request::get("http://a")).await;
        session.resolve(&Request::get("http://b")).await;
        assert_eq!(store.save_count(), 0);

        let saved = session.end_recording().await.unwrap();
        assert_eq!(
            saved,
            Some(CassetteSaved {
                name: "block".to_string(),
                interactions: 2
            })
        );
        assert_eq!(saves.load(Ordering::SeqCst), 1);
        assert!(!session.is_recording().await);

        // Nothing new since the last save
        assert_eq!(session.end_recording().await.unwrap(), None);
        assert_eq!(saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mode_reports_recording_while_in_flight() {
        let session = Session::builder(SessionConfig::new("inflight"))
            .store(MemoryCassetteStore::new())
            .transport(
                ScriptedTransport::new()
                    .respond(Response::new(200))
                    .with_delay(Duration::from_millis(200)),
            )
            .build()
            .unwrap();

        let background = session.clone();
        let handle =
            tokio::spawn(async move { background.resolve(&Request::get("http://slow")).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.mode().await, SessionMode::Recording);

        handle.await.unwrap();
        session.wait_idle().await;
        assert_eq!(session.mode().await, SessionMode::NoCassette);
    }

    #[tokio::test]
    async fn test_default_headers_do_not_override() {
        let session = Session::builder(
            SessionConfig::new("defaults")
                .default_header("User-Agent", "tapedeck")
                .default_header("Accept", "*/*"),
        )
        .store(MemoryCassetteStore::new())
        .transport(OfflineTransport)
        .build()
        .unwrap();

        let task = session.data_task(Request::get("http://a").with_header("accept", "text/plain"));
        let request = task.current_request();

        assert_eq!(request.header("user-agent"), Some("tapedeck"));
        assert_eq!(request.header("Accept"), Some("text/plain"));
        assert_eq!(request.headers.len(), 2);
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_lose_the_response() {
        let store = MemoryCassetteStore::new();
        let session = Session::builder(SessionConfig::new("observer-panic"))
            .store(store.clone())
            .transport(
                ScriptedTransport::new()
                    .respond(Response::new(200))
                    .respond(Response::new(202)),
            )
            .on_cassette_saved(|_| panic!("observer failed"))
            .build()
            .unwrap();

        let (tx, rx) = oneshot::channel();
        session
            .data_task_with(Request::get("http://a"), move |result| {
                tx.send(result).unwrap();
            })
            .resume();

        assert_eq!(rx.await.unwrap().unwrap().status, 200);
        assert_eq!(store.save_count(), 1);

        // The session keeps working after the observer failed
        let resolution = session.resolve(&Request::get("http://b")).await;
        assert!(matches!(resolution, Resolution::Recorded(_)));
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.get("observer-panic").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shared_store_is_loaded_at_build() {
        let store = MemoryCassetteStore::new();
        store.insert("shared", vec![recorded("http://a", "A")]);
        let shared: Arc<dyn CassetteStore> = Arc::new(store.clone());

        let session = Session::builder(SessionConfig::new("shared"))
            .shared_store(Arc::clone(&shared))
            .transport(OfflineTransport)
            .build()
            .unwrap();
        assert!(session.has_cassette().await);

        let empty = Session::builder(SessionConfig::new("absent"))
            .shared_store(shared)
            .transport(OfflineTransport)
            .build()
            .unwrap();
        assert!(!empty.has_cassette().await);
    }
}
