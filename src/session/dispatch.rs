//! Per-session serial execution context for completion callbacks

use std::panic::AssertUnwindSafe;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::Result;

/// A completion invocation waiting to run
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs one at a time, in submission order, on a dedicated thread
///
/// The thread exits once every sender is gone and the queue is drained.
pub(crate) struct CallbackQueue {
    sender: mpsc::UnboundedSender<Job>,
}

impl CallbackQueue {
    /// Start the worker thread
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub(crate) fn spawn(label: &str) -> Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let name = format!("tapedeck-{label}");
        let thread_name = name.clone();

        thread::Builder::new().name(thread_name).spawn(move || {
            while let Some(job) = receiver.blocking_recv() {
                if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("Completion callback panicked on {}", name);
                }
            }
            debug!("Callback queue {} drained", name);
        })?;

        Ok(Self { sender })
    }

    /// Queue a job, handing it back if the worker is gone
    pub(crate) fn submit(&self, job: Job) -> std::result::Result<(), Job> {
        self.sender.send(job).map_err(|rejected| rejected.0)
    }
}
