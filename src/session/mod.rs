//! Sessions and the request tasks they hand out
//!
//! A [`Session`] loads its cassette once, at build time. Requests resolved
//! while a cassette is loaded are played back in recorded order; requests
//! resolved without one are performed live (when allowed) and captured into
//! a new cassette that is saved once the session goes idle, or when an
//! explicit recording block ends.

mod dispatch;
mod engine;
mod task;

pub use engine::{CassetteSaved, Resolution, SaveObserver, Session, SessionBuilder, SessionMode};
pub use task::{Completion, DownloadedFile, RequestTask, TaskState};
