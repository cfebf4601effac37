//! Tapedeck - deterministic HTTP record-replay sessions
//!
//! Requests issued through a [`Session`] are answered from a cassette on
//! disk when one exists, or performed live and captured into a new cassette
//! when recording is allowed.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod cassette;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod interaction;
pub mod session;
pub mod storage;
pub mod transport;

pub use cassette::Cassette;
pub use config::{SessionConfig, StorageFormat};
pub use error::{Result, TapedeckError, TaskError};
pub use interaction::{Interaction, Request, Response};
pub use session::{RequestTask, Resolution, Session, SessionBuilder, SessionMode, TaskState};
