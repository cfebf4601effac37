//! Transport collaborator: performs live requests while recording
//!
//! The engine only distinguishes "a response was obtained" (`Ok`, whatever
//! the status) from "no response was obtained" (`Err`). Retries and timeouts
//! belong to the transport.

mod client;
mod scripted;

use futures_util::future::BoxFuture;

pub use client::HyperTransport;
pub use scripted::{OfflineTransport, ScriptedTransport};

use crate::interaction::{Request, Response};
use crate::Result;

/// Performs a single live HTTP exchange
pub trait Transport: Send + Sync + 'static {
    /// Perform `request` and return the full response, body included
    fn perform(&self, request: Request) -> BoxFuture<'static, Result<Response>>;
}
