//! Boundary to the signaling library.
//!
//! The filter never speaks SIP itself. Whatever accepts the inbound call hands
//! over a [`CallSession`]; the filter only reads the caller id and, for
//! blocked callers, drives the three actions below.

use crate::error::SessionError;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait CallSession: Send + Sync {
    /// The user part of the caller's address, as received.
    fn caller_id(&self) -> Option<&str>;

    /// Signal call progress (ringing) to the caller.
    async fn progress(&self) -> Result<(), SessionError>;

    /// Answer the call.
    async fn answer(&self) -> Result<(), SessionError>;

    /// Hang up.
    async fn close(&self) -> Result<(), SessionError>;
}

/// Source of the tarpit delays, swapped out in tests so no wall-clock time
/// passes.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
