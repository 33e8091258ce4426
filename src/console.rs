//! Caller ids read line by line, for running the filter without a SIP stack.
//!
//! Each non-blank line becomes one [`ConsoleSession`] whose actions are only
//! logged.

use crate::error::SessionError;
use crate::session::CallSession;
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct ConsoleSession {
    caller: String,
}

impl ConsoleSession {
    pub fn new(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
        }
    }
}

#[async_trait]
impl CallSession for ConsoleSession {
    fn caller_id(&self) -> Option<&str> {
        Some(self.caller.as_str())
    }

    async fn progress(&self) -> Result<(), SessionError> {
        log::info!("Console: ringing {}", self.caller);
        Ok(())
    }

    async fn answer(&self) -> Result<(), SessionError> {
        log::info!("Console: answered {}", self.caller);
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        log::info!("Console: hung up on {}", self.caller);
        Ok(())
    }
}

/// Turn each line of `reader` into a call on `calls`. Blank lines and `#`
/// comments are skipped. Returns the number of calls sent once the input ends
/// or the receiver goes away.
pub async fn feed_lines<R>(reader: R, calls: mpsc::Sender<ConsoleSession>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut sent = 0;
    while let Some(line) = lines.next_line().await? {
        let caller = line.trim();
        if caller.is_empty() || caller.starts_with('#') {
            continue;
        }
        if calls.send(ConsoleSession::new(caller)).await.is_err() {
            log::debug!("Call receiver closed, stopping console feed");
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

/// Feed calls from standard input until it closes.
pub fn spawn_stdin_feed(calls: mpsc::Sender<ConsoleSession>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        match feed_lines(stdin, calls).await {
            Ok(sent) => log::info!("Standard input closed after {} calls", sent),
            Err(e) => log::error!("Error reading standard input: {}", e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_skips_blank_and_comment_lines() {
        let input: &[u8] = b"07911123456\n\n  # comment\n  +15551234567  \r\n";
        let (tx, mut rx) = mpsc::channel(8);

        let sent = feed_lines(input, tx).await.unwrap();
        assert_eq!(sent, 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.caller_id(), Some("07911123456"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.caller_id(), Some("+15551234567"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_feed_stops_when_receiver_dropped() {
        let input: &[u8] = b"+1\n+2\n+3\n";
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        assert_eq!(feed_lines(input, tx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_console_actions_succeed() {
        let session = ConsoleSession::new("+441234567");
        assert!(session.progress().await.is_ok());
        assert!(session.answer().await.is_ok());
        assert!(session.close().await.is_ok());
    }
}
