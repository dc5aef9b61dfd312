use std::io;

use async_trait::async_trait;
use thiserror::Error;

pub mod vcontrold;

#[cfg(test)]
pub mod fake;

/* === Definitions === */

/// Session-oriented access to the control daemon.
///
/// The daemon serves one stateful connection at a time, so a channel is only
/// ever driven by the queue's drain loop: `open` once, any number of reads
/// and writes, `close`. Implementations do not need to defend against
/// concurrent calls.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Establishes a session with the daemon.
    async fn open(&self) -> Result<(), ChannelError>;

    /// Executes a read command, returning the decoded value.
    async fn read_value(&self, target: &str) -> Result<f32, ChannelError>;

    /// Executes a write command and waits for the acknowledgement.
    async fn write_value(&self, target: &str, value: f32) -> Result<(), ChannelError>;

    /// Tears the session down.
    async fn close(&self) -> Result<(), ChannelError>;
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect to the control daemon: {0}")]
    Connect(#[source] io::Error),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("the control daemon closed the connection")]
    Closed,

    #[error("no open session")]
    NotConnected,

    #[error("timed out waiting for the control daemon")]
    Timeout,

    #[error("unparseable reply: {raw:?}")]
    Malformed { raw: String },

    #[error("the control daemon rejected the command: {message}")]
    Device { message: String },
}
