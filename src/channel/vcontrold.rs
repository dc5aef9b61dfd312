use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::Mutex,
    time::timeout,
};

use crate::config::VcontroldConfig;

use super::{ChannelError, CommandChannel};

/* === Definitions === */

/// The daemon terminates every reply with its prompt, which doubles as the
/// ready signal for the next command.
const PROMPT: &[u8] = b"vctrld>";

const READ_BUFFER_SIZE: usize = 1024;

/// TCP client for the vcontrold command socket.
///
/// The protocol is a plain telnet-style exchange: the daemon greets with a
/// prompt, each command is a single line, each reply is free text followed
/// by the next prompt. Command names are passed through verbatim, so the
/// channel works with whatever the daemon's XML configuration defines.
pub struct VcontroldChannel {
    addr: SocketAddr,
    connect_timeout: Duration,
    command_timeout: Duration,
    session: Mutex<Option<Session>>,
}

struct Session {
    stream: TcpStream,
    buf: BytesMut,
}

/* == Public API == */

impl VcontroldChannel {
    pub fn from_config(config: &VcontroldConfig) -> Self {
        Self {
            addr: SocketAddr::new(config.ip, config.port),
            connect_timeout: config.connect_timeout,
            command_timeout: config.command_timeout,
            session: Mutex::new(None),
        }
    }

    /// Runs one command line under the command timeout.
    ///
    /// A timeout or transport failure leaves the reply stream misaligned
    /// with the commands sent, so the session is dropped rather than
    /// reused: a late reply must not be delivered as the next command's
    /// result. Later commands fail with `NotConnected` until a fresh
    /// `open` reconnects with a clean buffer.
    async fn command(&self, line: &str) -> Result<String, ChannelError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(ChannelError::NotConnected)?;

        let result = match timeout(self.command_timeout, session.exchange(line)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout),
        };

        if result.is_err() {
            *guard = None;
        }

        result
    }
}

#[async_trait]
impl CommandChannel for VcontroldChannel {
    async fn open(&self) -> Result<(), ChannelError> {
        let mut guard = self.session.lock().await;

        if guard.is_some() {
            tracing::debug!("Session already open");
            return Ok(());
        }

        let stream = timeout(self.connect_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| ChannelError::Timeout)?
            .map_err(ChannelError::Connect)?;

        let mut session = Session {
            stream,
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        };

        // The greeting is a bare prompt, any banner text is ignored.
        timeout(self.connect_timeout, session.wait_prompt())
            .await
            .map_err(|_| ChannelError::Timeout)??;

        tracing::debug!("Connected to vcontrold at {}", self.addr);
        *guard = Some(session);

        Ok(())
    }

    async fn read_value(&self, target: &str) -> Result<f32, ChannelError> {
        let reply = self.command(target).await?;

        parse_value(&reply)
    }

    async fn write_value(&self, target: &str, value: f32) -> Result<(), ChannelError> {
        let reply = self.command(&format!("{target} {value}")).await?;

        expect_ok(&reply)
    }

    async fn close(&self) -> Result<(), ChannelError> {
        let Some(mut session) = self.session.lock().await.take() else {
            return Ok(());
        };

        session.stream.write_all(b"quit\n").await?;
        session.stream.shutdown().await?;

        tracing::debug!("Session closed");

        Ok(())
    }
}

/* == Session == */

impl Session {
    /// Sends one command line and collects the reply up to the next prompt.
    async fn exchange(&mut self, line: &str) -> Result<String, ChannelError> {
        tracing::trace!("-> {line}");

        self.stream.write_all(format!("{line}\n").as_bytes()).await?;

        let reply = self.wait_prompt().await?;
        tracing::trace!("<- {}", reply.trim());

        Ok(reply)
    }

    async fn wait_prompt(&mut self) -> Result<String, ChannelError> {
        loop {
            if let Some(position) = find_prompt(&self.buf) {
                let reply = self.buf.split_to(position);
                self.buf.advance(PROMPT.len());

                return Ok(String::from_utf8_lossy(&reply).into_owned());
            }

            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(ChannelError::Closed);
            }
        }
    }
}

fn find_prompt(buf: &[u8]) -> Option<usize> {
    buf.windows(PROMPT.len()).position(|window| window == PROMPT)
}

/// Decodes a read reply. The daemon answers with the value followed by the
/// unit, e.g. `21.300000 Grad Celsius`, or an `ERR:` line.
fn parse_value(reply: &str) -> Result<f32, ChannelError> {
    let line = reply.trim();

    if let Some(message) = strip_error(line) {
        return Err(ChannelError::Device { message });
    }

    line.split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| ChannelError::Malformed {
            raw: line.to_owned(),
        })
}

/// Decodes a write acknowledgement.
fn expect_ok(reply: &str) -> Result<(), ChannelError> {
    let line = reply.trim();

    if let Some(message) = strip_error(line) {
        return Err(ChannelError::Device { message });
    }

    match line.starts_with("OK") {
        true => Ok(()),
        false => Err(ChannelError::Malformed {
            raw: line.to_owned(),
        }),
    }
}

fn strip_error(line: &str) -> Option<String> {
    line.strip_prefix("ERR")
        .map(|message| message.trim_start_matches(':').trim().to_owned())
}

/* === Tests === */
