use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use tokio::{
    sync::Notify,
    time::{Duration, sleep},
};

use super::{ChannelError, CommandChannel};

/// Scripted in-memory channel for exercising the queue and everything above
/// it.
///
/// Every operation yields once so that interleavings actually surface under
/// the test runtime. Overlapping use of the channel (a second session, a
/// command outside a session) is counted as a violation rather than
/// panicking inside a spawned task, so tests can assert on it afterwards.
#[derive(Default)]
pub struct FakeChannel {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    executed: Mutex<Vec<String>>,

    opens: AtomicUsize,
    closes: AtomicUsize,
    closes_started: AtomicUsize,
    open_failures: AtomicUsize,

    connected: AtomicBool,
    in_call: AtomicBool,
    violations: AtomicUsize,

    block_close: AtomicBool,
    close_gate: Notify,
}

enum Reply {
    Value(f32),
    Refuse(String),
}

/* == Scripting == */

impl FakeChannel {
    /// Queues a reply for the next read of `target`. Unscripted reads
    /// return `0.0`.
    pub fn script_read(&self, target: &str, value: f32) {
        self.script(target, Reply::Value(value));
    }

    /// Queues a device-side rejection for the next use of `target`.
    pub fn script_error(&self, target: &str, message: &str) {
        self.script(target, Reply::Refuse(message.to_owned()));
    }

    /// Makes the next `open` fail with a connection error.
    pub fn fail_next_open(&self) {
        self.open_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Parks the next `close` until [`Self::release_close`] is called.
    pub fn hold_close(&self) {
        self.block_close.store(true, Ordering::SeqCst);
    }

    pub fn release_close(&self) {
        self.block_close.store(false, Ordering::SeqCst);
        self.close_gate.notify_one();
    }

    fn script(&self, target: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(target.to_owned())
            .or_default()
            .push_back(reply);
    }
}

/* == Inspection == */

impl FakeChannel {
    /// Command lines in execution order, writes including their value.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn closes_started(&self) -> usize {
        self.closes_started.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        if self.in_call.swap(true, Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leave(&self) {
        self.in_call.store(false, Ordering::SeqCst);
    }

    fn take_reply(&self, target: &str) -> Option<Reply> {
        self.replies
            .lock()
            .unwrap()
            .get_mut(target)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl CommandChannel for FakeChannel {
    async fn open(&self) -> Result<(), ChannelError> {
        self.enter();
        sleep(Duration::from_millis(1)).await;

        let failures = &self.open_failures;
        let result = if failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Err(ChannelError::Connect(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted failure",
            )))
        } else {
            if self.connected.swap(true, Ordering::SeqCst) {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }

            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        self.leave();
        result
    }

    async fn read_value(&self, target: &str) -> Result<f32, ChannelError> {
        self.enter();
        sleep(Duration::from_millis(1)).await;

        let result = if self.connected.load(Ordering::SeqCst) {
            self.executed.lock().unwrap().push(target.to_owned());

            match self.take_reply(target) {
                Some(Reply::Refuse(message)) => Err(ChannelError::Device { message }),
                Some(Reply::Value(value)) => Ok(value),
                None => Ok(0.),
            }
        } else {
            self.violations.fetch_add(1, Ordering::SeqCst);
            Err(ChannelError::NotConnected)
        };

        self.leave();
        result
    }

    async fn write_value(&self, target: &str, value: f32) -> Result<(), ChannelError> {
        self.enter();
        sleep(Duration::from_millis(1)).await;

        let result = if self.connected.load(Ordering::SeqCst) {
            self.executed.lock().unwrap().push(format!("{target} {value}"));

            match self.take_reply(target) {
                Some(Reply::Refuse(message)) => Err(ChannelError::Device { message }),
                _ => Ok(()),
            }
        } else {
            self.violations.fetch_add(1, Ordering::SeqCst);
            Err(ChannelError::NotConnected)
        };

        self.leave();
        result
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.enter();
        self.closes_started.fetch_add(1, Ordering::SeqCst);

        if self.block_close.load(Ordering::SeqCst) {
            self.close_gate.notified().await;
        }

        sleep(Duration::from_millis(1)).await;

        if !self.connected.swap(false, Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }

        self.closes.fetch_add(1, Ordering::SeqCst);
        self.leave();

        Ok(())
    }
}
