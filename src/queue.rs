use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::{
    cache::StateCache,
    channel::{ChannelError, CommandChannel},
    defs::{Circuit, Field},
};

/* === Definitions === */

/// FIFO queue in front of the control daemon.
///
/// The daemon serves a single stateful session and tolerates one command in
/// flight, so every read and write funnels through here. The first enqueue
/// into an idle queue starts a drain task: it opens the channel, executes
/// commands strictly in arrival order until the queue is empty, then closes
/// the channel again. Enqueueing itself never blocks on the device.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<Inner>,
}

struct Inner {
    channel: Arc<dyn CommandChannel>,
    cache: Arc<StateCache>,
    pending: Mutex<VecDeque<Command>>,
    draining: AtomicBool,
}

/// A single queued request against the daemon.
pub struct Command {
    kind: CommandKind,
    target: String,
    update: Option<CacheSlot>,
    reply: Option<oneshot::Sender<CommandResult>>,
}

#[derive(Clone, Copy, Debug)]
enum CommandKind {
    Read,
    Write(f32),
}

/// Cache slot a completed command writes through to.
#[derive(Clone, Copy, Debug)]
pub struct CacheSlot {
    pub circuit: Circuit,
    pub field: Field,
}

pub type CommandResult = Result<f32, CommandError>;

#[derive(Debug, Error)]
pub enum CommandError {
    /// The channel could not be opened, the command never ran.
    #[error("could not reach the control daemon: {0}")]
    Connection(#[source] ChannelError),

    /// The command ran and the daemon or the transport failed it.
    #[error("{target} failed: {source}")]
    Execution {
        target: String,
        #[source]
        source: ChannelError,
    },

    /// The queue went away before the command completed.
    #[error("command aborted before completion")]
    Aborted,
}

/* == Command == */

impl Command {
    pub fn read(target: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Read,
            target: target.into(),
            update: None,
            reply: None,
        }
    }

    pub fn write(target: impl Into<String>, value: f32) -> Self {
        Self {
            kind: CommandKind::Write(value),
            target: target.into(),
            update: None,
            reply: None,
        }
    }

    /// Routes the successful result into a cache slot.
    pub fn with_update(mut self, slot: CacheSlot) -> Self {
        self.update = Some(slot);
        self
    }

    fn fail(self, error: CommandError) {
        if let Some(reply) = self.reply {
            // The caller may have lost interest, a dead receiver is fine.
            let _ = reply.send(Err(error));
        }
    }
}

/* == Public API == */

impl CommandQueue {
    pub fn new(channel: Arc<dyn CommandChannel>, cache: Arc<StateCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                cache,
                pending: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueues a command without keeping a handle on the result. The cache
    /// update still happens, which is all the refresh pass needs.
    pub fn submit(&self, command: Command) {
        self.inner.push(command);
        self.inner.trigger();
    }

    /// Enqueues a command and returns a receiver for its result.
    pub fn request(&self, mut command: Command) -> oneshot::Receiver<CommandResult> {
        let (tx, rx) = oneshot::channel();
        command.reply = Some(tx);
        self.submit(command);
        rx
    }

    pub fn depth(&self) -> usize {
        self.inner.lock_pending().len()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }
}

/* == Drain loop == */

impl Inner {
    fn push(&self, command: Command) {
        let mut pending = self.lock_pending();
        pending.push_back(command);

        if let Some(command) = pending.back() {
            tracing::debug!("Queued {} ({} pending)", command.target, pending.len());
        }
    }

    /// Starts a drain task unless one is already running. The flag is the
    /// only arbiter, losing the race simply leaves the command for the
    /// running task to pick up.
    fn trigger(self: &Arc<Self>) {
        let idle = self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if idle {
            tokio::spawn(Self::drain(self.clone()));
        }
    }

    /// Runs one batch: open the channel, execute until the queue is empty,
    /// close the channel.
    ///
    /// An open failure fails the head command and ends the batch without
    /// retrying; whatever else is queued waits for the next enqueue.
    async fn drain(self: Arc<Self>) {
        let Some(head) = self.pop() else {
            self.finish();
            return;
        };

        if let Err(err) = self.channel.open().await {
            tracing::error!("Failed to open the control channel: {err}");
            head.fail(CommandError::Connection(err));
            self.finish();
            return;
        }

        let mut command = Some(head);

        while let Some(current) = command {
            self.execute(current).await;
            command = self.pop();
        }

        if let Err(err) = self.channel.close().await {
            tracing::warn!("Failed to close the control channel: {err}");
        }

        self.finish();

        // An enqueue may have raced with the close and lost its trigger;
        // pick it up now instead of leaving it for the next request.
        if !self.lock_pending().is_empty() {
            self.trigger();
        }
    }

    /// Executes one command and delivers its outcome. Failures affect
    /// neither the cache nor the rest of the batch.
    async fn execute(&self, command: Command) {
        let Command {
            kind,
            target,
            update,
            reply,
        } = command;

        tracing::debug!("Executing {target}");

        let result = match kind {
            CommandKind::Read => self.channel.read_value(&target).await,
            CommandKind::Write(value) => {
                self.channel.write_value(&target, value).await.map(|()| value)
            }
        };

        match result {
            Ok(value) => {
                tracing::debug!("{target} -> {value}");

                if let Some(slot) = update {
                    self.cache.store(slot.circuit, slot.field, value);
                }

                if let Some(reply) = reply {
                    let _ = reply.send(Ok(value));
                }
            }

            Err(source) => {
                tracing::error!("Command {target} failed: {source}");

                if let Some(reply) = reply {
                    let _ = reply.send(Err(CommandError::Execution { target, source }));
                }
            }
        }
    }

    fn pop(&self) -> Option<Command> {
        self.lock_pending().pop_front()
    }

    fn finish(&self) {
        self.draining.store(false, Ordering::Release);
    }

    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<Command>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/* === Tests === */

#[cfg(test)]
mod tests {
    use tokio::{
        sync::Barrier,
        time::{Duration, sleep, timeout},
    };

    use crate::channel::fake::FakeChannel;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_commands_run_in_arrival_order() {
        let (channel, _cache, queue) = rig();

        let receivers: Vec<_> = (0..5)
            .map(|i| queue.request(Command::read(format!("getValue{i}"))))
            .collect();

        for receiver in receivers {
            assert!(receiver.await.unwrap().is_ok());
        }

        settled(&queue).await;

        let expected: Vec<_> = (0..5).map(|i| format!("getValue{i}")).collect();
        assert_eq!(channel.executed(), expected);
        assert_eq!(channel.opens(), 1);
        assert_eq!(channel.closes(), 1);
        assert_eq!(channel.violations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_reopens_after_draining() {
        let (channel, _cache, queue) = rig();

        queue.request(Command::read("getA")).await.unwrap().unwrap();
        settled(&queue).await;

        assert_eq!(channel.opens(), 1);
        assert_eq!(channel.closes(), 1);

        queue.request(Command::read("getB")).await.unwrap().unwrap();
        settled(&queue).await;

        assert_eq!(channel.opens(), 2);
        assert_eq!(channel.closes(), 2);
        assert_eq!(queue.depth(), 0);
        assert!(!queue.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_batch_with_write_through() {
        let (channel, cache, queue) = rig();

        channel.script_read("getVitoBetriebsartM1", 3.);
        channel.script_read("getTempRaumNorSollM1", 21.);

        let mode = queue.request(Command::read("getVitoBetriebsartM1").with_update(CacheSlot {
            circuit: Circuit::Hk1,
            field: Field::CurrentMode,
        }));

        let write = queue.request(
            Command::write("setTempRaumNorSollM1", 21.).with_update(CacheSlot {
                circuit: Circuit::Hk1,
                field: Field::TargetTemperature,
            }),
        );

        let read = queue.request(Command::read("getTempRaumNorSollM1").with_update(CacheSlot {
            circuit: Circuit::Hk1,
            field: Field::TargetTemperature,
        }));

        assert_eq!(mode.await.unwrap().unwrap(), 3.);
        assert_eq!(write.await.unwrap().unwrap(), 21.);
        assert_eq!(read.await.unwrap().unwrap(), 21.);

        settled(&queue).await;

        assert_eq!(
            channel.executed(),
            [
                "getVitoBetriebsartM1",
                "setTempRaumNorSollM1 21",
                "getTempRaumNorSollM1",
            ]
        );

        assert_eq!(channel.opens(), 1);
        assert_eq!(channel.closes(), 1);
        assert_eq!(cache.get(Circuit::Hk1, Field::CurrentMode), Some(3.));
        assert_eq!(cache.get(Circuit::Hk1, Field::TargetTemperature), Some(21.));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_command_does_not_stop_the_batch() {
        let (channel, cache, queue) = rig();

        channel.script_read("getA", 1.);
        channel.script_error("getB", "command unknown");
        channel.script_read("getC", 3.);

        let a = queue.request(Command::read("getA"));
        let b = queue.request(Command::read("getB").with_update(CacheSlot {
            circuit: Circuit::Hk1,
            field: Field::TargetTemperature,
        }));
        let c = queue.request(Command::read("getC"));

        assert_eq!(a.await.unwrap().unwrap(), 1.);

        let error = b.await.unwrap().unwrap_err();
        assert!(matches!(
            error,
            CommandError::Execution { target, .. } if target == "getB"
        ));

        assert_eq!(c.await.unwrap().unwrap(), 3.);

        settled(&queue).await;

        assert_eq!(channel.executed(), ["getA", "getB", "getC"]);
        assert_eq!(channel.closes(), 1);

        // A failed command must leave its slot untouched.
        assert_eq!(cache.get(Circuit::Hk1, Field::TargetTemperature), Some(20.));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_fails_head_and_stops() {
        let (channel, _cache, queue) = rig();

        channel.fail_next_open();

        let first = queue.request(Command::read("getA"));
        let second = queue.request(Command::read("getB"));
        let third = queue.request(Command::read("getC"));

        let error = first.await.unwrap().unwrap_err();
        assert!(matches!(error, CommandError::Connection(_)));

        // The rest of the queue is retained but nothing drains on its own.
        sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.depth(), 2);
        assert_eq!(channel.opens(), 0);
        assert_eq!(channel.closes_started(), 0);
        assert!(!queue.is_draining());

        // The next enqueue starts a fresh batch which drains everything.
        let fourth = queue.request(Command::read("getD"));

        assert!(second.await.unwrap().is_ok());
        assert!(third.await.unwrap().is_ok());
        assert!(fourth.await.unwrap().is_ok());

        settled(&queue).await;

        assert_eq!(channel.executed(), ["getB", "getC", "getD"]);
        assert_eq!(channel.opens(), 1);
        assert_eq!(channel.closes(), 1);
        assert_eq!(channel.violations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_racing_the_close_is_picked_up() {
        let (channel, _cache, queue) = rig();

        channel.hold_close();

        let first = queue.request(Command::read("getA"));

        while channel.closes_started() == 0 {
            sleep(Duration::from_millis(1)).await;
        }

        // The drain task is parked inside close with the flag still held,
        // so this enqueue loses the trigger race.
        let second = queue.request(Command::read("getB"));
        channel.release_close();

        assert!(first.await.unwrap().is_ok());

        let result = timeout(Duration::from_secs(5), second)
            .await
            .expect("command stranded in the queue");
        assert!(result.unwrap().is_ok());

        settled(&queue).await;

        assert_eq!(channel.executed(), ["getA", "getB"]);
        assert_eq!(channel.opens(), 2);
        assert_eq!(channel.closes(), 2);
        assert_eq!(channel.violations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_producers_keep_their_order() {
        let (channel, _cache, queue) = rig();
        let barrier = Arc::new(Barrier::new(3));

        let mut handles = Vec::new();

        for task in 0..3 {
            let queue = queue.clone();
            let barrier = barrier.clone();

            handles.push(tokio::spawn(async move {
                barrier.wait().await;

                let receivers: Vec<_> = (0..3)
                    .map(|i| queue.request(Command::read(format!("getTask{task}No{i}"))))
                    .collect();

                for receiver in receivers {
                    assert!(receiver.await.unwrap().is_ok());
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        settled(&queue).await;

        let log = channel.executed();
        assert_eq!(log.len(), 9);
        assert_eq!(channel.violations(), 0);

        for task in 0..3 {
            let expected: Vec<_> = (0..3).map(|i| format!("getTask{task}No{i}")).collect();
            assert_subsequence(&log, &expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_under_contention() {
        let (channel, _cache, queue) = rig();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    queue
                        .request(Command::read(format!("getValue{i}")))
                        .await
                        .unwrap()
                        .unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        settled(&queue).await;

        assert_eq!(channel.executed().len(), 10);
        assert_eq!(channel.violations(), 0);
        assert_eq!(channel.opens(), channel.closes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_is_tolerated() {
        let (channel, _cache, queue) = rig();

        drop(queue.request(Command::read("getA")));
        let second = queue.request(Command::read("getB"));

        assert!(second.await.unwrap().is_ok());
        settled(&queue).await;

        assert_eq!(channel.executed(), ["getA", "getB"]);
        assert_eq!(channel.violations(), 0);
    }

    fn rig() -> (Arc<FakeChannel>, Arc<StateCache>, CommandQueue) {
        let channel = Arc::new(FakeChannel::default());
        let cache = Arc::new(StateCache::new([Circuit::Hk1, Circuit::Hk2]));
        let queue = CommandQueue::new(channel.clone(), cache.clone());

        (channel, cache, queue)
    }

    async fn settled(queue: &CommandQueue) {
        while queue.is_draining() || queue.depth() > 0 {
            sleep(Duration::from_millis(1)).await;
        }
    }

    fn assert_subsequence(log: &[String], expected: &[String]) {
        let mut remaining = log.iter();

        for target in expected {
            assert!(
                remaining.any(|entry| entry == target),
                "{target} missing or out of order"
            );
        }
    }
}
