// Sender worker: drains the outbound queue into the pipe.

use super::channel::Transport;
use super::protocol::OutboundMessage;
use super::queue::OutboundQueue;
use crate::config::BridgeConfig;
use crate::sync::{join_with_grace, Latch, OpenOnDrop, WakeSignal};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const THREAD_NAME: &str = "pipe-bridge-send";
const IDLE_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
struct SendTiming {
    idle_wait: Duration,
    busy_wait: Duration,
}

/// Background thread owning the write side of the channel.
pub struct SenderWorker {
    queue: Arc<OutboundQueue>,
    stop: Arc<AtomicBool>,
    // Set while a popped message is being written.
    busy: Arc<AtomicBool>,
    wake: Arc<WakeSignal>,
    exited: Arc<Latch>,
    handle: Option<JoinHandle<()>>,
    grace: Duration,
}

impl SenderWorker {
    pub fn spawn(channel: Arc<dyn Transport>, config: &BridgeConfig) -> std::io::Result<Self> {
        let queue = Arc::new(OutboundQueue::new());
        let stop = Arc::new(AtomicBool::new(false));
        let busy = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(WakeSignal::new());
        let exited = Arc::new(Latch::new());
        let timing = SendTiming {
            idle_wait: config.send_idle_wait(),
            busy_wait: config.send_busy_wait(),
        };

        let handle = {
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            let busy = Arc::clone(&busy);
            let wake = Arc::clone(&wake);
            let exited = Arc::clone(&exited);
            thread::Builder::new()
                .name(THREAD_NAME.to_string())
                .spawn(move || {
                    let _exit = OpenOnDrop(&exited);
                    let worker = Worker {
                        channel: channel.as_ref(),
                        queue: &queue,
                        stop: &stop,
                        busy: &busy,
                        wake: &wake,
                        timing,
                    };
                    worker.run();
                })?
        };

        Ok(Self {
            queue,
            stop,
            busy,
            wake,
            exited,
            handle: Some(handle),
            grace: config.shutdown_grace(),
        })
    }

    /// Queue a message for transmission. Returns `false` once `end` has
    /// started; the message is dropped.
    pub fn post(&self, message: OutboundMessage) -> bool {
        let queued = self.queue.enqueue(message);
        if !queued {
            debug!("[SEND] Worker stopping - message dropped");
        }
        queued
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.exited.is_open()
    }

    /// True when nothing is queued and no write is in progress.
    pub fn is_idle(&self) -> bool {
        self.idle_watch().is_idle()
    }

    /// Poll until every queued message has been written, or `timeout` elapses.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.idle_watch().wait(timeout)
    }

    /// Handle for waiting on the queue without borrowing the worker.
    pub fn idle_watch(&self) -> IdleWatch {
        IdleWatch {
            queue: Arc::clone(&self.queue),
            busy: Arc::clone(&self.busy),
            exited: Arc::clone(&self.exited),
        }
    }

    /// Stop the worker, discarding undelivered messages.
    /// Waits up to the grace period for the thread, then detaches it.
    pub fn end(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.stop.store(true, Ordering::Release);
        let dropped = self.queue.close();
        if dropped > 0 {
            debug!("[SEND] Discarded {} undelivered message(s)", dropped);
        }
        self.wake.signal();

        if join_with_grace(handle, &self.exited, self.grace, "SEND") {
            info!("[SEND] Sender worker stopped");
        }
    }
}

impl Drop for SenderWorker {
    fn drop(&mut self) {
        self.end();
    }
}

/// Observes whether a sender has written everything it was given.
#[derive(Clone)]
pub struct IdleWatch {
    queue: Arc<OutboundQueue>,
    busy: Arc<AtomicBool>,
    exited: Arc<Latch>,
}

impl IdleWatch {
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && !self.busy.load(Ordering::Acquire)
    }

    /// Poll until idle. Returns `false` on timeout or if the worker exited
    /// with messages still queued.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            if self.exited.is_open() || Instant::now() >= deadline {
                return false;
            }
            thread::sleep(IDLE_POLL);
        }
        true
    }
}

struct Worker<'a> {
    channel: &'a dyn Transport,
    queue: &'a OutboundQueue,
    stop: &'a AtomicBool,
    busy: &'a AtomicBool,
    wake: &'a WakeSignal,
    timing: SendTiming,
}

impl Worker<'_> {
    fn run(&self) {
        info!("[SEND] Sender worker started");

        while !self.stop.load(Ordering::Acquire) {
            // Flag before popping so `is_idle` never sees an empty queue mid-write.
            self.busy.store(true, Ordering::Release);
            if let Some(message) = self.queue.pop_front() {
                transmit(self.channel, &message);
            }
            self.busy.store(false, Ordering::Release);

            // Drain fast while work is pending.
            let wait = if self.queue.is_empty() && !self.stop.load(Ordering::Acquire) {
                self.timing.idle_wait
            } else {
                self.timing.busy_wait
            };
            self.wake.wait_timeout(wait);
        }
    }
}

/// Write one message and reset the channel.
///
/// The peer stalls on a pipe instance it has already read from, so the
/// channel is closed and reopened after every write whatever its outcome.
pub(crate) fn transmit(channel: &dyn Transport, message: &OutboundMessage) {
    if message.is_empty() {
        return;
    }

    if !channel.write(&message.to_wire()) {
        warn!("[SEND] Failed to deliver {:?}", message);
    }

    channel.close();
    if let Err(e) = channel.open() {
        warn!("[SEND] Failed to reopen pipe after write: {}", e);
    }
}
