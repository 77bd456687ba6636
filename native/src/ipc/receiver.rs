// Receiver worker: polls the pipe and forwards commands.

use super::channel::Transport;
use super::protocol::is_quit;
use crate::config::BridgeConfig;
use crate::sync::{join_with_grace, Latch, OpenOnDrop, WakeSignal};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const THREAD_NAME: &str = "pipe-bridge-recv";

/// Destination of inbound commands.
pub trait CommandSink: Send + Sync {
    fn accept_command(&self, command: &str);
}

/// Background thread owning the read side of the channel.
pub struct ReceiverWorker {
    stop: Arc<AtomicBool>,
    wake: Arc<WakeSignal>,
    exited: Arc<Latch>,
    handle: Option<JoinHandle<()>>,
    grace: Duration,
}

impl ReceiverWorker {
    /// Start polling `channel`. The worker exits on `QUIT`, on `end`, or once
    /// the sink has been dropped.
    pub fn spawn(
        channel: Arc<dyn Transport>,
        sink: Weak<dyn CommandSink>,
        config: &BridgeConfig,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(WakeSignal::new());
        let exited = Arc::new(Latch::new());
        let poll = config.receive_poll();

        let handle = {
            let stop = Arc::clone(&stop);
            let wake = Arc::clone(&wake);
            let exited = Arc::clone(&exited);
            thread::Builder::new()
                .name(THREAD_NAME.to_string())
                .spawn(move || {
                    let _exit = OpenOnDrop(&exited);
                    run(channel.as_ref(), &sink, &stop, &wake, poll);
                })?
        };

        Ok(Self {
            stop,
            wake,
            exited,
            handle: Some(handle),
            grace: config.shutdown_grace(),
        })
    }

    /// Ask the loop to stop without waiting for it.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.wake.signal();
    }

    /// True once the loop has exited, for whatever reason.
    pub fn is_finished(&self) -> bool {
        self.exited.is_open()
    }

    /// Block until the loop exits. `None` waits forever.
    pub fn wait_finished(&self, timeout: Option<Duration>) -> bool {
        self.exited.wait(timeout)
    }

    /// Latch opened when the loop exits, for waiting without holding the worker.
    pub fn exit_latch(&self) -> Arc<Latch> {
        Arc::clone(&self.exited)
    }

    /// Stop the worker, waiting up to the grace period before detaching it.
    pub fn end(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.request_stop();
        if join_with_grace(handle, &self.exited, self.grace, "RECV") {
            info!("[RECV] Receiver worker stopped");
        }
    }
}

impl Drop for ReceiverWorker {
    fn drop(&mut self) {
        self.end();
    }
}

fn run(
    channel: &dyn Transport,
    sink: &Weak<dyn CommandSink>,
    stop: &AtomicBool,
    wake: &WakeSignal,
    poll: Duration,
) {
    info!("[RECV] Receiver worker started");

    loop {
        wake.wait_timeout(poll);
        if stop.load(Ordering::Acquire) {
            break;
        }

        let Some(command) = channel.read() else {
            continue;
        };

        if is_quit(&command) {
            info!("[RECV] QUIT received - receiver stopping");
            break;
        }

        let Some(sink) = sink.upgrade() else {
            warn!("[RECV] Bridge is gone - dropping '{}' and stopping", command);
            break;
        };
        sink.accept_command(&command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::testing::ScriptedTransport;
    use crate::sync::lock;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingSink {
        commands: Mutex<Vec<String>>,
    }

    impl CommandSink for RecordingSink {
        fn accept_command(&self, command: &str) {
            lock(&self.commands).push(command.to_string());
        }
    }

    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            receive_poll_ms: 2,
            shutdown_grace_ms: 500,
            ..BridgeConfig::default()
        }
    }

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn test_forwards_commands_in_order() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.open().unwrap();
        transport.push_inbound("project path");
        transport.push_inbound("insert file");

        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn CommandSink> = Arc::downgrade(&sink) as Weak<dyn CommandSink>;
        let mut worker = ReceiverWorker::spawn(transport.clone(), weak, &fast_config()).unwrap();

        assert!(wait_until(Duration::from_secs(2), || lock(&sink.commands).len() == 2));
        assert_eq!(*lock(&sink.commands), vec!["project path", "insert file"]);
        assert!(!worker.is_finished());
        worker.end();
        assert!(worker.is_finished());
    }

    #[test]
    fn test_quit_stops_reading() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.open().unwrap();
        transport.push_inbound("QUIT");
        transport.push_inbound("project path");

        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn CommandSink> = Arc::downgrade(&sink) as Weak<dyn CommandSink>;
        let worker = ReceiverWorker::spawn(transport.clone(), weak, &fast_config()).unwrap();

        assert!(worker.wait_finished(Some(Duration::from_secs(2))));
        assert!(lock(&sink.commands).is_empty());
        assert_eq!(transport.pending_inbound(), 1);
    }

    #[test]
    fn test_dropped_sink_stops_worker() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.open().unwrap();

        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn CommandSink> = Arc::downgrade(&sink) as Weak<dyn CommandSink>;
        let worker = ReceiverWorker::spawn(transport.clone(), weak, &fast_config()).unwrap();
        drop(sink);

        transport.push_inbound("project path");
        assert!(worker.wait_finished(Some(Duration::from_secs(2))));
    }

    #[test]
    fn test_closed_channel_keeps_polling() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_inbound("project path");

        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn CommandSink> = Arc::downgrade(&sink) as Weak<dyn CommandSink>;
        let mut worker = ReceiverWorker::spawn(transport.clone(), weak, &fast_config()).unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(lock(&sink.commands).is_empty());

        transport.open().unwrap();
        assert!(wait_until(Duration::from_secs(2), || lock(&sink.commands).len() == 1));
        worker.end();
    }
}
