//! Bridge coordinator.
//!
//! Owns the channel and both workers, hands inbound commands to a
//! [`CommandDispatcher`], waits for the result and queues the reply.
//! Commands are handled one at a time, each tagged with a [`CommandId`] so a
//! late result can never answer a later command. No acknowledgement is
//! accepted while any command is between acceptance and its reply.

use crate::config::{BridgeConfig, ConfigError};
use crate::host::commands::is_asynchronous;
use crate::ipc::{
    ChannelError, CommandSink, NamedPipeChannel, OutboundMessage, ReceiverWorker, SenderWorker,
    Transport,
};
use crate::sync::{lock, BinarySemaphore, Latch};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use thiserror::Error;

/// Reply to commands received after shutdown started.
pub const SHUTTING_DOWN_REPLY: &str = "Currently shutting down";
/// Reply when the host did not produce a result in time.
pub const TIMEOUT_REPLY: &str = "timeout";
/// Immediate reply to commands that do not wait for the host.
pub const ASYNC_REPLY: &str = "ok";

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No command dispatcher is registered")]
    Unavailable,
    #[error("Command dispatcher has stopped")]
    Disconnected,
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Identifies one dispatched command. Results are matched to the command
/// waiting for them by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(u64);

impl CommandId {
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// Hands a command to whatever executes it. The result comes back later
/// through [`Bridge::notify_result`] or a [`ResultHandle`], tagged with `id`.
pub trait CommandDispatcher: Send + Sync {
    fn dispatch(&self, id: CommandId, command: &str) -> Result<(), DispatchError>;
}

#[derive(Debug, Default)]
struct CoordinatorState {
    // Commands accepted and not yet answered, including those queued on the gate.
    in_flight: usize,
    shutting_down: bool,
    last_id: u64,
    awaiting: Option<CommandId>,
    pending_result: Option<String>,
}

enum SenderSlot {
    Idle,
    Running(SenderWorker),
    Ended,
}

struct BridgeCore {
    config: BridgeConfig,
    channel: Arc<dyn Transport>,
    state: Mutex<CoordinatorState>,
    // Held from dispatch until the reply is queued.
    command_gate: Mutex<()>,
    result_ready: BinarySemaphore,
    dispatcher: Mutex<Option<Arc<dyn CommandDispatcher>>>,
    sender: Mutex<SenderSlot>,
}

impl BridgeCore {
    /// Start the sender on first use. Returns `false` once it has been ended
    /// or if the thread could not be spawned.
    fn ensure_sender(&self) -> bool {
        let mut slot = lock(&self.sender);
        match &*slot {
            SenderSlot::Running(_) => true,
            SenderSlot::Ended => false,
            SenderSlot::Idle => match SenderWorker::spawn(Arc::clone(&self.channel), &self.config) {
                Ok(worker) => {
                    *slot = SenderSlot::Running(worker);
                    true
                }
                Err(e) => {
                    error!("[BRIDGE] Failed to start sender worker: {}", e);
                    false
                }
            },
        }
    }

    fn post(&self, message: OutboundMessage) -> bool {
        if !self.ensure_sender() {
            debug!("[BRIDGE] No sender - dropping {:?}", message);
            return false;
        }
        match &*lock(&self.sender) {
            SenderSlot::Running(worker) => worker.post(message),
            _ => false,
        }
    }

    fn end_sender(&self) {
        let previous = std::mem::replace(&mut *lock(&self.sender), SenderSlot::Ended);
        if let SenderSlot::Running(mut worker) = previous {
            worker.end();
        }
    }

    fn current_dispatcher(&self) -> Option<Arc<dyn CommandDispatcher>> {
        lock(&self.dispatcher).clone()
    }

    /// Dispatch and wait for the result. `None` means nothing is sent back.
    /// Called with the command gate held.
    fn run_command(&self, command: &str) -> Option<String> {
        let Some(dispatcher) = self.current_dispatcher() else {
            warn!("[BRIDGE] No dispatcher registered - ignoring '{}'", command);
            return None;
        };

        // Drop a permit left over from an abandoned command.
        self.result_ready.try_acquire();

        let asynchronous = is_asynchronous(command);
        let id = {
            let mut state = lock(&self.state);
            if state.shutting_down {
                return Some(SHUTTING_DOWN_REPLY.to_string());
            }
            state.last_id += 1;
            let id = CommandId::new(state.last_id);
            state.pending_result = None;
            state.awaiting = (!asynchronous).then_some(id);
            id
        };

        if let Err(e) = dispatcher.dispatch(id, command) {
            warn!("[BRIDGE] Failed to dispatch '{}': {}", command, e);
            lock(&self.state).awaiting = None;
            return None;
        }

        if asynchronous {
            return Some(ASYNC_REPLY.to_string());
        }

        let signalled = match self.config.reply_timeout() {
            Some(timeout) => self.result_ready.acquire_timeout(timeout),
            None => {
                self.result_ready.acquire();
                true
            }
        };

        let mut state = lock(&self.state);
        state.awaiting = None;
        match state.pending_result.take() {
            Some(result) => Some(result),
            None if !signalled => {
                warn!(
                    "[BRIDGE] No result for '{}' ({:?}) within {:?}",
                    command,
                    id,
                    self.config.reply_timeout()
                );
                Some(TIMEOUT_REPLY.to_string())
            }
            // Released by shutdown.
            None => None,
        }
    }

    fn notify_result(&self, id: CommandId, text: &str) -> bool {
        {
            let mut state = lock(&self.state);
            if state.awaiting != Some(id) || state.pending_result.is_some() {
                warn!("[BRIDGE] Unexpected result '{}' for {:?} - ignored", text, id);
                return false;
            }
            state.pending_result = Some(text.to_string());
        }
        self.result_ready.release();
        true
    }

    fn post_acknowledgement(&self, code: i32, text: &str) -> bool {
        if !self.ensure_sender() {
            return false;
        }
        let state = lock(&self.state);
        if state.in_flight > 0 {
            return false;
        }
        // Enqueued under the state lock so no command can be accepted meanwhile.
        self.post(OutboundMessage::acknowledgement(code, text))
    }

    fn set_shutting_down(&self) {
        lock(&self.state).shutting_down = true;
    }

    /// Wake a command blocked on its result without giving it one.
    fn abandon_pending(&self) {
        if lock(&self.state).awaiting.is_some() {
            self.result_ready.release();
        }
    }
}

/// Counts a command as in flight until dropped.
struct InFlight<'a>(&'a Mutex<CoordinatorState>);

impl<'a> InFlight<'a> {
    fn enter(state: &'a Mutex<CoordinatorState>) -> Self {
        lock(state).in_flight += 1;
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.0).in_flight -= 1;
    }
}

impl CommandSink for BridgeCore {
    fn accept_command(&self, command: &str) {
        let _in_flight = InFlight::enter(&self.state);
        // Released before `_in_flight`, once the reply is queued.
        let _gate = lock(&self.command_gate);

        let shutting_down = lock(&self.state).shutting_down;
        let result = if shutting_down {
            debug!("[BRIDGE] Shutting down - refusing '{}'", command);
            Some(SHUTTING_DOWN_REPLY.to_string())
        } else {
            self.run_command(command)
        };

        match result {
            Some(text) if !text.is_empty() => {
                self.post(OutboundMessage::reply(text));
            }
            _ => debug!("[BRIDGE] No reply for '{}'", command),
        }
    }
}

/// Lets another thread deliver command results without owning the bridge.
#[derive(Clone)]
pub struct ResultHandle {
    core: Weak<BridgeCore>,
}

impl ResultHandle {
    /// Deliver the result of command `id`. Returns `false` if that command
    /// is no longer waiting or the bridge is gone.
    pub fn notify(&self, id: CommandId, text: &str) -> bool {
        match self.core.upgrade() {
            Some(core) => core.notify_result(id, text),
            None => false,
        }
    }
}

/// Bidirectional message bridge over a pair of named pipes.
pub struct Bridge {
    core: Arc<BridgeCore>,
    receiver: Mutex<Option<ReceiverWorker>>,
    receiver_exited: Arc<Latch>,
    shut_down: AtomicBool,
}

impl Bridge {
    /// Open the configured named pipes and start receiving.
    ///
    /// A pipe that cannot be created is logged and the bridge runs without
    /// messaging until a later reopen succeeds.
    pub fn start(config: BridgeConfig) -> Result<Self, BridgeError> {
        let channel = NamedPipeChannel::new(&config)?;
        Self::with_transport(config, Arc::new(channel))
    }

    /// Start the bridge over an arbitrary transport.
    pub fn with_transport(
        config: BridgeConfig,
        channel: Arc<dyn Transport>,
    ) -> Result<Self, BridgeError> {
        if let Err(e) = channel.open() {
            warn!("[BRIDGE] No pipe available: {}", e);
        }

        let core = Arc::new(BridgeCore {
            config,
            channel: Arc::clone(&channel),
            state: Mutex::new(CoordinatorState::default()),
            command_gate: Mutex::new(()),
            result_ready: BinarySemaphore::new(),
            dispatcher: Mutex::new(None),
            sender: Mutex::new(SenderSlot::Idle),
        });

        let sink: Weak<dyn CommandSink> = Arc::downgrade(&core) as Weak<dyn CommandSink>;
        let receiver =
            ReceiverWorker::spawn(channel, sink, &core.config).map_err(BridgeError::Spawn)?;
        let receiver_exited = receiver.exit_latch();

        info!("[BRIDGE] Bridge started on '{}'", core.config.pipe_name);
        Ok(Self {
            core,
            receiver: Mutex::new(Some(receiver)),
            receiver_exited,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.core.config
    }

    pub fn set_dispatcher(&self, dispatcher: Arc<dyn CommandDispatcher>) {
        *lock(&self.core.dispatcher) = Some(dispatcher);
    }

    pub fn clear_dispatcher(&self) {
        lock(&self.core.dispatcher).take();
    }

    /// Handle one inbound command synchronously: dispatch it, wait for the
    /// result and queue the reply. Normally called by the receiver worker.
    /// Concurrent callers are answered one after another.
    pub fn accept_command(&self, command: &str) {
        self.core.accept_command(command);
    }

    /// Deliver the result of command `id`. Ignored unless `id` is the
    /// command currently waiting.
    pub fn notify_result(&self, id: CommandId, text: &str) -> bool {
        self.core.notify_result(id, text)
    }

    pub fn result_handle(&self) -> ResultHandle {
        ResultHandle {
            core: Arc::downgrade(&self.core),
        }
    }

    /// Queue an unsolicited notification. Refused while any command is in flight.
    pub fn post_acknowledgement(&self, code: i32, text: &str) -> bool {
        self.core.post_acknowledgement(code, text)
    }

    /// Later commands are answered with [`SHUTTING_DOWN_REPLY`]. Cannot be undone.
    pub fn set_shutting_down(&self) {
        self.core.set_shutting_down();
    }

    pub fn is_receiving(&self) -> bool {
        lock(&self.core.state).in_flight > 0
    }

    pub fn is_shutting_down(&self) -> bool {
        lock(&self.core.state).shutting_down
    }

    /// Block until the receiver stops (peer sent `QUIT`, or shutdown).
    /// `None` waits forever.
    pub fn wait_for_receiver_exit(&self, timeout: Option<Duration>) -> bool {
        self.receiver_exited.wait(timeout)
    }

    /// Wait until every queued message has been written.
    pub fn flush(&self, timeout: Duration) -> bool {
        let watch = match &*lock(&self.core.sender) {
            SenderSlot::Running(worker) => worker.idle_watch(),
            _ => return true,
        };
        watch.wait(timeout)
    }

    /// Messages queued but not yet picked up by the sender.
    pub fn pending_outbound(&self) -> usize {
        match &*lock(&self.core.sender) {
            SenderSlot::Running(worker) => worker.pending(),
            _ => 0,
        }
    }

    /// Stop both workers and close the channel. Undelivered messages are
    /// discarded. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("[BRIDGE] Shutting down");
        self.core.set_shutting_down();

        let receiver = lock(&self.receiver).take();
        if let Some(mut receiver) = receiver {
            receiver.request_stop();
            self.core.abandon_pending();
            // Closing interrupts a blocked read.
            self.core.channel.close();
            receiver.end();
        }

        self.core.end_sender();
        self.core.channel.close();
        info!("[BRIDGE] Bridge stopped");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
