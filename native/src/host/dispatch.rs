// Runs the interpreter on its own thread so the receiver never executes
// host operations itself.

use super::commands::is_asynchronous;
use super::interpreter::CommandInterpreter;
use crate::bridge::{CommandDispatcher, CommandId, DispatchError, ResultHandle};
use crate::sync::lock;
use log::{debug, info, warn};
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

const THREAD_NAME: &str = "pipe-bridge-host";

/// Dispatcher that queues commands for a dedicated host thread.
pub struct HostThread {
    commands: Mutex<Option<Sender<(CommandId, String)>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HostThread {
    pub fn spawn<I>(mut interpreter: I, results: ResultHandle) -> std::io::Result<Self>
    where
        I: CommandInterpreter + 'static,
    {
        let (tx, rx) = mpsc::channel::<(CommandId, String)>();

        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                info!("[HOST] Host thread started");
                for (id, command) in rx {
                    let reply = interpreter.interpret(&command);
                    // The bridge already answered these.
                    if is_asynchronous(&command) {
                        debug!("[HOST] '{}' finished with '{}'", command, reply);
                        continue;
                    }
                    if !results.notify(id, &reply) {
                        warn!("[HOST] Nobody was waiting for the result of '{}'", command);
                    }
                }
                info!("[HOST] Host thread stopped");
            })?;

        Ok(Self {
            commands: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop accepting commands and wait for the queued ones to finish.
    pub fn stop(&self) {
        drop(lock(&self.commands).take());
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            // Dropped from the host thread itself: it exits once the channel closes.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("[HOST] Host thread panicked");
            }
        }
    }
}

impl CommandDispatcher for HostThread {
    fn dispatch(&self, id: CommandId, command: &str) -> Result<(), DispatchError> {
        let commands = lock(&self.commands);
        let tx = commands.as_ref().ok_or(DispatchError::Disconnected)?;
        tx.send((id, command.to_string()))
            .map_err(|_| DispatchError::Disconnected)
    }
}

impl Drop for HostThread {
    fn drop(&mut self) {
        self.stop();
    }
}
