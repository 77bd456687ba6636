// In-memory transport for unit tests.

use super::channel::{ChannelError, Transport};
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PipeEvent {
    Open,
    Close,
    Write(String),
}

/// Transport fed from a script of inbound messages that records everything written.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    open: AtomicBool,
    fail_open: AtomicBool,
    inbound: Mutex<VecDeque<String>>,
    events: Mutex<Vec<PipeEvent>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_inbound(&self, message: &str) {
        lock(&self.inbound).push_back(message.to_string());
    }

    pub(crate) fn pending_inbound(&self) -> usize {
        lock(&self.inbound).len()
    }

    pub(crate) fn fail_next_opens(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn events(&self) -> Vec<PipeEvent> {
        lock(&self.events).clone()
    }

    pub(crate) fn writes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PipeEvent::Write(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Poll until at least `count` writes were recorded or `timeout` elapses.
    pub(crate) fn wait_for_writes(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let writes = self.writes();
            if writes.len() >= count || Instant::now() >= deadline {
                return writes;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}

impl Transport for ScriptedTransport {
    fn open(&self) -> Result<(), ChannelError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(ChannelError::CreateFailed {
                endpoint: "scripted".to_string(),
                source: std::io::Error::other("scripted failure"),
            });
        }
        if !self.open.swap(true, Ordering::SeqCst) {
            lock(&self.events).push(PipeEvent::Open);
        }
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            lock(&self.events).push(PipeEvent::Close);
        }
    }

    fn read(&self) -> Option<String> {
        if !self.is_open() {
            return None;
        }
        lock(&self.inbound).pop_front()
    }

    fn write(&self, text: &str) -> bool {
        if !self.is_open() {
            return false;
        }
        lock(&self.events).push(PipeEvent::Write(text.to_string()));
        true
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
