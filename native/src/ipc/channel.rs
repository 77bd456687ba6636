// Paired one-directional named pipes driven through a private Tokio runtime.
//
// Windows: message-mode named pipe servers `\\<host>\pipe\<name>_IN|_OUT`.
// Unix: FIFOs `<pipe_dir>/<name>_IN|_OUT`, created on open and unlinked on close.

use super::protocol::{decode_payload, encode_payload};
use crate::config::BridgeConfig;
use crate::sync::lock;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to create pipe endpoint {endpoint}: {source}")]
    CreateFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Pipe is not open")]
    NotOpen,
    #[error("Message of {len} bytes exceeds pipe capacity of {capacity} bytes")]
    MessageTooLarge { len: usize, capacity: usize },
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("No data received")]
    NoData,
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Pipe was reset while waiting")]
    Reset,
    #[error("Failed to create pipe runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte transport between this process and the peer.
///
/// Implementations are either fully open (both directions) or fully closed.
/// `read` and `write` never fail loudly: a missing message or a failed
/// write is an expected outcome the caller retries later.
pub trait Transport: Send + Sync {
    /// Create both endpoints. Opening an open transport is a no-op.
    fn open(&self) -> Result<(), ChannelError>;
    /// Destroy both endpoints. Idempotent.
    fn close(&self);
    /// Wait for one inbound message.
    fn read(&self) -> Option<String>;
    /// Send one message. Returns `false` if it was not fully written.
    fn write(&self, text: &str) -> bool;
    fn is_open(&self) -> bool;
}

/// Direction of an endpoint, seen from this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn suffix(self) -> &'static str {
        match self {
            Direction::Inbound => "_IN",
            Direction::Outbound => "_OUT",
        }
    }
}

/// Endpoint name for a logical pipe name, e.g. `BaseHeadNuendoPipe_IN`.
pub fn endpoint_name(pipe_name: &str, direction: Direction) -> String {
    format!("{}{}", pipe_name, direction.suffix())
}

struct Endpoints {
    inbound: Arc<sys::Inbound>,
    outbound: Arc<sys::Outbound>,
}

/// Full-duplex channel built from two named pipes.
pub struct NamedPipeChannel {
    pipe_name: String,
    pipe_host: String,
    pipe_dir: PathBuf,
    capacity: usize,
    timeout: Duration,
    runtime: Runtime,
    endpoints: Mutex<Option<Endpoints>>,
    // Bumped on every close so a blocked reader drops the stale endpoint.
    resets: watch::Sender<u64>,
}

impl NamedPipeChannel {
    /// Create a closed channel.
    pub fn new(config: &BridgeConfig) -> Result<Self, ChannelError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("pipe-bridge-io")
            .enable_all()
            .build()
            .map_err(ChannelError::Runtime)?;

        let (resets, _) = watch::channel(0);

        Ok(Self {
            pipe_name: config.pipe_name.clone(),
            pipe_host: config.pipe_host.clone(),
            pipe_dir: config.pipe_dir.clone(),
            capacity: config.buffer_capacity,
            timeout: config.read_timeout(),
            runtime,
            endpoints: Mutex::new(None),
            resets,
        })
    }

    /// Full OS path of one endpoint.
    pub fn endpoint_path(&self, direction: Direction) -> PathBuf {
        let name = endpoint_name(&self.pipe_name, direction);
        if cfg!(windows) {
            PathBuf::from(format!(r"\\{}\pipe\{}", self.pipe_host, name))
        } else {
            self.pipe_dir.join(name)
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn try_read(&self) -> Result<String, ChannelError> {
        let (inbound, mut resets) = {
            let guard = lock(&self.endpoints);
            let endpoints = guard.as_ref().ok_or(ChannelError::NotOpen)?;
            (Arc::clone(&endpoints.inbound), self.resets.subscribe())
        };

        let mut buf = vec![0u8; self.capacity];
        let read = self.runtime.block_on(async {
            tokio::select! {
                result = tokio::time::timeout(self.timeout, sys::read_message(&inbound, &mut buf)) => {
                    match result {
                        Ok(read) => read.map_err(ChannelError::from),
                        Err(_) => Err(ChannelError::Timeout(self.timeout)),
                    }
                }
                _ = resets.changed() => Err(ChannelError::Reset),
            }
        })?;

        if read == 0 {
            return Err(ChannelError::NoData);
        }
        Ok(decode_payload(&buf[..read]))
    }

    fn try_write(&self, text: &str) -> Result<(), ChannelError> {
        let payload = encode_payload(text);
        if payload.len() > self.capacity {
            return Err(ChannelError::MessageTooLarge {
                len: payload.len(),
                capacity: self.capacity,
            });
        }

        let outbound = {
            let guard = lock(&self.endpoints);
            let endpoints = guard.as_ref().ok_or(ChannelError::NotOpen)?;
            Arc::clone(&endpoints.outbound)
        };

        let written = self
            .runtime
            .block_on(async {
                tokio::time::timeout(self.timeout, sys::write_message(&outbound, &payload)).await
            })
            .map_err(|_| ChannelError::Timeout(self.timeout))??;

        if written != payload.len() {
            return Err(ChannelError::ShortWrite {
                written,
                expected: payload.len(),
            });
        }
        Ok(())
    }
}

impl Transport for NamedPipeChannel {
    fn open(&self) -> Result<(), ChannelError> {
        let mut guard = lock(&self.endpoints);
        if guard.is_some() {
            return Ok(());
        }

        let _rt = self.runtime.enter();

        let inbound_path = self.endpoint_path(Direction::Inbound);
        let inbound = sys::create_inbound(&inbound_path, self.capacity).map_err(|source| {
            ChannelError::CreateFailed {
                endpoint: inbound_path.display().to_string(),
                source,
            }
        })?;

        let outbound_path = self.endpoint_path(Direction::Outbound);
        let outbound = match sys::create_outbound(&outbound_path, self.capacity) {
            Ok(outbound) => outbound,
            Err(source) => {
                // Never leave the channel half-open.
                drop(inbound);
                sys::remove_endpoint(&inbound_path);
                return Err(ChannelError::CreateFailed {
                    endpoint: outbound_path.display().to_string(),
                    source,
                });
            }
        };

        *guard = Some(Endpoints {
            inbound: Arc::new(inbound),
            outbound: Arc::new(outbound),
        });
        debug!(
            "[PIPE] Opened {} / {}",
            inbound_path.display(),
            outbound_path.display()
        );
        Ok(())
    }

    fn close(&self) {
        let taken = lock(&self.endpoints).take();
        let Some(endpoints) = taken else {
            return;
        };

        self.resets.send_modify(|generation| *generation += 1);

        {
            let _rt = self.runtime.enter();
            drop(endpoints);
        }
        sys::remove_endpoint(&self.endpoint_path(Direction::Inbound));
        sys::remove_endpoint(&self.endpoint_path(Direction::Outbound));
        debug!("[PIPE] Closed {}", self.pipe_name);
    }

    fn read(&self) -> Option<String> {
        match self.try_read() {
            Ok(message) => {
                info!("[PIPE] Received: {}", message);
                Some(message)
            }
            Err(ChannelError::NotOpen) | Err(ChannelError::Reset) | Err(ChannelError::NoData) => {
                None
            }
            Err(e) => {
                debug!("[PIPE] Read: {}", e);
                None
            }
        }
    }

    fn write(&self, text: &str) -> bool {
        match self.try_write(text) {
            Ok(()) => {
                info!("[PIPE] Sent: {}", text);
                true
            }
            Err(e) => {
                warn!("[PIPE] Write failed: {}", e);
                false
            }
        }
    }

    fn is_open(&self) -> bool {
        lock(&self.endpoints).is_some()
    }
}

impl Drop for NamedPipeChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(unix)]
mod sys {
    use nix::errno::Errno;
    use nix::sys::stat::Mode;
    use std::io;
    use std::path::Path;
    use tokio::net::unix::pipe;

    pub(super) type Inbound = pipe::Receiver;
    pub(super) type Outbound = pipe::Sender;

    fn make_fifo(path: &Path) -> io::Result<()> {
        match nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
            Ok(()) | Err(Errno::EEXIST) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    pub(super) fn create_inbound(path: &Path, _capacity: usize) -> io::Result<Inbound> {
        make_fifo(path)?;
        let mut options = pipe::OpenOptions::new();
        // Holding a write end as well keeps reads from seeing EOF between peer connections.
        #[cfg(target_os = "linux")]
        options.read_write(true);
        options.open_receiver(path)
    }

    pub(super) fn create_outbound(path: &Path, _capacity: usize) -> io::Result<Outbound> {
        make_fifo(path)?;
        let mut options = pipe::OpenOptions::new();
        #[cfg(target_os = "linux")]
        options.read_write(true);
        options.open_sender(path)
    }

    pub(super) fn remove_endpoint(path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::debug!("[PIPE] Failed to remove {}: {}", path.display(), e);
            }
        }
    }

    pub(super) async fn read_message(inbound: &Inbound, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            inbound.readable().await?;
            match inbound.try_read(buf) {
                Ok(read) => return Ok(read),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub(super) async fn write_message(outbound: &Outbound, payload: &[u8]) -> io::Result<usize> {
        loop {
            outbound.writable().await?;
            match outbound.try_write(payload) {
                Ok(written) => return Ok(written),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::io;
    use std::path::Path;
    use tokio::net::windows::named_pipe::{NamedPipeServer, PipeMode, ServerOptions};

    pub(super) type Inbound = NamedPipeServer;
    pub(super) type Outbound = NamedPipeServer;

    fn server_options(capacity: usize) -> ServerOptions {
        let mut options = ServerOptions::new();
        options
            .pipe_mode(PipeMode::Message)
            .max_instances(1)
            .in_buffer_size(capacity as u32)
            .out_buffer_size(capacity as u32);
        options
    }

    pub(super) fn create_inbound(path: &Path, capacity: usize) -> io::Result<Inbound> {
        server_options(capacity)
            .access_inbound(true)
            .access_outbound(false)
            .create(path)
    }

    pub(super) fn create_outbound(path: &Path, capacity: usize) -> io::Result<Outbound> {
        server_options(capacity)
            .access_inbound(false)
            .access_outbound(true)
            .create(path)
    }

    // Pipe instances disappear with their last handle.
    pub(super) fn remove_endpoint(_path: &Path) {}

    pub(super) async fn read_message(inbound: &Inbound, buf: &mut [u8]) -> io::Result<usize> {
        inbound.connect().await?;
        loop {
            inbound.readable().await?;
            match inbound.try_read(buf) {
                Ok(read) => return Ok(read),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub(super) async fn write_message(outbound: &Outbound, payload: &[u8]) -> io::Result<usize> {
        outbound.connect().await?;
        loop {
            outbound.writable().await?;
            match outbound.try_write(payload) {
                Ok(written) => return Ok(written),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::{Read, Write};
    use std::time::Instant;

    fn test_config(dir: &std::path::Path) -> BridgeConfig {
        BridgeConfig {
            pipe_name: "TestPipe".to_string(),
            pipe_dir: dir.to_path_buf(),
            read_timeout_ms: 200,
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn test_endpoint_names() {
        assert_eq!(
            endpoint_name("BaseHeadNuendoPipe", Direction::Inbound),
            "BaseHeadNuendoPipe_IN"
        );
        assert_eq!(
            endpoint_name("BaseHeadNuendoPipe", Direction::Outbound),
            "BaseHeadNuendoPipe_OUT"
        );
    }

    #[test]
    fn test_open_and_close_both_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let channel = NamedPipeChannel::new(&test_config(dir.path())).unwrap();
        let inbound = channel.endpoint_path(Direction::Inbound);
        let outbound = channel.endpoint_path(Direction::Outbound);
        assert!(!channel.is_open());

        channel.open().unwrap();
        assert!(channel.is_open());
        assert!(inbound.exists());
        assert!(outbound.exists());

        channel.close();
        assert!(!channel.is_open());
        assert!(!inbound.exists());
        assert!(!outbound.exists());

        // Idempotent, and reopenable.
        channel.close();
        channel.open().unwrap();
        channel.open().unwrap();
        assert!(channel.is_open());
    }

    #[test]
    fn test_failed_outbound_leaves_channel_closed() {
        let dir = tempfile::tempdir().unwrap();
        let channel = NamedPipeChannel::new(&test_config(dir.path())).unwrap();
        // A directory squatting on the outbound name cannot be opened as a FIFO.
        std::fs::create_dir(channel.endpoint_path(Direction::Outbound)).unwrap();

        let err = channel.open().unwrap_err();
        assert!(matches!(err, ChannelError::CreateFailed { .. }));
        assert!(!channel.is_open());
        assert!(!channel.endpoint_path(Direction::Inbound).exists());
    }

    #[test]
    fn test_write_reaches_peer_with_terminator() {
        let dir = tempfile::tempdir().unwrap();
        let channel = NamedPipeChannel::new(&test_config(dir.path())).unwrap();
        channel.open().unwrap();

        let mut peer = OpenOptions::new()
            .read(true)
            .open(channel.endpoint_path(Direction::Outbound))
            .unwrap();
        assert!(channel.write("ok"));

        let mut buf = [0u8; 3];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok\0");
    }

    #[test]
    fn test_read_from_peer() {
        let dir = tempfile::tempdir().unwrap();
        let channel = NamedPipeChannel::new(&test_config(dir.path())).unwrap();
        channel.open().unwrap();

        let mut peer = OpenOptions::new()
            .write(true)
            .open(channel.endpoint_path(Direction::Inbound))
            .unwrap();
        peer.write_all(b"project path\0").unwrap();

        assert_eq!(channel.read().as_deref(), Some("project path"));
    }

    #[test]
    fn test_read_times_out_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let channel = NamedPipeChannel::new(&test_config(dir.path())).unwrap();
        channel.open().unwrap();

        let start = Instant::now();
        assert!(channel.read().is_none());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_close_interrupts_blocked_reader() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            read_timeout_ms: 10_000,
            ..test_config(dir.path())
        };
        let channel = Arc::new(NamedPipeChannel::new(&config).unwrap());
        channel.open().unwrap();

        let reader = {
            let channel = Arc::clone(&channel);
            std::thread::spawn(move || {
                let start = Instant::now();
                (channel.read(), start.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        channel.close();

        let (message, elapsed) = reader.join().unwrap();
        assert!(message.is_none());
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_write_rejects_closed_and_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            buffer_capacity: 8,
            ..test_config(dir.path())
        };
        let channel = NamedPipeChannel::new(&config).unwrap();
        assert!(!channel.write("ok"));

        channel.open().unwrap();
        // 8 bytes of text plus terminator does not fit.
        assert!(!channel.write("12345678"));
        assert!(channel.write("1234567"));
    }
}
