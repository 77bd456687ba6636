// Turns command text into host operations and a reply string.

use super::commands::{Command, InsertRequest};
use log::{debug, info};
use thiserror::Error;

pub const OK_REPLY: &str = "ok";

/// Failures of host operations. The display text is the reply sent to the peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Couldn't open active project")]
    NoActiveProject,
    #[error("No active persistent project")]
    NoPersistentProject,
    #[error("Couldn't initialize Action Manager")]
    ActionManagerUnavailable,
    #[error("Access to pool failed")]
    PoolUnavailable,
    #[error("No pool medium can be created")]
    MediumUnavailable,
    #[error("Fail")]
    ProjectObjectUnavailable,
    #[error("No audio track selected or no audio track available")]
    NoAudioTrack,
    #[error("Audio event cannot be created")]
    EventUnavailable,
    #[error("Undo Object cannot be created")]
    UndoUnavailable,
    #[error("Couldn't add media to pool")]
    PoolAddFailed,
    #[error("Couldn't create audio clip")]
    ClipUnavailable,
}

/// Executes one command and produces its reply text.
pub trait CommandInterpreter: Send {
    fn interpret(&mut self, command: &str) -> String;
}

/// The project-editing surface the interpreter drives.
pub trait ProjectHost: Send {
    fn has_active_project(&self) -> bool;

    /// File path of the active project, `None` if it was never saved.
    fn project_path(&self) -> Option<String>;

    /// Raise the active project's window.
    fn bring_to_front(&mut self);

    /// Paste the clipboard at the cursor.
    fn paste(&mut self) -> Result<(), HostError>;

    /// File paths of every medium in the active project's pool.
    fn pool_paths(&self) -> Result<Vec<String>, HostError>;

    fn add_to_pool(&mut self, path: &str) -> Result<(), HostError>;

    /// Place a file on a track of the active project.
    fn insert_file(&mut self, request: &InsertRequest) -> Result<(), HostError>;
}

/// Command interpreter backed by a [`ProjectHost`].
pub struct HostInterpreter<H> {
    host: H,
}

impl<H: ProjectHost> HostInterpreter<H> {
    pub fn new(host: H) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn execute(&mut self, command: Command) -> Result<String, HostError> {
        match command {
            Command::Empty => Ok("Empty command".to_string()),
            Command::ProjectPath => self.host.project_path().ok_or(HostError::NoPersistentProject),
            _ if !self.host.has_active_project() => Err(HostError::NoActiveProject),
            Command::InsertFile(request) => {
                self.host.bring_to_front();
                self.host.insert_file(&request)?;
                info!("[HOST] Inserted {}", request.path);
                Ok(OK_REPLY.to_string())
            }
            Command::PasteClipboard => {
                self.host.bring_to_front();
                self.host.paste()?;
                Ok(OK_REPLY.to_string())
            }
            Command::TransferToPool(paths) => self.transfer_to_pool(&paths),
            Command::Unknown(text) => Ok(format!("Unknown command: {}", text)),
        }
    }

    /// Add every path not already pooled. Replies `"ok"` unless some file failed,
    /// in which case the failures are listed.
    fn transfer_to_pool(&mut self, paths: &[String]) -> Result<String, HostError> {
        let mut pooled = self.host.pool_paths()?;
        let mut failures = Vec::new();

        for path in paths {
            if pooled.iter().any(|p| p.eq_ignore_ascii_case(path)) {
                debug!("[HOST] {} already in pool", path);
                continue;
            }
            match self.host.add_to_pool(path) {
                Ok(()) => pooled.push(path.clone()),
                Err(e) => failures.push(e.to_string()),
            }
        }

        if failures.is_empty() {
            Ok(OK_REPLY.to_string())
        } else {
            Ok(failures.join("; "))
        }
    }
}

impl<H: ProjectHost> CommandInterpreter for HostInterpreter<H> {
    fn interpret(&mut self, command: &str) -> String {
        let reply = match self.execute(Command::parse(command)) {
            Ok(reply) => reply,
            Err(e) => e.to_string(),
        };
        debug!("[HOST] '{}' -> '{}'", command, reply);
        reply
    }
}
