// Host side of the bridge: command parsing, the interpreter that executes
// commands against a project host, and the thread that runs it.

pub mod commands;
pub mod dispatch;
pub mod interpreter;
pub mod memory;

pub use commands::{is_asynchronous, Command, InsertRequest};
pub use dispatch::HostThread;
pub use interpreter::{CommandInterpreter, HostError, HostInterpreter, ProjectHost, OK_REPLY};
pub use memory::{HostEvent, MemoryHost, MemoryProject, MemoryTrack, PlacedEvent};
