//! Message bridge between a host application and an external peer over a
//! pair of named pipes (`<name>_IN` for commands, `<name>_OUT` for replies
//! and lifecycle acknowledgements).

pub mod bridge;
pub mod config;
pub mod host;
pub mod ipc;
pub mod logging;
pub mod notifier;
pub mod sync;

pub use bridge::{
    Bridge, BridgeError, CommandDispatcher, CommandId, DispatchError, ResultHandle,
    ASYNC_REPLY, SHUTTING_DOWN_REPLY, TIMEOUT_REPLY,
};
pub use config::{BridgeConfig, ConfigError};
pub use host::{CommandInterpreter, HostInterpreter, HostThread, MemoryHost, ProjectHost};
pub use ipc::{ChannelError, NamedPipeChannel, OutboundMessage, Transport, PIPE_NAME};
pub use notifier::{AckCode, LifecycleNotifier};

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
