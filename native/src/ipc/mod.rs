// IPC layer: paired named pipes, an outbound queue and the two worker threads
// that move messages across them.

pub mod channel;
pub mod protocol;
pub mod queue;
pub mod receiver;
pub mod sender;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{endpoint_name, ChannelError, Direction, NamedPipeChannel, Transport};
pub use protocol::{OutboundMessage, NO_CODE, QUIT_COMMAND, TOKEN_SEPARATOR};
pub use queue::OutboundQueue;
pub use receiver::{CommandSink, ReceiverWorker};
pub use sender::{IdleWatch, SenderWorker};

/// Logical pipe name shared with the peer application
pub use crate::config::DEFAULT_PIPE_NAME as PIPE_NAME;
