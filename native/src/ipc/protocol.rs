// Plain-text message protocol spoken over the pipe pair.

/// Inbound command that makes the receiver worker stop reading.
pub const QUIT_COMMAND: &str = "QUIT";

/// Separator between command tokens and between an acknowledgement code and its text.
pub const TOKEN_SEPARATOR: char = '\t';

/// Code carried by replies; replies have no acknowledgement code.
pub const NO_CODE: i32 = -1;

/// Terminator appended to every payload written to the pipe.
pub const TERMINATOR: u8 = 0;

/// Message queued for delivery to the peer.
///
/// A message with code [`NO_CODE`] and empty text is the empty sentinel
/// and is never written to the pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub code: i32,
    pub text: String,
}

impl OutboundMessage {
    /// Reply to an inbound command.
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            code: NO_CODE,
            text: text.into(),
        }
    }

    /// One-way notification with an acknowledgement code.
    pub fn acknowledgement(code: i32, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    pub fn empty() -> Self {
        Self::reply(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.code == NO_CODE && self.text.is_empty()
    }

    pub fn is_reply(&self) -> bool {
        self.code == NO_CODE
    }

    /// Text written to the pipe: replies go out bare, acknowledgements as `<code>\t<text>`.
    pub fn to_wire(&self) -> String {
        if self.is_reply() {
            self.text.clone()
        } else {
            format!("{}{}{}", self.code, TOKEN_SEPARATOR, self.text)
        }
    }
}

impl Default for OutboundMessage {
    fn default() -> Self {
        Self::empty()
    }
}

/// True for the inbound sentinel that terminates the receiver.
pub fn is_quit(command: &str) -> bool {
    command == QUIT_COMMAND
}

/// Encode text as one pipe message (payload followed by the terminator).
pub fn encode_payload(text: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(text.len() + 1);
    payload.extend_from_slice(text.as_bytes());
    payload.push(TERMINATOR);
    payload
}

/// Decode one pipe message, stopping at the first terminator.
pub fn decode_payload(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .position(|&b| b == TERMINATOR)
        .unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
