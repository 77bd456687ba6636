// Command grammar understood by the host: tab separated tokens, the first one
// naming the command (case-insensitive).

use crate::ipc::TOKEN_SEPARATOR;

const INSERT_FILE: &str = "insert file";
const PROJECT_PATH: &str = "project path";
const TRANSFER_TO_POOL: &str = "xfertopool file";

/// Placement request carried by `insert file <path> ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRequest {
    pub path: String,
    pub description: String,
    /// Tracks to skip below the first selected audio track.
    pub track_offset: u32,
    /// Seconds added to the cursor position.
    pub cursor_offset: f64,
    /// Offset into the source file, seconds. Only positive values are kept.
    pub in_time: Option<f64>,
    /// Event length in seconds. Only positive values are kept.
    pub length: Option<f64>,
}

impl InsertRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: String::new(),
            track_offset: 0,
            cursor_offset: 0.0,
            in_time: None,
            length: None,
        }
    }

    /// Build a request from the tokens after the command name.
    /// Missing or unparseable numbers keep their defaults.
    fn from_arguments(args: &[&str]) -> Self {
        let mut request = Self::new(args.first().copied().unwrap_or_default());
        if let Some(description) = args.get(1) {
            request.description = description.to_string();
        }
        if let Some(offset) = args.get(2).and_then(|t| t.trim().parse().ok()) {
            request.track_offset = offset;
        }
        if let Some(offset) = args.get(3).and_then(|t| t.trim().parse().ok()) {
            request.cursor_offset = offset;
        }
        request.in_time = args.get(4).and_then(|t| positive(t));
        request.length = args.get(5).and_then(|t| positive(t));
        request
    }
}

fn positive(token: &str) -> Option<f64> {
    token.trim().parse::<f64>().ok().filter(|value| *value > 0.0)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Empty,
    /// `insert file` followed by at least a path.
    InsertFile(InsertRequest),
    /// Bare `insert file`: paste the clipboard at the cursor.
    PasteClipboard,
    ProjectPath,
    TransferToPool(Vec<String>),
    Unknown(String),
}

impl Command {
    pub fn parse(text: &str) -> Self {
        if text.trim().is_empty() {
            return Command::Empty;
        }

        let tokens: Vec<&str> = text.split(TOKEN_SEPARATOR).collect();
        let name = tokens[0];

        if name.eq_ignore_ascii_case(INSERT_FILE) && tokens.len() >= 2 {
            return Command::InsertFile(InsertRequest::from_arguments(&tokens[1..]));
        }
        if text.eq_ignore_ascii_case(INSERT_FILE) {
            return Command::PasteClipboard;
        }
        if text.eq_ignore_ascii_case(PROJECT_PATH) {
            return Command::ProjectPath;
        }
        if name.eq_ignore_ascii_case(TRANSFER_TO_POOL) {
            return Command::TransferToPool(tokens[1..].iter().map(|t| t.to_string()).collect());
        }
        Command::Unknown(text.to_string())
    }
}

/// Commands the bridge answers immediately with `"ok"` instead of waiting
/// for the host to finish them.
pub fn is_asynchronous(text: &str) -> bool {
    text.eq_ignore_ascii_case(INSERT_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_insert_request() {
        let request = match Command::parse("insert file\tc:\\a.wav\tMyName\t1\t2.0\t0.5\t3.0") {
            Command::InsertFile(request) => request,
            other => panic!("expected insert file, got {:?}", other),
        };
        assert_eq!(request.path, "c:\\a.wav");
        assert_eq!(request.description, "MyName");
        assert_eq!(request.track_offset, 1);
        assert_eq!(request.cursor_offset, 2.0);
        assert_eq!(request.in_time, Some(0.5));
        assert_eq!(request.length, Some(3.0));
    }

    #[test]
    fn test_insert_defaults() {
        assert_eq!(
            Command::parse("INSERT FILE\t/sfx/door.wav"),
            Command::InsertFile(InsertRequest::new("/sfx/door.wav"))
        );
    }

    #[test]
    fn test_non_positive_and_garbage_numbers_fall_back() {
        let Command::InsertFile(request) =
            Command::parse("insert file\ta.wav\t\tabc\tx\t0\t-2.5")
        else {
            panic!("expected insert file");
        };
        assert_eq!(request.description, "");
        assert_eq!(request.track_offset, 0);
        assert_eq!(request.cursor_offset, 0.0);
        assert_eq!(request.in_time, None);
        assert_eq!(request.length, None);
    }

    #[test]
    fn test_bare_insert_is_paste() {
        assert_eq!(Command::parse("insert file"), Command::PasteClipboard);
        assert_eq!(Command::parse("Insert File"), Command::PasteClipboard);
        assert!(is_asynchronous("INSERT FILE"));
        assert!(!is_asynchronous("insert file\ta.wav"));
        assert!(!is_asynchronous("project path"));
    }

    #[test]
    fn test_project_path_and_pool() {
        assert_eq!(Command::parse("PROJECT PATH"), Command::ProjectPath);
        assert_eq!(
            Command::parse("xfertopool file\ta.wav\tb.wav"),
            Command::TransferToPool(vec!["a.wav".to_string(), "b.wav".to_string()])
        );
        assert_eq!(
            Command::parse("xfertopool file"),
            Command::TransferToPool(Vec::new())
        );
    }

    #[test]
    fn test_empty_and_unknown() {
        assert_eq!(Command::parse(""), Command::Empty);
        assert_eq!(Command::parse("  "), Command::Empty);
        assert_eq!(
            Command::parse("project path\textra"),
            Command::Unknown("project path\textra".to_string())
        );
        assert_eq!(
            Command::parse("render mixdown"),
            Command::Unknown("render mixdown".to_string())
        );
    }
}
