//! Plain-text conversation logs.
//!
//! Each log is a sequence of entries of the form
//!
//! ```text
//! # user:
//! What is the capital of Moravia?
//!
//! # assistant:
//! Brno.
//!
//! ```
//!
//! Tool invocations use the `assistant calling function` and
//! `function result` headers; the first content line holds the tool name.
//! Logs are only ever appended to. Content is written fragment by fragment
//! while a response streams in, so a log interrupted mid-response is still a
//! readable prefix of the conversation.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::message::{Message, Role};

pub const INITIAL_LOG: &str = ".cli-gpt.initial.md";
pub const CONVERSATION_LOG: &str = ".cli-gpt.conversation.md";
pub const ONE_SHOT_LOG: &str = ".cli-gpt.conversation.one-shot.md";

const PADDING: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Initial,
    Conversation,
    OneShot,
}

impl Destination {
    pub fn file_name(self) -> &'static str {
        match self {
            Destination::Initial => INITIAL_LOG,
            Destination::Conversation => CONVERSATION_LOG,
            Destination::OneShot => ONE_SHOT_LOG,
        }
    }
}

pub fn encode_role_header(role: Role) -> String {
    format!("# {}:\n", role.as_str())
}

pub fn encode_fragment(text: &str) -> &str {
    text
}

fn parse_header(line: &str) -> Option<Role> {
    let name = line.strip_prefix("# ")?.strip_suffix(':')?;
    Role::try_from(name).ok()
}

fn build_message(role: Role, lines: &[&str]) -> Message {
    match role {
        Role::User | Role::System | Role::Assistant => Message::text(role, lines.join("\n")),
        Role::AssistantToolCall => Message::tool_call(lines[0], lines[1..].join("\n")),
        Role::ToolResult => Message::tool_result(lines[0], lines[1..].join("\n")),
    }
}

/// Parses a log into messages.
///
/// Blank lines are separators and never part of a message. Lines that look
/// like headers but name an unknown role are kept as content. Lines before
/// the first header open the first entry, so a hand-written note above it is
/// not lost.
pub fn decode(log_text: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut role: Option<Role> = None;
    let mut content: Vec<&str> = Vec::new();

    for line in log_text.lines() {
        if line.is_empty() {
            continue;
        }

        match parse_header(line) {
            Some(next_role) => {
                if let Some(current) = role {
                    if !content.is_empty() {
                        messages.push(build_message(current, &content));
                    }
                    content.clear();
                }
                role = Some(next_role);
            }
            None => content.push(line),
        }
    }

    if let (Some(current), false) = (role, content.is_empty()) {
        messages.push(build_message(current, &content));
    }

    messages
}

/// The three logs of one working directory.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, destination: Destination) -> PathBuf {
        self.dir.join(destination.file_name())
    }

    /// Messages of a single log; a log that does not exist is empty.
    pub fn read_log(&self, destination: Destination) -> io::Result<Vec<Message>> {
        match fs::read_to_string(self.path(destination)) {
            Ok(text) => Ok(decode(&text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Transcript sent with a request targeting `destination`: the initial
    /// log followed by the destination's own log.
    pub fn messages(&self, destination: Destination) -> io::Result<Vec<Message>> {
        let mut messages = self.read_log(Destination::Initial)?;
        if destination != Destination::Initial {
            messages.extend(self.read_log(destination)?);
        }
        Ok(messages)
    }

    pub fn append(&self, destination: Destination, message: &Message) -> io::Result<()> {
        self.append_role_header(destination, message.role())?;
        self.append_fragment(destination, &message.transcript_body())?;
        self.append_padding(destination)
    }

    /// Starts a new entry. A log left without trailing padding (an aborted
    /// response) is padded first so the header lands on its own line.
    pub fn append_role_header(&self, destination: Destination, role: Role) -> io::Result<()> {
        let path = self.path(destination);
        if !ends_with_newline(&path)? {
            debug!(log = %path.display(), "Padding unterminated entry");
            self.write(destination, PADDING)?;
        }
        self.write(destination, &encode_role_header(role))
    }

    pub fn append_fragment(&self, destination: Destination, fragment: &str) -> io::Result<()> {
        self.write(destination, encode_fragment(fragment))
    }

    pub fn append_padding(&self, destination: Destination) -> io::Result<()> {
        self.write(destination, PADDING)
    }

    /// Removes a log. Resetting a log that was never written is a no-op.
    pub fn reset(&self, destination: Destination) -> io::Result<()> {
        match fs::remove_file(self.path(destination)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn write(&self, destination: Destination, content: &str) -> io::Result<()> {
        if content.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(destination))?;
        file.write_all(content.as_bytes())?;
        file.flush()
    }
}

/// True for empty or missing files, which need no padding either.
fn ends_with_newline(path: &Path) -> io::Result<bool> {
    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err),
    };
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0_u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, TranscriptStore) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = TranscriptStore::new(temp_dir.path());
        (temp_dir, store)
    }

    #[test]
    fn decode_reads_all_role_variants() {
        let log = "# system:\nBe brief.\n\n# user:\nWeather?\n\n\
                   # assistant calling function:\nweather\n{\n  \"city\": \"Brno\"\n}\n\n\
                   # function result:\nweather\nSunny\n22C\n\n# assistant:\nSunny, 22C.\n\n";

        assert_eq!(
            decode(log),
            vec![
                Message::system("Be brief."),
                Message::user("Weather?"),
                Message::tool_call("weather", "{\n  \"city\": \"Brno\"\n}"),
                Message::tool_result("weather", "Sunny\n22C"),
                Message::assistant("Sunny, 22C."),
            ]
        );
    }

    #[test]
    fn decode_drops_empty_entries_and_tolerates_extra_blank_lines() {
        let log = "# user:\n\n\n# assistant:\nHello\n\n\n\n\n# user:\n";
        assert_eq!(decode(log), vec![Message::assistant("Hello")]);
    }

    #[test]
    fn decode_keeps_unknown_headers_as_content() {
        let log = "# user:\n# notes:\nremember this\n";
        assert_eq!(
            decode(log),
            vec![Message::user("# notes:\nremember this")]
        );
    }

    #[test]
    fn decode_prepends_lines_before_first_header_to_first_entry() {
        assert_eq!(
            decode("note to self\n# user:\nhello\n"),
            vec![Message::user("note to self\nhello")]
        );
        assert_eq!(
            decode("note to self\n\n# assistant:\nHi\n\n# user:\nhello\n"),
            vec![Message::assistant("note to self\nHi"), Message::user("hello")]
        );
        assert_eq!(decode("no header at all\n"), Vec::<Message>::new());
    }

    #[test]
    fn decode_keeps_adjacent_same_role_entries_separate() {
        let log = "# user:\nfirst\n\n# user:\nsecond\n\n";
        assert_eq!(
            decode(log),
            vec![Message::user("first"), Message::user("second")]
        );
    }

    #[test]
    fn appended_messages_decode_back() {
        let (_dir, store) = store();
        let messages = vec![
            Message::system("You are terse."),
            Message::user("one"),
            Message::user("two"),
            Message::tool_call("lookup", "{\"q\":1}"),
            Message::tool_result("lookup", "found"),
            Message::assistant("done"),
        ];
        for message in &messages {
            store
                .append(Destination::Conversation, message)
                .expect("append failed");
        }

        let decoded = store
            .read_log(Destination::Conversation)
            .expect("read failed");
        assert_eq!(decoded, messages);
    }

    #[test]
    fn missing_logs_are_empty_and_reset_is_idempotent() {
        let (_dir, store) = store();
        assert!(store
            .messages(Destination::Conversation)
            .expect("read failed")
            .is_empty());
        store.reset(Destination::OneShot).expect("reset failed");
        store.reset(Destination::OneShot).expect("second reset failed");
    }

    #[test]
    fn messages_prepend_initial_log() {
        let (_dir, store) = store();
        store
            .append(Destination::Initial, &Message::system("seed"))
            .expect("append failed");
        store
            .append(Destination::Conversation, &Message::user("hi"))
            .expect("append failed");
        store
            .append(Destination::OneShot, &Message::user("once"))
            .expect("append failed");

        assert_eq!(
            store.messages(Destination::Conversation).unwrap(),
            vec![Message::system("seed"), Message::user("hi")]
        );
        assert_eq!(
            store.messages(Destination::OneShot).unwrap(),
            vec![Message::system("seed"), Message::user("once")]
        );
        assert_eq!(
            store.messages(Destination::Initial).unwrap(),
            vec![Message::system("seed")]
        );
    }

    #[test]
    fn partial_appends_build_one_entry() {
        let (_dir, store) = store();
        let dest = Destination::Conversation;
        store.append_role_header(dest, Role::Assistant).unwrap();
        store.append_fragment(dest, "Hel").unwrap();
        store.append_fragment(dest, "lo").unwrap();
        store.append_padding(dest).unwrap();

        let raw = fs::read_to_string(store.path(dest)).unwrap();
        assert_eq!(raw, "# assistant:\nHello\n\n");
    }

    #[test]
    fn header_after_unpadded_entry_starts_on_new_line() {
        let (_dir, store) = store();
        let dest = Destination::Conversation;
        store.append_role_header(dest, Role::Assistant).unwrap();
        store.append_fragment(dest, "Hel").unwrap();
        store.append(dest, &Message::user("again")).unwrap();

        let raw = fs::read_to_string(store.path(dest)).unwrap();
        assert_eq!(raw, "# assistant:\nHel\n\n# user:\nagain\n\n");
        assert_eq!(
            store.read_log(dest).unwrap(),
            vec![Message::assistant("Hel"), Message::user("again")]
        );
    }
}
