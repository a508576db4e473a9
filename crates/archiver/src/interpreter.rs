//! Incremental interpreter for the archiver's standard output.
//!
//! 7-Zip redraws its progress indicator in place with backspaces instead of
//! newlines, and asks interactive questions without terminating the line.
//! The interpreter therefore works one byte at a time and treats some
//! non-newline bytes as soft line terminators:
//!
//! - `\n` always ends a line.
//! - A backspace (`\x08`) is dropped and enters [`State::ProgressHold`]; the
//!   next space ends the line.
//! - A `:` that completes a password prompt ends the line.
//!
//! A completed line containing [`CONFLICT_MARKER`] switches to raw
//! accumulation until [`CONFLICT_SUFFIX`] has been read.
//!
//! Only ASCII bytes are significant, so multi-byte UTF-8 sequences pass
//! through untouched and are decoded once a line is complete.

use crate::error::ArchiverError;
use crate::types::ConflictPrompt;

/// Line announcing an overwrite prompt.
pub const CONFLICT_MARKER: &str = "Would you like to replace";

/// Trailing question of an overwrite prompt.
pub const CONFLICT_SUFFIX: &str =
    "? (Y)es / (N)o / (A)lways / (S)kip all / A(u)to rename all / (Q)uit?";

/// Password prompts printed by the supported archiver builds.
pub const PASSWORD_PROMPTS: [&str; 2] = ["Enter password:", "Enter password (will not be echoed):"];

const PASSWORD_STEM: &[u8] = b"Enter password";
const BACKSPACE: u8 = 0x08;

/// Parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Accumulating an ordinary line
    NormalLine,
    /// Saw a backspace; the next space ends the line
    ProgressHold,
    /// The line contains the password stem; a `:` may end it
    AwaitingPasswordColon,
    /// Collecting a raw overwrite prompt until its suffix
    AwaitingConflictSuffix,
}

/// A classified unit of archiver output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Percentage update with the trimmed line it came from
    Progress { percent: u8, line: String },
    /// Overwrite prompt; the archiver waits for a decision
    Conflict(ConflictPrompt),
    /// Password prompt; the archiver waits for a password
    PasswordPrompt,
    /// Any other non-blank line
    Line(String),
}

#[derive(Debug)]
pub struct StreamInterpreter {
    state: State,
    line: Vec<u8>,
    conflict: Vec<u8>,
}

impl Default for StreamInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamInterpreter {
    pub fn new() -> Self {
        Self {
            state: State::NormalLine,
            line: Vec::with_capacity(128),
            conflict: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Feed one byte of output. Returns an event when a unit completes.
    pub fn push(&mut self, byte: u8) -> Option<StreamEvent> {
        if self.state == State::AwaitingConflictSuffix {
            self.conflict.push(byte);
            if self.conflict.ends_with(CONFLICT_SUFFIX.as_bytes()) {
                let raw = String::from_utf8_lossy(&std::mem::take(&mut self.conflict)).into_owned();
                self.state = State::NormalLine;
                return Some(StreamEvent::Conflict(ConflictPrompt::from_raw(raw)));
            }
            return None;
        }

        if byte == BACKSPACE {
            self.state = State::ProgressHold;
            return None;
        }

        self.line.push(byte);

        match (self.state, byte) {
            (_, b'\n') => self.complete_line(),
            (State::ProgressHold, b' ') => self.complete_line(),
            (State::AwaitingPasswordColon, b':') if self.ends_with_password_prompt() => {
                self.complete_line()
            }
            (State::NormalLine, _) if self.line.ends_with(PASSWORD_STEM) => {
                self.state = State::AwaitingPasswordColon;
                None
            }
            _ => None,
        }
    }

    /// Signal end of stream and flush whatever is pending.
    ///
    /// Fails when the stream ended in the middle of an overwrite prompt.
    pub fn finish(&mut self) -> Result<Option<StreamEvent>, ArchiverError> {
        let event = if self.state != State::AwaitingConflictSuffix && !self.line.is_empty() {
            self.complete_line()
        } else {
            None
        };

        if self.state == State::AwaitingConflictSuffix {
            let partial = String::from_utf8_lossy(&std::mem::take(&mut self.conflict)).into_owned();
            self.state = State::NormalLine;
            return Err(ArchiverError::ConflictProtocol(partial));
        }

        Ok(event)
    }

    fn ends_with_password_prompt(&self) -> bool {
        PASSWORD_PROMPTS
            .iter()
            .any(|prompt| self.line.ends_with(prompt.as_bytes()))
    }

    fn complete_line(&mut self) -> Option<StreamEvent> {
        let raw = std::mem::take(&mut self.line);
        self.state = State::NormalLine;
        let line = String::from_utf8_lossy(&raw);

        if line.contains(CONFLICT_MARKER) {
            self.state = State::AwaitingConflictSuffix;
            self.conflict.clear();
            return None;
        }

        if line.contains('%') {
            if let Some(percent) = parse_percentage(&line) {
                return Some(StreamEvent::Progress {
                    percent,
                    line: line.trim().to_string(),
                });
            }
        }

        if PASSWORD_PROMPTS.iter().any(|prompt| line.contains(prompt)) {
            return Some(StreamEvent::PasswordPrompt);
        }

        let trimmed = line.trim_end();
        if trimmed.trim_start().is_empty() {
            None
        } else {
            Some(StreamEvent::Line(trimmed.to_string()))
        }
    }
}

/// Extract the percentage from a progress line such as `"  45%  3 files"`.
///
/// Takes the last whitespace-separated token before the first `%` and
/// accepts it only when it is an integer between 0 and 100.
pub fn parse_percentage(line: &str) -> Option<u8> {
    let (before, _) = line.split_once('%')?;
    before
        .split_whitespace()
        .last()?
        .parse::<u8>()
        .ok()
        .filter(|p| *p <= 100)
}
