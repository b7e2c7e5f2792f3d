//! Live command protocol: one opcode character, a numeric argument and a
//! newline, e.g. `c0.25\n` or `q\n`.

use crate::config;
use crate::filter::WindowKind;
use crossbeam::channel::{unbounded, Receiver, TryRecvError};
use std::io::Read;
use std::time::Duration;

/// Characters a command may hold before its newline.
pub const COMMAND_CAPACITY: usize = 19;

/// A validated live command. Out-of-range arguments have already been
/// replaced by their defaults.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Normalized lowpass cutoff
    SetCutoff(f64),
    /// Output sample rate in Hz
    SetSampleRate(u32),
    SetWindow(WindowKind),
    SetFilterLength(usize),
    /// Restart the run clock with a new duration; `None` runs unbounded
    SetRunTime(Option<Duration>),
    /// `None` disables the fade
    SetFadeTime(Option<Duration>),
    /// Sink buffering in milliseconds
    SetLatency(u32),
    /// Render the frequency response at this pixel width
    Plot(u32),
    Quit,
}

impl Command {
    /// Parse a complete line without its newline. Unknown opcodes yield
    /// `None`.
    pub fn parse(line: &str) -> Option<Command> {
        let mut chars = line.chars();
        let op = chars.next()?;
        let arg = chars.as_str();
        let command = match op {
            'c' => Command::SetCutoff(config::validate_cutoff(leading_f64(arg))),
            'r' => Command::SetSampleRate(config::validate_rate(leading_i64(arg))),
            'F' => Command::SetWindow(config::validate_window(leading_i64(arg))),
            'l' => Command::SetFilterLength(config::validate_filter_length(leading_i64(arg))),
            't' => Command::SetRunTime(config::validate_run_minutes(leading_i64(arg))),
            'f' => Command::SetFadeTime(config::validate_fade_seconds(leading_i64(arg))),
            'L' => Command::SetLatency(config::validate_latency(leading_i64(arg))),
            'p' => Command::Plot(config::validate_plot_width(leading_i64(arg))),
            'q' => Command::Quit,
            other => {
                log::debug!("ignoring unknown command {other:?}");
                return None;
            }
        };
        Some(command)
    }
}

/// Integer prefix of `s` after leading whitespace, 0 when there is none.
fn leading_i64(s: &str) -> i64 {
    let s = s.trim_start();
    let sign_len = usize::from(s.starts_with(['+', '-']));
    let digits = s[sign_len..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len() - sign_len);
    s[..sign_len + digits].parse().unwrap_or(0)
}

/// Longest decimal prefix of `s` after leading whitespace, 0.0 when there
/// is none.
fn leading_f64(s: &str) -> f64 {
    let s = s.trim_start();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'+' | b'-' if i == 0 => {}
            b'+' | b'-' if seen_exp && matches!(bytes[i - 1], b'e' | b'E') => {}
            b'0'..=b'9' => {
                seen_digit = true;
                end = i + 1;
            }
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        i += 1;
    }
    s[..end].parse().unwrap_or(0.0)
}

/// Accumulates bytes into commands.
///
/// A line longer than [`COMMAND_CAPACITY`] is discarded: the byte that
/// would overflow resets the buffer and parsing restarts from the next one.
#[derive(Debug, Default)]
pub struct CommandParser {
    buf: Vec<u8>,
}

impl CommandParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(COMMAND_CAPACITY),
        }
    }

    /// Feed one byte; returns a command when `byte` completes one.
    pub fn push(&mut self, byte: u8) -> Option<Command> {
        if byte != b'\n' {
            if self.buf.len() < COMMAND_CAPACITY {
                self.buf.push(byte);
            } else {
                log::debug!("command longer than {COMMAND_CAPACITY} characters dropped");
                self.buf.clear();
            }
            return None;
        }
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Command::parse(line.trim_end_matches('\r'))
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Non-blocking command input over a byte channel.
pub struct CommandChannel {
    bytes: Receiver<u8>,
    parser: CommandParser,
    disconnected: bool,
}

impl CommandChannel {
    pub fn new(bytes: Receiver<u8>) -> Self {
        Self {
            bytes,
            parser: CommandParser::new(),
            disconnected: false,
        }
    }

    /// Consume whatever input is already available, stopping at the first
    /// completed command. Never blocks.
    pub fn poll(&mut self) -> Option<Command> {
        if self.disconnected {
            return None;
        }
        loop {
            match self.bytes.try_recv() {
                Ok(byte) => {
                    if let Some(command) = self.parser.push(byte) {
                        return Some(command);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    log::debug!("command input closed");
                    self.disconnected = true;
                    return None;
                }
            }
        }
    }
}

/// Forward stdin bytes over a channel from a background reader thread.
pub fn spawn_stdin_reader() -> Receiver<u8> {
    let (tx, rx) = unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for byte in stdin.lock().bytes() {
            match byte {
                Ok(b) => {
                    if tx.send(b).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("stdin read failed: {e}");
                    break;
                }
            }
        }
    });
    rx
}
