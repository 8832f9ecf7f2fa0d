//! Byte-to-line framing for the host link.
//!
//! Bytes arrive in arbitrary chunks from the transport. This layer strips
//! comments, folds case, enforces the line-length limit and hands completed
//! lines on. Four single bytes are real-time commands and are dispatched
//! immediately, before any line logic. They never appear in line content,
//! even in the middle of a comment.
//!
//! Completed lines are either delivered synchronously through a registered
//! callback or pushed onto a bounded queue the caller drains with
//! [`Protocol::pop_line`]. When the queue is full the newest line is
//! dropped.

use crate::config::ProtocolConfig;
use std::collections::VecDeque;

/// Single-byte commands handled ahead of line assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeCommand {
    /// Ctrl-X: soft reset; also clears the framer state.
    Reset,
    /// `?`: status report query.
    StatusQuery,
    /// `!`: feed hold.
    FeedHold,
    /// `~`: cycle start / resume.
    CycleStart,
}

impl RealtimeCommand {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x18 => Some(Self::Reset),
            b'?' => Some(Self::StatusQuery),
            b'!' => Some(Self::FeedHold),
            b'~' => Some(Self::CycleStart),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    Ok,
    /// The line exceeded the configured buffer; the kept prefix is delivered
    /// untrimmed so the supervisor can count the fault.
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedLine {
    pub text: String,
    pub status: LineStatus,
}

pub type LineCallback = Box<dyn FnMut(&str, LineStatus) + Send>;
pub type RealtimeCallback = Box<dyn FnMut(RealtimeCommand) + Send>;

pub struct Protocol {
    cfg: ProtocolConfig,

    // Line under assembly.
    line: String,
    overflow: bool,
    in_paren_comment: bool,
    // Semicolon comments eat everything to the next LF, but real-time bytes
    // inside them are still honored.
    in_semicolon_comment: bool,

    queue: VecDeque<CompletedLine>,

    on_line: Option<LineCallback>,
    on_realtime: Option<RealtimeCallback>,
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("line", &self.line)
            .field("overflow", &self.overflow)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Protocol {
    pub fn new(cfg: ProtocolConfig) -> Self {
        Self {
            cfg,
            line: String::new(),
            overflow: false,
            in_paren_comment: false,
            in_semicolon_comment: false,
            queue: VecDeque::new(),
            on_line: None,
            on_realtime: None,
        }
    }

    /// Register a synchronous line sink; disables the internal queue path.
    pub fn set_line_callback(&mut self, cb: LineCallback) {
        self.on_line = Some(cb);
    }

    pub fn set_realtime_callback(&mut self, cb: RealtimeCallback) {
        self.on_realtime = Some(cb);
    }

    /// Drop the assembling line, comment states and the completed-line queue.
    pub fn reset(&mut self) {
        self.line.clear();
        self.overflow = false;
        self.in_paren_comment = false;
        self.in_semicolon_comment = false;
        self.queue.clear();
    }

    /// Feed a chunk of transport bytes through the framer.
    ///
    /// Real-time commands and (with a callback registered) completed lines
    /// are dispatched before this returns, in byte order.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if let Some(cmd) = RealtimeCommand::from_byte(byte) {
                self.emit_realtime(cmd);
                if cmd == RealtimeCommand::Reset {
                    self.reset();
                }
                continue;
            }

            if byte == b'\n' {
                self.finish_line();
                continue;
            }
            if byte == b'\r' {
                continue;
            }

            if self.in_semicolon_comment {
                continue;
            }

            // Non-printable bytes other than tab are consumed silently.
            if !(0x20..=0x7e).contains(&byte) && byte != b'\t' {
                continue;
            }

            let mut ch = byte as char;

            if self.cfg.strip_paren_comments {
                if self.in_paren_comment {
                    if ch == ')' {
                        self.in_paren_comment = false;
                    }
                    continue;
                }
                if ch == '(' {
                    self.in_paren_comment = true;
                    continue;
                }
            }

            if self.cfg.strip_semicolon_comments && ch == ';' {
                self.in_semicolon_comment = true;
                continue;
            }

            if self.cfg.to_uppercase {
                ch = ch.to_ascii_uppercase();
            }

            if self.line.len() < self.cfg.line_max {
                self.line.push(ch);
            } else {
                self.overflow = true;
            }
        }
    }

    /// Pop the oldest completed line, if any (queue delivery mode).
    pub fn pop_line(&mut self) -> Option<CompletedLine> {
        self.queue.pop_front()
    }

    pub fn has_line(&self) -> bool {
        !self.queue.is_empty()
    }

    fn finish_line(&mut self) {
        let overflowed = self.overflow;
        let raw = std::mem::take(&mut self.line);
        self.overflow = false;
        self.in_paren_comment = false;
        self.in_semicolon_comment = false;

        if overflowed {
            // Delivered untrimmed; content past the limit is already gone.
            self.deliver(raw, LineStatus::Overflow);
            return;
        }

        let trimmed = raw.trim_matches([' ', '\t']);
        if trimmed.is_empty() {
            return;
        }
        if !self.cfg.allow_dollar_commands && trimmed.starts_with('$') {
            return;
        }
        let text = trimmed.to_string();
        self.deliver(text, LineStatus::Ok);
    }

    fn deliver(&mut self, text: String, status: LineStatus) {
        if let Some(cb) = self.on_line.as_mut() {
            cb(&text, status);
            return;
        }
        if self.queue.len() >= self.cfg.queue_depth {
            tracing::warn!("line queue full, dropping newest line");
            return;
        }
        self.queue.push_back(CompletedLine { text, status });
    }

    fn emit_realtime(&mut self, cmd: RealtimeCommand) {
        if let Some(cb) = self.on_realtime.as_mut() {
            cb(cmd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn protocol() -> Protocol {
        Protocol::new(ProtocolConfig::default())
    }

    fn drain(p: &mut Protocol) -> Vec<CompletedLine> {
        let mut out = Vec::new();
        while let Some(line) = p.pop_line() {
            out.push(line);
        }
        out
    }

    #[test]
    fn assembles_and_normalizes_a_line() {
        let mut p = protocol();
        p.feed(b"  g01 x10 y20 f100  \n");
        let lines = drain(&mut p);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "G01 X10 Y20 F100");
        assert_eq!(lines[0].status, LineStatus::Ok);
    }

    #[test]
    fn lines_delivered_in_order() {
        let mut p = protocol();
        p.feed(b"G90\nG00 X1\nG01 X2 F50\n");
        let lines = drain(&mut p);
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["G90", "G00 X1", "G01 X2 F50"]);
    }

    #[test]
    fn empty_and_blank_lines_are_ignored() {
        let mut p = protocol();
        p.feed(b"\n   \n\t\n G90 \n");
        let lines = drain(&mut p);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "G90");
    }

    #[test]
    fn cr_is_discarded() {
        let mut p = protocol();
        p.feed(b"G90\r\nG91\r\n");
        let lines = drain(&mut p);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "G90");
        assert_eq!(lines[1].text, "G91");
    }

    #[test]
    fn paren_comments_are_stripped() {
        let mut p = protocol();
        p.feed(b"G01 (move to corner) X5\n");
        let lines = drain(&mut p);
        assert_eq!(lines[0].text, "G01  X5");
    }

    #[test]
    fn semicolon_comment_eats_to_end_of_line() {
        let mut p = protocol();
        p.feed(b"G01 X5 ; this is ignored G99\nG90\n");
        let lines = drain(&mut p);
        assert_eq!(lines[0].text, "G01 X5");
        assert_eq!(lines[1].text, "G90");
    }

    #[test]
    fn realtime_bytes_inside_semicolon_comment_are_honored() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let mut p = protocol();
        p.set_realtime_callback(Box::new(move |cmd| seen_cb.lock().unwrap().push(cmd)));
        p.feed(b"G01 X5 ; pause here ! and query ?\nG90\n");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![RealtimeCommand::FeedHold, RealtimeCommand::StatusQuery]
        );
        let lines = drain(&mut p);
        assert_eq!(lines[0].text, "G01 X5");
        assert_eq!(lines[1].text, "G90");
    }

    #[test]
    fn realtime_bytes_never_enter_lines() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let mut p = protocol();
        p.set_realtime_callback(Box::new(move |cmd| seen_cb.lock().unwrap().push(cmd)));
        p.feed(b"G0?1 X!1~0\n");
        assert_eq!(seen.lock().unwrap().len(), 3);
        let lines = drain(&mut p);
        assert_eq!(lines[0].text, "G01 X10");
    }

    #[test]
    fn realtime_dispatched_before_line_delivery() {
        // Events recorded through both callbacks land in byte order: the
        // status query arrives mid-line and must fire before the line does.
        let events = Arc::new(Mutex::new(Vec::new()));
        let ev_rt = events.clone();
        let ev_line = events.clone();
        let mut p = protocol();
        p.set_realtime_callback(Box::new(move |cmd| {
            ev_rt.lock().unwrap().push(format!("rt:{cmd:?}"));
        }));
        p.set_line_callback(Box::new(move |text, _| {
            ev_line.lock().unwrap().push(format!("line:{text}"));
        }));
        p.feed(b"G90?\n");
        assert_eq!(
            *events.lock().unwrap(),
            vec!["rt:StatusQuery".to_string(), "line:G90".to_string()]
        );
    }

    #[test]
    fn overflow_sets_status_and_bounds_length() {
        let mut p = protocol();
        let long: Vec<u8> = std::iter::repeat(b'X').take(200).collect();
        p.feed(&long);
        p.feed(b"\n");
        let lines = drain(&mut p);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].status, LineStatus::Overflow);
        assert_eq!(lines[0].text.len(), 96);
    }

    #[test]
    fn overflow_clears_on_next_line() {
        let mut p = protocol();
        let long: Vec<u8> = std::iter::repeat(b'A').take(150).collect();
        p.feed(&long);
        p.feed(b"\nG90\n");
        let lines = drain(&mut p);
        assert_eq!(lines[0].status, LineStatus::Overflow);
        assert_eq!(lines[1].status, LineStatus::Ok);
        assert_eq!(lines[1].text, "G90");
    }

    #[test]
    fn dollar_lines_ignored_by_default() {
        let mut p = protocol();
        p.feed(b"$H\nG90\n");
        let lines = drain(&mut p);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "G90");
    }

    #[test]
    fn dollar_lines_pass_when_enabled() {
        let mut p = Protocol::new(ProtocolConfig {
            allow_dollar_commands: true,
            ..ProtocolConfig::default()
        });
        p.feed(b"$H\n");
        let lines = drain(&mut p);
        assert_eq!(lines[0].text, "$H");
    }

    #[test]
    fn reset_byte_clears_pending_state() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let mut p = protocol();
        p.set_realtime_callback(Box::new(move |cmd| seen_cb.lock().unwrap().push(cmd)));
        p.feed(b"G90\nG01 X5");
        p.feed(&[0x18]);
        p.feed(b"\n");
        assert_eq!(*seen.lock().unwrap(), vec![RealtimeCommand::Reset]);
        // Both the queued G90 and the partial G01 are gone.
        assert!(!p.has_line());
    }

    #[test]
    fn full_queue_drops_newest() {
        let mut p = Protocol::new(ProtocolConfig {
            queue_depth: 2,
            ..ProtocolConfig::default()
        });
        p.feed(b"G90\nG91\nG92\n");
        let lines = drain(&mut p);
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["G90", "G91"]);
    }

    #[test]
    fn nonprintable_bytes_are_dropped() {
        let mut p = protocol();
        p.feed(b"G9\x010\x7f\n");
        let lines = drain(&mut p);
        assert_eq!(lines[0].text, "G90");
    }

    #[test]
    fn split_feeds_assemble_one_line() {
        let mut p = protocol();
        p.feed(b"G01 X");
        p.feed(b"10 F1");
        p.feed(b"00\n");
        let lines = drain(&mut p);
        assert_eq!(lines[0].text, "G01 X10 F100");
    }

    #[test]
    fn length_bound_holds_for_arbitrary_input() {
        let mut p = protocol();
        let mut stream = Vec::new();
        for i in 0u32..1000 {
            stream.push(b'A' + (i % 26) as u8);
            if i % 97 == 0 {
                stream.push(b'\n');
            }
        }
        stream.push(b'\n');
        p.feed(&stream);
        while let Some(line) = p.pop_line() {
            assert!(line.text.len() <= 96);
        }
    }
}
