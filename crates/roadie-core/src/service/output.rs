use chrono::Local;

/// Which side of the merged console stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Out,
    Err,
}

impl LogTag {
    pub fn label(self) -> &'static str {
        match self {
            LogTag::Out => "OUT",
            LogTag::Err => "ERR",
        }
    }
}

/// Reassembles raw output chunks into complete lines. Streams hand us
/// arbitrary byte chunks; a line is only emitted once its newline shows
/// up (or the stream ends).
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(idx) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=idx).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whatever is left once the stream closed, without a newline.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

/// Strip ANSI escape sequences (CSI and the short two-byte forms) so
/// styled tool output is stored as plain text.
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            // CSI: ESC [ params... final byte in @..~
            Some('[') => {
                chars.next();
                for c in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&c) {
                        break;
                    }
                }
            }
            // OSC: ESC ] ... BEL (or ESC \)
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\u{07}' {
                        break;
                    }
                    if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            // Two-byte escape, drop the follow-up char.
            Some(_) => {
                chars.next();
            }
            None => {}
        }
    }
    out
}

/// `[HH:MM:SS] [OUT|ERR] message` — the console log line format.
pub fn format_line(tag: LogTag, message: &str) -> String {
    format!(
        "[{}] [{}] {}",
        Local::now().format("%H:%M:%S"),
        tag.label(),
        message
    )
}
