use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::{self, Stdout, Write};

use colored::{Color, Colorize};

/// Prefix palette for service keys. A key hashes to the same slot every
/// run, so a service keeps its color across restarts.
const PALETTE: [Color; 8] = [
    Color::Green,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
    Color::BrightGreen,
    Color::BrightBlue,
    Color::BrightMagenta,
    Color::BrightCyan,
];

fn key_color(key: &str) -> Color {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    PALETTE[(hasher.finish() % PALETTE.len() as u64) as usize]
}

/// The supervisor's own output channels, each with a fixed prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Note {
    Info,
    Error,
}

impl Note {
    fn prefix(self) -> colored::ColoredString {
        match self {
            Note::Info => "[roadie]".color(Color::Yellow),
            Note::Error => "[error]".color(Color::BrightRed),
        }
    }
}

/// Writes the interleaved console stream: service log lines under a
/// per-key colored `[key]` prefix, the supervisor's own notes under
/// fixed ones. Multi-line messages get the prefix on every line.
pub struct Console<W: Write = Stdout> {
    out: W,
}

impl Console {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn service(&mut self, key: &str, message: &str) {
        let prefix = format!("[{key}]").color(key_color(key));
        self.emit(&prefix, message);
    }

    pub fn note(&mut self, note: Note, message: &str) {
        self.emit(&note.prefix(), message);
    }

    fn emit(&mut self, prefix: &dyn std::fmt::Display, message: &str) {
        for line in message.lines() {
            let _ = writeln!(self.out, "{prefix} {line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn rendered<F: FnOnce(&mut Console<Cursor<Vec<u8>>>)>(f: F) -> String {
        let mut console = Console::new(Cursor::new(Vec::new()));
        f(&mut console);
        String::from_utf8(console.out.into_inner()).unwrap()
    }

    #[test]
    fn service_lines_share_one_prefix() {
        let output = rendered(|c| c.service("api", "line1\nline2"));
        let prefix = "[api]".color(key_color("api"));
        assert_eq!(output, format!("{prefix} line1\n{prefix} line2\n"));
    }

    #[test]
    fn notes_use_their_fixed_prefixes() {
        let output = rendered(|c| {
            c.note(Note::Info, "starting");
            c.note(Note::Error, "boom");
        });
        let info = Note::Info.prefix();
        let error = Note::Error.prefix();
        assert_eq!(output, format!("{info} starting\n{error} boom\n"));
    }

    #[test]
    fn key_color_is_stable() {
        assert_eq!(key_color("api"), key_color("api"));
    }
}
