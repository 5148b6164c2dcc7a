use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/// Bounds for the in-memory buffer and the on-disk file.
#[derive(Debug, Clone, Copy)]
pub struct LogLimits {
    pub max_lines: usize,
    pub max_chars: usize,
    pub max_line_len: usize,
    pub rotate_bytes: u64,
}

/// Per-service console log: a bounded in-memory ring plus one append-only
/// file with a single `.1` backup generation. A `LogChannel` has exactly
/// one writer, the owning service process.
#[derive(Debug)]
pub struct LogChannel {
    path: PathBuf,
    limits: LogLimits,
    buffer: VecDeque<String>,
    total_chars: usize,
}

impl LogChannel {
    pub fn new(log_dir: &Path, key: &str, limits: LogLimits) -> Self {
        Self {
            path: log_dir.join(format!("{key}.log")),
            limits,
            buffer: VecDeque::new(),
            total_chars: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.buffer.iter().map(String::as_str)
    }

    pub fn line_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    /// Append one line to the ring buffer, evicting the oldest lines when
    /// over the line cap or the character cap. The character cap wins:
    /// a handful of huge lines can empty the rest of the buffer.
    pub fn append(&mut self, line: &str) {
        let line = truncate_middle(line, self.limits.max_line_len);
        self.total_chars += line.chars().count();
        self.buffer.push_back(line);

        while self.buffer.len() > self.limits.max_lines
            || (self.total_chars > self.limits.max_chars && self.buffer.len() > 1)
        {
            if let Some(evicted) = self.buffer.pop_front() {
                self.total_chars -= evicted.chars().count();
            }
        }
    }

    /// Append one line to the on-disk file, rotating first if the file
    /// has grown past the byte ceiling. Exactly one backup generation is
    /// kept.
    pub fn persist(&mut self, line: &str) {
        if let Some(dir) = self.path.parent() {
            if let Err(err) = std::fs::create_dir_all(dir) {
                tracing::warn!(dir = %dir.display(), %err, "cannot create log directory");
                return;
            }
        }

        if let Ok(meta) = std::fs::metadata(&self.path) {
            // Rotate before the write that would cross the ceiling, so
            // the active file stays under it.
            if meta.len() + line.len() as u64 + 1 >= self.limits.rotate_bytes {
                let backup = self.path.with_extension("log.1");
                if let Err(err) = std::fs::rename(&self.path, &backup) {
                    tracing::warn!(path = %self.path.display(), %err, "log rotation failed");
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path);
        match file {
            Ok(mut file) => {
                if let Err(err) = writeln!(file, "{line}") {
                    tracing::warn!(path = %self.path.display(), %err, "cannot append to log file");
                }
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "cannot open log file");
            }
        }
    }

    /// Byte offset to start tailing from when attaching to a process we
    /// did not start: the current end of file, never history.
    pub fn attach_offset(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Read the complete lines written since `offset`. Returns the lines
    /// and the offset just past the last complete line; a trailing
    /// partial line stays unread until its newline arrives.
    pub fn tail_from(&self, offset: u64) -> (Vec<String>, u64) {
        let Ok(mut file) = File::open(&self.path) else {
            return (Vec::new(), offset);
        };
        let len = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        // The file shrank under us (rotation); restart from the top.
        let offset = if offset > len { 0 } else { offset };

        if file.seek(SeekFrom::Start(offset)).is_err() {
            return (Vec::new(), offset);
        }
        let mut chunk = String::new();
        if file.read_to_string(&mut chunk).is_err() {
            return (Vec::new(), offset);
        }

        let complete = match chunk.rfind('\n') {
            Some(idx) => &chunk[..=idx],
            None => return (Vec::new(), offset),
        };
        let new_offset = offset + complete.len() as u64;
        let lines = complete.lines().map(str::to_owned).collect();
        (lines, new_offset)
    }

    /// Empty the buffer and truncate the on-disk file.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.total_chars = 0;
        if self.path.exists() {
            if let Err(err) = File::create(&self.path) {
                tracing::warn!(path = %self.path.display(), %err, "cannot truncate log file");
            }
        }
    }
}

/// Middle-truncate oversized lines, keeping a head and a trailing slice
/// around an omission marker.
fn truncate_middle(line: &str, max_len: usize) -> String {
    let chars: Vec<char> = line.chars().collect();
    if chars.len() <= max_len {
        return line.to_owned();
    }
    let keep_head = max_len * 2 / 3;
    let keep_tail = max_len - keep_head;
    let omitted = chars.len() - keep_head - keep_tail;

    let head: String = chars[..keep_head].iter().collect();
    let tail: String = chars[chars.len() - keep_tail..].iter().collect();
    format!("{head} …({omitted} chars omitted)… {tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: LogLimits = LogLimits {
        max_lines: 5,
        max_chars: 100,
        max_line_len: 40,
        rotate_bytes: 256,
    };

    fn channel(limits: LogLimits) -> (tempfile::TempDir, LogChannel) {
        let dir = tempfile::tempdir().unwrap();
        let ch = LogChannel::new(dir.path(), "svc", limits);
        (dir, ch)
    }

    #[test]
    fn buffer_respects_line_cap() {
        let (_dir, mut ch) = channel(LIMITS);
        for i in 0..20 {
            ch.append(&format!("line {i}"));
        }
        assert_eq!(ch.line_count(), 5);
        assert_eq!(ch.lines().last().unwrap(), "line 19");
        assert_eq!(ch.lines().next().unwrap(), "line 15");
    }

    #[test]
    fn char_cap_evicts_before_line_cap() {
        let (_dir, mut ch) = channel(LIMITS);
        for _ in 0..4 {
            ch.append(&"x".repeat(35));
        }
        // 4 lines fit the line cap but exceed the 100-char ceiling.
        assert!(ch.line_count() < 4);
        assert!(ch.total_chars() <= LIMITS.max_chars);
    }

    #[test]
    fn oversized_line_is_middle_truncated() {
        let (_dir, mut ch) = channel(LIMITS);
        let long = "a".repeat(200);
        ch.append(&long);
        let stored = ch.lines().next().unwrap();
        assert!(stored.contains("chars omitted"));
        assert!(stored.starts_with("aaa"));
        assert!(stored.ends_with("aaa"));
    }

    #[test]
    fn persist_rotates_once_past_ceiling() {
        let (dir, mut ch) = channel(LIMITS);
        for i in 0..40 {
            ch.persist(&format!("[12:00:00] [OUT] line number {i}"));
        }
        let backup = dir.path().join("svc.log.1");
        assert!(backup.exists());
        let active_len = std::fs::metadata(ch.path()).unwrap().len();
        assert!(active_len < LIMITS.rotate_bytes);
        // No second generation.
        assert!(!dir.path().join("svc.log.2").exists());
    }

    #[test]
    fn tail_from_returns_only_new_complete_lines() {
        let (_dir, mut ch) = channel(LIMITS);
        ch.persist("one");
        let offset = ch.attach_offset();

        ch.persist("two");
        ch.persist("three");
        let (lines, next) = ch.tail_from(offset);
        assert_eq!(lines, vec!["two", "three"]);

        let (empty, same) = ch.tail_from(next);
        assert!(empty.is_empty());
        assert_eq!(same, next);
    }

    #[test]
    fn attach_offset_skips_history() {
        let (_dir, mut ch) = channel(LIMITS);
        ch.persist("ancient history");
        let offset = ch.attach_offset();
        let (lines, _) = ch.tail_from(offset);
        assert!(lines.is_empty());
    }

    #[test]
    fn clear_empties_buffer_and_file() {
        let (_dir, mut ch) = channel(LIMITS);
        ch.append("line");
        ch.persist("line");
        ch.clear();
        assert_eq!(ch.line_count(), 0);
        assert_eq!(std::fs::metadata(ch.path()).unwrap().len(), 0);
    }
}
