//! Line-safe, per-task prefixed output for concurrent runs.
//!
//! Chunks from one task are buffered until a newline arrives. Only complete
//! lines reach the shared sink, each written under a single lock, so two
//! tasks never share an output line.

use console::Style;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Longest task name shown in a prefix.
pub const MAX_PREFIX_NAME_CHARS: usize = 20;

/// Destination shared by every task's writer.
pub type SharedSink = Arc<Mutex<dyn Write + Send>>;

/// Stdout as a [`SharedSink`].
pub fn stdout_sink() -> SharedSink {
    Arc::new(Mutex::new(io::stdout()))
}

fn palette() -> [Style; 6] {
    [
        Style::new().cyan(),
        Style::new().yellow(),
        Style::new().magenta(),
        Style::new().green(),
        Style::new().blue(),
        Style::new().red(),
    ]
}

pub struct TaskPrefixWriter {
    prefix: String,
    buffer: String,
    sink: SharedSink,
}

impl TaskPrefixWriter {
    /// Coloured prefix; the colour is picked by `index` from a fixed palette.
    pub fn new(name: &str, index: usize, sink: SharedSink) -> Self {
        let colours = palette();
        let style = &colours[index % colours.len()];
        let tag = format!("[{}]", truncate_name(name));
        Self {
            prefix: format!("{} ", style.apply_to(tag).force_styling(true)),
            buffer: String::new(),
            sink,
        }
    }

    /// Uncoloured prefix.
    pub fn plain(name: &str, sink: SharedSink) -> Self {
        Self {
            prefix: format!("[{}] ", truncate_name(name)),
            buffer: String::new(),
            sink,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Buffer `chunk` and emit every line it completes.
    pub fn write_chunk(&mut self, chunk: &str) -> io::Result<()> {
        self.buffer.push_str(chunk);
        while let Some(end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=end).collect();
            self.emit(line.trim_end_matches(['\n', '\r']))?;
        }
        Ok(())
    }

    /// Emit a trailing partial line, if any.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let line = std::mem::take(&mut self.buffer);
        self.emit(&line)
    }

    fn emit(&self, line: &str) -> io::Result<()> {
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| io::Error::other("output sink lock poisoned"))?;
        if line.is_empty() {
            writeln!(sink)?;
        } else {
            writeln!(sink, "{}{line}", self.prefix)?;
        }
        sink.flush()
    }
}

fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_PREFIX_NAME_CHARS).collect()
}
