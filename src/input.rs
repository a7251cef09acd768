//! Where the document comes from: a Markdown file or a stdin pipe.
//!
//! Piped input is read on a background thread and handed to the main thread
//! over `mpsc::channel`; every batch of bytes that arrives is one edit.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use log::debug;

use crate::scroll::PaneMetrics;
use crate::surface::{EditorSurface, ScrollPane};
use crate::watch::FileEditor;

/// An editor whose buffer changes underneath the pipeline.
pub trait LiveEditor: EditorSurface {
    /// Pick up changes made since the last call. True if the text changed.
    fn refresh(&mut self) -> Result<bool>;

    /// No further changes can arrive.
    fn is_finished(&self) -> bool {
        false
    }
}

pub enum InputSource {
    File(PathBuf),
    Stdin,
}

impl InputSource {
    /// `-` (or no argument with piped stdin) selects stdin.
    pub fn from_arg(input: Option<&Path>) -> Option<Self> {
        if is_stdin_input(input) {
            return Some(InputSource::Stdin);
        }
        input.map(|p| InputSource::File(p.to_path_buf()))
    }

    /// Short name for titles and status lines.
    pub fn display_name(&self) -> &str {
        match self {
            InputSource::File(path) => path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown"),
            InputSource::Stdin => "<stdin>",
        }
    }

    /// Whole document, read once.
    pub fn read_all(&self) -> Result<String> {
        match self {
            InputSource::File(path) => std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display())),
            InputSource::Stdin => Ok(read_stdin_to_string()?),
        }
    }

    /// A live editor over this source; files are watched for changes.
    pub fn open_editor(&self, viewport_rows: usize) -> Result<Box<dyn LiveEditor>> {
        Ok(match self {
            InputSource::File(path) => Box::new(FileEditor::open(path, viewport_rows)?.watch()?),
            InputSource::Stdin => Box::new(StdinEditor::new(StdinReader::new(), viewport_rows)),
        })
    }
}

enum StdinChunk {
    Data(Vec<u8>),
    Eof,
}

/// Result of draining the reader channel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainResult {
    pub got_data: bool,
    pub eof: bool,
}

/// Reads a byte stream on a background thread.
pub struct StdinReader {
    rx: mpsc::Receiver<StdinChunk>,
    _handle: JoinHandle<()>,
}

impl Default for StdinReader {
    fn default() -> Self {
        Self::new()
    }
}

impl StdinReader {
    pub fn new() -> Self {
        Self::from_reader(io::stdin())
    }

    pub fn from_reader<R: Read + Send + 'static>(mut reader: R) -> Self {
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(StdinChunk::Data(buf[..n].to_vec())).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("input: read failed: {e}");
                        break;
                    }
                }
            }
            let _ = tx.send(StdinChunk::Eof);
        });

        Self {
            rx,
            _handle: handle,
        }
    }

    /// Append every queued chunk to `buf`. Non-blocking.
    pub fn drain_into(&self, buf: &mut Vec<u8>) -> DrainResult {
        let mut result = DrainResult::default();
        while let Ok(chunk) = self.rx.try_recv() {
            result.got_data = true;
            match chunk {
                StdinChunk::Data(bytes) => buf.extend_from_slice(&bytes),
                StdinChunk::Eof => result.eof = true,
            }
        }
        result
    }
}

/// Move the longest valid UTF-8 prefix of `pending` onto `text`.
///
/// A multi-byte character split across reads stays in `pending` until its
/// tail arrives; at EOF whatever is left is decoded lossily.
fn decode_pending(pending: &mut Vec<u8>, text: &mut String, eof: bool) {
    let valid = match std::str::from_utf8(pending).map(str::len) {
        Ok(len) => len,
        Err(e) if e.error_len().is_none() && !eof => e.valid_up_to(),
        Err(_) => {
            text.push_str(&String::from_utf8_lossy(pending));
            pending.clear();
            return;
        }
    };
    let rest = pending.split_off(valid);
    text.push_str(&String::from_utf8_lossy(pending));
    *pending = rest;
}

/// Piped text as the editor. The viewport tails the end of the buffer.
pub struct StdinEditor {
    reader: StdinReader,
    pending: Vec<u8>,
    text: String,
    viewport_rows: usize,
    eof: bool,
}

impl StdinEditor {
    pub fn new(reader: StdinReader, viewport_rows: usize) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            text: String::new(),
            viewport_rows,
            eof: false,
        }
    }
}

impl ScrollPane for StdinEditor {
    fn scroll(&self) -> PaneMetrics {
        let lines = self.text.lines().count();
        let offset = lines.saturating_sub(self.viewport_rows);
        PaneMetrics::new(offset as f64, lines as f64, self.viewport_rows as f64)
    }

    fn set_scroll_offset(&mut self, _offset: f64) {}
}

impl EditorSurface for StdinEditor {
    fn text(&self) -> &str {
        &self.text
    }
}

impl LiveEditor for StdinEditor {
    fn refresh(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let drained = self.reader.drain_into(&mut self.pending);
        if !drained.got_data {
            return Ok(false);
        }
        self.eof = drained.eof;
        let before = self.text.len();
        decode_pending(&mut self.pending, &mut self.text, self.eof);
        Ok(self.text.len() != before)
    }

    fn is_finished(&self) -> bool {
        self.eof
    }
}

/// `Some("-")`, or no argument while stdin is not a terminal.
pub fn is_stdin_input(input: Option<&Path>) -> bool {
    match input {
        Some(p) => p.as_os_str() == "-",
        None => !io::stdin().is_terminal(),
    }
}

/// Read all of stdin (blocking, for one-shot rendering).
pub fn read_stdin_to_string() -> io::Result<String> {
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}
