//! File-backed editor surface and the watcher that feeds it.
//!
//! notify::RecommendedWatcher runs callbacks on an internal thread.
//! FileWatcher bridges change notifications to the main thread via mpsc::channel.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{Context, Result};
use log::debug;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::input::LiveEditor;
use crate::scroll::PaneMetrics;
use crate::surface::{EditorSurface, ScrollPane};

pub struct FileWatcher {
    rx: mpsc::Receiver<()>,
    _watcher: RecommendedWatcher, // Drop stops watching
}

impl FileWatcher {
    /// Create a FileWatcher that monitors the given file for changes.
    ///
    /// Editors that save by rename make inotify lose a watch on the file
    /// itself, so the parent directory is watched (NonRecursive) and events
    /// are filtered by path.
    pub fn new(path: &Path) -> Result<Self> {
        let canonical = path.canonicalize()?;
        let target = canonical.clone();
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let ours = event.paths.iter().any(|p| p == &target);
                    if ours && (event.kind.is_modify() || event.kind.is_create()) {
                        let _ = tx.send(());
                    }
                }
            },
            notify::Config::default(),
        )?;
        let parent = canonical
            .parent()
            .ok_or_else(|| anyhow::anyhow!("cannot watch root path"))?;
        watcher.watch(parent, RecursiveMode::NonRecursive)?;

        Ok(Self { rx, _watcher: watcher })
    }

    /// Return true if the file has changed since last check (non-blocking).
    /// Multiple queued notifications are collapsed into a single true.
    pub fn has_changed(&self) -> bool {
        let mut changed = false;
        while self.rx.try_recv().is_ok() {
            changed = true;
        }
        changed
    }
}

/// 0-based index of the first line that differs between two texts.
pub fn first_changed_line(old: &str, new: &str) -> usize {
    let mut old_lines = old.lines();
    let mut new_lines = new.lines();
    let mut i = 0;
    loop {
        match (old_lines.next(), new_lines.next()) {
            (Some(a), Some(b)) if a == b => i += 1,
            _ => return i,
        }
    }
}

/// A Markdown file as the editor. The viewport follows the most recent edit,
/// keeping the first changed line centred.
pub struct FileEditor {
    path: PathBuf,
    text: String,
    viewport_rows: usize,
    offset: f64,
    watcher: Option<FileWatcher>,
    /// The last re-read failed; retry without waiting for another event.
    stale: bool,
}

impl FileEditor {
    pub fn open(path: &Path, viewport_rows: usize) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            text,
            viewport_rows,
            offset: 0.0,
            watcher: None,
            stale: false,
        })
    }

    /// Only re-read the file when the watcher reports a change.
    pub fn watch(mut self) -> Result<Self> {
        self.watcher = Some(
            FileWatcher::new(&self.path)
                .with_context(|| format!("failed to watch {}", self.path.display()))?,
        );
        Ok(self)
    }

    fn line_count(&self) -> usize {
        self.text.lines().count()
    }

    /// Re-read the file. Returns true if its text changed.
    ///
    /// Invalid UTF-8 (e.g. a save caught mid-write) is decoded lossily; the
    /// next write brings the real text in.
    pub fn reload(&mut self) -> Result<bool> {
        let bytes = fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if text == self.text {
            return Ok(false);
        }
        let line = first_changed_line(&self.text, &text);
        self.text = text;
        let extent = self.line_count().saturating_sub(self.viewport_rows);
        self.offset = line.saturating_sub(self.viewport_rows / 2).min(extent) as f64;
        debug!(
            "watch: {} changed at line {}, editor offset {}",
            self.path.display(),
            line + 1,
            self.offset
        );
        Ok(true)
    }
}

impl ScrollPane for FileEditor {
    fn scroll(&self) -> PaneMetrics {
        PaneMetrics::new(
            self.offset,
            self.line_count() as f64,
            self.viewport_rows as f64,
        )
    }

    fn set_scroll_offset(&mut self, offset: f64) {
        self.offset = offset;
    }
}

impl EditorSurface for FileEditor {
    fn text(&self) -> &str {
        &self.text
    }
}

impl LiveEditor for FileEditor {
    fn refresh(&mut self) -> Result<bool> {
        if let Some(watcher) = &self.watcher
            && !watcher.has_changed()
            && !self.stale
        {
            return Ok(false);
        }
        self.stale = true;
        let changed = self.reload()?;
        self.stale = false;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_changed_line_cases() {
        assert_eq!(first_changed_line("a\nb\nc", "a\nB\nc"), 1);
        assert_eq!(first_changed_line("a\nb", "a\nb\nc"), 2);
        assert_eq!(first_changed_line("x", "y"), 0);
        assert_eq!(first_changed_line("", "new"), 0);
    }

    #[test]
    fn reload_tracks_changes_and_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.md");
        let lines: Vec<String> = (0..100).map(|i| format!("line {i}")).collect();
        fs::write(&path, lines.join("\n")).unwrap();

        let mut editor = FileEditor::open(&path, 20).unwrap();
        assert!(!editor.reload().unwrap());
        assert_eq!(editor.scroll().offset, 0.0);

        let mut edited = lines.clone();
        edited[60] = "changed".into();
        fs::write(&path, edited.join("\n")).unwrap();
        assert!(editor.refresh().unwrap());
        assert_eq!(editor.scroll(), PaneMetrics::new(50.0, 100.0, 20.0));
        assert!(editor.text().contains("changed"));

        edited[99] = "end".into();
        fs::write(&path, edited.join("\n")).unwrap();
        assert!(editor.reload().unwrap());
        assert_eq!(editor.scroll().offset, 80.0);
    }

    #[test]
    fn refresh_survives_bad_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.md");
        fs::write(&path, "# A\n").unwrap();
        let mut editor = FileEditor::open(&path, 10).unwrap();

        fs::write(&path, b"# A \xe7\xb7").unwrap();
        assert!(editor.refresh().unwrap());
        assert_eq!(editor.text(), "# A \u{fffd}");

        fs::remove_file(&path).unwrap();
        assert!(editor.refresh().is_err());
        assert_eq!(editor.text(), "# A \u{fffd}");
        assert!(editor.stale);

        fs::write(&path, "# A \u{7dda}\n").unwrap();
        assert!(editor.refresh().unwrap());
        assert_eq!(editor.text(), "# A \u{7dda}\n");
        assert!(!editor.stale);
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileEditor::open(&dir.path().join("nope.md"), 10).is_err());
    }
}
