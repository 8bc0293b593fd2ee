//! The editable-region boundary.
//!
//! Form logic talks to an [`EditorSurface`] and never to the region behind
//! it. [`VirtualSurface`] is the headless implementation used by the CLI
//! and by tests.

use thiserror::Error;

use super::command::Command;
use super::document::{Align, BlockKind, Document, ListKind, Mark, Selection};
use super::markup;

/// Maximum number of undo steps kept.
const HISTORY_LIMIT: usize = 100;

/// Editor-surface errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditorError {
    /// The surface cannot report state for this command.
    #[error("command state not supported: {0}")]
    Unsupported(&'static str),
}

/// An editable rich-text region.
pub trait EditorSurface {
    /// Serialized markup of the region.
    fn get_value(&self) -> String;

    /// Replace the region's content. Clears history.
    fn set_value(&mut self, markup: &str);

    /// Apply a command to the current selection. Returns whether the
    /// content changed.
    fn apply_command(&mut self, command: &Command) -> bool;

    /// Whether the command is active for the current selection.
    fn query_command_state(&self, command: &Command) -> Result<bool, EditorError>;

    fn selection(&self) -> Selection;

    fn select(&mut self, selection: Selection);

    fn selected_text(&self) -> String;

    /// Replace the selection with typed text.
    fn insert_text(&mut self, text: &str);

    fn focus(&mut self);

    fn has_focus(&self) -> bool;
}

#[derive(Debug, Clone)]
struct Snapshot {
    doc: Document,
    selection: Selection,
}

/// In-memory editable region backed by a [`Document`].
#[derive(Debug, Default)]
pub struct VirtualSurface {
    doc: Document,
    selection: Selection,
    focused: bool,
    undo: Vec<Snapshot>,
    redo: Vec<Snapshot>,
}

impl VirtualSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain text of the region, blocks separated by newlines.
    pub fn text(&self) -> String {
        self.doc.text()
    }

    /// Select the first occurrence of `needle`. Returns false if absent.
    pub fn select_text(&mut self, needle: &str) -> bool {
        let text = self.doc.text();
        match text.find(needle) {
            Some(byte_start) => {
                let start = text[..byte_start].chars().count();
                let end = start + needle.chars().count();
                self.selection = Selection::new(start, end);
                true
            }
            None => false,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            doc: self.doc.clone(),
            selection: self.selection,
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.doc = snapshot.doc;
        self.selection = snapshot.selection;
    }

    fn record(&mut self, before: Snapshot) {
        self.undo.push(before);
        if self.undo.len() > HISTORY_LIMIT {
            self.undo.remove(0);
        }
        self.redo.clear();
    }

    fn undo(&mut self) -> bool {
        let Some(previous) = self.undo.pop() else {
            return false;
        };
        self.redo.push(self.snapshot());
        self.restore(previous);
        true
    }

    fn redo(&mut self) -> bool {
        let Some(next) = self.redo.pop() else {
            return false;
        };
        self.undo.push(self.snapshot());
        self.restore(next);
        true
    }

    fn edit(&mut self, command: &Command) -> bool {
        let sel = self.selection;
        match command {
            Command::Bold => self.doc.toggle_mark(sel, Mark::Bold),
            Command::Italic => self.doc.toggle_mark(sel, Mark::Italic),
            Command::Underline => self.doc.toggle_mark(sel, Mark::Underline),
            Command::OrderedList => self.doc.toggle_list(sel, ListKind::Ordered),
            Command::UnorderedList => self.doc.toggle_list(sel, ListKind::Unordered),
            Command::FormatBlock(format) => self.doc.set_block_kind(sel, format.kind()),
            Command::AlignLeft => self.doc.set_align(sel, Align::Left),
            Command::AlignCenter => self.doc.set_align(sel, Align::Center),
            Command::AlignRight => self.doc.set_align(sel, Align::Right),
            Command::CreateLink(url) => {
                if url.is_empty() {
                    return false;
                }
                if sel.is_collapsed() {
                    self.selection = self.doc.insert_link(sel, url, url);
                    true
                } else {
                    self.doc.set_link(sel, Some(url))
                }
            }
            Command::Undo | Command::Redo => false,
        }
    }
}

impl EditorSurface for VirtualSurface {
    fn get_value(&self) -> String {
        markup::to_html(&self.doc)
    }

    fn set_value(&mut self, value: &str) {
        self.doc = markup::parse(value);
        self.selection = Selection::caret(self.doc.len());
        self.undo.clear();
        self.redo.clear();
    }

    fn apply_command(&mut self, command: &Command) -> bool {
        match command {
            Command::Undo => self.undo(),
            Command::Redo => self.redo(),
            _ => {
                let before = self.snapshot();
                let changed = self.edit(command);
                if changed {
                    self.record(before);
                }
                changed
            }
        }
    }

    fn query_command_state(&self, command: &Command) -> Result<bool, EditorError> {
        let sel = self.selection;
        let state = match command {
            Command::Bold => self.doc.mark_active(sel, Mark::Bold),
            Command::Italic => self.doc.mark_active(sel, Mark::Italic),
            Command::Underline => self.doc.mark_active(sel, Mark::Underline),
            Command::OrderedList => {
                self.doc.block_kind_at(sel) == BlockKind::ListItem(ListKind::Ordered)
            }
            Command::UnorderedList => {
                self.doc.block_kind_at(sel) == BlockKind::ListItem(ListKind::Unordered)
            }
            Command::AlignLeft => matches!(self.doc.align_at(sel), None | Some(Align::Left)),
            Command::AlignCenter => self.doc.align_at(sel) == Some(Align::Center),
            Command::AlignRight => self.doc.align_at(sel) == Some(Align::Right),
            Command::FormatBlock(_) | Command::CreateLink(_) | Command::Undo | Command::Redo => {
                return Err(EditorError::Unsupported(command.name()));
            }
        };
        Ok(state)
    }

    fn selection(&self) -> Selection {
        self.selection
    }

    fn select(&mut self, selection: Selection) {
        let len = self.doc.len();
        self.selection = Selection::new(selection.start.min(len), selection.end.min(len));
    }

    fn selected_text(&self) -> String {
        self.doc.slice(self.selection)
    }

    fn insert_text(&mut self, text: &str) {
        if text.is_empty() && self.selection.is_collapsed() {
            return;
        }
        let before = self.snapshot();
        self.selection = self.doc.insert_text(self.selection, text);
        self.record(before);
    }

    fn focus(&mut self) {
        self.focused = true;
    }

    fn has_focus(&self) -> bool {
        self.focused
    }
}
