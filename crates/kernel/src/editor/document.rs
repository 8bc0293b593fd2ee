//! Document model behind the virtual editing surface.
//!
//! A document is a list of blocks, each holding inline runs of text with
//! marks. Positions are character offsets into the document's plain text,
//! where consecutive blocks are separated by one `'\n'`.

/// Kind of list a list item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Ordered,
    Unordered,
}

/// Block-level format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    /// Heading level 1 to 3.
    Heading(u8),
    Blockquote,
    CodeBlock,
    ListItem(ListKind),
}

/// Horizontal text alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

impl Align {
    pub fn as_css(&self) -> &'static str {
        match self {
            Align::Left => "left",
            Align::Center => "center",
            Align::Right => "right",
        }
    }

    pub fn from_css(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "left" | "start" => Some(Align::Left),
            "center" => Some(Align::Center),
            "right" | "end" => Some(Align::Right),
            _ => None,
        }
    }
}

/// Toggleable inline styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Bold,
    Italic,
    Underline,
}

/// Inline formatting carried by a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Marks {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub link: Option<String>,
}

impl Marks {
    pub fn has(&self, mark: Mark) -> bool {
        match mark {
            Mark::Bold => self.bold,
            Mark::Italic => self.italic,
            Mark::Underline => self.underline,
        }
    }

    pub fn set(&mut self, mark: Mark, on: bool) {
        match mark {
            Mark::Bold => self.bold = on,
            Mark::Italic => self.italic = on,
            Mark::Underline => self.underline = on,
        }
    }

    /// Marks inherited by text typed right after these.
    fn for_typing(&self) -> Self {
        Self {
            link: None,
            ..self.clone()
        }
    }
}

/// Text sharing one set of marks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub text: String,
    pub marks: Marks,
}

/// A block of inline runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub align: Option<Align>,
    pub runs: Vec<Run>,
}

impl Block {
    pub fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            align: None,
            runs: Vec::new(),
        }
    }

    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.iter().map(|r| r.text.chars().count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.iter().all(|r| r.text.is_empty())
    }

    /// Append text, merging with the last run when the marks match.
    pub fn push_text(&mut self, text: &str, marks: &Marks) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.runs.last_mut()
            && last.marks == *marks
        {
            last.text.push_str(text);
            return;
        }
        self.runs.push(Run {
            text: text.to_string(),
            marks: marks.clone(),
        });
    }
}

/// Selection as character offsets; `start == end` is a caret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    /// Build a selection, ordering the endpoints.
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    pub fn caret(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    fn clamp(self, len: usize) -> Self {
        Self::new(self.start.min(len), self.end.min(len))
    }
}

/// Flattened document: a block break followed by that block's characters.
#[derive(Debug, Clone)]
enum Slot {
    Break(BlockKind, Option<Align>),
    Char(char, Marks),
}

/// Editable rich-text document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    blocks: Vec<Block>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document with one empty paragraph.
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::new(BlockKind::Paragraph)],
        }
    }

    /// Build from blocks; an empty list becomes one empty paragraph.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        if blocks.is_empty() {
            return Self::new();
        }
        Self { blocks }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Plain text with blocks separated by newlines.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(Block::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Length of `text()` in characters.
    pub fn len(&self) -> usize {
        let breaks = self.blocks.len().saturating_sub(1);
        self.blocks.iter().map(Block::len).sum::<usize>() + breaks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(Block::is_empty)
    }

    /// Text covered by `sel`.
    pub fn slice(&self, sel: Selection) -> String {
        let sel = sel.clamp(self.len());
        self.text()
            .chars()
            .skip(sel.start)
            .take(sel.end - sel.start)
            .collect()
    }

    /// (start, end) offsets of each block.
    fn spans(&self) -> Vec<(usize, usize)> {
        let mut spans = Vec::with_capacity(self.blocks.len());
        let mut offset = 0;
        for block in &self.blocks {
            let len = block.len();
            spans.push((offset, offset + len));
            offset += len + 1;
        }
        spans
    }

    /// Indices of the blocks the selection touches.
    fn touched(&self, sel: Selection) -> Vec<usize> {
        let sel = sel.clamp(self.len());
        self.spans()
            .iter()
            .enumerate()
            .filter(|(_, (s, e))| {
                if sel.is_collapsed() {
                    *s <= sel.start && sel.start <= *e
                } else {
                    *s < sel.end && sel.start <= *e
                }
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn flatten(&self) -> Vec<Slot> {
        let mut slots = Vec::with_capacity(self.len() + 1);
        for block in &self.blocks {
            slots.push(Slot::Break(block.kind, block.align));
            for run in &block.runs {
                slots.extend(run.text.chars().map(|c| Slot::Char(c, run.marks.clone())));
            }
        }
        slots
    }

    fn rebuild(slots: Vec<Slot>) -> Self {
        let mut blocks: Vec<Block> = Vec::new();
        for slot in slots {
            match slot {
                Slot::Break(kind, align) => blocks.push(Block {
                    kind,
                    align,
                    runs: Vec::new(),
                }),
                Slot::Char(c, marks) => {
                    if blocks.is_empty() {
                        blocks.push(Block::new(BlockKind::Paragraph));
                    }
                    if let Some(block) = blocks.last_mut() {
                        let mut buf = [0u8; 4];
                        block.push_text(c.encode_utf8(&mut buf), &marks);
                    }
                }
            }
        }
        Self::from_blocks(blocks)
    }

    /// Slot indices covering the text range. Text offset `t` is slot `t + 1`.
    fn slot_range(&self, sel: Selection) -> std::ops::Range<usize> {
        let sel = sel.clamp(self.len());
        sel.start + 1..sel.end + 1
    }

    /// Whether every character in the selection carries `mark`.
    ///
    /// For a caret, looks at the character just before it within the same
    /// block, or the one after it at the start of a block.
    pub fn mark_active(&self, sel: Selection, mark: Mark) -> bool {
        let slots = self.flatten();
        if sel.is_collapsed() {
            let at = sel.clamp(self.len()).start + 1;
            let before = slots.get(at - 1);
            let after = slots.get(at);
            return match (before, after) {
                (Some(Slot::Char(_, m)), _) => m.has(mark),
                (_, Some(Slot::Char(_, m))) => m.has(mark),
                _ => false,
            };
        }
        let mut any = false;
        for slot in &slots[self.slot_range(sel)] {
            if let Slot::Char(_, m) = slot {
                any = true;
                if !m.has(mark) {
                    return false;
                }
            }
        }
        any
    }

    /// Toggle a mark over the selection. A caret changes nothing.
    pub fn toggle_mark(&mut self, sel: Selection, mark: Mark) -> bool {
        if sel.is_collapsed() {
            return false;
        }
        let on = !self.mark_active(sel, mark);
        self.map_marks(sel, |m| m.set(mark, on))
    }

    /// Set (or clear, with `None`) the link over the selection.
    pub fn set_link(&mut self, sel: Selection, href: Option<&str>) -> bool {
        if sel.is_collapsed() {
            return false;
        }
        let href = href.map(str::to_string);
        self.map_marks(sel, |m| m.link = href.clone())
    }

    fn map_marks<F>(&mut self, sel: Selection, mut f: F) -> bool
    where
        F: FnMut(&mut Marks),
    {
        let range = self.slot_range(sel);
        let mut slots = self.flatten();
        let mut changed = false;
        for slot in &mut slots[range] {
            if let Slot::Char(_, m) = slot {
                let before = m.clone();
                f(m);
                changed |= *m != before;
            }
        }
        if changed {
            *self = Self::rebuild(slots);
        }
        changed
    }

    /// Kind of the block holding the selection start.
    pub fn block_kind_at(&self, sel: Selection) -> BlockKind {
        self.touched(sel)
            .first()
            .and_then(|i| self.blocks.get(*i))
            .map(|b| b.kind)
            .unwrap_or(BlockKind::Paragraph)
    }

    /// Alignment of the block holding the selection start.
    pub fn align_at(&self, sel: Selection) -> Option<Align> {
        self.touched(sel)
            .first()
            .and_then(|i| self.blocks.get(*i))
            .and_then(|b| b.align)
    }

    /// Set the block kind of every touched block.
    pub fn set_block_kind(&mut self, sel: Selection, kind: BlockKind) -> bool {
        let mut changed = false;
        for i in self.touched(sel) {
            if let Some(block) = self.blocks.get_mut(i)
                && block.kind != kind
            {
                block.kind = kind;
                changed = true;
            }
        }
        changed
    }

    /// Turn touched blocks into list items, or back into paragraphs when
    /// they already are items of that list kind.
    pub fn toggle_list(&mut self, sel: Selection, list: ListKind) -> bool {
        let touched = self.touched(sel);
        let all_listed = !touched.is_empty()
            && touched
                .iter()
                .all(|i| self.blocks[*i].kind == BlockKind::ListItem(list));
        let kind = if all_listed {
            BlockKind::Paragraph
        } else {
            BlockKind::ListItem(list)
        };
        self.set_block_kind(sel, kind)
    }

    /// Align every touched block.
    pub fn set_align(&mut self, sel: Selection, align: Align) -> bool {
        let mut changed = false;
        for i in self.touched(sel) {
            if let Some(block) = self.blocks.get_mut(i)
                && block.align != Some(align)
            {
                block.align = Some(align);
                changed = true;
            }
        }
        changed
    }

    /// Replace the selection with `text`; returns the caret after it.
    ///
    /// `'\n'` starts a new block. Typed text inherits the inline style of
    /// the character before the caret, except links.
    pub fn insert_text(&mut self, sel: Selection, text: &str) -> Selection {
        self.insert_with(sel, text, None)
    }

    /// Replace the selection with `text` linked to `href`.
    pub fn insert_link(&mut self, sel: Selection, text: &str, href: &str) -> Selection {
        self.insert_with(sel, text, Some(href))
    }

    fn insert_with(&mut self, sel: Selection, text: &str, href: Option<&str>) -> Selection {
        let sel = sel.clamp(self.len());
        let mut slots = self.flatten();
        slots.drain(self.slot_range(sel));

        let at = sel.start + 1;
        let (mut marks, kind) = inherited(&slots, at);
        if let Some(href) = href {
            marks.link = Some(href.to_string());
        }

        let mut inserted = Vec::new();
        for c in text.chars() {
            if c == '\n' {
                inserted.push(Slot::Break(kind, None));
            } else {
                inserted.push(Slot::Char(c, marks.clone()));
            }
        }
        let count = inserted.len();
        slots.splice(at..at, inserted);
        *self = Self::rebuild(slots);
        Selection::caret(sel.start + count)
    }
}

/// Marks and block kind in effect at slot `at`.
fn inherited(slots: &[Slot], at: usize) -> (Marks, BlockKind) {
    let marks = match slots.get(at - 1) {
        Some(Slot::Char(_, m)) => m.for_typing(),
        _ => Marks::default(),
    };
    let kind = slots[..at]
        .iter()
        .rev()
        .find_map(|s| match s {
            Slot::Break(kind, _) => Some(*kind),
            Slot::Char(..) => None,
        })
        .map(|kind| match kind {
            // Enter after a heading continues with a paragraph.
            BlockKind::Heading(_) => BlockKind::Paragraph,
            other => other,
        })
        .unwrap_or(BlockKind::Paragraph);
    (marks, kind)
}
