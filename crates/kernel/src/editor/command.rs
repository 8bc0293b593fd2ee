//! Editing commands and the toolbar layout.

use super::document::BlockKind;

/// Block format applied by `formatBlock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFormat {
    Paragraph,
    H1,
    H2,
    H3,
    Blockquote,
    CodeBlock,
}

impl BlockFormat {
    /// Tag name passed as the `formatBlock` value.
    pub fn tag(&self) -> &'static str {
        match self {
            BlockFormat::Paragraph => "p",
            BlockFormat::H1 => "h1",
            BlockFormat::H2 => "h2",
            BlockFormat::H3 => "h3",
            BlockFormat::Blockquote => "blockquote",
            BlockFormat::CodeBlock => "pre",
        }
    }

    /// Parse a `formatBlock` value, with or without angle brackets.
    pub fn from_tag(value: &str) -> Option<Self> {
        let tag = value
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_ascii_lowercase();
        match tag.as_str() {
            "p" => Some(BlockFormat::Paragraph),
            "h1" => Some(BlockFormat::H1),
            "h2" => Some(BlockFormat::H2),
            "h3" => Some(BlockFormat::H3),
            "blockquote" => Some(BlockFormat::Blockquote),
            "pre" => Some(BlockFormat::CodeBlock),
            _ => None,
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            BlockFormat::Paragraph => BlockKind::Paragraph,
            BlockFormat::H1 => BlockKind::Heading(1),
            BlockFormat::H2 => BlockKind::Heading(2),
            BlockFormat::H3 => BlockKind::Heading(3),
            BlockFormat::Blockquote => BlockKind::Blockquote,
            BlockFormat::CodeBlock => BlockKind::CodeBlock,
        }
    }
}

/// A formatting or history command the editor can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Bold,
    Italic,
    Underline,
    OrderedList,
    UnorderedList,
    FormatBlock(BlockFormat),
    AlignLeft,
    AlignCenter,
    AlignRight,
    CreateLink(String),
    Undo,
    Redo,
}

impl Command {
    /// Command identifier, matching the browser editing command names.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Bold => "bold",
            Command::Italic => "italic",
            Command::Underline => "underline",
            Command::OrderedList => "insertOrderedList",
            Command::UnorderedList => "insertUnorderedList",
            Command::FormatBlock(_) => "formatBlock",
            Command::AlignLeft => "justifyLeft",
            Command::AlignCenter => "justifyCenter",
            Command::AlignRight => "justifyRight",
            Command::CreateLink(_) => "createLink",
            Command::Undo => "undo",
            Command::Redo => "redo",
        }
    }

    /// Value argument, if the command takes one.
    pub fn value(&self) -> Option<&str> {
        match self {
            Command::FormatBlock(format) => Some(format.tag()),
            Command::CreateLink(url) => Some(url),
            _ => None,
        }
    }

    /// Build a command from its name and optional value.
    pub fn parse(name: &str, value: Option<&str>) -> Option<Self> {
        let command = match name {
            "bold" => Command::Bold,
            "italic" => Command::Italic,
            "underline" => Command::Underline,
            "insertOrderedList" => Command::OrderedList,
            "insertUnorderedList" => Command::UnorderedList,
            "formatBlock" => Command::FormatBlock(BlockFormat::from_tag(value?)?),
            "justifyLeft" => Command::AlignLeft,
            "justifyCenter" => Command::AlignCenter,
            "justifyRight" => Command::AlignRight,
            "createLink" => Command::CreateLink(value?.to_string()),
            "undo" => Command::Undo,
            "redo" => Command::Redo,
            _ => return None,
        };
        Some(command)
    }
}

/// One toolbar control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolbarButton {
    /// Issues the command directly.
    Command(Command),
    /// Opens the link flow.
    Link,
}

impl ToolbarButton {
    pub fn label(&self) -> &'static str {
        match self {
            ToolbarButton::Command(command) => match command {
                Command::Bold => "Bold",
                Command::Italic => "Italic",
                Command::Underline => "Underline",
                Command::OrderedList => "Numbered list",
                Command::UnorderedList => "Bulleted list",
                Command::FormatBlock(BlockFormat::H1) => "Heading 1",
                Command::FormatBlock(BlockFormat::H2) => "Heading 2",
                Command::FormatBlock(BlockFormat::H3) => "Heading 3",
                Command::FormatBlock(BlockFormat::Blockquote) => "Quote",
                Command::FormatBlock(BlockFormat::CodeBlock) => "Code",
                Command::FormatBlock(BlockFormat::Paragraph) => "Paragraph",
                Command::AlignLeft => "Align left",
                Command::AlignCenter => "Align center",
                Command::AlignRight => "Align right",
                Command::CreateLink(_) => "Link",
                Command::Undo => "Undo",
                Command::Redo => "Redo",
            },
            ToolbarButton::Link => "Link",
        }
    }
}

/// Toolbar buttons in display order.
pub fn toolbar() -> Vec<ToolbarButton> {
    use ToolbarButton::{Command as Cmd, Link};
    vec![
        Cmd(Command::Bold),
        Cmd(Command::Italic),
        Cmd(Command::Underline),
        Cmd(Command::FormatBlock(BlockFormat::H1)),
        Cmd(Command::FormatBlock(BlockFormat::H2)),
        Cmd(Command::FormatBlock(BlockFormat::H3)),
        Cmd(Command::UnorderedList),
        Cmd(Command::OrderedList),
        Cmd(Command::FormatBlock(BlockFormat::Blockquote)),
        Cmd(Command::FormatBlock(BlockFormat::CodeBlock)),
        Cmd(Command::AlignLeft),
        Cmd(Command::AlignCenter),
        Cmd(Command::AlignRight),
        Link,
        Cmd(Command::Undo),
        Cmd(Command::Redo),
    ]
}
