//! Rich content editor.
//!
//! [`RichEditor`] drives an [`EditorSurface`]: it seeds the surface once,
//! forwards toolbar commands and keyboard shortcuts to it, runs the link
//! flow, and reports the serialized markup through `on_change` after every
//! input and every command. After mounting, the surface is the source of
//! truth for the content.

pub mod command;
pub mod document;
pub mod markup;
pub mod surface;

pub use command::{BlockFormat, Command, ToolbarButton, toolbar};
pub use document::{Document, Selection};
pub use surface::{EditorError, EditorSurface, VirtualSurface};

use tracing::debug;
use url::Url;

/// URL schemes a link may carry.
const ALLOWED_SCHEMES: &[&str] = &["http", "https", "mailto", "tel"];

/// Blocking URL prompt, used by the link flow when nothing is selected.
pub trait UrlPrompt {
    /// Ask for a URL. `None` means the author cancelled.
    fn prompt_url(&mut self, message: &str) -> Option<String>;
}

impl<F> UrlPrompt for F
where
    F: FnMut(&str) -> Option<String>,
{
    fn prompt_url(&mut self, message: &str) -> Option<String> {
        self(message)
    }
}

/// Open URL-entry modal, holding the selection it will wrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkModal {
    pub selection: Selection,
    pub text: String,
}

/// Result of a link-insertion step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFlow {
    /// Text was selected; the modal is now open.
    ModalOpened,
    /// The link was applied with this URL.
    Applied(String),
    /// Cancelled, or the URL was rejected.
    Cancelled,
}

/// A key press with its modifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPress {
    pub key: String,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl KeyPress {
    pub fn plain(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Self::default()
        }
    }

    pub fn ctrl(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ctrl: true,
            ..Self::default()
        }
    }

    pub fn meta(key: &str) -> Self {
        Self {
            key: key.to_string(),
            meta: true,
            ..Self::default()
        }
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

/// What the editor did with a key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Not a shortcut; the default action proceeds.
    Ignored,
    Command(Command),
    Link(LinkFlow),
}

impl KeyOutcome {
    /// Whether the host's own handling of the key must be suppressed.
    pub fn prevent_default(&self) -> bool {
        !matches!(self, KeyOutcome::Ignored)
    }
}

type ChangeHandler = Box<dyn FnMut(&str) + Send>;

/// Editor controller over a surface.
pub struct RichEditor<S: EditorSurface> {
    surface: S,
    on_change: ChangeHandler,
    link_modal: Option<LinkModal>,
}

impl<S: EditorSurface> RichEditor<S> {
    /// Mount the editor, seeding the surface from `value`.
    ///
    /// This is the only time `value` flows into the surface.
    pub fn mount<F>(mut surface: S, value: &str, on_change: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        surface.set_value(value);
        Self {
            surface,
            on_change: Box::new(on_change),
            link_modal: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Current serialized markup.
    pub fn value(&self) -> String {
        self.surface.get_value()
    }

    /// Report the surface content after an input event.
    pub fn handle_input(&mut self) {
        let value = self.surface.get_value();
        (self.on_change)(&value);
    }

    /// Type text at the selection and report the change.
    pub fn type_text(&mut self, text: &str) {
        self.surface.insert_text(text);
        self.handle_input();
    }

    /// Issue a command, refocus the surface, and report the content.
    pub fn exec(&mut self, command: Command) -> bool {
        let changed = self.surface.apply_command(&command);
        debug!(command = command.name(), changed, "editor command");
        self.surface.focus();
        self.handle_input();
        changed
    }

    /// Whether a toolbar command is active. Failed queries count as
    /// inactive.
    pub fn is_active(&self, command: &Command) -> bool {
        matches!(self.surface.query_command_state(command), Ok(true))
    }

    /// Toolbar buttons with their active state.
    pub fn toolbar_state(&self) -> Vec<(ToolbarButton, bool)> {
        toolbar()
            .into_iter()
            .map(|button| {
                let active = match &button {
                    ToolbarButton::Command(command) => self.is_active(command),
                    ToolbarButton::Link => false,
                };
                (button, active)
            })
            .collect()
    }

    /// Start link insertion.
    ///
    /// With text selected, opens the modal and waits for
    /// [`confirm_link`](Self::confirm_link). Otherwise asks `prompt` for a
    /// URL and links it at the caret.
    pub fn insert_link(&mut self, prompt: &mut dyn UrlPrompt) -> LinkFlow {
        let selection = self.surface.selection();
        if !selection.is_collapsed() {
            self.link_modal = Some(LinkModal {
                selection,
                text: self.surface.selected_text(),
            });
            return LinkFlow::ModalOpened;
        }

        let Some(raw) = prompt.prompt_url("Enter URL:") else {
            return LinkFlow::Cancelled;
        };
        self.apply_link(&raw)
    }

    pub fn link_modal(&self) -> Option<&LinkModal> {
        self.link_modal.as_ref()
    }

    /// Confirm the modal, wrapping the saved selection in a link.
    pub fn confirm_link(&mut self, raw_url: &str) -> LinkFlow {
        let Some(modal) = self.link_modal.take() else {
            return LinkFlow::Cancelled;
        };
        self.surface.select(modal.selection);
        self.apply_link(raw_url)
    }

    pub fn cancel_link(&mut self) {
        self.link_modal = None;
    }

    fn apply_link(&mut self, raw_url: &str) -> LinkFlow {
        match normalize_url(raw_url) {
            Some(url) => {
                self.exec(Command::CreateLink(url.clone()));
                LinkFlow::Applied(url)
            }
            None => {
                debug!(url = raw_url, "link rejected");
                LinkFlow::Cancelled
            }
        }
    }

    /// Handle a key press on the editable region.
    pub fn handle_key(&mut self, key: &KeyPress, prompt: &mut dyn UrlPrompt) -> KeyOutcome {
        if !(key.ctrl || key.meta) {
            return KeyOutcome::Ignored;
        }
        let command = match key.key.to_ascii_lowercase().as_str() {
            "b" => Command::Bold,
            "i" => Command::Italic,
            "u" => Command::Underline,
            "z" if key.shift => Command::Redo,
            "z" => Command::Undo,
            "y" => Command::Redo,
            "k" => return KeyOutcome::Link(self.insert_link(prompt)),
            _ => return KeyOutcome::Ignored,
        };
        self.exec(command.clone());
        KeyOutcome::Command(command)
    }
}

/// Normalize a URL typed by the author.
///
/// Accepts http, https, mailto and tel URLs and site-relative paths as
/// given; a bare host gets `https://`. Other schemes are rejected.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with('/') || raw.starts_with('#') {
        return Some(raw.to_string());
    }

    if let Ok(url) = Url::parse(raw) {
        let scheme = url.scheme();
        if ALLOWED_SCHEMES.contains(&scheme) {
            return Some(raw.to_string());
        }
        // `host:port` parses with the host as scheme.
        let after_scheme = raw.get(scheme.len() + 1..).unwrap_or("");
        if !after_scheme.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
    }

    let candidate = format!("https://{raw}");
    Url::parse(&candidate)
        .ok()
        .filter(|url| url.host().is_some())
        .map(|_| candidate)
}
