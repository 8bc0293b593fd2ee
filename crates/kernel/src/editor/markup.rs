//! Markup serialization for editor documents.
//!
//! Output uses the same tags a browser's editing commands produce
//! (`<b>`, `<i>`, `<u>`, `<a href>`, block tags with an optional
//! `text-align` style). The parser accepts that vocabulary plus the usual
//! synonyms (`<strong>`, `<em>`, `<div>`, `<h4>`–`<h6>`); unknown tags are
//! transparent and their text is kept.

use url::Url;

use super::ALLOWED_SCHEMES;
use super::document::{Align, Block, BlockKind, Document, ListKind, Marks};

/// Serialize a document to markup.
pub fn to_html(doc: &Document) -> String {
    let mut out = String::new();
    let mut open_list: Option<ListKind> = None;

    for block in doc.blocks() {
        let list = match block.kind {
            BlockKind::ListItem(kind) => Some(kind),
            _ => None,
        };
        if open_list != list {
            if let Some(kind) = open_list {
                out.push_str(&format!("</{}>", list_tag(kind)));
            }
            if let Some(kind) = list {
                out.push_str(&format!("<{}>", list_tag(kind)));
            }
            open_list = list;
        }

        let tag = block_tag(block.kind);
        out.push('<');
        out.push_str(tag);
        if let Some(align) = block.align {
            out.push_str(&format!(" style=\"text-align: {};\"", align.as_css()));
        }
        out.push('>');
        if block.is_empty() {
            out.push_str("<br>");
        } else {
            for run in &block.runs {
                write_run(&mut out, &run.text, &run.marks);
            }
        }
        out.push_str(&format!("</{tag}>"));
    }

    if let Some(kind) = open_list {
        out.push_str(&format!("</{}>", list_tag(kind)));
    }
    out
}

fn write_run(out: &mut String, text: &str, marks: &Marks) {
    if let Some(href) = &marks.link {
        out.push_str(&format!("<a href=\"{}\">", escape_attr(href)));
    }
    if marks.bold {
        out.push_str("<b>");
    }
    if marks.italic {
        out.push_str("<i>");
    }
    if marks.underline {
        out.push_str("<u>");
    }
    out.push_str(&escape_text(text));
    if marks.underline {
        out.push_str("</u>");
    }
    if marks.italic {
        out.push_str("</i>");
    }
    if marks.bold {
        out.push_str("</b>");
    }
    if marks.link.is_some() {
        out.push_str("</a>");
    }
}

fn block_tag(kind: BlockKind) -> &'static str {
    match kind {
        BlockKind::Paragraph => "p",
        BlockKind::Heading(1) => "h1",
        BlockKind::Heading(2) => "h2",
        BlockKind::Heading(_) => "h3",
        BlockKind::Blockquote => "blockquote",
        BlockKind::CodeBlock => "pre",
        BlockKind::ListItem(_) => "li",
    }
}

fn list_tag(kind: ListKind) -> &'static str {
    match kind {
        ListKind::Ordered => "ol",
        ListKind::Unordered => "ul",
    }
}

/// Escape text content.
pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape an attribute value for double quotes.
pub fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

/// Decode the handful of entities editors emit.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let decoded = rest.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &rest[1..end];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, PartialEq)]
enum Token {
    Open { name: String, attrs: Vec<(String, String)> },
    Close(String),
    Text(String),
}

/// Split markup into tags and text. Comments and doctype are dropped.
fn tokenize(html: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = html;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("<!--") {
            rest = after.find("-->").map(|i| &after[i + 3..]).unwrap_or("");
            continue;
        }
        if rest.starts_with('<') && starts_tag(&rest[1..]) {
            let Some(end) = rest.find('>') else {
                tokens.push(Token::Text(rest.to_string()));
                break;
            };
            let inner = &rest[1..end];
            rest = &rest[end + 1..];
            if let Some(name) = inner.strip_prefix('/') {
                tokens.push(Token::Close(name.trim().to_ascii_lowercase()));
            } else if !inner.starts_with('!') && !inner.starts_with('?') {
                let inner = inner.trim_end_matches('/');
                let (name, attrs) = inner
                    .split_once(char::is_whitespace)
                    .unwrap_or((inner, ""));
                tokens.push(Token::Open {
                    name: name.to_ascii_lowercase(),
                    attrs: parse_attrs(attrs),
                });
            }
            continue;
        }
        // A `<` that does not open a tag is literal text.
        let end = rest
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '<')
            .map_or(rest.len(), |(i, _)| i);
        tokens.push(Token::Text(decode_entities(&rest[..end])));
        rest = &rest[end..];
    }
    tokens
}

fn starts_tag(after: &str) -> bool {
    let after = after.strip_prefix('/').unwrap_or(after);
    after.starts_with(|c: char| c.is_ascii_alphabetic() || c == '!' || c == '?')
}

fn parse_attrs(mut input: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    loop {
        input = input.trim_start();
        if input.is_empty() {
            break;
        }
        let name_end = input
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(input.len());
        let name = input[..name_end].to_ascii_lowercase();
        input = input[name_end..].trim_start();
        let value = if let Some(after_eq) = input.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            let (value, remaining) = match after_eq.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let body = &after_eq[1..];
                    let close = body.find(q).unwrap_or(body.len());
                    (&body[..close], body.get(close + 1..).unwrap_or(""))
                }
                _ => {
                    let end = after_eq
                        .find(char::is_whitespace)
                        .unwrap_or(after_eq.len());
                    (&after_eq[..end], &after_eq[end..])
                }
            };
            input = remaining;
            decode_entities(value)
        } else {
            String::new()
        };
        if !name.is_empty() {
            attrs.push((name, value));
        }
    }
    attrs
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

/// Link target kept from stored markup. Relative references pass; absolute
/// URLs must use an allowed scheme.
fn safe_href(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match Url::parse(href) {
        Ok(url) if ALLOWED_SCHEMES.contains(&url.scheme()) => Some(href.to_string()),
        Ok(_) => None,
        Err(url::ParseError::RelativeUrlWithoutBase) if !href.contains(':') => {
            Some(href.to_string())
        }
        Err(_) => None,
    }
}

fn align_of(attrs: &[(String, String)]) -> Option<Align> {
    if let Some(style) = attr(attrs, "style") {
        for decl in style.split(';') {
            if let Some((prop, value)) = decl.split_once(':')
                && prop.trim().eq_ignore_ascii_case("text-align")
            {
                return Align::from_css(value);
            }
        }
    }
    attr(attrs, "align").and_then(Align::from_css)
}

/// Parser state while walking tokens.
#[derive(Default)]
struct Builder {
    blocks: Vec<Block>,
    current: Option<Block>,
    bold: usize,
    italic: usize,
    underline: usize,
    /// One entry per open `<a>`; `None` for a rejected target.
    links: Vec<Option<String>>,
    lists: Vec<ListKind>,
    quote: usize,
    pre: usize,
}

impl Builder {
    fn marks(&self) -> Marks {
        Marks {
            bold: self.bold > 0,
            italic: self.italic > 0,
            underline: self.underline > 0,
            link: self.links.last().cloned().flatten(),
        }
    }

    fn finish(&mut self) {
        if let Some(mut block) = self.current.take() {
            if block.kind != BlockKind::CodeBlock {
                if let Some(last) = block.runs.last_mut() {
                    let trimmed = last.text.trim_end().len();
                    last.text.truncate(trimmed);
                }
                block.runs.retain(|r| !r.text.is_empty());
            }
            self.blocks.push(block);
        }
    }

    fn start(&mut self, kind: BlockKind, align: Option<Align>) {
        // A paragraph inside a list item or quote keeps the container kind.
        if let Some(current) = &mut self.current
            && current.is_empty()
        {
            if kind != BlockKind::Paragraph
                || !matches!(current.kind, BlockKind::ListItem(_) | BlockKind::Blockquote)
            {
                current.kind = kind;
            }
            if align.is_some() {
                current.align = align;
            }
            return;
        }
        self.finish();
        let mut block = Block::new(kind);
        block.align = align;
        self.current = Some(block);
    }

    fn text(&mut self, text: &str) {
        let pre = self.pre > 0;
        let text = if pre {
            text.to_string()
        } else {
            collapse_whitespace(text)
        };
        if self.current.is_none() {
            if text.trim().is_empty() {
                return;
            }
            let kind = if self.quote > 0 {
                BlockKind::Blockquote
            } else {
                BlockKind::Paragraph
            };
            self.current = Some(Block::new(kind));
        }
        let marks = self.marks();
        if let Some(block) = &mut self.current {
            let text = if !pre && block.is_empty() {
                text.trim_start().to_string()
            } else {
                text
            };
            block.push_text(&text, &marks);
        }
    }

    fn open(&mut self, name: &str, attrs: &[(String, String)]) {
        let align = align_of(attrs);
        match name {
            "p" | "div" => {
                let kind = if self.quote > 0 {
                    BlockKind::Blockquote
                } else {
                    BlockKind::Paragraph
                };
                self.start(kind, align);
            }
            "h1" => self.start(BlockKind::Heading(1), align),
            "h2" => self.start(BlockKind::Heading(2), align),
            "h3" | "h4" | "h5" | "h6" => self.start(BlockKind::Heading(3), align),
            "blockquote" => {
                self.quote += 1;
                self.start(BlockKind::Blockquote, align);
            }
            "pre" => {
                self.pre += 1;
                self.start(BlockKind::CodeBlock, align);
            }
            "ul" => self.lists.push(ListKind::Unordered),
            "ol" => self.lists.push(ListKind::Ordered),
            "li" => {
                let kind = self.lists.last().copied().unwrap_or(ListKind::Unordered);
                self.finish();
                self.start(BlockKind::ListItem(kind), align);
            }
            "b" | "strong" => self.bold += 1,
            "i" | "em" => self.italic += 1,
            "u" => self.underline += 1,
            "a" => self.links.push(attr(attrs, "href").and_then(safe_href)),
            _ => {}
        }
    }

    fn close(&mut self, name: &str) {
        match name {
            "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li" => self.finish(),
            "blockquote" => {
                self.quote = self.quote.saturating_sub(1);
                self.finish();
            }
            "pre" => {
                self.pre = self.pre.saturating_sub(1);
                self.finish();
            }
            "ul" | "ol" => {
                self.finish();
                self.lists.pop();
            }
            "b" | "strong" => self.bold = self.bold.saturating_sub(1),
            "i" | "em" => self.italic = self.italic.saturating_sub(1),
            "u" => self.underline = self.underline.saturating_sub(1),
            "a" => {
                self.links.pop();
            }
            _ => {}
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    for c in text.chars() {
        if c.is_whitespace() && c != '\u{a0}' {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out
}

/// Parse markup into a document.
pub fn parse(html: &str) -> Document {
    let mut builder = Builder::default();
    for token in tokenize(html) {
        match token {
            Token::Open { name, attrs } => builder.open(&name, &attrs),
            Token::Close(name) => builder.close(&name),
            Token::Text(text) => builder.text(&text),
        }
    }
    builder.finish();
    Document::from_blocks(builder.blocks)
}

/// Plain-text projection of markup: tags removed, entities decoded,
/// whitespace collapsed, blocks separated by a space.
pub fn plain_text(html: &str) -> String {
    let mut out = String::new();
    for token in tokenize(html) {
        match token {
            Token::Text(text) => out.push_str(&text),
            Token::Open { name, .. } | Token::Close(name) if is_block_tag(&name) => {
                out.push(' ');
            }
            _ => {}
        }
    }
    collapse_whitespace(&out.replace('\u{a0}', " "))
        .trim()
        .to_string()
}

fn is_block_tag(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "br"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "blockquote"
            | "pre"
            | "li"
            | "ul"
            | "ol"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::editor::document::Selection;

    #[test]
    fn serializes_marks_and_blocks() {
        let mut doc = Document::new();
        doc.insert_text(Selection::caret(0), "Tips\nUse vinegar");
        doc.set_block_kind(Selection::caret(0), BlockKind::Heading(2));
        doc.toggle_mark(Selection::new(9, 16), crate::editor::document::Mark::Bold);
        assert_eq!(to_html(&doc), "<h2>Tips</h2><p>Use <b>vinegar</b></p>");
    }

    #[test]
    fn groups_list_items() {
        let html = "<ul><li>Dust</li><li>Mop</li></ul><ol><li>Rinse</li></ol>";
        let doc = parse(html);
        assert_eq!(doc.blocks().len(), 3);
        assert_eq!(to_html(&doc), html);
    }

    #[test]
    fn parse_reads_alignment_and_links() {
        let html = r#"<p style="text-align: center;">Visit <a href="https://example.com/?a=1&amp;b=2">us</a></p>"#;
        let doc = parse(html);
        let block = &doc.blocks()[0];
        assert_eq!(block.align, Some(Align::Center));
        assert_eq!(
            block.runs[1].marks.link.as_deref(),
            Some("https://example.com/?a=1&b=2")
        );
        assert_eq!(to_html(&doc), html);
    }

    #[test]
    fn parse_accepts_synonyms_and_bare_text() {
        let doc = parse("Loose <strong>text</strong><div><em>more</em></div>");
        assert_eq!(
            to_html(&doc),
            "<p>Loose <b>text</b></p><p><i>more</i></p>"
        );
    }

    #[test]
    fn parse_keeps_paragraph_inside_list_item() {
        let doc = parse("<ul><li><p>Dust</p></li></ul>");
        assert_eq!(to_html(&doc), "<ul><li>Dust</li></ul>");
    }

    #[test]
    fn empty_block_round_trips() {
        let doc = parse("<p><br></p>");
        assert_eq!(doc.blocks().len(), 1);
        assert_eq!(to_html(&doc), "<p><br></p>");
    }

    #[test]
    fn escapes_text() {
        let doc = parse("<p>5 &lt; 6 &amp; 7</p>");
        assert_eq!(doc.text(), "5 < 6 & 7");
        assert_eq!(to_html(&doc), "<p>5 &lt; 6 &amp; 7</p>");
    }

    #[test]
    fn plain_text_strips_tags() {
        assert_eq!(
            plain_text("<h1>Title</h1><p>Hello <b>bold</b>&nbsp;world</p>"),
            "Title Hello bold world"
        );
        assert_eq!(plain_text("<p>  </p>"), "");
    }

    #[test]
    fn parse_drops_unsafe_link_targets() {
        for html in [
            r#"<p><a href="javascript:alert(1)">x</a></p>"#,
            r#"<p><a href=" JavaScript:alert(1)">x</a></p>"#,
            r#"<p><a href="&#106;avascript:alert(1)">x</a></p>"#,
            r#"<p><a href="data:text/html,boom">x</a></p>"#,
        ] {
            let out = to_html(&parse(html));
            assert_eq!(out, "<p>x</p>", "input: {html}");
        }
    }

    #[test]
    fn parse_keeps_relative_and_mail_links() {
        let html = r##"<p><a href="/services/ovens">ovens</a> <a href="#faq">faq</a> <a href="mailto:hi@lustra.test">mail</a></p>"##;
        assert_eq!(to_html(&parse(html)), html);
    }

    #[test]
    fn unsafe_link_inside_safe_link_keeps_outer_only() {
        let doc = parse(r#"<p><a href="https://lustra.test">a <a href="javascript:x">b</a></a></p>"#);
        let runs = &doc.blocks()[0].runs;
        assert_eq!(runs[0].marks.link.as_deref(), Some("https://lustra.test"));
        assert!(runs.iter().all(|r| r.marks.link.as_deref() != Some("javascript:x")));
    }

    #[test]
    fn bare_angle_bracket_is_text() {
        let doc = parse("<p>5 < 6 and 7 > 3</p>");
        assert_eq!(doc.text(), "5 < 6 and 7 > 3");
        assert_eq!(to_html(&doc), "<p>5 &lt; 6 and 7 &gt; 3</p>");
        assert_eq!(plain_text("<p>a <3 b</p>"), "a <3 b");
    }

    #[test]
    fn decode_numeric_entities() {
        assert_eq!(decode_entities("&#233;t&#xE9; &unknown; &"), "été &unknown; &");
    }
}
