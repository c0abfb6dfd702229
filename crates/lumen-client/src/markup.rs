// ABOUTME: Fixed rich-text transform for assistant content
// ABOUTME: Newlines, **bold** and *italic* only; everything else stays literal text

use crate::models::Role;

/// An inline piece of rendered assistant text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Bold(Vec<Inline>),
    Italic(String),
    LineBreak,
}

/// Content of a rendered element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedContent {
    /// Never interpreted; used for everything the user typed
    Literal(String),
    Rich(Vec<Inline>),
}

impl RenderedContent {
    /// User text is literal, assistant text goes through [`parse_rich`].
    pub fn for_role(role: Role, text: &str) -> Self {
        match role {
            Role::User => RenderedContent::Literal(text.to_string()),
            Role::Assistant => RenderedContent::Rich(parse_rich(text)),
        }
    }

    /// HTML fragment with every piece of source text escaped
    pub fn to_html(&self) -> String {
        match self {
            RenderedContent::Literal(text) => escape_html(text),
            RenderedContent::Rich(inlines) => {
                let mut out = String::new();
                write_html(inlines, &mut out);
                out
            }
        }
    }

    /// Text with markup markers removed, for plain terminals and tests
    pub fn plain_text(&self) -> String {
        match self {
            RenderedContent::Literal(text) => text.clone(),
            RenderedContent::Rich(inlines) => {
                let mut out = String::new();
                write_plain(inlines, &mut out);
                out
            }
        }
    }
}

fn write_html(inlines: &[Inline], out: &mut String) {
    for inline in inlines {
        match inline {
            Inline::Text(t) => out.push_str(&escape_html(t)),
            Inline::Bold(inner) => {
                out.push_str("<b>");
                write_html(inner, out);
                out.push_str("</b>");
            }
            Inline::Italic(t) => {
                out.push_str("<i>");
                out.push_str(&escape_html(t));
                out.push_str("</i>");
            }
            Inline::LineBreak => out.push_str("<br>"),
        }
    }
}

fn write_plain(inlines: &[Inline], out: &mut String) {
    for inline in inlines {
        match inline {
            Inline::Text(t) | Inline::Italic(t) => out.push_str(t),
            Inline::Bold(inner) => write_plain(inner, out),
            Inline::LineBreak => out.push('\n'),
        }
    }
}

/// Escape the five HTML-significant characters
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Parse assistant text: `\n` becomes a line break, `**x**` bold, `*x*` italic.
///
/// Markers never span lines. An unmatched marker is kept as literal text.
pub fn parse_rich(text: &str) -> Vec<Inline> {
    let mut out = Vec::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push(Inline::LineBreak);
        }
        parse_line(line, &mut out);
    }
    out
}

fn parse_line(line: &str, out: &mut Vec<Inline>) {
    let mut text = String::new();
    let mut rest = line;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("**") {
            if let Some(end) = after.find("**").filter(|&end| end > 0) {
                flush_text(&mut text, out);
                let mut inner = Vec::new();
                parse_italic(&after[..end], &mut inner);
                out.push(Inline::Bold(inner));
                rest = &after[end + 2..];
                continue;
            }
        }
        if let Some(after) = rest.strip_prefix('*') {
            if let Some(end) = after.find('*').filter(|&end| end > 0) {
                flush_text(&mut text, out);
                out.push(Inline::Italic(after[..end].to_string()));
                rest = &after[end + 1..];
                continue;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            text.push(c);
        }
        rest = chars.as_str();
    }
    flush_text(&mut text, out);
}

fn parse_italic(segment: &str, out: &mut Vec<Inline>) {
    let mut text = String::new();
    let mut rest = segment;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('*') {
            if let Some(end) = after.find('*').filter(|&end| end > 0) {
                flush_text(&mut text, out);
                out.push(Inline::Italic(after[..end].to_string()));
                rest = &after[end + 1..];
                continue;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            text.push(c);
        }
        rest = chars.as_str();
    }
    flush_text(&mut text, out);
}

fn flush_text(text: &mut String, out: &mut Vec<Inline>) {
    if !text.is_empty() {
        out.push(Inline::Text(std::mem::take(text)));
    }
}
