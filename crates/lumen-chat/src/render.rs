// ABOUTME: Terminal renderer for chat turns
// ABOUTME: Tracks placeholders in a Transcript and prints each change as a colored line

use colored::Colorize;
use lumen_client::markup::Inline;
use lumen_client::{
    ElementStyle, FinalizeOutcome, LumenError, PlaceholderHandle, RenderedContent, Renderer,
    Role, Transcript, Turn,
};
use std::io::Write;

/// Renderer that appends to a terminal instead of patching a page.
///
/// A terminal cannot rewrite earlier lines, so placeholder updates are
/// printed as dimmed status lines and the final text follows them.
pub struct TerminalRenderer<W: Write> {
    transcript: Transcript,
    out: W,
    echo_user: bool,
    muted: bool,
    write_failed: bool,
}

impl TerminalRenderer<std::io::Stdout> {
    pub fn stdout(echo_user: bool) -> Self {
        Self::new(std::io::stdout(), echo_user)
    }
}

impl<W: Write> TerminalRenderer<W> {
    /// `echo_user` prints user turns as they arrive; interactive mode turns
    /// it off after rehydration since the user just typed the line.
    pub fn new(out: W, echo_user: bool) -> Self {
        Self {
            transcript: Transcript::new(),
            out,
            echo_user,
            muted: false,
            write_failed: false,
        }
    }

    /// Track turns without printing them (e.g. while rehydrating a one-shot send).
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn set_echo_user(&mut self, echo_user: bool) {
        self.echo_user = echo_user;
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn print_line(&mut self, style: ElementStyle, content: &RenderedContent) {
        if self.muted {
            return;
        }
        let body = styled(content);
        let line = match style {
            ElementStyle::User => format!("{} {}", "you ›".cyan().bold(), body),
            ElementStyle::Assistant => format!("{} {}", "lumen ›".green().bold(), body),
            ElementStyle::Pending => {
                format!("  {}", sanitize_terminal(&content.plain_text()).dimmed())
            }
            ElementStyle::Error => format!(
                "{} {}",
                "lumen ›".red().bold(),
                sanitize_terminal(&content.plain_text()).red()
            ),
        };
        let result = writeln!(self.out, "{}", line).and_then(|_| self.out.flush());
        if let Err(e) = result {
            if !self.write_failed {
                self.write_failed = true;
                tracing::debug!(error = %e, "terminal write failed");
            }
        }
    }

    fn print_element(&mut self, handle: PlaceholderHandle) {
        if let Some(element) = self.transcript.get(handle) {
            let (style, content) = (element.style, element.content.clone());
            self.print_line(style, &content);
        }
    }
}

impl<W: Write> Renderer for TerminalRenderer<W> {
    fn render_placeholder(&mut self, role: Role, initial_text: &str) -> PlaceholderHandle {
        let handle = self.transcript.render_placeholder(role, initial_text);
        self.print_element(handle);
        handle
    }

    fn update(&mut self, handle: PlaceholderHandle, text: &str) -> Result<(), LumenError> {
        self.transcript.update(handle, text)?;
        self.print_element(handle);
        Ok(())
    }

    fn finalize(
        &mut self,
        handle: PlaceholderHandle,
        final_text: &str,
        outcome: FinalizeOutcome,
    ) -> Result<(), LumenError> {
        self.transcript.finalize(handle, final_text, outcome)?;
        self.print_element(handle);
        Ok(())
    }

    fn render_final(&mut self, turn: &Turn) {
        self.transcript.render_final(turn);
        if turn.role == Role::User && !self.echo_user {
            return;
        }
        if let Some(element) = self.transcript.elements().last() {
            let (style, content) = (element.style, element.content.clone());
            self.print_line(style, &content);
        }
    }
}

/// Assistant markup as terminal attributes; literal text passes through.
fn styled(content: &RenderedContent) -> String {
    match content {
        RenderedContent::Literal(text) => sanitize_terminal(text),
        RenderedContent::Rich(inlines) => {
            let mut out = String::new();
            push_inlines(inlines, &mut out);
            out
        }
    }
}

fn push_inlines(inlines: &[Inline], out: &mut String) {
    for inline in inlines {
        match inline {
            Inline::Text(t) => out.push_str(&sanitize_terminal(t)),
            Inline::Bold(inner) => {
                let mut text = String::new();
                push_inlines(inner, &mut text);
                out.push_str(&text.bold().to_string());
            }
            Inline::Italic(t) => out.push_str(&sanitize_terminal(t).italic().to_string()),
            Inline::LineBreak => out.push_str("\n       "),
        }
    }
}

/// Replace control characters (ESC, CR, BEL, C1 controls) so message text
/// cannot move the cursor, retitle the window or restyle earlier output.
/// Newlines and tabs are kept.
fn sanitize_terminal(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_control() && c != '\n' && c != '\t' {
                char::REPLACEMENT_CHARACTER
            } else {
                c
            }
        })
        .collect()
}
