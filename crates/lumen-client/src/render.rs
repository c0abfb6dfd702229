// ABOUTME: Conversation renderer contract and the headless transcript implementation
// ABOUTME: Placeholders are addressed by opaque handles and finalize exactly once

use crate::error::LumenError;
use crate::markup::RenderedContent;
use crate::models::{Role, Turn};
use std::collections::HashMap;

/// Opaque reference to a rendered placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceholderHandle(u64);

impl PlaceholderHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// How a placeholder resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Ok,
    Error,
}

/// Visual treatment of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementStyle {
    User,
    Assistant,
    /// In-flight placeholder (system styling)
    Pending,
    Error,
}

impl ElementStyle {
    fn for_turn(turn: &Turn) -> Self {
        match (turn.role, turn.is_error) {
            (Role::User, _) => ElementStyle::User,
            (Role::Assistant, true) => ElementStyle::Error,
            (Role::Assistant, false) => ElementStyle::Assistant,
        }
    }

    /// CSS classes for each style
    pub fn css_class(&self) -> &'static str {
        match self {
            ElementStyle::User => "message user-message",
            ElementStyle::Assistant => "message ai-message",
            ElementStyle::Pending => "message ai-message system-message",
            ElementStyle::Error => "message ai-message error-message",
        }
    }
}

/// Display surface for the conversation
pub trait Renderer {
    /// Insert a pending element and return its handle.
    fn render_placeholder(&mut self, role: Role, initial_text: &str) -> PlaceholderHandle;

    /// Replace the text of a still-pending placeholder (progress updates).
    fn update(&mut self, handle: PlaceholderHandle, text: &str) -> Result<(), LumenError>;

    /// Resolve a placeholder in place. A second call for the same handle fails
    /// with [`LumenError::AlreadyFinalized`] and leaves the element untouched.
    fn finalize(
        &mut self,
        handle: PlaceholderHandle,
        final_text: &str,
        outcome: FinalizeOutcome,
    ) -> Result<(), LumenError>;

    /// Append an already-final turn (rehydration, user input).
    fn render_final(&mut self, turn: &Turn);
}

/// A rendered element in the transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub role: Role,
    pub style: ElementStyle,
    pub content: RenderedContent,
    pub pending: bool,
}

impl Element {
    pub fn to_html(&self) -> String {
        format!(
            "<div class=\"{}\">{}</div>",
            self.style.css_class(),
            self.content.to_html()
        )
    }
}

/// In-memory renderer: the state a display would show, without a display
#[derive(Debug, Default)]
pub struct Transcript {
    elements: Vec<Element>,
    placeholders: HashMap<PlaceholderHandle, usize>,
    next_handle: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The element behind a handle, if the handle was issued by this transcript
    pub fn get(&self, handle: PlaceholderHandle) -> Option<&Element> {
        self.placeholders
            .get(&handle)
            .and_then(|&idx| self.elements.get(idx))
    }

    pub fn pending_count(&self) -> usize {
        self.elements.iter().filter(|e| e.pending).count()
    }

    pub fn to_html(&self) -> String {
        self.elements.iter().map(Element::to_html).collect()
    }

    fn pending_mut(&mut self, handle: PlaceholderHandle) -> Result<&mut Element, LumenError> {
        let idx = *self
            .placeholders
            .get(&handle)
            .ok_or(LumenError::UnknownHandle(handle.0))?;
        let element = self
            .elements
            .get_mut(idx)
            .ok_or(LumenError::UnknownHandle(handle.0))?;
        if !element.pending {
            return Err(LumenError::AlreadyFinalized(handle.0));
        }
        Ok(element)
    }
}

impl Renderer for Transcript {
    fn render_placeholder(&mut self, role: Role, initial_text: &str) -> PlaceholderHandle {
        let handle = PlaceholderHandle(self.next_handle);
        self.next_handle += 1;
        self.elements.push(Element {
            role,
            style: ElementStyle::Pending,
            content: RenderedContent::for_role(role, initial_text),
            pending: true,
        });
        self.placeholders.insert(handle, self.elements.len() - 1);
        handle
    }

    fn update(&mut self, handle: PlaceholderHandle, text: &str) -> Result<(), LumenError> {
        let element = self.pending_mut(handle)?;
        element.content = RenderedContent::for_role(element.role, text);
        Ok(())
    }

    fn finalize(
        &mut self,
        handle: PlaceholderHandle,
        final_text: &str,
        outcome: FinalizeOutcome,
    ) -> Result<(), LumenError> {
        let element = self.pending_mut(handle)?;
        element.content = RenderedContent::for_role(element.role, final_text);
        element.style = match (outcome, element.role) {
            (FinalizeOutcome::Error, _) => ElementStyle::Error,
            (FinalizeOutcome::Ok, Role::User) => ElementStyle::User,
            (FinalizeOutcome::Ok, Role::Assistant) => ElementStyle::Assistant,
        };
        element.pending = false;
        Ok(())
    }

    fn render_final(&mut self, turn: &Turn) {
        self.elements.push(Element {
            role: turn.role,
            style: ElementStyle::for_turn(turn),
            content: RenderedContent::for_role(turn.role, &turn.content),
            pending: false,
        });
    }
}
