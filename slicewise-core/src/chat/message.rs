use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::errors::SliceError;
use crate::metadata::Metadata;
use crate::rewrite::{RewriteOutcome, rewrite};
use crate::slices::{Slice, SliceKind, SliceStore, TextEdit, apply_edits, check_range};

use super::tools::ToolCall;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIs,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Marks a message as eligible for prompt caching by providers that support it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheControl {
    Ephemeral,
}

/// A single message in a conversation
///
/// Content is only mutated through methods that keep the attached [`SliceStore`] consistent with
/// it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MessageRepr")]
pub struct Message {
    pub(crate) role: Role,
    pub(crate) content: String,
    #[serde(default, skip_serializing_if = "SliceStore::is_empty")]
    pub(crate) slices: SliceStore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) cache_control: Option<CacheControl>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub(crate) metadata: Metadata,
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: \"{}\"", self.role, self.content)?;
        if let Some(tool_calls) = &self.tool_calls {
            write!(
                f,
                ", tools: {}",
                tool_calls
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )?;
        }
        Ok(())
    }
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
            slices: SliceStore::default(),
            tool_calls: None,
            tool_call_id: None,
            cache_control: None,
            metadata: Metadata::default(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::assistant(content);
        message.tool_calls = Some(tool_calls);
        message
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::new(Role::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn slices(&self) -> &SliceStore {
        &self.slices
    }

    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        self.tool_calls.as_deref()
    }

    pub fn set_tool_calls(&mut self, tool_calls: Option<Vec<ToolCall>>) {
        self.tool_calls = tool_calls;
    }

    pub fn take_tool_calls(&mut self) -> Option<Vec<ToolCall>> {
        self.tool_calls.take()
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    pub fn set_tool_call_id(&mut self, tool_call_id: Option<String>) {
        self.tool_call_id = tool_call_id;
    }

    pub fn cache_control(&self) -> Option<CacheControl> {
        self.cache_control
    }

    #[must_use]
    pub fn with_cache_control(mut self, cache_control: CacheControl) -> Self {
        self.cache_control = Some(cache_control);
        self
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Annotates `range` of the content
    ///
    /// # Errors
    ///
    /// Errors if the range is invalid for the current content
    pub fn add_slice(
        &mut self,
        range: Range<usize>,
        kind: SliceKind,
        metadata: impl Into<Metadata>,
    ) -> Result<&Slice, SliceError> {
        self.slices
            .add(&self.content, range, kind, metadata.into())
    }

    /// Annotates the first occurrence of `target` in the content, if any
    ///
    /// # Errors
    ///
    /// Errors if the resulting range is invalid, which cannot happen for a found target
    pub fn mark_slice(
        &mut self,
        target: &str,
        kind: SliceKind,
        metadata: impl Into<Metadata>,
    ) -> Result<Option<&Slice>, SliceError> {
        let Some(start) = self.content.find(target) else {
            return Ok(None);
        };
        self.add_slice(start..start + target.len(), kind, metadata)
            .map(Some)
    }

    /// Removes the slices matching `predicate`, returning them
    pub fn remove_slices(&mut self, mut predicate: impl FnMut(&Slice) -> bool) -> Vec<Slice> {
        self.slices.retain(|slice| !predicate(slice))
    }

    /// Annotates the whole content as a message slice
    ///
    /// # Errors
    ///
    /// Never errors in practice; the range always matches the content
    pub fn mark_message(&mut self) -> Result<&Slice, SliceError> {
        let metadata = Metadata::from([("role", self.role.to_string())]);
        self.add_slice(0..self.content.len(), SliceKind::message(self.role), metadata)
    }

    /// Applies `edits` to the content and remaps the slices. Returns the slices that were dropped
    /// because their text was replaced.
    ///
    /// Content and slices are updated together; on error neither changes.
    ///
    /// # Errors
    ///
    /// Errors if the edits are invalid for the current content
    pub fn apply_edits(&mut self, edits: &[TextEdit]) -> Result<Vec<Slice>, SliceError> {
        if edits.is_empty() {
            return Ok(Vec::new());
        }
        let new_content = apply_edits(&self.content, edits)?;
        let mut slices = self.slices.clone();
        let dropped = slices.remap(&self.content, &new_content, edits)?;

        self.content = new_content;
        self.slices = slices;

        Ok(dropped)
    }

    /// Inserts `text` before the content
    ///
    /// # Errors
    ///
    /// See [`Message::apply_edits`]
    pub fn prepend(&mut self, text: &str) -> Result<(), SliceError> {
        self.apply_edits(&[TextEdit::insert(0, text)]).map(|_| ())
    }

    /// Inserts `text` after the content
    ///
    /// # Errors
    ///
    /// See [`Message::apply_edits`]
    pub fn append(&mut self, text: &str) -> Result<(), SliceError> {
        self.apply_edits(&[TextEdit::insert(self.content.len(), text)])
            .map(|_| ())
    }

    /// Replaces every occurrence of `from` with `to`, returning the number of replacements
    ///
    /// # Errors
    ///
    /// See [`Message::apply_edits`]
    pub fn replace_all(&mut self, from: &str, to: &str) -> Result<usize, SliceError> {
        if from.is_empty() {
            return Ok(0);
        }
        let edits = self
            .content
            .match_indices(from)
            .map(|(start, matched)| TextEdit::new(start..start + matched.len(), to))
            .collect::<Vec<_>>();

        self.apply_edits(&edits)?;
        Ok(edits.len())
    }

    /// Replaces the whole content, keeping slices consistent
    ///
    /// See [`crate::rewrite::rewrite`].
    ///
    /// # Errors
    ///
    /// Errors if the computed edit is invalid for the content
    pub fn rewrite(&mut self, new_content: impl Into<String>) -> Result<RewriteOutcome, SliceError> {
        rewrite(self, new_content)
    }

    /// Trims leading and trailing whitespace through [`Message::apply_edits`]
    ///
    /// # Errors
    ///
    /// See [`Message::apply_edits`]
    pub fn trim(&mut self) -> Result<(), SliceError> {
        let len = self.content.len();
        let start = len - self.content.trim_start().len();
        if start == len {
            return self.apply_edits(&[TextEdit::delete(0..len)]).map(|_| ());
        }
        let end = self.content.trim_end().len();

        let mut edits = Vec::new();
        if start > 0 {
            edits.push(TextEdit::delete(0..start));
        }
        if end < len {
            edits.push(TextEdit::delete(end..len));
        }
        self.apply_edits(&edits).map(|_| ())
    }
}

impl<S: AsRef<str>> From<(Role, S)> for Message {
    fn from((role, content): (Role, S)) -> Self {
        Message::new(role, content.as_ref())
    }
}

impl AsRef<str> for Message {
    fn as_ref(&self) -> &str {
        &self.content
    }
}

// Deserialized messages have their slices validated against the content
#[derive(Deserialize)]
struct MessageRepr {
    role: Role,
    content: String,
    #[serde(default)]
    slices: SliceStore,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    cache_control: Option<CacheControl>,
    #[serde(default)]
    metadata: Metadata,
}

impl TryFrom<MessageRepr> for Message {
    type Error = SliceError;

    fn try_from(repr: MessageRepr) -> Result<Self, Self::Error> {
        for slice in &repr.slices {
            check_range(&repr.content, &slice.range())?;
        }
        Ok(Message {
            role: repr.role,
            content: repr.content,
            slices: repr.slices.into_iter().collect(),
            tool_calls: repr.tool_calls,
            tool_call_id: repr.tool_call_id,
            cache_control: repr.cache_control,
            metadata: repr.metadata,
        })
    }
}
