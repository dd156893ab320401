use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::chat::{Role, ToolCall};
use crate::metadata::{Metadata, MetadataValue};

use super::floor_char_boundary;

/// What a slice annotates, together with the object it annotates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum_macros::EnumIs)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SliceKind {
    /// The content of a whole message
    Message { role: Role },
    /// A rendered tool call
    ToolCall { call: ToolCall },
    /// A rendered tool response
    ToolResponse { tool_call_id: String },
    /// Anything else, named by the user
    Custom {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        object: Option<MetadataValue>,
    },
}

impl SliceKind {
    pub fn message(role: Role) -> Self {
        SliceKind::Message { role }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        SliceKind::ToolCall { call }
    }

    pub fn tool_response(tool_call_id: impl Into<String>) -> Self {
        SliceKind::ToolResponse {
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn custom(name: impl Into<String>) -> Self {
        SliceKind::Custom {
            name: name.into(),
            object: None,
        }
    }

    /// The type tag of the slice, i.e. `message` or `tool_call`
    pub fn tag(&self) -> &str {
        match self {
            SliceKind::Message { .. } => "message",
            SliceKind::ToolCall { .. } => "tool_call",
            SliceKind::ToolResponse { .. } => "tool_response",
            SliceKind::Custom { name, .. } => name,
        }
    }
}

/// Whether a slice still points at the text it was created for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::EnumIs)]
#[serde(rename_all = "snake_case")]
pub enum SliceStatus {
    #[default]
    Valid,
    /// The anchor text could not be found after an opaque rewrite. The offsets are kept inside the
    /// content but no longer mean anything.
    Orphaned,
}

/// An annotated half-open range `[start, end)` into some text
///
/// Offsets are byte offsets on `char` boundaries. After tokenization the same type carries token
/// indices instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    start: usize,
    end: usize,
    kind: SliceKind,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    status: SliceStatus,
}

impl Slice {
    pub(crate) fn new(range: Range<usize>, kind: SliceKind, metadata: Metadata) -> Self {
        Slice {
            start: range.start,
            end: range.end,
            kind,
            metadata,
            status: SliceStatus::Valid,
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn kind(&self) -> &SliceKind {
        &self.kind
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn status(&self) -> SliceStatus {
        self.status
    }

    pub fn is_orphaned(&self) -> bool {
        self.status.is_orphaned()
    }

    /// The text this slice covers in `content`, if the range is valid for it
    pub fn text<'a>(&self, content: &'a str) -> Option<&'a str> {
        content.get(self.range())
    }

    /// Moves the slice to the first occurrence of `anchor_text` in `new_content`
    ///
    /// If the anchor cannot be found the slice is kept, clamped into the new content and marked
    /// [`SliceStatus::Orphaned`]. An empty anchor matches everywhere and is never found. Returns
    /// whether the slice was relocated.
    pub fn match_and_relocate(&mut self, anchor_text: &str, new_content: &str) -> bool {
        let found = if anchor_text.is_empty() {
            None
        } else {
            new_content.find(anchor_text)
        };

        if let Some(found) = found {
            self.start = found;
            self.end = found + anchor_text.len();
            self.status = SliceStatus::Valid;
            true
        } else {
            tracing::warn!(
                kind = self.kind.tag(),
                anchor = anchor_text,
                "Slice anchor not found after rewrite, marking as orphaned"
            );
            self.orphan(new_content);
            false
        }
    }

    /// Clamps the slice into `content` and marks it [`SliceStatus::Orphaned`]
    pub(crate) fn orphan(&mut self, content: &str) {
        self.clamp_to(content);
        self.status = SliceStatus::Orphaned;
    }

    pub(crate) fn set_range(&mut self, range: Range<usize>) {
        self.start = range.start;
        self.end = range.end;
    }

    pub(crate) fn clamp_to(&mut self, content: &str) {
        self.start = floor_char_boundary(content, self.start);
        self.end = floor_char_boundary(content, self.end).max(self.start);
    }

    /// Copy of this slice with a different range, used when projecting into other coordinates
    pub(crate) fn with_range(&self, range: Range<usize>) -> Self {
        Slice {
            start: range.start,
            end: range.end,
            ..self.clone()
        }
    }
}
