use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::errors::SliceError;

/// Replaces the range `[start, end)` of some text with `replacement`
///
/// Ranges are expressed in the coordinates of the original text, before any edit is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    start: usize,
    end: usize,
    replacement: String,
}

impl TextEdit {
    pub fn new(range: Range<usize>, replacement: impl Into<String>) -> Self {
        TextEdit {
            start: range.start,
            end: range.end,
            replacement: replacement.into(),
        }
    }

    /// Inserts `text` at `at` without removing anything
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::new(at..at, text)
    }

    /// Removes `range`
    pub fn delete(range: Range<usize>) -> Self {
        Self::new(range, String::new())
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

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    pub fn is_insertion(&self) -> bool {
        self.start == self.end
    }

    /// Change in length this edit causes
    #[allow(clippy::cast_possible_wrap)]
    pub fn delta(&self) -> isize {
        self.replacement.len() as isize - (self.end - self.start) as isize
    }
}

/// Checks that edits are ordered, do not overlap and fall on `char` boundaries of `content`
///
/// # Errors
///
/// Errors if any of the above does not hold
pub fn validate_edits(content: &str, edits: &[TextEdit]) -> Result<(), SliceError> {
    let mut previous_end = 0;
    for (index, edit) in edits.iter().enumerate() {
        if edit.start > edit.end || edit.end > content.len() {
            return Err(SliceError::Range {
                start: edit.start,
                end: edit.end,
                len: content.len(),
            });
        }
        for offset in [edit.start, edit.end] {
            if !content.is_char_boundary(offset) {
                return Err(SliceError::CharBoundary(offset));
            }
        }
        if index > 0 && edit.start < previous_end {
            return Err(SliceError::UnorderedEdits(index));
        }
        previous_end = edit.end;
    }

    Ok(())
}

/// Applies `edits` to `content` left to right
///
/// # Errors
///
/// Errors if the edits are invalid for the content, see [`validate_edits`]
pub fn apply_edits(content: &str, edits: &[TextEdit]) -> Result<String, SliceError> {
    validate_edits(content, edits)?;

    let mut output = String::with_capacity(expected_len(content, edits));
    let mut cursor = 0;
    for edit in edits {
        output.push_str(&content[cursor..edit.start]);
        output.push_str(&edit.replacement);
        cursor = edit.end;
    }
    output.push_str(&content[cursor..]);

    Ok(output)
}

/// Length of `content` once `edits` are applied
pub(crate) fn expected_len(content: &str, edits: &[TextEdit]) -> usize {
    content
        .len()
        .saturating_add_signed(edits.iter().map(TextEdit::delta).sum())
}
