//! Replaces the content of a message while keeping its slices consistent
//!
//! A full replacement is reduced to a single edit covering the text between the longest common
//! prefix and suffix of the old and new content. When that edit leaves every slice intact (the
//! common case of prepending or appending text) the slices are remapped through it. When it cuts
//! into a slice, every slice is instead relocated by searching for the text it covered.
use serde::Serialize;

use crate::chat::Message;
use crate::errors::SliceError;
use crate::slices::{Slice, TextEdit};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display, strum_macros::EnumIs,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RewriteStrategy {
    /// The content did not change
    Unchanged,
    /// Slices were remapped through the computed edit
    Diff,
    /// Slices were searched for in the new content
    Relocate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewriteOutcome {
    pub strategy: RewriteStrategy,
    /// Slices removed because the text they covered was replaced
    pub dropped: Vec<Slice>,
    /// Number of slices newly marked as orphaned
    pub orphaned: usize,
}

impl RewriteOutcome {
    fn unchanged() -> Self {
        RewriteOutcome {
            strategy: RewriteStrategy::Unchanged,
            dropped: Vec::new(),
            orphaned: 0,
        }
    }
}

/// The single edit turning `old` into `new`, or `None` if they are equal
///
/// Prefix and suffix are measured in whole `char`s, so the edit is always on `char` boundaries.
pub fn diff_edit(old: &str, new: &str) -> Option<TextEdit> {
    if old == new {
        return None;
    }

    let prefix = old
        .char_indices()
        .zip(new.chars())
        .find(|((_, a), b)| a != b)
        .map_or_else(|| old.len().min(new.len()), |((index, _), _)| index);

    let suffix = old[prefix..]
        .chars()
        .rev()
        .zip(new[prefix..].chars().rev())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a.len_utf8())
        .sum::<usize>();

    Some(TextEdit::new(
        prefix..old.len() - suffix,
        &new[prefix..new.len() - suffix],
    ))
}

/// Replaces the content of `message` with `new_content`
///
/// Content and slices are swapped in together once both are computed.
///
/// # Errors
///
/// Errors if the computed edit cannot be applied, which indicates a bug
#[tracing::instrument(skip_all, fields(role = %message.role()))]
pub fn rewrite(
    message: &mut Message,
    new_content: impl Into<String>,
) -> Result<RewriteOutcome, SliceError> {
    let new_content = new_content.into();
    let Some(edit) = diff_edit(&message.content, &new_content) else {
        return Ok(RewriteOutcome::unchanged());
    };

    let mut slices = message.slices.clone();
    let outcome = if slices.iter().any(|slice| cuts_into(&edit, slice)) {
        let orphaned = slices.relocate(&message.content, &new_content);
        tracing::debug!(orphaned, "Rewrite cuts into slices, relocated by content");
        RewriteOutcome {
            strategy: RewriteStrategy::Relocate,
            dropped: Vec::new(),
            orphaned,
        }
    } else {
        let dropped = slices.remap(&message.content, &new_content, std::slice::from_ref(&edit))?;
        tracing::trace!(edit = ?edit.range(), "Rewrite remapped slices");
        RewriteOutcome {
            strategy: RewriteStrategy::Diff,
            dropped,
            orphaned: 0,
        }
    };

    message.content = new_content;
    message.slices = slices;

    Ok(outcome)
}

/// Whether `edit` changes text strictly inside `slice`
fn cuts_into(edit: &TextEdit, slice: &Slice) -> bool {
    if edit.is_insertion() || slice.is_empty() {
        let (point, range) = if edit.is_insertion() {
            (edit.start(), slice.range())
        } else {
            (slice.start(), edit.range())
        };
        return range.start < point && point < range.end;
    }
    edit.start() < slice.end() && slice.start() < edit.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::slices::SliceKind;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn ranges(message: &Message) -> Vec<std::ops::Range<usize>> {
        message.slices().iter().map(Slice::range).collect()
    }

    #[test]
    fn test_prepend_through_rewrite() {
        let mut message = Message::user("Hello");
        message.mark_message().unwrap();

        let outcome = message.rewrite("[CTX] Hello").unwrap();

        assert_eq!(outcome.strategy, RewriteStrategy::Diff);
        assert_eq!(message.content(), "[CTX] Hello");
        assert_eq!(ranges(&message), vec![6..11]);
    }

    #[test]
    fn test_append_and_prepend_at_once() {
        let mut message = Message::user("Hello");
        message.mark_message().unwrap();

        // Two insertions become one edit spanning the whole old content, so slices are relocated
        let outcome = message.rewrite("<<Hello>>").unwrap();

        assert_eq!(outcome.strategy, RewriteStrategy::Relocate);
        assert_eq!(outcome.orphaned, 0);
        assert_eq!(ranges(&message), vec![2..7]);
    }

    #[test]
    fn test_unchanged() {
        let mut message = Message::user("Hello");
        message.mark_message().unwrap();
        let outcome = message.rewrite("Hello").unwrap();

        assert!(outcome.strategy.is_unchanged());
        assert_eq!(ranges(&message), vec![0..5]);
    }

    #[test]
    fn test_mid_content_edit_relocates_or_orphans() {
        let mut message = Message::user("Hello world");
        message
            .mark_slice("Hello", SliceKind::custom("greeting"), Metadata::default())
            .unwrap();
        message
            .mark_slice("world", SliceKind::custom("subject"), Metadata::default())
            .unwrap();

        let outcome = message.rewrite("Hello there").unwrap();

        assert_eq!(outcome.strategy, RewriteStrategy::Relocate);
        assert_eq!(outcome.orphaned, 1);
        assert_eq!(message.slices().len(), 2);

        let greeting = message
            .slices()
            .query(|s| s.kind().tag() == "greeting")
            .next()
            .unwrap();
        assert_eq!(greeting.text(message.content()), Some("Hello"));
        assert!(!greeting.is_orphaned());

        let subject = message.slices().orphaned().next().unwrap();
        assert_eq!(subject.kind().tag(), "subject");
        assert!(subject.end() <= message.content().len());
    }

    #[test]
    fn test_edit_outside_slices_is_remapped() {
        let mut message = Message::user("name: bob, age: 3");
        message
            .mark_slice("bob", SliceKind::custom("name"), Metadata::default())
            .unwrap();

        let outcome = message.rewrite("name: bob, age: 42").unwrap();

        assert_eq!(outcome.strategy, RewriteStrategy::Diff);
        assert_eq!(ranges(&message), vec![6..9]);
    }

    #[test_case("abc", "abc", None ; "equal")]
    #[test_case("aa", "aaa", Some(TextEdit::insert(2, "a")) ; "overlapping prefix and suffix")]
    #[test_case("héllo", "hèllo", Some(TextEdit::new(1..3, "è")) ; "shared leading byte")]
    #[test_case("abc", "", Some(TextEdit::delete(0..3)) ; "cleared")]
    #[test_case("", "abc", Some(TextEdit::insert(0, "abc")) ; "filled")]
    fn test_diff_edit(old: &str, new: &str, expected: Option<TextEdit>) {
        assert_eq!(diff_edit(old, new), expected);
    }

    #[test]
    fn test_rewrite_never_leaves_invalid_offsets() {
        let mut message = Message::user("The quick brown fox");
        for word in ["The", "quick", "brown", "fox"] {
            message
                .mark_slice(word, SliceKind::custom(word), Metadata::default())
                .unwrap();
        }

        for new_content in ["The slow brown fox", "fox", "", "brown The fox quick!"] {
            message.rewrite(new_content).unwrap();
            for slice in message.slices() {
                assert!(slice.start() <= slice.end());
                assert!(slice.end() <= message.content().len());
            }
            assert_eq!(message.slices().len(), 4);
        }
    }
}
