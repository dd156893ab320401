//! Slices annotate ranges of message content
//!
//! A [`Slice`] marks a half-open byte range `[start, end)` of some text with a [`SliceKind`] and
//! [`Metadata`](crate::metadata::Metadata). Slices of a message live in its [`SliceStore`], which
//! keeps them valid when the content is rewritten, either by remapping through [`TextEdit`]s or,
//! when a rewrite is opaque, by searching for the text they covered.
mod edit;
mod slice;
mod store;

pub use edit::*;
pub use slice::*;
pub use store::SliceStore;

pub(crate) use store::check_range;

/// Largest `char` boundary of `content` at or before `index`
pub(crate) fn floor_char_boundary(content: &str, index: usize) -> usize {
    if index >= content.len() {
        return content.len();
    }
    let mut index = index;
    while !content.is_char_boundary(index) {
        index -= 1;
    }
    index
}
