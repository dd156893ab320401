use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::errors::SliceError;
use crate::metadata::Metadata;

use super::edit::{TextEdit, expected_len, validate_edits};
use super::slice::{Slice, SliceKind};

/// Ordered collection of the slices attached to one piece of text
///
/// Slices are kept sorted by ascending start, ties broken by ascending end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SliceStore {
    slices: Vec<Slice>,
}

impl SliceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a slice over `range` of `content`
    ///
    /// # Errors
    ///
    /// Errors with [`SliceError::Range`] if the range is inverted or outside the content, and
    /// with [`SliceError::CharBoundary`] if a bound splits a `char`.
    pub fn add(
        &mut self,
        content: &str,
        range: Range<usize>,
        kind: SliceKind,
        metadata: Metadata,
    ) -> Result<&Slice, SliceError> {
        check_range(content, &range)?;

        let slice = Slice::new(range, kind, metadata);
        let index = self.slices.partition_point(|existing| {
            (existing.start(), existing.end()) <= (slice.start(), slice.end())
        });
        self.slices.insert(index, slice);

        Ok(&self.slices[index])
    }

    /// Lazily yields slices matching `predicate`, in store order
    pub fn query<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a Slice> + 'a
    where
        P: Fn(&Slice) -> bool + 'a,
    {
        self.slices.iter().filter(move |slice| predicate(slice))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Slice> {
        self.slices.iter()
    }

    pub fn orphaned(&self) -> impl Iterator<Item = &Slice> {
        self.query(Slice::is_orphaned)
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn clear(&mut self) {
        self.slices.clear();
    }

    /// Removes slices for which `keep` returns false, returning the removed ones
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<Slice>
    where
        F: FnMut(&Slice) -> bool,
    {
        let (kept, removed) = std::mem::take(&mut self.slices)
            .into_iter()
            .partition(|slice| keep(slice));
        self.slices = kept;
        removed
    }

    /// Recomputes all slice boundaries after `edits` turned `old_content` into `new_content`
    ///
    /// Edits are in `old_content` coordinates, ordered and non-overlapping.
    ///
    /// * Boundaries at or after the end of an edit shift by the edit's change in length. Text
    ///   inserted exactly at a slice's start moves the slice, text inserted exactly at its end
    ///   extends it.
    /// * Slices fully inside an edited range are dropped and returned.
    /// * A boundary inside an edited range snaps to the edge of the replacement, so the slice
    ///   keeps only the text that survived.
    ///
    /// # Errors
    ///
    /// Errors if the edits are invalid for `old_content` or do not produce text of the length of
    /// `new_content`. The store is left untouched on error.
    pub fn remap(
        &mut self,
        old_content: &str,
        new_content: &str,
        edits: &[TextEdit],
    ) -> Result<Vec<Slice>, SliceError> {
        validate_edits(old_content, edits)?;

        let expected = expected_len(old_content, edits);
        if expected != new_content.len() {
            return Err(SliceError::EditMismatch {
                expected,
                actual: new_content.len(),
            });
        }

        let mut dropped = Vec::new();
        let mut remapped = Vec::with_capacity(self.slices.len());

        for slice in &self.slices {
            if is_swallowed(slice, edits) {
                tracing::debug!(
                    kind = slice.kind().tag(),
                    start = slice.start(),
                    end = slice.end(),
                    "Dropping slice inside an edited range"
                );
                dropped.push(slice.clone());
                continue;
            }

            let start = map_start(slice.start(), edits);
            let end = map_end(slice.end(), edits).max(start);

            let mut slice = slice.clone();
            slice.set_range(start..end);
            remapped.push(slice);
        }

        sort_slices(&mut remapped);
        self.slices = remapped;

        Ok(dropped)
    }

    /// Relocates every slice by searching `new_content` for the text it covered in `old_content`
    ///
    /// Used when a rewrite cannot be expressed as edits. Slices that cannot be found are kept and
    /// marked orphaned. Returns the number of newly orphaned slices.
    pub fn relocate(&mut self, old_content: &str, new_content: &str) -> usize {
        let mut orphaned = 0;

        for slice in &mut self.slices {
            if slice.is_orphaned() {
                slice.clamp_to(new_content);
                continue;
            }

            let Some(anchor) = slice.text(old_content) else {
                slice.orphan(new_content);
                orphaned += 1;
                continue;
            };

            if !slice.match_and_relocate(anchor, new_content) {
                orphaned += 1;
            }
        }

        sort_slices(&mut self.slices);
        orphaned
    }

    /// Shifts every slice by `offset`, used when placing text inside a larger text
    pub(crate) fn offset_by(&self, offset: usize) -> impl Iterator<Item = Slice> + '_ {
        self.slices
            .iter()
            .map(move |slice| slice.with_range(slice.start() + offset..slice.end() + offset))
    }

}

impl<'a> IntoIterator for &'a SliceStore {
    type Item = &'a Slice;
    type IntoIter = std::slice::Iter<'a, Slice>;

    fn into_iter(self) -> Self::IntoIter {
        self.slices.iter()
    }
}

impl IntoIterator for SliceStore {
    type Item = Slice;
    type IntoIter = std::vec::IntoIter<Slice>;

    fn into_iter(self) -> Self::IntoIter {
        self.slices.into_iter()
    }
}

impl FromIterator<Slice> for SliceStore {
    fn from_iter<T: IntoIterator<Item = Slice>>(iter: T) -> Self {
        let mut slices = iter.into_iter().collect::<Vec<_>>();
        sort_slices(&mut slices);
        SliceStore { slices }
    }
}

pub(crate) fn check_range(content: &str, range: &Range<usize>) -> Result<(), SliceError> {
    if range.start > range.end || range.end > content.len() {
        return Err(SliceError::Range {
            start: range.start,
            end: range.end,
            len: content.len(),
        });
    }
    for offset in [range.start, range.end] {
        if !content.is_char_boundary(offset) {
            return Err(SliceError::CharBoundary(offset));
        }
    }
    Ok(())
}

fn sort_slices(slices: &mut [Slice]) {
    slices.sort_by_key(|slice| (slice.start(), slice.end()));
}

// A slice is swallowed when an edit replaces all of it. Empty slices only disappear when they are
// strictly inside a replaced range.
fn is_swallowed(slice: &Slice, edits: &[TextEdit]) -> bool {
    let (start, end) = (slice.start(), slice.end());
    edits.iter().any(|edit| {
        if edit.is_insertion() {
            return false;
        }
        if slice.is_empty() {
            edit.start() < start && start < edit.end()
        } else {
            edit.start() <= start && end <= edit.end()
        }
    })
}

fn map_start(start: usize, edits: &[TextEdit]) -> usize {
    let mut shift = 0isize;
    for edit in edits {
        if edit.is_insertion() {
            if edit.start() <= start {
                shift += edit.delta();
                continue;
            }
            break;
        }
        if edit.end() <= start {
            shift += edit.delta();
            continue;
        }
        if edit.start() < start {
            // Start falls inside the edit, keep only what follows the replacement
            return edit.start().saturating_add_signed(shift) + edit.replacement().len();
        }
        break;
    }
    start.saturating_add_signed(shift)
}

fn map_end(end: usize, edits: &[TextEdit]) -> usize {
    let mut shift = 0isize;
    for edit in edits {
        if edit.is_insertion() {
            if edit.start() <= end {
                shift += edit.delta();
                continue;
            }
            break;
        }
        if edit.end() <= end {
            shift += edit.delta();
            continue;
        }
        if edit.start() < end {
            // End falls inside the edit, keep only what precedes the replacement
            return edit.start().saturating_add_signed(shift);
        }
        break;
    }
    end.saturating_add_signed(shift)
}
