use std::ops::Range;

use serde::Serialize;

use crate::chat::Message;
use crate::errors::FormatError;
use crate::metadata::Metadata;
use crate::slices::{Slice, SliceKind};

/// Append-only text buffer that formatters render a conversation into
///
/// Messages are pushed by index, in order and at most once. Every pushed message gets a slice
/// covering its rendered content and its own slices are carried over at their rendered offsets.
#[derive(Debug)]
pub struct RenderBuffer<'a> {
    messages: Vec<&'a Message>,
    text: String,
    slices: Vec<Slice>,
    message_ranges: Vec<Option<Range<usize>>>,
    previous: Option<usize>,
}

/// A rendered conversation with slices in rendered-text offsets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedChat {
    pub text: String,
    /// Sorted by start, then by end
    pub slices: Vec<Slice>,
    /// Where each input message was rendered, `None` if the formatter skipped it
    pub message_ranges: Vec<Option<Range<usize>>>,
}

impl<'a> RenderBuffer<'a> {
    pub fn new(messages: impl IntoIterator<Item = &'a Message>) -> Self {
        let messages = messages.into_iter().collect::<Vec<_>>();
        let message_ranges = vec![None; messages.len()];
        RenderBuffer {
            messages,
            text: String::new(),
            slices: Vec::new(),
            message_ranges,
            previous: None,
        }
    }

    pub fn messages(&self) -> &[&'a Message] {
        &self.messages
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Appends template text that belongs to no message
    pub fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Appends `text` and annotates it with a slice
    pub fn push_slice(
        &mut self,
        text: &str,
        kind: SliceKind,
        metadata: impl Into<Metadata>,
    ) -> Range<usize> {
        let start = self.text.len();
        self.text.push_str(text);
        let range = start..self.text.len();
        self.slices
            .push(Slice::new(range.clone(), kind, metadata.into()));
        range
    }

    /// Appends the content of message `index` as a `message` slice
    ///
    /// # Errors
    ///
    /// Errors if the message does not exist or is pushed out of order
    pub fn push_message(&mut self, index: usize) -> Result<Range<usize>, FormatError> {
        let message = self.lookup(index)?;
        let role = message.role();
        let metadata = Metadata::from([("role", role.to_string())]).with("message_index", index);
        self.push_message_as(index, SliceKind::message(role), metadata)
    }

    /// Appends the content of message `index`, annotated with `kind` instead of a message slice
    ///
    /// # Errors
    ///
    /// Errors if the message does not exist or is pushed out of order
    pub fn push_message_as(
        &mut self,
        index: usize,
        kind: SliceKind,
        metadata: impl Into<Metadata>,
    ) -> Result<Range<usize>, FormatError> {
        let message = self.lookup(index)?;
        if let Some(previous) = self.previous.filter(|previous| index <= *previous) {
            return Err(FormatError::OutOfOrder { index, previous });
        }
        self.previous = Some(index);

        let range = self.push_slice(message.content(), kind, metadata);
        self.slices
            .extend(message.slices().offset_by(range.start));
        self.message_ranges[index] = Some(range.clone());

        Ok(range)
    }

    pub fn finish(self) -> FormattedChat {
        let mut slices = self.slices;
        slices.sort_by_key(|slice| (slice.start(), slice.end()));

        FormattedChat {
            text: self.text,
            slices,
            message_ranges: self.message_ranges,
        }
    }

    fn lookup(&self, index: usize) -> Result<&'a Message, FormatError> {
        self.messages
            .get(index)
            .copied()
            .ok_or(FormatError::UnknownMessage {
                index,
                len: self.messages.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Role;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_records_message_ranges_and_translates_slices() {
        let mut user = Message::user("Hello world");
        user.mark_slice("world", SliceKind::custom("subject"), Metadata::default())
            .unwrap();
        let messages = vec![Message::system("Be brief."), user];

        let mut buffer = RenderBuffer::new(&messages);
        buffer.push_text("<s>");
        buffer.push_message(0).unwrap();
        buffer.push_text("\n>");
        buffer.push_message(1).unwrap();
        let formatted = buffer.finish();

        assert_eq!(formatted.text, "<s>Be brief.\n>Hello world");
        assert_eq!(formatted.message_ranges, vec![Some(3..12), Some(14..25)]);

        let kinds = formatted
            .slices
            .iter()
            .map(|s| (s.kind().tag().to_string(), s.range()))
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                ("message".to_string(), 3..12),
                ("message".to_string(), 14..25),
                ("subject".to_string(), 20..25),
            ]
        );
        assert_eq!(
            formatted.slices[1].kind(),
            &SliceKind::message(Role::User)
        );
        assert_eq!(
            formatted.slices[1].metadata().get("message_index").unwrap().as_i64(),
            Some(1)
        );
        for slice in &formatted.slices {
            assert!(slice.text(&formatted.text).is_some());
        }
    }

    #[test]
    fn test_rejects_out_of_order_and_duplicates() {
        let messages = vec![Message::user("a"), Message::user("b")];
        let mut buffer = RenderBuffer::new(&messages);

        buffer.push_message(1).unwrap();
        assert!(matches!(
            buffer.push_message(0),
            Err(FormatError::OutOfOrder {
                index: 0,
                previous: 1
            })
        ));
        assert!(matches!(
            buffer.push_message(1),
            Err(FormatError::OutOfOrder { .. })
        ));
        assert!(matches!(
            buffer.push_message(5),
            Err(FormatError::UnknownMessage { index: 5, len: 2 })
        ));
    }

    #[test]
    fn test_skipped_messages_have_no_range() {
        let messages = vec![Message::user("a"), Message::user("b")];
        let mut buffer = RenderBuffer::new(&messages);
        buffer.push_message(1).unwrap();

        assert_eq!(buffer.finish().message_ranges, vec![None, Some(0..1)]);
    }
}
