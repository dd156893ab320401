use std::ops::Range;

use serde::Serialize;

use crate::chat::{Conversation, GenerationParameters, Message};
use crate::errors::{FormatError, TokenizeError};
use crate::slices::Slice;
use crate::traits::{ChatFormatter, TokenId, Tokenizer};

use super::render::{FormattedChat, RenderBuffer};

/// A rendered conversation, its tokens and its slices in token indices
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenizedConversation {
    pub text: String,
    pub tokens: Vec<TokenId>,
    /// Slices whose `start` and `end` are token indices
    pub slices: Vec<Slice>,
    /// Token range of each input message, `None` if the formatter skipped it
    pub message_ranges: Vec<Option<Range<usize>>>,
}

impl TokenizedConversation {
    /// The tokens covered by a projected slice
    pub fn tokens_for(&self, slice: &Slice) -> Option<&[TokenId]> {
        self.tokens.get(slice.range())
    }
}

/// Renders `messages` through `formatter`
///
/// # Errors
///
/// Errors if the formatter fails
pub fn format_messages<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
    params: &GenerationParameters,
    formatter: &dyn ChatFormatter,
) -> Result<FormattedChat, FormatError> {
    let mut buffer = RenderBuffer::new(messages);
    formatter.format(&mut buffer, params)?;
    Ok(buffer.finish())
}

/// Renders and tokenizes every message of `conversation`, generated ones included
///
/// # Errors
///
/// Errors if formatting, encoding or decoding fails
#[tracing::instrument(skip_all, fields(conversation = %conversation.uuid()))]
pub fn tokenize(
    conversation: &Conversation,
    formatter: &dyn ChatFormatter,
    tokenizer: &dyn Tokenizer,
) -> Result<TokenizedConversation, TokenizeError> {
    let formatted = format_messages(conversation.all(), conversation.params(), formatter)?;
    tokenize_formatted(formatted, tokenizer)
}

/// Tokenizes an already rendered conversation
///
/// The text is encoded once as a whole. Slices are projected onto the smallest token range
/// whose decoded text covers them, so a token straddling a slice boundary is included.
///
/// # Errors
///
/// Errors if encoding or decoding fails
pub fn tokenize_formatted(
    formatted: FormattedChat,
    tokenizer: &dyn Tokenizer,
) -> Result<TokenizedConversation, TokenizeError> {
    let tokens = tokenizer
        .encode(&formatted.text)
        .map_err(TokenizeError::Encode)?;

    let decoded = tokenizer.decode(&tokens).map_err(TokenizeError::Decode)?;
    if decoded != formatted.text {
        tracing::warn!(
            text_len = formatted.text.len(),
            decoded_len = decoded.len(),
            "Tokenizer does not round trip, token ranges may be off"
        );
    }

    let mut prefixes = PrefixLengths::new(tokenizer, &tokens);

    let slices = formatted
        .slices
        .iter()
        .map(|slice| Ok(slice.with_range(prefixes.project(&slice.range())?)))
        .collect::<Result<Vec<_>, TokenizeError>>()?;

    let message_ranges = formatted
        .message_ranges
        .iter()
        .map(|range| range.as_ref().map(|range| prefixes.project(range)).transpose())
        .collect::<Result<Vec<_>, TokenizeError>>()?;

    tracing::debug!(
        tokens = tokens.len(),
        slices = slices.len(),
        "Tokenized conversation"
    );

    Ok(TokenizedConversation {
        text: formatted.text,
        tokens,
        slices,
        message_ranges,
    })
}

/// Decoded byte length of every token prefix, computed on demand
struct PrefixLengths<'a> {
    tokenizer: &'a dyn Tokenizer,
    tokens: &'a [TokenId],
    cache: Vec<Option<usize>>,
}

impl<'a> PrefixLengths<'a> {
    fn new(tokenizer: &'a dyn Tokenizer, tokens: &'a [TokenId]) -> Self {
        PrefixLengths {
            tokenizer,
            tokens,
            cache: vec![None; tokens.len() + 1],
        }
    }

    fn at(&mut self, index: usize) -> Result<usize, TokenizeError> {
        if index == 0 {
            return Ok(0);
        }
        if let Some(len) = self.cache[index] {
            return Ok(len);
        }
        let len = self
            .tokenizer
            .decoded_len(&self.tokens[..index])
            .map_err(TokenizeError::Decode)?;
        self.cache[index] = Some(len);
        Ok(len)
    }

    /// Maps a byte range of the text to a token range, rounding outward
    ///
    /// Starts at the last token boundary at or before `range.start` and ends at the first
    /// boundary at or after `range.end`.
    fn project(&mut self, range: &Range<usize>) -> Result<Range<usize>, TokenizeError> {
        let count = self.tokens.len();

        let (mut low, mut high) = (0, count + 1);
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            if self.at(mid)? <= range.start {
                low = mid;
            } else {
                high = mid;
            }
        }
        let start = low;

        let (mut low, mut high) = (start, count);
        while low < high {
            let mid = low + (high - low) / 2;
            if self.at(mid)? >= range.end {
                high = mid;
            } else {
                low = mid + 1;
            }
        }

        Ok(start..low)
    }
}
