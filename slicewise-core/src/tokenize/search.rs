use std::ops::Range;

use crate::errors::TokenizeError;
use crate::traits::{TokenId, Tokenizer};

/// Finds the smallest window of `tokens`, starting at or after `search_start`, whose decoded text
/// contains `target`
///
/// Walks the end of the window forward until the target appears, then walks the start back from
/// the end to the last position that still contains it.
///
/// # Errors
///
/// Errors if decoding fails
pub fn find_in_tokens(
    target: &str,
    tokens: &[TokenId],
    tokenizer: &dyn Tokenizer,
    search_start: usize,
) -> Result<Option<Range<usize>>, TokenizeError> {
    if search_start > tokens.len() {
        return Ok(None);
    }
    if target.is_empty() {
        return Ok(Some(search_start..search_start));
    }

    let decode = |window: &[TokenId]| tokenizer.decode(window).map_err(TokenizeError::Decode);

    for end in search_start + 1..=tokens.len() {
        if !decode(&tokens[search_start..end])?.contains(target) {
            continue;
        }

        for start in (search_start..end).rev() {
            if decode(&tokens[start..end])?.contains(target) {
                return Ok(Some(start..end));
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CharTokenizer;

    #[test]
    fn test_finds_minimal_window() {
        let tokens = CharTokenizer.encode("abc abc").unwrap();

        assert_eq!(
            find_in_tokens("bc", &tokens, &CharTokenizer, 0).unwrap(),
            Some(1..3)
        );
        assert_eq!(
            find_in_tokens("bc", &tokens, &CharTokenizer, 3).unwrap(),
            Some(5..7)
        );
    }

    #[test]
    fn test_missing_target() {
        let tokens = CharTokenizer.encode("abc").unwrap();

        assert_eq!(
            find_in_tokens("x", &tokens, &CharTokenizer, 0).unwrap(),
            None
        );
        assert_eq!(
            find_in_tokens("a", &tokens, &CharTokenizer, 10).unwrap(),
            None
        );
    }
}
