//! Use tiktoken-rs to tokenize conversations for openai style models
//!
//! Decoded lengths are measured on the decoded bytes, so a prefix that ends inside a multi-byte
//! character still has a length.

use std::sync::Arc;

use anyhow::Result;
use slicewise_core::{TokenId, Tokenizer};
use tiktoken_rs::{CoreBPE, get_bpe_from_model, get_bpe_from_tokenizer, tokenizer::Tokenizer as Vocabulary};

/// A tiktoken based tokenizer for openai models. Can also be used for other models.
///
/// Special tokens in the text, like `<|endoftext|>`, are encoded as such.
///
/// # Example
///
/// ```no_run
/// # use slicewise_core::Tokenizer;
/// # use slicewise_integrations::tiktoken::TikToken;
/// let tokenizer = TikToken::try_from_model("gpt-4o").unwrap();
/// let tokens = tokenizer.encode("hello world").unwrap();
///
/// assert_eq!(tokenizer.decode(&tokens).unwrap(), "hello world");
/// ```
#[derive(Clone)]
pub struct TikToken {
    /// The tiktoken model to use
    bpe: Arc<CoreBPE>,
}

impl std::fmt::Debug for TikToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TikToken").finish()
    }
}

impl TikToken {
    /// Build a `TikToken` from an openai model name
    ///
    /// # Errors
    ///
    /// Errors if the tokenizer cannot be found from the model or it cannot be build
    pub fn try_from_model(model: impl AsRef<str>) -> Result<Self> {
        let bpe = get_bpe_from_model(model.as_ref())?;
        tracing::debug!(model = model.as_ref(), "Loaded tiktoken vocabulary for model");
        Ok(Self { bpe: Arc::new(bpe) })
    }

    /// Build a `TikToken` from a `tiktoken_rs::tokenizer::Tokenizer`
    ///
    /// # Errors
    ///
    /// Errors if the tokenizer cannot be build
    pub fn try_from_tokenizer(tokenizer: Vocabulary) -> Result<Self> {
        let bpe = get_bpe_from_tokenizer(tokenizer)?;
        tracing::debug!("Loaded tiktoken vocabulary");
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl Tokenizer for TikToken {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        Ok(self.bpe.encode_with_special_tokens(text))
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        self.bpe
            .decode(tokens.to_vec())
            .map_err(|err| anyhow::anyhow!("Failed to decode tokens: {err}"))
    }

    fn decoded_len(&self, tokens: &[TokenId]) -> Result<usize> {
        self.bpe
            .decode_bytes(tokens)
            .map(|bytes| bytes.len())
            .map_err(|err| anyhow::anyhow!("Failed to decode tokens: {err}"))
    }
}
