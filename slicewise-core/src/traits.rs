//! Collaborators the core relies on but does not implement
//!
//! A [`Generator`] produces the next message, a [`ChatFormatter`] renders messages to text, a
//! [`Tokenizer`] turns that text into tokens and a [`Watcher`] receives finished conversations.
use std::fmt::Debug;
use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use dyn_clone::DynClone;

use crate::chat::{Conversation, GenerationParameters, Generated, Message};
use crate::errors::{FormatError, GenerationError};
use crate::tokenize::RenderBuffer;

/// All traits are easily mockable under tests
#[cfg(feature = "test-utils")]
#[doc(hidden)]
use mockall::automock;

pub type TokenId = u32;

/// Generates the next message of a conversation, usually by calling a model
#[async_trait]
pub trait Generator: Send + Sync + DynClone {
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParameters,
    ) -> Result<Generated, GenerationError>;
}

#[async_trait]
impl Generator for Box<dyn Generator> {
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParameters,
    ) -> Result<Generated, GenerationError> {
        (**self).generate(messages, params).await
    }
}

#[async_trait]
/// Use a closure as a generator
impl<F, Fut> Generator for F
where
    F: Fn(Vec<Message>, GenerationParameters) -> Fut + Send + Sync + Clone,
    Fut: Future<Output = Result<Generated, GenerationError>> + Send,
{
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParameters,
    ) -> Result<Generated, GenerationError> {
        self(messages.to_vec(), params.clone()).await
    }
}

dyn_clone::clone_trait_object!(Generator);

/// Renders messages into a single text
///
/// Formatters write into a [`RenderBuffer`], which records where every message ends up. They
/// must render messages in order and at most once.
pub trait ChatFormatter: Send + Sync {
    /// # Errors
    ///
    /// Errors if the messages cannot be rendered
    fn format(
        &self,
        buffer: &mut RenderBuffer<'_>,
        params: &GenerationParameters,
    ) -> Result<(), FormatError>;
}

/// Use a closure as a formatter
impl<F> ChatFormatter for F
where
    F: Fn(&mut RenderBuffer<'_>, &GenerationParameters) -> Result<(), FormatError> + Send + Sync,
{
    fn format(
        &self,
        buffer: &mut RenderBuffer<'_>,
        params: &GenerationParameters,
    ) -> Result<(), FormatError> {
        self(buffer, params)
    }
}

/// Converts text to tokens and back
///
/// Implementations are expected to round trip: decoding the encoding of a text yields the text.
#[cfg_attr(feature = "test-utils", automock)]
pub trait Tokenizer: Send + Sync + Debug {
    /// # Errors
    ///
    /// Errors if the text cannot be encoded
    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;

    /// # Errors
    ///
    /// Errors if the tokens cannot be decoded
    fn decode(&self, tokens: &[TokenId]) -> Result<String>;

    /// Byte length of the text `tokens` decode to
    ///
    /// Must not decrease as tokens are added. The default decodes and measures.
    ///
    /// # Errors
    ///
    /// Errors if the tokens cannot be decoded
    fn decoded_len(&self, tokens: &[TokenId]) -> Result<usize> {
        self.decode(tokens).map(|text| text.len())
    }
}

/// Receives finished conversations, i.e. to log or store them
#[cfg_attr(feature = "test-utils", automock)]
#[async_trait]
pub trait Watcher: Send + Sync + Debug {
    async fn watch(&self, conversations: &[Conversation]) -> Result<()>;
}
