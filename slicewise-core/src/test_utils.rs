#![allow(clippy::missing_panics_doc)]
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use pretty_assertions::assert_eq;

use crate::chat::{GenerationParameters, Generated, Message};
use crate::errors::GenerationError;
use crate::traits::{Generator, TokenId, Tokenizer};

type Expectation = (Option<Vec<Message>>, Result<Generated>);
type Expectations = Arc<Mutex<Vec<Expectation>>>;

/// Generator that replays scripted responses in order
///
/// Panics when dropped with expectations left, or when called without one.
#[derive(Clone)]
pub struct MockGenerator {
    expectations: Expectations,
    received_expectations: Expectations,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            received_expectations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Expects a generation for exactly `messages`
    pub fn expect_generate(&self, messages: Vec<Message>, response: Result<Generated>) {
        let mut mutex = self.expectations.lock().unwrap();

        mutex.insert(0, (Some(messages), response));
    }

    /// Expects a generation for any messages
    pub fn expect_any(&self, response: Result<Generated>) {
        let mut mutex = self.expectations.lock().unwrap();

        mutex.insert(0, (None, response));
    }

    /// Messages of every generation received so far, in order
    pub fn received(&self) -> Vec<Option<Vec<Message>>> {
        self.received_expectations
            .lock()
            .unwrap()
            .iter()
            .map(|(messages, _)| messages.clone())
            .collect()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(
        &self,
        messages: &[Message],
        _params: &GenerationParameters,
    ) -> Result<Generated, GenerationError> {
        let (expected_messages, response) =
            self.expectations.lock().unwrap().pop().unwrap_or_else(|| {
                panic!(
                    "Received generation, but no expectations are set\n {}",
                    pretty_messages(messages)
                )
            });

        if let Some(expected) = &expected_messages {
            assert_eq!(
                expected.as_slice(),
                messages,
                "Unexpected messages {}",
                pretty_messages(messages)
            );
        }

        let received = Some(messages.to_vec());
        match response {
            Ok(generated) => {
                self.received_expectations
                    .lock()
                    .unwrap()
                    .push((received, Ok(generated.clone())));

                Ok(generated)
            }
            Err(err) => {
                self.received_expectations
                    .lock()
                    .unwrap()
                    .push((received, Err(anyhow::anyhow!(err.to_string()))));

                Err(err.into())
            }
        }
    }
}

impl Drop for MockGenerator {
    fn drop(&mut self) {
        // We are still cloned, so do not check assertions yet
        if Arc::strong_count(&self.received_expectations) > 1 {
            return;
        }
        let Ok(expectations) = self.expectations.lock() else {
            return;
        };
        let Ok(received) = self.received_expectations.lock() else {
            return;
        };

        if expectations.is_empty() {
            let num_received = received.len();
            tracing::debug!("[MockGenerator] All {num_received} expectations were met");
        } else {
            let received = received
                .iter()
                .map(pretty_expectation)
                .collect::<Vec<_>>()
                .join("---\n");

            let pending = expectations
                .iter()
                .map(pretty_expectation)
                .collect::<Vec<_>>()
                .join("---\n");

            panic!(
                "[MockGenerator] Not all expectations were met\n received:\n{received}\n\npending:\n{pending}"
            );
        }
    }
}

fn pretty_expectation(expectation: &Expectation) -> String {
    let mut output = String::new();
    match &expectation.0 {
        Some(messages) => output += &pretty_messages(messages),
        None => output += "Any messages\n",
    }
    match &expectation.1 {
        Ok(generated) => {
            output += &format!(
                "Response ({}): {}\n",
                generated.stop_reason, generated.message
            );
        }
        Err(err) => output += &format!("Error: {err}\n"),
    }
    output
}

fn pretty_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| format!(" - {message}\n"))
        .collect()
}

/// One token per `char`, the token id being its code point
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        Ok(text.chars().map(u32::from).collect())
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        tokens.iter().map(|token| char_for(*token)).collect()
    }

    fn decoded_len(&self, tokens: &[TokenId]) -> Result<usize> {
        tokens
            .iter()
            .map(|token| char_for(*token).map(char::len_utf8))
            .sum()
    }
}

fn char_for(token: TokenId) -> Result<char> {
    char::from_u32(token).with_context(|| format!("{token} is not a char"))
}
