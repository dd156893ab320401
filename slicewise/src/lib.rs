// show feature flags in the generated documentation
// https://doc.rust-lang.org/rustdoc/unstable-features.html#extensions-to-the-doc-attribute
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! # Slicewise
//!
//! Slicewise keeps track of what every part of a chat conversation means while the conversation
//! is rewritten, generated on and tokenized.
//!
//! Messages carry slices: annotated byte ranges of their content, like "this is a tool call" or
//! "this sentence came from retrieval". Transforms rewrite messages before generation and undo
//! their change afterwards; the slices follow every edit. Finally a conversation is rendered with
//! a chat template and tokenized once, and every slice is projected onto the tokens that cover
//! it, which is what training pipelines need for masking and weighting.
//!
//! ## Example
//!
//! ```no_run
//! # use slicewise::chat::Message;
//! # use slicewise::pipeline::{ChatPipeline, transforms::InjectSystemContent};
//! # use slicewise::tokenize::{Llama3Formatter, tokenize};
//! # use slicewise::traits::{Generator, Tokenizer};
//! # async fn run(generator: impl Generator + 'static, tokenizer: impl Tokenizer) -> anyhow::Result<()> {
//! let conversation = ChatPipeline::new(generator, vec![Message::user("What is a slice?")])
//!     .transform(InjectSystemContent::new("Answer in one sentence."))
//!     .run()
//!     .await?;
//!
//! let tokenized = tokenize(&conversation, &Llama3Formatter::default(), &tokenizer)?;
//! for slice in &tokenized.slices {
//!     println!("{}: {:?}", slice.kind().tag(), tokenized.tokens_for(slice));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
#![doc = document_features::document_features!()]

#[doc(inline)]
pub use slicewise_core::{Metadata, MetadataValue, chat, errors, prelude, rewrite, slices, tokenize};

/// Collaborator traits: generation, chat templates, tokenizers and watchers
pub mod traits {
    #[doc(inline)]
    pub use slicewise_core::{ChatFormatter, Generator, TokenId, Tokenizer, Watcher};
}

/// Transforms around generation and the chat pipeline
pub mod pipeline {
    #[doc(inline)]
    pub use slicewise_pipeline::*;
}

/// Integrations with tokenizer libraries
pub mod integrations {
    #[doc(inline)]
    pub use slicewise_integrations::*;
}

#[doc(hidden)]
#[cfg(feature = "test-utils")]
pub use slicewise_core::test_utils;
