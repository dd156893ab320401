#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Messages whose annotated ranges survive rewrites and tokenization
//!
//! Every [`chat::Message`] carries a [`slices::SliceStore`] of annotated byte ranges. Content is
//! only changed through edits or [`rewrite`], which keep the slices pointing at the same text.
//! [`tokenize`] renders a conversation and projects the slices onto token indices.

pub mod chat;
pub mod errors;
mod metadata;
pub mod rewrite;
pub mod slices;
pub mod tokenize;
mod traits;

/// All traits are available from the root
pub use crate::traits::*;

pub use crate::metadata::{Metadata, MetadataValue};

/// Re-export of commonly used dependencies.
pub mod prelude;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
