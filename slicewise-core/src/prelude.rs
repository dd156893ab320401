pub use anyhow::{Context as _, Result};
pub use async_trait::async_trait;
pub use std::sync::Arc;
pub use tracing::Instrument;

pub use crate::chat::{Conversation, GenerationParameters, Message, Role};
pub use crate::metadata::{Metadata, MetadataValue};
pub use crate::slices::{Slice, SliceKind, TextEdit};
pub use crate::traits::{ChatFormatter, Generator, Tokenizer, Watcher};
