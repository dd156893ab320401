//! Renders conversations to text and maps slices onto tokens
//!
//! A [`ChatFormatter`](crate::ChatFormatter) writes the conversation into a [`RenderBuffer`],
//! which records the rendered range of every message and carries message slices over into
//! rendered-text offsets. The rendered text is then encoded once and every slice is projected
//! onto token indices.
mod formatters;
mod mapper;
mod render;
mod search;

pub use formatters::{Llama3Formatter, PlainFormatter};
pub use mapper::{TokenizedConversation, format_messages, tokenize, tokenize_formatted};
pub use render::{FormattedChat, RenderBuffer};
pub use search::find_in_tokens;
