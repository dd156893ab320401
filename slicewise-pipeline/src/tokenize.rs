use slicewise_core::chat::Conversation;
use slicewise_core::tokenize::{TokenizedConversation, format_messages, tokenize_formatted};
use slicewise_core::{ChatFormatter, Tokenizer};

use crate::errors::PipelineError;
use crate::runner::{PreApplied, TransformRunner};

/// Tokenizes `conversation` as the generator saw it, with every pre stage of `transforms` applied
///
/// Post stages are dropped without running; nothing is generated.
///
/// # Errors
///
/// Errors if a pre stage fails, or if formatting or tokenizing fails
#[tracing::instrument(skip_all, fields(conversation = %conversation.uuid(), transforms = ?transforms.names()))]
pub async fn tokenize_with_transforms(
    conversation: &Conversation,
    transforms: &TransformRunner,
    formatter: &dyn ChatFormatter,
    tokenizer: &dyn Tokenizer,
) -> Result<TokenizedConversation, PipelineError> {
    let PreApplied {
        messages, params, ..
    } = transforms
        .apply_pre(
            conversation.all().cloned().collect(),
            conversation.params().clone(),
        )
        .await?;

    let formatted = format_messages(&messages, &params, formatter)
        .map_err(slicewise_core::errors::TokenizeError::from)?;
    Ok(tokenize_formatted(formatted, tokenizer)?)
}
