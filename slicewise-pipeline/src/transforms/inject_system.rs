use async_trait::async_trait;
use slicewise_core::chat::{
    Conversation, GenerationParameters, Message, inject_system_content, strip_system_content,
};

use crate::errors::TransformError;
use crate::transform::{PostTransform, Transform, Transformed};

/// Adds fixed content to the system prompt before generation and removes it afterwards
#[derive(Debug, Clone)]
pub struct InjectSystemContent {
    content: String,
}

impl InjectSystemContent {
    pub fn new(content: impl Into<String>) -> Self {
        InjectSystemContent {
            content: content.into(),
        }
    }
}

#[async_trait]
impl Transform for InjectSystemContent {
    async fn pre(
        &self,
        mut messages: Vec<Message>,
        params: GenerationParameters,
    ) -> Result<Transformed, TransformError> {
        let footprint = |messages: &[Message]| {
            (messages.len(), messages.first().map(|m| m.content().len()))
        };
        let before = footprint(&messages);
        inject_system_content(&mut messages, &self.content)?;

        // Content that was already there is not ours to strip
        if footprint(&messages) == before {
            return Ok(Transformed::new(messages, params));
        }

        Ok(Transformed::new(messages, params).with_post(StripSystemContent {
            content: self.content.clone(),
        }))
    }
}

struct StripSystemContent {
    content: String,
}

#[async_trait]
impl PostTransform for StripSystemContent {
    async fn post(self: Box<Self>, conversation: &mut Conversation) -> Result<(), TransformError> {
        if !strip_system_content(conversation.messages_mut(), &self.content)? {
            tracing::warn!("Injected system content not found, leaving system prompt as is");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use slicewise_core::chat::Generated;

    #[tokio::test]
    async fn test_injects_and_strips() {
        let messages = vec![Message::system("You are helpful."), Message::user("Hi")];
        let transform = InjectSystemContent::new("Answer in French.");

        let transformed = transform
            .pre(messages.clone(), GenerationParameters::default())
            .await
            .unwrap();
        assert_eq!(
            transformed.messages[0].content(),
            "You are helpful.\n\nAnswer in French."
        );

        let mut conversation = Conversation::new(transformed.messages);
        conversation.push_generated(Generated::from(Message::assistant("Bonjour")));
        transformed
            .post
            .unwrap()
            .post(&mut conversation)
            .await
            .unwrap();

        assert_eq!(conversation.messages(), messages.as_slice());
        assert_eq!(conversation.generated()[0].content(), "Bonjour");
    }

    #[tokio::test]
    async fn test_existing_content_is_left_alone() {
        let messages = vec![Message::system("Answer in French.")];
        let transformed = InjectSystemContent::new("Answer in French.")
            .pre(messages.clone(), GenerationParameters::default())
            .await
            .unwrap();

        assert_eq!(transformed.messages, messages);
        assert!(transformed.post.is_none());
    }
}
