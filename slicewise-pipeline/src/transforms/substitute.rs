use async_trait::async_trait;
use slicewise_core::chat::{Conversation, GenerationParameters, Message};
use slicewise_core::errors::SliceError;

use crate::errors::TransformError;
use crate::transform::{PostTransform, Transform, Transformed};

/// Ordered pairs of original text and the placeholder that stands in for it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionMap {
    pairs: Vec<(String, String)>,
}

impl SubstitutionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, original: impl Into<String>, placeholder: impl Into<String>) {
        self.pairs.push((original.into(), placeholder.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .map(|(original, placeholder)| (original.as_str(), placeholder.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Replaces originals with placeholders, returning the number of replacements
    ///
    /// # Errors
    ///
    /// Errors if the message cannot be edited
    pub fn apply(&self, message: &mut Message) -> Result<usize, SliceError> {
        self.iter().try_fold(0, |count, (original, placeholder)| {
            Ok(count + message.replace_all(original, placeholder)?)
        })
    }

    /// Replaces placeholders with originals, returning the number of replacements
    ///
    /// # Errors
    ///
    /// Errors if the message cannot be edited
    pub fn revert(&self, message: &mut Message) -> Result<usize, SliceError> {
        self.iter().try_fold(0, |count, (original, placeholder)| {
            Ok(count + message.replace_all(placeholder, original)?)
        })
    }
}

impl<K, V> FromIterator<(K, V)> for SubstitutionMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = SubstitutionMap::new();
        for (original, placeholder) in iter {
            map.insert(original, placeholder);
        }
        map
    }
}

/// Hides text from the generator behind placeholders and restores it afterwards
///
/// Only substitutions that matched are undone, including in generated messages.
#[derive(Debug, Clone)]
pub struct Substitute {
    mapping: SubstitutionMap,
}

impl Substitute {
    pub fn new(mapping: impl Into<SubstitutionMap>) -> Self {
        Substitute {
            mapping: mapping.into(),
        }
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for SubstitutionMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K, V> From<Vec<(K, V)>> for SubstitutionMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: Vec<(K, V)>) -> Self {
        pairs.into_iter().collect()
    }
}

#[async_trait]
impl Transform for Substitute {
    async fn pre(
        &self,
        mut messages: Vec<Message>,
        params: GenerationParameters,
    ) -> Result<Transformed, TransformError> {
        if let Some(placeholder) = self.mapping.iter().map(|(_, p)| p).find(|placeholder| {
            messages
                .iter()
                .any(|message| message.content().contains(placeholder))
        }) {
            return Err(TransformError::invalid_content(format!(
                "placeholder {placeholder} already present in messages"
            )));
        }

        let mut used = SubstitutionMap::new();
        for (original, placeholder) in self.mapping.iter() {
            let mut count = 0;
            for message in &mut messages {
                count += message.replace_all(original, placeholder)?;
            }
            if count > 0 {
                tracing::debug!(placeholder, count, "Substituted");
                used.insert(original, placeholder);
            }
        }

        if used.is_empty() {
            return Ok(Transformed::new(messages, params));
        }
        Ok(Transformed::new(messages, params).with_post(RestoreSubstitutions { used }))
    }
}

struct RestoreSubstitutions {
    used: SubstitutionMap,
}

#[async_trait]
impl PostTransform for RestoreSubstitutions {
    async fn post(self: Box<Self>, conversation: &mut Conversation) -> Result<(), TransformError> {
        for message in conversation.all_mut() {
            self.used.revert(message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use slicewise_core::Metadata;
    use slicewise_core::chat::Generated;
    use slicewise_core::slices::SliceKind;

    #[tokio::test]
    async fn test_substitutes_and_restores() {
        let mut user = Message::user("Alice met Bob in Paris.");
        user.mark_slice("Paris", SliceKind::custom("place"), Metadata::default())
            .unwrap();
        let messages = vec![user];
        let transform = Substitute::new([
            ("Alice", "<PERSON_1>"),
            ("Bob", "<PERSON_2>"),
            ("Carol", "<PERSON_3>"),
        ]);

        let transformed = transform
            .pre(messages.clone(), GenerationParameters::default())
            .await
            .unwrap();

        let substituted = &transformed.messages[0];
        assert_eq!(
            substituted.content(),
            "<PERSON_1> met <PERSON_2> in Paris."
        );
        let place = substituted.slices().iter().next().unwrap();
        assert_eq!(place.text(substituted.content()), Some("Paris"));

        let mut conversation = Conversation::new(transformed.messages);
        conversation.push_generated(Generated::from(Message::assistant(
            "<PERSON_2> waved at <PERSON_1>.",
        )));
        transformed
            .post
            .unwrap()
            .post(&mut conversation)
            .await
            .unwrap();

        assert_eq!(conversation.messages(), messages.as_slice());
        assert_eq!(conversation.generated()[0].content(), "Bob waved at Alice.");
    }

    #[tokio::test]
    async fn test_placeholder_in_input_is_rejected() {
        let transform = Substitute::new([("Alice", "<P>")]);
        let result = transform
            .pre(
                vec![Message::user("<P> is here")],
                GenerationParameters::default(),
            )
            .await;

        assert!(matches!(result, Err(TransformError::InvalidContent(_))));
    }

    #[tokio::test]
    async fn test_nothing_to_substitute_has_no_post() {
        let transformed = Substitute::new([("Alice", "<P>")])
            .pre(vec![Message::user("Hi")], GenerationParameters::default())
            .await
            .unwrap();

        assert!(transformed.post.is_none());
    }
}
