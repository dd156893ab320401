//! Runs transforms around a single generation
//!
//! Pre stages run in registration order, each on the output of the previous one. After
//! generation the collected post stages run in reverse order against the finished
//! conversation, like unwinding a stack.
use slicewise_core::Generator;
use slicewise_core::chat::{Conversation, GenerationParameters, Message};

use crate::errors::PipelineError;
use crate::transform::{PostTransform, Transform, Transformed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumIs)]
#[strum(serialize_all = "snake_case")]
pub enum AttemptState {
    Pending,
    PreApplied,
    Generating,
    PostApplied,
    Done,
}

/// Messages and parameters after every pre stage, with the post stages still owed
pub struct PreApplied {
    pub messages: Vec<Message>,
    pub params: GenerationParameters,
    posts: Vec<(&'static str, Box<dyn PostTransform>)>,
}

impl PreApplied {
    /// Number of post stages that will run when unwinding
    pub fn pending_posts(&self) -> usize {
        self.posts.len()
    }
}

impl std::fmt::Debug for PreApplied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreApplied")
            .field("messages", &self.messages)
            .field("params", &self.params)
            .field(
                "posts",
                &self.posts.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct TransformRunner {
    transforms: Vec<Box<dyn Transform>>,
}

impl std::fmt::Debug for TransformRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRunner")
            .field("transforms", &self.names())
            .finish()
    }
}

impl TransformRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transform: impl Transform + 'static) {
        self.transforms.push(Box::new(transform));
    }

    #[must_use]
    pub fn with(mut self, transform: impl Transform + 'static) -> Self {
        self.push(transform);
        self
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    /// Runs every pre stage in order
    ///
    /// If a stage fails, post stages collected so far are dropped without running.
    ///
    /// # Errors
    ///
    /// Errors with the first failing pre stage
    #[tracing::instrument(skip_all, fields(transforms = ?self.names()))]
    pub async fn apply_pre(
        &self,
        messages: Vec<Message>,
        params: GenerationParameters,
    ) -> Result<PreApplied, PipelineError> {
        let mut messages = messages;
        let mut params = params;
        let mut posts = Vec::new();

        for transform in &self.transforms {
            let name = transform.name();
            tracing::debug!(transform = name, "Applying pre transform");

            let Transformed {
                messages: next_messages,
                params: next_params,
                post,
            } = transform.pre(messages, params).await.map_err(|source| {
                PipelineError::PreTransform {
                    name: name.to_string(),
                    source,
                }
            })?;

            messages = next_messages;
            params = next_params;
            if let Some(post) = post {
                posts.push((name, post));
            }
        }

        Ok(PreApplied {
            messages,
            params,
            posts,
        })
    }

    /// Runs one generation attempt with every transform applied
    ///
    /// # Errors
    ///
    /// Errors if a pre stage or the generation fails, or with the first failing post stage once
    /// all post stages have run
    #[tracing::instrument(skip_all, name = "runner.run")]
    pub async fn run(
        &self,
        messages: Vec<Message>,
        params: GenerationParameters,
        generator: &dyn Generator,
    ) -> Result<Conversation, PipelineError> {
        let mut state = AttemptState::Pending;

        let PreApplied {
            messages,
            params,
            posts,
        } = self.apply_pre(messages, params).await?;
        advance(&mut state, AttemptState::PreApplied);

        advance(&mut state, AttemptState::Generating);
        let generated = generator.generate(&messages, &params).await?;

        let mut conversation = Conversation::new(messages).with_params(params);
        conversation.push_generated(generated);

        unwind(posts, &mut conversation).await?;
        advance(&mut state, AttemptState::PostApplied);

        advance(&mut state, AttemptState::Done);
        Ok(conversation)
    }
}

fn advance(state: &mut AttemptState, next: AttemptState) {
    tracing::debug!(from = %state, to = %next, "Attempt state changed");
    *state = next;
}

/// Runs post stages last to first. A failing stage does not stop the others; the first error is
/// returned once all have run.
async fn unwind(
    posts: Vec<(&'static str, Box<dyn PostTransform>)>,
    conversation: &mut Conversation,
) -> Result<(), PipelineError> {
    let mut first_error = None;

    for (name, post) in posts.into_iter().rev() {
        tracing::debug!(transform = name, "Applying post transform");

        if let Err(source) = post.post(conversation).await {
            tracing::warn!(transform = name, error = %source, "Post transform failed");
            first_error.get_or_insert(PipelineError::PostTransform {
                name: name.to_string(),
                source,
            });
        }
    }

    first_error.map_or(Ok(()), Err)
}
