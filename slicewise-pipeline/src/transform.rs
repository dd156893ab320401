//! Transforms rewrite messages and parameters before generation and undo it afterwards
//!
//! The pre stage of a [`Transform`] returns the messages and parameters to continue with and,
//! optionally, a [`PostTransform`] owning whatever state it needs to undo the change once the
//! conversation is finished.
use std::{future::Future, pin::Pin};

use async_trait::async_trait;
use dyn_clone::DynClone;
use slicewise_core::chat::{Conversation, GenerationParameters, Message};

use crate::errors::TransformError;

/// Output of a pre stage
pub struct Transformed {
    pub messages: Vec<Message>,
    pub params: GenerationParameters,
    pub post: Option<Box<dyn PostTransform>>,
}

impl Transformed {
    /// Continues with `messages` and `params` without a post stage
    pub fn new(messages: Vec<Message>, params: GenerationParameters) -> Self {
        Transformed {
            messages,
            params,
            post: None,
        }
    }

    #[must_use]
    pub fn with_post(mut self, post: impl PostTransform + 'static) -> Self {
        self.post = Some(Box::new(post));
        self
    }

    /// Same as [`Transformed::with_post`], for closures
    #[must_use]
    pub fn with_post_fn<F>(self, post: F) -> Self
    where
        F: for<'a> FnOnce(
                &'a mut Conversation,
            )
                -> Pin<Box<dyn Future<Output = Result<(), TransformError>> + Send + 'a>>
            + Send
            + Sync
            + 'static,
    {
        self.with_post(post)
    }
}

impl std::fmt::Debug for Transformed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformed")
            .field("messages", &self.messages)
            .field("params", &self.params)
            .field("post", &self.post.is_some())
            .finish()
    }
}

#[async_trait]
pub trait Transform: Send + Sync + DynClone {
    /// Runs before generation
    ///
    /// Must only depend on its inputs: running it twice on the same messages and parameters
    /// gives the same result.
    async fn pre(
        &self,
        messages: Vec<Message>,
        params: GenerationParameters,
    ) -> Result<Transformed, TransformError>;

    fn name(&self) -> &'static str {
        let name = std::any::type_name::<Self>();
        name.split("::").last().unwrap_or(name)
    }
}

dyn_clone::clone_trait_object!(Transform);

#[async_trait]
/// Use a closure as a transform
impl<F, Fut> Transform for F
where
    F: Fn(Vec<Message>, GenerationParameters) -> Fut + Send + Sync + Clone,
    Fut: Future<Output = Result<Transformed, TransformError>> + Send,
{
    async fn pre(
        &self,
        messages: Vec<Message>,
        params: GenerationParameters,
    ) -> Result<Transformed, TransformError> {
        self(messages, params).await
    }
}

/// Runs once after generation on the finished conversation
#[async_trait]
pub trait PostTransform: Send + Sync {
    async fn post(self: Box<Self>, conversation: &mut Conversation) -> Result<(), TransformError>;
}

#[async_trait]
/// Use a closure as a post transform
impl<F> PostTransform for F
where
    F: for<'a> FnOnce(
            &'a mut Conversation,
        )
            -> Pin<Box<dyn Future<Output = Result<(), TransformError>> + Send + 'a>>
        + Send
        + Sync,
{
    async fn post(self: Box<Self>, conversation: &mut Conversation) -> Result<(), TransformError> {
        (*self)(conversation).await
    }
}
