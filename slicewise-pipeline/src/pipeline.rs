//! A chat pipeline runs transforms around generations and hands the results to watchers
//!
//! Each attempt goes through the [`TransformRunner`]. Once it completes, the `then` callbacks can
//! ask for a follow-up attempt on the finished conversation, up to the configured maximum depth.
//! Batches of attempts run concurrently; their results keep the order of the inputs.
use std::{future::Future, pin::Pin, sync::Arc};

use derive_builder::Builder;
use dyn_clone::DynClone;
use futures_util::{StreamExt as _, stream};
use slicewise_core::chat::{Conversation, GenerationParameters, Message};
use slicewise_core::{Generator, Watcher};
use tracing::Instrument as _;

use crate::errors::PipelineError;
use crate::runner::TransformRunner;
use crate::transform::Transform;

/// Follow-up attempts allowed on top of the first one
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// What happens to attempts in a batch that fail with a generation error or exceed the maximum
/// depth
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIs,
)]
#[strum(serialize_all = "lowercase")]
pub enum FailMode {
    /// Fail the whole batch
    #[default]
    Raise,
    /// Leave the attempt out of the results
    Skip,
    /// Keep the attempt in the results, flagged as failed
    Include,
}

#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(error = "anyhow::Error"))]
pub struct PipelineConfig {
    #[builder(default = "DEFAULT_MAX_DEPTH")]
    max_depth: usize,

    /// Attempts in flight at once. Defaults to the number of cpus.
    #[builder(default = "num_cpus::get()")]
    concurrency: usize,

    #[builder(default)]
    fail_mode: FailMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            max_depth: DEFAULT_MAX_DEPTH,
            concurrency: num_cpus::get(),
            fail_mode: FailMode::default(),
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }
}

/// Returned by `then` callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum ThenAction {
    /// Generate again on the finished conversation with these messages appended
    Continue(Vec<Message>),
    Done,
}

pub trait ThenFn:
    for<'a> Fn(
        &'a Conversation,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ThenAction>> + Send + 'a>>
    + Send
    + Sync
    + DynClone
{
}

dyn_clone::clone_trait_object!(ThenFn);

impl<F> ThenFn for F where
    F: for<'a> Fn(
            &'a Conversation,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ThenAction>> + Send + 'a>>
        + Send
        + Sync
        + DynClone
{
}

#[derive(Clone)]
pub struct ChatPipeline {
    generator: Arc<dyn Generator>,
    messages: Vec<Message>,
    params: GenerationParameters,
    runner: TransformRunner,
    callbacks: Vec<Box<dyn ThenFn>>,
    watchers: Vec<Arc<dyn Watcher>>,
    config: PipelineConfig,
}

impl std::fmt::Debug for ChatPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatPipeline")
            .field("messages", &self.messages)
            .field("params", &self.params)
            .field("runner", &self.runner)
            .field("callbacks", &self.callbacks.len())
            .field("watchers", &self.watchers)
            .field("config", &self.config)
            .finish()
    }
}

impl ChatPipeline {
    /// Creates a pipeline generating with `generator`, starting from `messages`
    pub fn new(generator: impl Generator + 'static, messages: impl Into<Vec<Message>>) -> Self {
        ChatPipeline {
            generator: Arc::new(generator),
            messages: messages.into(),
            params: GenerationParameters::default(),
            runner: TransformRunner::default(),
            callbacks: Vec::new(),
            watchers: Vec::new(),
            config: PipelineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: GenerationParameters) -> Self {
        self.params = params;
        self
    }

    /// Layers `overloads` over the current parameters
    #[must_use]
    pub fn with_overloads(mut self, overloads: &GenerationParameters) -> Self {
        self.params = self.params.merge(overloads);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.config.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_fail_mode(mut self, fail_mode: FailMode) -> Self {
        self.config.fail_mode = fail_mode;
        self
    }

    /// Adds a transform. Pre stages run in the order transforms are added.
    ///
    /// Closures can also be provided as transforms.
    #[must_use]
    pub fn transform(mut self, transform: impl Transform + 'static) -> Self {
        self.runner.push(transform);
        self
    }

    /// Adds a callback that runs on every finished attempt
    ///
    /// Callbacks run in the order they were added. The first one returning
    /// [`ThenAction::Continue`] starts a follow-up attempt; the rest are skipped.
    #[must_use]
    pub fn then(mut self, callback: impl ThenFn + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    /// Adds a watcher that receives the conversations of every run
    #[must_use]
    pub fn watch(mut self, watcher: impl Watcher + 'static) -> Self {
        self.watchers.push(Arc::new(watcher));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn runner(&self) -> &TransformRunner {
        &self.runner
    }

    /// Runs a single attempt
    ///
    /// The fail mode only applies to batches; any error is returned.
    ///
    /// # Errors
    ///
    /// Errors if the attempt or a watcher fails
    #[tracing::instrument(skip_all, name = "pipeline.run")]
    pub async fn run(&self) -> Result<Conversation, PipelineError> {
        let conversation = self
            .attempt(self.messages.clone(), self.params.clone())
            .await?;
        self.notify(std::slice::from_ref(&conversation)).await?;
        Ok(conversation)
    }

    /// Runs `n` independent attempts on the same messages
    ///
    /// # Errors
    ///
    /// See [`ChatPipeline::run_batch`]
    #[tracing::instrument(skip_all, name = "pipeline.run_many", fields(n = n))]
    pub async fn run_many(&self, n: usize) -> Result<Vec<Conversation>, PipelineError> {
        let inputs = std::iter::repeat_n(self.messages.clone(), n).collect();
        self.execute(inputs).await
    }

    /// Runs one attempt per entry, each on the pipeline's messages followed by the entry
    ///
    /// Failed attempts are handled according to the [`FailMode`].
    ///
    /// # Errors
    ///
    /// Errors if an attempt fails and the failure is not caught by the fail mode, or if a watcher
    /// fails
    #[tracing::instrument(skip_all, name = "pipeline.run_batch", fields(size = batch.len()))]
    pub async fn run_batch(
        &self,
        batch: Vec<Vec<Message>>,
    ) -> Result<Vec<Conversation>, PipelineError> {
        let inputs = batch
            .into_iter()
            .map(|entry| {
                let mut messages = self.messages.clone();
                messages.extend(entry);
                messages
            })
            .collect();
        self.execute(inputs).await
    }

    async fn execute(&self, inputs: Vec<Vec<Message>>) -> Result<Vec<Conversation>, PipelineError> {
        let concurrency = self.config.concurrency.max(1);
        let fail_mode = self.config.fail_mode;
        tracing::debug!(attempts = inputs.len(), concurrency, %fail_mode, "Running batch");

        let mut attempts = std::pin::pin!(
            stream::iter(inputs.into_iter().enumerate())
                .map(|(index, messages)| {
                    let span = tracing::trace_span!("attempt", index);
                    async move {
                        let result = self.attempt(messages.clone(), self.params.clone()).await;
                        (messages, result)
                    }
                    .instrument(span.or_current())
                })
                .buffered(concurrency)
        );

        let mut conversations = Vec::new();
        while let Some((messages, result)) = attempts.next().await {
            match result {
                Ok(conversation) => conversations.push(conversation),
                Err(err) if fail_mode.is_raise() || !err.is_catchable() => return Err(err),
                Err(err) => {
                    tracing::warn!(error = %err, %fail_mode, "Attempt failed");
                    if fail_mode.is_include() {
                        let mut failed =
                            Conversation::new(messages).with_params(self.params.clone());
                        failed.set_failure(err.to_failure());
                        conversations.push(failed);
                    }
                }
            }
        }

        self.notify(&conversations).await?;
        Ok(conversations)
    }

    /// Runs an attempt and the follow-ups its callbacks ask for
    async fn attempt(
        &self,
        messages: Vec<Message>,
        params: GenerationParameters,
    ) -> Result<Conversation, PipelineError> {
        let mut messages = messages;
        let mut params = params;
        let mut depth = 0;

        loop {
            if depth > self.config.max_depth {
                tracing::warn!(depth, max_depth = self.config.max_depth, "Depth exceeded");
                return Err(PipelineError::DepthExceeded {
                    max_depth: self.config.max_depth,
                });
            }

            let span = tracing::debug_span!("pipeline.attempt", depth);
            let conversation = self
                .runner
                .run(messages, params, self.generator.as_ref())
                .instrument(span.or_current())
                .await?;

            match self.next_action(&conversation).await? {
                ThenAction::Done => return Ok(conversation),
                ThenAction::Continue(next) => {
                    tracing::debug!(depth, added = next.len(), "Continuing conversation");
                    params = conversation.params().clone();
                    messages = conversation.into_messages();
                    messages.extend(next);
                    depth += 1;
                }
            }
        }
    }

    async fn next_action(&self, conversation: &Conversation) -> Result<ThenAction, PipelineError> {
        for callback in &self.callbacks {
            let action = callback(conversation)
                .await
                .map_err(PipelineError::Callback)?;
            if matches!(action, ThenAction::Continue(_)) {
                return Ok(action);
            }
        }
        Ok(ThenAction::Done)
    }

    async fn notify(&self, conversations: &[Conversation]) -> Result<(), PipelineError> {
        for watcher in &self.watchers {
            watcher
                .watch(conversations)
                .await
                .map_err(PipelineError::Watcher)?;
        }
        Ok(())
    }
}
