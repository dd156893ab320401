//! Transforms around generation and the pipeline that runs them
//!
//! A [`Transform`] rewrites messages and parameters before generation and hands back a
//! [`PostTransform`] that undoes its change afterwards. The [`TransformRunner`] applies them
//! around a single generation; the [`ChatPipeline`] adds follow-up attempts, batches and
//! watchers on top.
pub mod errors;
mod pipeline;
mod runner;
mod tokenize;
mod transform;
pub mod transforms;
pub mod watchers;

pub use pipeline::{
    ChatPipeline, DEFAULT_MAX_DEPTH, FailMode, PipelineConfig, PipelineConfigBuilder, ThenAction,
    ThenFn,
};
pub use runner::{AttemptState, PreApplied, TransformRunner};
pub use tokenize::tokenize_with_transforms;
pub use transform::{PostTransform, Transform, Transformed};
