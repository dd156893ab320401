use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use pretty_assertions::assert_eq;
use slicewise_core::chat::{
    FailureKind, GenerationParameters, Generated, Message, StopReason,
};
use slicewise_core::errors::GenerationError;
use slicewise_core::test_utils::MockGenerator;
use slicewise_core::MockWatcher;
use slicewise_pipeline::errors::{PipelineError, TransformError};
use slicewise_pipeline::transforms::InjectSystemContent;
use slicewise_pipeline::{ChatPipeline, FailMode, PipelineConfig, ThenAction, Transformed};
use test_case::test_case;

fn reply(content: &str) -> anyhow::Result<Generated> {
    Ok(Generated::from(Message::assistant(content)))
}

/// A pipeline whose callback asks for a follow-up `continues` times
fn continuing(generator: MockGenerator, continues: usize, max_depth: usize) -> ChatPipeline {
    let calls = Arc::new(AtomicUsize::new(0));
    ChatPipeline::new(generator, vec![Message::user("Count")])
        .with_max_depth(max_depth)
        .then(move |_| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if call < continues {
                    Ok(ThenAction::Continue(vec![Message::user("More")]))
                } else {
                    Ok(ThenAction::Done)
                }
            })
        })
}

#[test_case(0, 0 ; "no follow ups")]
#[test_case(2, 2 ; "follow ups up to the limit")]
#[test_case(3, 10 ; "follow ups under the limit")]
#[test_log::test(tokio::test)]
async fn test_depth_within_limit(continues: usize, max_depth: usize) {
    let generator = MockGenerator::new();
    for _ in 0..=continues {
        generator.expect_any(reply("Counted"));
    }

    let conversation = continuing(generator, continues, max_depth)
        .run()
        .await
        .unwrap();

    // One user and one assistant message per attempt
    assert_eq!(conversation.len(), 2 * (continues + 1));
}

#[test_log::test(tokio::test)]
async fn test_depth_exceeded_exactly_past_the_limit() {
    let generator = MockGenerator::new();
    // Depths 0, 1 and 2 generate; the request for depth 3 is refused
    for _ in 0..3 {
        generator.expect_any(reply("Counted"));
    }

    let err = continuing(generator, usize::MAX, 2)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::DepthExceeded { max_depth: 2 }));
}

#[test_log::test(tokio::test)]
async fn test_transforms_are_undone_after_generation() {
    let generator = MockGenerator::new();
    generator.expect_generate(
        vec![Message::system("Be brief."), Message::user("Hi")],
        reply("Hello"),
    );

    let conversation = ChatPipeline::new(generator, vec![Message::user("Hi")])
        .transform(InjectSystemContent::new("Be brief."))
        .run()
        .await
        .unwrap();

    assert_eq!(conversation.messages(), &[Message::user("Hi")]);
    assert_eq!(conversation.generated(), &[Message::assistant("Hello")]);
    assert_eq!(conversation.stop_reason(), Some(StopReason::Stop));
}

#[test_log::test(tokio::test)]
async fn test_closure_transform() {
    let generator = MockGenerator::new();
    generator.expect_generate(vec![Message::user("[CTX] Hi")], reply("Hello"));

    let conversation = ChatPipeline::new(generator, vec![Message::user("Hi")])
        .transform(
            |mut messages: Vec<Message>, params: GenerationParameters| async move {
                for message in &mut messages {
                    message.prepend("[CTX] ")?;
                }
                Ok::<_, TransformError>(Transformed::new(messages, params))
            },
        )
        .run()
        .await
        .unwrap();

    assert_eq!(conversation.messages()[0].content(), "[CTX] Hi");
}

/// Three entries where the second fails to generate
fn batch() -> Vec<(Vec<Message>, anyhow::Result<Generated>)> {
    vec![
        (vec![Message::user("one")], reply("1")),
        (
            vec![Message::user("two")],
            Err(anyhow::anyhow!("model overloaded")),
        ),
        (vec![Message::user("three")], reply("3")),
    ]
}

/// Runs the batch one entry at a time
async fn run_batch(
    fail_mode: FailMode,
) -> Result<Vec<slicewise_core::chat::Conversation>, PipelineError> {
    let generator = MockGenerator::new();
    let mut entries = Vec::new();
    for (entry, response) in batch() {
        let mut expected = vec![Message::system("Base")];
        expected.extend(entry.clone());
        generator.expect_generate(expected, response);
        entries.push(entry);
    }

    batch_pipeline(generator, fail_mode).run_batch(entries).await
}

fn batch_pipeline(generator: MockGenerator, fail_mode: FailMode) -> ChatPipeline {
    ChatPipeline::new(generator, vec![Message::system("Base")]).with_config(
        PipelineConfig::builder()
            .concurrency(1_usize)
            .fail_mode(fail_mode)
            .build()
            .unwrap(),
    )
}

#[test_log::test(tokio::test)]
async fn test_batch_raise_stops_at_the_first_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let generator = move |messages: Vec<Message>, _params: GenerationParameters| {
        let calls = Arc::clone(&counted);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            let content = messages
                .last()
                .map(|m| m.content().to_string())
                .unwrap_or_default();
            if content == "two" {
                return Err(GenerationError::permanent(anyhow::anyhow!("model overloaded")));
            }
            Ok(Generated::from(Message::assistant(content)))
        }
    };

    let entries = batch()
        .into_iter()
        .map(|(entry, _)| entry)
        .collect::<Vec<_>>();
    let err = ChatPipeline::new(generator, vec![Message::system("Base")])
        .with_concurrency(1)
        .run_batch(entries)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Generation(GenerationError::PermanentError(_))
    ));
    // The third entry is never attempted
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test_log::test(tokio::test)]
async fn test_batch_skip() {
    let conversations = run_batch(FailMode::Skip).await.unwrap();

    let generated = conversations
        .iter()
        .map(|c| c.last().unwrap().content().to_string())
        .collect::<Vec<_>>();
    assert_eq!(generated, vec!["1", "3"]);
}

#[test_log::test(tokio::test)]
async fn test_batch_include() {
    let conversations = run_batch(FailMode::Include).await.unwrap();

    assert_eq!(conversations.len(), 3);
    assert!(!conversations[0].is_failed());
    assert!(!conversations[2].is_failed());

    let failed = &conversations[1];
    assert_eq!(failed.failure().unwrap().kind, FailureKind::Generation);
    assert!(failed.failure().unwrap().message.contains("model overloaded"));
    assert_eq!(
        failed.messages(),
        &[Message::system("Base"), Message::user("two")]
    );
    assert!(failed.generated().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_fail_mode_does_not_catch_transform_errors() {
    // No expectations; the transform fails before any generation
    let generator = MockGenerator::new();
    let err = ChatPipeline::new(generator, vec![Message::user("Hi")])
        .with_fail_mode(FailMode::Skip)
        .transform(|_messages: Vec<Message>, _params: GenerationParameters| async move {
            Err::<Transformed, _>(TransformError::invalid_content("nope"))
        })
        .run_many(2)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::PreTransform { .. }));
}

#[test_log::test(tokio::test)]
async fn test_fail_mode_catches_depth_exceeded() {
    let generator = MockGenerator::new();
    generator.expect_any(reply("again"));
    generator.expect_any(reply("again"));

    let conversations = continuing(generator, usize::MAX, 0)
        .with_fail_mode(FailMode::Include)
        .run_many(2)
        .await
        .unwrap();

    assert_eq!(conversations.len(), 2);
    assert!(
        conversations
            .iter()
            .all(|c| c.failure().unwrap().kind == FailureKind::DepthExceeded)
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_concurrent_results_keep_input_order() {
    let generator = |messages: Vec<Message>, _params: GenerationParameters| async move {
        let content = messages
            .last()
            .map(|m| m.content().to_string())
            .unwrap_or_default();
        let delay = content.parse::<u64>().unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok::<_, GenerationError>(Generated::from(Message::assistant(content)))
    };

    let conversations = ChatPipeline::new(generator, Vec::<Message>::new())
        .with_concurrency(3)
        .run_batch(vec![
            vec![Message::user("30")],
            vec![Message::user("10")],
            vec![Message::user("20")],
        ])
        .await
        .unwrap();

    let generated = conversations
        .iter()
        .map(|c| c.last().unwrap().content().to_string())
        .collect::<Vec<_>>();
    assert_eq!(generated, vec!["30", "10", "20"]);
}

#[test_log::test(tokio::test)]
async fn test_watchers_see_every_run_once() {
    let generator = MockGenerator::new();
    generator.expect_any(reply("a"));
    generator.expect_any(reply("b"));

    let mut watcher = MockWatcher::new();
    watcher
        .expect_watch()
        .withf(|conversations| conversations.len() == 2)
        .times(1)
        .returning(|_| Ok(()));

    ChatPipeline::new(generator, vec![Message::user("Hi")])
        .watch(watcher)
        .run_many(2)
        .await
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn test_watcher_errors_surface() {
    let generator = MockGenerator::new();
    generator.expect_any(reply("a"));

    let mut watcher = MockWatcher::new();
    watcher
        .expect_watch()
        .returning(|_| Err(anyhow::anyhow!("disk full")));

    let err = ChatPipeline::new(generator, vec![Message::user("Hi")])
        .watch(watcher)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Watcher(_)));
}
