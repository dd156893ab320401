//! Tool calling for models without native tool support
//!
//! Before generation, tool definitions are written into the system prompt, assistant tool calls
//! become JSON lines in the message content and tool messages become user messages. After
//! generation everything is put back, and JSON tool calls in the generated messages are parsed
//! into real tool calls.
use anyhow::Context as _;
use async_trait::async_trait;
use derive_builder::Builder;
use slicewise_core::chat::{
    Conversation, GenerationParameters, Message, Role, ToolCall, ToolSpec, inject_system_content,
    strip_system_content,
};
use slicewise_core::slices::{SliceKind, TextEdit};
use slicewise_core::{Metadata, errors::SliceError};

use crate::errors::TransformError;
use crate::transform::{PostTransform, Transform, Transformed};

pub const DEFAULT_TOOLS_PROMPT: &str = r#"You have access to the following functions. To call a function, respond with a JSON object on its own line in the format {"name": function name, "parameters": dictionary of argument name and its value}."#;

#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ToolsToJson {
    /// Written into the system prompt ahead of the tool definitions
    #[builder(default = "DEFAULT_TOOLS_PROMPT.to_string()")]
    prompt: String,
}

impl Default for ToolsToJson {
    fn default() -> Self {
        ToolsToJson {
            prompt: DEFAULT_TOOLS_PROMPT.to_string(),
        }
    }
}

impl ToolsToJson {
    pub fn builder() -> ToolsToJsonBuilder {
        ToolsToJsonBuilder::default()
    }

    fn system_content(&self, tools: &[ToolSpec]) -> Result<String, TransformError> {
        let definitions =
            serde_json::to_string_pretty(tools).context("Failed to render tool definitions")?;
        Ok(format!("{}\n\n{definitions}", self.prompt))
    }
}

/// A message changed before generation, by index into the conversation's messages
#[derive(Debug, Clone, PartialEq)]
enum Converted {
    ToolCalls {
        index: usize,
        calls: Vec<ToolCall>,
    },
    ToolResponse {
        index: usize,
        tool_call_id: Option<String>,
    },
}

/// Everything needed to undo [`ToolsToJson`] on a finished conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolsToJsonState {
    system_content: Option<String>,
    tools: Option<Vec<ToolSpec>>,
    tool_choice: Option<String>,
    converted: Vec<Converted>,
}

impl ToolsToJsonState {
    fn is_noop(&self) -> bool {
        self.system_content.is_none()
            && self.tools.is_none()
            && self.tool_choice.is_none()
            && self.converted.is_empty()
    }
}

#[async_trait]
impl Transform for ToolsToJson {
    #[tracing::instrument(skip_all, name = "transform.tools_to_json.pre")]
    async fn pre(
        &self,
        mut messages: Vec<Message>,
        mut params: GenerationParameters,
    ) -> Result<Transformed, TransformError> {
        let mut state = ToolsToJsonState {
            tools: params.take_tools(),
            tool_choice: params.tool_choice().map(ToString::to_string),
            ..Default::default()
        };
        params.set_tool_choice(None);

        for (index, message) in messages.iter_mut().enumerate() {
            if message.tool_calls().is_some_and(|calls| !calls.is_empty()) {
                let calls = message.take_tool_calls().unwrap_or_default();
                render_tool_calls(message, &calls)?;
                state.converted.push(Converted::ToolCalls { index, calls });
            } else if message.role().is_tool() {
                let tool_call_id = message.tool_call_id().map(ToString::to_string);
                let id = tool_call_id.clone().unwrap_or_default();

                message.set_role(Role::User);
                message.set_tool_call_id(None);
                message.add_slice(
                    0..message.content().len(),
                    SliceKind::tool_response(&id),
                    Metadata::from([("tool_call_id", id.as_str())]),
                )?;
                state.converted.push(Converted::ToolResponse {
                    index,
                    tool_call_id,
                });
            }
        }

        if let Some(tools) = state.tools.as_deref().filter(|tools| !tools.is_empty()) {
            let content = self.system_content(tools)?;
            let before = messages.len();
            let system_before = messages.first().map(|m| m.content().len());
            inject_system_content(&mut messages, &content)?;

            if messages.len() != before
                || messages.first().map(|m| m.content().len()) != system_before
            {
                state.system_content = Some(content);
            }
        }

        tracing::debug!(converted = state.converted.len(), "Rendered tools as json");

        if state.is_noop() {
            return Ok(Transformed::new(messages, params));
        }
        Ok(Transformed::new(messages, params).with_post(state))
    }
}

fn render_tool_calls(message: &mut Message, calls: &[ToolCall]) -> Result<(), TransformError> {
    // Appended in one edit so earlier tool call slices do not grow over later lines
    let mut rendered = String::new();
    let mut ranges = Vec::with_capacity(calls.len());
    for call in calls {
        let line = call
            .to_json_line()
            .context("Failed to render tool call")?;
        if !message.content().is_empty() || !rendered.is_empty() {
            rendered.push('\n');
        }
        let start = message.content().len() + rendered.len();
        rendered.push_str(&line);
        ranges.push(start..start + line.len());
    }

    message.append(&rendered)?;
    for (call, range) in calls.iter().zip(ranges) {
        message.add_slice(
            range,
            SliceKind::tool_call(call.clone()),
            Metadata::from([("tool_call_id", call.id())]),
        )?;
    }
    Ok(())
}

#[async_trait]
impl PostTransform for ToolsToJsonState {
    #[tracing::instrument(skip_all, name = "transform.tools_to_json.post")]
    async fn post(self: Box<Self>, conversation: &mut Conversation) -> Result<(), TransformError> {
        let ToolsToJsonState {
            system_content,
            tools,
            tool_choice,
            converted,
        } = *self;

        if let Some(content) = system_content
            && !strip_system_content(conversation.messages_mut(), &content)?
        {
            tracing::warn!("Tool definitions not found in system prompt");
        }

        for converted in converted {
            let index = match &converted {
                Converted::ToolCalls { index, .. } | Converted::ToolResponse { index, .. } => {
                    *index
                }
            };
            let Some(message) = conversation.messages_mut().get_mut(index) else {
                tracing::warn!(index, "Converted message is gone, not restoring");
                continue;
            };

            match converted {
                Converted::ToolCalls { calls, .. } => {
                    remove_rendered_calls(message)?;
                    message.set_tool_calls(Some(calls));
                }
                Converted::ToolResponse { tool_call_id, .. } => {
                    message.set_role(Role::Tool);
                    message.set_tool_call_id(tool_call_id);
                    message.remove_slices(|slice| slice.kind().is_tool_response());
                }
            }
        }

        for message in conversation.generated_mut() {
            if message.role().is_assistant() {
                parse_tool_calls(message)?;
            }
        }

        let params = conversation.params_mut();
        params.set_tools(tools);
        params.set_tool_choice(tool_choice);

        Ok(())
    }
}

/// Deletes the span covered by tool call slices, with the newline separating it from the content
fn remove_rendered_calls(message: &mut Message) -> Result<(), SliceError> {
    let (start, end) = message
        .slices()
        .query(|slice| slice.kind().is_tool_call())
        .fold((usize::MAX, 0), |(start, end), slice| {
            (start.min(slice.start()), end.max(slice.end()))
        });
    if start >= end {
        return Ok(());
    }

    let start = if message.content()[..start].ends_with('\n') {
        start - 1
    } else {
        start
    };
    message.apply_edits(&[TextEdit::delete(start..end)])?;
    Ok(())
}

/// Moves JSON tool call lines out of the content into the message's tool calls
fn parse_tool_calls(message: &mut Message) -> Result<(), SliceError> {
    let mut calls = Vec::new();
    let mut edits = Vec::new();
    let mut offset = 0;

    for line in message.content().split_inclusive('\n') {
        if let Some(call) = ToolCall::from_json_line(line) {
            calls.push(call);
            edits.push(TextEdit::delete(offset..offset + line.len()));
        }
        offset += line.len();
    }

    if calls.is_empty() {
        return Ok(());
    }
    tracing::debug!(count = calls.len(), "Parsed tool calls from generated message");

    message.apply_edits(&edits)?;
    let trimmed = message.content().trim_end().len();
    if trimmed < message.content().len() {
        message.apply_edits(&[TextEdit::delete(trimmed..message.content().len())])?;
    }

    let mut tool_calls = message.take_tool_calls().unwrap_or_default();
    tool_calls.extend(calls);
    message.set_tool_calls(Some(tool_calls));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use slicewise_core::chat::Generated;

    fn weather_call() -> ToolCall {
        ToolCall::builder()
            .id("call-1")
            .name("weather")
            .args(r#"{"city":"Paris"}"#)
            .build()
            .unwrap()
    }

    fn params() -> GenerationParameters {
        GenerationParameters::builder()
            .tools(vec![
                ToolSpec::builder()
                    .name("weather")
                    .description("Current weather for a city")
                    .build()
                    .unwrap(),
            ])
            .tool_choice("auto")
            .build()
            .unwrap()
    }

    fn messages() -> Vec<Message> {
        vec![
            Message::system("You are helpful."),
            Message::user("What's the weather in Paris?"),
            Message::assistant_with_tool_calls("", vec![weather_call()]),
            Message::tool("call-1", "Sunny"),
        ]
    }

    #[test_log::test(tokio::test)]
    async fn test_pre_renders_tools_as_text() {
        let transformed = ToolsToJson::default()
            .pre(messages(), params())
            .await
            .unwrap();

        let system = &transformed.messages[0];
        assert!(system.content().starts_with("You are helpful.\n\nYou have access"));
        assert!(system.content().contains(r#""name": "weather""#));

        let assistant = &transformed.messages[2];
        assert_eq!(
            assistant.content(),
            r#"{"name":"weather","parameters":{"city":"Paris"}}"#
        );
        assert!(assistant.tool_calls().is_none());
        let slice = assistant.slices().iter().next().unwrap();
        assert_eq!(slice.kind(), &SliceKind::tool_call(weather_call()));
        assert_eq!(slice.range(), 0..assistant.content().len());

        let tool = &transformed.messages[3];
        assert_eq!(tool.role(), Role::User);
        assert!(tool.tool_call_id().is_none());
        assert!(tool.slices().iter().next().unwrap().kind().is_tool_response());

        assert!(transformed.params.tools().is_none());
        assert!(transformed.params.tool_choice().is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_round_trip_restores_and_parses_calls() {
        let transformed = ToolsToJson::default()
            .pre(messages(), params())
            .await
            .unwrap();

        let mut conversation =
            Conversation::new(transformed.messages).with_params(transformed.params);
        conversation.push_generated(Generated::from(Message::assistant(
            "Let me check Lyon too.\n{\"name\": \"weather\", \"parameters\": {\"city\": \"Lyon\"}}\n",
        )));
        transformed
            .post
            .unwrap()
            .post(&mut conversation)
            .await
            .unwrap();

        assert_eq!(conversation.messages(), messages().as_slice());
        assert_eq!(conversation.params(), &params());

        let generated = &conversation.generated()[0];
        assert_eq!(generated.content(), "Let me check Lyon too.");
        let calls = generated.tool_calls().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name(), "weather");
        assert_eq!(calls[0].args(), Some(r#"{"city":"Lyon"}"#));
    }

    #[test_log::test(tokio::test)]
    async fn test_calls_after_content_are_separated() {
        let mut with_content = messages();
        with_content[2] = Message::assistant_with_tool_calls("Checking.", vec![weather_call()]);

        let transformed = ToolsToJson::builder()
            .prompt("Tools:")
            .build()
            .unwrap()
            .pre(with_content.clone(), params())
            .await
            .unwrap();
        assert_eq!(
            transformed.messages[2].content(),
            "Checking.\n{\"name\":\"weather\",\"parameters\":{\"city\":\"Paris\"}}"
        );
        assert!(transformed.messages[0].content().contains("Tools:\n\n["));

        let mut conversation =
            Conversation::new(transformed.messages).with_params(transformed.params);
        transformed
            .post
            .unwrap()
            .post(&mut conversation)
            .await
            .unwrap();

        assert_eq!(conversation.messages(), with_content.as_slice());
    }

    #[test_log::test(tokio::test)]
    async fn test_each_call_slice_covers_its_own_line() {
        let lyon = ToolCall::builder()
            .id("call-2")
            .name("weather")
            .args(r#"{"city":"Lyon"}"#)
            .build()
            .unwrap();
        let mut two_calls = messages();
        two_calls[2] = Message::assistant_with_tool_calls("", vec![weather_call(), lyon]);

        let transformed = ToolsToJson::default()
            .pre(two_calls.clone(), params())
            .await
            .unwrap();

        let assistant = &transformed.messages[2];
        let lines = assistant
            .slices()
            .query(|slice| slice.kind().is_tool_call())
            .map(|slice| slice.text(assistant.content()).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            lines,
            vec![
                r#"{"name":"weather","parameters":{"city":"Paris"}}"#,
                r#"{"name":"weather","parameters":{"city":"Lyon"}}"#,
            ]
        );

        let mut conversation =
            Conversation::new(transformed.messages).with_params(transformed.params);
        transformed
            .post
            .unwrap()
            .post(&mut conversation)
            .await
            .unwrap();

        assert_eq!(conversation.messages(), two_calls.as_slice());
    }

    #[test_log::test(tokio::test)]
    async fn test_nothing_to_convert_has_no_post() {
        let transformed = ToolsToJson::default()
            .pre(vec![Message::user("Hi")], GenerationParameters::default())
            .await
            .unwrap();

        assert_eq!(transformed.messages, vec![Message::user("Hi")]);
        assert!(transformed.post.is_none());
    }
}
