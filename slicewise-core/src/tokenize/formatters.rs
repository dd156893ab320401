//! Built-in chat templates
use indoc::indoc;

use crate::chat::{GenerationParameters, Role};
use crate::errors::FormatError;
use crate::metadata::Metadata;
use crate::slices::SliceKind;
use crate::traits::ChatFormatter;

use super::render::RenderBuffer;

const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
const EOT: &str = "<|eot_id|>";

const TOOLS_PREAMBLE: &str = indoc! {r#"
    You have access to the following functions. To call a function, please respond with JSON for a function call. Respond in the format {"name": function name, "parameters": dictionary of argument name and its value}. Do not use variables.

"#};

/// Llama 3.1 chat template
///
/// Tool definitions go into the system block, tool calls are rendered as JSON and tool responses
/// under the `ipython` header.
#[derive(Debug, Clone, Copy)]
pub struct Llama3Formatter {
    generation_prompt: bool,
}

impl Default for Llama3Formatter {
    fn default() -> Self {
        Llama3Formatter {
            generation_prompt: true,
        }
    }
}

impl Llama3Formatter {
    /// Leaves out the trailing assistant header, i.e. when rendering finished conversations
    #[must_use]
    pub fn without_generation_prompt(mut self) -> Self {
        self.generation_prompt = false;
        self
    }
}

fn header(buffer: &mut RenderBuffer<'_>, role: &str) {
    buffer.push_text(&format!("<|start_header_id|>{role}<|end_header_id|>\n\n"));
}

impl ChatFormatter for Llama3Formatter {
    fn format(
        &self,
        buffer: &mut RenderBuffer<'_>,
        params: &GenerationParameters,
    ) -> Result<(), FormatError> {
        let messages = buffer.messages().to_vec();

        buffer.push_text(BEGIN_OF_TEXT);
        header(buffer, "system");

        if let Some(tools) = params.tools().filter(|tools| !tools.is_empty()) {
            buffer.push_text(TOOLS_PREAMBLE);
            for tool in tools {
                let rendered = serde_json::to_string_pretty(tool).map_err(anyhow::Error::from)?;
                buffer.push_text(&rendered);
                buffer.push_text("\n\n");
            }
        }

        let mut first = 0;
        if messages.first().is_some_and(|m| m.role().is_system()) {
            buffer.push_message(0)?;
            first = 1;
        }
        buffer.push_text(EOT);

        for (index, message) in messages.iter().enumerate().skip(first) {
            if let Some(calls) = message.tool_calls().filter(|calls| !calls.is_empty()) {
                header(buffer, "assistant");
                if !message.content().is_empty() {
                    buffer.push_message(index)?;
                }
                for call in calls {
                    buffer.push_slice(
                        &call.to_json_line().map_err(anyhow::Error::from)?,
                        SliceKind::tool_call(call.clone()),
                        Metadata::from([("tool_call_id", call.id())]),
                    );
                }
            } else if message.role().is_tool() {
                header(buffer, "ipython");
                let tool_call_id = message.tool_call_id().unwrap_or_default();
                buffer.push_message_as(
                    index,
                    SliceKind::tool_response(tool_call_id),
                    Metadata::from([("tool_call_id", tool_call_id)]),
                )?;
            } else {
                header(buffer, &message.role().to_string());
                buffer.push_message(index)?;
            }
            buffer.push_text(EOT);
        }

        if self.generation_prompt {
            header(buffer, &Role::Assistant.to_string());
        }

        Ok(())
    }
}

/// Renders every message as `role: content` on its own line
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFormatter;

impl ChatFormatter for PlainFormatter {
    fn format(
        &self,
        buffer: &mut RenderBuffer<'_>,
        _params: &GenerationParameters,
    ) -> Result<(), FormatError> {
        for index in 0..buffer.messages().len() {
            let role = buffer.messages()[index].role();
            buffer.push_text(&format!("{role}: "));
            buffer.push_message(index)?;
            buffer.push_text("\n");
        }
        Ok(())
    }
}
