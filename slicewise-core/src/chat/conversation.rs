use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SliceError;
use crate::metadata::Metadata;
use crate::slices::TextEdit;

use super::message::{Message, Role};
use super::params::GenerationParameters;

/// Why the generator stopped producing the last message
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Output of a single generation
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub message: Message,
    pub stop_reason: StopReason,
}

impl Generated {
    pub fn new(message: Message, stop_reason: StopReason) -> Self {
        Generated {
            message,
            stop_reason,
        }
    }
}

impl From<Message> for Generated {
    fn from(message: Message) -> Self {
        Generated::new(message, StopReason::Stop)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display, strum_macros::EnumIs,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    Generation,
    DepthExceeded,
    Transform,
    Other,
}

/// A failed attempt kept in the results instead of being raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Messages sent to the generator together with what it generated
///
/// Owned by exactly one attempt at a time. Input messages are fixed once generation starts;
/// generated messages are appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    uuid: Uuid,
    messages: Vec<Message>,
    #[serde(default)]
    generated: Vec<Message>,
    #[serde(default)]
    params: GenerationParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<AttemptFailure>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
}

impl Conversation {
    pub fn new(messages: impl Into<Vec<Message>>) -> Self {
        Conversation {
            uuid: Uuid::new_v4(),
            messages: messages.into(),
            generated: Vec::new(),
            params: GenerationParameters::default(),
            stop_reason: None,
            failure: None,
            metadata: Metadata::default(),
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: GenerationParameters) -> Self {
        self.params = params;
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut Vec<Message> {
        &mut self.messages
    }

    pub fn generated(&self) -> &[Message] {
        &self.generated
    }

    pub fn generated_mut(&mut self) -> &mut Vec<Message> {
        &mut self.generated
    }

    pub fn params(&self) -> &GenerationParameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut GenerationParameters {
        &mut self.params
    }

    /// Input messages followed by generated messages
    pub fn all(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().chain(self.generated.iter())
    }

    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.messages.iter_mut().chain(self.generated.iter_mut())
    }

    pub fn len(&self) -> usize {
        self.messages.len() + self.generated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The last message, generated or not
    pub fn last(&self) -> Option<&Message> {
        self.generated.last().or_else(|| self.messages.last())
    }

    /// Consumes the conversation, returning all messages in order
    pub fn into_messages(self) -> Vec<Message> {
        let mut messages = self.messages;
        messages.extend(self.generated);
        messages
    }

    pub fn push_generated(&mut self, generated: Generated) {
        self.generated.push(generated.message);
        self.stop_reason = Some(generated.stop_reason);
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn failure(&self) -> Option<&AttemptFailure> {
        self.failure.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn set_failure(&mut self, failure: AttemptFailure) {
        self.failure = Some(failure);
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl std::fmt::Display for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for message in self.all() {
            writeln!(f, "{message}")?;
        }
        Ok(())
    }
}

const SYSTEM_SEPARATOR: &str = "\n\n";

/// Adds `content` to the leading system message, creating one if there is none
///
/// Content already present is not added twice.
///
/// # Errors
///
/// Errors if the system message cannot be edited
pub fn inject_system_content(messages: &mut Vec<Message>, content: &str) -> Result<(), SliceError> {
    match messages.first_mut() {
        Some(system) if system.role() == Role::System => {
            if system.content().contains(content) {
                return Ok(());
            }
            if system.content().is_empty() {
                system.append(content)
            } else {
                system.append(&format!("{SYSTEM_SEPARATOR}{content}"))
            }
        }
        _ => {
            messages.insert(0, Message::system(content));
            Ok(())
        }
    }
}

/// Removes `content` added by [`inject_system_content`], dropping the system message if nothing
/// else is left. Returns whether the content was found.
///
/// # Errors
///
/// Errors if the system message cannot be edited
pub fn strip_system_content(messages: &mut Vec<Message>, content: &str) -> Result<bool, SliceError> {
    let Some(system) = messages.first_mut().filter(|m| m.role() == Role::System) else {
        return Ok(false);
    };

    let separated = format!("{SYSTEM_SEPARATOR}{content}");
    let range = system
        .content()
        .find(&separated)
        .map(|start| start..start + separated.len())
        .or_else(|| {
            system
                .content()
                .find(content)
                .map(|start| start..start + content.len())
        });

    let Some(range) = range else {
        return Ok(false);
    };

    system.apply_edits(&[TextEdit::delete(range)])?;
    if system.content().trim().is_empty() {
        messages.remove(0);
    }
    Ok(true)
}
