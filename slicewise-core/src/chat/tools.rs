use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// A tool call requested by the assistant
#[derive(Clone, Debug, Builder, PartialEq, Serialize, Deserialize, Eq)]
#[builder(setter(into, strip_option))]
pub struct ToolCall {
    id: String,
    name: String,
    /// Raw JSON arguments
    #[builder(default)]
    args: Option<String>,
}

impl std::fmt::Display for ToolCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{id}#{name} {args}",
            id = self.id,
            name = self.name,
            args = self.args.as_deref().unwrap_or("")
        )
    }
}

impl ToolCall {
    pub fn builder() -> ToolCallBuilder {
        ToolCallBuilder::default()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> Option<&str> {
        self.args.as_deref()
    }

    /// Renders the call as a single line of JSON, `{"name": .., "parameters": ..}`
    ///
    /// Arguments that are not valid JSON are rendered as a string.
    ///
    /// # Errors
    ///
    /// Errors if serialization fails
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let parameters = match self.args() {
            Some(args) => serde_json::from_str(args)
                .unwrap_or_else(|_| serde_json::Value::String(args.to_string())),
            None => serde_json::json!({}),
        };
        serde_json::to_string(&serde_json::json!({ "name": self.name(), "parameters": parameters }))
    }

    /// Parses a line as rendered by [`ToolCall::to_json_line`]
    ///
    /// `arguments` is accepted in place of `parameters`. The call gets a fresh id.
    pub fn from_json_line(line: &str) -> Option<ToolCall> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        let value = serde_json::from_str::<serde_json::Value>(line).ok()?;
        let name = value.get("name")?.as_str()?;
        let parameters = value.get("parameters").or_else(|| value.get("arguments"))?;

        Some(ToolCall {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.to_string(),
            args: Some(parameters.to_string()),
        })
    }
}

/// A tool definition as it is passed to the model
///
/// `parameters` holds the JSON schema of the arguments, if any.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Builder, Default)]
#[builder(setter(into))]
pub struct ToolSpec {
    /// Name of the tool
    pub name: String,
    /// Description passed to the LLM for the tool
    pub description: String,

    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolSpec {
    pub fn builder() -> ToolSpecBuilder {
        ToolSpecBuilder::default()
    }
}

impl Eq for ToolSpec {}

impl std::hash::Hash for ToolSpec {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.description.hash(state);
        if let Some(parameters) = &self.parameters {
            parameters.to_string().hash(state);
        }
    }
}
