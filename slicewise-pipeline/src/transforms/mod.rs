//! Built-in transforms
mod inject_system;
mod substitute;
mod tools_to_json;

pub use inject_system::InjectSystemContent;
pub use substitute::{Substitute, SubstitutionMap};
pub use tools_to_json::{DEFAULT_TOOLS_PROMPT, ToolsToJson, ToolsToJsonBuilder, ToolsToJsonState};
