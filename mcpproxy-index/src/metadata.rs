//! Indexed tool metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One indexed tool. `(server_name, tool_name)` is the identity; the public
/// identifier is `"server:tool"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub server_name: String,
    pub tool_name: String,
    pub description: String,

    /// Input schema as JSON text
    pub input_schema: String,

    /// Content fingerprint of description + schema
    pub hash: String,

    /// Behavior hints passed through from the upstream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolMetadata {
    pub fn new(
        server_name: impl Into<String>,
        tool_name: impl Into<String>,
        description: impl Into<String>,
        input_schema: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            server_name: server_name.into(),
            tool_name: tool_name.into(),
            description: description.into(),
            input_schema: input_schema.into(),
            hash: hash.into(),
            annotations: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Public `"server:tool"` identifier
    pub fn id(&self) -> String {
        format!("{}:{}", self.server_name, self.tool_name)
    }

    /// Parsed input schema, defaulting to an empty object schema
    pub fn schema_value(&self) -> Value {
        serde_json::from_str(&self.input_schema)
            .unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_format() {
        let meta = ToolMetadata::new("github", "create_issue", "", "{}", "h");
        assert_eq!(meta.id(), "github:create_issue");
    }

    #[test]
    fn test_schema_value_falls_back_on_garbage() {
        let meta = ToolMetadata::new("s", "t", "", "not json", "h");
        assert_eq!(meta.schema_value(), serde_json::json!({"type": "object"}));
    }
}
