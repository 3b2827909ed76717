use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of operation discriminators a tool may map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Search,
    SearchRead,
    Read,
    Create,
    Write,
    Unlink,
    SearchCount,
    Execute,
    WorkflowAction,
    GenerateReport,
    GetModelMetadata,
    ListModels,
    CheckAccess,
    CreateBatch,
    ReadGroup,
    NameSearch,
    NameGet,
    DefaultGet,
    Copy,
    Onchange,
    DatabaseCleanup,
    DeepCleanup,
}

/// Operation descriptor: which handler runs and how its arguments are
/// extracted. `map` values are RFC-6901 JSON pointers into the incoming
/// arguments object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpSpec {
    #[serde(rename = "type")]
    pub op_type: OpType,
    #[serde(default)]
    pub map: HashMap<String, String>,
}

/// Env-based visibility predicates for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolGuards {
    /// Listed/callable only when the env var equals "true" (case-insensitive;
    /// 1/yes/y/on are accepted as well).
    #[serde(default, rename = "requiresEnvTrue", skip_serializing_if = "Option::is_none")]
    pub requires_env_true: Option<String>,
    /// Listed/callable only when the env var is set and non-empty.
    #[serde(default, rename = "requiresEnv", skip_serializing_if = "Option::is_none")]
    pub requires_env: Option<String>,
}

impl ToolGuards {
    pub fn satisfied(&self) -> bool {
        if let Some(var) = &self.requires_env_true
            && !env_truthy(var)
        {
            return false;
        }
        if let Some(var) = &self.requires_env
            && std::env::var(var).map(|v| v.trim().is_empty()).unwrap_or(true)
        {
            return false;
        }
        true
    }

    /// Guard variables that are not set in the current environment; the
    /// config surface reports these as save warnings.
    pub fn unset_vars(&self) -> Vec<&str> {
        [self.requires_env_true.as_deref(), self.requires_env.as_deref()]
            .into_iter()
            .flatten()
            .filter(|var| std::env::var(var).is_err())
            .collect()
    }
}

pub fn guards_allow(guards: Option<&ToolGuards>) -> bool {
    guards.map(ToolGuards::satisfied).unwrap_or(true)
}

fn env_truthy(var: &str) -> bool {
    match std::env::var(var) {
        Ok(v) => {
            let s = v.trim().to_ascii_lowercase();
            matches!(s.as_str(), "1" | "true" | "yes" | "y" | "on")
        }
        Err(_) => false,
    }
}

/// One declarative tool loaded from tools.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    pub op: OpSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guards: Option<ToolGuards>,
}

impl ToolDef {
    /// The externally visible listing entry (guards and op stay internal).
    pub fn listing(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDef {
    pub name: String,
    pub description: String,
    pub content: String,
}

/// server.json contents; every field optional with code-side defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerMeta {
    #[serde(default, rename = "serverName", skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, rename = "protocolVersionDefault", skip_serializing_if = "Option::is_none")]
    pub protocol_version_default: Option<String>,
}

impl ServerMeta {
    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or("odoo-mcp-bridge")
    }

    pub fn instructions(&self) -> &str {
        self.instructions
            .as_deref()
            .unwrap_or("MCP bridge to Odoo ERP instances")
    }

    pub fn protocol_version_default(&self) -> &str {
        self.protocol_version_default.as_deref().unwrap_or("2025-06-18")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var mutation is process-global; each test here uses a distinct
    // variable name to stay independent.
    fn set(var: &str, value: &str) {
        unsafe { std::env::set_var(var, value) }
    }

    #[test]
    fn op_type_parses_snake_case() {
        let op: OpType = serde_json::from_str("\"search_read\"").unwrap();
        assert_eq!(op, OpType::SearchRead);
        let op: OpType = serde_json::from_str("\"deep_cleanup\"").unwrap();
        assert_eq!(op, OpType::DeepCleanup);
    }

    #[test]
    fn op_type_rejects_unknown_discriminator() {
        assert!(serde_json::from_str::<OpType>("\"drop_table\"").is_err());
    }

    #[test]
    fn missing_guards_always_allow() {
        assert!(guards_allow(None));
    }

    #[test]
    fn requires_env_true_accepts_truthy_spellings() {
        let guards = ToolGuards {
            requires_env_true: Some("GUARD_TEST_TRUTHY".to_string()),
            requires_env: None,
        };
        assert!(!guards.satisfied());
        for v in ["true", "TRUE", "1", "yes", "on"] {
            set("GUARD_TEST_TRUTHY", v);
            assert!(guards.satisfied(), "value {v} should satisfy the guard");
        }
        set("GUARD_TEST_TRUTHY", "false");
        assert!(!guards.satisfied());
    }

    #[test]
    fn requires_env_needs_non_empty_value() {
        let guards = ToolGuards {
            requires_env_true: None,
            requires_env: Some("GUARD_TEST_PRESENT".to_string()),
        };
        assert!(!guards.satisfied());
        set("GUARD_TEST_PRESENT", "  ");
        assert!(!guards.satisfied());
        set("GUARD_TEST_PRESENT", "anything");
        assert!(guards.satisfied());
    }

    #[test]
    fn unset_vars_reported_for_warnings() {
        let guards = ToolGuards {
            requires_env_true: Some("GUARD_TEST_UNSET_A".to_string()),
            requires_env: Some("GUARD_TEST_UNSET_B".to_string()),
        };
        let unset = guards.unset_vars();
        assert!(unset.contains(&"GUARD_TEST_UNSET_A"));
        assert!(unset.contains(&"GUARD_TEST_UNSET_B"));
    }

    #[test]
    fn tool_listing_omits_op_and_guards() {
        let tool = ToolDef {
            name: "odoo_search".to_string(),
            description: "Search records".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
            op: OpSpec {
                op_type: OpType::Search,
                map: HashMap::new(),
            },
            guards: None,
        };
        let listing = tool.listing();
        assert_eq!(listing["name"], "odoo_search");
        assert!(listing.get("op").is_none());
        assert!(listing.get("guards").is_none());
    }

    #[test]
    fn server_meta_defaults() {
        let meta = ServerMeta::default();
        assert_eq!(meta.server_name(), "odoo-mcp-bridge");
        assert!(!meta.protocol_version_default().is_empty());
    }

    #[test]
    fn tool_def_roundtrips_through_json() {
        let raw = serde_json::json!({
            "name": "odoo_count",
            "description": "Count records",
            "inputSchema": {"type": "object", "properties": {"model": {"type": "string"}}},
            "op": {"type": "search_count", "map": {"model": "/model"}},
            "guards": {"requiresEnvTrue": "SOME_FLAG"}
        });
        let tool: ToolDef = serde_json::from_value(raw.clone()).unwrap();
        let back = serde_json::to_value(&tool).unwrap();
        assert_eq!(back, raw);
    }
}
