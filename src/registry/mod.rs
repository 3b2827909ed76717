pub mod defs;
pub mod schema;
pub mod watcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

pub use defs::{OpSpec, OpType, PromptDef, ServerMeta, ToolDef, ToolGuards, guards_allow};

// Embedded seeds, written out when a registry file is missing at startup.
const DEFAULT_TOOLS_JSON: &str = include_str!("../../config-defaults/tools.json");
const DEFAULT_PROMPTS_JSON: &str = include_str!("../../config-defaults/prompts.json");
const DEFAULT_SERVER_JSON: &str = include_str!("../../config-defaults/server.json");

/// Immutable bundle of everything loaded from the three registry files.
/// Shared by many readers; replaced wholesale on reload, never mutated.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub tools: Vec<ToolDef>,
    tools_by_name: HashMap<String, usize>,
    pub prompts: Vec<PromptDef>,
    prompts_by_name: HashMap<String, usize>,
    pub server: ServerMeta,
    pub loaded_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    fn build(tools: Vec<ToolDef>, prompts: Vec<PromptDef>, server: ServerMeta) -> Self {
        let tools_by_name = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        let prompts_by_name = prompts
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        Self {
            tools,
            tools_by_name,
            prompts,
            prompts_by_name,
            server,
            loaded_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::build(Vec::new(), Vec::new(), ServerMeta::default())
    }

    /// Guard-filtered tool lookup: hidden tools resolve as absent.
    pub fn visible_tool(&self, name: &str) -> Option<&ToolDef> {
        let tool = self.tools.get(*self.tools_by_name.get(name)?)?;
        guards_allow(tool.guards.as_ref()).then_some(tool)
    }

    pub fn visible_tools(&self) -> impl Iterator<Item = &ToolDef> {
        self.tools.iter().filter(|t| guards_allow(t.guards.as_ref()))
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptDef> {
        self.prompts.get(*self.prompts_by_name.get(name)?)
    }
}

/// Parse tools.json content: a bare `Tool[]` or `{tools: Tool[]}`.
///
/// Every tool is fully validated here so a bad document never becomes a
/// snapshot: duplicate names, unknown op types, malformed JSON pointers and
/// unsupported schema features are all rejected with the tool named.
pub fn parse_tools(value: &Value) -> anyhow::Result<Vec<ToolDef>> {
    let items: &Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .get("tools")
            .and_then(|t| t.as_array())
            .ok_or_else(|| anyhow::anyhow!("tools.json must be an array or {{\"tools\": [...]}}"))?,
        _ => anyhow::bail!("tools.json must be an array or {{\"tools\": [...]}}"),
    };

    let mut tools = Vec::with_capacity(items.len());
    let mut seen: HashMap<String, ()> = HashMap::new();
    for item in items {
        let label = item
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or("<unnamed>")
            .to_string();
        let tool: ToolDef = serde_json::from_value(item.clone())
            .map_err(|e| anyhow::anyhow!("tool '{label}' is invalid: {e}"))?;

        schema::validate_input_schema(&tool.input_schema)
            .map_err(|e| anyhow::anyhow!("tool '{}' has an invalid inputSchema: {e}", tool.name))?;
        for (key, pointer) in &tool.op.map {
            schema::validate_json_pointer(pointer).map_err(|e| {
                anyhow::anyhow!("tool '{}' op.map entry '{key}' is invalid: {e}", tool.name)
            })?;
        }
        if seen.insert(tool.name.clone(), ()).is_some() {
            anyhow::bail!("duplicate tool name: {}", tool.name);
        }
        tools.push(tool);
    }
    Ok(tools)
}

/// Parse prompts.json content: a bare `Prompt[]` or `{prompts: Prompt[]}`.
pub fn parse_prompts(value: &Value) -> anyhow::Result<Vec<PromptDef>> {
    let items: &Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.get("prompts").and_then(|p| p.as_array()).ok_or_else(|| {
            anyhow::anyhow!("prompts.json must be an array or {{\"prompts\": [...]}}")
        })?,
        _ => anyhow::bail!("prompts.json must be an array or {{\"prompts\": [...]}}"),
    };

    let mut prompts = Vec::with_capacity(items.len());
    let mut seen: HashMap<String, ()> = HashMap::new();
    for item in items {
        let prompt: PromptDef = serde_json::from_value(item.clone())
            .map_err(|e| anyhow::anyhow!("invalid prompt entry: {e}"))?;
        if seen.insert(prompt.name.clone(), ()).is_some() {
            anyhow::bail!("duplicate prompt name: {}", prompt.name);
        }
        prompts.push(prompt);
    }
    Ok(prompts)
}

pub fn parse_server(value: &Value) -> anyhow::Result<ServerMeta> {
    serde_json::from_value(value.clone()).map_err(|e| anyhow::anyhow!("invalid server.json: {e}"))
}

/// Guard variables referenced by tools but absent from the environment.
/// Saves succeed anyway; the config surface returns these as warnings.
pub fn guard_warnings(tools: &[ToolDef]) -> Vec<String> {
    let mut warnings = Vec::new();
    for tool in tools {
        if let Some(guards) = &tool.guards {
            for var in guards.unset_vars() {
                warnings.push(format!(
                    "tool '{}' is guarded by env var '{var}' which is not set",
                    tool.name
                ));
            }
        }
    }
    warnings
}

/// Declarative registry over the three JSON documents, with an atomically
/// swapped immutable snapshot.
pub struct Registry {
    tools_path: PathBuf,
    prompts_path: PathBuf,
    server_path: PathBuf,
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl Registry {
    /// Paths from `MCP_TOOLS_JSON` / `MCP_PROMPTS_JSON` / `MCP_SERVER_JSON`,
    /// defaulting into the given config directory.
    pub fn from_env(config_dir: &Path) -> Self {
        let path_from = |var: &str, file: &str| {
            std::env::var(var)
                .map(PathBuf::from)
                .unwrap_or_else(|_| config_dir.join(file))
        };
        Self::new(
            path_from("MCP_TOOLS_JSON", "tools.json"),
            path_from("MCP_PROMPTS_JSON", "prompts.json"),
            path_from("MCP_SERVER_JSON", "server.json"),
        )
    }

    pub fn new(tools_path: PathBuf, prompts_path: PathBuf, server_path: PathBuf) -> Self {
        Self {
            tools_path,
            prompts_path,
            server_path,
            current: RwLock::new(Arc::new(RegistrySnapshot::empty())),
        }
    }

    pub fn tools_path(&self) -> &Path {
        &self.tools_path
    }

    pub fn prompts_path(&self) -> &Path {
        &self.prompts_path
    }

    pub fn server_path(&self) -> &Path {
        &self.server_path
    }

    /// Seed missing files from the embedded defaults, then load.
    pub async fn initial_load(&self) -> anyhow::Result<()> {
        self.seed_missing_files()?;
        self.reload().await
    }

    /// Re-read and re-validate all three documents; on success publish a new
    /// snapshot in one swap. On failure the previous snapshot stays.
    pub async fn reload(&self) -> anyhow::Result<()> {
        let tools = parse_tools(&read_json(&self.tools_path)?)?;
        let prompts = parse_prompts(&read_json(&self.prompts_path)?)?;
        let server = parse_server(&read_json(&self.server_path)?)?;

        let snapshot = Arc::new(RegistrySnapshot::build(tools, prompts, server));
        *self.current.write().await = snapshot;
        info!(
            tools = %self.tools_path.display(),
            prompts = %self.prompts_path.display(),
            server = %self.server_path.display(),
            "registry loaded"
        );
        Ok(())
    }

    /// The current snapshot. Callers clone the Arc and hold no lock while
    /// dispatching; a concurrent reload does not affect calls in flight.
    pub async fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().await.clone()
    }

    fn seed_missing_files(&self) -> anyhow::Result<()> {
        seed_file(&self.tools_path, DEFAULT_TOOLS_JSON)?;
        seed_file(&self.prompts_path, DEFAULT_PROMPTS_JSON)?;
        seed_file(&self.server_path, DEFAULT_SERVER_JSON)?;
        Ok(())
    }
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("invalid JSON in {}: {e}", path.display()))
}

fn seed_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    info!(path = %path.display(), "seeded default config file");
    Ok(())
}
