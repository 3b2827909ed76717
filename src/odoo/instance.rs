use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: usize = 2;

/// Which Odoo wire protocol a descriptor should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolHint {
    #[default]
    Auto,
    Modern,
    Legacy,
}

/// Resolved protocol after applying the selection rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Modern,
    Legacy,
}

/// Connection descriptor for one named Odoo instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub url: String,
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default, rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Declared Odoo version, e.g. "18". Required for legacy credentials.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub protocol: Option<ProtocolHint>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,

    // Unknown keys in instances.json are preserved, not rejected.
    #[serde(flatten, default)]
    pub extra: HashMap<String, Value>,
}

impl InstanceDescriptor {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    pub fn retries(&self) -> usize {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    fn has_api_key(&self) -> bool {
        self.api_key.as_ref().is_some_and(|s| !s.trim().is_empty())
    }

    fn has_password_auth(&self) -> bool {
        let set = |v: &Option<String>| v.as_ref().is_some_and(|s| !s.trim().is_empty());
        set(&self.username) && set(&self.password) && set(&self.version)
    }

    /// Pick the wire protocol: an explicit hint wins; under `auto` an API key
    /// selects the modern client (also when both credential sets are
    /// present), username/password/version select the legacy one.
    pub fn select_protocol(&self) -> anyhow::Result<Protocol> {
        match self.protocol.unwrap_or_default() {
            ProtocolHint::Modern => Ok(Protocol::Modern),
            ProtocolHint::Legacy => Ok(Protocol::Legacy),
            ProtocolHint::Auto => {
                if self.has_api_key() {
                    Ok(Protocol::Modern)
                } else if self.has_password_auth() {
                    Ok(Protocol::Legacy)
                } else {
                    anyhow::bail!(
                        "instance '{}' has neither an apiKey nor username/password/version",
                        self.url
                    )
                }
            }
        }
    }

    /// Normalize the URL in place (add a scheme when missing, trim).
    pub fn normalize(&mut self) {
        self.url = normalize_url(&self.url);
    }

    /// Check the credential invariant: an API key, or the full legacy triple.
    pub fn validate(&self, name: &str) -> anyhow::Result<()> {
        if self.url.trim().is_empty() {
            anyhow::bail!("instance '{name}' has an empty url");
        }
        url::Url::parse(&normalize_url(&self.url)).map_err(|e| {
            anyhow::anyhow!("instance '{name}' has an invalid url '{}': {e}", self.url)
        })?;
        if !self.has_api_key() && !self.has_password_auth() {
            anyhow::bail!(
                "instance '{name}' needs an apiKey, or username + password + version for legacy access"
            );
        }
        if matches!(self.select_protocol(), Ok(Protocol::Legacy))
            && self.db.as_ref().map(|s| s.trim().is_empty()).unwrap_or(true)
        {
            anyhow::bail!("instance '{name}' uses legacy auth and requires a db");
        }
        Ok(())
    }
}

fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

type InstanceMap = HashMap<String, InstanceDescriptor>;

/// Read-mostly store of instance descriptors.
///
/// The mapping is immutable once published; `replace` swaps the shared Arc
/// so in-flight requests keep the descriptors they started with.
#[derive(Clone)]
pub struct InstanceStore {
    current: Arc<RwLock<Arc<InstanceMap>>>,
    /// Backing file when the mapping came from disk; used by the watcher
    /// and the config surface.
    source_path: Option<PathBuf>,
}

impl InstanceStore {
    pub fn new(map: InstanceMap, source_path: Option<PathBuf>) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(map))),
            source_path,
        }
    }

    /// Load the mapping from, in order: `ODOO_INSTANCES` inline JSON,
    /// an `ODOO_INSTANCES_JSON` file, then single-instance scalar vars.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut source_path = None;
        let mut instances: InstanceMap = HashMap::new();

        if let Ok(raw) = std::env::var("ODOO_INSTANCES")
            && !raw.trim().is_empty()
        {
            let parsed: InstanceMap = serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("Failed to parse ODOO_INSTANCES JSON: {e}"))?;
            instances.extend(parsed);
        }

        if instances.is_empty()
            && let Ok(path) = std::env::var("ODOO_INSTANCES_JSON")
            && !path.trim().is_empty()
        {
            let path = PathBuf::from(path);
            instances = read_instances_file(&path)?;
            source_path = Some(path);
        }

        if instances.is_empty()
            && let Some(single) = single_instance_from_env()
        {
            instances.insert("default".to_string(), single);
        }

        if instances.is_empty() {
            anyhow::bail!(
                "No Odoo instances configured. Set ODOO_INSTANCES, ODOO_INSTANCES_JSON, or ODOO_URL + credentials.\n\
                 Modern instances: ODOO_API_KEY\n\
                 Legacy instances: ODOO_USERNAME + ODOO_PASSWORD + ODOO_VERSION"
            );
        }

        apply_global_fallbacks(&mut instances)?;
        Ok(Self::new(instances, source_path))
    }

    pub fn get(&self, name: &str) -> Option<InstanceDescriptor> {
        self.snapshot().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn snapshot(&self) -> Arc<InstanceMap> {
        self.current
            .read()
            .expect("instance store lock poisoned")
            .clone()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Publish a new mapping. Returns the names whose descriptor changed or
    /// disappeared, so the caller can drop pooled clients and cached
    /// metadata for exactly those instances.
    pub fn replace(&self, mut map: InstanceMap) -> anyhow::Result<Vec<String>> {
        for (name, cfg) in map.iter_mut() {
            cfg.normalize();
            cfg.validate(name)?;
        }

        let previous = self.snapshot();
        let mut stale: Vec<String> = previous
            .iter()
            .filter(|&(name, old)| map.get(name.as_str()) != Some(old))
            .map(|(name, _)| name.clone())
            .collect();
        stale.sort();

        *self.current.write().expect("instance store lock poisoned") = Arc::new(map);
        if !stale.is_empty() {
            info!(instances = ?stale, "instance descriptors replaced");
        }
        Ok(stale)
    }

    /// Re-read the backing file (used by the hot-reload watcher).
    pub fn reload_from_disk(&self) -> anyhow::Result<Vec<String>> {
        let Some(path) = &self.source_path else {
            return Ok(Vec::new());
        };
        self.replace(read_instances_file(path)?)
    }
}

fn read_instances_file(path: &Path) -> anyhow::Result<InstanceMap> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read instances file {}: {e}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid instances file {}: {e}", path.display()))
}

fn single_instance_from_env() -> Option<InstanceDescriptor> {
    let url = std::env::var("ODOO_URL").ok()?;
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

    let api_key = non_empty(std::env::var("ODOO_API_KEY").ok());
    let username = non_empty(std::env::var("ODOO_USERNAME").ok());
    let password = non_empty(std::env::var("ODOO_PASSWORD").ok());
    if api_key.is_none() && (username.is_none() || password.is_none()) {
        return None;
    }

    Some(InstanceDescriptor {
        url,
        db: non_empty(std::env::var("ODOO_DB").ok()),
        api_key,
        username,
        password,
        version: non_empty(std::env::var("ODOO_VERSION").ok()),
        protocol: None,
        timeout_ms: std::env::var("ODOO_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()),
        max_retries: std::env::var("ODOO_MAX_RETRIES").ok().and_then(|v| v.parse().ok()),
        extra: HashMap::new(),
    })
}

/// Fill per-instance credential gaps from the global env vars, then validate.
fn apply_global_fallbacks(instances: &mut InstanceMap) -> anyhow::Result<()> {
    let global_api_key = std::env::var("ODOO_API_KEY").ok();
    let global_username = std::env::var("ODOO_USERNAME").ok();
    let global_password = std::env::var("ODOO_PASSWORD").ok();
    let global_version = std::env::var("ODOO_VERSION").ok();

    for (name, cfg) in instances.iter_mut() {
        cfg.normalize();

        let blank = |v: &Option<String>| v.as_ref().map(|s| s.trim().is_empty()).unwrap_or(true);
        if blank(&cfg.version) {
            cfg.version = global_version.clone();
        }
        if blank(&cfg.api_key) && blank(&cfg.username) {
            cfg.api_key = global_api_key.clone();
        }
        if blank(&cfg.api_key) {
            if blank(&cfg.username) {
                cfg.username = global_username.clone();
            }
            if blank(&cfg.password) {
                cfg.password = global_password.clone();
            }
        }

        cfg.validate(name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modern(url: &str) -> InstanceDescriptor {
        InstanceDescriptor {
            url: url.to_string(),
            db: Some("d".to_string()),
            api_key: Some("k".to_string()),
            username: None,
            password: None,
            version: None,
            protocol: None,
            timeout_ms: None,
            max_retries: None,
            extra: HashMap::new(),
        }
    }

    fn legacy(url: &str) -> InstanceDescriptor {
        InstanceDescriptor {
            url: url.to_string(),
            db: Some("d".to_string()),
            api_key: None,
            username: Some("admin".to_string()),
            password: Some("admin".to_string()),
            version: Some("18".to_string()),
            protocol: None,
            timeout_ms: None,
            max_retries: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn normalize_url_adds_scheme() {
        assert_eq!(normalize_url("localhost:8069"), "http://localhost:8069");
        assert_eq!(normalize_url("  example.com "), "http://example.com");
        assert_eq!(normalize_url("https://odoo.example"), "https://odoo.example");
    }

    #[test]
    fn api_key_only_selects_modern() {
        assert_eq!(modern("http://x").select_protocol().unwrap(), Protocol::Modern);
    }

    #[test]
    fn legacy_triple_selects_legacy() {
        assert_eq!(legacy("http://x").select_protocol().unwrap(), Protocol::Legacy);
    }

    #[test]
    fn both_credential_sets_prefer_modern() {
        let mut cfg = legacy("http://x");
        cfg.api_key = Some("k".to_string());
        assert_eq!(cfg.select_protocol().unwrap(), Protocol::Modern);
    }

    #[test]
    fn legacy_hint_overrides_api_key() {
        let mut cfg = legacy("http://x");
        cfg.api_key = Some("k".to_string());
        cfg.protocol = Some(ProtocolHint::Legacy);
        assert_eq!(cfg.select_protocol().unwrap(), Protocol::Legacy);
    }

    #[test]
    fn no_credentials_is_invalid() {
        let mut cfg = modern("http://x");
        cfg.api_key = None;
        assert!(cfg.select_protocol().is_err());
        assert!(cfg.validate("default").is_err());
    }

    #[test]
    fn legacy_without_db_is_invalid() {
        let mut cfg = legacy("http://x");
        cfg.db = None;
        let err = cfg.validate("staging").unwrap_err().to_string();
        assert!(err.contains("staging"));
        assert!(err.contains("db"));
    }

    #[test]
    fn descriptor_defaults() {
        let cfg = modern("http://x");
        assert_eq!(cfg.timeout(), Duration::from_millis(30_000));
        assert_eq!(cfg.retries(), 2);
    }

    #[test]
    fn descriptor_deserializes_camel_case_and_extra_fields() {
        let cfg: InstanceDescriptor = serde_json::from_str(
            r#"{"url":"http://localhost:8069","db":"mydb","apiKey":"key","custom":"x"}"#,
        )
        .unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("key"));
        assert!(cfg.extra.contains_key("custom"));
    }

    #[test]
    fn protocol_hint_deserializes_lowercase() {
        let cfg: InstanceDescriptor =
            serde_json::from_str(r#"{"url":"http://x","apiKey":"k","protocol":"legacy"}"#).unwrap();
        assert_eq!(cfg.protocol, Some(ProtocolHint::Legacy));
    }

    #[test]
    fn replace_reports_changed_and_removed_names() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), modern("http://a"));
        map.insert("b".to_string(), modern("http://b"));
        let store = InstanceStore::new(map, None);

        let mut next = HashMap::new();
        next.insert("a".to_string(), modern("http://a")); // unchanged
        let mut changed_b = modern("http://b");
        changed_b.api_key = Some("other".to_string());
        next.insert("b".to_string(), changed_b);

        let stale = store.replace(next).unwrap();
        assert_eq!(stale, vec!["b".to_string()]);
        assert_eq!(store.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn replace_identical_map_is_a_no_op() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), modern("http://a"));
        let store = InstanceStore::new(map.clone(), None);
        assert!(store.replace(map).unwrap().is_empty());
    }

    #[test]
    fn replace_reports_removed_instance() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), modern("http://a"));
        map.insert("gone".to_string(), modern("http://gone"));
        let store = InstanceStore::new(map, None);

        let mut next = HashMap::new();
        next.insert("a".to_string(), modern("http://a"));
        let stale = store.replace(next).unwrap();
        assert_eq!(stale, vec!["gone".to_string()]);
        assert!(store.get("gone").is_none());
    }

    #[test]
    fn replace_rejects_invalid_descriptor() {
        let store = InstanceStore::new(HashMap::new(), None);
        let mut bad = modern("http://x");
        bad.api_key = None;
        let mut map = HashMap::new();
        map.insert("broken".to_string(), bad);
        assert!(store.replace(map).is_err());
    }
}
