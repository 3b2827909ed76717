use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use axum::http::HeaderMap;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const MIN_PASSWORD_LEN: usize = 4;

/// Credentials and flags persisted in `auth.json` under the config dir.
/// Values here override the corresponding env vars after a runtime change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AuthFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    ui_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_auth_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_auth_token: Option<String>,
}

/// File-backed auth settings shared by the config UI and the MCP bearer
/// gate. Reads are lock-cheap; updates persist before they publish.
#[derive(Clone)]
pub struct AuthStore {
    path: Option<PathBuf>,
    state: Arc<RwLock<AuthFile>>,
}

impl AuthStore {
    pub fn load(config_dir: Option<&std::path::Path>) -> Self {
        let path = config_dir.map(|dir| dir.join("auth.json"));
        let state = path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            state: Arc::new(RwLock::new(state)),
        }
    }

    fn read(&self) -> AuthFile {
        self.state.read().expect("auth store lock poisoned").clone()
    }

    fn update(&self, apply: impl FnOnce(&mut AuthFile)) -> anyhow::Result<()> {
        let mut state = self.state.write().expect("auth store lock poisoned");
        let mut next = state.clone();
        apply(&mut next);

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&next)?)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
            }
        }
        *state = next;
        Ok(())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn random_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

/// Session auth for the configuration UI. Login issues an opaque bearer
/// token held in memory; restart invalidates all sessions.
#[derive(Clone)]
pub struct UiAuthState {
    username: Option<String>,
    env_password: Option<String>,
    store: AuthStore,
    tokens: Arc<RwLock<HashSet<String>>>,
}

impl UiAuthState {
    pub fn from_env(store: AuthStore) -> Self {
        let non_empty = |v: Result<String, std::env::VarError>| v.ok().filter(|s| !s.is_empty());
        Self {
            username: non_empty(std::env::var("CONFIG_UI_USERNAME")),
            env_password: non_empty(std::env::var("CONFIG_UI_PASSWORD")),
            store,
            tokens: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn enabled(&self) -> bool {
        self.username.is_some() && self.effective_password().is_some()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn effective_password(&self) -> Option<String> {
        self.store.read().ui_password.or_else(|| self.env_password.clone())
    }

    pub fn login(&self, username: &str, password: &str) -> Option<String> {
        let expected_user = self.username.as_deref()?;
        let expected_password = self.effective_password()?;
        if username != expected_user || password != expected_password {
            warn!(user = username, "config UI login rejected");
            return None;
        }
        let token = random_token();
        self.tokens
            .write()
            .expect("ui token lock poisoned")
            .insert(token.clone());
        info!(user = username, "config UI login");
        Some(token)
    }

    pub fn logout(&self, headers: &HeaderMap) {
        if let Some(token) = bearer_token(headers) {
            self.tokens.write().expect("ui token lock poisoned").remove(token);
        }
    }

    /// With auth disabled (no credentials configured) every caller passes.
    pub fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        if !self.enabled() {
            return true;
        }
        bearer_token(headers)
            .map(|t| self.tokens.read().expect("ui token lock poisoned").contains(t))
            .unwrap_or(false)
    }

    pub fn change_password(&self, new_password: &str) -> anyhow::Result<()> {
        if new_password.len() < MIN_PASSWORD_LEN {
            anyhow::bail!("password must be at least {MIN_PASSWORD_LEN} characters");
        }
        self.store
            .update(|f| f.ui_password = Some(new_password.to_string()))?;
        info!("config UI password changed");
        Ok(())
    }
}

/// Bearer-token gate for the MCP network transports. Env vars give the
/// initial state; the config surface toggles and rotates at runtime, and
/// every check reads the current state so changes apply without restart.
#[derive(Clone)]
pub struct McpAuthState {
    env_enabled: bool,
    env_token: Option<String>,
    store: AuthStore,
}

impl McpAuthState {
    pub fn from_env(store: AuthStore) -> Self {
        let env_enabled = std::env::var("MCP_AUTH_ENABLED")
            .map(|v| {
                let s = v.trim().to_ascii_lowercase();
                matches!(s.as_str(), "1" | "true" | "yes" | "y" | "on")
            })
            .unwrap_or(false);
        Self {
            env_enabled,
            env_token: std::env::var("MCP_AUTH_TOKEN").ok().filter(|s| !s.is_empty()),
            store,
        }
    }

    pub fn enabled(&self) -> bool {
        self.store.read().mcp_auth_enabled.unwrap_or(self.env_enabled)
    }

    fn token(&self) -> Option<String> {
        self.store.read().mcp_auth_token.or_else(|| self.env_token.clone())
    }

    pub fn token_configured(&self) -> bool {
        self.token().is_some()
    }

    /// True when the request may pass: gate off, or a matching bearer token.
    pub fn allows(&self, headers: &HeaderMap) -> bool {
        if !self.enabled() {
            return true;
        }
        let Some(expected) = self.token() else {
            // Enabled without a configured token locks the transport down.
            return false;
        };
        bearer_token(headers).map(|t| t == expected).unwrap_or(false)
    }

    pub fn set_enabled(&self, enabled: bool) -> anyhow::Result<()> {
        self.store.update(|f| f.mcp_auth_enabled = Some(enabled))?;
        info!(enabled, "MCP transport auth toggled");
        Ok(())
    }

    /// Generate and persist a fresh token; returned once to the caller.
    pub fn rotate_token(&self) -> anyhow::Result<String> {
        let token = random_token();
        self.store.update(|f| f.mcp_auth_token = Some(token.clone()))?;
        info!("MCP transport token rotated");
        Ok(token)
    }
}
