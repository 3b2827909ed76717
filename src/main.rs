use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

use odoo_mcp_bridge::config_api::{self, AuthStore, McpAuthState, UiAuthState};
use odoo_mcp_bridge::context::AppContext;
use odoo_mcp_bridge::mcp::{McpBridgeHandler, http as mcp_http, stdio as mcp_stdio};
use odoo_mcp_bridge::odoo::client::OdooClient;
use odoo_mcp_bridge::registry::watcher;

/// User config directory: ~/.config/odoo-mcp-bridge/
fn user_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".config").join("odoo-mcp-bridge"))
}

/// Share directory for packaged installs, when one exists.
fn share_dir() -> Option<PathBuf> {
    let candidates = [
        PathBuf::from("/opt/homebrew/share/odoo-mcp-bridge"),
        PathBuf::from("/usr/local/share/odoo-mcp-bridge"),
        PathBuf::from("/usr/share/odoo-mcp-bridge"),
    ];
    candidates.into_iter().find(|path| path.exists())
}

/// SAFETY: only called during single-threaded startup, before the runtime
/// spawns worker threads.
fn set_default_env(key: &str, value: &Path) {
    if std::env::var(key).is_err() {
        unsafe { std::env::set_var(key, value) }
        info!("set default {}={}", key, value.display());
    }
}

const DEFAULT_INSTANCES_TEMPLATE: &str = r#"{
  "production": {
    "url": "http://localhost:8069",
    "db": "production",
    "apiKey": "YOUR_API_KEY"
  },
  "development": {
    "url": "http://localhost:8069",
    "db": "development",
    "version": "18",
    "username": "admin",
    "password": "admin"
  }
}
"#;

fn env_file_template(config_dir: &Path) -> String {
    let config_path = config_dir.to_string_lossy();
    format!(
        r#"# odoo-mcp-bridge configuration
# Values here are loaded at startup; real environment variables win.

# Multi-instance configuration lives in instances.json next to this file.
# ODOO_INSTANCES_JSON is set automatically when that file exists.

# Single-instance alternative:
# ODOO_URL=http://localhost:8069
# ODOO_DB=mydb
# ODOO_API_KEY=YOUR_API_KEY
# or, for Odoo versions without the JSON-2 API:
# ODOO_VERSION=18
# ODOO_USERNAME=admin
# ODOO_PASSWORD=admin

# Feature flags
# ODOO_ENABLE_WRITE_TOOLS=false
# ODOO_ENABLE_CLEANUP_TOOLS=false

# Client tuning
# ODOO_TIMEOUT_MS=30000
# ODOO_MAX_RETRIES=2
# ODOO_METADATA_CACHE_TTL_SECS=3600

# Config UI login
CONFIG_UI_USERNAME=admin
CONFIG_UI_PASSWORD=changeme

# MCP HTTP transport auth
MCP_AUTH_ENABLED=false
# MCP_AUTH_TOKEN=your-secure-random-token

# Registry file paths
MCP_TOOLS_JSON={config_path}/tools.json
MCP_PROMPTS_JSON={config_path}/prompts.json
MCP_SERVER_JSON={config_path}/server.json
"#
    )
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// Load key=value lines from the env file; already-set variables win.
fn load_env_file(path: &Path) {
    let Ok(file) = fs::File::open(path) else {
        warn!("could not open env file: {}", path.display());
        return;
    };

    info!("loading environment from {}", path.display());
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { continue };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let (key, value) = (key.trim(), value.trim());
            if std::env::var(key).is_err() {
                // SAFETY: startup, single-threaded.
                unsafe { std::env::set_var(key, value) }
                let shown_value = if key.contains("PASSWORD") || key.contains("API_KEY") || key.contains("TOKEN") {
                    "***"
                } else {
                    value
                };
                info!("  {key}={shown_value}");
            }
        }
    }
}

/// Build instances.json from single-instance env vars so older setups keep
/// working after an upgrade.
fn migrate_single_instance(instances_file: &Path) {
    let (Ok(url), Ok(db)) = (std::env::var("ODOO_URL"), std::env::var("ODOO_DB")) else {
        return;
    };

    let mut instance = serde_json::json!({ "url": url, "db": db });
    for (env, key) in [
        ("ODOO_API_KEY", "apiKey"),
        ("ODOO_USERNAME", "username"),
        ("ODOO_PASSWORD", "password"),
        ("ODOO_VERSION", "version"),
    ] {
        if let Ok(value) = std::env::var(env)
            && !value.is_empty()
        {
            instance[key] = serde_json::json!(value);
        }
    }

    let instances = serde_json::json!({ "default": instance });
    match serde_json::to_string_pretty(&instances) {
        Ok(body) => {
            if let Err(e) = fs::write(instances_file, body) {
                warn!("failed to migrate single-instance config: {e}");
            } else {
                restrict_permissions(instances_file);
                info!(
                    "migrated single-instance env config to {}",
                    instances_file.display()
                );
            }
        }
        Err(e) => warn!("failed to serialize instances.json: {e}"),
    }
}

/// First-run setup of the user config directory: env file, instances.json,
/// registry path defaults.
fn setup_user_config(config_dir: &Path) {
    if !config_dir.exists() {
        if let Err(e) = fs::create_dir_all(config_dir) {
            warn!("failed to create config directory {}: {e}", config_dir.display());
        } else {
            info!("created config directory {}", config_dir.display());
        }
    }

    let env_file = config_dir.join("env");
    if !env_file.exists() {
        if let Err(e) = fs::write(&env_file, env_file_template(config_dir)) {
            warn!("failed to create env file {}: {e}", env_file.display());
        } else {
            restrict_permissions(&env_file);
            info!("created default env file {}", env_file.display());
        }
    }
    load_env_file(&env_file);

    let instances_file = config_dir.join("instances.json");
    if !instances_file.exists() {
        migrate_single_instance(&instances_file);
    }
    if !instances_file.exists() {
        if let Err(e) = fs::write(&instances_file, DEFAULT_INSTANCES_TEMPLATE) {
            warn!(
                "failed to create default instances.json {}: {e}",
                instances_file.display()
            );
        } else {
            restrict_permissions(&instances_file);
            info!("created default {}; edit it with your Odoo credentials", instances_file.display());
        }
    }

    if std::env::var("ODOO_INSTANCES").is_err()
        && std::env::var("ODOO_INSTANCES_JSON").is_err()
        && instances_file.exists()
    {
        // SAFETY: startup, single-threaded.
        unsafe { std::env::set_var("ODOO_INSTANCES_JSON", &instances_file) }
        info!("using instances file {}", instances_file.display());
    }

    // Packaged installs ship registry defaults in the share directory.
    let registry_dir = share_dir().unwrap_or_else(|| config_dir.to_path_buf());
    set_default_env("MCP_TOOLS_JSON", &registry_dir.join("tools.json"));
    set_default_env("MCP_PROMPTS_JSON", &registry_dir.join("prompts.json"));
    set_default_env("MCP_SERVER_JSON", &registry_dir.join("server.json"));
}

#[derive(Debug, Clone, ValueEnum)]
enum TransportMode {
    /// Newline-delimited JSON-RPC on stdin/stdout (for desktop MCP clients)
    Stdio,
    /// Streamable HTTP + SSE + WebSocket on --listen
    Http,
}

#[derive(Debug, Parser)]
#[command(name = "odoo-mcp-bridge", version, about = "MCP server bridging AI assistants to Odoo")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(long, value_enum, default_value_t = TransportMode::Stdio)]
    transport: TransportMode,

    /// Listen address for http mode
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: String,

    /// Port for the configuration web server
    #[arg(long, env = "ODOO_CONFIG_SERVER_PORT", default_value = "3008")]
    config_server_port: u16,

    /// Config directory (defaults to ~/.config/odoo-mcp-bridge/)
    #[arg(long, env = "ODOO_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Debug, Parser)]
enum Command {
    /// Check every configured instance with a live round-trip, then exit
    ValidateConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries JSON-RPC in stdio mode, so logs must go to stderr.
    match cli.transport {
        TransportMode::Stdio => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .init();
        }
        TransportMode::Http => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .init();
        }
    }

    let config_dir = cli
        .config_dir
        .clone()
        .or_else(user_config_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    setup_user_config(&config_dir);

    if let Some(Command::ValidateConfig) = cli.command {
        return validate_config().await;
    }

    let ctx = AppContext::from_env(&config_dir)?;
    ctx.registry.initial_load().await?;
    let _watch_guard = watcher::start(
        ctx.registry.clone(),
        ctx.store.clone(),
        ctx.pool.clone(),
        ctx.cache.clone(),
    );

    let auth_store = AuthStore::load(Some(&config_dir));
    let ui_auth = UiAuthState::from_env(auth_store.clone());
    let mcp_auth = McpAuthState::from_env(auth_store);

    let handler = Arc::new(McpBridgeHandler::new(ctx.clone()));

    let config_state =
        config_api::server::ConfigApiState::new(ctx, ui_auth, mcp_auth.clone(), &config_dir);
    let config_port = cli.config_server_port;
    tokio::spawn(async move {
        let static_dir = Some(PathBuf::from("static/dist"));
        if let Err(e) = config_api::serve(config_port, config_state, static_dir).await {
            error!("config server error: {e}");
        }
    });

    match cli.transport {
        TransportMode::Stdio => mcp_stdio::run(handler).await?,
        TransportMode::Http => mcp_http::serve(handler, &cli.listen, mcp_auth).await?,
    }
    Ok(())
}

async fn validate_config() -> anyhow::Result<()> {
    let store = odoo_mcp_bridge::odoo::instance::InstanceStore::from_env()?;
    let names = store.names();
    if names.is_empty() {
        anyhow::bail!("no instances found in configuration");
    }

    println!("Validating {} Odoo instance(s)...\n", names.len());
    let mut all_ok = true;

    for name in &names {
        let Some(cfg) = store.get(name) else { continue };
        print!("• {name} ({}): ", cfg.url);
        match OdooClient::new(&cfg) {
            Ok(client) => {
                match tokio::time::timeout(std::time::Duration::from_secs(10), client.health_check())
                    .await
                {
                    Ok(true) => println!("✓ OK"),
                    Ok(false) => {
                        println!("✗ FAIL - health check failed");
                        all_ok = false;
                    }
                    Err(_) => {
                        println!("✗ FAIL - timeout");
                        all_ok = false;
                    }
                }
            }
            Err(e) => {
                println!("✗ FAIL - {e}");
                all_ok = false;
            }
        }
    }

    println!();
    if all_ok {
        println!("✓ All instances validated successfully");
        Ok(())
    } else {
        eprintln!("✗ One or more instances failed validation");
        Err(anyhow::anyhow!("validation failed"))
    }
}
