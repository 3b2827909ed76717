use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use super::error::{OdooError, OdooResult, classify_http_error, classify_rpc_error};
use super::instance::InstanceDescriptor;
use super::retry::{backoff_delay, exhausted, is_retryable_status};

/// Client for the legacy `/jsonrpc` surface (Odoo versions without the
/// JSON-2 API). Authenticates once via `common.authenticate`, caches the
/// uid, and routes model calls through `object.execute_kw`.
#[derive(Clone, Debug)]
pub struct LegacyClient {
    base_url: Url,
    db: String,
    username: String,
    password: String,
    http: reqwest::Client,
    max_retries: usize,
    /// Session token: the authenticated uid. Mutated only under the lock,
    /// held around login and the single relogin decision.
    uid: Arc<Mutex<Option<i64>>>,
}

impl LegacyClient {
    pub fn new(cfg: &InstanceDescriptor) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(&cfg.url)
            .map_err(|e| anyhow::anyhow!("Invalid Odoo url '{}': {e}", cfg.url))?;
        base_url.set_path("");
        base_url.set_query(None);
        base_url.set_fragment(None);

        let db = cfg
            .db
            .clone()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing db for legacy instance url={}", cfg.url))?;
        let username = cfg
            .username
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Missing username for legacy instance url={}", cfg.url))?;
        let password = cfg
            .password
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Missing password for legacy instance url={}", cfg.url))?;

        let http = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .cookie_store(true)
            .build()?;

        Ok(Self {
            base_url,
            db,
            username,
            password,
            http,
            max_retries: cfg.retries(),
            uid: Arc::new(Mutex::new(None)),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("odoo-mcp-bridge/0.1"));
        headers
    }

    fn jsonrpc_endpoint(&self) -> Url {
        let mut url = self.base_url.clone();
        url.set_path("/jsonrpc");
        url
    }

    fn rpc_body(service: &str, method: &str, args: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "service": service, "method": method, "args": args },
            "id": 1
        })
    }

    /// POST one JSON-RPC call, retrying transient transport faults.
    async fn rpc(&self, service: &str, method: &str, args: Value) -> OdooResult<Value> {
        let url = self.jsonrpc_endpoint();
        let headers = self.headers();
        let body = Self::rpc_body(service, method, args);

        let mut last_err: Option<OdooError> = None;
        let attempts = self.max_retries + 1;

        for attempt in 0..attempts {
            let resp = self
                .http
                .post(url.clone())
                .headers(headers.clone())
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(r) => {
                    let status = r.status();
                    let text = r.text().await.unwrap_or_default();

                    if status.is_success() {
                        let v: Value = serde_json::from_str(&text).map_err(|e| {
                            OdooError::InvalidResponse(format!(
                                "Failed to parse JSON-RPC response: {e}. Body: {text}"
                            ))
                        })?;
                        if let Some(error) = v.get("error") {
                            return Err(classify_rpc_error(error));
                        }
                        if let Some(result) = v.get("result") {
                            return Ok(result.clone());
                        }
                        return Err(OdooError::InvalidResponse(
                            "JSON-RPC response missing 'result' field".to_string(),
                        ));
                    }

                    let err = classify_http_error(status.as_u16(), text, None);
                    if is_retryable_status(status.as_u16()) {
                        last_err = Some(err);
                    } else {
                        return Err(err);
                    }
                }
                Err(e) => {
                    last_err = Some(if e.is_timeout() {
                        OdooError::Timeout { attempts: attempt + 1 }
                    } else {
                        OdooError::Transport(e.to_string())
                    });
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(backoff_delay(attempt as u32)).await;
            }
        }

        Err(exhausted(last_err, attempts))
    }

    /// Return the cached uid, logging in when there is none.
    async fn session_uid(&self) -> OdooResult<i64> {
        let mut cached = self.uid.lock().await;
        if let Some(uid) = *cached {
            return Ok(uid);
        }
        let uid = self.login().await?;
        *cached = Some(uid);
        Ok(uid)
    }

    async fn login(&self) -> OdooResult<i64> {
        let args = json!([self.db, self.username, self.password, {}]);
        let result = self.rpc("common", "authenticate", args).await?;

        // Failed logins come back as `false`, not as an error object.
        match result.as_i64() {
            Some(uid) if uid > 0 => {
                debug!(user = %self.username, uid, "legacy session established");
                Ok(uid)
            }
            _ => Err(OdooError::Auth(format!(
                "authentication failed for user '{}' on db '{}'",
                self.username, self.db
            ))),
        }
    }

    /// Model call via `object.execute_kw`. A server-declared authentication
    /// error invalidates the session and retries once after a fresh login.
    pub async fn call_method(
        &self,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Map<String, Value>,
    ) -> OdooResult<Value> {
        let uid = self.session_uid().await?;
        match self.execute_kw(uid, model, method, args.clone(), kwargs.clone()).await {
            Err(OdooError::Auth(_)) => {
                let fresh = {
                    let mut cached = self.uid.lock().await;
                    *cached = None;
                    let uid = self.login().await?;
                    *cached = Some(uid);
                    uid
                };
                debug!(model, method, "session rejected; retrying once after relogin");
                self.execute_kw(fresh, model, method, args, kwargs).await
            }
            other => other,
        }
    }

    async fn execute_kw(
        &self,
        uid: i64,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Map<String, Value>,
    ) -> OdooResult<Value> {
        let call_args = json!([self.db, uid, self.password, model, method, args, kwargs]);
        self.rpc("object", "execute_kw", call_args).await
    }

    /// Legacy report downloads go through the web controller, so a session
    /// cookie is established first.
    pub async fn download_report_pdf(&self, report_name: &str, ids: &[i64]) -> OdooResult<Vec<u8>> {
        let session_url = {
            let mut u = self.base_url.clone();
            u.set_path("/web/session/authenticate");
            u
        };
        let session_body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "db": self.db, "login": self.username, "password": self.password },
            "id": 1
        });
        self.http
            .post(session_url)
            .headers(self.headers())
            .json(&session_body)
            .send()
            .await
            .map_err(|e| OdooError::Transport(e.to_string()))?;

        let mut url = self.base_url.clone();
        let ids_csv = ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        url.set_path(&format!("/report/pdf/{report_name}/{ids_csv}"));

        let mut last_err: Option<OdooError> = None;
        let attempts = self.max_retries + 1;
        for attempt in 0..attempts {
            match self.http.get(url.clone()).send().await {
                Ok(r) => {
                    let status = r.status();
                    if status.is_success() {
                        return Ok(r
                            .bytes()
                            .await
                            .map_err(|e| OdooError::Transport(e.to_string()))?
                            .to_vec());
                    }
                    let text = r.text().await.unwrap_or_default();
                    let err = classify_http_error(status.as_u16(), text, None);
                    if is_retryable_status(status.as_u16()) {
                        last_err = Some(err);
                    } else {
                        return Err(err);
                    }
                }
                Err(e) => last_err = Some(OdooError::Transport(e.to_string())),
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(backoff_delay(attempt as u32)).await;
            }
        }
        Err(exhausted(last_err, attempts))
    }

    /// Cheap reachability probe used by `validate-config`.
    pub async fn health_check(&self) -> bool {
        self.call_method("ir.model", "search_count", json!([[]]), Map::new())
            .await
            .is_ok()
    }
}
