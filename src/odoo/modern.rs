use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value};
use url::Url;

use super::error::{OdooError, OdooErrorBody, OdooResult, classify_http_error};
use super::instance::InstanceDescriptor;
use super::retry::{backoff_delay, exhausted, is_retryable_status};

/// Client for the Odoo JSON-2 REST surface (`/json/2/...`, bearer API key).
/// Stateless: no login round-trip, no session to maintain.
#[derive(Clone, Debug)]
pub struct ModernClient {
    base_url: Url,
    db: Option<String>,
    api_key: String,
    http: reqwest::Client,
    max_retries: usize,
}

impl ModernClient {
    pub fn new(cfg: &InstanceDescriptor) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(&cfg.url)
            .map_err(|e| anyhow::anyhow!("Invalid Odoo url '{}': {e}", cfg.url))?;
        // Keep scheme/host/port only.
        base_url.set_path("");
        base_url.set_query(None);
        base_url.set_fragment(None);

        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing apiKey for instance url={}", cfg.url))?;

        let http = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .cookie_store(true)
            .build()?;

        Ok(Self {
            base_url,
            db: cfg.db.clone().filter(|d| !d.trim().is_empty()),
            api_key,
            http,
            max_retries: cfg.retries(),
        })
    }

    fn headers(&self) -> OdooResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|e| {
                OdooError::InvalidResponse(format!("Invalid Authorization header value: {e}"))
            })?,
        );
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("odoo-mcp-bridge/0.1"));
        Ok(headers)
    }

    /// `/json/2/{db}/{model}/{method}`, or without the db segment when no
    /// database is configured.
    fn endpoint(&self, model: &str, method: &str) -> Url {
        let mut url = self.base_url.clone();
        match &self.db {
            Some(db) => url.set_path(&format!("/json/2/{db}/{model}/{method}")),
            None => url.set_path(&format!("/json/2/{model}/{method}")),
        }
        url
    }

    /// One model-method call: body `{"args": [...], "kwargs": {...}}`.
    pub async fn call_method(
        &self,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Map<String, Value>,
    ) -> OdooResult<Value> {
        let url = self.endpoint(model, method);
        let headers = self.headers()?;
        let body = serde_json::json!({ "args": args, "kwargs": kwargs });

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
                        return serde_json::from_str(&text).map_err(|e| {
                            OdooError::InvalidResponse(format!(
                                "Failed to parse JSON response: {e}. Body: {text}"
                            ))
                        });
                    }

                    let parsed: Option<OdooErrorBody> = serde_json::from_str(&text).ok();
                    let message = parsed
                        .as_ref()
                        .and_then(|b| b.message.clone())
                        .unwrap_or_else(|| text.clone());
                    let err = classify_http_error(status.as_u16(), message, parsed);

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

    pub async fn download_report_pdf(&self, report_name: &str, ids: &[i64]) -> OdooResult<Vec<u8>> {
        let mut url = self.base_url.clone();
        let ids_csv = ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        url.set_path(&format!("/report/pdf/{report_name}/{ids_csv}"));
        let headers = self.headers()?;

        let mut last_err: Option<OdooError> = None;
        let attempts = self.max_retries + 1;

        for attempt in 0..attempts {
            match self.http.get(url.clone()).headers(headers.clone()).send().await {
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

    /// Cheap reachability probe used by `validate-config`.
    pub async fn health_check(&self) -> bool {
        self.call_method("ir.model", "search_count", serde_json::json!([[]]), Map::new())
            .await
            .is_ok()
    }
}
