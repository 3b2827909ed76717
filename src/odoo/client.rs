use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::error::{OdooError, OdooResult};
use super::instance::{InstanceDescriptor, Protocol};
use super::legacy::LegacyClient;
use super::modern::ModernClient;

/// The Odoo capability set used by the operation handlers. Implemented by
/// [`OdooClient`]; a trait so tests can substitute fakes.
#[async_trait]
pub trait OdooApi: Send + Sync {
    async fn search(
        &self,
        model: &str,
        domain: Option<Value>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<String>,
        context: Option<Value>,
    ) -> OdooResult<Vec<i64>>;

    async fn search_read(
        &self,
        model: &str,
        domain: Option<Value>,
        fields: Option<Vec<String>>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<String>,
        context: Option<Value>,
    ) -> OdooResult<Value>;

    async fn read(
        &self,
        model: &str,
        ids: Vec<i64>,
        fields: Option<Vec<String>>,
        context: Option<Value>,
    ) -> OdooResult<Value>;

    async fn create(&self, model: &str, values: Value, context: Option<Value>) -> OdooResult<i64>;

    async fn write(
        &self,
        model: &str,
        ids: Vec<i64>,
        values: Value,
        context: Option<Value>,
    ) -> OdooResult<bool>;

    async fn unlink(&self, model: &str, ids: Vec<i64>, context: Option<Value>) -> OdooResult<bool>;

    async fn search_count(
        &self,
        model: &str,
        domain: Option<Value>,
        context: Option<Value>,
    ) -> OdooResult<i64>;

    async fn fields_get(&self, model: &str, context: Option<Value>) -> OdooResult<Value>;

    async fn read_group(
        &self,
        model: &str,
        domain: Option<Value>,
        fields: Vec<String>,
        groupby: Vec<String>,
        offset: Option<i64>,
        limit: Option<i64>,
        orderby: Option<String>,
        lazy: Option<bool>,
        context: Option<Value>,
    ) -> OdooResult<Value>;

    async fn name_search(
        &self,
        model: &str,
        name: Option<String>,
        args: Option<Value>,
        operator: Option<String>,
        limit: Option<i64>,
        context: Option<Value>,
    ) -> OdooResult<Value>;

    async fn name_get(&self, model: &str, ids: Vec<i64>, context: Option<Value>)
    -> OdooResult<Value>;

    async fn default_get(
        &self,
        model: &str,
        fields_list: Vec<String>,
        context: Option<Value>,
    ) -> OdooResult<Value>;

    async fn copy(
        &self,
        model: &str,
        id: i64,
        default: Option<Value>,
        context: Option<Value>,
    ) -> OdooResult<i64>;

    async fn onchange(
        &self,
        model: &str,
        ids: Vec<i64>,
        values: Value,
        field_name: Vec<String>,
        field_onchange: Value,
        context: Option<Value>,
    ) -> OdooResult<Value>;

    /// Arbitrary model method: positional ids (when given) plus named params.
    async fn call_named(
        &self,
        model: &str,
        method: &str,
        ids: Option<Vec<i64>>,
        params: Map<String, Value>,
        context: Option<Value>,
    ) -> OdooResult<Value>;

    async fn download_report_pdf(&self, report_name: &str, ids: &[i64]) -> OdooResult<Vec<u8>>;

    fn is_legacy(&self) -> bool;
}

/// Unified client over the two incompatible Odoo surfaces. The protocol is
/// fixed at construction from the descriptor; callers never see login state.
#[derive(Clone, Debug)]
pub enum OdooClient {
    Modern(ModernClient),
    Legacy(LegacyClient),
}

impl OdooClient {
    pub fn new(cfg: &InstanceDescriptor) -> anyhow::Result<Self> {
        match cfg.select_protocol()? {
            Protocol::Modern => Ok(OdooClient::Modern(ModernClient::new(cfg)?)),
            Protocol::Legacy => Ok(OdooClient::Legacy(LegacyClient::new(cfg)?)),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, OdooClient::Legacy(_))
    }

    /// The single wire primitive both variants share: one model method call
    /// with positional args and keyword args.
    pub async fn call_method(
        &self,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Map<String, Value>,
    ) -> OdooResult<Value> {
        match self {
            OdooClient::Modern(c) => c.call_method(model, method, args, kwargs).await,
            OdooClient::Legacy(c) => c.call_method(model, method, args, kwargs).await,
        }
    }

    pub async fn health_check(&self) -> bool {
        match self {
            OdooClient::Modern(c) => c.health_check().await,
            OdooClient::Legacy(c) => c.health_check().await,
        }
    }
}

fn with_context(mut kwargs: Map<String, Value>, context: Option<Value>) -> Map<String, Value> {
    if let Some(ctx) = context
        && !ctx.is_null()
    {
        kwargs.insert("context".to_string(), ctx);
    }
    kwargs
}

/// Odoo returns record ids either bare or as a one-element array depending
/// on the surface and version.
fn expect_id(v: Value, method: &str) -> OdooResult<i64> {
    if let Some(arr) = v.as_array() {
        return arr.first().and_then(|x| x.as_i64()).ok_or_else(|| {
            OdooError::InvalidResponse(format!("Expected id array from {method}, got: {v}"))
        });
    }
    v.as_i64().ok_or_else(|| {
        OdooError::InvalidResponse(format!("Expected id (number) from {method}, got: {v}"))
    })
}

#[async_trait]
impl OdooApi for OdooClient {
    async fn search(
        &self,
        model: &str,
        domain: Option<Value>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<String>,
        context: Option<Value>,
    ) -> OdooResult<Vec<i64>> {
        let domain = domain.unwrap_or_else(|| json!([]));
        let mut kwargs = Map::new();
        if let Some(v) = limit {
            kwargs.insert("limit".to_string(), json!(v));
        }
        if let Some(v) = offset {
            kwargs.insert("offset".to_string(), json!(v));
        }
        if let Some(v) = order {
            kwargs.insert("order".to_string(), json!(v));
        }
        let kwargs = with_context(kwargs, context);

        let v = self.call_method(model, "search", json!([domain]), kwargs).await?;
        serde_json::from_value(v).map_err(|e| {
            OdooError::InvalidResponse(format!("Expected array of ids from search: {e}"))
        })
    }

    async fn search_read(
        &self,
        model: &str,
        domain: Option<Value>,
        fields: Option<Vec<String>>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<String>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        let domain = domain.unwrap_or_else(|| json!([]));
        let mut kwargs = Map::new();
        if let Some(v) = fields {
            kwargs.insert("fields".to_string(), json!(v));
        }
        if let Some(v) = limit {
            kwargs.insert("limit".to_string(), json!(v));
        }
        if let Some(v) = offset {
            kwargs.insert("offset".to_string(), json!(v));
        }
        if let Some(v) = order {
            kwargs.insert("order".to_string(), json!(v));
        }
        let kwargs = with_context(kwargs, context);

        self.call_method(model, "search_read", json!([domain]), kwargs).await
    }

    async fn read(
        &self,
        model: &str,
        ids: Vec<i64>,
        fields: Option<Vec<String>>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        let mut kwargs = Map::new();
        if let Some(v) = fields {
            kwargs.insert("fields".to_string(), json!(v));
        }
        let kwargs = with_context(kwargs, context);
        self.call_method(model, "read", json!([ids]), kwargs).await
    }

    async fn create(&self, model: &str, values: Value, context: Option<Value>) -> OdooResult<i64> {
        // Odoo's create takes a vals_list; a bare object is accepted here
        // for convenience and wrapped.
        let vals_list = if values.is_array() { values } else { json!([values]) };
        let kwargs = with_context(Map::new(), context);
        let v = self.call_method(model, "create", json!([vals_list]), kwargs).await?;
        expect_id(v, "create")
    }

    async fn write(
        &self,
        model: &str,
        ids: Vec<i64>,
        values: Value,
        context: Option<Value>,
    ) -> OdooResult<bool> {
        let kwargs = with_context(Map::new(), context);
        let v = self.call_method(model, "write", json!([ids, values]), kwargs).await?;
        serde_json::from_value(v)
            .map_err(|e| OdooError::InvalidResponse(format!("Expected boolean from write: {e}")))
    }

    async fn unlink(&self, model: &str, ids: Vec<i64>, context: Option<Value>) -> OdooResult<bool> {
        let kwargs = with_context(Map::new(), context);
        let v = self.call_method(model, "unlink", json!([ids]), kwargs).await?;
        serde_json::from_value(v)
            .map_err(|e| OdooError::InvalidResponse(format!("Expected boolean from unlink: {e}")))
    }

    async fn search_count(
        &self,
        model: &str,
        domain: Option<Value>,
        context: Option<Value>,
    ) -> OdooResult<i64> {
        let domain = domain.unwrap_or_else(|| json!([]));
        let kwargs = with_context(Map::new(), context);
        let v = self.call_method(model, "search_count", json!([domain]), kwargs).await?;
        serde_json::from_value(v).map_err(|e| {
            OdooError::InvalidResponse(format!("Expected count (number) from search_count: {e}"))
        })
    }

    async fn fields_get(&self, model: &str, context: Option<Value>) -> OdooResult<Value> {
        let mut kwargs = Map::new();
        kwargs.insert(
            "attributes".to_string(),
            json!(["string", "type", "help", "required", "readonly", "relation", "selection"]),
        );
        let kwargs = with_context(kwargs, context);
        self.call_method(model, "fields_get", json!([]), kwargs).await
    }

    async fn read_group(
        &self,
        model: &str,
        domain: Option<Value>,
        fields: Vec<String>,
        groupby: Vec<String>,
        offset: Option<i64>,
        limit: Option<i64>,
        orderby: Option<String>,
        lazy: Option<bool>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        let domain = domain.unwrap_or_else(|| json!([]));
        let mut kwargs = Map::new();
        if let Some(v) = offset {
            kwargs.insert("offset".to_string(), json!(v));
        }
        if let Some(v) = limit {
            kwargs.insert("limit".to_string(), json!(v));
        }
        if let Some(v) = orderby {
            kwargs.insert("orderby".to_string(), json!(v));
        }
        if let Some(v) = lazy {
            kwargs.insert("lazy".to_string(), json!(v));
        }
        let kwargs = with_context(kwargs, context);
        self.call_method(model, "read_group", json!([domain, fields, groupby]), kwargs)
            .await
    }

    async fn name_search(
        &self,
        model: &str,
        name: Option<String>,
        args: Option<Value>,
        operator: Option<String>,
        limit: Option<i64>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        let name = name.unwrap_or_default();
        let args = args.unwrap_or_else(|| json!([]));
        let operator = operator.unwrap_or_else(|| "ilike".to_string());
        let limit = limit.unwrap_or(100);
        let kwargs = with_context(Map::new(), context);
        self.call_method(model, "name_search", json!([name, args, operator, limit]), kwargs)
            .await
    }

    async fn name_get(
        &self,
        model: &str,
        ids: Vec<i64>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        let kwargs = with_context(Map::new(), context);
        self.call_method(model, "name_get", json!([ids]), kwargs).await
    }

    async fn default_get(
        &self,
        model: &str,
        fields_list: Vec<String>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        let kwargs = with_context(Map::new(), context);
        self.call_method(model, "default_get", json!([fields_list]), kwargs).await
    }

    async fn copy(
        &self,
        model: &str,
        id: i64,
        default: Option<Value>,
        context: Option<Value>,
    ) -> OdooResult<i64> {
        let mut kwargs = Map::new();
        if let Some(d) = default {
            kwargs.insert("default".to_string(), d);
        }
        let kwargs = with_context(kwargs, context);
        let v = self.call_method(model, "copy", json!([id]), kwargs).await?;
        expect_id(v, "copy")
    }

    async fn onchange(
        &self,
        model: &str,
        ids: Vec<i64>,
        values: Value,
        field_name: Vec<String>,
        field_onchange: Value,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        let kwargs = with_context(Map::new(), context);
        self.call_method(
            model,
            "onchange",
            json!([ids, values, field_name, field_onchange]),
            kwargs,
        )
        .await
    }

    async fn call_named(
        &self,
        model: &str,
        method: &str,
        ids: Option<Vec<i64>>,
        params: Map<String, Value>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        let args = match ids {
            Some(ids) => json!([ids]),
            None => json!([]),
        };
        let kwargs = with_context(params, context);
        self.call_method(model, method, args, kwargs).await
    }

    async fn download_report_pdf(&self, report_name: &str, ids: &[i64]) -> OdooResult<Vec<u8>> {
        match self {
            OdooClient::Modern(c) => c.download_report_pdf(report_name, ids).await,
            OdooClient::Legacy(c) => c.download_report_pdf(report_name, ids).await,
        }
    }

    fn is_legacy(&self) -> bool {
        OdooClient::is_legacy(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odoo::instance::ProtocolHint;
    use std::collections::HashMap;

    fn descriptor(api_key: Option<&str>, legacy: bool) -> InstanceDescriptor {
        InstanceDescriptor {
            url: "http://localhost:8069".to_string(),
            db: Some("test".to_string()),
            api_key: api_key.map(|s| s.to_string()),
            username: legacy.then(|| "admin".to_string()),
            password: legacy.then(|| "admin".to_string()),
            version: legacy.then(|| "18".to_string()),
            protocol: None,
            timeout_ms: None,
            max_retries: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn api_key_builds_modern_client() {
        let client = OdooClient::new(&descriptor(Some("key"), false)).unwrap();
        assert!(!client.is_legacy());
    }

    #[test]
    fn password_triple_builds_legacy_client() {
        let client = OdooClient::new(&descriptor(None, true)).unwrap();
        assert!(client.is_legacy());
    }

    #[test]
    fn legacy_hint_with_both_credential_sets_builds_legacy() {
        let mut cfg = descriptor(Some("key"), true);
        cfg.protocol = Some(ProtocolHint::Legacy);
        let client = OdooClient::new(&cfg).unwrap();
        assert!(client.is_legacy());
    }

    #[test]
    fn no_credentials_fails_construction() {
        assert!(OdooClient::new(&descriptor(None, false)).is_err());
    }

    #[test]
    fn expect_id_accepts_bare_and_wrapped_ids() {
        assert_eq!(expect_id(json!(42), "create").unwrap(), 42);
        assert_eq!(expect_id(json!([42]), "create").unwrap(), 42);
        assert!(expect_id(json!([]), "create").is_err());
        assert!(expect_id(json!("42"), "create").is_err());
    }

    #[test]
    fn with_context_skips_null() {
        let kwargs = with_context(Map::new(), Some(Value::Null));
        assert!(kwargs.is_empty());
        let kwargs = with_context(Map::new(), Some(json!({"lang": "en_US"})));
        assert_eq!(kwargs["context"]["lang"], "en_US");
    }
}
