use serde_json::{Value, json};

use crate::context::AppContext;
use crate::dispatch::fetch_model_metadata;
use crate::error::RpcError;
use crate::odoo::client::OdooApi;

/// `odoo://` resource addresses:
/// - `odoo://instances` — the configured instance names
/// - `odoo://{instance}/models` — models reachable in one instance
/// - `odoo://{instance}/metadata/{model}` — field metadata for one model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUri {
    Instances,
    Models { instance: String },
    Metadata { instance: String, model: String },
}

impl ResourceUri {
    pub fn parse(uri: &str) -> Result<Self, String> {
        let path = uri
            .strip_prefix("odoo://")
            .ok_or_else(|| format!("invalid URI scheme, expected odoo://: {uri}"))?;

        if path == "instances" {
            return Ok(ResourceUri::Instances);
        }

        let (instance, rest) = path
            .split_once('/')
            .ok_or_else(|| format!("invalid resource URI: {uri}"))?;
        if instance.is_empty() {
            return Err(format!("invalid resource URI: {uri}"));
        }

        if rest == "models" {
            return Ok(ResourceUri::Models {
                instance: instance.to_string(),
            });
        }
        if let Some(model) = rest.strip_prefix("metadata/") {
            if model.is_empty() {
                return Err("invalid metadata URI: missing model name".to_string());
            }
            return Ok(ResourceUri::Metadata {
                instance: instance.to_string(),
                model: model.to_string(),
            });
        }
        Err(format!("invalid resource type in URI: {uri}"))
    }

    pub fn to_uri(&self) -> String {
        match self {
            ResourceUri::Instances => "odoo://instances".to_string(),
            ResourceUri::Models { instance } => format!("odoo://{instance}/models"),
            ResourceUri::Metadata { instance, model } => {
                format!("odoo://{instance}/metadata/{model}")
            }
        }
    }
}

pub async fn list_resources(ctx: &AppContext) -> Result<Value, RpcError> {
    let mut resources = vec![json!({
        "uri": "odoo://instances",
        "name": "Odoo Instances",
        "description": "List of configured Odoo instances",
        "mimeType": "application/json",
    })];

    for instance in ctx.store.names() {
        resources.push(json!({
            "uri": format!("odoo://{instance}/models"),
            "name": format!("Models in {instance}"),
            "description": format!("Models accessible in Odoo instance '{instance}'"),
            "mimeType": "application/json",
        }));
    }

    Ok(json!({ "resources": resources }))
}

pub async fn read_resource(ctx: &AppContext, uri: &str) -> Result<Value, RpcError> {
    let resource = ResourceUri::parse(uri).map_err(RpcError::InvalidRequest)?;
    match resource {
        ResourceUri::Instances => {
            let names: Vec<Value> = ctx.store.names().into_iter().map(|n| json!({"name": n})).collect();
            Ok(contents("odoo://instances", &json!(names)))
        }
        ResourceUri::Models { instance } => {
            let client = ctx
                .pool
                .get(&instance)
                .await
                .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
            let models = client
                .search_read(
                    "ir.model",
                    Some(json!([])),
                    Some(vec!["model".to_string(), "name".to_string()]),
                    None,
                    None,
                    None,
                    None,
                )
                .await?;
            Ok(contents(&format!("odoo://{instance}/models"), &models))
        }
        ResourceUri::Metadata { instance, model } => {
            let client = ctx
                .pool
                .get(&instance)
                .await
                .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
            let metadata = fetch_model_metadata(&client, &model, None).await?;
            Ok(contents(&format!("odoo://{instance}/metadata/{model}"), &metadata))
        }
    }
}

fn contents(uri: &str, body: &Value) -> Value {
    json!({
        "contents": [{
            "uri": uri,
            "mimeType": "application/json",
            "text": serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string()),
        }]
    })
}
