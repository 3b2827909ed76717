use base64::Engine;
use serde_json::{Map, Value, json};

use super::args::*;
use super::cleanup;
use crate::context::AppContext;
use crate::error::RpcError;
use crate::odoo::cache::MetadataCache;
use crate::odoo::client::{OdooApi, OdooClient};
use crate::odoo::error::OdooError;
use crate::registry::OpSpec;

/// Cap on rows accepted by a single create_batch call.
const CREATE_BATCH_LIMIT: usize = 100;

async fn client_for(ctx: &AppContext, args: &Value, op: &OpSpec) -> Result<OdooClient, RpcError> {
    let instance = req_str(args, op, "instance")?;
    ctx.pool
        .get(&instance)
        .await
        .map_err(|e| RpcError::InvalidArguments(e.to_string()))
}

pub(super) async fn search(ctx: &AppContext, op: &OpSpec, args: &Value) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let ids = client
        .search(
            &model,
            opt_value(args, op, "domain"),
            opt_i64(args, op, "limit")?,
            opt_i64(args, op, "offset")?,
            opt_str(args, op, "order")?,
            opt_value(args, op, "context"),
        )
        .await?;
    Ok(json!({ "ids": ids, "count": ids.len() }))
}

pub(super) async fn search_read(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let records = client
        .search_read(
            &model,
            opt_value(args, op, "domain"),
            opt_str_vec(args, op, "fields")?,
            opt_i64(args, op, "limit")?,
            opt_i64(args, op, "offset")?,
            opt_str(args, op, "order")?,
            opt_value(args, op, "context"),
        )
        .await?;
    let count = records.as_array().map(Vec::len).unwrap_or(0);
    Ok(json!({ "records": records, "count": count }))
}

pub(super) async fn read(ctx: &AppContext, op: &OpSpec, args: &Value) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let records = client
        .read(
            &model,
            req_i64_vec(args, op, "ids")?,
            opt_str_vec(args, op, "fields")?,
            opt_value(args, op, "context"),
        )
        .await?;
    Ok(json!({ "records": records }))
}

pub(super) async fn create(ctx: &AppContext, op: &OpSpec, args: &Value) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let id = client
        .create(&model, req_value(args, op, "values")?, opt_value(args, op, "context"))
        .await?;
    Ok(json!({ "id": id, "success": true }))
}

pub(super) async fn write(ctx: &AppContext, op: &OpSpec, args: &Value) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let ids = req_i64_vec(args, op, "ids")?;
    let ok = client
        .write(
            &model,
            ids.clone(),
            req_value(args, op, "values")?,
            opt_value(args, op, "context"),
        )
        .await?;
    Ok(json!({ "success": ok, "updated_count": ids.len() }))
}

pub(super) async fn unlink(ctx: &AppContext, op: &OpSpec, args: &Value) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let ids = req_i64_vec(args, op, "ids")?;
    let ok = client
        .unlink(&model, ids.clone(), opt_value(args, op, "context"))
        .await?;
    Ok(json!({ "success": ok, "deleted_count": ids.len() }))
}

pub(super) async fn search_count(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let count = client
        .search_count(&model, opt_value(args, op, "domain"), opt_value(args, op, "context"))
        .await?;
    Ok(json!({ "count": count }))
}

/// Pass-through to an arbitrary model method. The mapped `args` value (a
/// JSON array) becomes the positional arguments, `kwargs` (an object) the
/// keyword arguments.
pub(super) async fn execute(ctx: &AppContext, op: &OpSpec, args: &Value) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let method = req_str(args, op, "method")?;

    let positional = match opt_value(args, op, "args") {
        None => json!([]),
        Some(v @ Value::Array(_)) => v,
        Some(other) => json!([other]),
    };
    let kwargs = match opt_value(args, op, "kwargs") {
        None => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(RpcError::InvalidArguments(
                "argument 'kwargs' must be an object".to_string(),
            ));
        }
    };
    let kwargs = match opt_value(args, op, "context") {
        Some(ctx_value) => {
            let mut k = kwargs;
            k.insert("context".to_string(), ctx_value);
            k
        }
        None => kwargs,
    };

    let result = client.call_method(&model, &method, positional, kwargs).await?;
    Ok(json!({ "result": result }))
}

pub(super) async fn workflow_action(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let ids = req_i64_vec(args, op, "ids")?;
    let action = req_str(args, op, "action")?;
    let result = client
        .call_named(
            &model,
            &action,
            Some(ids.clone()),
            Map::new(),
            opt_value(args, op, "context"),
        )
        .await?;
    Ok(json!({ "result": result, "executed_on": ids }))
}

pub(super) async fn generate_report(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let report_name = req_str(args, op, "reportName")?;
    let ids = req_i64_vec(args, op, "ids")?;
    let pdf = client.download_report_pdf(&report_name, &ids).await?;
    Ok(json!({
        "pdf_base64": base64::engine::general_purpose::STANDARD.encode(pdf),
        "report_name": report_name,
        "record_ids": ids,
    }))
}

pub(super) async fn get_model_metadata(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    let instance = req_str(args, op, "instance")?;
    let model = req_str(args, op, "model")?;
    let context = opt_value(args, op, "context");

    let ttl = MetadataCache::ttl_secs();
    if ttl > 0
        && let Some(cached) = ctx.cache.get(&instance, &model).await
    {
        return Ok(cached);
    }

    let client = ctx
        .pool
        .get(&instance)
        .await
        .map_err(|e| RpcError::InvalidArguments(e.to_string()))?;
    let metadata = fetch_model_metadata(&client, &model, context).await?;

    if ttl > 0 {
        ctx.cache.insert(&instance, &model, metadata.clone(), ttl).await;
    }
    Ok(metadata)
}

/// Compose fields_get with the ir.model description lookup.
pub(crate) async fn fetch_model_metadata(
    client: &OdooClient,
    model: &str,
    context: Option<Value>,
) -> Result<Value, OdooError> {
    let fields = client.fields_get(model, context.clone()).await?;

    let info = client
        .search_read(
            "ir.model",
            Some(json!([["model", "=", model]])),
            Some(vec!["name".to_string(), "model".to_string()]),
            Some(1),
            None,
            None,
            context,
        )
        .await?;
    let description = info
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|o| o.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or(model)
        .to_string();

    Ok(json!({
        "model": {
            "name": model,
            "description": description,
            "fields": fields,
        }
    }))
}

pub(super) async fn list_models(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let domain =
        opt_value(args, op, "domain").unwrap_or_else(|| json!([["transient", "=", false]]));
    let records = client
        .search_read(
            "ir.model",
            Some(domain),
            Some(vec!["model".to_string(), "name".to_string()]),
            opt_i64(args, op, "limit")?,
            opt_i64(args, op, "offset")?,
            None,
            opt_value(args, op, "context"),
        )
        .await?;
    let count = records.as_array().map(Vec::len).unwrap_or(0);
    Ok(json!({ "records": records, "count": count }))
}

pub(super) async fn check_access(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let operation = req_str(args, op, "operation")?;
    let ids = opt_i64_vec(args, op, "ids")?;
    let context = opt_value(args, op, "context");

    let mut params = Map::new();
    params.insert("operation".to_string(), json!(operation));
    params.insert("raise_exception".to_string(), json!(false));
    let rights = client
        .call_named(&model, "check_access_rights", None, params, context.clone())
        .await?;
    let mut allowed = rights.as_bool().unwrap_or(false);

    // Record rules raise instead of returning false.
    if allowed && let Some(ids) = ids {
        let mut params = Map::new();
        params.insert("operation".to_string(), json!(operation));
        match client
            .call_named(&model, "check_access_rule", Some(ids), params, context)
            .await
        {
            Ok(_) => {}
            Err(OdooError::AccessDenied(_)) | Err(OdooError::Api { .. }) => allowed = false,
            Err(other) => return Err(other.into()),
        }
    }

    Ok(json!({ "allowed": allowed, "operation": operation, "model": model }))
}

pub(super) async fn create_batch(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let values = req_value(args, op, "values")?;
    let context = opt_value(args, op, "context");

    let rows = values.as_array().ok_or_else(|| {
        RpcError::InvalidArguments("argument 'values' must be an array".to_string())
    })?;
    if rows.len() > CREATE_BATCH_LIMIT {
        return Err(RpcError::InvalidArguments(format!(
            "batch size limited to {CREATE_BATCH_LIMIT} records, got {}",
            rows.len()
        )));
    }

    let mut ids = Vec::with_capacity(rows.len());
    for row in rows {
        ids.push(client.create(&model, row.clone(), context.clone()).await?);
    }
    Ok(json!({ "ids": ids, "created_count": ids.len() }))
}

pub(super) async fn read_group(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let groups = client
        .read_group(
            &model,
            opt_value(args, op, "domain"),
            opt_str_vec(args, op, "fields")?.unwrap_or_default(),
            opt_str_vec(args, op, "groupby")?.unwrap_or_default(),
            opt_i64(args, op, "offset")?,
            opt_i64(args, op, "limit")?,
            opt_str(args, op, "orderby")?,
            opt_bool(args, op, "lazy")?,
            opt_value(args, op, "context"),
        )
        .await?;
    Ok(json!({ "groups": groups }))
}

pub(super) async fn name_search(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let records = client
        .name_search(
            &model,
            opt_str(args, op, "name")?,
            opt_value(args, op, "args"),
            opt_str(args, op, "operator")?,
            opt_i64(args, op, "limit")?,
            opt_value(args, op, "context"),
        )
        .await?;
    Ok(json!({ "records": records }))
}

pub(super) async fn name_get(ctx: &AppContext, op: &OpSpec, args: &Value) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let records = client
        .name_get(&model, req_i64_vec(args, op, "ids")?, opt_value(args, op, "context"))
        .await?;
    Ok(json!({ "records": records }))
}

pub(super) async fn default_get(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let defaults = client
        .default_get(
            &model,
            opt_str_vec(args, op, "fields")?.unwrap_or_default(),
            opt_value(args, op, "context"),
        )
        .await?;
    Ok(json!({ "defaults": defaults }))
}

pub(super) async fn copy(ctx: &AppContext, op: &OpSpec, args: &Value) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let id = req_i64(args, op, "id")?;
    let new_id = client
        .copy(
            &model,
            id,
            opt_value(args, op, "default"),
            opt_value(args, op, "context"),
        )
        .await?;
    Ok(json!({ "id": new_id, "success": true }))
}

pub(super) async fn onchange(ctx: &AppContext, op: &OpSpec, args: &Value) -> Result<Value, RpcError> {
    let client = client_for(ctx, args, op).await?;
    let model = req_str(args, op, "model")?;
    let raw = client
        .onchange(
            &model,
            req_i64_vec(args, op, "ids")?,
            req_value(args, op, "values")?,
            opt_str_vec(args, op, "fieldName")?.unwrap_or_default(),
            opt_value(args, op, "fieldOnchange").unwrap_or_else(|| json!({})),
            opt_value(args, op, "context"),
        )
        .await?;

    let mut payload = json!({
        "value": raw.get("value").cloned().unwrap_or_else(|| raw.clone()),
    });
    if let Some(warning) = raw.get("warning").filter(|w| !w.is_null()) {
        payload["warning"] = warning.clone();
    }
    if let Some(domain) = raw.get("domain").filter(|d| !d.is_null()) {
        payload["domain"] = domain.clone();
    }
    Ok(payload)
}

pub(super) async fn database_cleanup(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    cleanup::ensure_enabled("database_cleanup")?;
    let client = client_for(ctx, args, op).await?;
    let report = cleanup::database_cleanup(
        &client,
        cleanup::CleanupOptions {
            remove_test_data: opt_bool(args, op, "removeTestData")?,
            archive_stale_records: opt_bool(args, op, "archiveStaleRecords")?,
            cleanup_drafts: opt_bool(args, op, "cleanupDrafts")?,
            days_threshold: opt_i64(args, op, "daysThreshold")?,
            dry_run: opt_bool(args, op, "dryRun")?,
        },
    )
    .await;
    serde_json::to_value(&report).map_err(|e| RpcError::Internal(e.to_string()))
}

pub(super) async fn deep_cleanup(
    ctx: &AppContext,
    op: &OpSpec,
    args: &Value,
) -> Result<Value, RpcError> {
    cleanup::ensure_enabled("deep_cleanup")?;
    let client = client_for(ctx, args, op).await?;
    let report = cleanup::deep_cleanup(
        &client,
        cleanup::DeepCleanupOptions {
            dry_run: opt_bool(args, op, "dryRun")?,
            keep_company_defaults: opt_bool(args, op, "keepCompanyDefaults")?,
            keep_user_accounts: opt_bool(args, op, "keepUserAccounts")?,
            keep_menus: opt_bool(args, op, "keepMenus")?,
            keep_groups: opt_bool(args, op, "keepGroups")?,
        },
    )
    .await;
    serde_json::to_value(&report).map_err(|e| RpcError::Internal(e.to_string()))
}
